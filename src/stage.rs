//! Stage sequencing for the installation.

use log::{debug, info};
use serde::Serialize;
use std::{fmt, str::FromStr};

use crate::config::Stages;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    #[default]
    Intro,
    Calibration,
    Morning,
    Maze,
    Test,
    Nighttime,
    Outro,
}

impl Stage {
    pub const ALL: [Stage; 7] = [
        Stage::Intro,
        Stage::Calibration,
        Stage::Morning,
        Stage::Maze,
        Stage::Test,
        Stage::Nighttime,
        Stage::Outro,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Intro => "intro",
            Stage::Calibration => "calibration",
            Stage::Morning => "morning",
            Stage::Maze => "maze",
            Stage::Test => "test",
            Stage::Nighttime => "nighttime",
            Stage::Outro => "outro",
        }
    }

    pub fn next(&self) -> Stage {
        match self {
            Stage::Intro => Stage::Calibration,
            Stage::Calibration => Stage::Morning,
            Stage::Morning => Stage::Maze,
            Stage::Maze => Stage::Test,
            Stage::Test => Stage::Nighttime,
            Stage::Nighttime => Stage::Outro,
            Stage::Outro => Stage::Intro,
        }
    }

    /// Stages that run on calibrated gaze.
    pub fn is_tracking(&self) -> bool {
        matches!(
            self,
            Stage::Morning | Stage::Maze | Stage::Test | Stage::Nighttime
        )
    }

    /// Stages whose end is signalled by stage content rather than by the
    /// blink pipeline.
    pub fn completes_externally(&self) -> bool {
        !matches!(self, Stage::Intro | Stage::Calibration)
    }

    /// Wall-clock length for timed stages.
    pub fn time_limit_ms(&self, st: &Stages) -> Option<u64> {
        match self {
            Stage::Morning => Some(st.morning_s.saturating_mul(1000)),
            Stage::Maze => Some(st.maze_s.saturating_mul(1000)),
            Stage::Test => Some(st.test_s.saturating_mul(1000)),
            _ => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s == "nightime" {
            return Ok(Stage::Nighttime);
        }
        Stage::ALL
            .into_iter()
            .find(|st| st.as_str() == s)
            .ok_or_else(|| format!("unknown stage: {s}"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub from: Stage,
    pub to: Stage,
}

/// Owns the current stage. Everything else reads it from here.
#[derive(Debug, Default)]
pub struct StageSequencer {
    current: Stage,
    entered_ms: u64,
}

impl StageSequencer {
    pub fn new(now_ms: u64) -> Self {
        Self {
            current: Stage::Intro,
            entered_ms: now_ms,
        }
    }

    pub fn current(&self) -> Stage {
        self.current
    }

    /// Move to `to` unconditionally. Re-entering the current stage restarts
    /// its clock and still counts as a transition.
    pub fn enter(&mut self, to: Stage, now_ms: u64) -> Transition {
        let t = Transition {
            from: self.current,
            to,
        };
        info!("stage {} -> {}", t.from, t.to);
        self.current = to;
        self.entered_ms = now_ms;
        t
    }

    /// Advance past `stage` if it is still the current one. A signal for any
    /// other stage is stale and ignored.
    pub fn advance_from(&mut self, stage: Stage, now_ms: u64) -> Option<Transition> {
        if self.current != stage {
            debug!(
                "ignoring completion of {stage}: current stage is {}",
                self.current
            );
            return None;
        }
        Some(self.enter(stage.next(), now_ms))
    }

    pub fn remaining_ms(&self, now_ms: u64, st: &Stages) -> Option<u64> {
        let limit = self.current.time_limit_ms(st)?;
        let elapsed = now_ms.saturating_sub(self.entered_ms);
        Some(limit.saturating_sub(elapsed))
    }

    pub fn timer_expired(&self, now_ms: u64, st: &Stages) -> bool {
        self.remaining_ms(now_ms, st) == Some(0)
    }
}

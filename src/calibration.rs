//! Four-corner calibration: one raw gaze sample per confirmed blink, reduced
//! to the bounding box the mapper interpolates against.

use log::info;
use serde::Serialize;

use crate::config::Screen;
use crate::geometry::GazePoint;

pub const TARGET_COUNT: usize = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationTarget {
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
}

impl CalibrationTarget {
    pub const ALL: [CalibrationTarget; TARGET_COUNT] = [
        Self::TopLeft,
        Self::TopRight,
        Self::BottomLeft,
        Self::BottomRight,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TopLeft => "top_left",
            Self::TopRight => "top_right",
            Self::BottomLeft => "bottom_left",
            Self::BottomRight => "bottom_right",
        }
    }

    /// Where the target is drawn, in screen pixels.
    pub fn position(&self, screen: &Screen) -> GazePoint {
        let inset = screen.target_inset;
        let (left, right) = (inset, screen.width - inset);
        let (top, bottom) = (inset, screen.height - inset);
        match self {
            Self::TopLeft => GazePoint::new(left, top),
            Self::TopRight => GazePoint::new(right, top),
            Self::BottomLeft => GazePoint::new(left, bottom),
            Self::BottomRight => GazePoint::new(right, bottom),
        }
    }
}

/// Axis-aligned box of the raw (normalized) calibration samples.
/// Zero width or height is possible and left to the mapper.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct CalibrationBounds {
    pub min_x: f32,
    pub max_x: f32,
    pub min_y: f32,
    pub max_y: f32,
}

impl CalibrationBounds {
    pub fn from_samples(samples: &[GazePoint]) -> Option<Self> {
        let first = samples.first()?;
        let init = Self {
            min_x: first.x,
            max_x: first.x,
            min_y: first.y,
            max_y: first.y,
        };
        Some(samples[1..].iter().fold(init, |b, p| Self {
            min_x: b.min_x.min(p.x),
            max_x: b.max_x.max(p.x),
            min_y: b.min_y.min(p.y),
            max_y: b.max_y.max(p.y),
        }))
    }

    pub fn center(&self) -> GazePoint {
        GazePoint::new(
            (self.min_x + self.max_x) / 2.0,
            (self.min_y + self.max_y) / 2.0,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Progress {
    pub index: usize,
    pub total: usize,
}

/// Result of feeding one confirmed blink to the manager.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Capture {
    pub index: usize,
    pub target: CalibrationTarget,
    pub sample: GazePoint,
    /// Set when this capture was the last one.
    pub bounds: Option<CalibrationBounds>,
}

#[derive(Debug, Default)]
pub struct CalibrationManager {
    samples: Vec<GazePoint>,
    bounds: Option<CalibrationBounds>,
}

impl CalibrationManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.bounds = None;
    }

    /// Record `raw_gaze` for the next target. Returns `None` once all four
    /// targets have been captured.
    pub fn capture(&mut self, raw_gaze: GazePoint) -> Option<Capture> {
        let index = self.samples.len();
        let target = *CalibrationTarget::ALL.get(index)?;
        self.samples.push(raw_gaze);
        info!(
            "calibration {}/{TARGET_COUNT} {}: raw gaze ({:.3}, {:.3})",
            index + 1,
            target.as_str(),
            raw_gaze.x,
            raw_gaze.y
        );

        if self.samples.len() == TARGET_COUNT {
            self.bounds = CalibrationBounds::from_samples(&self.samples);
            if let Some(b) = &self.bounds {
                let c = b.center();
                info!(
                    "calibration complete: x [{:.3}, {:.3}] y [{:.3}, {:.3}], center ({:.3}, {:.3})",
                    b.min_x, b.max_x, b.min_y, b.max_y, c.x, c.y
                );
            }
        }

        Some(Capture {
            index,
            target,
            sample: raw_gaze,
            bounds: self.bounds,
        })
    }

    pub fn samples(&self) -> &[GazePoint] {
        &self.samples
    }

    pub fn bounds(&self) -> Option<&CalibrationBounds> {
        self.bounds.as_ref()
    }

    pub fn is_complete(&self) -> bool {
        self.bounds.is_some()
    }

    pub fn progress(&self) -> Progress {
        Progress {
            index: self.samples.len(),
            total: TARGET_COUNT,
        }
    }

    pub fn current_target(&self) -> Option<CalibrationTarget> {
        CalibrationTarget::ALL.get(self.samples.len()).copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn corners() -> [GazePoint; 4] {
        [
            GazePoint::new(0.42, 0.40),
            GazePoint::new(0.58, 0.41),
            GazePoint::new(0.43, 0.55),
            GazePoint::new(0.57, 0.56),
        ]
    }

    #[test]
    fn walks_targets_in_order_and_freezes_bounds() {
        let mut m = CalibrationManager::new();
        let mut last = None;
        for (i, p) in corners().into_iter().enumerate() {
            assert_eq!(m.current_target(), Some(CalibrationTarget::ALL[i]));
            let c = m.capture(p).unwrap();
            assert_eq!(c.index, i);
            assert_eq!(c.bounds.is_some(), i == 3);
            last = c.bounds;
        }
        let b = last.unwrap();
        assert_eq!(
            b,
            CalibrationBounds {
                min_x: 0.42,
                max_x: 0.58,
                min_y: 0.40,
                max_y: 0.56
            }
        );
        assert_eq!(m.progress(), Progress { index: 4, total: 4 });
        assert_eq!(m.current_target(), None);
    }

    #[test]
    fn fifth_capture_is_refused() {
        let mut m = CalibrationManager::new();
        for p in corners() {
            m.capture(p);
        }
        assert!(m.capture(GazePoint::new(0.9, 0.9)).is_none());
        assert_eq!(m.samples().len(), 4);
        assert_eq!(m.bounds().map(|b| b.max_x), Some(0.58));
    }

    #[test]
    fn bounds_ignore_sample_order() {
        let mut rev = corners();
        rev.reverse();
        assert_eq!(
            CalibrationBounds::from_samples(&corners()),
            CalibrationBounds::from_samples(&rev)
        );
        assert_eq!(CalibrationBounds::from_samples(&[]), None);
    }

    #[test]
    fn reset_is_idempotent() {
        let mut m = CalibrationManager::new();
        m.capture(GazePoint::CENTER);
        m.capture(GazePoint::CENTER);
        m.reset();
        m.reset();
        assert_eq!(m.progress().index, 0);
        assert!(!m.is_complete());
        assert_eq!(m.current_target(), Some(CalibrationTarget::TopLeft));
    }

    #[test]
    fn targets_are_inset_from_corners() {
        let s = Screen::default();
        assert_eq!(
            CalibrationTarget::BottomRight.position(&s),
            GazePoint::new(1820.0, 980.0)
        );
        assert_eq!(CalibrationTarget::TopLeft.position(&s), GazePoint::new(100.0, 100.0));
    }
}

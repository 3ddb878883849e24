//! The live session: one owner for every piece of per-run state, driven by
//! frames, timer ticks and commands, all carrying the caller's clock.

use log::{debug, info};
use serde::Serialize;

use crate::blink::{BlinkDetector, BlinkEvent};
use crate::calibration::{CalibrationBounds, CalibrationManager, CalibrationTarget, Progress};
use crate::config::{Profile, Stages};
use crate::geometry::{GazePoint, Landmark};
use crate::mapper::GazeMapper;
use crate::stage::{Stage, StageSequencer, Transition};
use crate::tracker::Tracker;

/// Requests raised by stage content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// The named stage has finished; stale if it is no longer current.
    StageComplete(Stage),
    ResetCalibration,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    FaceFound,
    FaceLost,
    BlinkStarted,
    BlinkConfirmed {
        duration_s: f32,
    },
    BlinkRejected {
        duration_s: f32,
    },
    CalibrationCaptured {
        index: usize,
        target: CalibrationTarget,
        sample: GazePoint,
    },
    CalibrationComplete {
        bounds: CalibrationBounds,
    },
    CalibrationReset,
    StageChanged {
        from: Stage,
        to: Stage,
    },
}

impl From<Transition> for SessionEvent {
    fn from(t: Transition) -> Self {
        SessionEvent::StageChanged {
            from: t.from,
            to: t.to,
        }
    }
}

/// Everything stage content reads, as of `timestamp_ms`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Snapshot {
    pub timestamp_ms: u64,
    pub face_detected: bool,
    /// Zoomed, mirrored gaze in screen pixels.
    pub raw_gaze_point: GazePoint,
    /// Gaze used for hit testing, in screen pixels.
    pub mapped_gaze_point: GazePoint,
    /// Smoothed eye center, normalized.
    pub normalized_gaze: Option<GazePoint>,
    pub ear: Option<f32>,
    pub blink_active: bool,
    pub blink_duration: f32,
    pub calibration_progress: Progress,
    /// Captured raw gazes in target order.
    pub calibration_samples: Vec<GazePoint>,
    pub calibration_target: Option<CalibrationTarget>,
    pub calibration_target_position: Option<GazePoint>,
    pub calibration_bounds: Option<CalibrationBounds>,
    pub current_stage: Stage,
    pub stage_remaining_s: Option<u64>,
}

#[derive(Debug)]
pub struct Session {
    stages: Stages,
    nighttime_close_s: f32,
    tracker: Tracker,
    blink: BlinkDetector,
    calibration: CalibrationManager,
    mapper: GazeMapper,
    sequencer: StageSequencer,
    face_detected: bool,
    normalized_gaze: Option<GazePoint>,
    ear: Option<f32>,
    raw_point: GazePoint,
    mapped_point: GazePoint,
    last_ms: u64,
}

impl Session {
    pub fn new(profile: &Profile, now_ms: u64) -> Self {
        Self {
            stages: profile.stages.clone(),
            nighttime_close_s: profile.stages.nighttime_close_s,
            tracker: Tracker::new(&profile.tracking, &profile.eyes),
            blink: BlinkDetector::new(&profile.tracking),
            calibration: CalibrationManager::new(),
            mapper: GazeMapper::new(profile.screen.clone()),
            sequencer: StageSequencer::new(now_ms),
            face_detected: false,
            normalized_gaze: None,
            ear: None,
            raw_point: GazePoint::default(),
            mapped_point: GazePoint::default(),
            last_ms: now_ms,
        }
    }

    /// Apply a reloaded profile. Smoothing, blink, calibration and stage
    /// state are kept.
    pub fn reconfigure(&mut self, profile: &Profile) {
        self.stages = profile.stages.clone();
        self.nighttime_close_s = profile.stages.nighttime_close_s;
        self.tracker.reconfigure(&profile.tracking, &profile.eyes);
        self.blink.set_thresholds(&profile.tracking);
        self.mapper.set_screen(profile.screen.clone());
    }

    pub fn stage(&self) -> Stage {
        self.sequencer.current()
    }

    /// True while the current stage runs on a wall-clock limit.
    pub fn stage_is_timed(&self) -> bool {
        self.stage().time_limit_ms(&self.stages).is_some()
    }

    pub fn calibration(&self) -> &CalibrationManager {
        &self.calibration
    }

    /// One full pass over a detector result. `landmarks` is the first face,
    /// if any.
    pub fn process_frame(&mut self, landmarks: Option<&[Landmark]>, now_ms: u64) -> Vec<SessionEvent> {
        self.last_ms = now_ms;
        let mut events = Vec::new();

        let summary = self.tracker.on_frame(landmarks);
        if summary.face_detected != self.face_detected {
            self.face_detected = summary.face_detected;
            events.push(if summary.face_detected {
                SessionEvent::FaceFound
            } else {
                SessionEvent::FaceLost
            });
        }
        if !summary.face_detected {
            return events;
        }
        let (Some(gaze), Some(ear)) = (summary.gaze, summary.ear) else {
            return events;
        };
        self.normalized_gaze = Some(gaze);
        self.ear = Some(ear);

        self.raw_point = self.mapper.zoomed(gaze);
        self.mapped_point = match self.calibration.bounds() {
            Some(b) if self.stage().is_tracking() => self.mapper.calibrated(gaze, b),
            _ => self.raw_point,
        };

        match self.blink.update(ear, now_ms) {
            Some(BlinkEvent::Started) => events.push(SessionEvent::BlinkStarted),
            Some(BlinkEvent::Rejected { duration_s }) => {
                events.push(SessionEvent::BlinkRejected { duration_s })
            }
            Some(BlinkEvent::Confirmed { duration_s }) => {
                events.push(SessionEvent::BlinkConfirmed { duration_s });
                self.on_confirmed_blink(gaze, now_ms, &mut events);
            }
            None => {}
        }

        if self.stage() == Stage::Nighttime
            && self.blink.is_active()
            && self.blink.duration_s() >= self.nighttime_close_s
        {
            info!(
                "eyes closed for {:.1}s during nighttime",
                self.blink.duration_s()
            );
            self.advance_from(Stage::Nighttime, now_ms, &mut events);
        }

        events
    }

    fn on_confirmed_blink(&mut self, gaze: GazePoint, now_ms: u64, events: &mut Vec<SessionEvent>) {
        match self.stage() {
            Stage::Intro if self.face_detected => {
                self.advance_from(Stage::Intro, now_ms, events);
            }
            Stage::Calibration => {
                if self.calibration.is_complete() {
                    debug!("blink ignored: calibration already has all samples");
                    return;
                }
                let Some(cap) = self.calibration.capture(gaze) else {
                    return;
                };
                events.push(SessionEvent::CalibrationCaptured {
                    index: cap.index,
                    target: cap.target,
                    sample: cap.sample,
                });
                if let Some(bounds) = cap.bounds {
                    events.push(SessionEvent::CalibrationComplete { bounds });
                    self.advance_from(Stage::Calibration, now_ms, events);
                }
            }
            _ => {}
        }
    }

    /// Fixed-interval check of wall-clock stage timers.
    pub fn tick(&mut self, now_ms: u64) -> Vec<SessionEvent> {
        self.last_ms = self.last_ms.max(now_ms);
        let mut events = Vec::new();
        if self.sequencer.timer_expired(now_ms, &self.stages) {
            let stage = self.stage();
            info!("{stage} timer expired");
            self.advance_from(stage, now_ms, &mut events);
        }
        events
    }

    pub fn command(&mut self, cmd: Command, now_ms: u64) -> Vec<SessionEvent> {
        self.last_ms = self.last_ms.max(now_ms);
        let mut events = Vec::new();
        match cmd {
            Command::StageComplete(stage) if stage.completes_externally() => {
                self.advance_from(stage, now_ms, &mut events);
            }
            Command::StageComplete(stage) => {
                debug!("{stage} cannot be completed externally");
            }
            Command::ResetCalibration => {
                info!("resetting calibration");
                self.calibration.reset();
                self.blink.force_open();
                events.push(SessionEvent::CalibrationReset);
                if self.stage() != Stage::Calibration {
                    let t = self.sequencer.enter(Stage::Calibration, now_ms);
                    events.push(t.into());
                }
            }
        }
        events
    }

    fn advance_from(&mut self, stage: Stage, now_ms: u64, events: &mut Vec<SessionEvent>) {
        let Some(t) = self.sequencer.advance_from(stage, now_ms) else {
            return;
        };
        match t.to {
            Stage::Calibration => {
                // the wink that left the intro must not count here
                self.calibration.reset();
                self.blink.force_open();
            }
            Stage::Intro => {
                self.calibration.reset();
                events.push(SessionEvent::CalibrationReset);
            }
            _ => {}
        }
        events.push(t.into());
    }

    pub fn snapshot(&self) -> Snapshot {
        let now = self.last_ms;
        let target = match self.stage() {
            Stage::Calibration => self.calibration.current_target(),
            _ => None,
        };
        Snapshot {
            timestamp_ms: now,
            face_detected: self.face_detected,
            raw_gaze_point: self.raw_point,
            mapped_gaze_point: self.mapped_point,
            normalized_gaze: self.normalized_gaze,
            ear: self.ear,
            blink_active: self.blink.is_active(),
            blink_duration: self.blink.duration_s(),
            calibration_progress: self.calibration.progress(),
            calibration_samples: self.calibration.samples().to_vec(),
            calibration_target: target,
            calibration_target_position: target.map(|t| t.position(self.mapper.screen())),
            calibration_bounds: self.calibration.bounds().copied(),
            current_stage: self.stage(),
            stage_remaining_s: self
                .sequencer
                .remaining_ms(now, &self.stages)
                .map(|ms| ms.div_ceil(1000)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::tests::face;

    const OPEN: f32 = 0.3;
    const SHUT: f32 = 0.0;
    const STEP: u64 = 20;

    struct Rig {
        s: Session,
        t: u64,
        events: Vec<SessionEvent>,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                s: Session::new(&Profile::default(), 0),
                t: 0,
                events: Vec::new(),
            }
        }

        fn frame(&mut self, gaze: GazePoint, ear: f32) {
            let lms = face(gaze, ear);
            let evs = self.s.process_frame(Some(&lms), self.t);
            self.events.extend(evs);
            self.t += STEP;
        }

        /// Settle on `gaze` with eyes open long enough for the EMA to converge.
        fn look(&mut self, gaze: GazePoint) {
            for _ in 0..60 {
                self.frame(gaze, OPEN);
            }
        }

        /// Close for `closed_ms` of raw frames, then reopen.
        fn wink(&mut self, gaze: GazePoint, closed_ms: u64) {
            let start = self.t;
            while self.t < start + closed_ms {
                self.frame(gaze, SHUT);
            }
            for _ in 0..10 {
                self.frame(gaze, OPEN);
            }
        }

        fn confirmed(&self) -> usize {
            self.events
                .iter()
                .filter(|e| matches!(e, SessionEvent::BlinkConfirmed { .. }))
                .count()
        }

        fn stage_changes(&self) -> Vec<(Stage, Stage)> {
            self.events
                .iter()
                .filter_map(|e| match e {
                    SessionEvent::StageChanged { from, to } => Some((*from, *to)),
                    _ => None,
                })
                .collect()
        }

        fn to_calibration(&mut self) {
            self.look(GazePoint::CENTER);
            self.wink(GazePoint::CENTER, 200);
            assert_eq!(self.s.stage(), Stage::Calibration);
            self.events.clear();
        }
    }

    fn corners() -> [GazePoint; 4] {
        [
            GazePoint::new(0.45, 0.42),
            GazePoint::new(0.55, 0.43),
            GazePoint::new(0.46, 0.52),
            GazePoint::new(0.56, 0.53),
        ]
    }

    #[test]
    fn intro_needs_a_confirmed_wink() {
        let mut r = Rig::new();
        r.look(GazePoint::CENTER);
        r.wink(GazePoint::CENTER, 30);
        assert_eq!(r.s.stage(), Stage::Intro);
        r.wink(GazePoint::CENTER, 200);
        assert_eq!(r.s.stage(), Stage::Calibration);
        assert_eq!(r.stage_changes(), vec![(Stage::Intro, Stage::Calibration)]);
    }

    #[test]
    fn no_face_never_progresses() {
        let mut r = Rig::new();
        for i in 0..100 {
            r.s.process_frame(None, i * STEP);
        }
        assert_eq!(r.s.stage(), Stage::Intro);
        assert!(!r.s.snapshot().face_detected);
    }

    #[test]
    fn full_calibration_cycle() {
        let mut r = Rig::new();
        r.to_calibration();

        for p in corners() {
            r.look(p);
            r.wink(p, 200);
        }

        assert_eq!(r.s.stage(), Stage::Morning);
        assert_eq!(r.confirmed(), 4);
        assert_eq!(r.stage_changes(), vec![(Stage::Calibration, Stage::Morning)]);
        let completes = r
            .events
            .iter()
            .filter(|e| matches!(e, SessionEvent::CalibrationComplete { .. }))
            .count();
        assert_eq!(completes, 1);

        let b = *r.s.calibration().bounds().unwrap();
        assert!((b.min_x - 0.45).abs() < 1e-4);
        assert!((b.max_x - 0.56).abs() < 1e-4);
        assert!((b.min_y - 0.42).abs() < 1e-4);
        assert!((b.max_y - 0.53).abs() < 1e-4);

        // calibrated mapping is live in morning
        r.look(b.center());
        let snap = r.s.snapshot();
        assert!((snap.mapped_gaze_point.x - 960.0).abs() < 0.5);
        assert!((snap.mapped_gaze_point.y - 540.0).abs() < 0.5);
        assert!(snap.stage_remaining_s.is_some());
    }

    #[test]
    fn jitter_is_rejected() {
        let mut r = Rig::new();
        r.to_calibration();
        r.look(corners()[0]);
        r.wink(corners()[0], 30);
        assert_eq!(r.confirmed(), 0);
        assert!(r
            .events
            .iter()
            .any(|e| matches!(e, SessionEvent::BlinkRejected { .. })));
        assert_eq!(r.s.calibration().progress().index, 0);
    }

    #[test]
    fn reset_after_partial_calibration() {
        let mut r = Rig::new();
        r.to_calibration();
        for p in &corners()[..2] {
            r.look(*p);
            r.wink(*p, 200);
        }
        assert_eq!(r.s.calibration().progress().index, 2);

        r.s.command(Command::ResetCalibration, r.t);
        assert_eq!(r.s.calibration().progress().index, 0);
        assert_eq!(r.s.stage(), Stage::Calibration);
        // twice is the same as once
        r.s.command(Command::ResetCalibration, r.t);
        assert_eq!(r.s.calibration().progress().index, 0);
        assert_eq!(r.s.stage(), Stage::Calibration);
    }

    #[test]
    fn reset_from_nighttime_returns_to_calibration() {
        let mut r = Rig::new();
        r.s.sequencer.enter(Stage::Nighttime, 0);
        let evs = r.s.command(Command::ResetCalibration, 10);
        assert!(evs.contains(&SessionEvent::StageChanged {
            from: Stage::Nighttime,
            to: Stage::Calibration
        }));
        assert_eq!(r.s.stage(), Stage::Calibration);
    }

    #[test]
    fn timed_stages_advance_once() {
        let mut r = Rig::new();
        r.s.sequencer.enter(Stage::Morning, 1_000);
        assert!(r.s.tick(75_999).is_empty());
        let evs = r.s.tick(76_000);
        assert_eq!(
            evs,
            vec![SessionEvent::StageChanged {
                from: Stage::Morning,
                to: Stage::Maze
            }]
        );
        // a late completion signal from morning content is stale
        assert!(r.s.command(Command::StageComplete(Stage::Morning), 76_050).is_empty());
        assert_eq!(r.s.stage(), Stage::Maze);
    }

    #[test]
    fn oversized_stage_length_never_expires() {
        let p = crate::config::parse_profile("[stages]\nmorning_s = 9000000000000000000\n").unwrap();
        let mut s = Session::new(&p, 0);
        s.sequencer.enter(Stage::Morning, 0);
        assert!(s.tick(10).is_empty());
        assert_eq!(s.stage(), Stage::Morning);
        assert!(s.snapshot().stage_remaining_s.is_some());
    }

    #[test]
    fn calibration_cannot_be_skipped_by_command() {
        let mut r = Rig::new();
        r.to_calibration();
        assert!(r.s.command(Command::StageComplete(Stage::Calibration), r.t).is_empty());
        assert!(r.s.command(Command::StageComplete(Stage::Intro), r.t).is_empty());
        assert_eq!(r.s.stage(), Stage::Calibration);
    }

    #[test]
    fn sustained_closure_ends_nighttime() {
        let mut r = Rig::new();
        r.look(GazePoint::CENTER);
        r.s.sequencer.enter(Stage::Nighttime, r.t);
        r.events.clear();
        let start = r.t;
        while r.t < start + 3_000 {
            r.frame(GazePoint::CENTER, SHUT);
        }
        assert_eq!(r.s.stage(), Stage::Nighttime);
        assert!(r.s.snapshot().blink_active);
        while r.t < start + 4_200 {
            r.frame(GazePoint::CENTER, SHUT);
        }
        assert_eq!(r.s.stage(), Stage::Outro);
        assert_eq!(r.stage_changes(), vec![(Stage::Nighttime, Stage::Outro)]);
    }

    #[test]
    fn outro_completion_clears_the_cycle() {
        let mut r = Rig::new();
        r.to_calibration();
        for p in corners() {
            r.look(p);
            r.wink(p, 200);
        }
        for st in [Stage::Morning, Stage::Maze, Stage::Test, Stage::Nighttime, Stage::Outro] {
            r.s.command(Command::StageComplete(st), r.t);
        }
        assert_eq!(r.s.stage(), Stage::Intro);
        assert!(!r.s.calibration().is_complete());
        assert_eq!(r.s.calibration().progress().index, 0);
        // a wink after the loop starts a fresh calibration
        r.wink(GazePoint::CENTER, 200);
        assert_eq!(r.s.stage(), Stage::Calibration);
    }

    #[test]
    fn blink_in_tracking_stage_captures_nothing() {
        let mut r = Rig::new();
        r.to_calibration();
        for p in corners() {
            r.look(p);
            r.wink(p, 200);
        }
        r.wink(GazePoint::CENTER, 200);
        assert_eq!(r.s.calibration().samples().len(), 4);
        assert_eq!(r.s.stage(), Stage::Morning);
    }

    #[test]
    fn mapped_equals_raw_before_calibration() {
        let mut r = Rig::new();
        r.look(GazePoint::new(0.52, 0.48));
        let snap = r.s.snapshot();
        assert_eq!(snap.mapped_gaze_point, snap.raw_gaze_point);
        assert_eq!(snap.calibration_target, None);
    }
}

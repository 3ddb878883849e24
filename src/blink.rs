use log::debug;

use crate::config::Tracking;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BlinkEvent {
    /// Eyes just went below the threshold. Raised immediately for feedback.
    Started,
    /// Eyes reopened after a closure at least the minimum duration long.
    Confirmed { duration_s: f32 },
    /// Eyes reopened too soon; treated as noise.
    Rejected { duration_s: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
enum BlinkState {
    #[default]
    Open,
    Closed,
}

#[derive(Debug)]
pub struct BlinkDetector {
    threshold: f32,
    min_duration_s: f32,
    state: BlinkState,
    start_ms: Option<u64>,
    duration_s: f32,
}

impl BlinkDetector {
    pub fn new(th: &Tracking) -> Self {
        Self {
            threshold: th.blink_threshold,
            min_duration_s: th.min_blink_duration_s,
            state: BlinkState::Open,
            start_ms: None,
            duration_s: 0.0,
        }
    }

    pub fn set_thresholds(&mut self, th: &Tracking) {
        self.threshold = th.blink_threshold;
        self.min_duration_s = th.min_blink_duration_s;
    }

    /// True while the eyes are closed, confirmed or not.
    pub fn is_active(&self) -> bool {
        self.state == BlinkState::Closed
    }

    /// Seconds the current closure has lasted; 0 while open.
    pub fn duration_s(&self) -> f32 {
        self.duration_s
    }

    /// Drop any closure in progress without emitting anything.
    pub fn force_open(&mut self) {
        self.state = BlinkState::Open;
        self.start_ms = None;
        self.duration_s = 0.0;
    }

    pub fn update(&mut self, ear: f32, now_ms: u64) -> Option<BlinkEvent> {
        let closed = ear < self.threshold;
        match self.state {
            BlinkState::Open => {
                if closed {
                    self.state = BlinkState::Closed;
                    self.start_ms = Some(now_ms);
                    self.duration_s = 0.0;
                    return Some(BlinkEvent::Started);
                }
                None
            }
            BlinkState::Closed => {
                let start = self.start_ms.unwrap_or(now_ms);
                let elapsed_s = now_ms.saturating_sub(start) as f32 / 1000.0;
                if closed {
                    self.duration_s = elapsed_s;
                    return None;
                }

                self.force_open();
                if elapsed_s >= self.min_duration_s {
                    debug!("blink confirmed after {elapsed_s:.3}s");
                    Some(BlinkEvent::Confirmed { duration_s: elapsed_s })
                } else {
                    debug!("blink rejected after {elapsed_s:.3}s");
                    Some(BlinkEvent::Rejected { duration_s: elapsed_s })
                }
            }
        }
    }
}

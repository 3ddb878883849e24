//! Per-frame landmark reduction and smoothing.

use crate::config::{Eyes, Tracking};
use crate::geometry::{self, GazePoint, Landmark};
use crate::smoothing::Ema;

#[derive(Debug, Clone, PartialEq)]
pub struct FrameSummary {
    pub face_detected: bool,
    /// Smoothed left-eye center, normalized. Last known value when the face
    /// is lost; `None` before the first face.
    pub gaze: Option<GazePoint>,
    /// Smoothed min(left, right) EAR, same retention as `gaze`.
    pub ear: Option<f32>,
}

#[derive(Debug)]
pub struct Tracker {
    eyes: Eyes,
    min_landmarks: usize,
    gaze: Ema<GazePoint>,
    ear: Ema<f32>,
}

impl Tracker {
    pub fn new(th: &Tracking, eyes: &Eyes) -> Self {
        Self {
            eyes: eyes.clone(),
            min_landmarks: th.min_landmarks,
            gaze: Ema::new(th.ema_alpha),
            ear: Ema::new(th.ema_alpha),
        }
    }

    /// Swap thresholds in place. Smoothing state carries over.
    pub fn reconfigure(&mut self, th: &Tracking, eyes: &Eyes) {
        self.eyes = eyes.clone();
        self.min_landmarks = th.min_landmarks;
        self.gaze.set_alpha(th.ema_alpha);
        self.ear.set_alpha(th.ema_alpha);
    }

    pub fn on_frame(&mut self, landmarks: Option<&[Landmark]>) -> FrameSummary {
        let face = landmarks.filter(|l| l.len() >= self.min_landmarks);
        let Some(lms) = face else {
            return FrameSummary {
                face_detected: false,
                gaze: self.gaze.value(),
                ear: self.ear.value(),
            };
        };

        let center = geometry::eye_center(lms, &self.eyes.left);
        let left = geometry::ear(lms, &self.eyes.left);
        let right = geometry::ear(lms, &self.eyes.right);

        FrameSummary {
            face_detected: true,
            gaze: Some(self.gaze.update(center)),
            ear: Some(self.ear.update(left.min(right))),
        }
    }
}

//! Exponential moving average over scalars and gaze points.

use crate::geometry::GazePoint;

/// Values the EMA can blend.
pub trait Blend: Copy {
    fn blend(self, prev: Self, alpha: f32) -> Self;
}

impl Blend for f32 {
    fn blend(self, prev: Self, alpha: f32) -> Self {
        alpha * self + (1.0 - alpha) * prev
    }
}

impl Blend for GazePoint {
    fn blend(self, prev: Self, alpha: f32) -> Self {
        GazePoint {
            x: self.x.blend(prev.x, alpha),
            y: self.y.blend(prev.y, alpha),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Ema<T> {
    alpha: f32,
    value: Option<T>,
}

impl<T: Blend> Ema<T> {
    pub fn new(alpha: f32) -> Self {
        Self { alpha, value: None }
    }

    /// Feed one sample and return the smoothed value. The first sample is
    /// taken as-is.
    pub fn update(&mut self, sample: T) -> T {
        let next = match self.value {
            Some(prev) => sample.blend(prev, self.alpha),
            None => sample,
        };
        self.value = Some(next);
        next
    }

    pub fn value(&self) -> Option<T> {
        self.value
    }

    pub fn set_alpha(&mut self, alpha: f32) {
        self.alpha = alpha;
    }
}

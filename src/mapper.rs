//! Normalized gaze to screen pixels.

use crate::calibration::CalibrationBounds;
use crate::config::Screen;
use crate::geometry::GazePoint;

/// Linear map of `value` from `[from_min, from_max]` to `[to_min, to_max]`,
/// clamping the input to the source range first. `None` when the source
/// range is empty.
pub fn interpolate(value: f32, from_min: f32, from_max: f32, to_min: f32, to_max: f32) -> Option<f32> {
    let span = from_max - from_min;
    if !(span.abs() > f32::EPSILON) {
        return None;
    }
    let clamped = value.max(from_min.min(from_max)).min(from_max.max(from_min));
    let ratio = (clamped - from_min) / span;
    Some(to_min + ratio * (to_max - to_min))
}

#[derive(Debug, Clone)]
pub struct GazeMapper {
    screen: Screen,
}

impl GazeMapper {
    pub fn new(screen: Screen) -> Self {
        Self { screen }
    }

    pub fn screen(&self) -> &Screen {
        &self.screen
    }

    pub fn set_screen(&mut self, screen: Screen) {
        self.screen = screen;
    }

    /// Exaggerated projection used before bounds exist. Mirrors the camera
    /// view, then stretches around the center by the zoom factor.
    pub fn zoomed(&self, raw: GazePoint) -> GazePoint {
        let stretch = |v: f32| (0.5 + (v - 0.5) * self.screen.zoom).clamp(0.0, 1.0);
        GazePoint::new(
            stretch(1.0 - raw.x) * self.screen.width,
            stretch(raw.y) * self.screen.height,
        )
    }

    /// Bounds-based projection onto the padded screen, mirrored on X.
    /// An axis with no extent maps to the padding coordinate.
    pub fn calibrated(&self, raw: GazePoint, bounds: &CalibrationBounds) -> GazePoint {
        let Screen {
            width,
            height,
            padding,
            ..
        } = self.screen;

        let x = match interpolate(raw.x, bounds.min_x, bounds.max_x, padding, width - padding) {
            Some(x) => width - x.clamp(0.0, width),
            None => padding,
        };
        let y = match interpolate(raw.y, bounds.min_y, bounds.max_y, padding, height - padding) {
            Some(y) => y.clamp(0.0, height),
            None => padding,
        };
        GazePoint::new(x, y)
    }
}

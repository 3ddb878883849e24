//! Eye geometry over a face landmark set.

use serde::{Deserialize, Serialize};

/// EAR reported when an eye cannot be measured. Reads as "probably open",
/// so a bad frame never starts a blink.
pub const NEUTRAL_EAR: f32 = 0.3;

/// One normalized detector landmark. `z` is carried but unused.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

/// A point in either normalized landmark space or screen pixels.
/// Which one is always stated by the field or function that holds it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GazePoint {
    pub x: f32,
    pub y: f32,
}

impl GazePoint {
    pub const CENTER: GazePoint = GazePoint { x: 0.5, y: 0.5 };

    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

fn dist(a: &Landmark, b: &Landmark) -> f32 {
    let dx = a.x - b.x;
    let dy = a.y - b.y;
    (dx * dx + dy * dy).sqrt()
}

/// Mean position of the landmarks at `indices`. Indices past the end of the
/// set are skipped; with nothing left the normalized center is returned.
pub fn eye_center(landmarks: &[Landmark], indices: &[usize]) -> GazePoint {
    let present: Vec<&Landmark> = indices.iter().filter_map(|&i| landmarks.get(i)).collect();
    if present.is_empty() {
        return GazePoint::CENTER;
    }
    let n = present.len() as f32;
    let sumx: f32 = present.iter().map(|p| p.x).sum();
    let sumy: f32 = present.iter().map(|p| p.y).sum();
    GazePoint::new(sumx / n, sumy / n)
}

/// Eye aspect ratio of the hexagon `p0..p5` (corner, two upper lid points,
/// corner, two lower lid points).
pub fn ear(landmarks: &[Landmark], indices: &[usize; 6]) -> f32 {
    let mut p = [Landmark::default(); 6];
    for (slot, &i) in p.iter_mut().zip(indices) {
        match landmarks.get(i) {
            Some(lm) => *slot = *lm,
            None => return NEUTRAL_EAR,
        }
    }

    let a = dist(&p[1], &p[5]);
    let b = dist(&p[2], &p[4]);
    let c = dist(&p[0], &p[3]);
    if c == 0.0 {
        return NEUTRAL_EAR;
    }
    (a + b) / (2.0 * c)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub const LEFT: [usize; 6] = [33, 160, 158, 133, 153, 144];
    pub const RIGHT: [usize; 6] = [362, 385, 387, 263, 373, 380];

    /// Full 468-point face with both eyes open around `gaze` and lids set so
    /// that EAR equals `ear_value` on both eyes.
    pub fn face(gaze: GazePoint, ear_value: f32) -> Vec<Landmark> {
        let mut lms = vec![Landmark { x: 0.5, y: 0.5, z: 0.0 }; 468];
        for eye in [LEFT, RIGHT] {
            place_eye(&mut lms, &eye, gaze, ear_value);
        }
        lms
    }

    // Width 0.04, lids symmetric, so the mean of the six points is `c`.
    fn place_eye(lms: &mut [Landmark], idx: &[usize; 6], c: GazePoint, ear_value: f32) {
        let half_w = 0.02;
        let half_h = ear_value * (2.0 * half_w) / 2.0;
        let at = |dx: f32, dy: f32| Landmark { x: c.x + dx, y: c.y + dy, z: 0.0 };
        lms[idx[0]] = at(-half_w, 0.0);
        lms[idx[1]] = at(-half_w / 2.0, -half_h);
        lms[idx[2]] = at(half_w / 2.0, -half_h);
        lms[idx[3]] = at(half_w, 0.0);
        lms[idx[4]] = at(half_w / 2.0, half_h);
        lms[idx[5]] = at(-half_w / 2.0, half_h);
    }

    #[test]
    fn ear_of_synthetic_eye() {
        let lms = face(GazePoint::new(0.4, 0.6), 0.25);
        assert!((ear(&lms, &LEFT) - 0.25).abs() < 1e-4);
        assert!((ear(&lms, &RIGHT) - 0.25).abs() < 1e-4);
    }

    #[test]
    fn ear_falls_back_on_missing_index() {
        let lms = vec![Landmark::default(); 100];
        assert_eq!(ear(&lms, &LEFT), NEUTRAL_EAR);
    }

    #[test]
    fn ear_falls_back_on_zero_width() {
        let lms = vec![Landmark { x: 0.2, y: 0.2, z: 0.0 }; 468];
        assert_eq!(ear(&lms, &LEFT), NEUTRAL_EAR);
    }

    #[test]
    fn eye_center_averages_present_points() {
        let lms = face(GazePoint::new(0.3, 0.7), 0.3);
        let c = eye_center(&lms, &LEFT);
        assert!((c.x - 0.3).abs() < 1e-5);
        assert!((c.y - 0.7).abs() < 1e-5);
    }

    #[test]
    fn eye_center_skips_missing_and_defaults_to_center() {
        let lms = vec![
            Landmark { x: 0.1, y: 0.2, z: 0.0 },
            Landmark { x: 0.3, y: 0.4, z: 0.0 },
        ];
        let c = eye_center(&lms, &[0, 1, 500]);
        assert!((c.x - 0.2).abs() < 1e-6);
        assert!((c.y - 0.3).abs() < 1e-6);
        assert_eq!(eye_center(&[], &LEFT), GazePoint::CENTER);
    }
}

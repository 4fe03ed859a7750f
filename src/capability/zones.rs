//! Polygonal regions of interest.
//!
//! Zones are expressed in pixel coordinates of the camera's decoded frame.
//! Membership is tested against a single point (usually the bottom-center of
//! a detection box) with standard ray casting.

use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Zone {
    pub name: String,
    /// Polygon vertices as `[x, y]` pairs, in order. Closing edge is implied.
    pub points: Vec<[f32; 2]>,
}

impl Zone {
    pub fn new(name: impl Into<String>, points: Vec<[f32; 2]>) -> Self {
        Self {
            name: name.into(),
            points,
        }
    }

    /// Ray-casting point-in-polygon test. Degenerate zones with fewer than
    /// three vertices contain nothing.
    pub fn contains(&self, x: f32, y: f32) -> bool {
        if self.points.len() < 3 {
            return false;
        }
        let mut inside = false;
        let mut j = self.points.len() - 1;
        for i in 0..self.points.len() {
            let [xi, yi] = self.points[i];
            let [xj, yj] = self.points[j];
            if ((yi > y) != (yj > y)) && (x < (xj - xi) * (y - yi) / (yj - yi) + xi) {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

/// True when any zone in the slice contains the point. An empty slice means
/// the whole frame is of interest, so the point always matches.
pub fn any_zone_contains(zones: &[Zone], x: f32, y: f32) -> bool {
    if zones.is_empty() {
        return true;
    }
    zones.iter().any(|z| z.contains(x, y))
}

// Joint angle geometry

use serde::{Deserialize, Serialize};

/// A point in pixel space
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f64,
    pub y: f64,
}

impl Point2 {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    fn sub(self, other: Point2) -> Point2 {
        Point2::new(self.x - other.x, self.y - other.y)
    }

    fn dot(self, other: Point2) -> f64 {
        self.x * other.x + self.y * other.y
    }

    fn norm(self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// One of the rays meeting at the vertex has zero length
#[derive(Debug, Clone, Copy, PartialEq, thiserror::Error)]
#[error("Degenerate joint geometry: zero-length segment at vertex ({x}, {y})")]
pub struct DegenerateGeometry {
    pub x: f64,
    pub y: f64,
}

/// Angle in degrees at vertex `b` between rays `b→a` and `b→c`
///
/// For an arm, `a` is the shoulder, `b` the elbow and `c` the wrist. The
/// result lies in [0, 180].
pub fn joint_angle(a: Point2, b: Point2, c: Point2) -> Result<f64, DegenerateGeometry> {
    let ba = a.sub(b);
    let bc = c.sub(b);

    let denom = ba.norm() * bc.norm();
    if !(denom.is_finite() && denom > 0.0) {
        return Err(DegenerateGeometry { x: b.x, y: b.y });
    }

    // Rounding can push the cosine just past ±1
    let cosine = (ba.dot(bc) / denom).clamp(-1.0, 1.0);
    Ok(cosine.acos().to_degrees())
}

//! Planar geometry primitives shared across the engraving pipeline.
//!
//! Everything here is expressed in millimetres in double precision. The
//! crate is intentionally dependency-free: the arc fitter (`arc`) and the
//! rectangle/point types below are pure math consumed by the compiler and
//! the layout allocator.
//!
//! Invariants:
//! * `Rect` width/height are non-negative by construction at call sites;
//!   degenerate (zero-area) rectangles are representable and overlap nothing.
//! * All comparisons use explicit epsilons owned by the caller; no global
//!   tolerance is baked into the primitives.

pub mod arc;

/// A point in the XY plane, millimetres.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    pub fn distance(&self, other: Point) -> f64 {
        (other.x - self.x).hypot(other.y - self.y)
    }

    /// Component-wise midpoint.
    pub fn midpoint(&self, other: Point) -> Point {
        Point::new((self.x + other.x) * 0.5, (self.y + other.y) * 0.5)
    }
}

/// Axis-aligned rectangle, origin at the lower-left corner.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Rect {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

impl Rect {
    pub const fn new(x: f64, y: f64, w: f64, h: f64) -> Self {
        Self { x, y, w, h }
    }

    /// AABB overlap test with both rectangles inflated by `pad` on every side.
    ///
    /// Touching edges (separation exactly `pad`) count as free.
    pub fn overlaps_padded(&self, other: &Rect, pad: f64) -> bool {
        !(self.x + self.w + pad <= other.x
            || self.x - pad >= other.x + other.w
            || self.y + self.h + pad <= other.y
            || self.y - pad >= other.y + other.h)
    }
}

/// 2-D cross product of vectors (o→a) and (o→b).
///
/// Positive when `b` lies counter-clockwise of `a` around `o`.
pub fn cross2d(o: Point, a: Point, b: Point) -> f64 {
    (a.x - o.x) * (b.y - o.y) - (a.y - o.y) * (b.x - o.x)
}

/// Circumcenter of the triangle `(a, b, c)`, or `None` when the points are
/// collinear and no unique circle exists.
pub fn circumcenter(a: Point, b: Point, c: Point) -> Option<Point> {
    let d = 2.0 * (a.x * (b.y - c.y) + b.x * (c.y - a.y) + c.x * (a.y - b.y));
    if d.abs() < 1e-10 {
        return None;
    }
    let a2 = a.x * a.x + a.y * a.y;
    let b2 = b.x * b.x + b.y * b.y;
    let c2 = c.x * c.x + c.y * c.y;
    let ux = (a2 * (b.y - c.y) + b2 * (c.y - a.y) + c2 * (a.y - b.y)) / d;
    let uy = (a2 * (c.x - b.x) + b2 * (a.x - c.x) + c2 * (b.x - a.x)) / d;
    Some(Point::new(ux, uy))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn distance_and_midpoint() {
        let a = Point::new(0.0, 0.0);
        let b = Point::new(3.0, 4.0);
        assert!((a.distance(b) - 5.0).abs() < 1e-12);
        let m = a.midpoint(b);
        assert!((m.x - 1.5).abs() < 1e-12 && (m.y - 2.0).abs() < 1e-12);
    }

    #[test]
    fn circumcenter_of_right_triangle_is_hypotenuse_midpoint() {
        let c = circumcenter(
            Point::new(0.0, 0.0),
            Point::new(4.0, 0.0),
            Point::new(0.0, 3.0),
        )
        .unwrap();
        assert!((c.x - 2.0).abs() < 1e-9);
        assert!((c.y - 1.5).abs() < 1e-9);
    }

    #[test]
    fn circumcenter_rejects_collinear_points() {
        let c = circumcenter(
            Point::new(0.0, 0.0),
            Point::new(1.0, 1.0),
            Point::new(2.0, 2.0),
        );
        assert!(c.is_none());
    }

    #[test]
    fn padded_overlap_honors_gap() {
        let a = Rect::new(0.0, 0.0, 10.0, 10.0);
        let clear = Rect::new(11.5, 0.0, 5.0, 5.0); // separation exactly 1.5
        let close = Rect::new(11.0, 0.0, 5.0, 5.0);
        assert!(!a.overlaps_padded(&clear, 1.5));
        assert!(a.overlaps_padded(&close, 1.5));
    }
}

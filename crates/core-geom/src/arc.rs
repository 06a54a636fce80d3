//! Bézier → circular-arc fitting for GRBL-style motion programs.
//!
//! A cubic or quadratic Bézier segment is reduced to a single `G2`/`G3`
//! arc when the chordal error at the curve midpoint stays within
//! [`MAX_ARC_ERR_MM`], to a straight `G1` when the triple is collinear or
//! the fitted circle degenerates below [`MIN_RADIUS_MM`], and otherwise
//! split at `t = 0.5` with De Casteljau and fitted recursively.
//!
//! Both tolerances are contractual: changing them changes the emitted
//! program byte-for-byte. All intermediate math stays in `f64`; output
//! coordinates are formatted with three decimals, arc centers as signed
//! `I`/`J` offsets from the segment start.

use crate::{Point, circumcenter, cross2d};

/// Radius floor below which a fitted circle is treated as degenerate.
pub const MIN_RADIUS_MM: f64 = 0.05;

/// Maximum allowed distance between the true curve midpoint and the
/// fitted circle before the segment is subdivided.
pub const MAX_ARC_ERR_MM: f64 = 0.08;

/// Segments shorter than this emit nothing at all.
const DEGENERATE_SPAN_MM: f64 = 1e-6;

fn line_cmd(to: Point, feed: u32) -> String {
    format!("G1 X{:.3} Y{:.3} F{}", to.x, to.y, feed)
}

fn arc_cmd(start: Point, end: Point, center: Point, ccw: bool, feed: u32) -> String {
    let i = center.x - start.x;
    let j = center.y - start.y;
    let word = if ccw { "G3" } else { "G2" };
    format!("{} X{:.3} Y{:.3} I{:.3} J{:.3} F{}", word, end.x, end.y, i, j, feed)
}

/// Point on a quadratic Bézier at parameter `t`.
pub fn quad_point(p0: Point, cp: Point, p1: Point, t: f64) -> Point {
    let mt = 1.0 - t;
    Point::new(
        mt * mt * p0.x + 2.0 * mt * t * cp.x + t * t * p1.x,
        mt * mt * p0.y + 2.0 * mt * t * cp.y + t * t * p1.y,
    )
}

/// Point on a cubic Bézier at parameter `t`.
pub fn cubic_point(p0: Point, p1: Point, p2: Point, p3: Point, t: f64) -> Point {
    let mt = 1.0 - t;
    let (mt2, t2) = (mt * mt, t * t);
    Point::new(
        mt2 * mt * p0.x + 3.0 * mt2 * t * p1.x + 3.0 * mt * t2 * p2.x + t2 * t * p3.x,
        mt2 * mt * p0.y + 3.0 * mt2 * t * p1.y + 3.0 * mt * t2 * p2.y + t2 * t * p3.y,
    )
}

/// Shared tail of the quad/cubic fitters once the curve midpoint and
/// quarter points are known.
///
/// The candidate circle passes through `p0`, `mid` and `p3` by
/// construction, so the residual is measured where the curve can actually
/// escape it: the quarter points `q1` (t = 0.25) and `q3` (t = 0.75).
/// Returns `false` when the caller must subdivide.
fn fit_through_midpoint(
    p0: Point,
    mid: Point,
    q1: Point,
    q3: Point,
    p3: Point,
    feed: u32,
    out: &mut Vec<String>,
) -> bool {
    let Some(center) = circumcenter(p0, mid, p3) else {
        out.push(line_cmd(p3, feed));
        return true;
    };

    let radius = p0.distance(center);
    if radius < MIN_RADIUS_MM {
        out.push(line_cmd(p3, feed));
        return true;
    }

    let err = (q1.distance(center) - radius)
        .abs()
        .max((q3.distance(center) - radius).abs());
    if err > MAX_ARC_ERR_MM {
        return false; // caller subdivides
    }

    let ccw = cross2d(p0, mid, p3) > 0.0;
    out.push(arc_cmd(p0, p3, center, ccw, feed));
    true
}

/// Fit a quadratic Bézier (machine coordinates) into `out`.
pub fn fit_quadratic(p0: Point, cp: Point, p3: Point, feed: u32, out: &mut Vec<String>) {
    if p0.distance(p3) < DEGENERATE_SPAN_MM {
        return;
    }

    let mid = quad_point(p0, cp, p3, 0.5);
    let q1 = quad_point(p0, cp, p3, 0.25);
    let q3 = quad_point(p0, cp, p3, 0.75);
    if fit_through_midpoint(p0, mid, q1, q3, p3, feed, out) {
        return;
    }

    // De Casteljau split of the quadratic at t = 0.5.
    let cp1 = p0.midpoint(cp);
    let cp2 = cp.midpoint(p3);
    let split = cp1.midpoint(cp2);
    fit_quadratic(p0, cp1, split, feed, out);
    fit_quadratic(split, cp2, p3, feed, out);
}

/// Fit a cubic Bézier (machine coordinates) into `out`.
pub fn fit_cubic(p0: Point, p1: Point, p2: Point, p3: Point, feed: u32, out: &mut Vec<String>) {
    if p0.distance(p3) < DEGENERATE_SPAN_MM {
        return;
    }

    let mid = cubic_point(p0, p1, p2, p3, 0.5);
    let q1 = cubic_point(p0, p1, p2, p3, 0.25);
    let q3 = cubic_point(p0, p1, p2, p3, 0.75);
    if fit_through_midpoint(p0, mid, q1, q3, p3, feed, out) {
        return;
    }

    // De Casteljau split of the cubic at t = 0.5.
    let q1 = p0.midpoint(p1);
    let r1 = p1.midpoint(p2);
    let r2 = p2.midpoint(p3);
    let q2 = q1.midpoint(r1);
    let r0 = r1.midpoint(r2);
    let split = q2.midpoint(r0);
    fit_cubic(p0, q1, q2, split, feed, out);
    fit_cubic(split, r0, r2, p3, feed, out);
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_xy(line: &str) -> (f64, f64) {
        let mut x = f64::NAN;
        let mut y = f64::NAN;
        for word in line.split_whitespace() {
            if let Some(v) = word.strip_prefix('X') {
                x = v.parse().unwrap();
            } else if let Some(v) = word.strip_prefix('Y') {
                y = v.parse().unwrap();
            }
        }
        (x, y)
    }

    fn parse_ij(line: &str) -> (f64, f64) {
        let mut i = f64::NAN;
        let mut j = f64::NAN;
        for word in line.split_whitespace() {
            if let Some(v) = word.strip_prefix('I') {
                i = v.parse().unwrap();
            } else if let Some(v) = word.strip_prefix('J') {
                j = v.parse().unwrap();
            }
        }
        (i, j)
    }

    #[test]
    fn collinear_quadratic_emits_single_line() {
        let mut out = Vec::new();
        fit_quadratic(
            Point::new(0.0, 0.0),
            Point::new(5.0, 0.0),
            Point::new(10.0, 0.0),
            1000,
            &mut out,
        );
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("G1 "));
        assert_eq!(parse_xy(&out[0]), (10.0, 0.0));
    }

    #[test]
    fn degenerate_span_emits_nothing() {
        let mut out = Vec::new();
        fit_cubic(
            Point::new(1.0, 1.0),
            Point::new(1.0, 1.0),
            Point::new(1.0, 1.0),
            Point::new(1.0, 1.0 + 1e-9),
            800,
            &mut out,
        );
        assert!(out.is_empty());
    }

    #[test]
    fn shallow_arc_fits_in_one_command() {
        // Quadratic approximating a gentle bow: well within tolerance.
        let p0 = Point::new(0.0, 0.0);
        let cp = Point::new(5.0, 1.0);
        let p3 = Point::new(10.0, 0.0);
        let mut out = Vec::new();
        fit_quadratic(p0, cp, p3, 1200, &mut out);
        assert_eq!(out.len(), 1, "expected a single arc, got {out:?}");
        assert!(out[0].starts_with("G3 "), "upward bow is counter-clockwise: {}", out[0]);

        // The true curve midpoint must lie on the emitted circle within tolerance.
        let (i, j) = parse_ij(&out[0]);
        let center = Point::new(p0.x + i, p0.y + j);
        let r = p0.distance(center);
        let mid = quad_point(p0, cp, p3, 0.5);
        assert!((mid.distance(center) - r).abs() <= MAX_ARC_ERR_MM);
    }

    #[test]
    fn clockwise_bow_emits_g2() {
        let mut out = Vec::new();
        fit_quadratic(
            Point::new(0.0, 0.0),
            Point::new(5.0, -1.0),
            Point::new(10.0, 0.0),
            1200,
            &mut out,
        );
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("G2 "));
    }

    #[test]
    fn deep_cubic_splits_at_least_once() {
        // Near-full-circle cubic: endpoints close together, wide control sweep.
        let p0 = Point::new(10.0, 0.1);
        let p1 = Point::new(10.0, 14.0);
        let p2 = Point::new(-10.0, 14.0);
        let p3 = Point::new(-10.0, 0.1);
        let mut out = Vec::new();
        fit_cubic(p0, p1, p2, p3, 1000, &mut out);
        assert!(out.len() >= 2, "expected subdivision, got {out:?}");
    }

    #[test]
    fn every_emitted_arc_keeps_midpoint_error_bounded() {
        // Subdivided curve: re-fit each emitted arc against the source curve
        // by checking start/end continuity and the I/J center radius claim.
        let p0 = Point::new(0.0, 0.0);
        let p1 = Point::new(0.0, 8.0);
        let p2 = Point::new(12.0, 8.0);
        let p3 = Point::new(12.0, 0.0);
        let mut out = Vec::new();
        fit_cubic(p0, p1, p2, p3, 900, &mut out);
        assert!(!out.is_empty());

        let mut cursor = p0;
        for line in &out {
            let (x, y) = parse_xy(line);
            let end = Point::new(x, y);
            if line.starts_with("G2") || line.starts_with("G3") {
                let (i, j) = parse_ij(line);
                let center = Point::new(cursor.x + i, cursor.y + j);
                // Start and end radii of a circular arc agree up to the
                // 3-decimal formatting quantum.
                let r0 = cursor.distance(center);
                let r1 = end.distance(center);
                assert!((r0 - r1).abs() < MAX_ARC_ERR_MM + 2e-3, "{line}");
            }
            cursor = end;
        }
        assert!(cursor.distance(p3) < 1e-3);
    }

    #[test]
    fn tiny_radius_falls_back_to_line() {
        // Everything inside a 0.04 mm span fits under MIN_RADIUS_MM.
        let mut out = Vec::new();
        fit_quadratic(
            Point::new(0.0, 0.0),
            Point::new(0.02, 0.02),
            Point::new(0.04, 0.0),
            500,
            &mut out,
        );
        assert_eq!(out.len(), 1);
        assert!(out[0].starts_with("G1 "));
    }
}

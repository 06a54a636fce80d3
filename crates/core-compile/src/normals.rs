//! Vertex normals for concentric offsetting.
//!
//! For every point in a command stream (endpoints and curve control
//! points alike) we compute the unit bisector normal of its two adjacent
//! edges, scaled by a miter factor clamped at 2.0 so sharp corners do not
//! shoot offsets to infinity. Contours wrap when closed (first and last
//! points coincide); open contours clamp at their ends. Coincident
//! neighbour points are skipped when hunting for edge directions.

use core_geom::Point;
use core_glyph::PathCmd;

const COINCIDENT_EPS: f64 = 1e-5;
const MITER_LIMIT: f64 = 2.0;

/// Per-command normal vectors, slot-aligned with the source command:
/// slot 0 holds the normal for a move/line target or the first control
/// point; higher slots follow the command's remaining points in order.
pub(crate) type CmdNormals = [Point; 3];

fn normalize(dx: f64, dy: f64) -> (f64, f64) {
    let len = dx.hypot(dy);
    if len > 0.0 { (dx / len, dy / len) } else { (0.0, 0.0) }
}

/// Compute normals for every point of `commands`, preserving arity.
pub(crate) fn vertex_normals(commands: &[PathCmd]) -> Vec<CmdNormals> {
    // Flatten to a point list, remembering contour boundaries (MoveTo).
    let mut pts: Vec<Point> = Vec::new();
    let mut contour_of_first_point: Vec<usize> = Vec::new(); // start index per contour
    for cmd in commands {
        let cmd_points: &[Point] = match cmd {
            PathCmd::MoveTo(p) => {
                contour_of_first_point.push(pts.len());
                std::slice::from_ref(p)
            }
            PathCmd::LineTo(p) => std::slice::from_ref(p),
            PathCmd::QuadTo(c, p) => &[*c, *p],
            PathCmd::CubicTo(c1, c2, p) => &[*c1, *c2, *p],
        };
        pts.extend_from_slice(cmd_points);
    }

    let mut normals = vec![Point::default(); pts.len()];
    let contour_count = contour_of_first_point.len();
    for (ci, &start) in contour_of_first_point.iter().enumerate() {
        let end = if ci + 1 < contour_count {
            contour_of_first_point[ci + 1]
        } else {
            pts.len()
        };
        let n = end - start;
        if n < 2 {
            continue;
        }
        let closed = pts[start].distance(pts[end - 1]) < COINCIDENT_EPS;

        for i in 0..n {
            let curr = pts[start + i];

            // Nearest distinct neighbour on each side, wrapping when closed.
            let mut prev = curr;
            for step in 1..n {
                let idx = if closed {
                    (i + n - step) % n
                } else {
                    i.saturating_sub(step)
                };
                if pts[start + idx].distance(curr) > COINCIDENT_EPS {
                    prev = pts[start + idx];
                    break;
                }
            }
            let mut next = curr;
            for step in 1..n {
                let idx = if closed {
                    (i + step) % n
                } else {
                    (i + step).min(n - 1)
                };
                if pts[start + idx].distance(curr) > COINCIDENT_EPS {
                    next = pts[start + idx];
                    break;
                }
            }

            let (n1x, n1y) = normalize(curr.x - prev.x, curr.y - prev.y);
            let (n2x, n2y) = normalize(next.x - curr.x, next.y - curr.y);

            let (mut tx, mut ty) = (n1x + n2x, n1y + n2y);
            let lt = tx.hypot(ty);
            if lt > COINCIDENT_EPS {
                tx /= lt;
                ty /= lt;
            } else {
                // 180-degree reversal: take the perpendicular of the
                // incoming edge as the tangent.
                tx = -n1y;
                ty = n1x;
            }
            let (nx, ny) = (-ty, tx);

            let dot = n1x * n2x + n1y * n2y;
            let denom = ((1.0 + dot) / 2.0).max(0.001).sqrt();
            let miter = (1.0 / denom).min(MITER_LIMIT);

            normals[start + i] = Point::new(nx * miter, ny * miter);
        }
    }

    // Fold the flat normal list back into per-command slots.
    let mut out = Vec::with_capacity(commands.len());
    let mut cursor = 0;
    for cmd in commands {
        let arity = match cmd {
            PathCmd::MoveTo(_) | PathCmd::LineTo(_) => 1,
            PathCmd::QuadTo(..) => 2,
            PathCmd::CubicTo(..) => 3,
        };
        let mut slots: CmdNormals = [Point::default(); 3];
        slots[..arity].copy_from_slice(&normals[cursor..cursor + arity]);
        out.push(slots);
        cursor += arity;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn square_contour_normals_point_outward() {
        // Counter-clockwise unit square, explicitly closed.
        let cmds = vec![
            PathCmd::MoveTo(Point::new(0.0, 0.0)),
            PathCmd::LineTo(Point::new(10.0, 0.0)),
            PathCmd::LineTo(Point::new(10.0, 10.0)),
            PathCmd::LineTo(Point::new(0.0, 10.0)),
            PathCmd::LineTo(Point::new(0.0, 0.0)),
        ];
        let normals = vertex_normals(&cmds);
        assert_eq!(normals.len(), cmds.len());

        // Corner (10,0): edges →right then ↑up; the left-hand bisector
        // normal of a CCW contour points into the interior (up-left here).
        let n = normals[1][0];
        assert!(n.x < 0.0 && n.y > 0.0, "corner normal {n:?}");
        // Miter at a 90° corner is sqrt(2), below the clamp.
        let len = n.x.hypot(n.y);
        assert!((len - std::f64::consts::SQRT_2).abs() < 1e-9);
    }

    #[test]
    fn straight_midpoint_has_unit_normal() {
        let cmds = vec![
            PathCmd::MoveTo(Point::new(0.0, 0.0)),
            PathCmd::LineTo(Point::new(5.0, 0.0)),
            PathCmd::LineTo(Point::new(10.0, 0.0)),
        ];
        let normals = vertex_normals(&cmds);
        let n = normals[1][0];
        assert!((n.x.hypot(n.y) - 1.0).abs() < 1e-9);
        assert!(n.x.abs() < 1e-9, "normal of a straight run is perpendicular");
    }

    #[test]
    fn sharp_corner_miter_is_clamped() {
        // Near-reversal: miter would explode without the clamp.
        let cmds = vec![
            PathCmd::MoveTo(Point::new(0.0, 0.0)),
            PathCmd::LineTo(Point::new(10.0, 0.0)),
            PathCmd::LineTo(Point::new(0.0, 0.5)),
        ];
        let normals = vertex_normals(&cmds);
        let n = normals[1][0];
        assert!(n.x.hypot(n.y) <= MITER_LIMIT + 1e-9);
    }

    #[test]
    fn arity_is_preserved_for_curves() {
        let cmds = vec![
            PathCmd::MoveTo(Point::new(0.0, 0.0)),
            PathCmd::QuadTo(Point::new(5.0, 5.0), Point::new(10.0, 0.0)),
            PathCmd::CubicTo(
                Point::new(12.0, -2.0),
                Point::new(14.0, -2.0),
                Point::new(16.0, 0.0),
            ),
        ];
        let normals = vertex_normals(&cmds);
        assert_eq!(normals.len(), 3);
        // Control points get their own normals.
        assert!(normals[1][0].x.hypot(normals[1][0].y) > 0.0);
        assert!(normals[2][1].x.hypot(normals[2][1].y) > 0.0);
    }
}

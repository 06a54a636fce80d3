//! Bold/outline emphasis strategies.
//!
//! Translate modes re-engrave the whole program at small XY offsets so
//! strokes widen by overlap. The concentric mode instead morphologically
//! insets/outsets every vertex along its normal (see [`crate::normals`])
//! by alternating signed multiples of the step.

/// How repeated engraving passes are displaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BoldPattern {
    /// Orthogonal nudges: right, up, left, down, then a wider ring.
    #[default]
    Cross,
    /// Full 8-neighbourhood: orthogonals then diagonals, then wider rings.
    Grid,
    /// Evenly spaced points on a circle of the offset radius.
    Circle,
    /// Morphological inset/outset along vertex normals.
    Concentric,
}

impl BoldPattern {
    /// Parse an operator-facing pattern key; unknown keys fall back to
    /// the plain cross.
    pub fn from_key(key: &str) -> Self {
        match key {
            "grid" => Self::Grid,
            "circle" => Self::Circle,
            "concentric" => Self::Concentric,
            _ => Self::Cross,
        }
    }
}

const CROSS_SEQ: [(f64, f64); 4] = [(1.0, 0.0), (0.0, 1.0), (-1.0, 0.0), (0.0, -1.0)];
const GRID_SEQ: [(f64, f64); 8] = [
    (1.0, 0.0),
    (0.0, 1.0),
    (-1.0, 0.0),
    (0.0, -1.0),
    (1.0, 1.0),
    (-1.0, 1.0),
    (-1.0, -1.0),
    (1.0, -1.0),
];

/// XY displacement per repeat for the translate patterns.
///
/// Index 0 is always `(0, 0)` so the nominal stroke is engraved first.
pub fn translate_offsets(repeats: u32, offset_mm: f64, pattern: BoldPattern) -> Vec<(f64, f64)> {
    let mut offsets = vec![(0.0, 0.0)];
    if repeats <= 1 {
        return offsets;
    }
    match pattern {
        BoldPattern::Circle => {
            let n = (repeats - 1) as f64;
            for i in 1..repeats {
                let angle = (i - 1) as f64 * (std::f64::consts::TAU / n);
                offsets.push((angle.cos() * offset_mm, angle.sin() * offset_mm));
            }
        }
        BoldPattern::Concentric => {
            // Concentric repeats stay in place; displacement happens along
            // vertex normals via `concentric_amounts`.
            offsets.resize(repeats as usize, (0.0, 0.0));
        }
        BoldPattern::Cross | BoldPattern::Grid => {
            let seq: &[(f64, f64)] = if pattern == BoldPattern::Cross {
                &CROSS_SEQ
            } else {
                &GRID_SEQ
            };
            for i in 1..repeats as usize {
                let idx = (i - 1) % seq.len();
                let ring = 1.0 + ((i - 1) / seq.len()) as f64;
                let (dx, dy) = seq[idx];
                offsets.push((dx * offset_mm * ring, dy * offset_mm * ring));
            }
        }
    }
    offsets
}

/// Signed normal-offset magnitude per repeat for the concentric pattern:
/// `0, +δ, −δ, +2δ, −2δ, …`.
pub fn concentric_amounts(repeats: u32, offset_mm: f64) -> Vec<f64> {
    let mut amounts = vec![0.0];
    for i in 1..repeats {
        let sign = if i % 2 == 1 { 1.0 } else { -1.0 };
        let step = ((i + 1) / 2) as f64;
        amounts.push(sign * step * offset_mm);
    }
    amounts
}

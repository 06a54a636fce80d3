//! Built-in pen-stroke font.
//!
//! A hard-coded vector alphabet (uppercase letters and digits) on a
//! 0..=21 unit grid, cap height 21. Each glyph is a list of pen-down
//! polylines; a new slice means a pen lift. Lowercase input is upcased
//! before lookup; anything else renders as empty geometry with a fixed
//! advance so text layout never stalls on an unsupported character.
//!
//! The table exists so the engraver keeps working with no font file on
//! disk at all, and as the silent fallback when an outline font fails to
//! load.

use core_geom::Point;

use crate::{GlyphEntry, PathCmd};

/// Advance for characters missing from the table (including space).
const MISSING_ADVANCE: f64 = 16.0;

type Strokes = &'static [&'static [(i8, i8)]];

/// The built-in stroke font backend. Stateless; all data is `'static`.
pub struct StrokeFont;

impl StrokeFont {
    pub fn glyph(&self, ch: char) -> GlyphEntry {
        let ch = ch.to_ascii_uppercase();
        let Some((advance, strokes)) = glyph_table(ch) else {
            return GlyphEntry::advance_only(MISSING_ADVANCE);
        };

        let mut commands = Vec::new();
        for stroke in strokes {
            let mut points = stroke
                .iter()
                .map(|&(x, y)| Point::new(x as f64, y as f64));
            if let Some(first) = points.next() {
                commands.push(PathCmd::MoveTo(first));
                commands.extend(points.map(PathCmd::LineTo));
            }
        }
        GlyphEntry {
            commands,
            advance: advance as f64,
        }
    }
}

/// Advance width + polylines for one character, grid units.
fn glyph_table(ch: char) -> Option<(i8, Strokes)> {
    let entry: (i8, Strokes) = match ch {
        'A' => (18, &[&[(0, 0), (8, 21), (16, 0)], &[(3, 7), (13, 7)]]),
        'B' => (
            16,
            &[&[
                (0, 0),
                (0, 21),
                (10, 21),
                (13, 19),
                (13, 13),
                (10, 11),
                (0, 11),
            ],
            &[(10, 11), (13, 9), (13, 2), (10, 0), (0, 0)]],
        ),
        'C' => (
            16,
            &[&[
                (14, 4),
                (12, 1),
                (8, 0),
                (5, 0),
                (2, 2),
                (0, 6),
                (0, 15),
                (2, 19),
                (5, 21),
                (8, 21),
                (12, 20),
                (14, 17),
            ]],
        ),
        'D' => (
            16,
            &[&[
                (0, 0),
                (0, 21),
                (8, 21),
                (12, 19),
                (14, 15),
                (14, 6),
                (12, 2),
                (8, 0),
                (0, 0),
            ]],
        ),
        'E' => (15, &[&[(13, 0), (0, 0), (0, 21), (13, 21)], &[(0, 11), (9, 11)]]),
        'F' => (14, &[&[(0, 0), (0, 21), (13, 21)], &[(0, 11), (9, 11)]]),
        'G' => (
            16,
            &[&[
                (14, 17),
                (12, 20),
                (8, 21),
                (5, 21),
                (2, 19),
                (0, 15),
                (0, 6),
                (2, 2),
                (5, 0),
                (8, 0),
                (12, 1),
                (14, 4),
                (14, 9),
                (9, 9),
            ]],
        ),
        'H' => (
            16,
            &[&[(0, 0), (0, 21)], &[(14, 0), (14, 21)], &[(0, 11), (14, 11)]],
        ),
        'I' => (6, &[&[(0, 0), (0, 21)]]),
        'J' => (12, &[&[(10, 21), (10, 5), (8, 1), (5, 0), (2, 1), (0, 4)]]),
        'K' => (15, &[&[(0, 0), (0, 21)], &[(13, 21), (0, 8)], &[(5, 13), (14, 0)]]),
        'L' => (13, &[&[(0, 21), (0, 0), (12, 0)]]),
        'M' => (18, &[&[(0, 0), (0, 21), (8, 8), (16, 21), (16, 0)]]),
        'N' => (16, &[&[(0, 0), (0, 21), (14, 0), (14, 21)]]),
        'O' => (
            16,
            &[&[
                (5, 0),
                (2, 2),
                (0, 6),
                (0, 15),
                (2, 19),
                (5, 21),
                (9, 21),
                (12, 19),
                (14, 15),
                (14, 6),
                (12, 2),
                (9, 0),
                (5, 0),
            ]],
        ),
        'P' => (
            16,
            &[&[
                (0, 0),
                (0, 21),
                (10, 21),
                (13, 19),
                (14, 16),
                (14, 13),
                (13, 11),
                (10, 10),
                (0, 10),
            ]],
        ),
        'Q' => (
            16,
            &[&[
                (5, 0),
                (2, 2),
                (0, 6),
                (0, 15),
                (2, 19),
                (5, 21),
                (9, 21),
                (12, 19),
                (14, 15),
                (14, 6),
                (12, 2),
                (9, 0),
                (5, 0),
            ],
            &[(8, 4), (14, 0)]],
        ),
        'R' => (
            16,
            &[&[
                (0, 0),
                (0, 21),
                (10, 21),
                (13, 19),
                (14, 16),
                (14, 13),
                (13, 11),
                (10, 10),
                (0, 10),
            ],
            &[(8, 10), (14, 0)]],
        ),
        'S' => (
            15,
            &[&[
                (13, 18),
                (10, 21),
                (4, 21),
                (1, 18),
                (1, 14),
                (4, 11),
                (10, 10),
                (13, 7),
                (13, 3),
                (10, 0),
                (3, 0),
                (0, 3),
            ]],
        ),
        'T' => (15, &[&[(7, 0), (7, 21)], &[(0, 21), (14, 21)]]),
        'U' => (
            16,
            &[&[
                (0, 21),
                (0, 6),
                (2, 2),
                (5, 0),
                (9, 0),
                (12, 2),
                (14, 6),
                (14, 21),
            ]],
        ),
        'V' => (17, &[&[(0, 21), (8, 0), (16, 21)]]),
        'W' => (19, &[&[(0, 21), (4, 0), (9, 14), (14, 0), (18, 21)]]),
        'X' => (15, &[&[(0, 0), (14, 21)], &[(0, 21), (14, 0)]]),
        'Y' => (15, &[&[(0, 21), (7, 10), (14, 21)], &[(7, 10), (7, 0)]]),
        'Z' => (15, &[&[(0, 21), (14, 21), (0, 0), (14, 0)]]),
        '0' => (
            16,
            &[&[
                (6, 0),
                (3, 1),
                (1, 4),
                (0, 9),
                (0, 12),
                (1, 17),
                (3, 20),
                (6, 21),
                (8, 21),
                (11, 20),
                (13, 17),
                (14, 12),
                (14, 9),
                (13, 4),
                (11, 1),
                (8, 0),
                (6, 0),
            ]],
        ),
        '1' => (12, &[&[(3, 17), (7, 21), (7, 0)]]),
        '2' => (
            15,
            &[&[
                (1, 18),
                (4, 21),
                (10, 21),
                (13, 18),
                (13, 14),
                (11, 11),
                (0, 0),
                (14, 0),
            ]],
        ),
        '3' => (
            15,
            &[&[
                (1, 21),
                (13, 21),
                (7, 13),
                (10, 13),
                (13, 10),
                (13, 4),
                (10, 0),
                (3, 0),
                (0, 3),
            ]],
        ),
        '4' => (15, &[&[(10, 0), (10, 21), (0, 6), (14, 6)]]),
        '5' => (
            15,
            &[&[
                (12, 21),
                (2, 21),
                (1, 11),
                (4, 13),
                (8, 13),
                (12, 10),
                (12, 4),
                (8, 0),
                (3, 0),
                (0, 3),
            ]],
        ),
        '6' => (
            15,
            &[&[
                (12, 18),
                (9, 21),
                (5, 21),
                (2, 18),
                (0, 12),
                (0, 6),
                (2, 1),
                (6, 0),
                (9, 1),
                (12, 4),
                (12, 8),
                (9, 11),
                (5, 11),
                (2, 9),
                (0, 6),
            ]],
        ),
        '7' => (15, &[&[(0, 21), (14, 21), (5, 0)]]),
        '8' => (
            15,
            &[&[
                (4, 11),
                (1, 13),
                (1, 18),
                (4, 21),
                (10, 21),
                (13, 18),
                (13, 13),
                (10, 11),
                (4, 11),
                (1, 8),
                (1, 3),
                (4, 0),
                (10, 0),
                (13, 3),
                (13, 8),
                (10, 11),
            ]],
        ),
        '9' => (
            15,
            &[&[
                (2, 3),
                (5, 0),
                (9, 0),
                (12, 3),
                (14, 9),
                (14, 15),
                (12, 20),
                (8, 21),
                (5, 20),
                (2, 17),
                (2, 13),
                (5, 10),
                (9, 10),
                (12, 12),
                (14, 15),
            ]],
        ),
        _ => return None,
    };
    Some(entry)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn y_extent(entry: &GlyphEntry) -> (f64, f64) {
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for cmd in &entry.commands {
            let p = match cmd {
                PathCmd::MoveTo(p) | PathCmd::LineTo(p) => p,
                PathCmd::QuadTo(_, p) | PathCmd::CubicTo(_, _, p) => p,
            };
            min = min.min(p.y);
            max = max.max(p.y);
        }
        (min, max)
    }

    #[test]
    fn every_letter_and_digit_has_geometry() {
        let font = StrokeFont;
        for ch in ('A'..='Z').chain('0'..='9') {
            let g = font.glyph(ch);
            assert!(!g.commands.is_empty(), "no strokes for {ch:?}");
            assert!(g.advance > 0.0, "no advance for {ch:?}");
            assert!(
                matches!(g.commands[0], PathCmd::MoveTo(_)),
                "glyph {ch:?} must start with a pen lift"
            );
        }
    }

    #[test]
    fn caps_span_the_full_grid_height() {
        let font = StrokeFont;
        for ch in ['A', 'H', 'T', 'X', '0', '7'] {
            let (min, max) = y_extent(&font.glyph(ch));
            assert_eq!(min, 0.0, "{ch:?} baseline");
            assert_eq!(max, 21.0, "{ch:?} cap height");
        }
    }

    #[test]
    fn lowercase_maps_to_uppercase() {
        let font = StrokeFont;
        let lower = font.glyph('a');
        let upper = font.glyph('A');
        assert_eq!(lower.commands, upper.commands);
        assert_eq!(lower.advance, upper.advance);
    }

    #[test]
    fn space_and_punctuation_advance_only() {
        let font = StrokeFont;
        for ch in [' ', '!', '?', '€'] {
            let g = font.glyph(ch);
            assert!(g.commands.is_empty(), "{ch:?} should have no strokes");
            assert_eq!(g.advance, MISSING_ADVANCE);
        }
    }
}

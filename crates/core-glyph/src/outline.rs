//! TrueType/OpenType outline extraction.
//!
//! `ttf-parser` walks each glyph contour through an `OutlineBuilder`; the
//! builder below records the commands verbatim in font units. TrueType's
//! two-consecutive-off-curve rule (the implied on-curve midpoint) is
//! resolved by the parser itself, so only explicit move/line/quad/cubic
//! commands arrive here. `close` is turned into a `LineTo` back to the
//! contour start, which keeps every contour drawable as one pen-down pass.

use std::path::Path;

use core_geom::Point;
use tracing::debug;
use ttf_parser::{Face, OutlineBuilder};

use crate::{GlyphEntry, GlyphError, PathCmd};

/// An outline font held as raw file bytes; faces are re-parsed per glyph
/// extraction (header-only, cheap) because extraction happens once per
/// character per font thanks to the cache above.
#[derive(Debug)]
pub struct OutlineFont {
    path: String,
    data: Vec<u8>,
    /// Advance used for characters the face has no glyph for.
    fallback_advance: f64,
}

struct CommandRecorder {
    commands: Vec<PathCmd>,
    contour_start: Point,
}

impl OutlineBuilder for CommandRecorder {
    fn move_to(&mut self, x: f32, y: f32) {
        let p = Point::new(x as f64, y as f64);
        self.contour_start = p;
        self.commands.push(PathCmd::MoveTo(p));
    }

    fn line_to(&mut self, x: f32, y: f32) {
        self.commands
            .push(PathCmd::LineTo(Point::new(x as f64, y as f64)));
    }

    fn quad_to(&mut self, x1: f32, y1: f32, x: f32, y: f32) {
        self.commands.push(PathCmd::QuadTo(
            Point::new(x1 as f64, y1 as f64),
            Point::new(x as f64, y as f64),
        ));
    }

    fn curve_to(&mut self, x1: f32, y1: f32, x2: f32, y2: f32, x: f32, y: f32) {
        self.commands.push(PathCmd::CubicTo(
            Point::new(x1 as f64, y1 as f64),
            Point::new(x2 as f64, y2 as f64),
            Point::new(x as f64, y as f64),
        ));
    }

    fn close(&mut self) {
        self.commands.push(PathCmd::LineTo(self.contour_start));
    }
}

impl OutlineFont {
    pub fn from_file(path: &Path) -> Result<Self, GlyphError> {
        let display = path.display().to_string();
        let data = std::fs::read(path).map_err(|source| GlyphError::Io {
            path: display.clone(),
            source,
        })?;
        // Validate once up front so later per-glyph parses cannot fail.
        let face = Face::parse(&data, 0).map_err(|_| GlyphError::FaceParse {
            path: display.clone(),
        })?;
        let fallback_advance = face.units_per_em() as f64 / 3.0;
        Ok(Self {
            path: display,
            data,
            fallback_advance,
        })
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn glyph(&self, ch: char) -> GlyphEntry {
        // Parse validated in `from_file`; a corrupt re-parse still degrades
        // to an advance-only glyph rather than failing the whole string.
        let Ok(face) = Face::parse(&self.data, 0) else {
            return GlyphEntry::advance_only(self.fallback_advance);
        };
        let Some(gid) = face.glyph_index(ch) else {
            debug!(target: "glyph", ch = %ch, font = %self.path, "no_glyph_for_char");
            return GlyphEntry::advance_only(self.fallback_advance);
        };
        let advance = face
            .glyph_hor_advance(gid)
            .map(f64::from)
            .unwrap_or(self.fallback_advance);

        let mut recorder = CommandRecorder {
            commands: Vec::new(),
            contour_start: Point::default(),
        };
        // None means a blank glyph (e.g. space): advance, no geometry.
        if face.outline_glyph(gid, &mut recorder).is_none() {
            return GlyphEntry::advance_only(advance);
        }

        GlyphEntry {
            commands: recorder.commands,
            advance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_reports_io_error() {
        let err = OutlineFont::from_file(Path::new("/nonexistent/font.ttf")).unwrap_err();
        assert!(matches!(err, GlyphError::Io { .. }));
    }

    #[test]
    fn garbage_bytes_report_parse_error() {
        let dir = std::env::temp_dir();
        let path = dir.join("core_glyph_garbage_font.ttf");
        std::fs::write(&path, b"definitely not a font").unwrap();
        let err = OutlineFont::from_file(&path).unwrap_err();
        assert!(matches!(err, GlyphError::FaceParse { .. }));
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn recorder_closes_contours_back_to_start() {
        let mut rec = CommandRecorder {
            commands: Vec::new(),
            contour_start: Point::default(),
        };
        rec.move_to(1.0, 2.0);
        rec.line_to(3.0, 2.0);
        rec.quad_to(4.0, 4.0, 3.0, 6.0);
        rec.close();
        assert_eq!(rec.commands.len(), 4);
        assert_eq!(
            rec.commands[3],
            PathCmd::LineTo(Point::new(1.0, 2.0)),
            "close must return to the contour start"
        );
    }
}

//! Glyph sources: character → drawing commands + advance width.
//!
//! Two backends sit behind [`FontSource`]:
//! * [`outline`] — TrueType/OpenType outlines via `ttf-parser`. Quadratic
//!   and cubic contours are passed through as-is; every contour is closed
//!   by an explicit `LineTo` back to its start so downstream consumers
//!   never need the implicit-close rule.
//! * [`stroke`] — a built-in pen-stroke font (uppercase + digits) that
//!   needs no file on disk and acts as the last-resort fallback.
//!
//! Glyphs are cached per `FontSource`; swapping fonts means constructing a
//! new source, which drops the whole cache (the cache key is the font
//! identity itself). Lookups after warm-up clone an `Arc` under a short
//! lock, so concurrent read-only use is safe; first-touch extraction is
//! serialized.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use core_geom::Point;
use thiserror::Error;

pub mod outline;
pub mod profiles;
pub mod stroke;

pub use outline::OutlineFont;
pub use profiles::{FontProfile, FontRegistry};
pub use stroke::StrokeFont;

/// One drawing command in font units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PathCmd {
    MoveTo(Point),
    LineTo(Point),
    /// Quadratic Bézier: control point, end point.
    QuadTo(Point, Point),
    /// Cubic Bézier: two control points, end point.
    CubicTo(Point, Point, Point),
}

/// Cached outline for one character, in font units.
#[derive(Debug, Clone, Default)]
pub struct GlyphEntry {
    pub commands: Vec<PathCmd>,
    /// Horizontal advance to the next glyph origin.
    pub advance: f64,
}

impl GlyphEntry {
    /// A geometry-free entry that still advances the pen.
    pub fn advance_only(advance: f64) -> Self {
        Self { commands: Vec::new(), advance }
    }
}

#[derive(Debug, Error)]
pub enum GlyphError {
    #[error("failed to read font file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse font file {path}")]
    FaceParse { path: String },
}

enum Backend {
    Stroke(StrokeFont),
    Outline(OutlineFont),
}

/// A glyph provider with an owning per-font cache.
pub struct FontSource {
    backend: Backend,
    cache: Mutex<HashMap<char, Arc<GlyphEntry>>>,
}

impl FontSource {
    /// The built-in stroke font; always available.
    pub fn builtin() -> Self {
        Self {
            backend: Backend::Stroke(StrokeFont),
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Load an outline font from disk.
    pub fn from_file(path: &std::path::Path) -> Result<Self, GlyphError> {
        Ok(Self {
            backend: Backend::Outline(OutlineFont::from_file(path)?),
            cache: Mutex::new(HashMap::new()),
        })
    }

    /// Drawing commands + advance for `ch`.
    ///
    /// Characters the backend cannot render come back geometry-free with a
    /// fallback advance, so the caller's pen still moves.
    pub fn glyph(&self, ch: char) -> Arc<GlyphEntry> {
        let mut cache = self.cache.lock().expect("glyph cache poisoned");
        if let Some(entry) = cache.get(&ch) {
            return Arc::clone(entry);
        }
        let entry = Arc::new(match &self.backend {
            Backend::Stroke(f) => f.glyph(ch),
            Backend::Outline(f) => f.glyph(ch),
        });
        cache.insert(ch, Arc::clone(&entry));
        entry
    }

    /// True when backed by the built-in stroke font.
    pub fn is_builtin(&self) -> bool {
        matches!(self.backend, Backend::Stroke(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_source_caches_entries() {
        let src = FontSource::builtin();
        let a1 = src.glyph('A');
        let a2 = src.glyph('A');
        assert!(Arc::ptr_eq(&a1, &a2));
        assert!(!a1.commands.is_empty());
        assert!(a1.advance > 0.0);
    }

    #[test]
    fn unknown_character_advances_without_geometry() {
        let src = FontSource::builtin();
        let g = src.glyph('€');
        assert!(g.commands.is_empty());
        assert!(g.advance > 0.0);
    }
}

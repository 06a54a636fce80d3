//! Font profile registry.
//!
//! Maps operator-facing font keys (`simplex`, `arial`, …) to a display
//! label, a nominal stroke width and an optional outline file on disk.
//! A `fonts/` directory scan lets locally uploaded `.ttf` files override
//! the stock system paths, or add entirely new keys named after the file.
//!
//! `simplex` is special: it is the built-in stroke font and carries no
//! path, so it can never fail to load.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

/// Key of the built-in stroke font profile.
pub const BUILTIN_KEY: &str = "simplex";

#[derive(Debug, Clone)]
pub struct FontProfile {
    pub label: String,
    /// Nominal engraved line width in millimetres, for operator display.
    pub stroke_width_mm: f64,
    /// Outline file; `None` selects the built-in stroke backend.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct FontRegistry {
    profiles: BTreeMap<String, FontProfile>,
}

fn stock_profiles() -> BTreeMap<String, FontProfile> {
    let mut map = BTreeMap::new();
    map.insert(
        BUILTIN_KEY.to_string(),
        FontProfile {
            label: "Simplex (built-in stroke)".to_string(),
            stroke_width_mm: 0.4,
            path: None,
        },
    );
    for (key, label, width, path) in [
        (
            "sans",
            "Sans (DejaVu)",
            0.4,
            "/usr/share/fonts/truetype/dejavu/DejaVuSans.ttf",
        ),
        (
            "times",
            "Times (Serif)",
            0.5,
            "/usr/share/fonts/truetype/dejavu/DejaVuSerif.ttf",
        ),
        (
            "arial",
            "Arial (Sans-serif)",
            0.5,
            "/usr/share/fonts/truetype/liberation/LiberationSans-Regular.ttf",
        ),
        (
            "cursive",
            "Cursive (Ubuntu Italic)",
            0.3,
            "/usr/share/fonts/truetype/ubuntu/Ubuntu-Italic.ttf",
        ),
        (
            "impact",
            "Impact (Ubuntu Bold)",
            0.6,
            "/usr/share/fonts/truetype/ubuntu/Ubuntu-B.ttf",
        ),
    ] {
        map.insert(
            key.to_string(),
            FontProfile {
                label: label.to_string(),
                stroke_width_mm: width,
                path: Some(PathBuf::from(path)),
            },
        );
    }
    map
}

fn title_case(stem: &str) -> String {
    stem.split(['_', '-'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

impl FontRegistry {
    /// Stock profiles plus overrides/additions from `fonts_dir`.
    ///
    /// An uploaded file whose stem matches a stock key replaces that key's
    /// path; any other `.ttf` becomes a new profile named after the file.
    pub fn scan(fonts_dir: &Path) -> Self {
        let mut profiles = stock_profiles();
        let Ok(entries) = std::fs::read_dir(fonts_dir) else {
            return Self { profiles };
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let is_ttf = path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("ttf"));
            if !is_ttf {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            let key = stem.to_ascii_lowercase();
            if key == BUILTIN_KEY {
                continue; // the stroke backend is not file-backed
            }
            match profiles.get_mut(&key) {
                Some(profile) => {
                    debug!(target: "glyph", key = %key, path = %path.display(), "font_profile_override");
                    profile.path = Some(path);
                }
                None => {
                    profiles.insert(
                        key,
                        FontProfile {
                            label: title_case(stem),
                            stroke_width_mm: 0.5,
                            path: Some(path),
                        },
                    );
                }
            }
        }
        Self { profiles }
    }

    /// Look a key up, falling back to the built-in profile for unknown keys.
    pub fn resolve(&self, key: &str) -> &FontProfile {
        if let Some(profile) = self.profiles.get(key) {
            return profile;
        }
        debug!(target: "glyph", key = %key, "unknown_font_key_fallback");
        &self.profiles[BUILTIN_KEY]
    }

    pub fn profiles(&self) -> impl Iterator<Item = (&str, &FontProfile)> {
        self.profiles.iter().map(|(k, v)| (k.as_str(), v))
    }
}

impl Default for FontRegistry {
    fn default() -> Self {
        Self {
            profiles: stock_profiles(),
        }
    }
}

//! Configuration loading and parsing.
//!
//! `engraver.toml` holds four sections — `[engraving_area]`,
//! `[laser_settings]`, `[text_settings]`, `[connection]` — every field of
//! which has a serde default, so partial files and files written by older
//! builds load cleanly. A parse error falls back to full defaults rather
//! than refusing to start: the engraver must come up even with a mangled
//! config, and the operator fixes it from the running system.
//!
//! The crate is pure data: conversions into component-level settings
//! structs live with the orchestrator, keeping this a leaf dependency.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::{fs, path::PathBuf};
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngravingAreaConfig {
    pub machine_width_mm: f64,
    pub machine_height_mm: f64,
    pub active_width_mm: f64,
    pub active_height_mm: f64,
    pub offset_x_mm: f64,
    pub offset_y_mm: f64,
}

impl Default for EngravingAreaConfig {
    fn default() -> Self {
        Self {
            machine_width_mm: 200.0,
            machine_height_mm: 298.0,
            active_width_mm: 200.0,
            active_height_mm: 298.0,
            offset_x_mm: 0.0,
            offset_y_mm: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LaserConfig {
    pub power_percent: f64,
    pub speed_mm_per_min: u32,
    pub passes: u32,
    pub spindle_max: u32,
    /// Focus height; 0 disables Z motion. `z_depth_mm` is the legacy
    /// name and is accepted on load.
    #[serde(alias = "z_depth_mm")]
    pub z_height_mm: f64,
}

impl Default for LaserConfig {
    fn default() -> Self {
        Self {
            power_percent: 50.0,
            speed_mm_per_min: 1000,
            passes: 1,
            spindle_max: 1000,
            z_height_mm: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextConfig {
    pub initial_height_mm: f64,
    pub font: String,
    pub bold_repeats: u32,
    pub bold_offset_mm: f64,
    /// `cross`, `grid`, `circle` or `concentric`.
    pub bold_pattern: String,
    pub mirror_y: bool,
    /// Directory scanned for operator-uploaded fonts.
    pub fonts_dir: String,
}

impl Default for TextConfig {
    fn default() -> Self {
        Self {
            initial_height_mm: 5.0,
            font: "simplex".to_string(),
            bold_repeats: 1,
            bold_offset_mm: 0.15,
            bold_pattern: "cross".to_string(),
            mirror_y: false,
            fonts_dir: "fonts".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// `network` or `serial`.
    pub kind: String,
    pub host: String,
    pub port: u16,
    pub serial_port: String,
    pub serial_baud: u32,
    pub abort_on_alarm: bool,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            kind: "network".to_string(),
            host: "fluidnc.local".to_string(),
            port: 23,
            serial_port: "/dev/ttyUSB0".to_string(),
            serial_baud: 115_200,
            abort_on_alarm: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub engraving_area: EngravingAreaConfig,
    pub laser_settings: LaserConfig,
    pub text_settings: TextConfig,
    pub connection: ConnectionConfig,
}

/// Best-effort config path: working directory first, then the platform
/// config dir (`~/.config/engraver/engraver.toml` on Linux).
pub fn discover() -> PathBuf {
    let local = PathBuf::from("engraver.toml");
    if local.exists() {
        return local;
    }
    if let Some(dir) = dirs::config_dir() {
        return dir.join("engraver").join("engraver.toml");
    }
    PathBuf::from("engraver.toml")
}

pub fn load_from(path: Option<PathBuf>) -> Result<Config> {
    let path = path.unwrap_or_else(discover);
    match fs::read_to_string(&path) {
        Ok(content) => match toml::from_str::<Config>(&content) {
            Ok(config) => {
                info!(target: "config", path = %path.display(), "config_loaded");
                Ok(config)
            }
            Err(err) => {
                warn!(
                    target: "config",
                    path = %path.display(),
                    error = %err,
                    "config_parse_failed_using_defaults"
                );
                Ok(Config::default())
            }
        },
        Err(_) => Ok(Config::default()),
    }
}

impl Config {
    /// Write the full document back (operator edits through the UI).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, toml::to_string_pretty(self)?)?;
        info!(target: "config", path = %path.display(), "config_saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_file_missing() {
        let cfg = load_from(Some(PathBuf::from("__nonexistent_hopefully__.toml"))).unwrap();
        assert_eq!(cfg.engraving_area.active_width_mm, 200.0);
        assert_eq!(cfg.laser_settings.power_percent, 50.0);
        assert_eq!(cfg.text_settings.font, "simplex");
        assert_eq!(cfg.connection.kind, "network");
    }

    #[test]
    fn partial_file_merges_with_defaults() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(
            tmp.path(),
            "[laser_settings]\npower_percent = 80.0\n\n[text_settings]\nfont = \"arial\"\n",
        )
        .unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.laser_settings.power_percent, 80.0);
        assert_eq!(cfg.text_settings.font, "arial");
        // Untouched sections keep their defaults.
        assert_eq!(cfg.laser_settings.spindle_max, 1000);
        assert_eq!(cfg.engraving_area.machine_height_mm, 298.0);
    }

    #[test]
    fn legacy_z_depth_key_is_an_alias() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "[laser_settings]\nz_depth_mm = 3.5\n").unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg.laser_settings.z_height_mm, 3.5);
    }

    #[test]
    fn mangled_file_falls_back_to_defaults() {
        let tmp = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "this is { not toml").unwrap();
        let cfg = load_from(Some(tmp.path().to_path_buf())).unwrap();
        assert_eq!(cfg, Config::default());
    }

    #[test]
    fn save_and_reload_round_trips() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("engraver.toml");
        let mut cfg = Config::default();
        cfg.laser_settings.passes = 3;
        cfg.connection.kind = "serial".to_string();
        cfg.save_to(&path).unwrap();

        let loaded = load_from(Some(path)).unwrap();
        assert_eq!(loaded, cfg);
    }
}

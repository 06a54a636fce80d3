//! Conversions from the configuration document into component settings.
//!
//! `core-config` stays a leaf crate of plain data; the mappings into the
//! layout, compiler and streaming types live here with the orchestrator
//! that owns those components.

use core_compile::{BoldPattern, EngraveStyle};
use core_config::Config;
use core_layout::WorkArea;
use core_stream::{ConnectionSettings, Endpoint};

pub fn work_area(config: &Config) -> WorkArea {
    let area = &config.engraving_area;
    WorkArea {
        machine_width_mm: area.machine_width_mm,
        machine_height_mm: area.machine_height_mm,
        active_width_mm: area.active_width_mm,
        active_height_mm: area.active_height_mm,
        offset_x_mm: area.offset_x_mm,
        offset_y_mm: area.offset_y_mm,
    }
}

pub fn engrave_style(config: &Config) -> EngraveStyle {
    let laser = &config.laser_settings;
    let text = &config.text_settings;
    EngraveStyle {
        power_percent: laser.power_percent,
        feed_mm_min: laser.speed_mm_per_min,
        spindle_max: laser.spindle_max,
        z_height_mm: laser.z_height_mm,
        passes: laser.passes.max(1),
        bold_repeats: text.bold_repeats.max(1),
        bold_offset_mm: text.bold_offset_mm,
        bold_pattern: BoldPattern::from_key(&text.bold_pattern),
        mirror_y: text.mirror_y,
        font_key: text.font.clone(),
    }
}

pub fn connection_settings(config: &Config) -> ConnectionSettings {
    let conn = &config.connection;
    let endpoint = if conn.kind == "serial" {
        Endpoint::Serial {
            path: conn.serial_port.clone(),
            baud: conn.serial_baud,
        }
    } else {
        Endpoint::Tcp {
            host: conn.host.clone(),
            port: conn.port,
        }
    };
    let mut settings = ConnectionSettings::new(endpoint);
    settings.abort_on_alarm = conn.abort_on_alarm;
    settings
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn network_config_maps_to_tcp_endpoint() {
        let config = Config::default();
        let settings = connection_settings(&config);
        assert_eq!(
            settings.endpoint,
            Endpoint::Tcp {
                host: "fluidnc.local".to_string(),
                port: 23
            }
        );
        assert!(!settings.abort_on_alarm);
    }

    #[test]
    fn serial_config_maps_to_serial_endpoint() {
        let mut config = Config::default();
        config.connection.kind = "serial".to_string();
        let settings = connection_settings(&config);
        assert!(matches!(settings.endpoint, Endpoint::Serial { .. }));
    }

    #[test]
    fn style_mapping_clamps_zero_counts() {
        let mut config = Config::default();
        config.laser_settings.passes = 0;
        config.text_settings.bold_repeats = 0;
        config.text_settings.bold_pattern = "concentric".to_string();
        let style = engrave_style(&config);
        assert_eq!(style.passes, 1);
        assert_eq!(style.bold_repeats, 1);
        assert_eq!(style.bold_pattern, BoldPattern::Concentric);
    }
}

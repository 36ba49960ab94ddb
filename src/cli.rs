use clap::Parser;
use std::path::PathBuf;

use crate::engine::sensor::{ConfigError, SensorConfig};

/// Sentry FOV demo: a patrolling guard sweeps a visibility cone across the
/// arena and reports when it sees the player.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Sensor configuration TOML. Built-in defaults are used when omitted.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Override the sensor grid resolution (rays per axis minus one).
    #[arg(short, long)]
    pub resolution: Option<u32>,

    /// Do not draw per-ray debug lines.
    #[arg(long, default_value_t = false)]
    pub hide_rays: bool,
}

impl Cli {
    /// Load the configured sensor settings and apply command-line overrides.
    pub fn sensor_config(&self) -> Result<SensorConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => SensorConfig::load(path)?,
            None => SensorConfig::default(),
        };
        if let Some(resolution) = self.resolution {
            config.resolution = resolution;
        }
        if self.hide_rays {
            config.display_rays = false;
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn overrides_apply_on_top_of_defaults() {
        let cli = Cli::parse_from(["fov_sentry", "--resolution", "6", "--hide-rays"]);
        let config = cli.sensor_config().unwrap();
        assert_eq!(config.resolution, 6);
        assert!(!config.display_rays);
        assert_eq!(config.max_distance, SensorConfig::default().max_distance);
    }

    #[test]
    fn missing_config_file_is_a_read_error() {
        let cli = Cli::parse_from(["fov_sentry", "--config", "/nonexistent/sensor.toml"]);
        assert!(matches!(cli.sensor_config(), Err(ConfigError::Read { .. })));
    }
}

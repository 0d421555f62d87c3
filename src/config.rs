//! # Configuration Management
//!
//! This module handles loading and parsing configuration from the station-config.toml file.
//! It provides a centralized way to configure alert thresholds, sampling, LED timing,
//! button debouncing, GPIO pins and the shutdown policy.
//!
//! Every section and field is optional; anything missing takes the value the
//! station was originally wired with (DHT22, green LED on GPIO27, red LED on
//! GPIO17, button on GPIO16).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::Thresholds;

/// Default config file, looked up in the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "station-config.toml";

/// Floor for `sampler.interval_ms`.
pub const MIN_SAMPLE_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("config IO: {0}")]
    Io(#[from] io::Error),

    #[error("config encoding: {0}")]
    Encode(#[from] toml::ser::Error),
}

/// Application configuration loaded from station-config.toml
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Alert limits
    pub thresholds: Thresholds,
    /// Sensor sampling
    pub sampler: SamplerConfig,
    /// LED patterns and process isolation
    pub indicator: IndicatorConfig,
    /// Button handling
    pub trigger: TriggerConfig,
    /// Reading log
    pub persistence: PersistenceConfig,
    /// Shutdown policy
    pub supervisor: SupervisorConfig,
    /// Pin assignment and device selection
    pub hardware: HardwareConfig,
}

/// Which [`ReadingSource`](crate::source::ReadingSource) the sampler uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Simulated,
    Iio,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Time between readings; a DHT22 cannot be read faster than every 2 s
    pub interval_ms: u64,
    pub source: SourceKind,
    /// IIO device directory of the kernel dht11 driver
    pub iio_device: PathBuf,
    /// Simulated temperature range [min, max) in °C
    pub simulated_temperature: [f64; 2],
    /// Simulated humidity range [min, max) in %RH
    pub simulated_humidity: [f64; 2],
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            source: SourceKind::Simulated,
            iio_device: PathBuf::from("/sys/bus/iio/devices/iio:device0"),
            simulated_temperature: [18.0, 27.0],
            simulated_humidity: [30.0, 55.0],
        }
    }
}

impl SamplerConfig {
    /// Never zero; a timer cannot tick with a zero period.
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms).max(MIN_SAMPLE_INTERVAL)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct IndicatorConfig {
    /// Green LED on-time of the NORMAL heartbeat
    pub heartbeat_on_ms: u64,
    /// Green LED off-time of the NORMAL heartbeat
    pub heartbeat_off_ms: u64,
    /// Red LED half-period of the ALERT blink
    pub blink_ms: u64,
    /// Run the indicator in its own process
    pub isolated: bool,
}

impl Default for IndicatorConfig {
    fn default() -> Self {
        Self {
            heartbeat_on_ms: 500,
            heartbeat_off_ms: 1500,
            blink_ms: 200,
            isolated: true,
        }
    }
}

/// Where button presses come from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EdgeKind {
    /// Each line typed on the terminal is a press
    Stdin,
    /// Physical button on `hardware.button_pin`
    Gpio,
    /// No manual trigger
    None,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct TriggerConfig {
    /// Presses closer than this to the last accepted press are ignored
    pub debounce_ms: u64,
    pub source: EdgeKind,
}

impl Default for TriggerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            source: EdgeKind::Stdin,
        }
    }
}

impl TriggerConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// JSON-lines reading log
    pub path: PathBuf,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("station-readings.jsonl"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// How long the indicator gets to exit after the terminal message
    pub terminate_timeout_ms: u64,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            terminate_timeout_ms: 1000,
        }
    }
}

impl SupervisorConfig {
    pub fn terminate_timeout(&self) -> Duration {
        Duration::from_millis(self.terminate_timeout_ms)
    }
}

/// Which [`OutputDevice`](crate::output::OutputDevice) drives the LEDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputKind {
    /// Log LED changes
    Console,
    /// Real LEDs (requires the `hardware` feature)
    Gpio,
}

/// BCM pin numbers and device selection
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct HardwareConfig {
    pub output: OutputKind,
    /// Green LED
    pub normal_led_pin: u8,
    /// Red LED
    pub alert_led_pin: u8,
    /// Push button, wired to 3V3 (pulled down)
    pub button_pin: u8,
}

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            output: OutputKind::Console,
            normal_led_pin: 27,
            alert_led_pin: 17,
            button_pin: 16,
        }
    }
}

impl Config {
    /// Load configuration from specified path
    /// Falls back to default configuration if file doesn't exist or is invalid
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        match fs::read_to_string(path) {
            Ok(contents) => match toml::from_str::<Config>(&contents) {
                Ok(config) => {
                    tracing::info!(path = %path.display(), "Loaded configuration");
                    config
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "Invalid config file format, using defaults");
                    Self::default()
                }
            },
            Err(_) => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Save current configuration to `path`
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = toml::to_string_pretty(self)?;
        fs::write(path.as_ref(), contents)?;
        tracing::info!(path = %path.as_ref().display(), "Configuration saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.thresholds.temperature_limit, 26.0);
        assert_eq!(config.thresholds.humidity_limit, 60.0);
        assert_eq!(config.sampler.interval(), Duration::from_secs(2));
        assert_eq!(config.indicator.blink_ms, 200);
        assert!(config.indicator.isolated);
        assert_eq!(config.trigger.debounce(), Duration::from_millis(100));
        assert_eq!(
            config.supervisor.terminate_timeout(),
            Duration::from_secs(1)
        );
        assert_eq!(config.hardware.button_pin, 16);
    }

    #[test]
    fn test_config_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("station-config.toml");
        let mut config = Config::default();
        config.thresholds.temperature_limit = 30.5;
        config.hardware.output = OutputKind::Gpio;
        config.save(&path).unwrap();

        let parsed = Config::load_from_path(&path);
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("station-config.toml");
        fs::write(
            &path,
            "[thresholds]\ntemperature_limit = 24.0\n\n[indicator]\nisolated = false\n",
        )
        .unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.thresholds.temperature_limit, 24.0);
        assert_eq!(config.thresholds.humidity_limit, 60.0);
        assert!(!config.indicator.isolated);
        assert_eq!(config.indicator.heartbeat_on_ms, 500);
        assert_eq!(config.sampler.source, SourceKind::Simulated);
    }

    #[test]
    fn test_invalid_file_falls_back() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("station-config.toml");
        fs::write(&path, "[sampler]\ninterval_ms = \"soon\"\n").unwrap();
        assert_eq!(Config::load_from_path(&path), Config::default());
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("station-config.toml");
        fs::write(&path, "[sampler]\ninterval_ms = 0\n").unwrap();

        let config = Config::load_from_path(&path);
        assert_eq!(config.sampler.interval_ms, 0);
        assert_eq!(config.sampler.interval(), MIN_SAMPLE_INTERVAL);
    }

    #[test]
    fn test_load_nonexistent_file() {
        let config = Config::load_from_path("/nonexistent/path");
        assert_eq!(config, Config::default());
    }
}

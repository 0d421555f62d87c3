//! # Weather Station Core Library
//!
//! This library provides the monitoring pipeline for a small Raspberry Pi
//! weather station: a DHT22-class temperature/humidity sensor, a green/red LED
//! pair and a push button that logs the current reading on demand.
//!
//! ## Pipeline
//!
//! ```text
//!  ReadingSource ──► Sampler ──► SharedState ◄── ManualTrigger ──► PersistenceSink
//!                       │              ▲
//!                       │              └──────── ObservationPort
//!                       ▼
//!              StateNotification channel ──► IndicatorDriver ──► OutputDevice
//!                                               (task or child process)
//! ```
//!
//! - **Sampler** reads the sensor on a fixed interval, writes [`SharedState`]
//!   and notifies the indicator only when the alert state flips.
//! - **IndicatorDriver** blinks the LEDs: a slow heartbeat while NORMAL, a fast
//!   blink while ALERT. It may live in a separate process and then only sees
//!   the notifications it receives over its stdin.
//! - **ManualTrigger** debounces button edges and persists a snapshot.
//! - **Supervisor** wires everything and owns the dual-path shutdown.
//!
//! ## Core Types
//!
//! - [`Reading`]: one sampled temperature/humidity pair
//! - [`AlertState`]: NORMAL or ALERT, derived by [`Thresholds::derive`]
//! - [`SharedSnapshot`]: the reading/state pair every reader copies out
//!
//! [`SharedState`]: shared_state::SharedState

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// Module declarations
pub mod config;
pub mod gpio;
pub mod indicator;
pub mod isolation;
pub mod notification;
pub mod observation;
pub mod output;
pub mod persistence;
pub mod sampler;
pub mod shared_state;
pub mod source;
pub mod supervisor;
pub mod trigger;

#[cfg(test)]
mod tests;

/// One temperature/humidity sample.
///
/// Readings are immutable once produced; consumers copy them.
///
/// # Example
/// ```
/// use weather_station_lib::Reading;
///
/// let reading = Reading::new(21.5, 48.0);
/// assert_eq!(reading.temperature, 21.5);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Reading {
    /// Degrees Celsius
    pub temperature: f64,
    /// Relative humidity in percent
    pub humidity: f64,
    /// When the sensor produced this value
    pub captured_at: DateTime<Utc>,
}

impl Reading {
    /// Create a reading stamped with the current time.
    pub fn new(temperature: f64, humidity: f64) -> Self {
        Self {
            temperature,
            humidity,
            captured_at: Utc::now(),
        }
    }

    /// The placeholder reading held before the first sample arrives.
    pub fn zero() -> Self {
        Self {
            temperature: 0.0,
            humidity: 0.0,
            captured_at: DateTime::<Utc>::default(),
        }
    }
}

/// Alert condition derived from a [`Reading`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertState {
    #[default]
    Normal,
    Alert,
}

impl AlertState {
    pub fn is_alert(self) -> bool {
        self == AlertState::Alert
    }
}

impl std::fmt::Display for AlertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AlertState::Normal => f.write_str("NORMAL"),
            AlertState::Alert => f.write_str("ALERT"),
        }
    }
}

/// Threshold rule turning a [`Reading`] into an [`AlertState`].
///
/// Limits are exclusive: a reading exactly at the limit is still NORMAL.
///
/// # Example
/// ```
/// use weather_station_lib::{AlertState, Reading, Thresholds};
///
/// let limits = Thresholds { temperature_limit: 26.0, humidity_limit: 60.0 };
/// assert_eq!(limits.derive(&Reading::new(30.0, 50.0)), AlertState::Alert);
/// assert_eq!(limits.derive(&Reading::new(26.0, 60.0)), AlertState::Normal);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Thresholds {
    /// Temperature above which the station raises an alert (°C)
    pub temperature_limit: f64,
    /// Humidity above which the station raises an alert (%RH)
    pub humidity_limit: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            temperature_limit: 26.0,
            humidity_limit: 60.0,
        }
    }
}

impl Thresholds {
    /// ALERT iff either value exceeds its limit.
    pub fn derive(&self, reading: &Reading) -> AlertState {
        if reading.temperature > self.temperature_limit || reading.humidity > self.humidity_limit {
            AlertState::Alert
        } else {
            AlertState::Normal
        }
    }
}

/// The current reading together with the state derived from it.
///
/// Exactly one lives inside [`shared_state::SharedState`]; everyone else
/// works with copies.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct SharedSnapshot {
    pub reading: Reading,
    pub state: AlertState,
}

impl Default for SharedSnapshot {
    fn default() -> Self {
        Self {
            reading: Reading::zero(),
            state: AlertState::Normal,
        }
    }
}

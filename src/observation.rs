//! # Observation Port
//!
//! Read-only view of the station for operators: the live snapshot from
//! [`SharedState`] and the history kept by the reading log.
//!
//! The running daemon answers a few commands typed on its terminal (see
//! [`ConsoleCommands`]); the `latest`, `history` and `stats` subcommands
//! read the log directly without a running daemon.

use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::persistence::{RecordStore, Statistics, StorageError, StoredRecord};
use crate::shared_state::SharedState;
use crate::{AlertState, SharedSnapshot};

/// No reading has been sampled since startup.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("no reading available yet")]
pub struct Unavailable;

/// Query surface over the station.
pub trait ObservationPort: Send + Sync {
    /// Current snapshot, once the first reading exists.
    fn latest(&self) -> Result<SharedSnapshot, Unavailable>;

    /// The alert is threshold-derived; resetting re-applies the rule and
    /// returns the resulting state.
    fn reset_alert(&self) -> AlertState;

    fn recent(&self, limit: usize) -> Result<Vec<StoredRecord>, StorageError>;

    fn statistics(&self) -> Result<Option<Statistics>, StorageError>;
}

/// [`ObservationPort`] over the live state and a record store.
#[derive(Clone)]
pub struct StationObserver {
    state: SharedState,
    store: Arc<dyn RecordStore>,
}

impl StationObserver {
    pub fn new(state: SharedState, store: Arc<dyn RecordStore>) -> Self {
        Self { state, store }
    }
}

impl ObservationPort for StationObserver {
    fn latest(&self) -> Result<SharedSnapshot, Unavailable> {
        self.state.read_sampled().ok_or(Unavailable)
    }

    fn reset_alert(&self) -> AlertState {
        let state = self.state.rederive();
        if state.is_alert() {
            tracing::info!("Alert reset requested but reading is still over the limit");
        }
        state
    }

    fn recent(&self, limit: usize) -> Result<Vec<StoredRecord>, StorageError> {
        self.store.recent(limit)
    }

    fn statistics(&self) -> Result<Option<Statistics>, StorageError> {
        self.store.statistics()
    }
}

/// JSON body answering `status`.
#[derive(Debug, Serialize)]
struct Status<'a> {
    temperature: f64,
    humidity: f64,
    alert: bool,
    captured_at: &'a chrono::DateTime<chrono::Utc>,
}

/// Terminal commands understood while the station runs.
///
/// | Command         | Answer                              |
/// |-----------------|-------------------------------------|
/// | `status`        | current reading and alert flag      |
/// | `reset`         | re-derived alert state              |
/// | `history [N]`   | last N logged readings (default 20) |
/// | `stats`         | aggregates over the log             |
pub struct ConsoleCommands<P: ObservationPort> {
    port: P,
}

impl<P: ObservationPort> ConsoleCommands<P> {
    pub fn new(port: P) -> Self {
        Self { port }
    }

    /// `None` if `line` is not a command (it is then a button press).
    pub fn handle(&self, line: &str) -> Option<String> {
        let mut words = line.split_whitespace();
        let answer = match words.next()? {
            "status" => match self.port.latest() {
                Ok(snapshot) => to_json(&Status {
                    temperature: snapshot.reading.temperature,
                    humidity: snapshot.reading.humidity,
                    alert: snapshot.state.is_alert(),
                    captured_at: &snapshot.reading.captured_at,
                }),
                Err(e) => e.to_string(),
            },
            "reset" => format!("alert state: {}", self.port.reset_alert()),
            "history" => {
                let limit = words.next().and_then(|n| n.parse().ok()).unwrap_or(20);
                match self.port.recent(limit) {
                    Ok(records) => to_json(&records),
                    Err(e) => format!("history unavailable: {e}"),
                }
            }
            "stats" => match self.port.statistics() {
                Ok(Some(stats)) => to_json(&stats),
                Ok(None) => "not enough data".to_string(),
                Err(e) => format!("statistics unavailable: {e}"),
            },
            _ => return None,
        };
        Some(answer)
    }
}

fn to_json<T: Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|e| format!("encoding failed: {e}"))
}

//! # Reading Log
//!
//! Append-only storage for readings logged with the button.
//!
//! ## Storage Format
//! - **Location**: `station-readings.jsonl` next to the config by default
//! - **Format**: one JSON object per line, so a crash mid-write loses at most
//!   the last line and the file stays greppable on the Pi
//! - **Ids**: sequential, continuing after the highest id already on disk
//!
//! ```text
//! {"id":1,"captured_at":"2025-03-02T10:15:00Z","temperature":24.1,"humidity":41.0,"state":"NORMAL"}
//! {"id":2,"captured_at":"2025-03-02T10:20:00Z","temperature":27.3,"humidity":44.5,"state":"ALERT"}
//! ```
//!
//! Writes are best-effort from the pipeline's point of view: the trigger logs
//! a [`StorageError`] and carries on.

use std::fs::{self, OpenOptions};
use std::io::{self, BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{AlertState, Reading};

/// Errors from the reading log.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Log file operations failed (permissions, disk space)
    #[error("storage IO: {0}")]
    Io(#[from] io::Error),

    /// A record could not be encoded
    #[error("storage encoding: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Identifier assigned to a stored record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(pub u64);

impl std::fmt::Display for RecordId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// One persisted reading.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StoredRecord {
    pub id: RecordId,
    pub captured_at: DateTime<Utc>,
    pub temperature: f64,
    pub humidity: f64,
    pub state: AlertState,
}

impl StoredRecord {
    fn new(id: RecordId, reading: &Reading, state: AlertState) -> Self {
        Self {
            id,
            captured_at: reading.captured_at,
            temperature: reading.temperature,
            humidity: reading.humidity,
            state,
        }
    }
}

/// Aggregates over the whole log.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Statistics {
    pub total: usize,
    pub temperature_mean: f64,
    pub temperature_max: f64,
    pub temperature_min: f64,
    pub humidity_mean: f64,
    pub humidity_max: f64,
    pub humidity_min: f64,
    pub alert_count: usize,
}

impl Statistics {
    /// `None` for an empty slice. Means are rounded to one decimal.
    pub fn from_records(records: &[StoredRecord]) -> Option<Self> {
        if records.is_empty() {
            return None;
        }
        let total = records.len();
        let mut stats = Statistics {
            total,
            temperature_mean: 0.0,
            temperature_max: f64::NEG_INFINITY,
            temperature_min: f64::INFINITY,
            humidity_mean: 0.0,
            humidity_max: f64::NEG_INFINITY,
            humidity_min: f64::INFINITY,
            alert_count: 0,
        };
        for record in records {
            stats.temperature_mean += record.temperature;
            stats.temperature_max = stats.temperature_max.max(record.temperature);
            stats.temperature_min = stats.temperature_min.min(record.temperature);
            stats.humidity_mean += record.humidity;
            stats.humidity_max = stats.humidity_max.max(record.humidity);
            stats.humidity_min = stats.humidity_min.min(record.humidity);
            if record.state.is_alert() {
                stats.alert_count += 1;
            }
        }
        stats.temperature_mean = round1(stats.temperature_mean / total as f64);
        stats.humidity_mean = round1(stats.humidity_mean / total as f64);
        Some(stats)
    }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

/// Where the manual trigger sends snapshots.
pub trait PersistenceSink: Send + Sync {
    fn write(&self, reading: &Reading, state: AlertState) -> Result<RecordId, StorageError>;
}

impl<T: PersistenceSink + ?Sized> PersistenceSink for Arc<T> {
    fn write(&self, reading: &Reading, state: AlertState) -> Result<RecordId, StorageError> {
        (**self).write(reading, state)
    }
}

/// A sink that can also be queried.
pub trait RecordStore: PersistenceSink {
    /// Every record in insertion order.
    fn records(&self) -> Result<Vec<StoredRecord>, StorageError>;

    fn latest(&self) -> Result<Option<StoredRecord>, StorageError> {
        Ok(self.records()?.pop())
    }

    /// The last `limit` records, oldest first.
    fn recent(&self, limit: usize) -> Result<Vec<StoredRecord>, StorageError> {
        let mut records = self.records()?;
        let skip = records.len().saturating_sub(limit);
        Ok(records.split_off(skip))
    }

    fn statistics(&self) -> Result<Option<Statistics>, StorageError> {
        Ok(Statistics::from_records(&self.records()?))
    }
}

/// JSON-lines file store.
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    next_id: Mutex<u64>,
}

impl JsonlStore {
    /// Open (or lazily create) the log at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let last_id = read_records(&path)?
            .iter()
            .map(|record| record.id.0)
            .max()
            .unwrap_or(0);
        Ok(Self {
            path,
            next_id: Mutex::new(last_id + 1),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PersistenceSink for JsonlStore {
    fn write(&self, reading: &Reading, state: AlertState) -> Result<RecordId, StorageError> {
        let mut next_id = self.next_id.lock().unwrap_or_else(|p| p.into_inner());
        let record = StoredRecord::new(RecordId(*next_id), reading, state);

        let mut line = serde_json::to_vec(&record)?;
        line.push(b'\n');
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.write_all(&line)?;
        file.flush()?;

        *next_id += 1;
        Ok(record.id)
    }
}

impl RecordStore for JsonlStore {
    fn records(&self) -> Result<Vec<StoredRecord>, StorageError> {
        read_records(&self.path)
    }
}

/// Load every parseable line; a missing file is an empty log.
fn read_records(path: &Path) -> Result<Vec<StoredRecord>, StorageError> {
    let file = match fs::File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut records = Vec::new();
    for (index, line) in BufReader::new(file).lines().enumerate() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<StoredRecord>(&line) {
            Ok(record) => records.push(record),
            Err(e) => {
                tracing::warn!(path = %path.display(), line = index + 1, error = %e, "Skipping unreadable record");
            }
        }
    }
    Ok(records)
}

/// In-memory store for tests and runs without a writable disk.
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: Mutex<Vec<StoredRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, Vec<StoredRecord>> {
        self.records.lock().unwrap_or_else(|p| p.into_inner())
    }
}

impl PersistenceSink for MemoryStore {
    fn write(&self, reading: &Reading, state: AlertState) -> Result<RecordId, StorageError> {
        let mut records = self.guard();
        let id = RecordId(records.len() as u64 + 1);
        records.push(StoredRecord::new(id, reading, state));
        Ok(id)
    }
}

impl RecordStore for MemoryStore {
    fn records(&self) -> Result<Vec<StoredRecord>, StorageError> {
        Ok(self.guard().clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn reading(temperature: f64, humidity: f64) -> Reading {
        Reading::new(temperature, humidity)
    }

    #[test]
    fn jsonl_store_appends_with_sequential_ids() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("readings.jsonl");
        let store = JsonlStore::open(&path).unwrap();

        assert_eq!(
            store.write(&reading(22.0, 40.0), AlertState::Normal).unwrap(),
            RecordId(1)
        );
        assert_eq!(
            store.write(&reading(28.0, 45.0), AlertState::Alert).unwrap(),
            RecordId(2)
        );

        let contents = fs::read_to_string(&path).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.lines().nth(1).unwrap().contains("\"state\":\"ALERT\""));
    }

    #[test]
    fn reopened_store_continues_numbering() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("readings.jsonl");
        {
            let store = JsonlStore::open(&path).unwrap();
            store.write(&reading(20.0, 30.0), AlertState::Normal).unwrap();
            store.write(&reading(21.0, 31.0), AlertState::Normal).unwrap();
        }
        let store = JsonlStore::open(&path).unwrap();
        assert_eq!(
            store.write(&reading(22.0, 32.0), AlertState::Normal).unwrap(),
            RecordId(3)
        );
        assert_eq!(store.records().unwrap().len(), 3);
    }

    #[test]
    fn corrupt_lines_are_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("readings.jsonl");
        let store = JsonlStore::open(&path).unwrap();
        store.write(&reading(20.0, 30.0), AlertState::Normal).unwrap();

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        writeln!(file, "{{\"id\":").unwrap();
        drop(file);

        store.write(&reading(27.0, 30.0), AlertState::Alert).unwrap();
        let records = store.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].state, AlertState::Alert);
    }

    #[test]
    fn missing_file_is_an_empty_log() {
        let dir = TempDir::new().unwrap();
        let store = JsonlStore::open(dir.path().join("none.jsonl")).unwrap();
        assert!(store.latest().unwrap().is_none());
        assert!(store.statistics().unwrap().is_none());
        assert!(store.recent(20).unwrap().is_empty());
    }

    #[test]
    fn unwritable_path_reports_storage_error() {
        let dir = TempDir::new().unwrap();
        // Parent directory does not exist
        let store = JsonlStore::open(dir.path().join("missing-dir").join("x.jsonl")).unwrap();
        assert!(matches!(
            store.write(&reading(20.0, 30.0), AlertState::Normal),
            Err(StorageError::Io(_))
        ));
    }

    #[test]
    fn recent_returns_last_records_oldest_first() {
        let store = MemoryStore::new();
        for t in 0..5 {
            store
                .write(&reading(20.0 + t as f64, 40.0), AlertState::Normal)
                .unwrap();
        }
        let recent = store.recent(2).unwrap();
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].id, RecordId(4));
        assert_eq!(recent[1].id, RecordId(5));
        assert_eq!(store.recent(50).unwrap().len(), 5);
        assert_eq!(store.latest().unwrap().unwrap().temperature, 24.0);
    }

    #[test]
    fn statistics_aggregate_the_log() {
        let store = MemoryStore::new();
        store.write(&reading(20.0, 40.0), AlertState::Normal).unwrap();
        store.write(&reading(25.0, 50.0), AlertState::Normal).unwrap();
        store.write(&reading(27.5, 65.0), AlertState::Alert).unwrap();

        let stats = store.statistics().unwrap().unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.temperature_mean, 24.2);
        assert_eq!(stats.temperature_max, 27.5);
        assert_eq!(stats.temperature_min, 20.0);
        assert_eq!(stats.humidity_mean, 51.7);
        assert_eq!(stats.humidity_max, 65.0);
        assert_eq!(stats.humidity_min, 40.0);
        assert_eq!(stats.alert_count, 1);
    }
}

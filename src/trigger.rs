//! # Manual Trigger
//!
//! The push button logs the current reading. Edge sources only report raw
//! activations; debouncing happens here, against the last accepted press.
//!
//! The handler runs synchronously on whatever thread the edge source uses
//! (rppal's interrupt thread, the stdin reader thread), so it stays short:
//! copy the snapshot, append one line, return.

use std::io::{self, BufRead};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;

use crate::persistence::{PersistenceSink, RecordId};
use crate::shared_state::SharedState;

#[derive(Error, Debug)]
pub enum TriggerError {
    /// Reader thread could not be started
    #[error("edge source IO: {0}")]
    Io(#[from] io::Error),

    /// Button pin could not be configured
    #[error("GPIO error: {0}")]
    Gpio(String),
}

/// Refractory-window filter for edge activations.
#[derive(Debug, Clone)]
pub struct Debouncer {
    window: Duration,
    last_accepted: Option<Instant>,
}

impl Debouncer {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            last_accepted: None,
        }
    }

    /// `true` if an activation at `now` counts as a new press.
    pub fn accept(&mut self, now: Instant) -> bool {
        match self.last_accepted {
            Some(last) if now.saturating_duration_since(last) < self.window => false,
            _ => {
                self.last_accepted = Some(now);
                true
            }
        }
    }
}

/// What happened to one activation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    /// Within the refractory window of the previous press
    Debounced,
    /// Snapshot stored
    Stored(RecordId),
    /// Sink refused the write (already logged)
    Failed,
}

/// Button handler: debounce, snapshot, persist.
pub struct ManualTrigger {
    state: SharedState,
    sink: Arc<dyn PersistenceSink>,
    debouncer: Debouncer,
}

impl ManualTrigger {
    pub fn new(state: SharedState, sink: Arc<dyn PersistenceSink>, debounce: Duration) -> Self {
        Self {
            state,
            sink,
            debouncer: Debouncer::new(debounce),
        }
    }

    /// Handle one activation edge observed at `at`.
    pub fn on_edge(&mut self, at: Instant) -> TriggerOutcome {
        if !self.debouncer.accept(at) {
            tracing::debug!("Button bounce ignored");
            return TriggerOutcome::Debounced;
        }

        // read() copies; the state lock is released before the sink runs
        let snapshot = self.state.read();
        match self.sink.write(&snapshot.reading, snapshot.state) {
            Ok(id) => {
                tracing::info!(
                    %id,
                    temperature = snapshot.reading.temperature,
                    humidity = snapshot.reading.humidity,
                    state = %snapshot.state,
                    "Reading logged"
                );
                TriggerOutcome::Stored(id)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to log reading");
                TriggerOutcome::Failed
            }
        }
    }

    /// Start receiving edges from `source`. Delivery stops when the guard drops.
    pub fn attach(mut self, source: Box<dyn EdgeSource>) -> Result<EdgeGuard, TriggerError> {
        source.start(Box::new(move |at| {
            self.on_edge(at);
        }))
    }
}

/// Callback invoked once per raw activation edge.
pub type EdgeCallback = Box<dyn FnMut(Instant) + Send + 'static>;

/// Keeps an edge source running; dropping it stops delivery.
pub struct EdgeGuard {
    _inner: Box<dyn Send>,
}

impl EdgeGuard {
    pub fn new<T: Send + 'static>(inner: T) -> Self {
        Self {
            _inner: Box::new(inner),
        }
    }
}

impl std::fmt::Debug for EdgeGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EdgeGuard").finish_non_exhaustive()
    }
}

/// Something that reports button presses asynchronously.
pub trait EdgeSource: Send {
    fn start(self: Box<Self>, on_edge: EdgeCallback) -> Result<EdgeGuard, TriggerError>;
}

/// Handler for stdin lines that are commands rather than presses.
pub type CommandHandler = Box<dyn FnMut(&str) -> Option<String> + Send + 'static>;

/// Every line on standard input is one press, unless a command handler
/// claims it (its answer is printed to stdout).
pub struct StdinEdgeSource {
    commands: CommandHandler,
}

impl StdinEdgeSource {
    pub fn with_commands(commands: CommandHandler) -> Self {
        Self { commands }
    }
}

struct StopOnDrop(Arc<AtomicBool>);

impl Drop for StopOnDrop {
    fn drop(&mut self) {
        self.0.store(true, Ordering::Release);
    }
}

impl EdgeSource for StdinEdgeSource {
    fn start(self: Box<Self>, mut on_edge: EdgeCallback) -> Result<EdgeGuard, TriggerError> {
        let mut commands = self.commands;
        let stopped = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped);

        // The thread stays blocked in read_line until the next line or EOF;
        // after the guard drops it just stops calling back.
        thread::Builder::new()
            .name("stdin-button".into())
            .spawn(move || {
                let stdin = io::stdin();
                let mut line = String::new();
                loop {
                    line.clear();
                    match stdin.lock().read_line(&mut line) {
                        Ok(0) => {
                            tracing::debug!("stdin closed, no more manual triggers");
                            break;
                        }
                        Ok(_) if flag.load(Ordering::Acquire) => break,
                        Ok(_) => match commands(line.trim()) {
                            Some(answer) => println!("{answer}"),
                            None => on_edge(Instant::now()),
                        },
                        Err(e) => {
                            tracing::warn!(error = %e, "stdin read failed");
                            break;
                        }
                    }
                }
            })?;

        Ok(EdgeGuard::new(StopOnDrop(stopped)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::{MemoryStore, RecordStore, StorageError};
    use crate::{AlertState, Reading, Thresholds};

    struct FailingSink;

    impl PersistenceSink for FailingSink {
        fn write(&self, _: &Reading, _: AlertState) -> Result<RecordId, StorageError> {
            Err(StorageError::Io(io::Error::other("disk full")))
        }
    }

    fn trigger_with(sink: Arc<dyn PersistenceSink>) -> (SharedState, ManualTrigger) {
        let state = SharedState::new(Thresholds::default());
        let trigger = ManualTrigger::new(state.clone(), sink, Duration::from_millis(100));
        (state, trigger)
    }

    #[test]
    fn debouncer_measures_from_last_accepted_press() {
        let t0 = Instant::now();
        let mut debouncer = Debouncer::new(Duration::from_millis(100));
        assert!(debouncer.accept(t0));
        assert!(!debouncer.accept(t0 + Duration::from_millis(60)));
        // Still inside the window opened at t0, not at the bounce
        assert!(!debouncer.accept(t0 + Duration::from_millis(99)));
        assert!(debouncer.accept(t0 + Duration::from_millis(100)));
    }

    #[test]
    fn presses_inside_window_store_once() {
        let store = Arc::new(MemoryStore::new());
        let (state, mut trigger) = trigger_with(store.clone());
        state.write(Reading::new(24.0, 45.0));

        let t0 = Instant::now();
        assert!(matches!(trigger.on_edge(t0), TriggerOutcome::Stored(_)));
        assert_eq!(
            trigger.on_edge(t0 + Duration::from_millis(30)),
            TriggerOutcome::Debounced
        );
        assert_eq!(store.records().unwrap().len(), 1);
    }

    #[test]
    fn presses_beyond_window_store_twice() {
        let store = Arc::new(MemoryStore::new());
        let (state, mut trigger) = trigger_with(store.clone());

        let t0 = Instant::now();
        state.write(Reading::new(24.0, 45.0));
        trigger.on_edge(t0);
        state.write(Reading::new(29.0, 45.0));
        trigger.on_edge(t0 + Duration::from_millis(250));

        let records = store.records().unwrap();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].state, AlertState::Normal);
        assert_eq!(records[1].state, AlertState::Alert);
        assert_eq!(records[1].temperature, 29.0);
    }

    #[test]
    fn sink_failure_is_contained() {
        let (state, mut trigger) = trigger_with(Arc::new(FailingSink));
        let t0 = Instant::now();
        assert_eq!(trigger.on_edge(t0), TriggerOutcome::Failed);
        // The handler and the shared state keep working
        assert_eq!(state.write(Reading::new(30.0, 20.0)), AlertState::Alert);
        assert_eq!(
            trigger.on_edge(t0 + Duration::from_secs(1)),
            TriggerOutcome::Failed
        );
    }

    struct ScriptedEdges(Vec<Duration>);

    impl EdgeSource for ScriptedEdges {
        fn start(self: Box<Self>, mut on_edge: EdgeCallback) -> Result<EdgeGuard, TriggerError> {
            let t0 = Instant::now();
            for offset in self.0 {
                on_edge(t0 + offset);
            }
            Ok(EdgeGuard::new(()))
        }
    }

    #[test]
    fn attach_routes_edges_through_debounce() {
        let store = Arc::new(MemoryStore::new());
        let (_state, trigger) = trigger_with(store.clone());
        let edges = ScriptedEdges(vec![
            Duration::ZERO,
            Duration::from_millis(20),
            Duration::from_millis(500),
        ]);
        let _guard = trigger.attach(Box::new(edges)).unwrap();
        assert_eq!(store.records().unwrap().len(), 2);
    }
}

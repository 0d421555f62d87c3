//! # Sampler
//!
//! Reads the sensor on a fixed tick, stores the reading in [`SharedState`] and
//! tells the indicator when the alert state flips. Repeated states are not
//! re-sent. A failed reading skips the cycle; the next tick tries again.
//!
//! Cancellation is checked between cycles. The sampler never sends the
//! terminal notification; the supervisor does that after the sampler stops.
//!
//! Inside [`Sampler::run`] the sensor is read on tokio's blocking pool: a
//! dht11 sysfs read can stall for hundreds of milliseconds while the kernel
//! retries the transfer.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::config::MIN_SAMPLE_INTERVAL;
use crate::notification::{NotificationSender, StateNotification};
use crate::shared_state::SharedState;
use crate::source::{ReadingSource, SourceError};
use crate::{AlertState, Reading};

type SharedSource = Arc<Mutex<Box<dyn ReadingSource>>>;

/// What a single sampling cycle did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cycle {
    /// Stored a reading; state same as last announced
    Unchanged(AlertState),
    /// Stored a reading and announced the new state
    Changed(AlertState),
    /// Source unavailable, nothing stored
    Skipped,
}

pub struct Sampler {
    source: SharedSource,
    state: SharedState,
    notify: NotificationSender,
    interval: Duration,
    /// Last state sent to the indicator (which starts out NORMAL)
    announced: AlertState,
    indicator_gone: bool,
}

impl Sampler {
    pub fn new(
        source: Box<dyn ReadingSource>,
        state: SharedState,
        notify: NotificationSender,
        interval: Duration,
    ) -> Self {
        Self {
            source: Arc::new(Mutex::new(source)),
            state,
            notify,
            interval: interval.max(MIN_SAMPLE_INTERVAL),
            announced: AlertState::Normal,
            indicator_gone: false,
        }
    }

    /// Run one sampling cycle, reading the sensor on the calling thread.
    pub fn sample_once(&mut self) -> Cycle {
        let result = read_source(&self.source);
        self.record(result)
    }

    /// Run one sampling cycle with the sensor read on the blocking pool.
    async fn sample_blocking(&mut self) -> Cycle {
        let source = Arc::clone(&self.source);
        let result = match tokio::task::spawn_blocking(move || read_source(&source)).await {
            Ok(result) => result,
            Err(e) => Err(SourceError::Unavailable(format!("sensor read aborted: {e}"))),
        };
        self.record(result)
    }

    fn record(&mut self, result: Result<Reading, SourceError>) -> Cycle {
        let reading = match result {
            Ok(reading) => reading,
            Err(e) => {
                tracing::warn!(error = %e, "Sensor read failed, skipping cycle");
                return Cycle::Skipped;
            }
        };

        let state = self.state.write(reading);
        tracing::info!(
            temperature = reading.temperature,
            humidity = reading.humidity,
            %state,
            "Sample"
        );

        if state == self.announced {
            return Cycle::Unchanged(state);
        }

        self.announced = state;
        if self.notify.send(StateNotification::State { state }).is_err() && !self.indicator_gone {
            self.indicator_gone = true;
            tracing::warn!("Indicator channel closed; state changes are no longer shown");
        }
        Cycle::Changed(state)
    }

    /// Sample every `interval` until `cancel` fires.
    pub async fn run(mut self, cancel: CancellationToken) {
        tracing::info!(interval_ms = self.interval.as_millis() as u64, "Sampler started");

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    tracing::info!("Sampler stopping");
                    break;
                }
                _ = ticker.tick() => {
                    self.sample_blocking().await;
                }
            }
        }
    }
}

// A source that panicked mid-read is still usable for the next tick.
fn read_source(source: &Mutex<Box<dyn ReadingSource>>) -> Result<Reading, SourceError> {
    let mut source = source.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
    source.produce_reading()
}

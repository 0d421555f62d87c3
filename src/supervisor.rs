//! # Supervisor
//!
//! Owns the running station: the sampler task, the indicator (a task or a
//! child process) and the button. It creates the notification channel and
//! hands its ends to the sampler and the indicator.
//!
//! ## Shutdown order
//! 1. Stop button delivery
//! 2. Cancel the sampler and wait for it
//! 3. Send the terminal marker and drop the sender
//! 4. Wait up to `terminate_timeout` for the indicator, then force it
//!    (abort the task or kill the child)
//! 5. Reopen the output and switch every LED off, whichever way step 4 went

use std::future::Future;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::process::Child;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::indicator::{IndicatorDriver, IndicatorError, Patterns};
use crate::isolation::{IndicatorProcess, ProcessSpec};
use crate::notification::{NotificationSender, StateNotification};
use crate::output::{BoxedOutput, OutputError};
use crate::persistence::PersistenceSink;
use crate::sampler::Sampler;
use crate::shared_state::SharedState;
use crate::source::ReadingSource;
use crate::trigger::{EdgeGuard, EdgeSource, ManualTrigger};

#[derive(Error, Debug)]
pub enum SupervisorError {
    /// Indicator child could not be started
    #[error("failed to spawn indicator process: {0}")]
    Spawn(#[source] io::Error),

    /// In-process indicator could not get its LEDs
    #[error("indicator output: {0}")]
    Output(#[from] OutputError),
}

/// Opens the LED device; called once for an in-process indicator and once
/// more at shutdown to force the LEDs off.
pub type OutputOpener = Arc<dyn Fn() -> Result<BoxedOutput, OutputError> + Send + Sync>;

/// Where the indicator runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndicatorLaunch {
    InProcess,
    Process(ProcessSpec),
}

/// How the indicator stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownOutcome {
    /// Exited by itself before the timeout
    Cooperative,
    /// Aborted or killed after the timeout
    Forced,
    /// Went away before shutdown, or exited with a failure
    Crashed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownReport {
    pub outcome: ShutdownOutcome,
    /// The final all-off went through
    pub leds_off: bool,
}

/// Everything the supervisor wires together.
pub struct Components {
    pub state: SharedState,
    pub source: Box<dyn ReadingSource>,
    pub sink: Arc<dyn PersistenceSink>,
    /// `None` runs without a button
    pub edges: Option<Box<dyn EdgeSource>>,
    pub open_output: OutputOpener,
    pub indicator: IndicatorLaunch,
}

enum IndicatorHandle {
    Task(JoinHandle<Result<(), IndicatorError>>),
    Process {
        monitor: JoinHandle<ShutdownOutcome>,
        /// Carries the terminate timeout once shutdown begins
        stop: oneshot::Sender<Duration>,
        bridge: JoinHandle<()>,
    },
}

impl IndicatorHandle {
    /// Hand the child to a monitor task that owns it until shutdown.
    fn watch(process: IndicatorProcess) -> Self {
        let pid = process.id();
        let IndicatorProcess { child, bridge } = process;
        let (stop, stop_rx) = oneshot::channel();
        let monitor = tokio::spawn(monitor_process(child, pid, stop_rx));
        IndicatorHandle::Process {
            monitor,
            stop,
            bridge,
        }
    }

    async fn stop(self, timeout: Duration) -> ShutdownOutcome {
        match self {
            IndicatorHandle::Task(mut task) => match tokio::time::timeout(timeout, &mut task).await {
                Ok(Ok(Ok(()))) => ShutdownOutcome::Cooperative,
                Ok(Ok(Err(e))) => {
                    tracing::error!(error = %e, "Indicator had already stopped");
                    ShutdownOutcome::Crashed
                }
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Indicator task failed");
                    ShutdownOutcome::Crashed
                }
                Err(_) => {
                    tracing::warn!(timeout_ms = timeout.as_millis() as u64, "Indicator did not stop in time, aborting");
                    task.abort();
                    let _ = task.await;
                    ShutdownOutcome::Forced
                }
            },
            IndicatorHandle::Process {
                monitor,
                stop,
                bridge,
            } => {
                // Err means the monitor already saw the child go
                let _ = stop.send(timeout);
                let outcome = match monitor.await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        tracing::error!(error = %e, "Indicator monitor failed");
                        ShutdownOutcome::Crashed
                    }
                };
                bridge.abort();
                let _ = bridge.await;
                outcome
            }
        }
    }
}

/// Owns the indicator child: reports an exit that comes before shutdown,
/// then applies the bounded wait and the kill once shutdown starts.
async fn monitor_process(
    mut child: Child,
    pid: Option<u32>,
    stop: oneshot::Receiver<Duration>,
) -> ShutdownOutcome {
    let timeout = tokio::select! {
        // Shutdown first: the child may already be exiting on the terminal marker
        biased;
        timeout = stop => timeout.unwrap_or(Duration::ZERO),
        status = child.wait() => {
            match status {
                Ok(status) => tracing::error!(?pid, %status, "Indicator process exited before shutdown; LEDs no longer follow the alert state"),
                Err(e) => tracing::error!(?pid, error = %e, "Lost track of indicator process"),
            }
            return ShutdownOutcome::Crashed;
        }
    };

    match tokio::time::timeout(timeout, child.wait()).await {
        Ok(Ok(status)) if status.success() => {
            tracing::info!(?pid, %status, "Indicator process exited");
            ShutdownOutcome::Cooperative
        }
        Ok(Ok(status)) => {
            tracing::error!(?pid, %status, "Indicator process failed while stopping");
            ShutdownOutcome::Crashed
        }
        Ok(Err(e)) => {
            tracing::error!(?pid, error = %e, "Lost track of indicator process, killing");
            kill(&mut child).await;
            ShutdownOutcome::Forced
        }
        Err(_) => {
            tracing::warn!(?pid, timeout_ms = timeout.as_millis() as u64, "Indicator process did not exit in time, killing");
            kill(&mut child).await;
            ShutdownOutcome::Forced
        }
    }
}

async fn kill(child: &mut Child) {
    if let Err(e) = child.kill().await {
        tracing::error!(error = %e, "Failed to kill indicator process");
    }
}

/// A running station.
pub struct Supervisor {
    state: SharedState,
    notify: NotificationSender,
    cancel: CancellationToken,
    sampler: JoinHandle<()>,
    indicator: IndicatorHandle,
    trigger: Option<EdgeGuard>,
    open_output: OutputOpener,
    terminate_timeout: Duration,
}

impl Supervisor {
    /// Start every component. Must be called from within a tokio runtime.
    ///
    /// A button that fails to attach is logged and the station runs without
    /// it; an indicator that fails to start is an error.
    pub fn start(config: &Config, components: Components) -> Result<Self, SupervisorError> {
        let Components {
            state,
            source,
            sink,
            edges,
            open_output,
            indicator,
        } = components;

        let thresholds = state.thresholds();
        tracing::info!(
            temperature_limit = thresholds.temperature_limit,
            humidity_limit = thresholds.humidity_limit,
            "Weather station starting"
        );

        let (notify, notifications) = mpsc::unbounded_channel();

        let indicator = match indicator {
            IndicatorLaunch::InProcess => {
                let output = open_output()?;
                let driver = IndicatorDriver::new(output, Patterns::from_config(&config.indicator), notifications);
                tracing::info!("Indicator running in-process");
                IndicatorHandle::Task(tokio::spawn(driver.run()))
            }
            IndicatorLaunch::Process(spec) => {
                let process = IndicatorProcess::spawn(&spec, notifications).map_err(SupervisorError::Spawn)?;
                IndicatorHandle::watch(process)
            }
        };

        let cancel = CancellationToken::new();
        let sampler = Sampler::new(source, state.clone(), notify.clone(), config.sampler.interval());
        let sampler = tokio::spawn(sampler.run(cancel.clone()));

        let trigger = edges.and_then(|edges| {
            let trigger = ManualTrigger::new(state.clone(), sink, config.trigger.debounce());
            match trigger.attach(edges) {
                Ok(guard) => Some(guard),
                Err(e) => {
                    tracing::error!(error = %e, "Button unavailable, continuing without manual logging");
                    None
                }
            }
        });

        Ok(Self {
            state,
            notify,
            cancel,
            sampler,
            indicator,
            trigger,
            open_output,
            terminate_timeout: config.supervisor.terminate_timeout(),
        })
    }

    pub fn state(&self) -> &SharedState {
        &self.state
    }

    /// Run until `signal` resolves, then shut down.
    pub async fn run_until<F: Future<Output = ()>>(self, signal: F) -> ShutdownReport {
        signal.await;
        tracing::info!("Shutdown requested");
        self.shutdown().await
    }

    /// Stop everything in order and leave the LEDs off.
    pub async fn shutdown(self) -> ShutdownReport {
        let Self {
            state: _,
            notify,
            cancel,
            sampler,
            indicator,
            trigger,
            open_output,
            terminate_timeout,
        } = self;

        drop(trigger);

        cancel.cancel();
        if let Err(e) = sampler.await {
            tracing::error!(error = %e, "Sampler task failed");
        }

        if notify.send(StateNotification::Terminate).is_err() {
            tracing::debug!("Indicator channel already closed");
        }
        drop(notify);

        let outcome = indicator.stop(terminate_timeout).await;

        let leds_off = match open_output() {
            Ok(mut output) => {
                output.all_off();
                true
            }
            Err(e) => {
                tracing::error!(error = %e, "Could not reopen LEDs to switch them off");
                false
            }
        };

        tracing::info!(?outcome, leds_off, "Station stopped");
        ShutdownReport { outcome, leds_off }
    }
}

/// Resolves on Ctrl-C or, on unix, SIGTERM.
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT (Ctrl-C)"),
        () = terminate => tracing::info!("Received SIGTERM"),
    }
}

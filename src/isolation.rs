//! # Isolated Indicator Process
//!
//! The indicator can run as a child process that shares no memory with the
//! station. The only link is the child's stdin, carrying one
//! [`StateNotification`] per line.
//!
//! ```text
//!   parent                                   child (`weather-station indicator`)
//!   Sampler ─► mpsc ─► bridge ─► stdin pipe ─► reader ─► mpsc ─► IndicatorDriver
//! ```
//!
//! - The bridge writes in receive order and stops after the terminal marker,
//!   closing the pipe.
//! - In the child, EOF on stdin closes the in-process channel, which the driver
//!   treats as [`IndicatorError::ChannelClosed`].
//! - The child ignores Ctrl-C. The terminal's interrupt reaches the whole
//!   process group, but the child must wait for the supervisor's terminal
//!   marker (or be killed by it).

use std::ffi::OsString;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::indicator::{IndicatorDriver, IndicatorError, Patterns};
use crate::notification::{NotificationReceiver, NotificationSender, StateNotification};
use crate::output::OutputDevice;

/// How to start the indicator child.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub program: PathBuf,
    pub args: Vec<OsString>,
}

impl ProcessSpec {
    /// This binary, re-run in `indicator` mode with the same config file.
    pub fn current_exe(config_path: &Path) -> io::Result<Self> {
        Ok(Self {
            program: std::env::current_exe()?,
            args: vec![
                "--config".into(),
                config_path.as_os_str().to_owned(),
                "indicator".into(),
            ],
        })
    }
}

/// A running indicator child plus the task feeding its stdin.
#[derive(Debug)]
pub struct IndicatorProcess {
    pub(crate) child: Child,
    pub(crate) bridge: JoinHandle<()>,
}

impl IndicatorProcess {
    /// Spawn the child and start forwarding `notifications` to it.
    pub fn spawn(spec: &ProcessSpec, notifications: NotificationReceiver) -> io::Result<Self> {
        let mut child = Command::new(&spec.program)
            .args(&spec.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| io::Error::other("child stdin not captured"))?;

        tracing::info!(pid = child.id(), program = %spec.program.display(), "Indicator process started");
        let bridge = tokio::spawn(forward(notifications, stdin));
        Ok(Self { child, bridge })
    }

    pub fn id(&self) -> Option<u32> {
        self.child.id()
    }
}

/// Copy notifications onto the child's stdin until the terminal marker.
async fn forward(mut notifications: NotificationReceiver, mut stdin: ChildStdin) {
    while let Some(notification) = notifications.recv().await {
        let line = match notification.to_line() {
            Ok(line) => line,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode notification");
                continue;
            }
        };
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        if let Err(e) = written {
            tracing::error!(error = %e, "Indicator pipe broken");
            return;
        }
        if notification == StateNotification::Terminate {
            break;
        }
    }
    // Dropping stdin closes the pipe
}

/// Child side: decode lines from `input` into `tx` until EOF or terminate.
pub async fn read_notifications<R: AsyncRead + Unpin>(input: R, tx: NotificationSender) {
    let mut lines = BufReader::new(input).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) if line.trim().is_empty() => continue,
            Ok(Some(line)) => match StateNotification::from_line(&line) {
                Ok(notification) => {
                    if tx.send(notification).is_err() {
                        break;
                    }
                    if notification == StateNotification::Terminate {
                        break;
                    }
                }
                Err(e) => tracing::warn!(error = %e, line = %line, "Ignoring malformed notification"),
            },
            Ok(None) => {
                tracing::debug!("Notification pipe reached EOF");
                break;
            }
            Err(e) => {
                tracing::error!(error = %e, "Notification pipe read failed");
                break;
            }
        }
    }
}

/// Entry point of the child process: drive `output` from stdin.
pub async fn run_isolated_indicator<D: OutputDevice>(
    output: D,
    patterns: Patterns,
) -> Result<(), IndicatorError> {
    let (tx, rx) = mpsc::unbounded_channel();
    let reader = tokio::spawn(read_notifications(tokio::io::stdin(), tx));
    let interrupts = tokio::spawn(async {
        while tokio::signal::ctrl_c().await.is_ok() {
            tracing::debug!("Interrupt ignored; waiting for the supervisor");
        }
    });

    let result = IndicatorDriver::new(output, patterns, rx).run().await;

    interrupts.abort();
    reader.abort();
    result
}

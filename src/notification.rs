//! # State Notifications
//!
//! Messages from the sampler side to the indicator. In-process they travel
//! over a tokio unbounded channel; across the process boundary each one is a
//! single JSON line on the child's stdin:
//!
//! ```text
//! {"kind":"state","state":"ALERT"}
//! {"kind":"terminate"}
//! ```

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};

use crate::AlertState;

pub type NotificationSender = UnboundedSender<StateNotification>;
pub type NotificationReceiver = UnboundedReceiver<StateNotification>;

/// One message to the indicator. Consumed exactly once.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StateNotification {
    /// The alert state flipped to `state`
    State { state: AlertState },
    /// Stop driving the output and exit
    Terminate,
}

impl StateNotification {
    /// Encode as one newline-terminated JSON line.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }

    pub fn from_line(line: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(line.trim())
    }
}

/// Result of one non-blocking look at the notification channel.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Poll {
    /// Nothing queued
    Idle,
    /// Switch to this state (the newest of everything queued)
    Apply(AlertState),
    /// A terminal marker was queued
    Terminate,
    /// Every sender is gone and the queue is empty
    Closed,
}

/// Drain everything currently queued into one decision.
///
/// Older states are superseded by newer ones; a terminal marker anywhere in
/// the queue wins over every state, before or after it.
pub fn poll_latest(rx: &mut NotificationReceiver) -> Poll {
    let mut latest = None;
    loop {
        match rx.try_recv() {
            Ok(StateNotification::Terminate) => return Poll::Terminate,
            Ok(StateNotification::State { state }) => latest = Some(state),
            Err(TryRecvError::Empty) => break,
            Err(TryRecvError::Disconnected) => {
                // Messages drained before the disconnect still count
                return match latest {
                    Some(state) => Poll::Apply(state),
                    None => Poll::Closed,
                };
            }
        }
    }
    match latest {
        Some(state) => Poll::Apply(state),
        None => Poll::Idle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    #[test]
    fn wire_format_is_tagged_json() {
        let line = StateNotification::State {
            state: AlertState::Alert,
        }
        .to_line()
        .unwrap();
        assert_eq!(line, "{\"kind\":\"state\",\"state\":\"ALERT\"}\n");
        assert_eq!(
            StateNotification::Terminate.to_line().unwrap(),
            "{\"kind\":\"terminate\"}\n"
        );
        assert_eq!(
            StateNotification::from_line("{\"kind\":\"state\",\"state\":\"NORMAL\"}\r\n").unwrap(),
            StateNotification::State {
                state: AlertState::Normal
            }
        );
        assert!(StateNotification::from_line("{\"kind\":\"reboot\"}").is_err());
    }

    #[test]
    fn newest_state_supersedes_older_ones() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        for state in [AlertState::Alert, AlertState::Normal, AlertState::Alert] {
            tx.send(StateNotification::State { state }).unwrap();
        }
        assert_eq!(poll_latest(&mut rx), Poll::Apply(AlertState::Alert));
        assert_eq!(poll_latest(&mut rx), Poll::Idle);
    }

    #[test]
    fn terminal_marker_is_never_coalesced_away() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(StateNotification::Terminate).unwrap();
        tx.send(StateNotification::State {
            state: AlertState::Normal,
        })
        .unwrap();
        assert_eq!(poll_latest(&mut rx), Poll::Terminate);

        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(StateNotification::State {
            state: AlertState::Alert,
        })
        .unwrap();
        tx.send(StateNotification::Terminate).unwrap();
        assert_eq!(poll_latest(&mut rx), Poll::Terminate);
    }

    #[test]
    fn closed_only_after_queue_is_drained() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(StateNotification::State {
            state: AlertState::Alert,
        })
        .unwrap();
        drop(tx);
        assert_eq!(poll_latest(&mut rx), Poll::Apply(AlertState::Alert));
        assert_eq!(poll_latest(&mut rx), Poll::Closed);
    }
}

//! # Indicator Driver
//!
//! Blinks the LEDs according to the last announced [`AlertState`]:
//!
//! | State  | LED   | Pattern                                   |
//! |--------|-------|-------------------------------------------|
//! | NORMAL | green | heartbeat: on 0.5 s, off 1.5 s            |
//! | ALERT  | red   | fast blink: on 0.2 s, off 0.2 s           |
//!
//! The driver only knows what it is told over its notification channel, so
//! it runs unchanged inside a child process. It starts in NORMAL.
//!
//! Before every pattern step it drains the channel without blocking
//! ([`poll_latest`]): the newest state wins and restarts that state's pattern
//! from its first step; a terminal marker wins over everything. A state change
//! is therefore picked up within one step.
//!
//! Both exits (terminal marker, closed channel) leave every LED off.

use std::time::Duration;

use thiserror::Error;

use crate::config::IndicatorConfig;
use crate::notification::{poll_latest, NotificationReceiver, Poll};
use crate::output::{Channel, OutputDevice};
use crate::AlertState;

/// Shortest step the driver will sleep, so a zero in the config cannot spin.
const MIN_STEP: Duration = Duration::from_millis(10);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndicatorError {
    /// Every sender is gone without a terminal marker
    #[error("notification channel closed")]
    ChannelClosed,
}

/// One pattern step: both LED levels, then a pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub normal: bool,
    pub alert: bool,
    pub hold: Duration,
}

/// Repeating LED sequence for one state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pattern {
    steps: Vec<Step>,
}

impl Pattern {
    pub fn new(steps: Vec<Step>) -> Self {
        let steps = steps
            .into_iter()
            .map(|step| Step {
                hold: step.hold.max(MIN_STEP),
                ..step
            })
            .collect();
        Self { steps }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Length of one full cycle.
    pub fn period(&self) -> Duration {
        self.steps.iter().map(|step| step.hold).sum()
    }
}

/// The pattern for each [`AlertState`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Patterns {
    pub normal: Pattern,
    pub alert: Pattern,
}

impl Patterns {
    pub fn from_config(config: &IndicatorConfig) -> Self {
        let on = Duration::from_millis(config.heartbeat_on_ms);
        let off = Duration::from_millis(config.heartbeat_off_ms);
        let blink = Duration::from_millis(config.blink_ms);
        Self {
            normal: Pattern::new(vec![
                Step {
                    normal: true,
                    alert: false,
                    hold: on,
                },
                Step {
                    normal: false,
                    alert: false,
                    hold: off,
                },
            ]),
            alert: Pattern::new(vec![
                Step {
                    normal: false,
                    alert: true,
                    hold: blink,
                },
                Step {
                    normal: false,
                    alert: false,
                    hold: blink,
                },
            ]),
        }
    }

    pub fn for_state(&self, state: AlertState) -> &Pattern {
        match state {
            AlertState::Normal => &self.normal,
            AlertState::Alert => &self.alert,
        }
    }
}

impl Default for Patterns {
    fn default() -> Self {
        Self::from_config(&IndicatorConfig::default())
    }
}

/// Drives an [`OutputDevice`] from state notifications.
pub struct IndicatorDriver<D: OutputDevice> {
    output: D,
    patterns: Patterns,
    notifications: NotificationReceiver,
}

impl<D: OutputDevice> IndicatorDriver<D> {
    pub fn new(output: D, patterns: Patterns, notifications: NotificationReceiver) -> Self {
        Self {
            output,
            patterns,
            notifications,
        }
    }

    /// Run until a terminal marker (`Ok`) or a closed channel (`Err`).
    pub async fn run(self) -> Result<(), IndicatorError> {
        let Self {
            mut output,
            patterns,
            mut notifications,
        } = self;

        let mut state = AlertState::Normal;
        tracing::info!(%state, "Indicator started");

        'pattern: loop {
            for step in patterns.for_state(state).steps() {
                match poll_latest(&mut notifications) {
                    Poll::Idle => {}
                    Poll::Apply(next) => {
                        if next != state {
                            tracing::info!(from = %state, to = %next, "Indicator pattern change");
                        }
                        state = next;
                        continue 'pattern;
                    }
                    Poll::Terminate => {
                        output.all_off();
                        tracing::info!("Indicator terminated, LEDs off");
                        return Ok(());
                    }
                    Poll::Closed => {
                        output.all_off();
                        tracing::error!("Indicator channel closed, LEDs off");
                        return Err(IndicatorError::ChannelClosed);
                    }
                }

                apply(&mut output, step);
                tokio::time::sleep(step.hold).await;
            }
        }
    }
}

fn apply<D: OutputDevice>(output: &mut D, step: &Step) {
    for (channel, on) in [(Channel::Normal, step.normal), (Channel::Alert, step.alert)] {
        if on {
            output.set_on(channel);
        } else {
            output.set_off(channel);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notification::StateNotification;
    use crate::output::recording::{RecordingOutput, Switch};
    use tokio::sync::mpsc;
    use tokio::time::{sleep, Instant};

    fn on_times(switches: &[Switch], channel: Channel, t0: Instant) -> Vec<u64> {
        switches
            .iter()
            .filter(|s| s.channel == channel && s.on)
            .map(|s| (s.at - t0).as_millis() as u64)
            .collect()
    }

    fn state(state: AlertState) -> StateNotification {
        StateNotification::State { state }
    }

    #[test]
    fn default_patterns_match_configured_timing() {
        let patterns = Patterns::default();
        assert_eq!(patterns.normal.period(), Duration::from_millis(2000));
        assert_eq!(patterns.alert.period(), Duration::from_millis(400));
        assert!(patterns.normal.steps().iter().all(|s| !s.alert));
        assert!(patterns.alert.steps().iter().all(|s| !s.normal));
    }

    #[test]
    fn zero_length_steps_are_clamped() {
        let patterns = Patterns::from_config(&IndicatorConfig {
            blink_ms: 0,
            ..IndicatorConfig::default()
        });
        assert!(patterns.alert.steps().iter().all(|s| s.hold == MIN_STEP));
    }

    #[tokio::test(start_paused = true)]
    async fn starts_with_normal_heartbeat() {
        let output = RecordingOutput::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let t0 = Instant::now();
        let task = tokio::spawn(IndicatorDriver::new(output.clone(), Patterns::default(), rx).run());

        sleep(Duration::from_millis(4100)).await;
        let switches = output.switches();
        assert_eq!(on_times(&switches, Channel::Normal, t0), vec![0, 2000, 4000]);
        assert!(on_times(&switches, Channel::Alert, t0).is_empty());

        tx.send(StateNotification::Terminate).unwrap();
        assert_eq!(task.await.unwrap(), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn queued_notifications_coalesce_to_latest() {
        let output = RecordingOutput::new();
        let (tx, rx) = mpsc::unbounded_channel();
        for s in [AlertState::Alert, AlertState::Normal, AlertState::Alert] {
            tx.send(state(s)).unwrap();
        }
        let t0 = Instant::now();
        let task = tokio::spawn(IndicatorDriver::new(output.clone(), Patterns::default(), rx).run());

        sleep(Duration::from_millis(900)).await;
        let switches = output.switches();
        assert_eq!(on_times(&switches, Channel::Alert, t0), vec![0, 400, 800]);
        // Never showed the superseded NORMAL heartbeat
        assert!(on_times(&switches, Channel::Normal, t0).is_empty());

        tx.send(StateNotification::Terminate).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn state_change_restarts_pattern_within_one_step() {
        let output = RecordingOutput::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let t0 = Instant::now();
        let task = tokio::spawn(IndicatorDriver::new(output.clone(), Patterns::default(), rx).run());

        // Mid heartbeat off-step (500..2000)
        sleep(Duration::from_millis(1000)).await;
        tx.send(state(AlertState::Alert)).unwrap();
        sleep(Duration::from_millis(1500)).await;

        let switches = output.switches();
        let alert_on = on_times(&switches, Channel::Alert, t0);
        assert_eq!(alert_on.first(), Some(&2000));
        assert_eq!(alert_on, vec![2000, 2400]);
        // Green stayed off once the alert pattern began
        assert!(!switches
            .iter()
            .any(|s| s.channel == Channel::Normal && s.on && (s.at - t0).as_millis() >= 2000));

        tx.send(state(AlertState::Normal)).unwrap();
        sleep(Duration::from_millis(300)).await;
        // Next step boundary after 2500 is 2600
        assert_eq!(
            on_times(&output.switches(), Channel::Normal, t0).last(),
            Some(&2600)
        );

        tx.send(StateNotification::Terminate).unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn terminal_marker_beats_preceding_state() {
        let output = RecordingOutput::new();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(state(AlertState::Alert)).unwrap();
        tx.send(StateNotification::Terminate).unwrap();

        let result = IndicatorDriver::new(output.clone(), Patterns::default(), rx)
            .run()
            .await;

        assert_eq!(result, Ok(()));
        assert!(!output.is_on(Channel::Normal));
        assert!(!output.is_on(Channel::Alert));
        assert!(!output.switches().iter().any(|s| s.on));
    }

    #[tokio::test(start_paused = true)]
    async fn terminate_while_blinking_forces_leds_off() {
        let output = RecordingOutput::new();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(state(AlertState::Alert)).unwrap();
        let task = tokio::spawn(IndicatorDriver::new(output.clone(), Patterns::default(), rx).run());

        // Red is on during 0..200
        sleep(Duration::from_millis(100)).await;
        assert!(output.is_on(Channel::Alert));
        tx.send(StateNotification::Terminate).unwrap();
        tx.send(state(AlertState::Alert)).unwrap();

        assert_eq!(task.await.unwrap(), Ok(()));
        assert!(!output.is_on(Channel::Alert));
        assert!(!output.is_on(Channel::Normal));
    }

    #[tokio::test(start_paused = true)]
    async fn closed_channel_is_fatal_and_leaves_leds_off() {
        let output = RecordingOutput::new();
        let (tx, rx) = mpsc::unbounded_channel::<StateNotification>();
        let task = tokio::spawn(IndicatorDriver::new(output.clone(), Patterns::default(), rx).run());

        sleep(Duration::from_millis(100)).await;
        assert!(output.is_on(Channel::Normal));
        drop(tx);

        assert_eq!(task.await.unwrap(), Err(IndicatorError::ChannelClosed));
        assert!(!output.is_on(Channel::Normal));
    }
}

//! # Indicator Outputs
//!
//! The two-LED "traffic light": green for NORMAL, red for ALERT.
//! Switching a channel cannot fail once the device is open; opening it can
//! (GPIO lines busy, no permission on `/dev/gpiomem`).

use thiserror::Error;

use crate::config::{HardwareConfig, OutputKind};

/// Errors that can occur while acquiring an output device.
#[derive(Error, Debug)]
pub enum OutputError {
    /// GPIO access failed (permissions, pin in use, not a Pi)
    #[error("GPIO error: {0}")]
    Gpio(String),

    /// Device requested by configuration is not compiled in
    #[error("output '{0}' not supported by this build")]
    Unsupported(&'static str),
}

/// One of the two independently switched indicator lines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Green LED
    Normal,
    /// Red LED
    Alert,
}

impl Channel {
    pub const ALL: [Channel; 2] = [Channel::Normal, Channel::Alert];
}

/// A two-channel on/off device.
pub trait OutputDevice: Send {
    fn set_on(&mut self, channel: Channel);
    fn set_off(&mut self, channel: Channel);

    /// Force every channel off.
    fn all_off(&mut self) {
        for channel in Channel::ALL {
            self.set_off(channel);
        }
    }
}

impl<T: OutputDevice + ?Sized> OutputDevice for Box<T> {
    fn set_on(&mut self, channel: Channel) {
        (**self).set_on(channel)
    }

    fn set_off(&mut self, channel: Channel) {
        (**self).set_off(channel)
    }
}

/// Boxed device as handed out by [`open_output`].
pub type BoxedOutput = Box<dyn OutputDevice>;

/// Development stand-in that logs LED changes instead of switching pins.
#[derive(Debug, Default)]
pub struct ConsoleOutput {
    normal: bool,
    alert: bool,
}

impl ConsoleOutput {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&mut self, channel: Channel) -> &mut bool {
        match channel {
            Channel::Normal => &mut self.normal,
            Channel::Alert => &mut self.alert,
        }
    }

    fn switch(&mut self, channel: Channel, on: bool) {
        let slot = self.slot(channel);
        if *slot != on {
            *slot = on;
            tracing::trace!(?channel, on, "LED");
        }
    }
}

impl OutputDevice for ConsoleOutput {
    fn set_on(&mut self, channel: Channel) {
        self.switch(channel, true);
    }

    fn set_off(&mut self, channel: Channel) {
        self.switch(channel, false);
    }
}

/// Open the output device selected by `hardware.output`.
pub fn open_output(hardware: &HardwareConfig) -> Result<BoxedOutput, OutputError> {
    match hardware.output {
        OutputKind::Console => Ok(Box::new(ConsoleOutput::new())),
        #[cfg(all(target_os = "linux", feature = "hardware"))]
        OutputKind::Gpio => Ok(Box::new(crate::gpio::GpioOutput::new(
            hardware.normal_led_pin,
            hardware.alert_led_pin,
        )?)),
        #[cfg(not(all(target_os = "linux", feature = "hardware")))]
        OutputKind::Gpio => Err(OutputError::Unsupported("gpio")),
    }
}

#[cfg(test)]
pub(crate) mod recording {
    //! Output double that records every switch with its (tokio) timestamp.

    use std::sync::{Arc, Mutex};

    use tokio::time::Instant;

    use super::{Channel, OutputDevice};

    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Switch {
        pub at: Instant,
        pub channel: Channel,
        pub on: bool,
    }

    #[derive(Clone, Debug, Default)]
    pub struct RecordingOutput {
        log: Arc<Mutex<Vec<Switch>>>,
    }

    impl RecordingOutput {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn switches(&self) -> Vec<Switch> {
            self.log.lock().unwrap().clone()
        }

        /// Last known level of `channel` (off if never switched).
        pub fn is_on(&self, channel: Channel) -> bool {
            self.log
                .lock()
                .unwrap()
                .iter()
                .rev()
                .find(|s| s.channel == channel)
                .map(|s| s.on)
                .unwrap_or(false)
        }

        fn push(&self, channel: Channel, on: bool) {
            self.log.lock().unwrap().push(Switch {
                at: Instant::now(),
                channel,
                on,
            });
        }
    }

    impl OutputDevice for RecordingOutput {
        fn set_on(&mut self, channel: Channel) {
            self.push(channel, true);
        }

        fn set_off(&mut self, channel: Channel) {
            self.push(channel, false);
        }
    }
}

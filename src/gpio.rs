//! Raspberry Pi GPIO devices (rppal).
//!
//! Only compiled on Linux with `--features hardware`; other builds use the
//! console output and stdin button.

#[cfg(all(target_os = "linux", feature = "hardware"))]
pub use self::pi::{GpioButton, GpioOutput};

#[cfg(all(target_os = "linux", feature = "hardware"))]
mod pi {
    use std::time::Instant;

    use rppal::gpio::{Gpio, InputPin, Level, OutputPin, Trigger};

    use crate::output::{Channel, OutputDevice, OutputError};
    use crate::trigger::{EdgeCallback, EdgeGuard, EdgeSource, TriggerError};

    /// Green/red LED pair.
    pub struct GpioOutput {
        normal: OutputPin,
        alert: OutputPin,
    }

    impl GpioOutput {
        pub fn new(normal_pin: u8, alert_pin: u8) -> Result<Self, OutputError> {
            let gpio = Gpio::new().map_err(|e| OutputError::Gpio(e.to_string()))?;
            let normal = gpio
                .get(normal_pin)
                .map_err(|e| OutputError::Gpio(e.to_string()))?
                .into_output_low();
            let alert = gpio
                .get(alert_pin)
                .map_err(|e| OutputError::Gpio(e.to_string()))?
                .into_output_low();
            Ok(Self { normal, alert })
        }

        fn pin(&mut self, channel: Channel) -> &mut OutputPin {
            match channel {
                Channel::Normal => &mut self.normal,
                Channel::Alert => &mut self.alert,
            }
        }
    }

    impl OutputDevice for GpioOutput {
        fn set_on(&mut self, channel: Channel) {
            self.pin(channel).set_high();
        }

        fn set_off(&mut self, channel: Channel) {
            self.pin(channel).set_low();
        }
    }

    /// Momentary button wired to 3V3, read with the internal pull-down.
    pub struct GpioButton {
        pin: u8,
    }

    impl GpioButton {
        pub fn new(pin: u8) -> Self {
            Self { pin }
        }
    }

    impl EdgeSource for GpioButton {
        fn start(self: Box<Self>, mut on_edge: EdgeCallback) -> Result<EdgeGuard, TriggerError> {
            let gpio = Gpio::new().map_err(|e| TriggerError::Gpio(e.to_string()))?;
            let mut input: InputPin = gpio
                .get(self.pin)
                .map_err(|e| TriggerError::Gpio(e.to_string()))?
                .into_input_pulldown();

            // Runs on rppal's interrupt thread; the pin (and the thread) go
            // away when the guard drops.
            input
                .set_async_interrupt(Trigger::RisingEdge, move |level: Level| {
                    if level == Level::High {
                        on_edge(Instant::now());
                    }
                })
                .map_err(|e| TriggerError::Gpio(e.to_string()))?;

            Ok(EdgeGuard::new(input))
        }
    }
}

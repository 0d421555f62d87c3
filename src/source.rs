//! # Reading Sources
//!
//! Where the [`Sampler`](crate::sampler::Sampler) gets its readings from.
//!
//! ## Implementations
//! - [`SimulatedSource`]: uniform random values in configured ranges, for
//!   benches without a sensor attached.
//! - [`IioSource`]: the Linux `dht11` IIO driver (DHT11/DHT22 on a GPIO line,
//!   enabled with `dtoverlay=dht11,gpiopin=4`). The driver reports milli-units
//!   and fails with `EIO` whenever a transfer checksum does not match, which is
//!   routine for these sensors.
//!
//! Any failure is [`SourceError`]: the sampler skips the cycle and retries on
//! the next tick.

use std::fs;
use std::io;
use std::ops::Range;
use std::path::{Path, PathBuf};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use thiserror::Error;

use crate::Reading;

/// Errors a reading source can report. None of them are fatal.
#[derive(Error, Debug)]
pub enum SourceError {
    /// The sensor did not produce a value this time
    #[error("sensor unavailable: {0}")]
    Unavailable(String),

    /// The device node could not be read
    #[error("sensor IO: {0}")]
    Io(#[from] io::Error),
}

/// Capability to produce one [`Reading`].
pub trait ReadingSource: Send {
    fn produce_reading(&mut self) -> Result<Reading, SourceError>;
}

/// Random readings within fixed ranges.
///
/// # Example
/// ```
/// use weather_station_lib::source::{ReadingSource, SimulatedSource};
///
/// let mut source = SimulatedSource::with_seed(18.0..27.0, 30.0..55.0, 7);
/// let reading = source.produce_reading().unwrap();
/// assert!((18.0..27.0).contains(&reading.temperature));
/// ```
#[derive(Debug)]
pub struct SimulatedSource {
    temperature: Range<f64>,
    humidity: Range<f64>,
    rng: StdRng,
}

impl SimulatedSource {
    pub fn new(temperature: Range<f64>, humidity: Range<f64>) -> Self {
        Self {
            temperature,
            humidity,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Deterministic sequence, for tests.
    pub fn with_seed(temperature: Range<f64>, humidity: Range<f64>, seed: u64) -> Self {
        Self {
            temperature,
            humidity,
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl ReadingSource for SimulatedSource {
    fn produce_reading(&mut self) -> Result<Reading, SourceError> {
        if self.temperature.is_empty() || self.humidity.is_empty() {
            return Err(SourceError::Unavailable(
                "simulated range is empty".to_string(),
            ));
        }
        let temperature = self.rng.random_range(self.temperature.clone());
        let humidity = self.rng.random_range(self.humidity.clone());
        Ok(Reading::new(temperature, humidity))
    }
}

/// DHT sensor exposed through the kernel IIO subsystem.
#[derive(Debug, Clone)]
pub struct IioSource {
    device: PathBuf,
}

impl IioSource {
    pub fn new<P: AsRef<Path>>(device: P) -> Self {
        Self {
            device: device.as_ref().to_path_buf(),
        }
    }

    fn read_milli(&self, attribute: &str) -> Result<f64, SourceError> {
        let path = self.device.join(attribute);
        let raw = match fs::read_to_string(&path) {
            Ok(raw) => raw,
            // EIO: checksum mismatch or the sensor did not answer in time
            Err(e) if e.raw_os_error() == Some(5) => {
                return Err(SourceError::Unavailable(format!("{}: {e}", path.display())))
            }
            Err(e) => return Err(SourceError::Io(e)),
        };
        let milli: i64 = raw.trim().parse().map_err(|_| {
            SourceError::Unavailable(format!("{}: unexpected value {:?}", path.display(), raw))
        })?;
        Ok(milli as f64 / 1000.0)
    }
}

impl ReadingSource for IioSource {
    fn produce_reading(&mut self) -> Result<Reading, SourceError> {
        let temperature = self.read_milli("in_temp_input")?;
        let humidity = self.read_milli("in_humidityrelative_input")?;
        Ok(Reading::new(temperature, humidity))
    }
}

//! Simulated sensors producing readings for the store.
//!
//! Each [`Sensor`] generates values according to its [`SensorKind`] and
//! pushes every reading to the callbacks registered on it. Wiring a sensor
//! into a store is one callback:
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use sensorlog::sensor::{Sensor, SensorKind, SensorSpec};
//! use sensorlog::store::LogStore;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(LogStore::from_config_file("config.json")?);
//! store.start()?;
//!
//! let spec = SensorSpec::new("T01", "temp", "°C", -10.0, 50.0);
//! let mut sensor = Sensor::new(SensorKind::Temperature, spec)?;
//! let sink = Arc::clone(&store);
//! sensor.register_callback(move |entry| {
//!     if let Err(e) = sink.ingest_entry(entry.clone()) {
//!         tracing::warn!("dropped reading: {e}");
//!     }
//! });
//!
//! sensor.read_value()?;
//! # Ok(())
//! # }
//! ```

use std::fmt;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, Timelike};
use rand::Rng;

use crate::entry::LogEntry;
use crate::error::SensorError;

/// Value model of a sensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SensorKind {
    /// Diurnal temperature bands with ±1 noise, rounded to 2 decimals.
    Temperature,
    /// Slow cosine cycle with upward drift, clamped to the range.
    Humidity,
    /// Slow sine cycle with upward drift, clamped to the range.
    Pressure,
    /// Uniform over the range.
    AirQuality,
}

/// Static description of a sensor.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorSpec {
    /// Identifier used by humidity and pressure readings.
    pub sensor_id: String,
    /// Display name, used as the reading id by temperature and air quality.
    pub name: String,
    /// Unit of every reading.
    pub unit: String,
    /// Lower bound of generated values.
    pub min_value: f64,
    /// Upper bound of generated values.
    pub max_value: f64,
    /// Suggested interval between readings.
    pub frequency: Duration,
}

impl SensorSpec {
    /// Creates a spec reading once per second.
    pub fn new(
        sensor_id: impl Into<String>,
        name: impl Into<String>,
        unit: impl Into<String>,
        min_value: f64,
        max_value: f64,
    ) -> Self {
        Self {
            sensor_id: sensor_id.into(),
            name: name.into(),
            unit: unit.into(),
            min_value,
            max_value,
            frequency: Duration::from_secs(1),
        }
    }

    /// Sets the reading interval.
    #[must_use]
    pub fn with_frequency(mut self, frequency: Duration) -> Self {
        self.frequency = frequency;
        self
    }
}

type Callback = Box<dyn Fn(&LogEntry) + Send + Sync>;

/// A value generator with reading callbacks.
pub struct Sensor {
    kind: SensorKind,
    spec: SensorSpec,
    active: bool,
    last_value: Option<f64>,
    /// Ticks produced so far; drives the humidity and pressure cycles.
    time_counter: u64,
    callbacks: Vec<Callback>,
}

impl Sensor {
    /// Creates an enabled sensor.
    ///
    /// # Errors
    ///
    /// Returns [`SensorError::InvalidRange`] unless both bounds are finite
    /// and `min_value <= max_value`.
    pub fn new(kind: SensorKind, spec: SensorSpec) -> Result<Self, SensorError> {
        if !(spec.min_value.is_finite()
            && spec.max_value.is_finite()
            && spec.min_value <= spec.max_value)
        {
            return Err(SensorError::InvalidRange {
                name: spec.name,
                min: spec.min_value,
                max: spec.max_value,
            });
        }

        Ok(Self {
            kind,
            spec,
            active: true,
            last_value: None,
            time_counter: 0,
            callbacks: Vec::new(),
        })
    }

    /// Registers a callback invoked with every reading.
    pub fn register_callback<F>(&mut self, callback: F)
    where
        F: Fn(&LogEntry) + Send + Sync + 'static,
    {
        self.callbacks.push(Box::new(callback));
    }

    /// Produces a reading stamped with the local wall-clock time.
    ///
    /// # Errors
    ///
    /// Returns [`SensorError::Disabled`] if the sensor is disabled.
    pub fn read_value(&mut self) -> Result<f64, SensorError> {
        let now = Local::now().naive_local();
        self.read_value_at(now, &mut rand::thread_rng())
    }

    /// Produces a reading stamped `now`, drawing noise from `rng`.
    ///
    /// Stores the value as [`last_value`](Self::last_value), invokes every
    /// callback in registration order and returns the value.
    ///
    /// # Errors
    ///
    /// Returns [`SensorError::Disabled`] if the sensor is disabled.
    pub fn read_value_at<R: Rng>(
        &mut self,
        now: NaiveDateTime,
        rng: &mut R,
    ) -> Result<f64, SensorError> {
        if !self.active {
            return Err(SensorError::Disabled {
                name: self.spec.name.clone(),
            });
        }

        let value = self.generate(now, rng);
        self.last_value = Some(value);

        let entry = LogEntry::new(self.reading_id(), now, value, self.spec.unit.as_str());
        for callback in &self.callbacks {
            callback(&entry);
        }

        Ok(value)
    }

    fn generate<R: Rng>(&mut self, now: NaiveDateTime, rng: &mut R) -> f64 {
        let (min, max) = (self.spec.min_value, self.spec.max_value);
        let mid = (min + max) / 2.0;

        match self.kind {
            SensorKind::Temperature => {
                let base = match now.hour() {
                    0..6 => min + 1.0,
                    6..12 => min + (max - min) * 0.5,
                    12..18 => max - 1.0,
                    _ => min + (max - min) * 0.3,
                };
                let value = base + rng.gen_range(-1.0..=1.0);
                (value * 100.0).round() / 100.0
            }
            SensorKind::Humidity => {
                let t = self.tick();
                let value = mid + (t / 40.0).cos() * 10.0 + 0.01 * t + rng.gen_range(-1.5..=1.5);
                value.clamp(min, max)
            }
            SensorKind::Pressure => {
                let t = self.tick();
                let value = mid + (t / 50.0).sin() * 1.5 + 0.02 * t + rng.gen_range(-0.3..=0.3);
                value.clamp(min, max)
            }
            SensorKind::AirQuality => rng.gen_range(min..=max),
        }
    }

    /// Returns the current tick and advances the counter.
    fn tick(&mut self) -> f64 {
        #[allow(clippy::cast_precision_loss)] // tick counts stay far below 2^53
        let t = self.time_counter as f64;
        self.time_counter += 1;
        t
    }

    /// Id carried by readings of this sensor.
    pub fn reading_id(&self) -> &str {
        match self.kind {
            SensorKind::Temperature | SensorKind::AirQuality => &self.spec.name,
            SensorKind::Humidity | SensorKind::Pressure => &self.spec.sensor_id,
        }
    }

    /// Re-enables a disabled sensor.
    pub fn enable(&mut self) {
        self.active = true;
    }

    /// Disables the sensor; readings fail until it is enabled again.
    pub fn disable(&mut self) {
        self.active = false;
    }

    /// Whether the sensor produces readings.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Value of the most recent reading.
    pub fn last_value(&self) -> Option<f64> {
        self.last_value
    }

    /// The value model.
    pub fn kind(&self) -> SensorKind {
        self.kind
    }

    /// The static description.
    pub fn spec(&self) -> &SensorSpec {
        &self.spec
    }
}

impl fmt::Debug for Sensor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sensor")
            .field("kind", &self.kind)
            .field("spec", &self.spec)
            .field("active", &self.active)
            .field("last_value", &self.last_value)
            .field("time_counter", &self.time_counter)
            .field("callbacks", &self.callbacks.len())
            .finish()
    }
}

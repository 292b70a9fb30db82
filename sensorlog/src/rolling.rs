//! In-memory rolling aggregation window.
//!
//! The aggregator keeps, per sensor, the samples recorded during the last
//! window span (12 hours by default) and answers two questions quickly:
//! what was the last value recorded for each sensor, and what is the average
//! over the last N hours.
//!
//! Pruning happens on every [`record`](RollingAggregator::record) for that
//! sensor: samples whose timestamp is older than `now - window` are dropped,
//! where `now` is the wall-clock time of the call. A sensor that stops
//! reporting keeps its last window until it reports again.
//!
//! # Locking
//!
//! The sensor map sits behind an `RwLock` that is only held to find or insert
//! a sensor's window; each window has its own `Mutex`, so different sensors
//! never contend.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

use chrono::{NaiveDateTime, TimeDelta};
use serde::Serialize;

use crate::clock::Clock;
use crate::config::hours_to_delta;

/// One recorded sample.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    /// Timestamp carried by the reading.
    pub timestamp: NaiveDateTime,
    /// The value.
    pub value: f64,
    /// Unit of the value.
    pub unit: String,
}

/// Most recently recorded reading of a sensor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestReading {
    /// The value.
    pub last_value: f64,
    /// Unit of the value.
    pub unit: String,
    /// Timestamp carried by the reading.
    pub timestamp: NaiveDateTime,
}

/// Samples of one sensor in insertion order.
#[derive(Debug, Default)]
struct SensorWindow {
    samples: Vec<Sample>,
}

/// Per-sensor rolling window of recent samples.
#[derive(Debug)]
pub struct RollingAggregator {
    window: TimeDelta,
    clock: Arc<dyn Clock>,
    sensors: RwLock<HashMap<String, Arc<Mutex<SensorWindow>>>>,
}

impl RollingAggregator {
    /// Creates an empty aggregator retaining `window` worth of samples.
    pub fn new(window: TimeDelta, clock: Arc<dyn Clock>) -> Self {
        Self {
            window,
            clock,
            sensors: RwLock::new(HashMap::new()),
        }
    }

    /// Span of samples retained per sensor.
    pub fn window(&self) -> TimeDelta {
        self.window
    }

    /// Appends a sample and prunes the sensor's window.
    pub fn record(&self, sensor_id: &str, timestamp: NaiveDateTime, value: f64, unit: &str) {
        let window = self.window_for(sensor_id);
        let cutoff = cutoff(self.clock.now(), self.window);

        let mut window = window.lock().unwrap_or_else(PoisonError::into_inner);
        window.samples.push(Sample {
            timestamp,
            value,
            unit: unit.to_string(),
        });
        window.samples.retain(|sample| sample.timestamp >= cutoff);
    }

    /// Last recorded reading per sensor, by insertion order.
    ///
    /// A sensor whose window was pruned empty is omitted.
    pub fn latest(&self) -> BTreeMap<String, LatestReading> {
        let sensors = self.sensors.read().unwrap_or_else(PoisonError::into_inner);
        sensors
            .iter()
            .filter_map(|(sensor_id, window)| {
                let window = window.lock().unwrap_or_else(PoisonError::into_inner);
                window.samples.last().map(|sample| {
                    (
                        sensor_id.clone(),
                        LatestReading {
                            last_value: sample.value,
                            unit: sample.unit.clone(),
                            timestamp: sample.timestamp,
                        },
                    )
                })
            })
            .collect()
    }

    /// Mean of the sensor's samples with timestamp ≥ `now - hours`.
    ///
    /// Returns `None` for an unknown sensor or when no sample qualifies.
    /// Requests wider than [`window`](Self::window) only see what the window
    /// still holds.
    pub fn average(&self, sensor_id: &str, hours: f64) -> Option<f64> {
        let span = hours_to_delta(hours);
        if span > self.window {
            tracing::debug!(
                sensor_id,
                hours,
                window_hours = self.window.num_minutes() / 60,
                "average requested beyond rolling window; result covers the window only"
            );
        }
        let cutoff = cutoff(self.clock.now(), span);

        let window = {
            let sensors = self.sensors.read().unwrap_or_else(PoisonError::into_inner);
            Arc::clone(sensors.get(sensor_id)?)
        };
        let window = window.lock().unwrap_or_else(PoisonError::into_inner);

        let (sum, count) = window
            .samples
            .iter()
            .filter(|sample| sample.timestamp >= cutoff)
            .fold((0.0, 0u32), |(sum, count), sample| (sum + sample.value, count + 1));

        (count > 0).then(|| sum / f64::from(count))
    }

    /// Identifiers of every sensor seen, sorted.
    pub fn sensors(&self) -> Vec<String> {
        let sensors = self.sensors.read().unwrap_or_else(PoisonError::into_inner);
        let mut ids: Vec<String> = sensors.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Drops every window.
    pub fn close(&self) {
        self.sensors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn window_for(&self, sensor_id: &str) -> Arc<Mutex<SensorWindow>> {
        {
            let sensors = self.sensors.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(window) = sensors.get(sensor_id) {
                return Arc::clone(window);
            }
        }
        let mut sensors = self.sensors.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(sensors.entry(sensor_id.to_string()).or_default())
    }
}

/// Earliest timestamp still inside `span` before `now`; spans reaching past
/// the representable range have no lower bound.
fn cutoff(now: NaiveDateTime, span: TimeDelta) -> NaiveDateTime {
    now.checked_sub_signed(span).unwrap_or(NaiveDateTime::MIN)
}

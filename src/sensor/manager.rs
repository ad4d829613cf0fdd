//! Sensor registration, initialization and streaming.
//!
//! The manager runs one sampling task per active sensor. Each task owns its
//! sensor while streaming and hands it back when it exits, so the only state
//! shared with other tasks is the per-sensor history (single writer) and the
//! subscriber list.

use crate::core::stats;
use crate::core::windowing::RingBuffer;
use crate::sensor::notify::{Notifier, ReadingCallback};
use crate::sensor::types::{Reading, SensorKind};
use crate::sensor::{Sensor, SensorDevice, SensorError};
use serde::{Deserialize, Serialize};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};

/// Manager tuning.
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Readings kept per sensor
    pub history_capacity: usize,
    /// Delay before retrying after a failed read
    pub retry_backoff: Duration,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            history_capacity: 1000,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

/// Cooperative stop flag shared by every long-running loop.
#[derive(Clone)]
pub struct StopSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Raise the flag. Safe to call from any thread, including signal handlers.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn reset(&self) {
        self.tx.send_replace(false);
    }

    pub fn is_set(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the flag is raised.
    pub async fn stopped(&self) {
        let mut rx = self.tx.subscribe();
        let _ = rx.wait_for(|stopped| *stopped).await;
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Summary statistics over a sensor's stored history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorStats {
    pub count: usize,
    /// Present only when the history holds numeric (scalar/boolean) values
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mean: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub std: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    pub latest: String,
}

impl SensorStats {
    fn from_history(history: &RingBuffer<Reading>) -> Option<Self> {
        let latest = history.latest()?;
        let values: Vec<f64> = history.iter().filter_map(|r| r.value.as_f64()).collect();
        let numeric = !values.is_empty();

        Some(Self {
            count: history.len(),
            mean: numeric.then(|| stats::mean(&values)),
            std: numeric.then(|| stats::std_dev(&values)),
            min: numeric.then(|| stats::min(&values)),
            max: numeric.then(|| stats::max(&values)),
            latest: latest.value.to_string(),
        })
    }
}

/// Time between samples at `rate_hz`. `None` when the rate is not positive
/// or the period does not fit a non-zero [`Duration`].
pub fn sampling_interval(rate_hz: f64) -> Option<Duration> {
    if !(rate_hz.is_finite() && rate_hz > 0.0) {
        return None;
    }
    Duration::try_from_secs_f64(1.0 / rate_hz)
        .ok()
        .filter(|interval| !interval.is_zero())
}

type History = Arc<RwLock<RingBuffer<Reading>>>;

#[derive(Clone)]
struct HistoryEntry {
    sensor_id: String,
    kind: SensorKind,
    history: History,
}

/// Read-only, cloneable view over every sensor's history, in registration
/// order.
#[derive(Clone)]
pub struct HistoryView {
    entries: Arc<Vec<HistoryEntry>>,
}

impl HistoryView {
    pub fn sensor_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.sensor_id.clone()).collect()
    }

    pub fn kind(&self, sensor_id: &str) -> Option<SensorKind> {
        self.entry(sensor_id).map(|e| e.kind.clone())
    }

    /// The most recent `n` readings for a sensor, oldest first. Unknown ids
    /// yield an empty list.
    pub fn recent(&self, sensor_id: &str, n: usize) -> Vec<Reading> {
        self.entry(sensor_id)
            .map(|e| read_history(&e.history, |h| h.last_n(n)))
            .unwrap_or_default()
    }

    /// Recent readings for every sensor, in registration order.
    pub fn snapshot(&self, n: usize) -> Vec<(String, Vec<Reading>)> {
        self.entries
            .iter()
            .map(|e| (e.sensor_id.clone(), read_history(&e.history, |h| h.last_n(n))))
            .collect()
    }

    pub fn stats(&self, sensor_id: &str) -> Option<SensorStats> {
        let entry = self.entry(sensor_id)?;
        read_history(&entry.history, SensorStats::from_history)
    }

    pub fn len(&self, sensor_id: &str) -> usize {
        self.entry(sensor_id)
            .map(|e| read_history(&e.history, |h| h.len()))
            .unwrap_or(0)
    }

    fn entry(&self, sensor_id: &str) -> Option<&HistoryEntry> {
        self.entries.iter().find(|e| e.sensor_id == sensor_id)
    }
}

fn read_history<T>(history: &History, f: impl FnOnce(&RingBuffer<Reading>) -> T) -> T {
    match history.read() {
        Ok(guard) => f(&guard),
        Err(poisoned) => f(&poisoned.into_inner()),
    }
}

fn record(history: &History, reading: Reading) {
    match history.write() {
        Ok(mut guard) => {
            guard.push(reading);
        }
        Err(poisoned) => {
            poisoned.into_inner().push(reading);
        }
    }
}

struct SensorSlot {
    entry: HistoryEntry,
    /// `None` while the sensor is owned by its streaming task.
    device: Option<SensorDevice>,
    notifier: Arc<Notifier>,
}

/// Owns registered sensors and their sampling loops.
pub struct SensorManager {
    config: ManagerConfig,
    slots: Vec<SensorSlot>,
    stop: StopSignal,
    tasks: Vec<(usize, JoinHandle<SensorDevice>)>,
}

impl SensorManager {
    pub fn new(config: ManagerConfig) -> Self {
        Self {
            config,
            slots: Vec::new(),
            stop: StopSignal::new(),
            tasks: Vec::new(),
        }
    }

    /// Register a sensor. Must happen before streaming starts.
    pub fn register_sensor(&mut self, sensor: impl Into<SensorDevice>) -> Result<(), SensorError> {
        let device = sensor.into();
        if self.is_streaming() {
            return Err(SensorError::AlreadyStreaming);
        }
        let id = device.id().to_string();
        let rate = device.sampling_rate();
        if sampling_interval(rate).is_none() {
            return Err(SensorError::InvalidRate {
                sensor_id: id,
                rate,
            });
        }
        if self.slots.iter().any(|s| s.entry.sensor_id == id) {
            return Err(SensorError::Duplicate(id));
        }

        tracing::info!(sensor = %id, kind = %device.kind(), rate_hz = rate, "registered sensor");
        self.slots.push(SensorSlot {
            entry: HistoryEntry {
                sensor_id: id.clone(),
                kind: device.kind(),
                history: Arc::new(RwLock::new(RingBuffer::new(self.config.history_capacity))),
            },
            device: Some(device),
            notifier: Arc::new(Notifier::new(id)),
        });
        Ok(())
    }

    /// Invoke `callback` once per reading produced by `sensor_id`.
    pub fn register_callback(
        &self,
        sensor_id: &str,
        callback: ReadingCallback,
    ) -> Result<(), SensorError> {
        self.slot(sensor_id)?.notifier.register_callback(callback);
        Ok(())
    }

    /// Forward every reading of `sensor_id` into `sender`.
    pub fn subscribe_with(
        &self,
        sensor_id: &str,
        sender: mpsc::Sender<Reading>,
    ) -> Result<(), SensorError> {
        self.slot(sensor_id)?.notifier.register_channel(sender);
        Ok(())
    }

    /// Open a bounded channel receiving every reading of `sensor_id`.
    pub fn subscribe(
        &self,
        sensor_id: &str,
        capacity: usize,
    ) -> Result<mpsc::Receiver<Reading>, SensorError> {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        self.subscribe_with(sensor_id, tx)?;
        Ok(rx)
    }

    /// Initialize every registered sensor concurrently.
    ///
    /// Failures (including panics) are logged and leave that sensor inactive.
    /// Returns the number of sensors that came up.
    pub async fn initialize_all(&mut self) -> usize {
        let mut set = JoinSet::new();
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if let Some(mut device) = slot.device.take() {
                set.spawn(async move {
                    let result = catch_unwind(AssertUnwindSafe(|| device.initialize()))
                        .unwrap_or_else(|_| {
                            Err(SensorError::Init {
                                sensor_id: device.id().to_string(),
                                reason: "initializer panicked".to_string(),
                            })
                        });
                    (idx, device, result)
                });
            }
        }

        let total = set.len();
        let mut succeeded = 0;
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((idx, device, result)) => {
                    match result {
                        Ok(()) => succeeded += 1,
                        Err(e) => tracing::warn!("{e}"),
                    }
                    self.slots[idx].device = Some(device);
                }
                Err(e) => tracing::error!("sensor initialization task failed: {e}"),
            }
        }

        tracing::info!("Initialized {succeeded}/{total} sensors");
        succeeded
    }

    /// Spawn one sampling loop per active sensor. Must be called from within
    /// a Tokio runtime. Returns the number of loops started.
    pub fn start_streaming(&mut self) -> Result<usize, SensorError> {
        if self.is_streaming() {
            return Err(SensorError::AlreadyStreaming);
        }
        self.stop.reset();

        for (idx, slot) in self.slots.iter_mut().enumerate() {
            let active = slot.device.as_ref().map(|d| d.is_active()).unwrap_or(false);
            if !active {
                tracing::debug!(sensor = %slot.entry.sensor_id, "not active, skipping stream");
                continue;
            }
            if let Some(device) = slot.device.take() {
                let handle = tokio::spawn(stream_sensor(
                    device,
                    slot.entry.history.clone(),
                    slot.notifier.clone(),
                    self.stop.clone(),
                    self.config.retry_backoff,
                ));
                self.tasks.push((idx, handle));
            }
        }

        tracing::info!("Started streaming from {} sensors", self.tasks.len());
        Ok(self.tasks.len())
    }

    /// Raise the stop signal and wait for every sampling loop to exit.
    pub async fn stop_streaming(&mut self) {
        self.stop.trigger();
        for (idx, handle) in self.tasks.drain(..) {
            match handle.await {
                Ok(device) => self.slots[idx].device = Some(device),
                Err(e) => tracing::error!(
                    sensor = %self.slots[idx].entry.sensor_id,
                    "sampling task failed: {e}"
                ),
            }
        }
        tracing::info!("Stopped all sensor streaming");
    }

    /// Stop streaming, then shut every sensor down.
    pub async fn shutdown_all(&mut self) {
        self.stop_streaming().await;
        for slot in &mut self.slots {
            if let Some(device) = slot.device.as_mut() {
                device.shutdown();
            }
        }
        tracing::info!("All sensors shut down");
    }

    pub fn is_streaming(&self) -> bool {
        !self.tasks.is_empty()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Registered ids in registration order.
    pub fn sensor_ids(&self) -> Vec<String> {
        self.slots.iter().map(|s| s.entry.sensor_id.clone()).collect()
    }

    /// Ids of sensors currently streaming or initialized.
    pub fn active_sensor_ids(&self) -> Vec<String> {
        let streaming: Vec<usize> = self.tasks.iter().map(|(idx, _)| *idx).collect();
        self.slots
            .iter()
            .enumerate()
            .filter(|(idx, slot)| {
                streaming.contains(idx)
                    || slot.device.as_ref().map(|d| d.is_active()).unwrap_or(false)
            })
            .map(|(_, slot)| slot.entry.sensor_id.clone())
            .collect()
    }

    pub fn recent(&self, sensor_id: &str, n: usize) -> Vec<Reading> {
        self.slot(sensor_id)
            .map(|s| read_history(&s.entry.history, |h| h.last_n(n)))
            .unwrap_or_default()
    }

    pub fn stats(&self, sensor_id: &str) -> Option<SensorStats> {
        let slot = self.slot(sensor_id).ok()?;
        read_history(&slot.entry.history, SensorStats::from_history)
    }

    /// A read-only view over the currently registered sensors' histories.
    pub fn history_view(&self) -> HistoryView {
        HistoryView {
            entries: Arc::new(self.slots.iter().map(|s| s.entry.clone()).collect()),
        }
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    fn slot(&self, sensor_id: &str) -> Result<&SensorSlot, SensorError> {
        self.slots
            .iter()
            .find(|s| s.entry.sensor_id == sensor_id)
            .ok_or_else(|| SensorError::UnknownSensor(sensor_id.to_string()))
    }
}

impl Default for SensorManager {
    fn default() -> Self {
        Self::new(ManagerConfig::default())
    }
}

/// Sampling loop for one sensor. Returns the sensor once stopped.
async fn stream_sensor(
    mut device: SensorDevice,
    history: History,
    notifier: Arc<Notifier>,
    stop: StopSignal,
    retry_backoff: Duration,
) -> SensorDevice {
    let Some(interval) = sampling_interval(device.sampling_rate()) else {
        tracing::error!(sensor = %device.id(), "unusable sampling rate, not streaming");
        return device;
    };

    while !stop.is_set() {
        let pause = match device.read() {
            Ok(reading) => {
                record(&history, reading.clone());
                notifier.notify(&reading);
                interval
            }
            Err(e) => {
                tracing::warn!(sensor = %device.id(), "Error streaming: {e}");
                retry_backoff
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = stop.stopped() => break,
        }
    }

    device
}

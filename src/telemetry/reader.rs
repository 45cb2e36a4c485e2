// src/telemetry/reader.rs
//
// Diperiodic metric reader: a collector polls instruments on its own cadence
// and appends samples to a bounded ring; an exporter drains the ring on an
// independent cadence. Tuning the ratio of the two periods yields
// high-frequency gauges without overwhelming the exporter.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::constants::{
    DEFAULT_COLLECT_INTERVAL_MILLIS, DEFAULT_COLLECT_TIMEOUT_MILLIS,
    DEFAULT_EXPORT_INTERVAL_MILLIS, DEFAULT_EXPORT_TIMEOUT_MILLIS, DEFAULT_SAMPLE_RING_CAPACITY,
};
use crate::error::{MscError, Result};

use super::exporter::MetricExporter;
use super::{Sample, Telemetry};

/// Collect and export cadences, each with its own bound.
#[derive(Debug, Clone)]
pub struct DiperiodicReaderConfig {
    pub collect_interval_millis: u64,
    pub collect_timeout_millis: u64,
    pub export_interval_millis: u64,
    pub export_timeout_millis: u64,
    pub ring_capacity: usize,
}

impl Default for DiperiodicReaderConfig {
    fn default() -> Self {
        Self {
            collect_interval_millis: DEFAULT_COLLECT_INTERVAL_MILLIS,
            collect_timeout_millis: DEFAULT_COLLECT_TIMEOUT_MILLIS,
            export_interval_millis: DEFAULT_EXPORT_INTERVAL_MILLIS,
            export_timeout_millis: DEFAULT_EXPORT_TIMEOUT_MILLIS,
            ring_capacity: DEFAULT_SAMPLE_RING_CAPACITY,
        }
    }
}

impl DiperiodicReaderConfig {
    fn validate(&self) -> Result<()> {
        if self.collect_interval_millis == 0 || self.export_interval_millis == 0 {
            return Err(MscError::invalid_argument(
                "collect and export intervals must be greater than zero",
            ));
        }
        Ok(())
    }

    /// Read intervals from an `opentelemetry.metrics.reader` config section.
    pub fn from_config(reader_config: Option<&serde_json::Value>) -> Self {
        let mut config = Self::default();
        if let Some(options) = reader_config.and_then(|value| value.get("options")) {
            let field = |name: &str| options.get(name).and_then(|value| value.as_u64());
            if let Some(value) = field("collect_interval_millis") {
                config.collect_interval_millis = value;
            }
            if let Some(value) = field("collect_timeout_millis") {
                config.collect_timeout_millis = value;
            }
            if let Some(value) = field("export_interval_millis") {
                config.export_interval_millis = value;
            }
            if let Some(value) = field("export_timeout_millis") {
                config.export_timeout_millis = value;
            }
        }
        config
    }
}

/// Receives samples from outside the local collector (worker processes
/// forwarding through the telemetry manager).
pub trait SampleSink: Send + Sync {
    fn submit(&self, samples: Vec<Sample>);
}

struct Ring {
    samples: Mutex<VecDeque<Sample>>,
    capacity: usize,
}

impl Ring {
    fn push(&self, incoming: Vec<Sample>) {
        let mut samples = self.samples.lock().expect("sample ring lock poisoned");
        for sample in incoming {
            if samples.len() >= self.capacity {
                samples.pop_front();
            }
            samples.push_back(sample);
        }
    }

    fn drain(&self) -> Vec<Sample> {
        let mut samples = self.samples.lock().expect("sample ring lock poisoned");
        samples.drain(..).collect()
    }
}

pub struct DiperiodicExportingMetricReader {
    telemetry: Arc<Telemetry>,
    exporter: Arc<dyn MetricExporter>,
    ring: Arc<Ring>,
    config: DiperiodicReaderConfig,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl DiperiodicExportingMetricReader {
    /// Start the collect and export tasks.
    pub fn start(
        telemetry: Arc<Telemetry>,
        exporter: Arc<dyn MetricExporter>,
        config: DiperiodicReaderConfig,
    ) -> Result<Arc<Self>> {
        config.validate()?;
        let (shutdown_tx, _) = watch::channel(false);
        let reader = Arc::new(Self {
            telemetry,
            exporter,
            ring: Arc::new(Ring {
                samples: Mutex::new(VecDeque::new()),
                capacity: config.ring_capacity,
            }),
            config,
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
        });

        let collect_task = tokio::spawn(Self::collect_loop(reader.clone()));
        let export_task = tokio::spawn(Self::export_loop(reader.clone()));
        reader
            .tasks
            .lock()
            .expect("reader task list poisoned")
            .extend([collect_task, export_task]);
        Ok(reader)
    }

    async fn collect_loop(reader: Arc<Self>) {
        let mut shutdown = reader.shutdown_tx.subscribe();
        let period = Duration::from_millis(reader.config.collect_interval_millis);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => reader.collect_iteration().await,
                _ = shutdown.changed() => break,
            }
        }
    }

    async fn export_loop(reader: Arc<Self>) {
        let mut shutdown = reader.shutdown_tx.subscribe();
        let period = Duration::from_millis(reader.config.export_interval_millis);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => reader.export_iteration().await,
                _ = shutdown.changed() => break,
            }
        }
        // Final collect + export so shutdown never drops samples.
        reader.collect_iteration().await;
        reader.export_iteration().await;
    }

    async fn collect_iteration(&self) {
        let timeout = Duration::from_millis(self.config.collect_timeout_millis);
        let telemetry = self.telemetry.clone();
        let collected =
            tokio::time::timeout(timeout, async move { telemetry.collect() }).await;
        match collected {
            Ok(samples) => self.ring.push(samples),
            Err(_) => warn!("metrics collection timed out"),
        }
    }

    async fn export_iteration(&self) {
        let samples = self.ring.drain();
        if samples.is_empty() {
            return;
        }
        let timeout = Duration::from_millis(self.config.export_timeout_millis);
        match tokio::time::timeout(timeout, self.exporter.export(samples)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "metrics export failed"),
            Err(_) => warn!("metrics export timed out"),
        }
    }

    /// Collect and export immediately.
    pub async fn force_flush(&self) -> Result<()> {
        self.collect_iteration().await;
        self.export_iteration().await;
        self.exporter.force_flush().await
    }

    /// Stop both tasks, flushing a final round of samples.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let tasks: Vec<JoinHandle<()>> = self
            .tasks
            .lock()
            .expect("reader task list poisoned")
            .drain(..)
            .collect();
        for task in tasks {
            let _ = task.await;
        }
    }
}

impl SampleSink for DiperiodicExportingMetricReader {
    fn submit(&self, samples: Vec<Sample>) {
        self.ring.push(samples);
    }
}

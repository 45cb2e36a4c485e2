// src/telemetry/exporter.rs
//
// Metric exporters consumed by the diperiodic reader. Console and JSON-lines
// exporters ship with the crate; OTLP-style exporters plug in through the
// same trait.

use std::path::Path;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::{debug, info};

use crate::error::{MscError, Result};

use super::Sample;

#[async_trait]
pub trait MetricExporter: Send + Sync {
    async fn export(&self, samples: Vec<Sample>) -> Result<()>;

    async fn force_flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Logs batch summaries through `tracing`.
pub struct ConsoleMetricExporter;

#[async_trait]
impl MetricExporter for ConsoleMetricExporter {
    async fn export(&self, samples: Vec<Sample>) -> Result<()> {
        info!(count = samples.len(), "exporting metric samples");
        for sample in &samples {
            debug!(
                name = %sample.name,
                value = sample.value,
                attributes = ?sample.attributes,
                "metric sample"
            );
        }
        Ok(())
    }
}

/// Appends one JSON document per sample to a file.
pub struct JsonlMetricExporter {
    file: Mutex<std::fs::File>,
}

impl JsonlMetricExporter {
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| MscError::unavailable(format!("cannot create export dir: {err}")))?;
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(|err| {
                MscError::unavailable(format!("cannot open metrics file {}: {err}", path.display()))
            })?;
        Ok(Self {
            file: Mutex::new(file),
        })
    }
}

#[async_trait]
impl MetricExporter for JsonlMetricExporter {
    async fn export(&self, samples: Vec<Sample>) -> Result<()> {
        use std::io::Write;
        let mut file = self.file.lock().expect("metrics file lock poisoned");
        for sample in samples {
            let line = serde_json::to_string(&sample)
                .map_err(|err| MscError::unavailable(format!("cannot encode sample: {err}")))?;
            writeln!(file, "{line}")
                .map_err(|err| MscError::unavailable(format!("cannot write sample: {err}")))?;
        }
        Ok(())
    }

    async fn force_flush(&self) -> Result<()> {
        use std::io::Write;
        self.file
            .lock()
            .expect("metrics file lock poisoned")
            .flush()
            .map_err(|err| MscError::unavailable(format!("cannot flush samples: {err}")))
    }
}

/// Collects exported samples in memory; used by tests and embedders that
/// want to inspect the stream directly.
#[derive(Default)]
pub struct MemoryMetricExporter {
    samples: Mutex<Vec<Sample>>,
}

impl MemoryMetricExporter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn exported(&self) -> Vec<Sample> {
        self.samples
            .lock()
            .expect("exported samples lock poisoned")
            .clone()
    }
}

#[async_trait]
impl MetricExporter for MemoryMetricExporter {
    async fn export(&self, samples: Vec<Sample>) -> Result<()> {
        self.samples
            .lock()
            .expect("exported samples lock poisoned")
            .extend(samples);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{Attributes, InstrumentKind};
    use tempfile::TempDir;

    fn sample(name: &str, value: f64) -> Sample {
        Sample {
            name: name.to_string(),
            kind: InstrumentKind::Gauge,
            value,
            attributes: Attributes::new(),
            timestamp_nanos: 1,
        }
    }

    #[tokio::test]
    async fn test_jsonl_exporter_appends_lines() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.jsonl");
        let exporter = JsonlMetricExporter::create(&path).unwrap();

        exporter
            .export(vec![sample("latency", 0.5), sample("data_rate", 100.0)])
            .await
            .unwrap();
        exporter.force_flush().await.unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        let first: Sample = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(first.name, "latency");
    }

    #[tokio::test]
    async fn test_memory_exporter_accumulates() {
        let exporter = MemoryMetricExporter::new();
        exporter.export(vec![sample("latency", 0.1)]).await.unwrap();
        exporter.export(vec![sample("latency", 0.2)]).await.unwrap();
        assert_eq!(exporter.exported().len(), 2);
    }
}

// src/telemetry/mod.rs
//
// Telemetry pipeline: per-operation instruments, attributes providers, a
// diperiodic metric reader (independent collect/export cadences), exporters,
// a tail span sampler, and a loopback TCP manager that lets worker processes
// forward samples to the parent.

pub mod attributes;
pub mod exporter;
pub mod instrument;
pub mod manager;
pub mod reader;
pub mod sampler;

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use attributes::{
    collect_attributes, AttributesProvider, ConfigAttributesProvider,
    EnvironmentVariablesAttributesProvider, HostAttributesProvider, ProcessAttributesProvider,
    StaticAttributesProvider, ThreadAttributesProvider,
};
pub use exporter::{ConsoleMetricExporter, JsonlMetricExporter, MemoryMetricExporter, MetricExporter};
pub use instrument::InstrumentedStorageProvider;
pub use manager::{TelemetryManager, TelemetryProxy};
pub use reader::{DiperiodicExportingMetricReader, DiperiodicReaderConfig, SampleSink};
pub use sampler::{OperationSpan, TailSampler};

/// Tag set attached to samples. Ordered so attribute sets hash and compare
/// deterministically.
pub type Attributes = BTreeMap<String, String>;

/// Gauges capture the most recent observation per attribute set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GaugeName {
    /// Operation latency in seconds.
    Latency,
    /// Bytes moved by a successful read/write/copy.
    DataSize,
    /// Bytes per second for a successful read/write/copy.
    DataRate,
}

impl GaugeName {
    pub const ALL: [GaugeName; 3] = [GaugeName::Latency, GaugeName::DataSize, GaugeName::DataRate];

    pub fn as_str(&self) -> &'static str {
        match self {
            GaugeName::Latency => "latency",
            GaugeName::DataSize => "data_size",
            GaugeName::DataRate => "data_rate",
        }
    }
}

/// Sums accumulate monotonically per attribute set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CounterName {
    /// Requests started.
    RequestSum,
    /// Responses finished, tagged with status.
    ResponseSum,
    /// Bytes accumulated by status.
    DataSizeSum,
}

impl CounterName {
    pub const ALL: [CounterName; 3] = [
        CounterName::RequestSum,
        CounterName::ResponseSum,
        CounterName::DataSizeSum,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            CounterName::RequestSum => "request.sum",
            CounterName::ResponseSum => "response.sum",
            CounterName::DataSizeSum => "data_size.sum",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstrumentKind {
    Gauge,
    Sum,
}

/// One collected measurement, ready for export or wire transfer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Sample {
    pub name: String,
    pub kind: InstrumentKind,
    pub value: f64,
    pub attributes: Attributes,
    pub timestamp_nanos: u64,
}

pub(crate) fn unix_nanos() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}

#[derive(Default)]
struct InstrumentValues {
    values: Mutex<HashMap<Attributes, f64>>,
}

/// Last-value instrument.
pub struct Gauge {
    name: &'static str,
    state: InstrumentValues,
}

impl Gauge {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            state: InstrumentValues::default(),
        }
    }

    pub fn set(&self, value: f64, attributes: Attributes) {
        self.state
            .values
            .lock()
            .expect("gauge state lock poisoned")
            .insert(attributes, value);
    }
}

/// Monotonic sum instrument.
pub struct Counter {
    name: &'static str,
    state: InstrumentValues,
}

impl Counter {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            state: InstrumentValues::default(),
        }
    }

    pub fn add(&self, delta: f64, attributes: Attributes) {
        *self
            .state
            .values
            .lock()
            .expect("counter state lock poisoned")
            .entry(attributes)
            .or_insert(0.0) += delta;
    }

    /// Current cumulative value summed over attribute sets matching `filter`.
    pub fn value_where(&self, filter: impl Fn(&Attributes) -> bool) -> f64 {
        self.state
            .values
            .lock()
            .expect("counter state lock poisoned")
            .iter()
            .filter(|(attributes, _)| filter(attributes))
            .map(|(_, value)| value)
            .sum()
    }
}

/// Instrument registry for one process. Collection snapshots every instrument
/// into `Sample`s; sums are reported cumulatively.
pub struct Telemetry {
    gauges: HashMap<GaugeName, Arc<Gauge>>,
    counters: HashMap<CounterName, Arc<Counter>>,
    attributes_providers: Vec<Arc<dyn AttributesProvider>>,
}

impl std::fmt::Debug for Telemetry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Telemetry")
            .field("gauges", &self.gauges.len())
            .field("counters", &self.counters.len())
            .field("attributes_providers", &self.attributes_providers.len())
            .finish()
    }
}

impl Telemetry {
    pub fn new(attributes_providers: Vec<Arc<dyn AttributesProvider>>) -> Self {
        let mut gauges = HashMap::new();
        for name in GaugeName::ALL {
            gauges.insert(name, Arc::new(Gauge::new(name.as_str())));
        }
        let mut counters = HashMap::new();
        for name in CounterName::ALL {
            counters.insert(name, Arc::new(Counter::new(name.as_str())));
        }
        Self {
            gauges,
            counters,
            attributes_providers,
        }
    }

    pub fn gauge(&self, name: GaugeName) -> Arc<Gauge> {
        self.gauges[&name].clone()
    }

    pub fn counter(&self, name: CounterName) -> Arc<Counter> {
        self.counters[&name].clone()
    }

    /// Tags contributed by the configured attributes providers; on collision
    /// later providers override earlier ones.
    pub fn base_attributes(&self) -> Attributes {
        collect_attributes(&self.attributes_providers)
    }

    /// Snapshot every instrument. Gauges report their last value per
    /// attribute set, sums their cumulative value.
    pub fn collect(&self) -> Vec<Sample> {
        let timestamp_nanos = unix_nanos();
        let mut samples = Vec::new();
        for gauge in self.gauges.values() {
            let values = gauge.state.values.lock().expect("gauge state lock poisoned");
            for (attributes, value) in values.iter() {
                samples.push(Sample {
                    name: gauge.name.to_string(),
                    kind: InstrumentKind::Gauge,
                    value: *value,
                    attributes: attributes.clone(),
                    timestamp_nanos,
                });
            }
        }
        for counter in self.counters.values() {
            let values = counter
                .state
                .values
                .lock()
                .expect("counter state lock poisoned");
            for (attributes, value) in values.iter() {
                samples.push(Sample {
                    name: counter.name.to_string(),
                    kind: InstrumentKind::Sum,
                    value: *value,
                    attributes: attributes.clone(),
                    timestamp_nanos,
                });
            }
        }
        samples
    }
}

/// Build a `Telemetry` from the `opentelemetry.metrics.attributes` config
/// section.
pub fn telemetry_from_config(
    metrics_config: Option<&serde_json::Value>,
    full_config: &serde_json::Value,
) -> Result<Arc<Telemetry>> {
    let mut providers: Vec<Arc<dyn AttributesProvider>> = Vec::new();
    if let Some(attribute_configs) = metrics_config
        .and_then(|metrics| metrics.get("attributes"))
        .and_then(|value| value.as_array())
    {
        for config in attribute_configs {
            providers.push(attributes::build_attributes_provider(config, full_config)?);
        }
    }
    Ok(Arc::new(Telemetry::new(providers)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(pairs: &[(&str, &str)]) -> Attributes {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_counter_accumulates_per_attribute_set() {
        let telemetry = Telemetry::new(Vec::new());
        let counter = telemetry.counter(CounterName::RequestSum);
        counter.add(1.0, tags(&[("operation", "read")]));
        counter.add(1.0, tags(&[("operation", "read")]));
        counter.add(1.0, tags(&[("operation", "write")]));

        assert_eq!(
            counter.value_where(|a| a.get("operation").map(String::as_str) == Some("read")),
            2.0
        );
        assert_eq!(counter.value_where(|_| true), 3.0);
    }

    #[test]
    fn test_gauge_keeps_last_value() {
        let telemetry = Telemetry::new(Vec::new());
        let gauge = telemetry.gauge(GaugeName::Latency);
        gauge.set(0.5, tags(&[("operation", "read")]));
        gauge.set(0.25, tags(&[("operation", "read")]));

        let samples = telemetry.collect();
        let latency: Vec<&Sample> = samples.iter().filter(|s| s.name == "latency").collect();
        assert_eq!(latency.len(), 1);
        assert_eq!(latency[0].value, 0.25);
        assert_eq!(latency[0].kind, InstrumentKind::Gauge);
    }

    #[test]
    fn test_collect_covers_all_instruments() {
        let telemetry = Telemetry::new(Vec::new());
        telemetry
            .counter(CounterName::ResponseSum)
            .add(1.0, tags(&[("status", "success")]));
        telemetry.gauge(GaugeName::DataRate).set(100.0, Attributes::new());
        let samples = telemetry.collect();
        let names: Vec<&str> = samples.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"response.sum"));
        assert!(names.contains(&"data_rate"));
    }
}

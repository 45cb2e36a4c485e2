// tests/test_telemetry_pipeline.rs
//
// Telemetry end to end: instruments observed through real client operations,
// the conservation law between request and response sums, the diperiodic
// reader exporting to a collector, and sample forwarding through the
// loopback manager.

mod common;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use bytes::Bytes;
use mscio::telemetry::{
    CounterName, DiperiodicExportingMetricReader, DiperiodicReaderConfig, GaugeName,
    MemoryMetricExporter, SampleSink, Telemetry, TelemetryManager, TelemetryProxy,
};
use mscio::{StorageClient, StorageClientConfig};

async fn telemetry_client(bucket: &str) -> Result<(StorageClient, Arc<Telemetry>)> {
    common::init_logging();
    let config = serde_json::json!({
        "profiles": {
            "observed": {"storage_provider": {"type": "memory", "options": {"base_path": bucket}}}
        },
        "opentelemetry": {
            "metrics": {
                "attributes": [
                    {"type": "static", "options": {"attributes": {"service.name": "mscio-it"}}},
                    {"type": "process"}
                ]
            }
        }
    });
    let realized = StorageClientConfig::from_value(&config, "observed").await?;
    let telemetry = realized.telemetry.clone().expect("telemetry configured");
    Ok((StorageClient::new(realized), telemetry))
}

fn counter_total(telemetry: &Telemetry, name: CounterName) -> f64 {
    telemetry.counter(name).value_where(|_| true)
}

#[tokio::test]
async fn test_request_response_conservation_across_operations() -> Result<()> {
    let (client, telemetry) = telemetry_client("it-telemetry-conservation").await?;

    client.write("a", Bytes::from_static(b"1")).await?;
    client.write("b", Bytes::from_static(b"22")).await?;
    client.read("a", None).await?;
    client.copy("a", "a-copy").await?;
    client.delete("b").await?;
    let _ = client.read("missing", None).await; // errors count too

    let requests = counter_total(&telemetry, CounterName::RequestSum);
    let responses = counter_total(&telemetry, CounterName::ResponseSum);
    assert!(requests > 0.0);
    assert_eq!(requests, responses, "every request must be answered");

    // Failed operations carry an error status, successful ones success.
    let failures = telemetry
        .counter(CounterName::ResponseSum)
        .value_where(|attributes| {
            attributes
                .get("mscio.status")
                .is_some_and(|status| status.starts_with("error."))
        });
    assert!(failures >= 1.0);
    Ok(())
}

#[tokio::test]
async fn test_data_metrics_and_provider_tags() -> Result<()> {
    let (client, telemetry) = telemetry_client("it-telemetry-data").await?;

    client.write("payload", Bytes::from_static(b"0123456789")).await?;
    client.read("payload", None).await?;

    let bytes_moved = telemetry
        .counter(CounterName::DataSizeSum)
        .value_where(|attributes| {
            attributes.get("mscio.provider").map(String::as_str) == Some("memory")
        });
    assert_eq!(bytes_moved, 20.0, "10 bytes written + 10 bytes read");

    // Attributes providers contribute to every sample's tag set.
    let samples = telemetry.collect();
    let latency_sample = samples
        .iter()
        .find(|sample| sample.name == GaugeName::Latency.as_str())
        .expect("latency gauge populated");
    assert_eq!(
        latency_sample.attributes.get("service.name").map(String::as_str),
        Some("mscio-it")
    );
    assert!(latency_sample.attributes.contains_key("process.pid"));
    Ok(())
}

#[tokio::test]
async fn test_diperiodic_reader_exports_operation_samples() -> Result<()> {
    let (client, telemetry) = telemetry_client("it-telemetry-reader").await?;
    let exporter = Arc::new(MemoryMetricExporter::new());
    let reader = DiperiodicExportingMetricReader::start(
        telemetry.clone(),
        exporter.clone(),
        DiperiodicReaderConfig {
            collect_interval_millis: 10,
            export_interval_millis: 30,
            ..Default::default()
        },
    )?;

    client.write("observed", Bytes::from_static(b"body")).await?;
    client.read("observed", None).await?;
    tokio::time::sleep(Duration::from_millis(80)).await;
    reader.shutdown().await;

    let exported = exporter.exported();
    assert!(exported.iter().any(|sample| sample.name == "request.sum"));
    assert!(exported.iter().any(|sample| sample.name == "latency"));
    assert!(exported.iter().any(|sample| sample.name == "data_rate"));
    Ok(())
}

#[tokio::test]
async fn test_worker_samples_flow_through_manager() -> Result<()> {
    common::init_logging();
    let telemetry = Arc::new(Telemetry::new(Vec::new()));
    let exporter = Arc::new(MemoryMetricExporter::new());
    let reader = DiperiodicExportingMetricReader::start(
        telemetry,
        exporter.clone(),
        DiperiodicReaderConfig {
            collect_interval_millis: 60_000,
            export_interval_millis: 60_000,
            ..Default::default()
        },
    )?;

    // Parent side: manager feeding the reader's ring. Port 0 avoids clashes.
    let manager =
        TelemetryManager::start(reader.clone() as Arc<dyn SampleSink>, Some("127.0.0.1:0")).await?;
    let addr = manager.local_addr().to_string();

    // Worker side: forward a batch, as a sync worker process would.
    let proxy = TelemetryProxy::connect(Some(&addr)).await?;
    let sample = mscio::telemetry::Sample {
        name: "latency".to_string(),
        kind: mscio::telemetry::InstrumentKind::Gauge,
        value: 0.125,
        attributes: [("mscio.operation".to_string(), "read".to_string())]
            .into_iter()
            .collect(),
        timestamp_nanos: 42,
    };
    proxy.submit(&[sample]).await?;

    // Allow the accept loop to drain, then flush the ring to the exporter.
    tokio::time::sleep(Duration::from_millis(50)).await;
    reader.force_flush().await?;
    reader.shutdown().await;
    manager.shutdown();

    let exported = exporter.exported();
    assert!(exported
        .iter()
        .any(|sample| sample.name == "latency" && sample.value == 0.125));
    Ok(())
}

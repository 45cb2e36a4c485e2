// src/telemetry/instrument.rs
//
// Decorator that adds metric emission and span sampling to any storage
// provider without touching the underlying implementations. Every operation
// increments request.sum before the call and response.sum after it with the
// final status; data size and rate are only emitted for successful data I/O,
// since a failed transfer's byte count would be misleading.

use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;
use crate::types::{ByteRange, ListOptions, ObjectMetadata, PutOptions, StorageProvider};

use super::sampler::{OperationSpan, TailSampler};
use super::{Attributes, CounterName, GaugeName, Telemetry};

const ATTR_PROVIDER: &str = "mscio.provider";
const ATTR_OPERATION: &str = "mscio.operation";
const ATTR_STATUS: &str = "mscio.status";

pub struct InstrumentedStorageProvider {
    inner: Arc<dyn StorageProvider>,
    telemetry: Arc<Telemetry>,
    profile: String,
    sampler: TailSampler,
}

impl InstrumentedStorageProvider {
    pub fn new(
        inner: Arc<dyn StorageProvider>,
        telemetry: Arc<Telemetry>,
        profile: &str,
        sampler: TailSampler,
    ) -> Self {
        Self {
            inner,
            telemetry,
            profile: profile.to_string(),
            sampler,
        }
    }

    fn operation_attributes(&self, operation: &'static str) -> Attributes {
        let mut attributes = self.telemetry.base_attributes();
        attributes.insert(
            ATTR_PROVIDER.to_string(),
            self.inner.provider_name().to_string(),
        );
        attributes.insert(ATTR_OPERATION.to_string(), operation.to_string());
        attributes
    }

    /// Wrap one provider round-trip: request.sum before, latency +
    /// response.sum after, data metrics on successful I/O, span through the
    /// tail sampler.
    async fn observe<T, F>(
        &self,
        operation: &'static str,
        key: &str,
        data_size_of: impl Fn(&T) -> Option<u64>,
        call: F,
    ) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let attributes = self.operation_attributes(operation);
        self.telemetry
            .counter(CounterName::RequestSum)
            .add(1.0, attributes.clone());

        let start = Instant::now();
        let outcome = call.await;
        let latency = start.elapsed();

        let status = match &outcome {
            Ok(_) => "success".to_string(),
            Err(err) => format!("error.{}", err.kind()),
        };
        let mut tagged = attributes;
        tagged.insert(ATTR_STATUS.to_string(), status.clone());

        self.telemetry
            .gauge(GaugeName::Latency)
            .set(latency.as_secs_f64(), tagged.clone());
        self.telemetry
            .counter(CounterName::ResponseSum)
            .add(1.0, tagged.clone());

        if let Ok(value) = &outcome {
            if let Some(data_size) = data_size_of(value) {
                self.telemetry
                    .gauge(GaugeName::DataSize)
                    .set(data_size as f64, tagged.clone());
                let seconds = latency.as_secs_f64();
                if seconds > 0.0 {
                    self.telemetry
                        .gauge(GaugeName::DataRate)
                        .set(data_size as f64 / seconds, tagged.clone());
                }
                self.telemetry
                    .counter(CounterName::DataSizeSum)
                    .add(data_size as f64, tagged.clone());
            }
        }

        self.sampler.observe(&OperationSpan {
            operation,
            provider: self.inner.provider_name().to_string(),
            profile: self.profile.clone(),
            key: key.to_string(),
            status,
            latency,
        });

        outcome.map_err(|err| err.with_operation(operation).with_profile(self.profile.clone()))
    }
}

#[async_trait]
impl StorageProvider for InstrumentedStorageProvider {
    fn provider_name(&self) -> &str {
        self.inner.provider_name()
    }

    fn base_path(&self) -> &str {
        self.inner.base_path()
    }

    async fn put_object(&self, path: &str, body: Bytes, options: &PutOptions) -> Result<()> {
        let size = body.len() as u64;
        self.observe(
            "write",
            path,
            move |_: &()| Some(size),
            self.inner.put_object(path, body, options),
        )
        .await
    }

    async fn get_object(&self, path: &str, byte_range: Option<ByteRange>) -> Result<Bytes> {
        self.observe(
            "read",
            path,
            |body: &Bytes| Some(body.len() as u64),
            self.inner.get_object(path, byte_range),
        )
        .await
    }

    async fn copy_object(&self, src_path: &str, dest_path: &str) -> Result<()> {
        // Size the transfer up front; the copy itself returns nothing.
        let size = self
            .inner
            .get_object_metadata(src_path, true)
            .await
            .map(|meta| meta.content_length)
            .ok();
        self.observe(
            "copy",
            src_path,
            move |_: &()| size,
            self.inner.copy_object(src_path, dest_path),
        )
        .await
    }

    async fn delete_object(&self, path: &str, if_match: Option<&str>) -> Result<()> {
        self.observe(
            "delete",
            path,
            |_: &()| None,
            self.inner.delete_object(path, if_match),
        )
        .await
    }

    async fn get_object_metadata(&self, path: &str, strict: bool) -> Result<ObjectMetadata> {
        self.observe(
            "info",
            path,
            |_: &ObjectMetadata| None,
            self.inner.get_object_metadata(path, strict),
        )
        .await
    }

    async fn list_objects(&self, prefix: &str, options: &ListOptions) -> Result<Vec<ObjectMetadata>> {
        self.observe(
            "list",
            prefix,
            |_: &Vec<ObjectMetadata>| None,
            self.inner.list_objects(prefix, options),
        )
        .await
    }

    async fn upload_file(&self, remote_path: &str, local_path: &Path) -> Result<()> {
        let size = tokio::fs::metadata(local_path).await.map(|meta| meta.len()).ok();
        self.observe(
            "write",
            remote_path,
            move |_: &()| size,
            self.inner.upload_file(remote_path, local_path),
        )
        .await
    }

    async fn download_file(
        &self,
        remote_path: &str,
        local_path: &Path,
        metadata: Option<&ObjectMetadata>,
    ) -> Result<()> {
        let size = metadata.map(|meta| meta.content_length);
        self.observe(
            "read",
            remote_path,
            move |_: &()| size,
            self.inner.download_file(remote_path, local_path, metadata),
        )
        .await
    }

    async fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        self.observe(
            "list",
            pattern,
            |_: &Vec<String>| None,
            self.inner.glob(pattern),
        )
        .await
    }

    async fn is_file(&self, path: &str) -> Result<bool> {
        self.observe("info", path, |_: &bool| None, self.inner.is_file(path))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::MemoryStorageProvider;
    use crate::telemetry::Telemetry;

    fn instrumented() -> (Arc<Telemetry>, InstrumentedStorageProvider) {
        let telemetry = Arc::new(Telemetry::new(Vec::new()));
        let inner = Arc::new(MemoryStorageProvider::new("bucket"));
        let provider = InstrumentedStorageProvider::new(
            inner,
            telemetry.clone(),
            "test",
            TailSampler::default(),
        );
        (telemetry, provider)
    }

    fn status_of(attributes: &Attributes) -> Option<&str> {
        attributes.get(ATTR_STATUS).map(String::as_str)
    }

    #[tokio::test]
    async fn test_request_response_conservation() {
        let (telemetry, provider) = instrumented();

        provider
            .put_object("k", Bytes::from_static(b"hello"), &PutOptions::default())
            .await
            .unwrap();
        provider.get_object("k", None).await.unwrap();
        let _ = provider.get_object("missing", None).await;

        let requests = telemetry
            .counter(CounterName::RequestSum)
            .value_where(|_| true);
        let responses = telemetry
            .counter(CounterName::ResponseSum)
            .value_where(|_| true);
        assert_eq!(requests, 3.0);
        assert_eq!(responses, 3.0);
    }

    #[tokio::test]
    async fn test_error_status_tagging() {
        let (telemetry, provider) = instrumented();
        let err = provider.get_object("missing", None).await.unwrap_err();
        assert_eq!(err.operation(), Some("read"));
        assert_eq!(err.profile(), Some("test"));

        let errored = telemetry
            .counter(CounterName::ResponseSum)
            .value_where(|attributes| status_of(attributes) == Some("error.not_found"));
        assert_eq!(errored, 1.0);
    }

    #[tokio::test]
    async fn test_data_size_only_on_success() {
        let (telemetry, provider) = instrumented();
        provider
            .put_object("k", Bytes::from_static(b"12345678"), &PutOptions::default())
            .await
            .unwrap();
        provider.get_object("k", None).await.unwrap();
        let _ = provider.get_object("missing", None).await;

        let bytes_ok = telemetry
            .counter(CounterName::DataSizeSum)
            .value_where(|attributes| status_of(attributes) == Some("success"));
        // 8 written + 8 read.
        assert_eq!(bytes_ok, 16.0);
        let bytes_err = telemetry
            .counter(CounterName::DataSizeSum)
            .value_where(|attributes| status_of(attributes) != Some("success"));
        assert_eq!(bytes_err, 0.0);
    }
}

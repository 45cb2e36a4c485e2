// src/telemetry/sampler.rs
//
// Tail sampling for operation spans: keep slow spans and errors, drop the
// rest before export.

use std::time::Duration;

use tracing::info;

use crate::constants::DEFAULT_TAIL_SAMPLER_THRESHOLD_MILLIS;

/// A finished storage operation observed by the instrumentation layer.
#[derive(Debug, Clone)]
pub struct OperationSpan {
    pub operation: &'static str,
    pub provider: String,
    pub profile: String,
    pub key: String,
    /// `success` or `error.{kind}`.
    pub status: String,
    pub latency: Duration,
}

impl OperationSpan {
    pub fn is_error(&self) -> bool {
        self.status != "success"
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TailSampler {
    threshold: Duration,
}

impl Default for TailSampler {
    fn default() -> Self {
        Self {
            threshold: Duration::from_millis(DEFAULT_TAIL_SAMPLER_THRESHOLD_MILLIS),
        }
    }
}

impl TailSampler {
    pub fn new(threshold: Duration) -> Self {
        Self { threshold }
    }

    /// Retain spans whose latency exceeds the threshold or that errored.
    pub fn should_keep(&self, span: &OperationSpan) -> bool {
        span.is_error() || span.latency >= self.threshold
    }

    /// Emit the span through `tracing` when it survives sampling.
    pub fn observe(&self, span: &OperationSpan) {
        if self.should_keep(span) {
            info!(
                target: "mscio::spans",
                operation = span.operation,
                provider = %span.provider,
                profile = %span.profile,
                key = %span.key,
                status = %span.status,
                latency_secs = span.latency.as_secs_f64(),
                "span retained by tail sampler"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(status: &str, latency: Duration) -> OperationSpan {
        OperationSpan {
            operation: "read",
            provider: "memory".into(),
            profile: "test".into(),
            key: "k".into(),
            status: status.into(),
            latency,
        }
    }

    #[test]
    fn test_keeps_slow_and_errored_spans() {
        let sampler = TailSampler::new(Duration::from_millis(100));
        assert!(sampler.should_keep(&span("success", Duration::from_millis(200))));
        assert!(sampler.should_keep(&span("error.not_found", Duration::from_millis(1))));
        assert!(!sampler.should_keep(&span("success", Duration::from_millis(10))));
    }
}

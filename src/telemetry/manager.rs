// src/telemetry/manager.rs
//
// Cross-process telemetry. The first initialization in the main process
// binds a loopback TCP listener; worker processes connect a proxy and
// forward their samples as JSON lines. The manager feeds received samples
// into the parent's reader ring and lives for the parent process's lifetime.

use std::sync::{Arc, Mutex};

use once_cell::sync::OnceCell;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::constants::DEFAULT_TELEMETRY_MANAGER_ADDR;
use crate::error::{MscError, Result};

use super::reader::SampleSink;
use super::Sample;

static MANAGER: OnceCell<Arc<TelemetryManager>> = OnceCell::new();

pub struct TelemetryManager {
    local_addr: std::net::SocketAddr,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl TelemetryManager {
    /// Bind `addr` (default `127.0.0.1:4315`) and feed received samples into
    /// `sink`.
    pub async fn start(sink: Arc<dyn SampleSink>, addr: Option<&str>) -> Result<Arc<Self>> {
        let addr = addr.unwrap_or(DEFAULT_TELEMETRY_MANAGER_ADDR);
        let listener = TcpListener::bind(addr).await.map_err(|err| {
            MscError::unavailable(format!("cannot bind telemetry manager on {addr}: {err}"))
        })?;
        let local_addr = listener
            .local_addr()
            .map_err(|err| MscError::unavailable(format!("telemetry manager address: {err}")))?;
        debug!(%local_addr, "telemetry manager listening");

        let accept_task = tokio::spawn(async move {
            loop {
                match listener.accept().await {
                    Ok((stream, peer)) => {
                        debug!(%peer, "telemetry worker connected");
                        let sink = sink.clone();
                        tokio::spawn(Self::serve_connection(stream, sink));
                    }
                    Err(err) => {
                        warn!(error = %err, "telemetry manager accept failed");
                        break;
                    }
                }
            }
        });

        Ok(Arc::new(Self {
            local_addr,
            accept_task: Mutex::new(Some(accept_task)),
        }))
    }

    /// Process-wide manager, bound once on first use.
    pub async fn global(sink: Arc<dyn SampleSink>) -> Result<Arc<Self>> {
        if let Some(manager) = MANAGER.get() {
            return Ok(manager.clone());
        }
        let manager = Self::start(sink, None).await?;
        Ok(MANAGER.get_or_init(|| manager).clone())
    }

    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.local_addr
    }

    async fn serve_connection(stream: TcpStream, sink: Arc<dyn SampleSink>) {
        let mut lines = BufReader::new(stream).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => match serde_json::from_str::<Vec<Sample>>(&line) {
                    Ok(samples) => sink.submit(samples),
                    Err(err) => warn!(error = %err, "discarding malformed sample batch"),
                },
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "telemetry connection read failed");
                    break;
                }
            }
        }
    }

    pub fn shutdown(&self) {
        if let Some(task) = self
            .accept_task
            .lock()
            .expect("telemetry manager task lock poisoned")
            .take()
        {
            task.abort();
        }
    }
}

/// Client half used by worker processes: forwards sample batches to the
/// parent's manager.
pub struct TelemetryProxy {
    stream: tokio::sync::Mutex<TcpStream>,
}

impl TelemetryProxy {
    pub async fn connect(addr: Option<&str>) -> Result<Self> {
        let addr = addr.unwrap_or(DEFAULT_TELEMETRY_MANAGER_ADDR);
        let stream = TcpStream::connect(addr).await.map_err(|err| {
            MscError::unavailable(format!("cannot reach telemetry manager at {addr}: {err}"))
        })?;
        Ok(Self {
            stream: tokio::sync::Mutex::new(stream),
        })
    }

    /// Submit one batch as a single JSON line.
    pub async fn submit(&self, samples: &[Sample]) -> Result<()> {
        let mut line = serde_json::to_string(samples)
            .map_err(|err| MscError::unavailable(format!("cannot encode samples: {err}")))?;
        line.push('\n');
        let mut stream = self.stream.lock().await;
        stream
            .write_all(line.as_bytes())
            .await
            .map_err(|err| MscError::unavailable(format!("cannot forward samples: {err}")))?;
        stream
            .flush()
            .await
            .map_err(|err| MscError::unavailable(format!("cannot flush samples: {err}")))
    }
}

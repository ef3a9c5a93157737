//! IPC Client
//!
//! Unix socket client used by `lucid-ask` and the native messaging host.

use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, warn};

use super::{socket_path, IpcRequest, IpcResponse};
use crate::core::{ExplainRequest, ExplainResponse};

static NEXT_SEQ_ID: AtomicU64 = AtomicU64::new(1);

fn next_seq_id() -> u64 {
    NEXT_SEQ_ID.fetch_add(1, Ordering::SeqCst)
}

/// Daemon status as reported over IPC
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DaemonStatus {
    pub providers: Vec<String>,
    pub consent_granted: bool,
    pub cache_entries: usize,
}

/// IPC Client for the daemon
#[derive(Debug, Clone)]
pub struct IpcClient {
    path: PathBuf,
    timeout: Duration,
}

impl Default for IpcClient {
    fn default() -> Self {
        Self::new(socket_path())
    }
}

impl IpcClient {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Check if the daemon is running
    pub async fn is_daemon_running(&self) -> bool {
        self.path.exists() && UnixStream::connect(&self.path).await.is_ok()
    }

    /// Fresh sequence id, unique within this process
    pub fn next_seq_id() -> u64 {
        next_seq_id()
    }

    /// Ask the daemon to explain a selection
    pub async fn explain(&self, request: ExplainRequest) -> Result<ExplainResponse> {
        self.explain_with_id(next_seq_id(), request).await
    }

    /// Explain under a caller-chosen id, so the request can be cancelled
    /// from another connection with [`IpcClient::cancel`]
    pub async fn explain_with_id(&self, seq_id: u64, request: ExplainRequest) -> Result<ExplainResponse> {
        let response = self.round_trip(&IpcRequest::explain(seq_id, request)).await?;

        if let IpcResponse::Ack {
            success: false,
            message,
            ..
        } = &response
        {
            return Err(anyhow!(
                "daemon rejected request {}: {}",
                seq_id,
                message.as_deref().unwrap_or("no reason given")
            ));
        }

        match response.into_explain_response() {
            Some((resp_seq, explain)) => {
                if resp_seq != seq_id {
                    warn!(
                        "⚠️ IPC sequence ID mismatch: expected {}, got {}",
                        seq_id, resp_seq
                    );
                    return Err(anyhow!("sequence ID mismatch"));
                }
                Ok(explain)
            }
            None => Err(anyhow!("unexpected IPC response type")),
        }
    }

    /// Cancel an in-flight explain request
    pub async fn cancel(&self, seq_id: u64) -> Result<bool> {
        match self.round_trip(&IpcRequest::Cancel { seq_id }).await? {
            IpcResponse::Ack { success, .. } => Ok(success),
            _ => Ok(false),
        }
    }

    /// Tell the daemon consent changed
    pub async fn consent_changed(&self, granted: bool, allowed_services: Vec<String>) -> Result<bool> {
        let request = IpcRequest::ConsentChanged {
            granted,
            allowed_services,
        };
        match self.round_trip(&request).await? {
            IpcResponse::Ack { success, .. } => Ok(success),
            _ => Ok(false),
        }
    }

    /// Request daemon status
    pub async fn status(&self) -> Result<Option<DaemonStatus>> {
        let seq_id = next_seq_id();
        match self.round_trip(&IpcRequest::StatusRequest { seq_id }).await? {
            IpcResponse::StatusResponse {
                seq_id: resp_seq,
                providers,
                consent_granted,
                cache_entries,
            } => {
                if resp_seq != seq_id {
                    warn!("⚠️ IPC sequence ID mismatch");
                    return Ok(None);
                }
                Ok(Some(DaemonStatus {
                    providers,
                    consent_granted,
                    cache_entries,
                }))
            }
            _ => Ok(None),
        }
    }

    async fn round_trip(&self, request: &IpcRequest) -> Result<IpcResponse> {
        let exchange = async {
            let mut stream = UnixStream::connect(&self.path).await?;

            let request_json = serde_json::to_string(request)? + "\n";
            stream.write_all(request_json.as_bytes()).await?;

            let mut reader = BufReader::new(stream);
            let mut line = String::new();
            reader.read_line(&mut line).await?;
            if line.trim().is_empty() {
                return Err(anyhow!("daemon closed the connection without replying"));
            }

            let response: IpcResponse = serde_json::from_str(line.trim())?;
            debug!("📨 IPC response: {:?}", response);
            Ok(response)
        };

        tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| anyhow!("IPC request timed out after {:?}", self.timeout))?
    }
}

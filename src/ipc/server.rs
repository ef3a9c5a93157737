//! IPC Server
//!
//! Unix socket server in front of the orchestrator. Every connection is its
//! own task, so explanations for different tabs run concurrently.

use super::{IpcRequest, IpcResponse};
use crate::audit::AuditLog;
use crate::core::ExplainRequest;
use crate::error::LucidResult;
use crate::orchestrator::FallbackOrchestrator;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Max bytes per request line
const MAX_REQUEST_BYTES: u64 = 16 * 1024;
/// Max connections served at once
const MAX_CONNECTIONS: usize = 32;

/// Client `seq_id` to (server-assigned request id, token)
type InFlight = Arc<Mutex<HashMap<u64, (u64, CancellationToken)>>>;

/// IPC Server for the daemon
#[derive(Clone)]
pub struct IpcServer {
    orchestrator: Arc<FallbackOrchestrator>,
    audit: Arc<AuditLog>,
    in_flight: InFlight,
    next_request_id: Arc<AtomicU64>,
    connections: Arc<Semaphore>,
    shutdown: CancellationToken,
}

impl IpcServer {
    pub fn new(orchestrator: Arc<FallbackOrchestrator>, audit: Arc<AuditLog>) -> Self {
        Self {
            orchestrator,
            audit,
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_request_id: Arc::new(AtomicU64::new(1)),
            connections: Arc::new(Semaphore::new(MAX_CONNECTIONS)),
            shutdown: CancellationToken::new(),
        }
    }

    /// Token that stops the accept loop and cancels all in-flight requests
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Bind the socket with user-only permissions, replacing a stale one
    pub fn bind(path: &Path) -> LucidResult<UnixListener> {
        if path.exists() {
            let _ = fs::remove_file(path);
        }
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(path)?;

        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        if let Err(e) = fs::set_permissions(path, perms) {
            warn!("⚠️ Failed to set strict IPC socket permissions: {}", e);
        } else {
            debug!("🔒 IPC socket permissions set to 0600");
        }

        info!("🔌 IPC server listening on {:?}", path);
        Ok(listener)
    }

    /// Accept connections until shutdown, then remove the socket file
    pub async fn serve(&self, listener: UnixListener, path: PathBuf) -> LucidResult<()> {
        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = listener.accept() => accepted,
            };

            match accepted {
                Ok((stream, _)) => {
                    let Ok(permit) = self.connections.clone().try_acquire_owned() else {
                        warn!("⚠️ IPC connection limit reached - rejecting client");
                        continue;
                    };
                    let server = self.clone();
                    tokio::spawn(async move {
                        if let Err(e) = server.handle_client(stream).await {
                            warn!("IPC client error: {}", e);
                        }
                        drop(permit);
                    });
                }
                Err(e) => warn!("IPC accept error: {}", e),
            }
        }

        let _ = fs::remove_file(&path);
        info!("🔌 IPC server stopped");
        Ok(())
    }

    /// Handle a single client connection
    async fn handle_client(&self, stream: UnixStream) -> LucidResult<()> {
        let (read_half, mut write_half) = stream.into_split();
        let mut limited = BufReader::new(read_half).take(MAX_REQUEST_BYTES);

        let mut line = String::new();
        limited.read_line(&mut line).await?;
        if line.trim().is_empty() {
            return Ok(());
        }

        let response = match serde_json::from_str::<IpcRequest>(line.trim()) {
            Ok(request) => {
                debug!("📨 IPC request: {}", request_kind(&request));
                let mut reader = limited.into_inner();
                match self.dispatch(request, &mut reader).await {
                    Some(response) => response,
                    // Client went away; nobody to answer
                    None => return Ok(()),
                }
            }
            Err(e) => {
                warn!("⚠️ Malformed IPC request: {}", e);
                IpcResponse::ack(None, false, format!("malformed request: {}", e))
            }
        };

        let response_json = serde_json::to_string(&response)? + "\n";
        write_half.write_all(response_json.as_bytes()).await?;
        write_half.shutdown().await?;
        Ok(())
    }

    async fn dispatch<R>(&self, request: IpcRequest, reader: &mut R) -> Option<IpcResponse>
    where
        R: tokio::io::AsyncRead + Unpin,
    {
        let response = match request {
            IpcRequest::Explain {
                seq_id,
                text,
                context,
                preferred_provider,
            } => {
                let cancel = self.shutdown.child_token();
                let Some(request_id) = self.register(seq_id, &cancel) else {
                    warn!("⚠️ IPC request {} is already in flight", seq_id);
                    return Some(IpcResponse::ack(
                        Some(seq_id),
                        false,
                        "seq_id already in flight",
                    ));
                };

                let request = ExplainRequest {
                    text,
                    context,
                    preferred_provider,
                };
                let outcome = tokio::select! {
                    response = self.orchestrator.handle(request, &cancel) => Some(response),
                    _ = wait_for_disconnect(reader) => {
                        info!("🚫 IPC client {} disconnected, cancelling", seq_id);
                        cancel.cancel();
                        None
                    }
                };

                self.unregister(seq_id, request_id);
                IpcResponse::explanation(seq_id, outcome?)
            }
            IpcRequest::Cancel { seq_id } => {
                let token = self.lock_in_flight().get(&seq_id).map(|(_, t)| t.clone());
                match token {
                    Some(token) => {
                        token.cancel();
                        IpcResponse::ack(Some(seq_id), true, "cancelled")
                    }
                    None => IpcResponse::ack(Some(seq_id), false, "no such request"),
                }
            }
            IpcRequest::ConsentChanged {
                granted,
                allowed_services,
            } => {
                let consent = self.orchestrator.consent();
                let saved = if granted {
                    consent.grant(allowed_services.iter().cloned()).await
                } else {
                    consent.revoke().await
                };
                match saved {
                    Ok(()) => {
                        self.audit.log_consent(granted, &allowed_services);
                        IpcResponse::ack(None, true, "consent updated")
                    }
                    Err(e) if granted => {
                        // Nothing was applied; the user must retry
                        warn!("⚠️ Consent grant not persisted: {}", e);
                        IpcResponse::ack(None, false, format!("consent not saved: {}", e))
                    }
                    Err(e) => {
                        warn!("⚠️ Consent revoke not persisted: {}", e);
                        self.audit.log_consent(false, &[]);
                        IpcResponse::ack(None, true, "consent revoked for this session")
                    }
                }
            }
            IpcRequest::StatusRequest { seq_id } => IpcResponse::StatusResponse {
                seq_id,
                providers: self.orchestrator.provider_names(),
                consent_granted: self.orchestrator.consent().is_granted(),
                cache_entries: self.orchestrator.cache_stats().size,
            },
        };
        Some(response)
    }

    /// Track a request for `cancel`; `None` if the id is taken
    fn register(&self, seq_id: u64, token: &CancellationToken) -> Option<u64> {
        match self.lock_in_flight().entry(seq_id) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                let request_id = self.next_request_id.fetch_add(1, Ordering::Relaxed);
                slot.insert((request_id, token.clone()));
                Some(request_id)
            }
        }
    }

    /// Forget a request, unless the id now belongs to another one
    fn unregister(&self, seq_id: u64, request_id: u64) {
        let mut in_flight = self.lock_in_flight();
        if let Entry::Occupied(entry) = in_flight.entry(seq_id) {
            if entry.get().0 == request_id {
                entry.remove();
            }
        }
    }

    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<u64, (u64, CancellationToken)>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Resolves once the peer closes its side of the connection
async fn wait_for_disconnect<R>(reader: &mut R)
where
    R: tokio::io::AsyncRead + Unpin,
{
    let mut buf = [0u8; 256];
    loop {
        match reader.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            // Anything after the request line is ignored
            Ok(_) => continue,
        }
    }
}

fn request_kind(request: &IpcRequest) -> &'static str {
    match request {
        IpcRequest::Explain { .. } => "explain",
        IpcRequest::Cancel { .. } => "cancel",
        IpcRequest::ConsentChanged { .. } => "consent_changed",
        IpcRequest::StatusRequest { .. } => "status_request",
    }
}

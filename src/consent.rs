//! Consent gate
//!
//! Whether the user has allowed selected text to leave the device, and to
//! which providers. The orchestrator only reads; writes come from the
//! user-facing consent flow or the settings layer's change notifications.
//!
//! Any doubt resolves to "not allowed": an unreadable store behaves exactly
//! like a store with no consent in it.

use crate::error::StorageError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tracing::{info, warn};

/// The user's decision about sending text to remote services
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsentRecord {
    pub granted: bool,
    #[serde(default)]
    pub allowed_services: BTreeSet<String>,
    pub timestamp: DateTime<Utc>,
}

impl ConsentRecord {
    pub fn granted<I, S>(services: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            granted: true,
            allowed_services: services.into_iter().map(Into::into).collect(),
            timestamp: Utc::now(),
        }
    }

    pub fn revoked() -> Self {
        Self {
            granted: false,
            allowed_services: BTreeSet::new(),
            timestamp: Utc::now(),
        }
    }

    pub fn allows(&self, provider: &str) -> bool {
        self.granted && self.allowed_services.contains(provider)
    }
}

/// Persistent home of the consent record
#[async_trait]
pub trait ConsentBackend: Send + Sync {
    /// `Ok(None)` means consent was never recorded
    async fn load(&self) -> Result<Option<ConsentRecord>, StorageError>;

    async fn save(&self, record: &ConsentRecord) -> Result<(), StorageError>;
}

/// JSON file backend, by default `<config dir>/lucid/consent.json`
#[derive(Debug, Clone)]
pub struct FileConsentBackend {
    path: PathBuf,
}

impl FileConsentBackend {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn default_path() -> PathBuf {
        crate::config::config_dir().join("consent.json")
    }
}

impl Default for FileConsentBackend {
    fn default() -> Self {
        Self::new(Self::default_path())
    }
}

#[async_trait]
impl ConsentBackend for FileConsentBackend {
    async fn load(&self) -> Result<Option<ConsentRecord>, StorageError> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => Ok(Some(serde_json::from_str(&content)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Unreadable(e.to_string())),
        }
    }

    async fn save(&self, record: &ConsentRecord) -> Result<(), StorageError> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let content = serde_json::to_string_pretty(record)?;
        tokio::fs::write(&self.path, content)
            .await
            .map_err(|e| StorageError::WriteFailed(e.to_string()))
    }
}

/// In-memory backend for embedding and tests
#[derive(Debug, Default)]
pub struct MemoryConsentBackend {
    record: Mutex<Option<ConsentRecord>>,
}

impl MemoryConsentBackend {
    pub fn new(record: Option<ConsentRecord>) -> Self {
        Self {
            record: Mutex::new(record),
        }
    }
}

#[async_trait]
impl ConsentBackend for MemoryConsentBackend {
    async fn load(&self) -> Result<Option<ConsentRecord>, StorageError> {
        Ok(self
            .record
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone())
    }

    async fn save(&self, record: &ConsentRecord) -> Result<(), StorageError> {
        *self.record.lock().unwrap_or_else(PoisonError::into_inner) = Some(record.clone());
        Ok(())
    }
}

/// Live consent snapshot shared by all requests
pub struct ConsentStore {
    backend: Arc<dyn ConsentBackend>,
    current: watch::Sender<Option<ConsentRecord>>,
}

impl std::fmt::Debug for ConsentStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsentStore")
            .field("current", &*self.current.borrow())
            .finish()
    }
}

impl ConsentStore {
    /// Read the backend once. A read failure starts with no consent.
    pub async fn open(backend: Arc<dyn ConsentBackend>) -> Self {
        let initial = read_or_deny(backend.as_ref()).await;
        let (current, _) = watch::channel(initial);
        Self { backend, current }
    }

    /// Whether text may be sent to `provider` right now
    pub fn is_allowed(&self, provider: &str) -> bool {
        self.current
            .borrow()
            .as_ref()
            .is_some_and(|record| record.allows(provider))
    }

    /// Whether consent is granted at all
    pub fn is_granted(&self) -> bool {
        self.current
            .borrow()
            .as_ref()
            .is_some_and(|record| record.granted)
    }

    pub fn current(&self) -> Option<ConsentRecord> {
        self.current.borrow().clone()
    }

    /// Observe every consent change
    pub fn subscribe(&self) -> watch::Receiver<Option<ConsentRecord>> {
        self.current.subscribe()
    }

    /// Change notification from the settings layer; takes effect at once
    pub fn apply(&self, record: ConsentRecord) {
        info!(
            "🔐 Consent changed: granted={} services={:?}",
            record.granted, record.allowed_services
        );
        self.current.send_replace(Some(record));
    }

    /// Re-read the backing store, failing closed
    pub async fn reload(&self) {
        let record = read_or_deny(self.backend.as_ref()).await;
        self.current.send_replace(record);
    }

    /// User grants consent for the given services
    pub async fn grant<I, S>(&self, services: I) -> Result<(), StorageError>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let record = ConsentRecord::granted(services);
        self.backend.save(&record).await?;
        self.apply(record);
        Ok(())
    }

    /// User withdraws consent.
    ///
    /// The in-memory gate closes even if persisting fails, so a revoke is
    /// never lost for the running process.
    pub async fn revoke(&self) -> Result<(), StorageError> {
        let record = ConsentRecord::revoked();
        self.apply(record.clone());
        self.backend.save(&record).await
    }
}

async fn read_or_deny(backend: &dyn ConsentBackend) -> Option<ConsentRecord> {
    match backend.load().await {
        Ok(record) => record,
        Err(e) => {
            warn!("⚠️ Consent store unreadable, treating as not granted: {}", e);
            None
        }
    }
}

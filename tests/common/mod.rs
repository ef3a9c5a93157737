#![allow(dead_code)]

pub mod mock_provider;

use async_trait::async_trait;
use lucid::cache::ResponseCache;
use lucid::config::RateLimitConfig;
use lucid::consent::{ConsentBackend, ConsentRecord, ConsentStore, MemoryConsentBackend};
use lucid::error::StorageError;
use lucid::orchestrator::FallbackOrchestrator;
use lucid::rate_limit::RateLimiter;
use mock_provider::MockProvider;
use std::path::PathBuf;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::Duration;
use std::{fs, thread};
use tempfile::TempDir;

pub const TEST_TIMEOUT: Duration = Duration::from_millis(500);

/// Consent store granted for `services`, or never granted when `None`
pub async fn consent_for(services: Option<&[&str]>) -> Arc<ConsentStore> {
    let record = services.map(|s| ConsentRecord::granted(s.iter().copied()));
    let backend = MemoryConsentBackend::new(record);
    Arc::new(ConsentStore::open(Arc::new(backend)).await)
}

/// Consent backend that starts empty and refuses every save
#[derive(Debug)]
pub struct FailingConsentBackend;

#[async_trait]
impl ConsentBackend for FailingConsentBackend {
    async fn load(&self) -> Result<Option<ConsentRecord>, StorageError> {
        Ok(None)
    }

    async fn save(&self, _record: &ConsentRecord) -> Result<(), StorageError> {
        Err(StorageError::WriteFailed("read-only".to_string()))
    }
}

/// Orchestrator over mock providers, priority taken from slice order
pub fn orchestrator_with(
    consent: Arc<ConsentStore>,
    providers: &[(MockProvider, u32)],
) -> FallbackOrchestrator {
    let limiter = Arc::new(RateLimiter::new());
    let cache = Arc::new(ResponseCache::new(Duration::from_secs(600), 100));
    let mut orchestrator = FallbackOrchestrator::new(consent, limiter.clone(), cache);

    for (priority, (provider, capacity)) in providers.iter().enumerate() {
        limiter.register(
            lucid::providers::ProviderClient::name(provider),
            RateLimitConfig {
                capacity: *capacity,
                window_secs: 60,
            },
        );
        orchestrator =
            orchestrator.with_provider(priority as u32, TEST_TIMEOUT, Arc::new(provider.clone()));
    }
    orchestrator
}

/// A running `lucid` daemon isolated in a temp dir
pub struct TestContext {
    pub temp_dir: TempDir,
    pub child: Child,
    pub socket_path: PathBuf,
}

impl TestContext {
    pub fn new() -> Self {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let bin_path = env!("CARGO_BIN_EXE_lucid");

        let config_dir = temp_dir.path().join("config");
        let data_dir = temp_dir.path().join("data");
        fs::create_dir_all(&config_dir).expect("Failed to create config dir");
        fs::create_dir_all(&data_dir).expect("Failed to create data dir");

        // No remote providers, so every answer is produced locally
        let config_path = temp_dir.path().join("config.json");
        let config = serde_json::json!({
            "providers": [],
            "cache_ttl_secs": 600,
            "cache_max_entries": 50,
            "max_text_chars": 5000,
            "state_db_path": data_dir.join("state.db"),
            "audit_log_path": data_dir.join("audit.log"),
            "log_level": "INFO"
        });
        fs::write(&config_path, config.to_string()).expect("Failed to write config");

        let socket_path = temp_dir.path().join("lucid.sock");

        let child = Command::new(bin_path)
            .arg("--config")
            .arg(&config_path)
            .arg("--socket")
            .arg(&socket_path)
            .env("XDG_CONFIG_HOME", &config_dir)
            .env("XDG_DATA_HOME", &data_dir)
            .env_remove("RUST_LOG")
            .stdout(Stdio::inherit())
            .stderr(Stdio::inherit())
            .spawn()
            .expect("Failed to spawn lucid daemon");

        let ctx = TestContext {
            temp_dir,
            child,
            socket_path,
        };

        ctx.wait_for_socket();
        ctx
    }

    pub fn audit_log_path(&self) -> PathBuf {
        self.temp_dir.path().join("data/audit.log")
    }

    fn wait_for_socket(&self) {
        let start = std::time::Instant::now();
        while start.elapsed() < Duration::from_secs(5) {
            if self.socket_path.exists() {
                return;
            }
            thread::sleep(Duration::from_millis(100));
        }
        panic!("Timed out waiting for socket at {:?}", self.socket_path);
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

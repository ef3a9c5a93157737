//! Lucid - Explain selected text
//!
//! Daemon behind the browser extension. Holds consent, rate limits and the
//! response cache, and answers explain requests over a Unix socket.

use anyhow::Result;
use clap::Parser;
use lucid::config::Config;
use lucid::consent::{ConsentStore, FileConsentBackend};
use lucid::ipc::{self, IpcServer};
use lucid::orchestrator::FallbackOrchestrator;
use lucid::persistence::StateStore;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    /// Path to config.json
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Unix socket to listen on
    #[arg(short, long)]
    socket: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    // Setup logging
    let level = if args.verbose {
        "debug".to_string()
    } else {
        config.log_level.to_lowercase()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🔎 Lucid v{} starting...", env!("CARGO_PKG_VERSION"));

    let consent = Arc::new(ConsentStore::open(Arc::new(FileConsentBackend::default())).await);
    if !consent.is_granted() {
        info!("🔒 Remote explanations disabled until consent is granted");
    }

    let orchestrator = Arc::new(FallbackOrchestrator::from_config(&config, consent)?);
    info!("🤖 Providers: {:?}", orchestrator.provider_names());

    let store = match StateStore::new(PathBuf::from(&config.state_db_path)) {
        Ok(store) => {
            restore_state(&store, &orchestrator);
            Some(store)
        }
        Err(e) => {
            warn!("⚠️ State store unavailable, limits and cache start fresh: {}", e);
            None
        }
    };

    // Registered before the socket appears
    let mut hangup = signal(SignalKind::hangup())?;

    let socket = args.socket.unwrap_or_else(ipc::socket_path);
    let server = IpcServer::new(orchestrator.clone(), orchestrator.audit().clone());
    let listener = IpcServer::bind(&socket)?;
    let shutdown = server.shutdown_token();

    let serve = tokio::spawn({
        let server = server.clone();
        async move { server.serve(listener, socket).await }
    });

    tokio::spawn({
        let orchestrator = orchestrator.clone();
        let shutdown = shutdown.clone();
        async move { orchestrator.watch_consent(shutdown).await }
    });

    // SIGHUP re-reads consent.json after an out-of-band edit
    tokio::spawn({
        let orchestrator = orchestrator.clone();
        let shutdown = shutdown.clone();
        async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    received = hangup.recv() => {
                        if received.is_none() {
                            break;
                        }
                        info!("🔄 SIGHUP: reloading consent");
                        orchestrator.consent().reload().await;
                    }
                }
            }
        }
    });

    if let Some(store) = store.clone() {
        let orchestrator = orchestrator.clone();
        let shutdown = shutdown.clone();
        let period = Duration::from_secs(config.state_flush_secs.max(1));
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.tick().await;
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = interval.tick() => flush_state(&store, &orchestrator).await,
                }
            }
        });
    }

    info!("✅ Lucid ready");

    tokio::signal::ctrl_c().await?;
    info!("👋 Shutting down");
    shutdown.cancel();

    if let Some(store) = store {
        flush_state(&store, &orchestrator).await;
    }
    if let Err(e) = serve.await {
        warn!("IPC server task failed: {}", e);
    }

    Ok(())
}

fn restore_state(store: &StateStore, orchestrator: &FallbackOrchestrator) {
    match store.load_rate_limits() {
        Ok(snapshots) => {
            debug!("Restoring {} rate limit buckets", snapshots.len());
            orchestrator.limiter().restore(&snapshots);
        }
        Err(e) => warn!("⚠️ Could not restore rate limits: {}", e),
    }
    match store.load_cache() {
        Ok(entries) => {
            debug!("Restoring {} cached explanations", entries.len());
            orchestrator.cache().restore(entries);
        }
        Err(e) => warn!("⚠️ Could not restore response cache: {}", e),
    }
}

async fn flush_state(store: &StateStore, orchestrator: &FallbackOrchestrator) {
    let limits = orchestrator.limiter().snapshot();
    let entries = orchestrator.cache().snapshot();
    let store = store.clone();

    let result = tokio::task::spawn_blocking(move || {
        store.save_rate_limits(&limits)?;
        store.save_cache(&entries)
    })
    .await;

    match result {
        Ok(Ok(())) => debug!("💾 State flushed"),
        Ok(Err(e)) => warn!("⚠️ State flush failed: {}", e),
        Err(e) => warn!("⚠️ State flush task failed: {}", e),
    }
}

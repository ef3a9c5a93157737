//! Lucid Ask - command line client for the daemon
//!
//! Run with: cargo run --bin lucid-ask -- explain "photosynthesis"

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use lucid::core::ExplainRequest;
use lucid::ipc::IpcClient;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Unix socket of the daemon
    #[arg(short, long)]
    socket: Option<PathBuf>,

    /// Seconds to wait for a reply
    #[arg(short, long, default_value_t = 30)]
    timeout: u64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Explain a piece of text
    Explain {
        text: String,

        /// Surrounding page text
        #[arg(short, long, default_value = "")]
        context: String,

        /// Try this provider first
        #[arg(short, long)]
        provider: Option<String>,
    },
    /// Show daemon status
    Status,
    /// Allow sending selections to the given providers
    Grant {
        #[arg(required = true)]
        services: Vec<String>,
    },
    /// Withdraw consent for all providers
    Revoke,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::WARN)
        .init();

    let args = Args::parse();
    let client = match args.socket {
        Some(path) => IpcClient::new(path),
        None => IpcClient::default(),
    }
    .with_timeout(Duration::from_secs(args.timeout));

    if !client.is_daemon_running().await {
        bail!("lucid daemon is not running at {:?}", client.path());
    }

    match args.command {
        Command::Explain {
            text,
            context,
            provider,
        } => {
            let mut request = ExplainRequest::new(&text, &context);
            if let Some(provider) = provider {
                request = request.with_preferred_provider(&provider);
            }
            let response = client.explain(request).await?;
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Command::Status => match client.status().await? {
            Some(status) => {
                println!("providers:       {}", status.providers.join(", "));
                println!("consent granted: {}", status.consent_granted);
                println!("cache entries:   {}", status.cache_entries);
            }
            None => bail!("daemon sent an unexpected reply"),
        },
        Command::Grant { services } => {
            if !client.consent_changed(true, services).await? {
                bail!("daemon refused the consent change");
            }
            println!("consent granted");
        }
        Command::Revoke => {
            client.consent_changed(false, Vec::new()).await?;
            println!("consent revoked");
        }
    }

    Ok(())
}

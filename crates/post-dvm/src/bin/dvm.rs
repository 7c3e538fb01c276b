use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use nostr_client::WebSocketConnector;
use post_dvm::{Dvm, DvmConfig, SyndicationFetcher};
use tracing::{debug, info, warn};

/// Answer post lookup jobs on a Nostr relay.
#[derive(Parser, Debug)]
#[command(name = "post-dvm")]
struct Args {
    /// Relay URL. Overrides NOSTR_RELAY.
    #[arg(long)]
    relay: Option<String>,

    /// Seconds between connection checks. Overrides DVM_KEEPALIVE_SECS.
    #[arg(long)]
    keepalive_secs: Option<u64>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    if let Err(error) = dotenvy::dotenv() {
        debug!("no .env loaded: {}", error);
    }

    let args = Args::parse();
    let mut config = DvmConfig::from_env().context("load DVM configuration")?;
    if let Some(relay) = args.relay.as_deref() {
        config = config.with_relay_url(relay)?;
    }
    if let Some(seconds) = args.keepalive_secs {
        config = config.with_keepalive_secs(seconds)?;
    }
    if config.ephemeral_key {
        warn!("DVM_PRIVATE_KEY not set; using a fresh identity for this run");
    }

    info!("connecting to relay {}", config.relay_url);
    let dvm = Dvm::connect(
        &config,
        Arc::new(WebSocketConnector::default()),
        SyndicationFetcher::default(),
    )
    .await
    .with_context(|| format!("connect to {}", config.relay_url))?;

    info!("DVM public key: {}", dvm.public_key_hex());
    if let Ok(npub) = config.keys.npub() {
        info!("DVM npub: {}", npub);
    }
    info!("point the CLI at this DVM with DVM_PUBKEY={}", dvm.public_key_hex());

    let shutdown = dvm.shutdown_signal();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("interrupt received");
                shutdown.trigger();
            }
            Err(error) => warn!("could not listen for interrupt: {}", error),
        }
    });

    dvm.run().await.context("DVM stopped with an error")?;
    Ok(())
}

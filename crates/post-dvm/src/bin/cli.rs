#![allow(clippy::print_stdout)]

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use nostr_client::WebSocketConnector;
use post_dvm::{ClientConfig, DvmClient, Post, ShutdownSignal, extract_post_id};
use tracing::{debug, info, warn};

/// Request a post from a post lookup DVM and print it as JSON.
#[derive(Parser, Debug)]
#[command(name = "post-dvm-cli")]
struct Args {
    /// Post URL (twitter.com or x.com status link) or numeric post id.
    post: String,

    /// Relay URL. Overrides NOSTR_RELAY.
    relay: Option<String>,

    /// Responder public key, hex or npub. Overrides DVM_PUBKEY.
    #[arg(long)]
    dvm_pubkey: Option<String>,

    /// Seconds to wait for the response. Overrides DVM_REQUEST_TIMEOUT_SECS.
    #[arg(long)]
    timeout_secs: Option<u64>,
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
    let post_id = extract_post_id(&args.post)?;
    info!("post id {} from {}", post_id, args.post);

    let mut config = ClientConfig::from_env().context("load client configuration")?;
    if let Some(relay) = args.relay.as_deref() {
        config = config.with_relay_url(relay)?;
    }
    if let Some(responder) = args.dvm_pubkey.as_deref() {
        config = config.with_responder(responder)?;
    }
    if let Some(seconds) = args.timeout_secs {
        config = config.with_request_timeout_secs(seconds)?;
    }
    let responder = config.responder()?.to_string();

    let client = DvmClient::connect(&config, Arc::new(WebSocketConnector::default()))
        .await
        .with_context(|| format!("connect to {}", config.relay_url))?;

    let cancel = ShutdownSignal::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    cancel.trigger();
                }
                Err(error) => warn!("could not listen for interrupt: {}", error),
            }
        });
    }

    println!("Requesting post {} from relay {}", post_id, config.relay_url);
    let post: Post = client
        .request_job_with_cancel(&responder, &post_id, config.request_timeout, &cancel)
        .await
        .with_context(|| format!("request post {post_id}"))?;

    println!("{}", serde_json::to_string_pretty(&post)?);
    Ok(())
}

//! DVM error types.

use crate::config::ConfigError;
use crate::job::FetchError;
use nostr::dvm::DvmProtocolError;
use nostr::{KeyError, Nip01Error};
use nostr_client::ClientError;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by the responder and the requester.
///
/// `Timeout` and `Canceled` are kept apart from `Transport` so callers can tell "nobody
/// answered" from "the relay could not be reached".
#[derive(Debug, Error)]
pub enum DvmError {
    #[error("identity error: {0}")]
    Key(#[from] KeyError),

    #[error("signing error: {0}")]
    Signing(#[from] Nip01Error),

    #[error("relay error: {0}")]
    Transport(#[from] ClientError),

    #[error("fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] DvmProtocolError),

    #[error("no response within {0:?}")]
    Timeout(Duration),

    #[error("request canceled")]
    Canceled,

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// DVM result type.
pub type Result<T> = std::result::Result<T, DvmError>;

//! NIP-01: Basic protocol flow.
//!
//! Event model, canonical serialization, hashing, BIP-340 Schnorr signing and verification, and
//! the subscription filter used by `REQ` messages.

use bitcoin::secp256k1::{Keypair, Message, Secp256k1, SecretKey, XOnlyPublicKey, schnorr};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use crate::tag_parsing::collect_tag_values;

/// Errors that can occur while building, signing, or verifying events.
#[derive(Debug, Error)]
pub enum Nip01Error {
    #[error("invalid secret key: {0}")]
    InvalidSecretKey(String),

    #[error("invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("invalid signature: {0}")]
    InvalidSignature(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("system clock error: {0}")]
    Clock(String),
}

/// A signed Nostr event.
///
/// ```json
/// {
///   "id": "<32-byte hex sha256 of the serialized event>",
///   "pubkey": "<32-byte hex x-only public key>",
///   "created_at": 1700000000,
///   "kind": 1,
///   "tags": [["e", "<event id>"], ["p", "<pubkey>"]],
///   "content": "hello",
///   "sig": "<64-byte hex schnorr signature of id>"
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub id: String,
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
    pub sig: String,
}

impl Event {
    /// Every first value of tags named `name`, in order.
    pub fn tag_values(&self, name: &str) -> Vec<String> {
        collect_tag_values(&self.tags, name)
    }

    /// Abbreviated id for log lines.
    pub fn short_id(&self) -> &str {
        short_hex(&self.id)
    }
}

/// Event fields chosen by the author before the pubkey, id, and signature are attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventTemplate {
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

/// An event with its author attached but not yet hashed or signed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnsignedEvent {
    pub pubkey: String,
    pub created_at: u64,
    pub kind: u16,
    pub tags: Vec<Vec<String>>,
    pub content: String,
}

impl From<&Event> for UnsignedEvent {
    fn from(event: &Event) -> Self {
        Self {
            pubkey: event.pubkey.clone(),
            created_at: event.created_at,
            kind: event.kind,
            tags: event.tags.clone(),
            content: event.content.clone(),
        }
    }
}

/// Subscription filter as sent in `["REQ", <id>, <filter>...]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Filter {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ids: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authors: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kinds: Option<Vec<u16>>,
    #[serde(rename = "#e", default, skip_serializing_if = "Option::is_none")]
    pub event_refs: Option<Vec<String>>,
    #[serde(rename = "#p", default, skip_serializing_if = "Option::is_none")]
    pub pubkey_refs: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub since: Option<u64>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn kind(mut self, kind: u16) -> Self {
        self.kinds.get_or_insert_with(Vec::new).push(kind);
        self
    }

    pub fn author(mut self, pubkey: impl Into<String>) -> Self {
        self.authors.get_or_insert_with(Vec::new).push(pubkey.into());
        self
    }

    pub fn event_ref(mut self, event_id: impl Into<String>) -> Self {
        self.event_refs
            .get_or_insert_with(Vec::new)
            .push(event_id.into());
        self
    }

    pub fn pubkey_ref(mut self, pubkey: impl Into<String>) -> Self {
        self.pubkey_refs
            .get_or_insert_with(Vec::new)
            .push(pubkey.into());
        self
    }

    pub fn since(mut self, timestamp: u64) -> Self {
        self.since = Some(timestamp);
        self
    }

    /// Whether `event` satisfies every constraint of this filter.
    ///
    /// Absent fields match everything; list fields match if any listed value matches.
    pub fn matches(&self, event: &Event) -> bool {
        fn contains(list: Option<&Vec<String>>, value: &str) -> bool {
            list.is_none_or(|values| values.iter().any(|candidate| candidate == value))
        }

        fn any_tag(list: Option<&Vec<String>>, event: &Event, name: &str) -> bool {
            list.is_none_or(|values| {
                event
                    .tag_values(name)
                    .iter()
                    .any(|tag_value| values.contains(tag_value))
            })
        }

        contains(self.ids.as_ref(), &event.id)
            && contains(self.authors.as_ref(), &event.pubkey)
            && self
                .kinds
                .as_ref()
                .is_none_or(|kinds| kinds.contains(&event.kind))
            && any_tag(self.event_refs.as_ref(), event, "e")
            && any_tag(self.pubkey_refs.as_ref(), event, "p")
            && self.since.is_none_or(|since| event.created_at >= since)
    }
}

/// Current unix time in seconds.
pub fn unix_now_secs() -> Result<u64, Nip01Error> {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .map_err(|error| Nip01Error::Clock(error.to_string()))
}

/// Generate a random, valid secp256k1 secret key.
pub fn generate_secret_key() -> [u8; 32] {
    loop {
        let candidate: [u8; 32] = rand::random();
        if SecretKey::from_slice(&candidate).is_ok() {
            return candidate;
        }
    }
}

/// Derive the x-only public key for a secret key.
pub fn get_public_key(secret_key: &[u8; 32]) -> Result<[u8; 32], Nip01Error> {
    let secp = Secp256k1::new();
    let keypair = signing_keypair(&secp, secret_key)?;
    let (public_key, _parity) = keypair.x_only_public_key();
    Ok(public_key.serialize())
}

/// Derive the hex-encoded x-only public key for a secret key.
pub fn get_public_key_hex(secret_key: &[u8; 32]) -> Result<String, Nip01Error> {
    get_public_key(secret_key).map(hex::encode)
}

/// NIP-01 canonical serialization: `[0, pubkey, created_at, kind, tags, content]`.
pub fn serialize_event(event: &UnsignedEvent) -> Result<String, Nip01Error> {
    let canonical = serde_json::json!([
        0,
        event.pubkey,
        event.created_at,
        event.kind,
        event.tags,
        event.content
    ]);
    Ok(serde_json::to_string(&canonical)?)
}

/// Attach author, id, and signature to a template.
pub fn finalize_event(
    template: &EventTemplate,
    secret_key: &[u8; 32],
) -> Result<Event, Nip01Error> {
    let secp = Secp256k1::new();
    let keypair = signing_keypair(&secp, secret_key)?;
    let (public_key, _parity) = keypair.x_only_public_key();

    let unsigned = UnsignedEvent {
        pubkey: hex::encode(public_key.serialize()),
        created_at: template.created_at,
        kind: template.kind,
        tags: template.tags.clone(),
        content: template.content.clone(),
    };
    let digest = event_digest(&unsigned)?;
    let aux_rand: [u8; 32] = rand::random();
    let signature =
        secp.sign_schnorr_with_aux_rand(&Message::from_digest(digest), &keypair, &aux_rand);

    Ok(Event {
        id: hex::encode(digest),
        pubkey: unsigned.pubkey,
        created_at: unsigned.created_at,
        kind: unsigned.kind,
        tags: unsigned.tags,
        content: unsigned.content,
        sig: hex::encode(signature.serialize()),
    })
}

/// Recompute the id and verify the signature against the author key.
///
/// Returns `Ok(false)` for a well-formed event whose id or signature does not check out, and an
/// error when the key or signature cannot be decoded at all.
pub fn verify_event(event: &Event) -> Result<bool, Nip01Error> {
    let digest = event_digest(&UnsignedEvent::from(event))?;
    if hex::encode(digest) != event.id {
        return Ok(false);
    }

    let public_key_bytes = hex::decode(&event.pubkey)
        .map_err(|error| Nip01Error::InvalidPublicKey(error.to_string()))?;
    let public_key = XOnlyPublicKey::from_slice(&public_key_bytes)
        .map_err(|error| Nip01Error::InvalidPublicKey(error.to_string()))?;
    let signature_bytes =
        hex::decode(&event.sig).map_err(|error| Nip01Error::InvalidSignature(error.to_string()))?;
    let signature = schnorr::Signature::from_slice(&signature_bytes)
        .map_err(|error| Nip01Error::InvalidSignature(error.to_string()))?;

    let secp = Secp256k1::verification_only();
    Ok(secp
        .verify_schnorr(&signature, &Message::from_digest(digest), &public_key)
        .is_ok())
}

/// First eight characters of a hex identifier.
pub fn short_hex(value: &str) -> &str {
    value.get(..8).unwrap_or(value)
}

fn event_digest(event: &UnsignedEvent) -> Result<[u8; 32], Nip01Error> {
    let serialized = serialize_event(event)?;
    Ok(Sha256::digest(serialized.as_bytes()).into())
}

fn signing_keypair<C: bitcoin::secp256k1::Signing>(
    secp: &Secp256k1<C>,
    secret_key: &[u8; 32],
) -> Result<Keypair, Nip01Error> {
    let secret = SecretKey::from_slice(secret_key)
        .map_err(|error| Nip01Error::InvalidSecretKey(error.to_string()))?;
    Ok(Keypair::from_secret_key(secp, &secret))
}

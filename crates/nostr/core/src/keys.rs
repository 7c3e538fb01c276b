use bech32::{Bech32, Hrp};
use thiserror::Error;

use crate::nip01::{Nip01Error, generate_secret_key, get_public_key};

const NSEC_HRP: &str = "nsec";
const NPUB_HRP: &str = "npub";

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("invalid hex key: {0}")]
    InvalidHex(String),

    #[error("invalid key length: expected 32 bytes, got {0}")]
    InvalidLength(usize),

    #[error("invalid bech32 key: {0}")]
    InvalidBech32(String),

    #[error("unexpected bech32 prefix: expected {expected}, got {actual}")]
    UnexpectedPrefix { expected: String, actual: String },

    #[error(transparent)]
    Secp(#[from] Nip01Error),
}

/// A participant identity: secp256k1 secret key plus its x-only public key.
#[derive(Clone)]
pub struct Keypair {
    pub private_key: [u8; 32],
    pub public_key: [u8; 32],
}

impl Keypair {
    /// Fresh random identity for the lifetime of the process.
    pub fn generate() -> Self {
        loop {
            if let Ok(keypair) = Self::from_private_key(generate_secret_key()) {
                return keypair;
            }
        }
    }

    pub fn from_private_key(private_key: [u8; 32]) -> Result<Self, KeyError> {
        let public_key = get_public_key(&private_key)?;
        Ok(Self {
            private_key,
            public_key,
        })
    }

    /// Parse a secret key given as 64 hex characters or an `nsec1…` string.
    pub fn parse(secret: &str) -> Result<Self, KeyError> {
        let trimmed = secret.trim();
        let private_key = if trimmed.starts_with("nsec1") {
            nsec_to_private_key(trimmed)?
        } else {
            decode_hex_key(trimmed)?
        };
        Self::from_private_key(private_key)
    }

    pub fn npub(&self) -> Result<String, KeyError> {
        public_key_to_npub(&self.public_key)
    }

    pub fn nsec(&self) -> Result<String, KeyError> {
        private_key_to_nsec(&self.private_key)
    }

    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key)
    }

    pub fn private_key_hex(&self) -> String {
        hex::encode(self.private_key)
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key_hex())
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Parse a public key given as 64 hex characters or an `npub1…` string into lowercase hex.
pub fn parse_public_key(public_key: &str) -> Result<String, KeyError> {
    let trimmed = public_key.trim();
    let bytes = if trimmed.starts_with("npub1") {
        npub_to_public_key(trimmed)?
    } else {
        decode_hex_key(trimmed)?
    };
    Ok(hex::encode(bytes))
}

pub fn public_key_to_npub(public_key: &[u8; 32]) -> Result<String, KeyError> {
    encode_bech32(NPUB_HRP, public_key)
}

pub fn private_key_to_nsec(private_key: &[u8; 32]) -> Result<String, KeyError> {
    encode_bech32(NSEC_HRP, private_key)
}

pub fn npub_to_public_key(npub: &str) -> Result<[u8; 32], KeyError> {
    decode_bech32(NPUB_HRP, npub)
}

pub fn nsec_to_private_key(nsec: &str) -> Result<[u8; 32], KeyError> {
    decode_bech32(NSEC_HRP, nsec)
}

fn decode_hex_key(value: &str) -> Result<[u8; 32], KeyError> {
    let bytes = hex::decode(value).map_err(|error| KeyError::InvalidHex(error.to_string()))?;
    to_key_bytes(&bytes)
}

fn to_key_bytes(bytes: &[u8]) -> Result<[u8; 32], KeyError> {
    <[u8; 32]>::try_from(bytes).map_err(|_| KeyError::InvalidLength(bytes.len()))
}

fn encode_bech32(hrp: &str, data: &[u8; 32]) -> Result<String, KeyError> {
    let parsed_hrp = Hrp::parse(hrp).map_err(|error| KeyError::InvalidBech32(error.to_string()))?;
    bech32::encode::<Bech32>(parsed_hrp, data)
        .map_err(|error| KeyError::InvalidBech32(error.to_string()))
}

fn decode_bech32(expected_hrp: &str, value: &str) -> Result<[u8; 32], KeyError> {
    let (hrp, data) =
        bech32::decode(value).map_err(|error| KeyError::InvalidBech32(error.to_string()))?;
    if hrp.to_lowercase() != expected_hrp {
        return Err(KeyError::UnexpectedPrefix {
            expected: expected_hrp.to_string(),
            actual: hrp.to_lowercase(),
        });
    }
    to_key_bytes(&data)
}

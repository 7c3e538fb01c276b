//! Nostr protocol primitives used by the post DVM.

pub mod dvm;
mod keys;
pub mod nip01;
mod tag_parsing;

pub use keys::{
    KeyError, Keypair, npub_to_public_key, nsec_to_private_key, parse_public_key,
    private_key_to_nsec, public_key_to_npub,
};
pub use nip01::{
    Event, EventTemplate, Filter, Nip01Error, UnsignedEvent, finalize_event, generate_secret_key,
    get_public_key, get_public_key_hex, short_hex, unix_now_secs, verify_event,
};

//! Nostr relay transport for the post DVM.
//!
//! This crate intentionally exposes a small surface:
//! - single-relay publish/subscribe over WebSocket
//! - the `RelayTransport` / `RelayConnector` seams and an in-process relay behind them
//! - bounded retry and a reconnectable relay handle

pub mod error;
pub mod managed;
pub mod memory;
pub mod relay;
pub mod retry;
pub mod subscription;
pub mod transport;

pub use error::{ClientError, Result};
pub use managed::ManagedRelay;
pub use memory::{MemoryRelay, MemoryRelayHub};
pub use relay::{
    ConnectionState, PublishConfirmation, RelayConfig, RelayConnection, RelayMessage,
    parse_relay_message, parse_relay_url,
};
pub use retry::{RetryPolicy, retry};
pub use subscription::{EventStream, Subscription};
pub use transport::{RelayConnector, RelayTransport, WebSocketConnector};

//! Transport seams the DVM depends on.
//!
//! The responder and requester only need "publish a signed event", "subscribe with filters", and
//! a way to open a fresh connection to the same address when the current one breaks. Both the
//! WebSocket [`RelayConnection`] and the in-process [`crate::MemoryRelay`] implement these.

use crate::error::Result;
use crate::relay::{PublishConfirmation, RelayConfig, RelayConnection};
use crate::subscription::EventStream;
use async_trait::async_trait;
use nostr::{Event, Filter};
use std::sync::Arc;

/// One live connection to a relay.
#[async_trait]
pub trait RelayTransport: Send + Sync {
    /// Address this connection was opened against.
    fn url(&self) -> &str;

    /// Whether the connection is still usable.
    async fn is_connected(&self) -> bool;

    /// Publish a signed event and wait for the relay to acknowledge it.
    async fn publish(&self, event: &Event) -> Result<PublishConfirmation>;

    /// Open a subscription; stored matches are delivered first, then live events.
    async fn subscribe(&self, subscription_id: &str, filters: Vec<Filter>) -> Result<EventStream>;

    /// Close a subscription.
    async fn unsubscribe(&self, subscription_id: &str) -> Result<()>;

    /// Close the connection.
    async fn disconnect(&self) -> Result<()>;
}

/// Opens connections to a relay address.
#[async_trait]
pub trait RelayConnector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Arc<dyn RelayTransport>>;
}

/// Connector producing WebSocket relay connections.
#[derive(Debug, Clone, Default)]
pub struct WebSocketConnector {
    config: RelayConfig,
}

impl WebSocketConnector {
    pub fn new(config: RelayConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl RelayConnector for WebSocketConnector {
    async fn connect(&self, url: &str) -> Result<Arc<dyn RelayTransport>> {
        let relay = RelayConnection::with_config(url, self.config.clone())?;
        relay.connect().await?;
        Ok(Arc::new(relay))
    }
}

//! Reconnectable relay handle shared by long-running tasks.

use crate::error::Result;
use crate::relay::PublishConfirmation;
use crate::retry::{RetryPolicy, retry};
use crate::subscription::EventStream;
use crate::transport::{RelayConnector, RelayTransport};
use nostr::{Event, Filter};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// A relay address plus the connection currently serving it.
///
/// Callers clone the current handle out of the lock and release it before doing I/O. When a
/// connection breaks, [`ManagedRelay::reconnect`] swaps in a fresh one under the write lock;
/// concurrent callers that noticed the same broken handle share the single replacement.
pub struct ManagedRelay {
    url: String,
    connector: Arc<dyn RelayConnector>,
    policy: RetryPolicy,
    current: RwLock<Arc<dyn RelayTransport>>,
}

fn same_connection(left: &Arc<dyn RelayTransport>, right: &Arc<dyn RelayTransport>) -> bool {
    std::ptr::eq(
        Arc::as_ptr(left).cast::<()>(),
        Arc::as_ptr(right).cast::<()>(),
    )
}

impl ManagedRelay {
    /// Open the initial connection. Failure here is returned as-is, without retries.
    pub async fn connect(
        url: impl Into<String>,
        connector: Arc<dyn RelayConnector>,
        policy: RetryPolicy,
    ) -> Result<Self> {
        let url = url.into();
        let relay = connector.connect(&url).await?;
        info!("connected to relay {}", url);
        Ok(Self {
            url,
            connector,
            policy,
            current: RwLock::new(relay),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Clone of the connection currently in use.
    pub async fn current(&self) -> Arc<dyn RelayTransport> {
        Arc::clone(&*self.current.read().await)
    }

    /// Replace `stale` with a fresh connection.
    ///
    /// If another caller already replaced `stale` and the replacement is still live, that
    /// replacement is returned and no new connection is opened.
    pub async fn reconnect(
        &self,
        stale: &Arc<dyn RelayTransport>,
    ) -> Result<Arc<dyn RelayTransport>> {
        let mut current = self.current.write().await;
        if !same_connection(&*current, stale) && current.is_connected().await {
            return Ok(Arc::clone(&*current));
        }

        info!("reconnecting to relay {}", self.url);
        let fresh = self.connector.connect(&self.url).await?;
        let previous = std::mem::replace(&mut *current, Arc::clone(&fresh));
        drop(current);

        if let Err(error) = previous.disconnect().await {
            debug!("closing stale connection to {}: {}", self.url, error);
        }
        Ok(fresh)
    }

    /// The current connection, reconnecting first if it is broken.
    pub async fn connected(&self) -> Result<Arc<dyn RelayTransport>> {
        let relay = self.current().await;
        if relay.is_connected().await {
            return Ok(relay);
        }
        self.reconnect(&relay).await
    }

    /// Reconnect if the current connection is broken. Returns whether a reconnect happened.
    pub async fn ensure_connected(&self) -> Result<bool> {
        let relay = self.current().await;
        if relay.is_connected().await {
            return Ok(false);
        }
        self.reconnect(&relay).await?;
        Ok(true)
    }

    /// Publish with the retry policy, reconnecting before any attempt whose connection is gone.
    pub async fn publish(&self, event: &Event) -> Result<PublishConfirmation> {
        retry(self.policy, "publish", |attempt| async move {
            let relay = self.connected().await?;
            debug!(
                "publishing {} to {} (attempt {})",
                event.short_id(),
                self.url,
                attempt
            );
            relay.publish(event).await
        })
        .await
    }

    /// Open a subscription with the retry policy.
    pub async fn subscribe(
        &self,
        subscription_id: &str,
        filters: Vec<Filter>,
    ) -> Result<EventStream> {
        retry(self.policy, "subscribe", |_| {
            let filters = filters.clone();
            async move {
                let relay = self.connected().await?;
                relay.subscribe(subscription_id, filters).await
            }
        })
        .await
    }

    /// Close a subscription on the current connection.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.current().await.unsubscribe(subscription_id).await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.current().await.disconnect().await
    }
}

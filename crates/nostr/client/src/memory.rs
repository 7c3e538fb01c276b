//! In-process relay.
//!
//! A [`MemoryRelayHub`] plays the part of one relay server: it stores every accepted event and
//! forwards it to matching subscriptions. Each [`MemoryRelayHub::connect`] hands out a separate
//! [`MemoryRelay`] connection, so code written against [`RelayTransport`] can be driven end to
//! end without a network, including connection loss via
//! [`MemoryRelayHub::break_all_connections`] and relay misbehavior via the `set_*` switches.

use crate::error::{ClientError, Result};
use crate::relay::PublishConfirmation;
use crate::subscription::{EventStream, Subscription};
use crate::transport::{RelayConnector, RelayTransport};
use async_trait::async_trait;
use nostr::{Event, Filter, verify_event};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

const MEMORY_RELAY_URL: &str = "memory://relay";

#[derive(Default)]
struct HubState {
    events: Vec<Event>,
    event_ids: HashSet<String>,
    subscriptions: HashMap<(u64, String), Subscription>,
    live_connections: HashSet<u64>,
    next_connection_id: u64,
    connection_count: usize,
    subscription_requests: usize,
    refuse_connections: bool,
    close_subscriptions: bool,
    drop_publishers: bool,
}

impl HubState {
    fn drop_connection(&mut self, connection_id: u64) {
        self.live_connections.remove(&connection_id);
        self.subscriptions.retain(|(owner, _), _| *owner != connection_id);
    }
}

/// Shared state of one in-memory relay; cheap to clone.
#[derive(Clone, Default)]
pub struct MemoryRelayHub {
    state: Arc<Mutex<HubState>>,
}

impl MemoryRelayHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new connection.
    pub async fn connect(&self) -> Result<MemoryRelay> {
        let mut state = self.state.lock().await;
        if state.refuse_connections {
            return Err(ClientError::Connection(format!(
                "{MEMORY_RELAY_URL} refused connection"
            )));
        }
        let connection_id = state.next_connection_id;
        state.next_connection_id += 1;
        state.connection_count += 1;
        state.live_connections.insert(connection_id);
        debug!("memory relay connection {} opened", connection_id);

        Ok(MemoryRelay {
            hub: self.clone(),
            connection_id,
        })
    }

    /// Number of connections opened so far.
    pub async fn connection_count(&self) -> usize {
        self.state.lock().await.connection_count
    }

    /// Number of subscriptions currently open across all connections.
    pub async fn subscription_count(&self) -> usize {
        self.state.lock().await.subscriptions.len()
    }

    /// Number of subscription requests received so far, including closed ones.
    pub async fn subscription_requests(&self) -> usize {
        self.state.lock().await.subscription_requests
    }

    /// Every accepted event, in arrival order.
    pub async fn published_events(&self) -> Vec<Event> {
        self.state.lock().await.events.clone()
    }

    /// Drop every open connection; their streams end and later calls fail as disconnected.
    pub async fn break_all_connections(&self) {
        let mut state = self.state.lock().await;
        let live: Vec<u64> = state.live_connections.iter().copied().collect();
        for connection_id in live {
            state.drop_connection(connection_id);
        }
        debug!("memory relay dropped all connections");
    }

    /// Make subsequent connection attempts fail.
    pub async fn set_refuse_connections(&self, refuse: bool) {
        self.state.lock().await.refuse_connections = refuse;
    }

    /// Answer subsequent subscription requests with `CLOSED`: their streams end at once.
    pub async fn set_close_subscriptions(&self, close: bool) {
        self.state.lock().await.close_subscriptions = close;
    }

    /// Drop the connection of anyone who publishes, instead of storing the event.
    pub async fn set_drop_publishers(&self, drop: bool) {
        self.state.lock().await.drop_publishers = drop;
    }
}

#[async_trait]
impl RelayConnector for MemoryRelayHub {
    async fn connect(&self, _url: &str) -> Result<Arc<dyn RelayTransport>> {
        let relay = MemoryRelayHub::connect(self).await?;
        Ok(Arc::new(relay))
    }
}

/// One connection to a [`MemoryRelayHub`].
pub struct MemoryRelay {
    hub: MemoryRelayHub,
    connection_id: u64,
}

impl MemoryRelay {
    fn ensure_live(state: &HubState, connection_id: u64) -> Result<()> {
        if state.live_connections.contains(&connection_id) {
            Ok(())
        } else {
            Err(ClientError::NotConnected)
        }
    }
}

#[async_trait]
impl RelayTransport for MemoryRelay {
    fn url(&self) -> &str {
        MEMORY_RELAY_URL
    }

    async fn is_connected(&self) -> bool {
        self.hub
            .state
            .lock()
            .await
            .live_connections
            .contains(&self.connection_id)
    }

    async fn publish(&self, event: &Event) -> Result<PublishConfirmation> {
        let mut state = self.hub.state.lock().await;
        Self::ensure_live(&state, self.connection_id)?;
        if state.drop_publishers {
            state.drop_connection(self.connection_id);
            return Err(ClientError::ConnectionClosed(format!(
                "{MEMORY_RELAY_URL} dropped the connection"
            )));
        }

        let valid = verify_event(event).unwrap_or(false);
        if !valid {
            return Err(ClientError::Rejected {
                event_id: event.id.clone(),
                message: "invalid: bad event id or signature".to_string(),
            });
        }

        if !state.event_ids.insert(event.id.clone()) {
            return Ok(PublishConfirmation {
                relay_url: MEMORY_RELAY_URL.to_string(),
                event_id: event.id.clone(),
                accepted: true,
                message: "duplicate: already have this event".to_string(),
            });
        }
        state.events.push(event.clone());

        let mut closed = Vec::new();
        for (key, subscription) in &state.subscriptions {
            if subscription.accepts(event) && subscription.handle_event(event.clone()).is_err() {
                closed.push(key.clone());
            }
        }
        for key in closed {
            debug!("memory relay dropping subscription {}", key.1);
            state.subscriptions.remove(&key);
        }

        Ok(PublishConfirmation {
            relay_url: MEMORY_RELAY_URL.to_string(),
            event_id: event.id.clone(),
            accepted: true,
            message: String::new(),
        })
    }

    async fn subscribe(&self, subscription_id: &str, filters: Vec<Filter>) -> Result<EventStream> {
        let mut state = self.hub.state.lock().await;
        Self::ensure_live(&state, self.connection_id)?;
        state.subscription_requests += 1;

        let (subscription, stream) = Subscription::with_channel(subscription_id, filters);
        if state.close_subscriptions {
            debug!("memory relay closed subscription {}", subscription_id);
            return Ok(stream);
        }
        for event in state.events.iter().filter(|event| subscription.accepts(event)) {
            subscription.handle_event(event.clone())?;
        }
        state
            .subscriptions
            .insert((self.connection_id, subscription_id.to_string()), subscription);
        Ok(stream)
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.hub
            .state
            .lock()
            .await
            .subscriptions
            .remove(&(self.connection_id, subscription_id.to_string()));
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.hub
            .state
            .lock()
            .await
            .drop_connection(self.connection_id);
        Ok(())
    }
}

//! Subscription management for receiving filtered events.

use crate::error::{ClientError, Result};
use nostr::{Event, Filter};
use tokio::sync::mpsc;

/// Per-subscription buffer; a consumer this far behind is treated as gone.
pub const SUBSCRIPTION_BUFFER: usize = 1000;

/// Stream of events delivered for one subscription.
///
/// The stream ends (`recv` returns `None`) when the subscription is closed or the connection
/// carrying it is lost.
pub type EventStream = mpsc::Receiver<Event>;

/// A subscription to filtered events from a relay.
#[derive(Clone)]
pub struct Subscription {
    /// Subscription ID.
    pub id: String,
    /// Filters for this subscription.
    pub filters: Vec<Filter>,
    event_tx: mpsc::Sender<Event>,
}

impl Subscription {
    /// Create a subscription that delivers events on a bounded channel.
    pub fn with_channel(id: impl Into<String>, filters: Vec<Filter>) -> (Self, EventStream) {
        let (event_tx, event_rx) = mpsc::channel(SUBSCRIPTION_BUFFER);
        let subscription = Self {
            id: id.into(),
            filters,
            event_tx,
        };
        (subscription, event_rx)
    }

    /// Whether any filter of this subscription accepts `event`.
    pub fn accepts(&self, event: &Event) -> bool {
        self.filters.iter().any(|filter| filter.matches(event))
    }

    /// Handle a received event.
    pub fn handle_event(&self, event: Event) -> Result<()> {
        self.event_tx.try_send(event).map_err(|error| match error {
            mpsc::error::TrySendError::Full(_) => {
                ClientError::Subscription("event channel full - consumer too slow".to_string())
            }
            mpsc::error::TrySendError::Closed(_) => {
                ClientError::Subscription("event channel closed".to_string())
            }
        })
    }

    /// Whether the consumer has dropped its stream.
    pub fn is_closed(&self) -> bool {
        self.event_tx.is_closed()
    }
}

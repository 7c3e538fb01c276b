//! WebSocket connection to one relay.
//!
//! A background task reads relay frames and routes them: `EVENT` to the matching
//! [`Subscription`], `OK` to the publisher waiting on that event id, `EOSE`/`CLOSED` to
//! subscription bookkeeping. When the socket goes away every subscription stream ends and every
//! pending publish fails, so callers see the loss instead of hanging.

use crate::error::{ClientError, Result};
use crate::subscription::{EventStream, Subscription};
use crate::transport::RelayTransport;
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use nostr::{Event, Filter};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, RwLock, oneshot};
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async, tungstenite::Message};
use tracing::{debug, warn};
use url::Url;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;
type SocketWriter = SplitSink<Socket, Message>;
type SocketReader = SplitStream<Socket>;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// A frame sent by a relay.
#[derive(Debug, Clone)]
pub enum RelayMessage {
    /// `["EVENT", subscription_id, event]`
    Event(String, Event),
    /// `["OK", event_id, accepted, message]`
    Ok(String, bool, String),
    /// `["EOSE", subscription_id]`
    Eose(String),
    /// `["CLOSED", subscription_id, message]`
    Closed(String, String),
    Notice(String),
    Auth(String),
}

/// Relay acknowledgement of a published event.
#[derive(Debug, Clone)]
pub struct PublishConfirmation {
    pub relay_url: String,
    pub event_id: String,
    pub accepted: bool,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub connect_timeout: Duration,
    /// How long to wait for the relay's `OK` after sending an event.
    pub ack_timeout: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            ack_timeout: Duration::from_secs(5),
        }
    }
}

/// State shared between a connection handle and its receive task.
struct Shared {
    state: RwLock<ConnectionState>,
    writer: Mutex<Option<SocketWriter>>,
    subscriptions: Mutex<HashMap<String, Subscription>>,
    pending_acks: Mutex<HashMap<String, oneshot::Sender<(bool, String)>>>,
}

impl Shared {
    fn new() -> Self {
        Self {
            state: RwLock::new(ConnectionState::Disconnected),
            writer: Mutex::new(None),
            subscriptions: Mutex::new(HashMap::new()),
            pending_acks: Mutex::new(HashMap::new()),
        }
    }

    async fn state(&self) -> ConnectionState {
        *self.state.read().await
    }

    async fn set_state(&self, state: ConnectionState) {
        *self.state.write().await = state;
    }

    /// Mark the connection dead, ending every stream and failing every pending publish.
    async fn reset(&self) {
        self.set_state(ConnectionState::Disconnected).await;
        self.writer.lock().await.take();
        self.subscriptions.lock().await.clear();
        self.pending_acks.lock().await.clear();
    }

    async fn dispatch(&self, relay_url: &str, message: RelayMessage) {
        match message {
            RelayMessage::Event(subscription_id, event) => {
                let subscription = self.subscriptions.lock().await.get(&subscription_id).cloned();
                let Some(subscription) = subscription else {
                    debug!("event for unknown subscription {} on {}", subscription_id, relay_url);
                    return;
                };
                if let Err(error) = subscription.handle_event(event) {
                    warn!("subscription {} on {}: {}", subscription_id, relay_url, error);
                    if subscription.is_closed() {
                        self.subscriptions.lock().await.remove(&subscription_id);
                    }
                }
            }
            RelayMessage::Ok(event_id, accepted, message) => {
                let waiter = self.pending_acks.lock().await.remove(&event_id);
                if let Some(waiter) = waiter
                    && waiter.send((accepted, message)).is_err()
                {
                    debug!("publisher of {} stopped waiting", nostr::short_hex(&event_id));
                }
            }
            RelayMessage::Eose(subscription_id) => {
                debug!("stored events for {} on {} delivered", subscription_id, relay_url);
            }
            RelayMessage::Closed(subscription_id, message) => {
                warn!("{} closed subscription {}: {}", relay_url, subscription_id, message);
                self.subscriptions.lock().await.remove(&subscription_id);
            }
            RelayMessage::Notice(message) => warn!("notice from {}: {}", relay_url, message),
            RelayMessage::Auth(_) => debug!("{} asked for AUTH; not supported", relay_url),
        }
    }
}

async fn receive_loop(shared: Arc<Shared>, relay_url: String, mut reader: SocketReader) {
    while let Some(frame) = reader.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => break,
            Ok(Message::Ping(payload)) => {
                debug!("ping from {} ({} bytes)", relay_url, payload.len());
                continue;
            }
            Ok(_) => continue,
            Err(error) => {
                warn!("read from {} failed: {}", relay_url, error);
                break;
            }
        };

        match parse_relay_message(text.as_str()) {
            Ok(Some(message)) => shared.dispatch(&relay_url, message).await,
            Ok(None) => {}
            Err(error) => warn!("unreadable frame from {}: {}", relay_url, error),
        }
    }

    shared.reset().await;
    debug!("connection to {} closed", relay_url);
}

/// Check that `url` is a `ws://` or `wss://` address.
pub fn parse_relay_url(url: &str) -> Result<Url> {
    let parsed = Url::parse(url)?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(parsed),
        scheme => Err(ClientError::InvalidUrl(format!(
            "relay URL must use ws:// or wss://, got {scheme}://"
        ))),
    }
}

/// One WebSocket connection to a relay.
pub struct RelayConnection {
    url: Url,
    config: RelayConfig,
    shared: Arc<Shared>,
    recv_task: Mutex<Option<JoinHandle<()>>>,
}

impl RelayConnection {
    pub fn new(url: &str) -> Result<Self> {
        Self::with_config(url, RelayConfig::default())
    }

    pub fn with_config(url: &str, config: RelayConfig) -> Result<Self> {
        Ok(Self {
            url: parse_relay_url(url)?,
            config,
            shared: Arc::new(Shared::new()),
            recv_task: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &str {
        self.url.as_str()
    }

    pub async fn state(&self) -> ConnectionState {
        self.shared.state().await
    }

    /// Open the socket and start the receive task.
    pub async fn connect(&self) -> Result<()> {
        {
            let mut state = self.shared.state.write().await;
            if *state == ConnectionState::Connected {
                return Err(ClientError::AlreadyConnected);
            }
            *state = ConnectionState::Connecting;
        }

        let socket =
            match timeout(self.config.connect_timeout, connect_async(self.url.as_str())).await {
                Ok(Ok((socket, _response))) => socket,
                Ok(Err(error)) => {
                    self.shared.set_state(ConnectionState::Disconnected).await;
                    return Err(ClientError::Connection(error.to_string()));
                }
                Err(_) => {
                    self.shared.set_state(ConnectionState::Disconnected).await;
                    return Err(ClientError::Timeout(format!(
                        "connecting to {} took longer than {:?}",
                        self.url, self.config.connect_timeout
                    )));
                }
            };

        let (writer, reader) = socket.split();
        *self.shared.writer.lock().await = Some(writer);
        self.shared.set_state(ConnectionState::Connected).await;

        let task = tokio::spawn(receive_loop(
            Arc::clone(&self.shared),
            self.url.to_string(),
            reader,
        ));
        *self.recv_task.lock().await = Some(task);
        Ok(())
    }

    pub async fn disconnect(&self) -> Result<()> {
        let writer = self.shared.writer.lock().await.take();
        if let Some(task) = self.recv_task.lock().await.take() {
            task.abort();
        }
        self.shared.reset().await;

        if let Some(mut writer) = writer {
            writer
                .send(Message::Close(None))
                .await
                .map_err(|error| ClientError::WebSocket(error.to_string()))?;
        }
        Ok(())
    }

    /// Send `event` and wait for the relay's `OK`.
    ///
    /// `OK false` is terminal, except for `duplicate:` which means the relay already has the
    /// event. No answer within [`RelayConfig::ack_timeout`] is a retryable timeout.
    pub async fn publish(&self, event: &Event) -> Result<PublishConfirmation> {
        let (waiter, acknowledged) = oneshot::channel();
        self.shared
            .pending_acks
            .lock()
            .await
            .insert(event.id.clone(), waiter);

        if let Err(error) = self.send_frame(&json!(["EVENT", event])).await {
            self.shared.pending_acks.lock().await.remove(&event.id);
            return Err(error);
        }

        let (accepted, message) = match timeout(self.config.ack_timeout, acknowledged).await {
            Ok(Ok(answer)) => answer,
            Ok(Err(_)) => {
                return Err(ClientError::ConnectionClosed(format!(
                    "{} closed before acknowledging {}",
                    self.url,
                    event.short_id()
                )));
            }
            Err(_) => {
                self.shared.pending_acks.lock().await.remove(&event.id);
                return Err(ClientError::Timeout(format!(
                    "{} did not acknowledge {} within {:?}",
                    self.url,
                    event.short_id(),
                    self.config.ack_timeout
                )));
            }
        };

        if !accepted && !message.starts_with("duplicate:") {
            return Err(ClientError::Rejected {
                event_id: event.id.clone(),
                message,
            });
        }
        Ok(PublishConfirmation {
            relay_url: self.url.to_string(),
            event_id: event.id.clone(),
            accepted: true,
            message,
        })
    }

    /// Open a subscription. It is registered before `REQ` is sent so no early event is lost.
    pub async fn subscribe(
        &self,
        subscription_id: &str,
        filters: Vec<Filter>,
    ) -> Result<EventStream> {
        let mut request = vec![json!("REQ"), json!(subscription_id)];
        for filter in &filters {
            request.push(serde_json::to_value(filter)?);
        }

        let (subscription, stream) = Subscription::with_channel(subscription_id, filters);
        self.shared
            .subscriptions
            .lock()
            .await
            .insert(subscription_id.to_string(), subscription);

        if let Err(error) = self.send_frame(&Value::Array(request)).await {
            self.shared.subscriptions.lock().await.remove(subscription_id);
            return Err(error);
        }
        Ok(stream)
    }

    /// Close a subscription. Offline, only the local registration is dropped.
    pub async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        self.shared.subscriptions.lock().await.remove(subscription_id);
        if self.state().await == ConnectionState::Connected {
            self.send_frame(&json!(["CLOSE", subscription_id])).await?;
        }
        Ok(())
    }

    async fn send_frame(&self, frame: &Value) -> Result<()> {
        if self.state().await != ConnectionState::Connected {
            return Err(ClientError::NotConnected);
        }
        let text = serde_json::to_string(frame)?;
        let mut writer = self.shared.writer.lock().await;
        writer
            .as_mut()
            .ok_or(ClientError::NotConnected)?
            .send(Message::Text(text))
            .await
            .map_err(|error| ClientError::WebSocket(error.to_string()))
    }
}

#[async_trait]
impl RelayTransport for RelayConnection {
    fn url(&self) -> &str {
        RelayConnection::url(self)
    }

    async fn is_connected(&self) -> bool {
        self.state().await == ConnectionState::Connected
    }

    async fn publish(&self, event: &Event) -> Result<PublishConfirmation> {
        RelayConnection::publish(self, event).await
    }

    async fn subscribe(&self, subscription_id: &str, filters: Vec<Filter>) -> Result<EventStream> {
        RelayConnection::subscribe(self, subscription_id, filters).await
    }

    async fn unsubscribe(&self, subscription_id: &str) -> Result<()> {
        RelayConnection::unsubscribe(self, subscription_id).await
    }

    async fn disconnect(&self) -> Result<()> {
        RelayConnection::disconnect(self).await
    }
}

fn protocol_error(message: impl Into<String>) -> ClientError {
    ClientError::Protocol(message.into())
}

/// Positional fields of one relay frame, after its label.
struct Frame<'a> {
    label: &'a str,
    fields: &'a [Value],
}

impl Frame<'_> {
    fn require(&self, count: usize) -> Result<()> {
        if self.fields.len() < count {
            return Err(protocol_error(format!("{} message is missing fields", self.label)));
        }
        Ok(())
    }

    fn value(&self, index: usize) -> Result<&Value> {
        self.fields
            .get(index)
            .ok_or_else(|| protocol_error(format!("{} message is missing fields", self.label)))
    }

    fn text(&self, index: usize) -> Result<String> {
        self.value(index)?
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| {
                protocol_error(format!("{} field {} is not a string", self.label, index + 1))
            })
    }
}

/// Parse one relay frame. Unknown labels and empty arrays yield `None`.
pub fn parse_relay_message(text: &str) -> Result<Option<RelayMessage>> {
    let value: Value = serde_json::from_str(text)?;
    let Value::Array(items) = value else {
        return Err(protocol_error("relay message is not a JSON array"));
    };
    let Some((label, fields)) = items.split_first() else {
        return Ok(None);
    };
    let label = label
        .as_str()
        .ok_or_else(|| protocol_error("relay message label is not a string"))?;
    let frame = Frame { label, fields };

    let message = match label {
        "EVENT" => {
            frame.require(2)?;
            let event = serde_json::from_value(frame.value(1)?.clone()).map_err(|error| {
                protocol_error(format!("EVENT carries a malformed event: {error}"))
            })?;
            RelayMessage::Event(frame.text(0)?, event)
        }
        "OK" => {
            frame.require(3)?;
            let accepted = frame
                .value(1)?
                .as_bool()
                .ok_or_else(|| protocol_error("OK accepted flag is not a boolean"))?;
            RelayMessage::Ok(frame.text(0)?, accepted, frame.text(2)?)
        }
        "EOSE" => RelayMessage::Eose(frame.text(0)?),
        "CLOSED" => {
            let reason = frame.fields.get(1).and_then(Value::as_str).unwrap_or_default();
            RelayMessage::Closed(frame.text(0)?, reason.to_string())
        }
        "NOTICE" => RelayMessage::Notice(frame.text(0)?),
        "AUTH" => RelayMessage::Auth(frame.text(0)?),
        _ => return Ok(None),
    };
    Ok(Some(message))
}

//! Client error types.

use thiserror::Error;

/// Client error type.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("relay rejected event {event_id}: {message}")]
    Rejected { event_id: String, message: String },

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("timeout error: {0}")]
    Timeout(String),

    #[error("not connected")]
    NotConnected,

    #[error("already connected")]
    AlreadyConnected,

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("{operation} failed after {attempts} attempts: {last}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        #[source]
        last: Box<ClientError>,
    },
}

impl ClientError {
    /// Whether the underlying connection is gone and must be replaced before retrying.
    pub fn is_connection_broken(&self) -> bool {
        matches!(
            self,
            ClientError::WebSocket(_) | ClientError::ConnectionClosed(_) | ClientError::NotConnected
        )
    }

    /// Whether a retry of the same operation can reasonably succeed.
    ///
    /// Connection loss, failed connects, and missing acknowledgements are transient; malformed
    /// input and explicit relay rejections are terminal.
    pub fn is_retryable(&self) -> bool {
        self.is_connection_broken()
            || matches!(self, ClientError::Connection(_) | ClientError::Timeout(_))
    }
}

/// Client result type.
pub type Result<T> = std::result::Result<T, ClientError>;

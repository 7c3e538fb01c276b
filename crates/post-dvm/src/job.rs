//! Seams between the DVM protocol and the data it vends.

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Errors raised by a [`JobFetcher`].
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("invalid job argument: {0}")]
    InvalidArgument(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("request failed: {0}")]
    Request(String),

    #[error("upstream returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    #[error("could not decode upstream response: {0}")]
    Decode(String),
}

/// Produces the result for one job argument.
#[async_trait]
pub trait JobFetcher: Send + Sync {
    type Output: Serialize + Send;

    async fn fetch(&self, argument: &str) -> Result<Self::Output, FetchError>;
}

/// A result type the requester can decode out of a response.
pub trait JobOutput: DeserializeOwned + Send {
    /// Whether a decoded value is complete enough to accept from a response that does not
    /// reference the request.
    fn is_well_formed(&self) -> bool;
}

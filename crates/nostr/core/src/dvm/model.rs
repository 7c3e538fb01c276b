use super::kinds::is_job_request_kind;
use crate::nip01::Event;
use thiserror::Error;

/// Errors raised when an event does not describe a usable job.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DvmProtocolError {
    #[error("invalid kind: {0} (expected job request kind)")]
    InvalidKind(u16),

    #[error("job request {0} has an empty argument")]
    EmptyArgument(String),
}

/// A job request as seen by the responder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobRequest {
    /// Request event id; first half of the correlation key.
    pub id: String,
    /// Requester public key; second half of the correlation key.
    pub requester: String,
    /// Opaque job argument (the post id to fetch).
    pub argument: String,
    pub created_at: u64,
}

impl JobRequest {
    /// Read a job request out of a delivered event.
    ///
    /// The kind is checked again here even though the subscription filter already constrains
    /// it; relays are not trusted to apply filters exactly.
    pub fn from_event(event: &Event) -> Result<Self, DvmProtocolError> {
        if !is_job_request_kind(event.kind) {
            return Err(DvmProtocolError::InvalidKind(event.kind));
        }

        let argument = event.content.trim();
        if argument.is_empty() {
            return Err(DvmProtocolError::EmptyArgument(event.id.clone()));
        }

        Ok(Self {
            id: event.id.clone(),
            requester: event.pubkey.clone(),
            argument: argument.to_string(),
            created_at: event.created_at,
        })
    }
}

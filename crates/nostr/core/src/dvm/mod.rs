//! Post-lookup Data Vending Machine protocol.
//!
//! A requester asks a responder for data about one social-media post; the responder fetches it
//! and answers with a text note correlated to the request.
//!
//! Internal module boundaries:
//! - `kinds`: event kind constants + kind checks
//! - `model`: the responder-side view of a job request
//! - `builders`: `EventTemplate` and `Filter` construction helpers
//! - `correlation`: matching a delivered event to an outstanding request
//! - `tests`: protocol coverage
//!
//! ## Protocol Overview
//!
//! ```text
//! Requester                  Relay                    Responder
//!    │── REQ kind 1 author=R ──>│                          │
//!    │── EVENT kind 42069 ─────>│── EVENT kind 42069 ─────>│
//!    │    content: <post id>    │                          │ fetch(post id)
//!    │                          │<── EVENT kind 1 ─────────│
//!    │<── EVENT kind 1 ─────────│    tags: e=<req>, p=<requester>
//!    │    content: <json post>  │                          │
//! ```
//!
//! The requester subscribes before publishing so a fast responder cannot answer into the void.
//!
//! ## Correlation
//!
//! The `e` tag naming the request id is the primary correlation rule. Responses without any
//! `e` tag are tolerated as a fallback if their payload decodes to a well-formed result; see
//! [`Correlation::Untagged`].

mod builders;
mod correlation;
mod kinds;
mod model;

pub use builders::{
    create_job_request_event, create_job_response_event, job_request_filter, job_response_filter,
};
pub use correlation::{Correlation, correlate};
pub use kinds::{KIND_JOB_REQUEST, KIND_TEXT_NOTE, is_job_request_kind, is_job_response_kind};
pub use model::{DvmProtocolError, JobRequest};

#[cfg(test)]
mod tests;

use super::kinds::{KIND_JOB_REQUEST, KIND_TEXT_NOTE};
use super::model::JobRequest;
use crate::nip01::{EventTemplate, Filter};

/// Create an EventTemplate for a job request.
///
/// The job argument travels as the content and requests carry no tags. The requester identity
/// is the event author.
pub fn create_job_request_event(argument: &str, created_at: u64) -> EventTemplate {
    EventTemplate {
        kind: KIND_JOB_REQUEST,
        tags: Vec::new(),
        content: argument.to_string(),
        created_at,
    }
}

/// Create an EventTemplate for a job response.
///
/// The `e` and `p` tags reference the request id and the requester, forming the correlation
/// key the requester waits for.
pub fn create_job_response_event(
    request: &JobRequest,
    content: impl Into<String>,
    created_at: u64,
) -> EventTemplate {
    EventTemplate {
        kind: KIND_TEXT_NOTE,
        tags: vec![
            vec!["e".to_string(), request.id.clone()],
            vec!["p".to_string(), request.requester.clone()],
        ],
        content: content.into(),
        created_at,
    }
}

/// Filter for incoming job requests created at or after `since`.
pub fn job_request_filter(since: u64) -> Filter {
    Filter::new().kind(KIND_JOB_REQUEST).since(since)
}

/// Filter for responses authored by `responder_pubkey` created at or after `since`.
///
/// The filter deliberately does not constrain the `e` tag: some responders omit it, and the
/// requester decides correlation itself (see [`super::correlate`]).
pub fn job_response_filter(responder_pubkey: &str, since: u64) -> Filter {
    Filter::new()
        .kind(KIND_TEXT_NOTE)
        .author(responder_pubkey)
        .since(since)
}

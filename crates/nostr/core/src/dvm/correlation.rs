use super::kinds::is_job_response_kind;
use crate::nip01::Event;

/// How a delivered event relates to an outstanding request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Correlation {
    /// Response kind from the expected author, with an `e` tag naming the request.
    Tagged,
    /// Response kind from the expected author with no `e` tag at all.
    ///
    /// Known leniency: responders in the wild sometimes omit the reference tag, so the requester
    /// may still accept such an event if its payload decodes to a well-formed result. This
    /// weakens correlation when several requests to the same responder are outstanding in one
    /// process; it does not let a response tagged for another request through.
    Untagged,
    /// Response kind from the expected author, tagged for a different request.
    Foreign,
    /// Wrong kind or wrong author.
    Unrelated,
}

impl Correlation {
    /// Whether the event may answer the request, subject to payload checks.
    pub fn is_candidate(self) -> bool {
        matches!(self, Correlation::Tagged | Correlation::Untagged)
    }
}

/// Classify `event` against the request `request_id` sent to `responder_pubkey`.
pub fn correlate(event: &Event, request_id: &str, responder_pubkey: &str) -> Correlation {
    if !is_job_response_kind(event.kind) || event.pubkey != responder_pubkey {
        return Correlation::Unrelated;
    }

    let references = event.tag_values("e");
    if references.iter().any(|reference| reference == request_id) {
        Correlation::Tagged
    } else if references.is_empty() {
        Correlation::Untagged
    } else {
        Correlation::Foreign
    }
}

/// Job request kind. Chosen outside the ranges used by the general network.
pub const KIND_JOB_REQUEST: u16 = 42069;

/// Job response kind: a plain text note carrying the JSON result.
pub const KIND_TEXT_NOTE: u16 = 1;

/// Check if a kind is the job request kind.
pub fn is_job_request_kind(kind: u16) -> bool {
    kind == KIND_JOB_REQUEST
}

/// Check if a kind is the job response kind.
pub fn is_job_response_kind(kind: u16) -> bool {
    kind == KIND_TEXT_NOTE
}

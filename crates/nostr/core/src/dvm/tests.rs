use super::*;
use crate::keys::Keypair;
use crate::nip01::{Event, Nip01Error, finalize_event, verify_event};

fn sign(template: &crate::nip01::EventTemplate, keys: &Keypair) -> Result<Event, Nip01Error> {
    finalize_event(template, &keys.private_key)
}

fn signed_request(requester: &Keypair, argument: &str) -> Result<Event, Nip01Error> {
    sign(&create_job_request_event(argument, 1_700_000_000), requester)
}

fn note(author: &Keypair, tags: Vec<Vec<String>>) -> Result<Event, Nip01Error> {
    sign(
        &crate::nip01::EventTemplate {
            created_at: 1_700_000_000,
            kind: KIND_TEXT_NOTE,
            tags,
            content: "{}".to_string(),
        },
        author,
    )
}

// =========================================================================
// Kinds
// =========================================================================

#[test]
fn test_kind_checks() {
    assert!(is_job_request_kind(42069));
    assert!(!is_job_request_kind(1));
    assert!(!is_job_request_kind(5050));

    assert!(is_job_response_kind(1));
    assert!(!is_job_response_kind(42069));
    assert!(!is_job_response_kind(6050));
}

// =========================================================================
// Builders
// =========================================================================

#[test]
fn test_request_wire_shape() -> Result<(), Nip01Error> {
    let requester = Keypair::generate();
    let request = signed_request(&requester, "1110302988")?;

    assert_eq!(request.kind, KIND_JOB_REQUEST);
    assert_eq!(request.content, "1110302988");
    assert!(request.tags.is_empty());
    assert_eq!(request.created_at, 1_700_000_000);
    assert_eq!(request.pubkey, requester.public_key_hex());
    assert!(verify_event(&request)?);
    Ok(())
}

#[test]
fn test_response_carries_correlation_key() -> Result<(), Box<dyn std::error::Error>> {
    let requester = Keypair::generate();
    let responder = Keypair::generate();
    let request = JobRequest::from_event(&signed_request(&requester, "1110302988")?)?;

    let response = sign(
        &create_job_response_event(&request, r#"{"Text":"Running bitcoin"}"#, 1_700_000_060),
        &responder,
    )?;

    assert_eq!(response.kind, KIND_TEXT_NOTE);
    assert_eq!(
        response.tags,
        vec![
            vec!["e".to_string(), request.id.clone()],
            vec!["p".to_string(), requester.public_key_hex()],
        ]
    );
    assert_eq!(response.content, r#"{"Text":"Running bitcoin"}"#);
    assert_eq!(response.created_at, 1_700_000_060);
    assert!(verify_event(&response)?);
    Ok(())
}

#[test]
fn test_filters() {
    let request_filter = job_request_filter(100);
    assert_eq!(request_filter.kinds, Some(vec![KIND_JOB_REQUEST]));
    assert_eq!(request_filter.since, Some(100));
    assert!(request_filter.authors.is_none());

    let response_filter = job_response_filter("responder", 40);
    assert_eq!(response_filter.kinds, Some(vec![KIND_TEXT_NOTE]));
    assert_eq!(response_filter.authors, Some(vec!["responder".to_string()]));
    assert_eq!(response_filter.since, Some(40));
    assert!(response_filter.event_refs.is_none());
}

// =========================================================================
// JobRequest parsing
// =========================================================================

#[test]
fn test_job_request_from_event() -> Result<(), Box<dyn std::error::Error>> {
    let requester = Keypair::generate();
    let event = signed_request(&requester, " 1110302988 ")?;
    let request = JobRequest::from_event(&event)?;

    assert_eq!(request.id, event.id);
    assert_eq!(request.requester, requester.public_key_hex());
    assert_eq!(request.argument, "1110302988");
    Ok(())
}

#[test]
fn test_job_request_rejects_wrong_kind_and_empty_argument() -> Result<(), Nip01Error> {
    let author = Keypair::generate();

    let wrong_kind = note(&author, Vec::new())?;
    assert_eq!(
        JobRequest::from_event(&wrong_kind),
        Err(DvmProtocolError::InvalidKind(KIND_TEXT_NOTE))
    );

    let empty = signed_request(&author, "   ")?;
    assert!(matches!(
        JobRequest::from_event(&empty),
        Err(DvmProtocolError::EmptyArgument(_))
    ));
    Ok(())
}

// =========================================================================
// Correlation
// =========================================================================

#[test]
fn test_correlation_tagged() -> Result<(), Nip01Error> {
    let responder = Keypair::generate();
    let event = note(
        &responder,
        vec![
            vec!["e".to_string(), "request-a".to_string()],
            vec!["p".to_string(), "requester".to_string()],
        ],
    )?;

    let correlation = correlate(&event, "request-a", &responder.public_key_hex());
    assert_eq!(correlation, Correlation::Tagged);
    assert!(correlation.is_candidate());
    Ok(())
}

#[test]
fn test_correlation_rejects_response_for_other_request() -> Result<(), Nip01Error> {
    let responder = Keypair::generate();
    let for_b = note(&responder, vec![vec!["e".to_string(), "request-b".to_string()]])?;

    let correlation = correlate(&for_b, "request-a", &responder.public_key_hex());
    assert_eq!(correlation, Correlation::Foreign);
    assert!(!correlation.is_candidate());
    Ok(())
}

#[test]
fn test_correlation_untagged_fallback() -> Result<(), Nip01Error> {
    let responder = Keypair::generate();
    let untagged = note(&responder, Vec::new())?;
    assert_eq!(
        correlate(&untagged, "request-a", &responder.public_key_hex()),
        Correlation::Untagged
    );

    // A `p` tag alone does not count as a request reference.
    let p_only = note(&responder, vec![vec!["p".to_string(), "requester".to_string()]])?;
    assert_eq!(
        correlate(&p_only, "request-a", &responder.public_key_hex()),
        Correlation::Untagged
    );
    Ok(())
}

#[test]
fn test_correlation_ignores_other_authors_and_kinds() -> Result<(), Nip01Error> {
    let responder = Keypair::generate();
    let impostor = Keypair::generate();

    let from_impostor = note(&impostor, vec![vec!["e".to_string(), "request-a".to_string()]])?;
    assert_eq!(
        correlate(&from_impostor, "request-a", &responder.public_key_hex()),
        Correlation::Unrelated
    );

    let request_kind = signed_request(&responder, "1")?;
    assert_eq!(
        correlate(&request_kind, "request-a", &responder.public_key_hex()),
        Correlation::Unrelated
    );
    Ok(())
}

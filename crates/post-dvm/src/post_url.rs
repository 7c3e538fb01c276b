//! Extracting a post id from what a user pastes into the CLI.

use regex::Regex;
use std::sync::LazyLock;
use thiserror::Error;

const STATUS_URL_PATTERN: &str = r"(?:^|[/.])(?:twitter|x)\.com/[^/\s]+/status(?:es)?/(\d+)";
const BARE_ID_PATTERN: &str = r"^\d+$";

type CompiledPattern = LazyLock<Result<Regex, regex::Error>>;

static STATUS_URL: CompiledPattern = LazyLock::new(|| Regex::new(STATUS_URL_PATTERN));
static BARE_ID: CompiledPattern = LazyLock::new(|| Regex::new(BARE_ID_PATTERN));

fn compiled(pattern: &'static CompiledPattern) -> Result<&'static Regex, PostUrlError> {
    pattern
        .as_ref()
        .map_err(|error| PostUrlError::Pattern(error.clone()))
}

#[derive(Debug, Error)]
pub enum PostUrlError {
    #[error("unable to extract post id from {0:?}")]
    Unrecognized(String),

    #[error("invalid post url pattern: {0}")]
    Pattern(#[from] regex::Error),
}

/// Post id from a `twitter.com` / `x.com` status URL or a bare numeric id.
pub fn extract_post_id(input: &str) -> Result<String, PostUrlError> {
    let trimmed = input.trim();

    if let Some(id) = compiled(&STATUS_URL)?
        .captures(trimmed)
        .and_then(|captures| captures.get(1))
    {
        return Ok(id.as_str().to_string());
    }

    if compiled(&BARE_ID)?.is_match(trimmed) {
        return Ok(trimmed.to_string());
    }

    Err(PostUrlError::Unrecognized(trimmed.to_string()))
}

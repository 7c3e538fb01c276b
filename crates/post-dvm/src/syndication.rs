//! Post lookup through the public embed syndication endpoint.

use crate::job::{FetchError, JobFetcher};
use crate::post::Post;
use async_trait::async_trait;
use chrono::DateTime;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_SYNDICATION_URL: &str = "https://cdn.syndication.twimg.com/tweet-result";
pub const DEFAULT_FETCH_TIMEOUT_MS: u64 = 10_000;

const BASE36_DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const TOKEN_FRACTION_DIGITS: usize = 11;

#[derive(Debug, Clone)]
pub struct SyndicationConfig {
    pub base_url: String,
    pub timeout_ms: u64,
}

impl Default for SyndicationConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_SYNDICATION_URL.to_string(),
            timeout_ms: DEFAULT_FETCH_TIMEOUT_MS,
        }
    }
}

/// [`JobFetcher`] resolving a numeric post id to a [`Post`].
#[derive(Debug, Clone)]
pub struct SyndicationFetcher {
    base_url: String,
    timeout: Duration,
    http: reqwest::Client,
}

impl SyndicationFetcher {
    pub fn new(config: SyndicationConfig) -> Self {
        Self {
            base_url: config.base_url.trim().trim_end_matches('/').to_string(),
            timeout: Duration::from_millis(config.timeout_ms.max(250)),
            http: reqwest::Client::new(),
        }
    }

    async fn fetch_post(&self, post_id: &str) -> Result<Post, FetchError> {
        let numeric = validate_post_id(post_id)?;
        let token = syndication_token(numeric);
        let response = self
            .http
            .get(self.base_url.as_str())
            .query(&[("id", post_id), ("token", token.as_str()), ("lang", "en")])
            .timeout(self.timeout)
            .send()
            .await
            .map_err(|error| FetchError::Request(error.to_string()))?;

        let status = response.status();
        let bytes = response
            .bytes()
            .await
            .map_err(|error| FetchError::Request(error.to_string()))?;

        if status.as_u16() == 404 {
            return Err(FetchError::NotFound(post_id.to_string()));
        }
        if !status.is_success() {
            let body = String::from_utf8_lossy(&bytes).trim().to_string();
            return Err(FetchError::Http {
                status: status.as_u16(),
                body: if body.is_empty() {
                    "<empty>".to_string()
                } else {
                    body
                },
            });
        }

        decode_syndication_post(&bytes, post_id)
    }
}

impl Default for SyndicationFetcher {
    fn default() -> Self {
        Self::new(SyndicationConfig::default())
    }
}

#[async_trait]
impl JobFetcher for SyndicationFetcher {
    type Output = Post;

    async fn fetch(&self, argument: &str) -> Result<Post, FetchError> {
        debug!("fetching post {} from {}", argument, self.base_url);
        self.fetch_post(argument).await
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SyndicationPost {
    #[serde(rename = "__typename")]
    typename: String,
    id_str: String,
    text: String,
    created_at: String,
    favorite_count: u64,
    conversation_count: u64,
    in_reply_to_status_id_str: Option<String>,
    possibly_sensitive: bool,
    user: SyndicationUser,
    entities: SyndicationEntities,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SyndicationUser {
    id_str: String,
    name: String,
    screen_name: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SyndicationEntities {
    hashtags: Vec<SyndicationHashtag>,
    urls: Vec<SyndicationUrl>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SyndicationHashtag {
    text: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SyndicationUrl {
    expanded_url: String,
}

fn validate_post_id(post_id: &str) -> Result<u64, FetchError> {
    if post_id.is_empty() || !post_id.bytes().all(|byte| byte.is_ascii_digit()) {
        return Err(FetchError::InvalidArgument(format!(
            "post id must be numeric, got {post_id:?}"
        )));
    }
    post_id
        .parse::<u64>()
        .map_err(|error| FetchError::InvalidArgument(error.to_string()))
}

/// Map a syndication payload into a [`Post`].
fn decode_syndication_post(bytes: &[u8], post_id: &str) -> Result<Post, FetchError> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Err(FetchError::NotFound(post_id.to_string()));
    }
    let raw: SyndicationPost =
        serde_json::from_slice(bytes).map_err(|error| FetchError::Decode(error.to_string()))?;

    if raw.typename == "TweetTombstone" || raw.id_str.is_empty() {
        return Err(FetchError::NotFound(post_id.to_string()));
    }

    let timestamp = DateTime::parse_from_rfc3339(&raw.created_at)
        .map(|parsed| parsed.timestamp())
        .unwrap_or_default();
    let permanent_url = format!(
        "https://twitter.com/{}/status/{}",
        raw.user.screen_name, raw.id_str
    );
    let in_reply_to_status_id = raw.in_reply_to_status_id_str.unwrap_or_default();

    Ok(Post {
        conversation_id: raw.id_str.clone(),
        id: raw.id_str,
        user_id: raw.user.id_str,
        username: raw.user.screen_name,
        name: raw.user.name,
        text: raw.text,
        permanent_url,
        timestamp,
        time_parsed: raw.created_at,
        likes: raw.favorite_count,
        replies: raw.conversation_count,
        hashtags: raw
            .entities
            .hashtags
            .into_iter()
            .map(|hashtag| hashtag.text)
            .collect(),
        urls: raw
            .entities
            .urls
            .into_iter()
            .map(|url| url.expanded_url)
            .collect(),
        is_reply: !in_reply_to_status_id.is_empty(),
        in_reply_to_status_id,
        sensitive_content: raw.possibly_sensitive,
        ..Post::default()
    })
}

/// Token the endpoint expects: `(id / 1e15) * pi` in base 36 with zeros and the point removed.
#[expect(
    clippy::cast_precision_loss,
    reason = "the token is derived from the float value"
)]
fn syndication_token(post_id: u64) -> String {
    let value = (post_id as f64 / 1e15) * std::f64::consts::PI;
    to_base36(value).replace(['0', '.'], "")
}

fn to_base36(value: f64) -> String {
    let mut integer = value.trunc() as u64;
    let mut fraction = value.fract();

    let mut digits = Vec::new();
    loop {
        digits.push(char::from(BASE36_DIGITS[(integer % 36) as usize]));
        integer /= 36;
        if integer == 0 {
            break;
        }
    }
    let mut rendered: String = digits.into_iter().rev().collect();

    if fraction > 0.0 {
        rendered.push('.');
        for _ in 0..TOKEN_FRACTION_DIGITS {
            fraction *= 36.0;
            let digit = fraction.trunc() as usize;
            rendered.push(char::from(BASE36_DIGITS[digit.min(35)]));
            fraction -= fraction.trunc();
            if fraction <= 0.0 {
                break;
            }
        }
    }
    rendered
}

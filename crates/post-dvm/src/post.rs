//! Post record carried in job responses.
//!
//! Field names follow the scraper shape other DVMs of this kind already emit (`ID`, `Username`,
//! `Text`, ...). Missing fields decode to defaults and `null` collections decode as empty, so a
//! response from a differently configured responder still parses.

use crate::job::JobOutput;
use serde::{Deserialize, Deserializer, Serialize};

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Option::unwrap_or_default)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Post {
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "ConversationID")]
    pub conversation_id: String,
    #[serde(rename = "UserID")]
    pub user_id: String,
    #[serde(rename = "Username")]
    pub username: String,
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Text")]
    pub text: String,
    #[serde(rename = "PermanentURL")]
    pub permanent_url: String,
    /// Unix seconds.
    #[serde(rename = "Timestamp")]
    pub timestamp: i64,
    /// RFC 3339 creation time.
    #[serde(rename = "TimeParsed")]
    pub time_parsed: String,
    #[serde(rename = "Likes")]
    pub likes: u64,
    #[serde(rename = "Replies")]
    pub replies: u64,
    #[serde(rename = "Retweets")]
    pub reposts: u64,
    #[serde(rename = "Views")]
    pub views: u64,
    #[serde(rename = "Hashtags", deserialize_with = "null_as_default")]
    pub hashtags: Vec<String>,
    #[serde(rename = "URLs", deserialize_with = "null_as_default")]
    pub urls: Vec<String>,
    #[serde(rename = "InReplyToStatusID")]
    pub in_reply_to_status_id: String,
    #[serde(rename = "IsReply")]
    pub is_reply: bool,
    #[serde(rename = "IsRetweet")]
    pub is_repost: bool,
    #[serde(rename = "IsQuoted")]
    pub is_quoted: bool,
    #[serde(rename = "SensitiveContent")]
    pub sensitive_content: bool,
}

impl JobOutput for Post {
    fn is_well_formed(&self) -> bool {
        !self.text.trim().is_empty()
    }
}

use serde::Serialize;
use time::PrimitiveDateTime;

pub mod similarity;
pub mod timefmt;

pub use similarity::{rank_topics, token_set_ratio, ScoredRecord};
pub use timefmt::{
    days_since, format_display, format_storage, local_now, parse_timestamp, resolve_timestamp,
};

time::serde::format_description!(
    display_time,
    PrimitiveDateTime,
    "[year]-[month]-[day] [hour repr:12]:[minute]:[second] [period]"
);

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum FriendexError {
    #[error("invalid time format '{0}'; use 'YYYY-MM-DD HH:MM:SS AM/PM' or 'now'")]
    InvalidTime(String),
    #[error("Friend '{0}' not found.")]
    FriendNotFound(String),
    #[error("Friend '{0}' already exists.")]
    DuplicateFriend(String),
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct Friend {
    pub name: String,
    #[serde(with = "display_time::option")]
    pub last_spoken: Option<PrimitiveDateTime>,
}

/// One immutable entry in a friend's conversation log.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ConversationRecord {
    pub name: String,
    #[serde(rename = "last_spoken", with = "display_time")]
    pub spoken_at: PrimitiveDateTime,
    pub topic: Option<String>,
}

/// A friend enriched with its conversation log and elapsed days relative to `as_of`.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FriendSummary {
    #[serde(flatten)]
    pub friend: Friend,
    pub days_since_spoken: Option<i64>,
    pub records: Vec<ConversationRecord>,
}

impl FriendSummary {
    #[must_use]
    pub fn build(
        friend: Friend,
        records: Vec<ConversationRecord>,
        as_of: PrimitiveDateTime,
    ) -> Self {
        let days_since_spoken = friend.last_spoken.map(|then| days_since(then, as_of));
        Self { friend, days_since_spoken, records }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct TopicMatch {
    pub name: String,
    pub topic: Option<String>,
    pub score: u8,
    #[serde(with = "display_time::option")]
    pub last_spoken: Option<PrimitiveDateTime>,
}

/// Reject blank friend names before they reach storage.
///
/// # Errors
/// Returns [`FriendexError::Validation`] when the name is empty after trimming.
pub fn validate_name(name: &str) -> Result<(), FriendexError> {
    if name.trim().is_empty() {
        return Err(FriendexError::Validation("friend name MUST be non-empty".to_string()));
    }
    Ok(())
}

/// Collapse blank topics to `None` so storage never holds whitespace-only text.
#[must_use]
pub fn normalize_topic(topic: Option<&str>) -> Option<String> {
    topic.map(str::trim).filter(|value| !value.is_empty()).map(ToString::to_string)
}

//! Chat messages as shown in the conversation

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Id of the greeting inserted when a session starts fresh
pub const WELCOME_ID: &str = "welcome";

/// Canned reply appended when a query fails
pub const SEND_FAILURE_REPLY: &str =
    "I'm having trouble processing your request right now. Please try again in a moment.";

/// Reference attached to an assistant reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub description: String,
}

/// Thumbs up / thumbs down on a single assistant message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i8", try_from = "i8")]
pub enum Rating {
    Up,
    Down,
}

impl From<Rating> for i8 {
    fn from(rating: Rating) -> Self {
        match rating {
            Rating::Up => 1,
            Rating::Down => -1,
        }
    }
}

impl TryFrom<i8> for Rating {
    type Error = String;

    fn try_from(value: i8) -> Result<Self, Self::Error> {
        match value {
            1 => Ok(Rating::Up),
            -1 => Ok(Rating::Down),
            other => Err(format!("rating must be 1 or -1, got {}", other)),
        }
    }
}

/// One to five stars for a whole conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(into = "u8")]
pub struct SessionRating(u8);

impl SessionRating {
    pub fn new(stars: u8) -> crate::error::Result<Self> {
        if (1..=5).contains(&stars) {
            Ok(Self(stars))
        } else {
            Err(crate::error::ChatError::InvalidRating(stars))
        }
    }

    pub fn stars(self) -> u8 {
        self.0
    }

    pub fn would_recommend(self) -> bool {
        self.0 >= 4
    }
}

impl From<SessionRating> for u8 {
    fn from(rating: SessionRating) -> Self {
        rating.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(deserialize_with = "de_id")]
    pub id: String,
    pub content: String,
    pub is_from_user: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sources: Option<Vec<Source>>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none", deserialize_with = "de_rating")]
    pub rating: Option<Rating>,
    /// Written locally; the backend never issued this id
    #[serde(skip)]
    pub local: bool,
}

impl ChatMessage {
    pub fn user(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            is_from_user: true,
            sources: None,
            created_at: Utc::now(),
            rating: None,
            local: false,
        }
    }

    pub fn assistant(
        id: impl Into<String>,
        content: impl Into<String>,
        sources: Option<Vec<Source>>,
    ) -> Self {
        Self {
            id: id.into(),
            content: content.into(),
            is_from_user: false,
            sources,
            created_at: Utc::now(),
            rating: None,
            local: false,
        }
    }

    pub fn welcome(content: impl Into<String>) -> Self {
        Self::assistant(WELCOME_ID, content, None)
    }

    /// Assistant-side notice produced without a backend round trip
    pub fn local_notice(id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            local: true,
            ..Self::assistant(id, content, None)
        }
    }

    pub fn is_welcome(&self) -> bool {
        self.id == WELCOME_ID
    }

    /// Assistant replies the backend knows about accept thumbs feedback
    pub fn is_ratable(&self) -> bool {
        !self.is_from_user && !self.is_welcome() && !self.local
    }
}

/// Backend ids arrive either as JSON strings (UUIDs) or integers.
pub(crate) fn de_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum RawId {
        Text(String),
        Number(i64),
    }

    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Number(n) => n.to_string(),
    })
}

pub(crate) fn de_opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    struct Wrapper(#[serde(deserialize_with = "de_id")] String);

    Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|w| w.0))
}

/// Stored messages may carry 1..5 star ratings from older feedback; only
/// thumbs values map onto `Rating`.
fn de_rating<'de, D>(deserializer: D) -> Result<Option<Rating>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<i64>::deserialize(deserializer)?;
    Ok(raw
        .and_then(|v| i8::try_from(v).ok())
        .and_then(|v| Rating::try_from(v).ok()))
}

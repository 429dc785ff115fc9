use serde_json::{Map, Value, json};

use crate::message::Rating;
use crate::options::ChatConfig;

/// Free-form description of what the user was looking at when the chat opened
pub type ChatContext = Map<String, Value>;

/// What kind of page a context points at, as reported to analytics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextKind {
    Project,
    Gig,
    General,
}

impl ContextKind {
    pub fn of(context: &ChatContext) -> Self {
        let set = |key: &str| context.get(key).is_some_and(is_truthy);
        if set("project_id") {
            ContextKind::Project
        } else if set("gig_id") {
            ContextKind::Gig
        } else {
            ContextKind::General
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::Project => "project",
            ContextKind::Gig => "gig",
            ContextKind::General => "general",
        }
    }
}

/// Null, false, zero and empty strings do not count as a set id
fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Events emitted by the conversation manager for the analytics sink
#[derive(Debug, Clone, PartialEq)]
pub enum ChatEvent {
    /// A query was answered
    Query {
        query_length: usize,
        config: ChatConfig,
        context: ContextKind,
    },

    /// Thumbs feedback on a single reply was recorded
    MessageFeedback { message_id: String, rating: Rating },

    /// Star rating for the whole session was recorded
    SessionFeedback {
        session_id: String,
        rating: u8,
        message_count: usize,
    },

    /// The stored session was cleared on the backend
    SessionCleared {
        session_id: String,
        message_count: usize,
    },
}

impl ChatEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            ChatEvent::Query { .. } => "chat_query",
            ChatEvent::MessageFeedback { .. } => "chat_feedback",
            ChatEvent::SessionFeedback { .. } => "chat_session_feedback",
            ChatEvent::SessionCleared { .. } => "chat_session_cleared",
        }
    }

    pub fn metadata(&self) -> Value {
        match self {
            ChatEvent::Query {
                query_length,
                config,
                context,
            } => json!({
                "query_length": query_length,
                "audience": config.audience,
                "depth": config.depth,
                "tone": config.tone,
                "context_type": context.as_str(),
            }),
            ChatEvent::MessageFeedback { message_id, rating } => json!({
                "message_id": message_id,
                "rating": rating,
                "has_comment": false,
            }),
            ChatEvent::SessionFeedback {
                session_id,
                rating,
                message_count,
            } => json!({
                "session_id": session_id,
                "rating": rating,
                "message_count": message_count,
            }),
            ChatEvent::SessionCleared {
                session_id,
                message_count,
            } => json!({
                "session_id": session_id,
                "message_count": message_count,
            }),
        }
    }
}

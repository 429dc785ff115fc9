//! Conversation session manager for the portfolio AI assistant.
//!
//! [`ConversationManager`] owns one chat conversation: it greets or restores
//! history on open, sends queries, collects feedback and clears sessions,
//! talking to the backend through the [`ChatBackend`] trait. [`HttpChatBackend`]
//! implements that trait over the portfolio REST API and [`Repl`] drives a
//! manager from a terminal.

pub mod analytics;
pub mod api;
pub mod commands;
pub mod config;
pub mod error;
pub mod events;
pub mod manager;
pub mod message;
pub mod options;
pub mod repl;
pub mod session;

pub use analytics::{AnalyticsSink, HttpAnalytics, NoopAnalytics};
pub use api::{ApiClient, ChatBackend, HttpChatBackend};
pub use config::Config;
pub use error::{ChatError, Result};
pub use events::{ChatContext, ChatEvent};
pub use manager::{ClearOutcome, Confirm, ConversationManager, ManagerSettings, SendOutcome};
pub use message::{ChatMessage, Rating, SessionRating, Source};
pub use options::{Audience, ChatConfig, Depth, Tone};
pub use repl::Repl;
pub use session::{ConversationSession, Phase, PromptState, Viewer};

use chrono::Utc;

use crate::api::StoredSession;
use crate::error::{ChatError, Result};
use crate::events::ChatContext;
use crate::message::{ChatMessage, Rating, SEND_FAILURE_REPLY, Source};
use crate::options::ChatConfig;

/// Who is looking at the chat
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Viewer {
    #[default]
    Anonymous,
    Authenticated { user_id: String },
}

impl Viewer {
    pub fn authenticated(user_id: impl Into<String>) -> Self {
        Viewer::Authenticated {
            user_id: user_id.into(),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        matches!(self, Viewer::Anonymous)
    }

    pub fn user_id(&self) -> Option<&str> {
        match self {
            Viewer::Anonymous => None,
            Viewer::Authenticated { user_id } => Some(user_id),
        }
    }
}

/// How a ready session came to be
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// Started from the welcome message
    Fresh,
    /// Adopted from the backend's stored history
    Restored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Uninitialized,
    LoadingHistory,
    Ready(Origin),
}

/// One-time prompt lifecycle. `Done` is terminal until the session is
/// reinitialized.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PromptState {
    #[default]
    Hidden,
    Showing,
    Done,
}

impl PromptState {
    fn raise(&mut self) -> bool {
        if *self == PromptState::Hidden {
            *self = PromptState::Showing;
            true
        } else {
            false
        }
    }
}

/// Message counts at which the one-time prompts appear
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PromptThresholds {
    pub save: usize,
    pub feedback: usize,
}

impl Default for PromptThresholds {
    fn default() -> Self {
        Self {
            save: 5,
            feedback: 11,
        }
    }
}

/// Conversation state for one chat surface
#[derive(Debug, Clone)]
pub struct ConversationSession {
    session_id: Option<String>,
    messages: Vec<ChatMessage>,
    config: ChatConfig,
    context: ChatContext,
    phase: Phase,
    is_open: bool,
    save_prompt: PromptState,
    feedback_prompt: PromptState,
    /// Bumped on every reinitialization so late replies can be recognized
    epoch: u64,
    last_client_id: i64,
}

impl ConversationSession {
    pub fn new(config: ChatConfig) -> Self {
        Self {
            session_id: None,
            messages: Vec::new(),
            config,
            context: ChatContext::new(),
            phase: Phase::Uninitialized,
            is_open: false,
            save_prompt: PromptState::Hidden,
            feedback_prompt: PromptState::Hidden,
            epoch: 0,
            last_client_id: 0,
        }
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn config(&self) -> ChatConfig {
        self.config
    }

    pub fn config_mut(&mut self) -> &mut ChatConfig {
        &mut self.config
    }

    pub fn context(&self) -> &ChatContext {
        &self.context
    }

    /// Replace the context wholesale
    pub fn set_context(&mut self, context: ChatContext) {
        self.context = context;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_open(&self) -> bool {
        self.is_open
    }

    pub fn set_open(&mut self, open: bool) {
        self.is_open = open;
    }

    pub fn save_prompt(&self) -> PromptState {
        self.save_prompt
    }

    pub fn feedback_prompt(&self) -> PromptState {
        self.feedback_prompt
    }

    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Initialization runs when nothing is loaded and no fetch is pending
    pub fn needs_init(&self) -> bool {
        self.messages.is_empty() && self.phase != Phase::LoadingHistory
    }

    pub fn begin_loading(&mut self) {
        self.phase = Phase::LoadingHistory;
    }

    /// Drop everything but config and context, then greet
    pub fn start_fresh(&mut self, welcome: &str) {
        self.reinitialize();
        self.messages.push(ChatMessage::welcome(welcome));
        self.phase = Phase::Ready(Origin::Fresh);
    }

    /// Adopt a stored session verbatim
    pub fn restore(&mut self, stored: StoredSession) {
        self.reinitialize();
        self.session_id = Some(stored.id);
        self.messages = stored.messages;
        self.phase = Phase::Ready(Origin::Restored);
    }

    /// Forget the conversation and its context (sign-out)
    pub fn reset(&mut self) {
        self.reinitialize();
        self.context = ChatContext::new();
        self.phase = Phase::Uninitialized;
    }

    fn reinitialize(&mut self) {
        self.session_id = None;
        self.messages.clear();
        self.save_prompt = PromptState::Hidden;
        self.feedback_prompt = PromptState::Hidden;
        self.epoch += 1;
    }

    /// Millisecond timestamp id, bumped when two messages land in the same ms
    fn next_client_id(&mut self) -> String {
        let now = Utc::now().timestamp_millis();
        let id = now.max(self.last_client_id + 1);
        self.last_client_id = id;
        id.to_string()
    }

    pub fn push_user(&mut self, text: &str) -> String {
        let id = self.next_client_id();
        self.messages.push(ChatMessage::user(id.clone(), text));
        id
    }

    pub fn push_reply(&mut self, id: String, content: String, sources: Vec<Source>) {
        self.messages
            .push(ChatMessage::assistant(id, content, Some(sources)));
    }

    pub fn push_failure_reply(&mut self) {
        let id = self.next_client_id();
        self.messages
            .push(ChatMessage::local_notice(id, SEND_FAILURE_REPLY));
    }

    /// Adopt the backend's session id unless one is already bound
    pub fn bind_session(&mut self, session_id: Option<String>) -> bool {
        match (&self.session_id, session_id) {
            (None, Some(id)) => {
                self.session_id = Some(id);
                true
            }
            _ => false,
        }
    }

    pub fn check_ratable(&self, message_id: &str) -> Result<()> {
        let message = self
            .messages
            .iter()
            .find(|m| m.id == message_id)
            .ok_or_else(|| ChatError::UnknownMessage(message_id.to_string()))?;
        if !message.is_ratable() {
            return Err(ChatError::NotRatable(message_id.to_string()));
        }
        Ok(())
    }

    pub fn set_rating(&mut self, message_id: &str, rating: Rating) -> Result<()> {
        self.check_ratable(message_id)?;
        if let Some(message) = self.messages.iter_mut().find(|m| m.id == message_id) {
            message.rating = Some(rating);
        }
        Ok(())
    }

    /// Raise the one-time prompts once `count` messages have been reached
    pub fn evaluate_prompts(
        &mut self,
        count: usize,
        anonymous: bool,
        thresholds: PromptThresholds,
    ) {
        if anonymous && count >= thresholds.save {
            self.save_prompt.raise();
        }
        if count >= thresholds.feedback {
            self.feedback_prompt.raise();
        }
    }

    pub fn dismiss_save_prompt(&mut self) {
        self.save_prompt = PromptState::Done;
    }

    pub fn finish_feedback_prompt(&mut self) {
        self.feedback_prompt = PromptState::Done;
    }

    /// Only a bound session with something beyond the greeting can be cleared
    pub fn can_clear(&self) -> bool {
        self.session_id.is_some() && self.messages.len() > 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::WELCOME_ID;

    fn fresh() -> ConversationSession {
        let mut session = ConversationSession::new(ChatConfig::default());
        session.start_fresh("Hi!");
        session
    }

    #[test]
    fn test_fresh_session_starts_with_welcome() {
        let session = fresh();
        assert_eq!(session.len(), 1);
        assert_eq!(session.messages()[0].id, WELCOME_ID);
        assert_eq!(session.phase(), Phase::Ready(Origin::Fresh));
        assert_eq!(session.session_id(), None);
        assert!(!session.needs_init());
    }

    #[test]
    fn test_restore_adopts_messages_verbatim() {
        let mut session = ConversationSession::new(ChatConfig::default());
        session.restore(StoredSession {
            id: "s-1".into(),
            user: Some("17".into()),
            messages: vec![
                ChatMessage::user("1", "hi"),
                ChatMessage::assistant("a-1", "hello", None),
            ],
        });
        assert_eq!(session.session_id(), Some("s-1"));
        assert_eq!(session.len(), 2);
        assert!(!session.messages()[0].is_welcome());
        assert_eq!(session.phase(), Phase::Ready(Origin::Restored));
    }

    #[test]
    fn test_client_ids_are_unique() {
        let mut session = fresh();
        let first = session.push_user("one");
        let second = session.push_user("two");
        session.push_failure_reply();
        let third = &session.messages()[3].id;
        assert_ne!(first, second);
        assert_ne!(&second, third);
        assert!(second.parse::<i64>().unwrap() > first.parse::<i64>().unwrap());
    }

    #[test]
    fn test_canned_reply_is_not_ratable() {
        let mut session = fresh();
        session.push_user("hello");
        session.push_failure_reply();
        let id = session.messages()[2].id.clone();
        assert!(matches!(
            session.check_ratable(&id),
            Err(ChatError::NotRatable(_))
        ));
    }

    #[test]
    fn test_bind_session_only_once() {
        let mut session = fresh();
        assert!(!session.bind_session(None));
        assert!(session.bind_session(Some("s-1".into())));
        assert!(!session.bind_session(Some("s-2".into())));
        assert_eq!(session.session_id(), Some("s-1"));
    }

    #[test]
    fn test_rating_overwrites() {
        let mut session = fresh();
        session.push_reply("a-1".into(), "answer".into(), Vec::new());
        session.set_rating("a-1", Rating::Up).unwrap();
        session.set_rating("a-1", Rating::Down).unwrap();
        assert_eq!(session.messages()[1].rating, Some(Rating::Down));
    }

    #[test]
    fn test_welcome_and_user_messages_are_not_ratable() {
        let mut session = fresh();
        let user_id = session.push_user("hello");
        assert!(matches!(
            session.set_rating(WELCOME_ID, Rating::Up),
            Err(ChatError::NotRatable(_))
        ));
        assert!(matches!(
            session.check_ratable(&user_id),
            Err(ChatError::NotRatable(_))
        ));
        assert!(matches!(
            session.check_ratable("missing"),
            Err(ChatError::UnknownMessage(_))
        ));
    }

    #[test]
    fn test_prompts_raise_once() {
        let mut session = fresh();
        let thresholds = PromptThresholds::default();

        session.evaluate_prompts(4, true, thresholds);
        assert_eq!(session.save_prompt(), PromptState::Hidden);

        session.evaluate_prompts(5, true, thresholds);
        assert_eq!(session.save_prompt(), PromptState::Showing);

        session.dismiss_save_prompt();
        session.evaluate_prompts(7, true, thresholds);
        assert_eq!(session.save_prompt(), PromptState::Done);

        session.evaluate_prompts(11, false, thresholds);
        assert_eq!(session.feedback_prompt(), PromptState::Showing);
        session.finish_feedback_prompt();
        session.evaluate_prompts(12, false, thresholds);
        assert_eq!(session.feedback_prompt(), PromptState::Done);
    }

    #[test]
    fn test_save_prompt_is_for_anonymous_viewers_only() {
        let mut session = fresh();
        session.evaluate_prompts(9, false, PromptThresholds::default());
        assert_eq!(session.save_prompt(), PromptState::Hidden);
    }

    #[test]
    fn test_reinitialization_resets_prompts_and_keeps_config() {
        let mut session = fresh();
        session.config_mut().depth = crate::options::Depth::Long;
        session.bind_session(Some("s-1".into()));
        session.evaluate_prompts(11, true, PromptThresholds::default());
        let epoch = session.epoch();

        session.start_fresh("Hi again!");
        assert_eq!(session.save_prompt(), PromptState::Hidden);
        assert_eq!(session.feedback_prompt(), PromptState::Hidden);
        assert_eq!(session.session_id(), None);
        assert_eq!(session.config().depth, crate::options::Depth::Long);
        assert!(session.epoch() > epoch);
    }

    #[test]
    fn test_reset_drops_context() {
        let mut session = fresh();
        let mut context = ChatContext::new();
        context.insert("page".into(), serde_json::json!("resume"));
        session.set_context(context);

        session.reset();
        assert!(session.context().is_empty());
        assert!(session.is_empty());
        assert_eq!(session.phase(), Phase::Uninitialized);
        assert!(session.needs_init());
    }

    #[test]
    fn test_can_clear() {
        let mut session = fresh();
        assert!(!session.can_clear());
        session.push_user("hi");
        assert!(!session.can_clear());
        session.bind_session(Some("s-1".into()));
        assert!(session.can_clear());
    }
}

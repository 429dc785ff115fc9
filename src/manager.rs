use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::analytics::AnalyticsSink;
use crate::api::{ChatBackend, MessageFeedback, QueryRequest, SessionFeedback};
use crate::config::Config;
use crate::error::{ChatError, Result};
use crate::events::{ChatContext, ChatEvent, ContextKind};
use crate::message::{ChatMessage, Rating, SessionRating};
use crate::options::{Audience, ChatConfig, Depth, Tone};
use crate::session::{ConversationSession, Phase, PromptState, PromptThresholds, Viewer};

pub const CLEAR_CONFIRMATION: &str =
    "Are you sure you want to clear your chat history? This action cannot be undone.";

/// Asks the person at the keyboard to confirm a destructive action
#[async_trait]
pub trait Confirm: Send + Sync {
    async fn confirm(&self, prompt: &str) -> bool;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Blank input, a send already in flight or a chat that is not ready yet;
    /// nothing happened
    Ignored,
    /// The assistant answered
    Answered,
    /// The canned apology was appended
    Failed,
    /// The session was reinitialized while the query was in flight
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClearOutcome {
    /// Nothing worth clearing; no confirmation asked
    Skipped,
    Declined,
    Cleared,
    /// The backend call failed but the local session was reset anyway
    ClearedLocally,
}

#[derive(Debug, Clone)]
pub struct ManagerSettings {
    pub welcome_message: String,
    pub thresholds: PromptThresholds,
    pub request_timeout: Duration,
    pub defaults: ChatConfig,
}

impl ManagerSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            welcome_message: config.welcome_message.clone(),
            thresholds: PromptThresholds {
                save: config.save_prompt_threshold,
                feedback: config.feedback_prompt_threshold,
            },
            request_timeout: config.request_timeout(),
            defaults: config.defaults,
        }
    }
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

struct State {
    viewer: Viewer,
    session: ConversationSession,
}

/// Clears the in-flight flag however the send ends, cancellation included
struct SendingGuard<'a>(&'a AtomicBool);

impl<'a> SendingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Owns a conversation and drives every backend call it needs.
///
/// Hold it in an `Arc` and hand it to whatever hosts the chat. State lives
/// behind a mutex that is never held across a backend call, so the host stays
/// responsive while a query is pending.
pub struct ConversationManager {
    backend: Arc<dyn ChatBackend>,
    analytics: Arc<dyn AnalyticsSink>,
    settings: ManagerSettings,
    sending: AtomicBool,
    state: Mutex<State>,
}

impl ConversationManager {
    pub fn new(
        backend: Arc<dyn ChatBackend>,
        analytics: Arc<dyn AnalyticsSink>,
        settings: ManagerSettings,
        viewer: Viewer,
    ) -> Self {
        let session = ConversationSession::new(settings.defaults);
        Self {
            backend,
            analytics,
            settings,
            sending: AtomicBool::new(false),
            state: Mutex::new(State { viewer, session }),
        }
    }

    /// Make the chat visible, loading or greeting on first open
    pub async fn open(&self) {
        let (user_id, epoch) = {
            let mut state = self.state.lock().await;
            state.session.set_open(true);
            if !state.session.needs_init() {
                return;
            }

            match state.viewer.user_id().map(str::to_string) {
                None => {
                    state.session.start_fresh(&self.settings.welcome_message);
                    debug!("started fresh session for anonymous viewer");
                    return;
                }
                Some(user_id) => {
                    state.session.begin_loading();
                    (user_id, state.session.epoch())
                }
            }
        };

        let fetched = self.bounded(self.backend.history(&user_id)).await;

        let mut state = self.state.lock().await;
        if state.session.phase() != Phase::LoadingHistory || state.session.epoch() != epoch {
            debug!("viewer changed while history was loading, ignoring result");
            return;
        }

        match fetched {
            Ok(sessions) => match sessions.into_iter().next() {
                Some(latest) if latest.is_owned_by(&user_id) && !latest.messages.is_empty() => {
                    info!(
                        session_id = %latest.id,
                        messages = latest.messages.len(),
                        "restored chat session"
                    );
                    state.session.restore(latest);
                }
                Some(latest) => {
                    if !latest.is_owned_by(&user_id) {
                        warn!(
                            session_id = %latest.id,
                            "stored session belongs to another user, discarding"
                        );
                    }
                    state.session.start_fresh(&self.settings.welcome_message);
                }
                None => state.session.start_fresh(&self.settings.welcome_message),
            },
            Err(e) => {
                warn!(error = %e, "failed to load chat history");
                state.session.start_fresh(&self.settings.welcome_message);
            }
        }
    }

    /// Hide the chat; the conversation is kept
    pub async fn close(&self) {
        self.state.lock().await.session.set_open(false);
    }

    pub async fn send_message(&self, text: &str) -> SendOutcome {
        let query = text.trim();
        if query.is_empty() {
            return SendOutcome::Ignored;
        }

        let Some(_sending) = SendingGuard::acquire(&self.sending) else {
            debug!("send already in flight, ignoring");
            return SendOutcome::Ignored;
        };

        let (request, count, anonymous, epoch) = {
            let mut state = self.state.lock().await;
            if !matches!(state.session.phase(), Phase::Ready(_)) {
                // history may still replace the conversation wholesale
                debug!(phase = ?state.session.phase(), "chat not ready, ignoring send");
                return SendOutcome::Ignored;
            }
            state.session.push_user(query);
            let request = QueryRequest {
                query: query.to_string(),
                session_id: state.session.session_id().map(str::to_string),
                context: state.session.context().clone(),
                config: state.session.config(),
            };
            (
                request,
                state.session.len(),
                state.viewer.is_anonymous(),
                state.session.epoch(),
            )
        };

        let result = self.bounded(self.backend.query(&request)).await;

        let mut state = self.state.lock().await;
        if state.session.epoch() != epoch {
            debug!("session was reset while the query was in flight, dropping reply");
            return SendOutcome::Stale;
        }

        match result {
            Ok(response) => {
                state
                    .session
                    .push_reply(response.message_id, response.response, response.sources);
                if state.session.bind_session(response.session_id) {
                    info!(session_id = ?state.session.session_id(), "bound chat session");
                }
                state
                    .session
                    .evaluate_prompts(count, anonymous, self.settings.thresholds);

                self.analytics.track(ChatEvent::Query {
                    query_length: query.chars().count(),
                    config: request.config,
                    context: ContextKind::of(&request.context),
                });
                SendOutcome::Answered
            }
            Err(e) => {
                warn!(error = %e, "failed to send chat query");
                state.session.push_failure_reply();
                SendOutcome::Failed
            }
        }
    }

    /// Thumbs feedback on an assistant reply.
    ///
    /// Errors only when the target cannot be rated. Delivery failures are
    /// logged and leave the local rating untouched.
    pub async fn rate_message(&self, message_id: &str, rating: Rating) -> Result<()> {
        self.state.lock().await.session.check_ratable(message_id)?;

        let feedback = MessageFeedback {
            message_id: message_id.to_string(),
            rating,
        };
        if let Err(e) = self.bounded(self.backend.message_feedback(&feedback)).await {
            warn!(message_id, error = %e, "failed to send message feedback");
            return Ok(());
        }

        let mut state = self.state.lock().await;
        if let Err(e) = state.session.set_rating(message_id, rating) {
            debug!(message_id, error = %e, "rated message no longer in session");
        }
        self.analytics.track(ChatEvent::MessageFeedback {
            message_id: feedback.message_id,
            rating,
        });
        Ok(())
    }

    /// One to five stars for the whole conversation, accepted only while the
    /// feedback prompt is showing. Closes the prompt whether or not delivery
    /// succeeds.
    pub async fn submit_session_feedback(&self, stars: u8) -> Result<()> {
        let rating = SessionRating::new(stars)?;

        let (session_id, message_count) = {
            let mut state = self.state.lock().await;
            let session_id = state
                .session
                .session_id()
                .map(str::to_string)
                .ok_or(ChatError::NoSession)?;
            if state.session.feedback_prompt() != PromptState::Showing {
                return Err(ChatError::FeedbackNotOffered);
            }
            state.session.finish_feedback_prompt();
            (session_id, state.session.len())
        };

        let feedback = SessionFeedback::from_rating(session_id.clone(), rating);
        match self.bounded(self.backend.session_feedback(&feedback)).await {
            Ok(()) => self.analytics.track(ChatEvent::SessionFeedback {
                session_id,
                rating: rating.stars(),
                message_count,
            }),
            Err(e) => warn!(%session_id, error = %e, "failed to send session feedback"),
        }
        Ok(())
    }

    /// "Later" on the register nudge
    pub async fn dismiss_save_prompt(&self) {
        self.state.lock().await.session.dismiss_save_prompt();
    }

    /// Clear the conversation after confirmation.
    ///
    /// The local session is reset even if the backend call fails.
    pub async fn clear_session(&self, confirm: &dyn Confirm) -> ClearOutcome {
        let (session_id, message_count) = {
            let state = self.state.lock().await;
            if !state.session.can_clear() {
                return ClearOutcome::Skipped;
            }
            (
                state.session.session_id().map(str::to_string).unwrap_or_default(),
                state.session.len(),
            )
        };

        if !confirm.confirm(CLEAR_CONFIRMATION).await {
            return ClearOutcome::Declined;
        }

        let result = self.bounded(self.backend.clear_session(&session_id)).await;

        self.state
            .lock()
            .await
            .session
            .start_fresh(&self.settings.welcome_message);

        match result {
            Ok(()) => {
                info!(%session_id, "cleared chat session");
                self.analytics.track(ChatEvent::SessionCleared {
                    session_id,
                    message_count,
                });
                ClearOutcome::Cleared
            }
            Err(e) => {
                warn!(%session_id, error = %e, "failed to clear chat session on backend");
                ClearOutcome::ClearedLocally
            }
        }
    }

    pub async fn set_audience(&self, audience: Audience) {
        self.state.lock().await.session.config_mut().audience = audience;
    }

    pub async fn set_depth(&self, depth: Depth) {
        self.state.lock().await.session.config_mut().depth = depth;
    }

    pub async fn set_tone(&self, tone: Tone) {
        self.state.lock().await.session.config_mut().tone = tone;
    }

    /// Tag the conversation with what the user is looking at. Replaces any
    /// previous context.
    pub async fn set_context(&self, context: ChatContext) {
        self.state.lock().await.session.set_context(context);
    }

    /// Switch to a signed-in viewer. Local state is dropped so the next
    /// `open` reconciles against that user's stored history.
    pub async fn sign_in(&self, user_id: impl Into<String>) {
        let mut state = self.state.lock().await;
        state.viewer = Viewer::authenticated(user_id);
        let was_open = state.session.is_open();
        state.session.reset();
        state.session.set_open(was_open);
    }

    /// Switch to an anonymous viewer, dropping history and context
    pub async fn sign_out(&self) {
        let mut state = self.state.lock().await;
        state.viewer = Viewer::Anonymous;
        let was_open = state.session.is_open();
        state.session.reset();
        state.session.set_open(was_open);
    }

    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::Acquire)
    }

    pub async fn viewer(&self) -> Viewer {
        self.state.lock().await.viewer.clone()
    }

    /// Copy of the current conversation state
    pub async fn snapshot(&self) -> ConversationSession {
        self.state.lock().await.session.clone()
    }

    pub async fn messages(&self) -> Vec<ChatMessage> {
        self.state.lock().await.session.messages().to_vec()
    }

    pub async fn session_id(&self) -> Option<String> {
        self.state.lock().await.session.session_id().map(str::to_string)
    }

    pub async fn config(&self) -> ChatConfig {
        self.state.lock().await.session.config()
    }

    pub async fn prompts(&self) -> (PromptState, PromptState) {
        let state = self.state.lock().await;
        (state.session.save_prompt(), state.session.feedback_prompt())
    }

    async fn bounded<T>(&self, call: impl Future<Output = Result<T>>) -> Result<T> {
        let limit = self.settings.request_timeout;
        tokio::time::timeout(limit, call)
            .await
            .unwrap_or(Err(ChatError::Timeout(limit.as_secs())))
    }
}

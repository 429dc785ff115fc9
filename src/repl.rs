//! Line-oriented chat front end.
//!
//! Reads lines from any async reader, sends plain text to the assistant and
//! dispatches slash commands. Output goes to any writer so the whole loop can
//! be driven from a script.

use anyhow::Result;
use async_trait::async_trait;
use std::io::Write;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::Mutex;
use tracing::debug;

use crate::commands::{ParsedCommand, SlashCommand, get_help_text, parse_slash_command};
use crate::error::ChatError;
use crate::events::ChatContext;
use crate::manager::{ClearOutcome, Confirm, ConversationManager, SendOutcome};
use crate::message::{ChatMessage, Rating};
use crate::options::{Audience, Depth, Tone, choices};
use crate::session::PromptState;

const DEFAULT_WIDTH: usize = 80;

const SAVE_PROMPT: &str =
    "Create a free account to save your chat history and pick up where you left off. (/later to dismiss)";
const FEEDBACK_PROMPT: &str = "How was this conversation? Rate it with /rate <1-5>.";

/// Actions the loop takes after handling a line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplAction {
    Continue,
    Exit,
}

pub struct Repl<R, W> {
    manager: Arc<ConversationManager>,
    input: Mutex<R>,
    output: Mutex<W>,
    width: usize,
    /// Messages already written out
    shown: usize,
    save_announced: bool,
    feedback_announced: bool,
}

impl<R, W> Repl<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: Write + Send,
{
    pub fn new(manager: Arc<ConversationManager>, input: R, output: W) -> Self {
        Self {
            manager,
            input: Mutex::new(input),
            output: Mutex::new(output),
            width: DEFAULT_WIDTH,
            shown: 0,
            save_announced: false,
            feedback_announced: false,
        }
    }

    pub fn with_width(mut self, width: usize) -> Self {
        self.width = width;
        self
    }

    pub fn into_output(self) -> W {
        self.output.into_inner()
    }

    /// Run until `/bye` or end of input
    pub async fn run(&mut self) -> Result<()> {
        self.manager.open().await;
        self.render_new().await?;

        loop {
            self.write_prompt().await?;
            let Some(line) = self.read_line().await? else {
                debug!("input closed, leaving chat");
                break;
            };
            if self.handle_line(&line).await? == ReplAction::Exit {
                break;
            }
        }

        self.manager.close().await;
        Ok(())
    }

    pub async fn handle_line(&mut self, line: &str) -> Result<ReplAction> {
        if let Some(command) = parse_slash_command(line) {
            return self.handle_slash_command(command).await;
        }

        if line.trim().starts_with('/') {
            self.say("Unknown command. Type /help to see what is available.")
                .await?;
            return Ok(ReplAction::Continue);
        }

        match self.manager.send_message(line).await {
            SendOutcome::Ignored | SendOutcome::Stale => {}
            SendOutcome::Answered | SendOutcome::Failed => self.render_new().await?,
        }
        self.render_prompts().await?;
        Ok(ReplAction::Continue)
    }

    async fn handle_slash_command(&mut self, command: ParsedCommand) -> Result<ReplAction> {
        match command.command {
            SlashCommand::Audience => {
                match command.argument().map(Audience::parse) {
                    Some(Ok(audience)) => {
                        self.manager.set_audience(audience).await;
                        self.say(&format!("Audience set to {} ({}).", audience, audience.description()))
                            .await?;
                    }
                    Some(Err(e)) => self.say(&e.to_string()).await?,
                    None => {
                        let current = self.manager.config().await.audience;
                        self.say(&format!("Audience is {}. Choices: {}", current, choices::<Audience>()))
                            .await?;
                    }
                }
            }
            SlashCommand::Depth => {
                match command.argument().map(Depth::parse) {
                    Some(Ok(depth)) => {
                        self.manager.set_depth(depth).await;
                        self.say(&format!("Depth set to {}.", depth)).await?;
                    }
                    Some(Err(e)) => self.say(&e.to_string()).await?,
                    None => {
                        let current = self.manager.config().await.depth;
                        self.say(&format!("Depth is {}. Choices: {}", current, choices::<Depth>()))
                            .await?;
                    }
                }
            }
            SlashCommand::Tone => {
                match command.argument().map(Tone::parse) {
                    Some(Ok(tone)) => {
                        self.manager.set_tone(tone).await;
                        self.say(&format!("Tone set to {}.", tone)).await?;
                    }
                    Some(Err(e)) => self.say(&e.to_string()).await?,
                    None => {
                        let current = self.manager.config().await.tone;
                        self.say(&format!("Tone is {}. Choices: {}", current, choices::<Tone>()))
                            .await?;
                    }
                }
            }
            SlashCommand::Context => match command.argument() {
                None => {
                    self.manager.set_context(ChatContext::new()).await;
                    self.say("Context cleared.").await?;
                }
                Some(raw) => match serde_json::from_str::<ChatContext>(raw) {
                    Ok(context) => {
                        self.manager.set_context(context).await;
                        self.say("Context updated.").await?;
                    }
                    Err(e) => self.say(&format!("Context must be a JSON object: {}", e)).await?,
                },
            },
            SlashCommand::Up => self.rate(command.argument(), Rating::Up).await?,
            SlashCommand::Down => self.rate(command.argument(), Rating::Down).await?,
            SlashCommand::Rate => {
                let stars = command.argument().and_then(|s| s.trim().parse::<u8>().ok());
                match stars {
                    None => self.say("Usage: /rate <1-5>").await?,
                    Some(stars) => match self.manager.submit_session_feedback(stars).await {
                        Ok(()) => {
                            self.feedback_announced = true;
                            self.say("Thank you for your feedback!").await?;
                        }
                        Err(ChatError::NoSession) => {
                            self.say("There is no saved conversation to rate yet.").await?
                        }
                        Err(ChatError::FeedbackNotOffered) => {
                            self.say("Keep chatting a little longer before rating the conversation.")
                                .await?
                        }
                        Err(e) => self.say(&e.to_string()).await?,
                    },
                }
            }
            SlashCommand::Later => {
                self.manager.dismiss_save_prompt().await;
                self.say("Okay, maybe later.").await?;
            }
            SlashCommand::Clear => {
                let outcome = self.manager.clear_session(&*self).await;
                match outcome {
                    ClearOutcome::Skipped => self.say("Nothing to clear yet.").await?,
                    ClearOutcome::Declined => {}
                    ClearOutcome::Cleared | ClearOutcome::ClearedLocally => {
                        if outcome == ClearOutcome::ClearedLocally {
                            self.say("Couldn't clear the saved history, starting over locally.")
                                .await?;
                        }
                        self.shown = 0;
                        self.save_announced = false;
                        self.feedback_announced = false;
                        self.render_new().await?;
                    }
                }
            }
            SlashCommand::Settings => {
                let settings = self.settings_text().await;
                self.say(&settings).await?;
            }
            SlashCommand::Help => self.say(&get_help_text()).await?,
            SlashCommand::Bye => {
                self.say("Bye!").await?;
                return Ok(ReplAction::Exit);
            }
        }

        Ok(ReplAction::Continue)
    }

    async fn rate(&mut self, id: Option<&str>, rating: Rating) -> Result<()> {
        let target = match id {
            Some(id) => Some(id.to_string()),
            None => self
                .manager
                .messages()
                .await
                .iter()
                .rev()
                .find(|m| m.is_ratable())
                .map(|m| m.id.clone()),
        };

        let Some(target) = target else {
            return self.say("There is no reply to rate yet.").await;
        };

        match self.manager.rate_message(&target, rating).await {
            Ok(()) => self.say("Thanks for the feedback!").await,
            Err(e) => self.say(&e.to_string()).await,
        }
    }

    async fn settings_text(&self) -> String {
        let config = self.manager.config().await;
        let viewer = self.manager.viewer().await;
        let snapshot = self.manager.snapshot().await;

        let mut text = String::from("Chat settings:\n");
        text.push_str(&format!("  audience: {}\n", config.audience));
        text.push_str(&format!("  depth:    {}\n", config.depth));
        text.push_str(&format!("  tone:     {}\n", config.tone));
        text.push_str(&format!(
            "  user:     {}\n",
            viewer.user_id().unwrap_or("anonymous")
        ));
        text.push_str(&format!(
            "  session:  {}\n",
            snapshot.session_id().unwrap_or("not saved yet")
        ));
        if !snapshot.context().is_empty() {
            let context = serde_json::Value::Object(snapshot.context().clone());
            text.push_str(&format!("  context:  {}\n", context));
        }
        text.push_str(&format!("  messages: {}", snapshot.len()));
        text
    }

    /// Write out messages that appeared since the last render
    async fn render_new(&mut self) -> Result<()> {
        let messages = self.manager.messages().await;
        if messages.len() < self.shown {
            self.shown = 0;
        }

        let mut out = self.output.lock().await;
        for message in &messages[self.shown..] {
            if message.is_from_user && self.shown > 0 {
                // the user's own line is already on screen
                continue;
            }
            writeln!(out, "{}", render_message(message, self.width))?;
        }
        out.flush()?;
        self.shown = messages.len();
        Ok(())
    }

    async fn render_prompts(&mut self) -> Result<()> {
        let (save, feedback) = self.manager.prompts().await;

        if save == PromptState::Showing && !self.save_announced {
            self.save_announced = true;
            self.say(SAVE_PROMPT).await?;
        }
        if feedback == PromptState::Showing && !self.feedback_announced {
            self.feedback_announced = true;
            self.say(FEEDBACK_PROMPT).await?;
        }
        Ok(())
    }

    async fn write_prompt(&self) -> Result<()> {
        let mut out = self.output.lock().await;
        write!(out, "> ")?;
        out.flush()?;
        Ok(())
    }

    async fn read_line(&self) -> Result<Option<String>> {
        let mut line = String::new();
        let read = self.input.lock().await.read_line(&mut line).await?;
        if read == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }

    async fn say(&self, text: &str) -> Result<()> {
        let mut out = self.output.lock().await;
        writeln!(out, "{}", text)?;
        out.flush()?;
        Ok(())
    }
}

#[async_trait]
impl<R, W> Confirm for Repl<R, W>
where
    R: AsyncBufRead + Unpin + Send,
    W: Write + Send,
{
    async fn confirm(&self, prompt: &str) -> bool {
        {
            let mut out = self.output.lock().await;
            if write!(out, "{} [y/N] ", prompt).and_then(|_| out.flush()).is_err() {
                return false;
            }
        }

        match self.read_line().await {
            Ok(Some(answer)) => matches!(answer.trim().to_lowercase().as_str(), "y" | "yes"),
            _ => false,
        }
    }
}

/// Format one message for the terminal
pub fn render_message(message: &ChatMessage, width: usize) -> String {
    let who = if message.is_from_user { "you" } else { "assistant" };
    let mut header = format!("{} {}", who, message.created_at.format("%H:%M"));
    if message.is_ratable() {
        header.push_str(&format!(" [{}]", message.id));
    }
    match message.rating {
        Some(Rating::Up) => header.push_str(" +1"),
        Some(Rating::Down) => header.push_str(" -1"),
        None => {}
    }

    let mut lines = vec![header];
    for paragraph in message.content.lines() {
        for line in wrap_text(paragraph, width.saturating_sub(2)) {
            lines.push(format!("  {}", line));
        }
    }

    if let Some(sources) = message.sources.as_ref().filter(|s| !s.is_empty()) {
        lines.push("  Sources:".to_string());
        for source in sources {
            if source.url.is_empty() {
                lines.push(format!("  - {}", source.title));
            } else {
                lines.push(format!("  - {} ({})", source.title, source.url));
            }
        }
    }

    lines.join("\n")
}

/// Wrap text to fit within the given width
pub fn wrap_text(text: &str, width: usize) -> Vec<String> {
    if width == 0 {
        return vec![text.to_string()];
    }

    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let needed = if current.is_empty() { 0 } else { 1 };
        if current.chars().count() + word.chars().count() + needed <= width {
            if !current.is_empty() {
                current.push(' ');
            }
            current.push_str(word);
        } else {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            current.push_str(word);
        }
    }

    if !current.is_empty() {
        lines.push(current);
    }
    if lines.is_empty() {
        lines.push(String::new());
    }

    lines
}

use std::str::FromStr;

use strum::{AsRefStr, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// Commands that can be invoked by starting a line with a leading slash.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, EnumIter, AsRefStr, IntoStaticStr,
)]
#[strum(serialize_all = "kebab-case")]
pub enum SlashCommand {
    /// Tailor answers for a kind of reader
    Audience,
    /// How long answers should be
    Depth,
    /// Voice of the answers
    Tone,
    /// Attach page context as a JSON object
    Context,
    /// Thumbs up on a reply
    Up,
    /// Thumbs down on a reply
    Down,
    /// Rate the whole conversation
    Rate,
    /// Dismiss the register prompt
    Later,
    /// Clear the conversation
    Clear,
    /// Show the active chat settings
    Settings,
    Help,
    Bye,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCommand {
    pub command: SlashCommand,
    pub argument: Option<String>,
}

impl ParsedCommand {
    pub fn argument(&self) -> Option<&str> {
        self.argument.as_deref()
    }
}

impl SlashCommand {
    /// User-visible description shown in help.
    pub fn description(self) -> &'static str {
        match self {
            SlashCommand::Audience => "tailor answers for an audience",
            SlashCommand::Depth => "set answer length",
            SlashCommand::Tone => "set answer tone",
            SlashCommand::Context => "attach page context, e.g. {\"project_id\": 4}",
            SlashCommand::Up => "mark a reply helpful (latest reply if no id)",
            SlashCommand::Down => "mark a reply unhelpful (latest reply if no id)",
            SlashCommand::Rate => "rate this conversation from 1 to 5 stars",
            SlashCommand::Later => "dismiss the sign-up reminder",
            SlashCommand::Clear => "clear the conversation history",
            SlashCommand::Settings => "show the current chat settings",
            SlashCommand::Help => "show available commands",
            SlashCommand::Bye => "exit the chat",
        }
    }

    /// Usage hint for the argument, if the command takes one
    pub fn usage(self) -> Option<&'static str> {
        match self {
            SlashCommand::Audience => Some("<general|recruiter|developer|founder|client>"),
            SlashCommand::Depth => Some("<short|medium|long>"),
            SlashCommand::Tone => Some("<professional|technical|casual|owner_voice>"),
            SlashCommand::Context => Some("<json>"),
            SlashCommand::Up | SlashCommand::Down => Some("[message id]"),
            SlashCommand::Rate => Some("<1-5>"),
            _ => None,
        }
    }

    /// Command string without the leading '/'.
    pub fn command(self) -> &'static str {
        self.into()
    }
}

/// Parse a slash command from user input
pub fn parse_slash_command(input: &str) -> Option<ParsedCommand> {
    let rest = input.trim().strip_prefix('/')?;

    let (head, tail) = match rest.split_once(char::is_whitespace) {
        Some((head, tail)) => (head, tail.trim()),
        None => (rest, ""),
    };

    let command = SlashCommand::from_str(&head.to_lowercase())
        .ok()
        .or_else(|| match head.to_lowercase().as_str() {
            "q" | "quit" | "exit" => Some(SlashCommand::Bye),
            "a" | "for" => Some(SlashCommand::Audience),
            "d" | "length" => Some(SlashCommand::Depth),
            "t" | "voice" => Some(SlashCommand::Tone),
            "ctx" => Some(SlashCommand::Context),
            "+" | "like" => Some(SlashCommand::Up),
            "-" | "dislike" => Some(SlashCommand::Down),
            "stars" | "feedback" => Some(SlashCommand::Rate),
            "dismiss" => Some(SlashCommand::Later),
            "reset" => Some(SlashCommand::Clear),
            "s" | "config" => Some(SlashCommand::Settings),
            "h" | "?" => Some(SlashCommand::Help),
            _ => None,
        })?;

    // JSON context keeps its inner whitespace; other arguments are single words
    let argument = (!tail.is_empty()).then(|| tail.to_string());

    Some(ParsedCommand { command, argument })
}

/// Get help text for all available commands
pub fn get_help_text() -> String {
    let mut help = String::from("Available commands:\n\n");
    for command in SlashCommand::iter() {
        match command.usage() {
            Some(usage) => help.push_str(&format!(
                "/{} {} - {}\n",
                command.command(),
                usage,
                command.description()
            )),
            None => help.push_str(&format!("/{} - {}\n", command.command(), command.description())),
        }
    }

    help.push_str("\nAliases: /q for /bye, /a for /audience, /d for /depth, /t for /tone, /+ and /- for /up and /down, /s for /settings");
    help.push_str("\nAnything else you type is sent to the assistant.");

    help
}

use std::str::FromStr;

use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

use crate::error::{ChatError, Result};

/// Who the assistant should tailor its answer for
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
    EnumString, EnumIter, AsRefStr, IntoStaticStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Audience {
    #[default]
    General,
    Recruiter,
    Developer,
    Founder,
    Client,
}

/// How long the answer should be
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
    EnumString, EnumIter, AsRefStr, IntoStaticStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Depth {
    Short,
    #[default]
    Medium,
    Long,
}

/// Voice the assistant answers in
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize,
    EnumString, EnumIter, AsRefStr, IntoStaticStr, Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum Tone {
    #[default]
    Professional,
    Technical,
    Casual,
    OwnerVoice,
}

impl Audience {
    pub fn parse(value: &str) -> Result<Self> {
        parse_option("audience", value)
    }

    pub fn description(self) -> &'static str {
        match self {
            Audience::General => "general visitors",
            Audience::Recruiter => "recruiters and hiring managers",
            Audience::Developer => "fellow developers",
            Audience::Founder => "founders and product owners",
            Audience::Client => "prospective clients",
        }
    }
}

impl Depth {
    pub fn parse(value: &str) -> Result<Self> {
        parse_option("depth", value)
    }
}

impl Tone {
    pub fn parse(value: &str) -> Result<Self> {
        parse_option("tone", value)
    }
}

fn parse_option<T: FromStr>(kind: &'static str, value: &str) -> Result<T> {
    T::from_str(value.trim()).map_err(|_| ChatError::InvalidOption {
        kind,
        value: value.to_string(),
    })
}

/// Comma separated list of every accepted value, for help output
pub fn choices<T: IntoEnumIterator + AsRef<str>>() -> String {
    T::iter()
        .map(|v| v.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Per-session answer settings. Applied to the next outgoing query only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatConfig {
    #[serde(default)]
    pub audience: Audience,
    #[serde(default)]
    pub depth: Depth,
    #[serde(default)]
    pub tone: Tone,
}

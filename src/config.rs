use anyhow::{Context, Result};
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::message::de_opt_id;
use crate::options::ChatConfig;

const APP_DIR: &str = "portfolio-chat";
const PROJECT_CONFIG: &str = "portfolio-chat.toml";
const ENV_PREFIX: &str = "PORTFOLIO_CHAT_";

pub const DEFAULT_WELCOME: &str = "Hi! I'm Edzio's AI assistant. I know everything about his work, skills, and projects. Ask me anything - I can tailor my responses for recruiters, developers, founders, or general visitors. What would you like to know?";

/// Main application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root of the portfolio REST API
    pub api_base_url: String,

    /// Upper bound for a single backend call, in seconds
    pub request_timeout_secs: u64,

    /// Greeting shown when a session starts fresh
    pub welcome_message: String,

    /// Message count at which anonymous visitors are nudged to register
    pub save_prompt_threshold: usize,

    /// Message count at which the session rating prompt appears
    pub feedback_prompt_threshold: usize,

    /// Forward chat events to the analytics endpoint
    pub analytics_enabled: bool,

    /// Initial audience/depth/tone for new sessions
    pub defaults: ChatConfig,

    /// Signed-in viewer, if any
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Numeric ids from the environment are accepted as well
    #[serde(deserialize_with = "de_opt_id")]
    pub user_id: Option<String>,
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            api_base_url: "http://localhost:8000".to_string(),
            request_timeout_secs: 30,
            welcome_message: DEFAULT_WELCOME.to_string(),
            save_prompt_threshold: 5,
            feedback_prompt_threshold: 11,
            analytics_enabled: true,
            defaults: ChatConfig::default(),
            auth: AuthConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from every source.
    ///
    /// Priority (highest to lowest):
    /// 1. `PORTFOLIO_CHAT_*` environment variables (`__` separates nested keys)
    /// 2. Explicit config path (if provided)
    /// 3. Project file `./portfolio-chat.toml`
    /// 4. Global file `$XDG_CONFIG_HOME/portfolio-chat/config.toml`
    /// 5. Built-in defaults
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit {
            if !path.exists() {
                anyhow::bail!("Config file not found: {}", path.display());
            }
        }

        let mut figment = Self::file_figment(Self::global_config_path().as_deref(), explicit);
        figment = figment.merge(Env::prefixed(ENV_PREFIX).split("__"));

        Self::from_figment(figment)
    }

    /// Defaults merged with the global, project and explicit files
    pub fn file_figment(global: Option<&Path>, explicit: Option<&Path>) -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

        if let Some(global) = global {
            if global.exists() {
                figment = figment.merge(Toml::file(global));
            }
        }

        let project = PathBuf::from(PROJECT_CONFIG);
        if project.exists() {
            figment = figment.merge(Toml::file(project));
        }

        if let Some(path) = explicit {
            figment = figment.merge(Toml::file(path));
        }

        figment
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        let config: Config = figment
            .extract()
            .context("Failed to parse configuration")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.api_base_url.trim().is_empty() {
            anyhow::bail!("api_base_url must not be empty");
        }
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than zero");
        }
        Ok(())
    }

    /// Save configuration to file
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content).context("Failed to write config file")?;
        Ok(())
    }

    pub fn global_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join(APP_DIR).join("config.toml"))
    }

    pub fn project_config_path() -> Option<PathBuf> {
        let path = PathBuf::from(PROJECT_CONFIG);
        path.exists().then_some(path)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Api base without a trailing slash
    pub fn base_url(&self) -> &str {
        self.api_base_url.trim_end_matches('/')
    }

    /// Describe where configuration was read from
    pub fn sources() -> Vec<(String, bool)> {
        let mut sources = Vec::new();
        match Self::project_config_path() {
            Some(path) => sources.push((format!("Project: {}", path.display()), true)),
            None => sources.push((format!("Project: ./{}", PROJECT_CONFIG), false)),
        }
        if let Some(path) = Self::global_config_path() {
            let exists = path.exists();
            sources.push((format!("Global:  {}", path.display()), exists));
        }
        sources.push(("Default: built-in defaults".to_string(), true));
        sources
    }
}

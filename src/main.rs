use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::info;
use tracing_subscriber::EnvFilter;

use portfolio_chat::analytics::{AnalyticsSink, HttpAnalytics, NoopAnalytics};
use portfolio_chat::api::{ApiClient, ChatBackend, HttpChatBackend};
use portfolio_chat::config::Config;
use portfolio_chat::manager::{ConversationManager, ManagerSettings};
use portfolio_chat::repl::{Repl, render_message};
use portfolio_chat::session::Viewer;

#[derive(Parser)]
#[command(name = "portfolio-chat")]
#[command(version)]
#[command(about = "Chat with the portfolio AI assistant", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Verbosity level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to a config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend base URL
    #[arg(long, global = true)]
    api: Option<String>,

    /// Signed-in user id
    #[arg(long, global = true)]
    user: Option<String>,

    /// Access token sent as a bearer token
    #[arg(long, global = true)]
    token: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat (default)
    Chat,
    /// Print stored conversations for the signed-in user
    History {
        /// Print a single stored session instead of the whole history
        #[arg(long)]
        session: Option<String>,
    },
    /// Show the effective configuration
    Config {
        /// Write the built-in defaults to the global config file
        #[arg(long)]
        init: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(api) = cli.api {
        config.api_base_url = api;
    }
    if let Some(user) = cli.user {
        config.auth.user_id = Some(user);
    }
    if let Some(token) = cli.token {
        config.auth.access_token = Some(token);
    }

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => run_chat(config).await,
        Commands::History { session } => show_history(config, session).await,
        Commands::Config { init } => show_config(&config, init),
    }
}

fn init_tracing(verbose: u8) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn run_chat(config: Config) -> Result<()> {
    let api = ApiClient::new(&config).context("Failed to build HTTP client")?;
    let backend: Arc<dyn ChatBackend> = Arc::new(HttpChatBackend::new(api.clone()));

    let http_analytics = config.analytics_enabled.then(|| HttpAnalytics::new(api));
    let analytics: Arc<dyn AnalyticsSink> = match &http_analytics {
        Some(sink) => Arc::new(sink.clone()),
        None => Arc::new(NoopAnalytics),
    };

    let viewer = match &config.auth.user_id {
        Some(user_id) => Viewer::authenticated(user_id.clone()),
        None => Viewer::Anonymous,
    };
    info!(api = %config.base_url(), anonymous = viewer.is_anonymous(), "starting chat");

    let manager = Arc::new(ConversationManager::new(
        backend,
        analytics,
        ManagerSettings::from_config(&config),
        viewer,
    ));

    let mut repl = Repl::new(manager, BufReader::new(tokio::io::stdin()), std::io::stdout());
    repl.run().await?;

    if let Some(sink) = http_analytics {
        sink.flush().await;
    }
    Ok(())
}

async fn show_history(config: Config, session_id: Option<String>) -> Result<()> {
    let api = ApiClient::new(&config).context("Failed to build HTTP client")?;
    let backend = HttpChatBackend::new(api);

    let sessions = match session_id {
        Some(session_id) => vec![
            backend
                .session(&session_id)
                .await
                .with_context(|| format!("Failed to load chat session {}", session_id))?,
        ],
        None => {
            let Some(user_id) = config.auth.user_id.clone() else {
                println!("History is only kept for signed-in users. Pass --user <id> or --session <id>.");
                return Ok(());
            };
            backend
                .history(&user_id)
                .await
                .context("Failed to load chat history")?
        }
    };

    if sessions.is_empty() {
        println!("No saved conversations yet.");
        return Ok(());
    }

    for session in sessions {
        println!("Session {} ({} messages)", session.id, session.messages.len());
        println!("{}", "=".repeat(50));
        for message in &session.messages {
            println!("{}", render_message(message, 80));
        }
        println!();
    }
    Ok(())
}

fn show_config(config: &Config, init: bool) -> Result<()> {
    if init {
        let path = Config::global_config_path().context("Could not find config directory")?;
        if path.exists() {
            println!("Config already exists at {}", path.display());
        } else {
            Config::default().save(&path)?;
            println!("Wrote default config to {}", path.display());
        }
        return Ok(());
    }

    println!("Configuration sources (highest priority last):");
    for (source, found) in Config::sources().iter().rev() {
        let marker = if *found { "found" } else { "missing" };
        println!("  {} [{}]", source, marker);
    }
    println!();

    let mut shown = config.clone();
    if shown.auth.access_token.is_some() {
        shown.auth.access_token = Some("********".to_string());
    }
    if shown.auth.refresh_token.is_some() {
        shown.auth.refresh_token = Some("********".to_string());
    }
    let rendered = toml::to_string_pretty(&shown).context("Failed to serialize config")?;
    println!("{}", rendered);
    Ok(())
}

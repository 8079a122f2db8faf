use anyhow::{Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ob_agents::{BotContext, Orchestrator};
use ob_core::Provider;
use ob_providers::OpenAIProvider;
use ob_tools::{
    ChannelHistory, DayWindow, DiscordClient, OdinClient, ReportStore, ThreatApi,
    ThreatLookupTool,
};

mod config;
mod gateway;

use config::Config;
use gateway::{NoHistory, ReplySink, StdoutSink};

/// Log level for tracing output
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    /// Most verbose: provider payloads and every page fetched
    Trace,
    /// Verbose: orchestrator steps, tool calls, chunking
    Debug,
    /// Standard: one line per mention, report writes
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Parser)]
#[command(name = "odinbot")]
#[command(author, version, about = "ODIN threat-feed and channel-summary assistant for Discord", long_about = None)]
pub struct Cli {
    /// Config file (default: ~/.config/odinbot/config.toml)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_enum, default_value = "info", global = true)]
    pub log_level: LogLevel,

    /// Enable debug logging (shorthand for --log-level debug)
    #[arg(short, long, global = true)]
    pub debug: bool,

    /// Write logs to file (JSON-lines format) instead of stderr
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Handle inbound events read as JSON lines on stdin (default)
    Serve,
    /// Look up one submission's scan status
    Check {
        /// Submission UUID
        identifier: String,
    },
    /// Summarize one channel day and save the report
    Summarize {
        /// Channel id
        #[arg(long)]
        channel: String,

        /// Day to summarize (YYYY-MM-DD); defaults to today in the configured timezone
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Only summarize this user's messages (username or user id)
        #[arg(long)]
        author: Option<String>,
    },
    /// Show the effective configuration (secrets redacted)
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // --debug overrides --log-level
    let log_level = if cli.debug {
        LogLevel::Debug
    } else {
        cli.log_level
    };
    init_logging(log_level, cli.log_file.as_ref())?;

    let config = Config::load(cli.config.as_deref())?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_serve(&config).await,
        Commands::Check { identifier } => run_check(&config, &identifier).await,
        Commands::Summarize {
            channel,
            date,
            author,
        } => run_summarize(&config, &channel, date, author.as_deref()).await,
        Commands::Config => show_config(&config, cli.config.as_deref()),
    }
}

fn init_logging(level: LogLevel, log_file: Option<&PathBuf>) -> Result<()> {
    let filter = EnvFilter::new(level.as_filter());

    if let Some(log_path) = log_file {
        let file = std::fs::File::create(log_path)
            .with_context(|| format!("Failed to create log file: {:?}", log_path))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::sync::Mutex::new(file)))
            .init();
    } else {
        // stdout carries replies in serve mode
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
    Ok(())
}

fn require<'a>(value: &'a Option<String>, what: &str, env: &str) -> Result<&'a str> {
    value
        .as_deref()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| anyhow::anyhow!("Missing {}: set it in the config file or via {}", what, env))
}

fn threat_client(config: &Config, required: bool) -> Result<Arc<dyn ThreatApi>> {
    let api_key = if required {
        require(&config.threat.api_key, "threat API key", "ODIN_API_KEY")?
    } else {
        config.threat.api_key.as_deref().unwrap_or_default()
    };
    let client = OdinClient::with_timeout(api_key, Duration::from_secs(config.threat.timeout_secs))
        .with_base_url(&config.threat.base_url);
    Ok(Arc::new(client))
}

fn discord_client(config: &Config) -> Option<Arc<DiscordClient>> {
    let token = config.discord.token.as_deref().filter(|t| !t.trim().is_empty())?;
    let client = DiscordClient::with_timeout(token, Duration::from_secs(config.discord.timeout_secs))
        .with_base_url(&config.discord.base_url);
    Some(Arc::new(client))
}

fn provider(config: &Config) -> Result<Arc<dyn Provider>> {
    let api_key = require(&config.provider.api_key, "provider API key", "OPENAI_API_KEY")?;
    let timeout = Duration::from_secs(config.agent.call_timeout_secs.max(1));
    let mut provider =
        OpenAIProvider::with_timeout(api_key, timeout).with_default_model(&config.provider.model);
    if let Some(base_url) = &config.provider.base_url {
        provider = provider.with_base_url(base_url);
    }
    Ok(Arc::new(provider))
}

fn build_context(
    config: &Config,
    threat: Arc<dyn ThreatApi>,
    history: Arc<dyn ChannelHistory>,
) -> Result<Arc<BotContext>> {
    let settings = config.agent_settings()?;
    let reports = Arc::new(ReportStore::new(config.report_dir()));
    Ok(Arc::new(BotContext::new(
        provider(config)?,
        threat,
        history,
        reports,
        settings,
    )))
}

async fn run_serve(config: &Config) -> Result<()> {
    let threat = threat_client(config, true)?;
    let discord = discord_client(config);

    let (history, sink) = match &discord {
        Some(client) => (
            client.clone() as Arc<dyn ChannelHistory>,
            client.clone() as Arc<dyn ReplySink>,
        ),
        None => {
            info!("No Discord token configured; replies go to stdout");
            (
                Arc::new(NoHistory) as Arc<dyn ChannelHistory>,
                Arc::new(StdoutSink::new()) as Arc<dyn ReplySink>,
            )
        }
    };

    let ctx = build_context(config, threat, history).context("Failed to build bot context")?;
    let orchestrator = Arc::new(Orchestrator::new(ctx));

    info!(
        timezone = %config.timezone,
        model = %config.provider.model,
        "odinbot ready"
    );
    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    gateway::serve(orchestrator, sink, stdin).await?;
    Ok(())
}

async fn run_check(config: &Config, identifier: &str) -> Result<()> {
    let tool = ThreatLookupTool::new(threat_client(config, true)?);
    let outcome = tool
        .lookup(identifier)
        .await
        .with_context(|| format!("Lookup failed for '{}'", identifier))?;
    println!("{}", outcome.message());
    Ok(())
}

async fn run_summarize(
    config: &Config,
    channel: &str,
    date: Option<NaiveDate>,
    author: Option<&str>,
) -> Result<()> {
    let discord = discord_client(config)
        .ok_or_else(|| anyhow::anyhow!("Missing Discord token: set it in the config file or via DISCORD_TOKEN"))?;
    let ctx = build_context(config, threat_client(config, false)?, discord)
        .context("Failed to build bot context")?;

    let date = match date {
        Some(date) => date,
        None => DayWindow::containing(chrono::Utc::now(), ctx.settings.timezone)?.date,
    };
    let max_chars = ctx.settings.max_reply_chars;
    let orchestrator = Orchestrator::new(ctx);

    let result = orchestrator
        .summarize_day(channel, date, author)
        .await
        .with_context(|| format!("Summarization failed for channel {} on {}", channel, date))?;
    println!("{}", result.render(max_chars));
    Ok(())
}

fn show_config(config: &Config, path: Option<&std::path::Path>) -> Result<()> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Config::config_path()?,
    };
    println!("# Config file: {}", path.display());
    let rendered =
        toml::to_string_pretty(&config.redacted()).context("Failed to render configuration")?;
    println!("{}", rendered);
    Ok(())
}

use anyhow::{Context, Result};
use chrono_tz::Tz;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ob_agents::AgentSettings;
use ob_core::ChunkerConfig;

const REDACTED: &str = "<redacted>";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// IANA timezone that defines day windows and "today"
    pub timezone: String,

    /// Directory for daily report artifacts (supports $VAR, ~)
    pub report_dir: String,

    pub provider: ProviderSection,
    pub threat: ThreatSection,
    pub discord: DiscordSection,
    pub agent: AgentSection,
    pub summarizer: SummarizerSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            timezone: "UTC".to_string(),
            report_dir: "logs".to_string(),
            provider: ProviderSection::default(),
            threat: ThreatSection::default(),
            discord: DiscordSection::default(),
            agent: AgentSection::default(),
            summarizer: SummarizerSection::default(),
        }
    }
}

/// OpenAI-compatible completion provider
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSection {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: Option<f32>,

    /// Extra parameters to pass to the API (e.g., reasoning_effort, tool_choice)
    pub parameters: HashMap<String, serde_json::Value>,
}

impl Default for ProviderSection {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            model: "gpt-4o-mini".to_string(),
            temperature: None,
            parameters: HashMap::new(),
        }
    }
}

/// ODIN threat-intelligence API
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThreatSection {
    pub base_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for ThreatSection {
    fn default() -> Self {
        Self {
            base_url: ob_tools::threat::DEFAULT_BASE_URL.to_string(),
            api_key: None,
            timeout_secs: ob_tools::threat::DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscordSection {
    pub token: Option<String>,

    /// The bot's own user id; its messages are never summarized
    pub bot_user_id: Option<String>,
    pub base_url: String,
    pub timeout_secs: u64,
}

impl Default for DiscordSection {
    fn default() -> Self {
        Self {
            token: None,
            bot_user_id: None,
            base_url: ob_tools::discord::DEFAULT_BASE_URL.to_string(),
            timeout_secs: ob_tools::discord::DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub max_steps: usize,
    pub call_timeout_secs: u64,
    pub max_reply_chars: usize,
    pub command_prefixes: Vec<String>,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            max_steps: 6,
            call_timeout_secs: 60,
            max_reply_chars: 2000,
            command_prefixes: vec!["/".to_string(), "!".to_string()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizerSection {
    /// Payload size above which content is chunked and merged
    pub max_payload_bytes: usize,
    pub chunk_size_bytes: usize,
    pub max_tokens: u32,
}

impl Default for SummarizerSection {
    fn default() -> Self {
        Self {
            max_payload_bytes: 12_000,
            chunk_size_bytes: 6_000,
            max_tokens: 300,
        }
    }
}

/// Expand environment variables in a path string
/// Supports: $VAR, ${VAR}, ~
pub fn expand_path(path: &str) -> PathBuf {
    let mut result = path.to_string();

    // Expand ~ at the start
    if result.starts_with("~/") {
        if let Some(home) = dirs::home_dir() {
            result = format!("{}{}", home.display(), &result[1..]);
        }
    } else if result == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }

    // Expand $VAR and ${VAR}
    let Ok(re) = regex::Regex::new(r"\$\{?([A-Za-z_][A-Za-z0-9_]*)\}?") else {
        return PathBuf::from(result);
    };
    let expanded = re.replace_all(&result, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_else(|_| caps[0].to_string())
    });

    PathBuf::from(expanded.to_string())
}

impl Config {
    /// Load defaults, then the TOML file (if present), then `ODINBOT_*`
    /// environment variables, then the well-known credential variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(path) => path.to_path_buf(),
            None => Self::config_path()?,
        };
        if path.is_some() && !config_path.exists() {
            anyhow::bail!("Config file not found: {}", config_path.display());
        }

        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(&config_path))
            .merge(Env::prefixed("ODINBOT_").split("__"));

        let mut config: Config = figment
            .extract()
            .with_context(|| format!("Invalid configuration ({})", config_path.display()))?;
        config.apply_env_fallbacks(|name| std::env::var(name).ok());
        Ok(config)
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not determine config directory"))?;
        Ok(config_dir.join("odinbot").join("config.toml"))
    }

    /// Fill missing credentials from `ODIN_API_KEY`, `DISCORD_TOKEN` and
    /// `OPENAI_API_KEY`.
    pub fn apply_env_fallbacks(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let lookup = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if self.threat.api_key.is_none() {
            self.threat.api_key = lookup("ODIN_API_KEY");
        }
        if self.discord.token.is_none() {
            self.discord.token = lookup("DISCORD_TOKEN");
        }
        if self.provider.api_key.is_none() {
            self.provider.api_key = lookup("OPENAI_API_KEY");
        }
    }

    pub fn timezone(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|e| anyhow::anyhow!("Invalid timezone '{}': {}", self.timezone, e))
    }

    pub fn report_dir(&self) -> PathBuf {
        expand_path(&self.report_dir)
    }

    pub fn agent_settings(&self) -> Result<AgentSettings> {
        let chunker = ChunkerConfig::new()
            .with_threshold(self.summarizer.max_payload_bytes)
            .with_chunk_size(self.summarizer.chunk_size_bytes)
            .with_max_tokens(self.summarizer.max_tokens);

        Ok(AgentSettings {
            timezone: self.timezone()?,
            max_steps: self.agent.max_steps.max(1),
            call_timeout: Duration::from_secs(self.agent.call_timeout_secs.max(1)),
            max_reply_chars: self.agent.max_reply_chars,
            command_prefixes: self.agent.command_prefixes.clone(),
            bot_user_id: self.discord.bot_user_id.clone(),
            model: Some(self.provider.model.clone()),
            temperature: self.provider.temperature,
            extra: self.provider.parameters.clone(),
            chunker,
        })
    }

    /// A copy with every secret replaced, for display.
    pub fn redacted(&self) -> Self {
        let mask = |secret: &Option<String>| secret.as_ref().map(|_| REDACTED.to_string());
        let mut config = self.clone();
        config.provider.api_key = mask(&self.provider.api_key);
        config.threat.api_key = mask(&self.threat.api_key);
        config.discord.token = mask(&self.discord.token);
        config
    }
}

//! Explicitly constructed bot dependencies.
//!
//! A `BotContext` is built once at process start and shared read-only by
//! every in-flight mention. The only mutable shared state behind it is the
//! report store's per-date write locks.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono_tz::Tz;

use ob_core::{ChunkerConfig, Provider, TimeoutProvider};
use ob_tools::{ChannelHistory, HistoryAggregator, ReportStore, ThreatApi};

#[derive(Debug, Clone)]
pub struct AgentSettings {
    /// Reference timezone for day windows and "today".
    pub timezone: Tz,
    /// Upper bound on completion steps per mention.
    pub max_steps: usize,
    /// Limit applied to every completion and history call.
    pub call_timeout: Duration,
    pub max_reply_chars: usize,
    pub command_prefixes: Vec<String>,
    pub bot_user_id: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    /// Extra request fields passed through to the provider.
    pub extra: HashMap<String, serde_json::Value>,
    pub chunker: ChunkerConfig,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            timezone: Tz::UTC,
            max_steps: 6,
            call_timeout: Duration::from_secs(60),
            max_reply_chars: 2000,
            command_prefixes: vec!["/".to_string(), "!".to_string()],
            bot_user_id: None,
            model: None,
            temperature: None,
            extra: HashMap::new(),
            chunker: ChunkerConfig::default(),
        }
    }
}

pub struct BotContext {
    pub provider: Arc<dyn Provider>,
    pub threat: Arc<dyn ThreatApi>,
    pub history: Arc<dyn ChannelHistory>,
    pub reports: Arc<ReportStore>,
    pub settings: AgentSettings,
}

impl BotContext {
    /// Build a context. The provider is wrapped so every completion call is
    /// bounded by `settings.call_timeout`.
    pub fn new(
        provider: Arc<dyn Provider>,
        threat: Arc<dyn ThreatApi>,
        history: Arc<dyn ChannelHistory>,
        reports: Arc<ReportStore>,
        settings: AgentSettings,
    ) -> Self {
        let provider: Arc<dyn Provider> =
            Arc::new(TimeoutProvider::new(provider, settings.call_timeout));
        Self {
            provider,
            threat,
            history,
            reports,
            settings,
        }
    }

    pub fn aggregator(&self) -> HistoryAggregator {
        HistoryAggregator::new(self.history.clone(), self.settings.timezone)
            .with_bot_user_id(self.settings.bot_user_id.clone())
            .with_command_prefixes(self.settings.command_prefixes.clone())
            .with_call_timeout(self.settings.call_timeout)
    }
}

//! Line-delimited event gateway: inbound events arrive as JSON lines, each
//! qualifying one is handled on its own task, and replies go to a sink.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use ob_agents::{MentionEvent, Orchestrator};
use ob_core::Error;
use ob_tools::{is_command, ChannelHistory, DiscordClient, HistoryPage, PageRequest};

/// One inbound chat event as delivered by the gateway.
#[derive(Debug, Clone, Deserialize)]
pub struct InboundEvent {
    pub author_id: String,
    pub channel_id: String,
    pub text: String,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub author_is_bot: bool,
    #[serde(default)]
    pub mentions_bot: bool,
}

impl InboundEvent {
    /// Bot-authored events never qualify. Otherwise the event must mention
    /// the bot or carry a direct command.
    pub fn qualifies<S: AsRef<str>>(&self, bot_user_id: Option<&str>, prefixes: &[S]) -> bool {
        if self.author_is_bot || bot_user_id == Some(self.author_id.as_str()) {
            return false;
        }
        self.mentions_bot || is_command(&self.text, prefixes)
    }

    pub fn into_mention(self) -> MentionEvent {
        MentionEvent::new(self.author_id, self.channel_id, self.text, self.timestamp)
    }
}

/// Where replies are delivered.
#[async_trait]
pub trait ReplySink: Send + Sync {
    async fn send(&self, channel_id: &str, content: &str) -> Result<(), Error>;
}

#[async_trait]
impl ReplySink for DiscordClient {
    async fn send(&self, channel_id: &str, content: &str) -> Result<(), Error> {
        self.send_message(channel_id, content).await
    }
}

#[derive(Serialize)]
struct ReplyLine<'a> {
    channel_id: &'a str,
    content: &'a str,
}

/// Writes each reply to stdout as one JSON line.
pub struct StdoutSink {
    out: Mutex<tokio::io::Stdout>,
}

impl StdoutSink {
    pub fn new() -> Self {
        Self {
            out: Mutex::new(tokio::io::stdout()),
        }
    }
}

impl Default for StdoutSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ReplySink for StdoutSink {
    async fn send(&self, channel_id: &str, content: &str) -> Result<(), Error> {
        let mut line = serde_json::to_string(&ReplyLine { channel_id, content })?;
        line.push('\n');

        let mut out = self.out.lock().await;
        out.write_all(line.as_bytes()).await?;
        out.flush().await?;
        Ok(())
    }
}

/// Channel history used when no Discord token is configured.
pub struct NoHistory;

#[async_trait]
impl ChannelHistory for NoHistory {
    async fn fetch_page(&self, _request: &PageRequest) -> Result<HistoryPage, Error> {
        Err(Error::config(
            "channel history is unavailable: no Discord token configured",
        ))
    }
}

/// Read events until EOF, handling each qualifying one on its own task.
/// Returns the number of events handled once every task has finished.
pub async fn serve<R>(
    orchestrator: Arc<Orchestrator>,
    sink: Arc<dyn ReplySink>,
    reader: R,
) -> anyhow::Result<usize>
where
    R: AsyncBufRead + Unpin,
{
    let settings = &orchestrator.context().settings;
    let bot_user_id = settings.bot_user_id.clone();
    let prefixes = settings.command_prefixes.clone();

    let mut lines = reader.lines();
    let mut tasks = InFlight::default();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let event: InboundEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Skipping malformed event");
                continue;
            }
        };
        if !event.qualifies(bot_user_id.as_deref(), &prefixes) {
            debug!(channel = %event.channel_id, author = %event.author_id, "Ignoring event");
            continue;
        }

        let orchestrator = orchestrator.clone();
        let sink = sink.clone();
        tasks.spawn(async move {
            let mention = event.into_mention();
            let reply = orchestrator.handle(&mention).await;
            if let Err(e) = sink.send(&mention.channel_id, &reply).await {
                error!(channel = %mention.channel_id, error = %e, "Failed to deliver reply");
            }
        });
        tasks.reap();
        debug!(in_flight = tasks.len(), "Spawned mention task");
    }

    let handled = tasks.drain().await;
    info!(handled, "Input closed");
    Ok(handled)
}

/// Mention tasks still running, plus a count of those that finished.
/// Finished tasks are reaped as the server goes so the set stays bounded by
/// the number actually in flight.
#[derive(Default)]
struct InFlight {
    tasks: JoinSet<()>,
    handled: usize,
}

impl InFlight {
    fn spawn<F>(&mut self, task: F)
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Collect every task that has already finished, without waiting.
    fn reap(&mut self) {
        while let Some(result) = self.tasks.try_join_next() {
            self.record(result);
        }
    }

    /// Wait for the remaining tasks; returns the total handled.
    async fn drain(mut self) -> usize {
        while let Some(result) = self.tasks.join_next().await {
            self.record(result);
        }
        self.handled
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }

    fn record(&mut self, result: Result<(), tokio::task::JoinError>) {
        match result {
            Ok(()) => self.handled += 1,
            Err(e) => error!(error = %e, "Mention task panicked"),
        }
    }
}

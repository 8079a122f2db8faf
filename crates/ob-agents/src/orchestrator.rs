//! The entry point for every mention.
//!
//! Direct commands (`/health`, `/check`) are answered without the completion
//! provider. Everything else runs a bounded tool-calling loop: each step the
//! provider either answers with text (the loop ends) or requests tool calls,
//! which are validated, executed and appended to the conversation.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::NaiveDate;
use tracing::{debug, error, info, warn};

use ob_core::{
    ChunkProcessor, CompletionRequest, Error, Message, ToolCall, ToolOutput,
};
use ob_tools::threat::INVALID_UUID_MSG;
use ob_tools::{
    format_feed, render, DailyReport, DayWindow, FeedItem, ThreatFeedTool, ThreatLookupTool,
};

use crate::context::BotContext;
use crate::mention::{parse_command, Command, MentionEvent};
use crate::preamble::{generate_preamble, PreambleContext};
use crate::summarizer::PerAuthorSummarizer;
use crate::tools::{ToolKind, ToolRequest};

pub const HEALTH_MSG: &str = "Bot is operational!";
pub const NO_UUID_MSG: &str = "Please provide a UUID after /check, e.g. '@bot /check <uuid>'";
pub const USAGE_MSG: &str = "If you want me to check your submission, @ me and write '/check UUID'. \
     I can also summarize this channel for a day or tell you what is in the ODIN threat feed.";
pub const COULD_NOT_COMPLETE_MSG: &str =
    "I could not complete your request within the allowed number of steps. Please try rephrasing it.";
pub const NO_OUTPUT_MSG: &str =
    "I couldn't process your request. Please try again in a few moments.";
pub const TIMEOUT_MSG: &str =
    "A service I depend on took too long to respond. Please try again in a few moments.";
pub const ERROR_MSG: &str =
    "I encountered an error while processing your request. Please try again in a few moments.";

const FEED_INSTRUCTION: &str = "You condense an ODIN threat feed listing, one entry per line as \
     \"- [id] title (Status: s, Severity: v)\". Keep every high or critical severity entry with its id. \
     Group the remaining entries by status and theme in a few lines. Never invent entries.";

/// Result of running the summarization pipeline for one day.
#[derive(Debug, Clone)]
pub enum SummaryResult {
    /// No qualifying messages in the window; nothing was written.
    Empty { date: NaiveDate },
    Persisted { report: DailyReport, path: PathBuf },
}

impl SummaryResult {
    pub fn render(&self, max_chars: usize) -> String {
        match self {
            SummaryResult::Empty { date } => {
                format!("No messages found for {}.", date.format("%Y-%m-%d"))
            }
            SummaryResult::Persisted { report, path } => render(report, path, max_chars),
        }
    }
}

/// How the loop proceeds after one tool call.
enum Step {
    /// Feed this output back to the provider.
    Continue(ToolOutput),
    /// Reply with this text and stop.
    Finish(String),
}

pub struct Orchestrator {
    ctx: Arc<BotContext>,
}

impl Orchestrator {
    pub fn new(ctx: Arc<BotContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &BotContext {
        &self.ctx
    }

    /// Handle one mention. Never fails: errors are logged and turned into a
    /// user-facing reply.
    pub async fn handle(&self, event: &MentionEvent) -> String {
        info!(
            channel = %event.channel_id,
            author = %event.author_id,
            "Handling mention"
        );
        match self.dispatch(event).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(
                    channel = %event.channel_id,
                    author = %event.author_id,
                    error = %e,
                    "Mention failed"
                );
                user_message(&e)
            }
        }
    }

    /// Run a direct lookup and render the outcome.
    pub async fn check(&self, identifier: &str) -> String {
        let tool = ThreatLookupTool::new(self.ctx.threat.clone());
        match tool.lookup(identifier).await {
            Ok(outcome) => outcome.message(),
            Err(e) if e.is_validation() => INVALID_UUID_MSG.to_string(),
            Err(e) => {
                error!(identifier = %identifier, error = %e, "Submission lookup failed");
                user_message(&e)
            }
        }
    }

    /// Collect, summarize, persist: the whole pipeline for one channel day.
    pub async fn summarize_day(
        &self,
        channel_id: &str,
        date: NaiveDate,
        author: Option<&str>,
    ) -> Result<SummaryResult, Error> {
        let groups = self.ctx.aggregator().collect(channel_id, date, author).await?;
        if groups.is_empty() {
            info!(channel = %channel_id, date = %date, "No messages to summarize");
            return Ok(SummaryResult::Empty { date });
        }

        let settings = &self.ctx.settings;
        let summarizer = PerAuthorSummarizer::new(
            self.ctx.provider.clone(),
            settings.chunker.clone(),
            settings.timezone,
        )
        .with_model(settings.model.clone());
        let summaries = summarizer.summarize_all(groups.iter()).await;

        let report = DailyReport::assemble(date, channel_id, settings.timezone, summaries);
        if report.failed_count() > 0 {
            warn!(
                date = %date,
                failed = report.failed_count(),
                authors = report.summaries.len(),
                "Report has unavailable author summaries"
            );
        }
        let path = self.ctx.reports.persist(&report).await?;
        Ok(SummaryResult::Persisted { report, path })
    }

    async fn dispatch(&self, event: &MentionEvent) -> Result<String, Error> {
        match parse_command(&event.text, &self.ctx.settings.command_prefixes) {
            Command::Health => Ok(HEALTH_MSG.to_string()),
            Command::Check(None) => Ok(NO_UUID_MSG.to_string()),
            Command::Check(Some(identifier)) => Ok(self.check(&identifier).await),
            Command::Ask(text) if text.is_empty() => Ok(USAGE_MSG.to_string()),
            Command::Ask(text) => self.run_loop(event, &text).await,
        }
    }

    async fn run_loop(&self, event: &MentionEvent, text: &str) -> Result<String, Error> {
        let settings = &self.ctx.settings;
        let today = DayWindow::containing(event.received_at, settings.timezone)?.date;
        let preamble = generate_preamble(&PreambleContext {
            channel_id: &event.channel_id,
            today,
            timezone: settings.timezone.name(),
        });

        let mut messages = vec![Message::system(preamble), Message::user(text)];
        let tools = ToolKind::definitions();

        for step in 0..settings.max_steps {
            debug!(
                channel = %event.channel_id,
                step = step,
                messages = messages.len(),
                "Orchestrator step"
            );

            let mut request = CompletionRequest::new(messages.clone())
                .with_tools(tools.clone())
                .with_extra(settings.extra.clone());
            if let Some(model) = &settings.model {
                request = request.with_model(model.as_str());
            }
            if let Some(temperature) = settings.temperature {
                request = request.with_temperature(temperature);
            }

            let response = self.ctx.provider.complete(request).await?;

            if !response.has_tool_calls() {
                let reply = response.text();
                if reply.is_empty() {
                    return Ok(NO_OUTPUT_MSG.to_string());
                }
                return Ok(truncate_reply(reply, settings.max_reply_chars));
            }

            let calls = response.message.tool_calls.clone();
            messages.push(Message::assistant_with_tool_calls(
                response.message.content.clone(),
                calls.clone(),
            ));

            for call in &calls {
                match self.execute(event, call, today).await {
                    Step::Continue(output) => {
                        messages.push(Message::tool_result(&call.id, output.content));
                    }
                    Step::Finish(reply) => return Ok(reply),
                }
            }
        }

        Err(Error::MaxIterations {
            agent: "orchestrator".to_string(),
            max: settings.max_steps,
        })
    }

    async fn execute(&self, event: &MentionEvent, call: &ToolCall, today: NaiveDate) -> Step {
        let request = match ToolRequest::from_call(call) {
            Ok(request) => request,
            Err(e) => {
                warn!(tool = %call.name, error = %e, "Rejected tool call");
                return Step::Continue(ToolOutput::error_json(error_kind(&e), e.to_string()));
            }
        };
        debug!(tool = %call.name, "Executing tool");

        let result = match request {
            ToolRequest::Lookup { identifier } => {
                ThreatLookupTool::new(self.ctx.threat.clone())
                    .lookup(&identifier)
                    .await
                    .map(|outcome| Step::Continue(ToolOutput::success(outcome.to_json().to_string())))
            }
            ToolRequest::FeedFetch => self
                .feed_payload()
                .await
                .map(|payload| Step::Continue(ToolOutput::success(payload))),
            ToolRequest::Summarize { date, author } => self
                .summarize_day(&event.channel_id, date.unwrap_or(today), author.as_deref())
                .await
                .map(|result| Step::Finish(result.render(self.ctx.settings.max_reply_chars))),
        };

        result.unwrap_or_else(|e| {
            if e.is_validation() {
                warn!(tool = %call.name, error = %e, "Tool rejected arguments");
            } else {
                error!(tool = %call.name, error = %e, "Tool failed");
            }
            Step::Continue(ToolOutput::error_json(error_kind(&e), e.to_string()))
        })
    }

    /// The formatted feed, condensed when it is over the payload budget.
    async fn feed_payload(&self) -> Result<String, Error> {
        let items = ThreatFeedTool::new(self.ctx.threat.clone()).fetch_feed().await?;
        let formatted = format_feed(&items);

        let settings = &self.ctx.settings;
        let mut processor = ChunkProcessor::new(self.ctx.provider.clone(), settings.chunker.clone());
        if let Some(model) = &settings.model {
            processor = processor.with_model(model.as_str());
        }
        if !processor.should_chunk(&formatted) {
            return Ok(formatted);
        }

        let lines: Vec<String> = items.iter().map(FeedItem::line).collect();
        info!(entries = items.len(), bytes = formatted.len(), "Condensing threat feed");
        let condensed = processor.condense(&lines, FEED_INSTRUCTION).await?;
        Ok(format!(
            "ODIN Threat Feed Summary (condensed from {} entries):\n{}",
            items.len(),
            condensed
        ))
    }
}

fn error_kind(error: &Error) -> &'static str {
    match error {
        Error::Tool { .. } => "unknown_tool",
        Error::Timeout(_) => "timeout",
        e if e.is_validation() => "invalid_arguments",
        e if e.is_upstream() => "upstream_unavailable",
        Error::Io(_) => "storage_error",
        _ => "internal_error",
    }
}

fn user_message(error: &Error) -> String {
    match error {
        Error::Validation(message) => message.clone(),
        Error::MaxIterations { .. } => COULD_NOT_COMPLETE_MSG.to_string(),
        Error::Timeout(_) => TIMEOUT_MSG.to_string(),
        _ => ERROR_MSG.to_string(),
    }
}

fn truncate_reply(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let marker = "…";
    let keep: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}{}", keep, marker)
}

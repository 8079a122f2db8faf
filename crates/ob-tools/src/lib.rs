//! ob-tools: Tools used by the odinbot agent
//!
//! This crate provides the capabilities the orchestrator can invoke:
//! - Command: recognition of the bot's direct commands
//! - Threat: submission lookup and feed retrieval against the ODIN API
//! - History: day-windowed channel history, grouped by author
//! - Discord: REST adapter for channel history and replies
//! - Report: daily report assembly, persistence and rendering

pub mod command;
pub mod discord;
pub mod history;
pub mod report;
pub mod threat;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use command::{is_command, parse_command, Command};
pub use discord::{snowflake_for, DiscordClient};
pub use history::{
    strip_mentions, AuthorGroup, AuthorGroups, ChannelHistory, DayWindow, HistoryAggregator,
    HistoryOrder, HistoryPage, MessageRecord, PageRequest,
};
pub use report::{render, DailyReport, PerAuthorSummary, ReportStore, TopicOutcome};
pub use threat::{
    format_feed, parse_feed, parse_identifier, parse_scan_result, FeedItem, LookupOutcome,
    OdinClient, ScanStatus, ThreatApi, ThreatFeedTool, ThreatLookupTool,
};

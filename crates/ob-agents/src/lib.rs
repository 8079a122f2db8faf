//! Agent orchestration for odinbot.
//!
//! This crate provides:
//! - `Orchestrator`: the bounded tool-calling loop run for every mention
//! - `ToolKind` / `ToolRequest`: the closed catalogue of callable tools
//! - `PerAuthorSummarizer`: topic summaries for one author's messages
//! - `BotContext`: the explicitly constructed dependencies of the bot

mod context;
mod mention;
mod orchestrator;
mod preamble;
mod summarizer;
mod tools;

pub use context::{AgentSettings, BotContext};
pub use mention::{parse_command, Command, MentionEvent};
pub use orchestrator::{
    Orchestrator, SummaryResult, COULD_NOT_COMPLETE_MSG, ERROR_MSG, HEALTH_MSG, NO_UUID_MSG,
    TIMEOUT_MSG, USAGE_MSG,
};
pub use preamble::{generate_preamble, PreambleContext};
pub use summarizer::PerAuthorSummarizer;
pub use tools::{ToolKind, ToolRequest};

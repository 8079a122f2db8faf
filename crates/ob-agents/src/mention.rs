//! Inbound mentions and the direct commands recognized in them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use ob_tools::command::{parse_command, Command};

/// One inbound event directed at the bot. Consumed once by the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MentionEvent {
    pub author_id: String,
    pub channel_id: String,
    pub text: String,
    pub received_at: DateTime<Utc>,
}

impl MentionEvent {
    pub fn new(
        author_id: impl Into<String>,
        channel_id: impl Into<String>,
        text: impl Into<String>,
        received_at: DateTime<Utc>,
    ) -> Self {
        Self {
            author_id: author_id.into(),
            channel_id: channel_id.into(),
            text: text.into(),
            received_at,
        }
    }
}

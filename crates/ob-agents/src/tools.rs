//! The closed catalogue of tools offered to the completion provider.
//!
//! Every provider tool call goes through `ToolRequest::from_call`, which
//! checks the arguments against the tool's schema before producing a typed
//! request. Nothing runs with arguments that failed that check.

use chrono::NaiveDate;
use serde::Deserialize;
use serde_json::Value;

use ob_core::{Error, PropertySchema, ToolCall, ToolDefinition, ToolParameters};

const UUID_PATTERN: &str =
    r"^\s*[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}\s*$";
const DATE_PATTERN: &str = r"^\d{4}-\d{2}-\d{2}$";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ToolKind {
    Lookup,
    FeedFetch,
    Summarize,
}

impl ToolKind {
    pub const ALL: [ToolKind; 3] = [ToolKind::Lookup, ToolKind::FeedFetch, ToolKind::Summarize];

    pub fn name(self) -> &'static str {
        match self {
            ToolKind::Lookup => "check_submission",
            ToolKind::FeedFetch => "fetch_threat_feed",
            ToolKind::Summarize => "summarize_channel",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    pub fn definition(self) -> ToolDefinition {
        match self {
            ToolKind::Lookup => ToolDefinition::new(
                self.name(),
                "Check whether an ODIN submission has been scanned. \
                 Returns whether the submission exists and its scan status.",
            )
            .with_parameters(ToolParameters::new().add_property(
                "identifier",
                PropertySchema::string("Submission UUID, e.g. 123e4567-e89b-12d3-a456-426614174000")
                    .with_pattern(UUID_PATTERN),
                true,
            )),
            ToolKind::FeedFetch => ToolDefinition::new(
                self.name(),
                "Fetch the current ODIN threat feed as a list of entries \
                 with id, title, status and severity.",
            ),
            ToolKind::Summarize => ToolDefinition::new(
                self.name(),
                "Summarize this channel's messages for one day, grouped by author. \
                 Saves the report and posts the digest to the channel directly.",
            )
            .with_parameters(
                ToolParameters::new()
                    .add_property(
                        "date",
                        PropertySchema::string(
                            "Day to summarize as YYYY-MM-DD. Omit for today.",
                        )
                        .with_pattern(DATE_PATTERN),
                        false,
                    )
                    .add_property(
                        "author",
                        PropertySchema::string(
                            "Only summarize this user's messages (username or user id).",
                        ),
                        false,
                    ),
            ),
        }
    }

    /// Definitions of every tool, in catalogue order.
    pub fn definitions() -> Vec<ToolDefinition> {
        Self::ALL.into_iter().map(Self::definition).collect()
    }
}

/// A validated, typed tool invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolRequest {
    Lookup {
        identifier: String,
    },
    FeedFetch,
    Summarize {
        date: Option<NaiveDate>,
        author: Option<String>,
    },
}

#[derive(Deserialize)]
struct LookupArgs {
    identifier: String,
}

#[derive(Deserialize)]
struct SummarizeArgs {
    #[serde(default)]
    date: Option<String>,
    #[serde(default)]
    author: Option<String>,
}

impl ToolRequest {
    /// Validate a provider tool call and turn it into a typed request.
    ///
    /// Unknown tool names yield `Error::Tool`; bad arguments yield
    /// `Error::Validation`.
    pub fn from_call(call: &ToolCall) -> Result<Self, Error> {
        let kind = ToolKind::from_name(&call.name).ok_or_else(|| {
            let known: Vec<_> = ToolKind::ALL.iter().map(|k| k.name()).collect();
            Error::tool(
                &call.name,
                format!("unknown tool; available tools are {}", known.join(", ")),
            )
        })?;

        kind.definition().validate(&call.arguments)?;
        let arguments = match &call.arguments {
            Value::Null => Value::Object(Default::default()),
            other => other.clone(),
        };

        match kind {
            ToolKind::Lookup => {
                let args: LookupArgs = parse_args(kind, arguments)?;
                Ok(ToolRequest::Lookup {
                    identifier: args.identifier.trim().to_string(),
                })
            }
            ToolKind::FeedFetch => Ok(ToolRequest::FeedFetch),
            ToolKind::Summarize => {
                let args: SummarizeArgs = parse_args(kind, arguments)?;
                let date = args
                    .date
                    .map(|d| {
                        NaiveDate::parse_from_str(&d, "%Y-%m-%d").map_err(|_| {
                            Error::validation(format!(
                                "{}: '{}' is not a calendar date (expected YYYY-MM-DD)",
                                kind.name(),
                                d
                            ))
                        })
                    })
                    .transpose()?;
                let author = args
                    .author
                    .map(|a| a.trim().to_string())
                    .filter(|a| !a.is_empty());
                Ok(ToolRequest::Summarize { date, author })
            }
        }
    }

    pub fn kind(&self) -> ToolKind {
        match self {
            ToolRequest::Lookup { .. } => ToolKind::Lookup,
            ToolRequest::FeedFetch => ToolKind::FeedFetch,
            ToolRequest::Summarize { .. } => ToolKind::Summarize,
        }
    }
}

fn parse_args<T: for<'de> Deserialize<'de>>(kind: ToolKind, arguments: Value) -> Result<T, Error> {
    serde_json::from_value(arguments)
        .map_err(|e| Error::validation(format!("{}: invalid arguments: {}", kind.name(), e)))
}

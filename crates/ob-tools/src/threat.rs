//! ODIN threat-intelligence tools: submission lookup and feed retrieval.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use ob_core::Error;

pub const DEFAULT_BASE_URL: &str = "https://0din.ai/api/v1";
pub const DEFAULT_TIMEOUT_SECS: u64 = 15;

pub const SCANNED_MSG: &str = "It has been scanned";
pub const NOT_SCANNED_MSG: &str = "It hasn't been checked, hang tight.";
pub const NOT_FOUND_MSG: &str = "Submission not found.";
pub const INVALID_UUID_MSG: &str =
    "The UUID you provided is not valid. Please provide a valid UUID.";
pub const NO_TICKETS_MSG: &str = "No tickets found in the threat feed.";

/// The threat-service seam. `Ok(None)` from `get_submission` means the
/// service does not know the identifier.
#[async_trait]
pub trait ThreatApi: Send + Sync {
    async fn get_submission(&self, id: &Uuid) -> Result<Option<Value>, Error>;

    async fn get_feed(&self) -> Result<Value, Error>;
}

// =============================================================================
// HTTP client
// =============================================================================

pub struct OdinClient {
    client: Client,
    base_url: String,
    api_key: String,
}

impl OdinClient {
    pub fn new(api_key: impl Into<String>) -> Self {
        Self::with_timeout(api_key, Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    pub fn with_timeout(api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: Client::builder()
                .user_agent("odinbot/0.1.0")
                .timeout(timeout)
                .build()
                .unwrap_or_default(),
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: api_key.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    async fn get(&self, url: &str) -> Result<Option<Value>, Error> {
        let response = self
            .client
            .get(url)
            .header("accept", "application/json")
            .header("Authorization", &self.api_key)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::timeout(format!("threat service request: {}", e))
                } else {
                    Error::network(format!("threat service request failed: {}", e))
                }
            })?;

        let status = response.status();
        info!(url = %url, status = status.as_u16(), "Threat service responded");

        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::api(status.as_u16(), body));
        }

        let body = response
            .json()
            .await
            .map_err(|e| Error::serialization(format!("threat service response: {}", e)))?;
        Ok(Some(body))
    }
}

#[async_trait]
impl ThreatApi for OdinClient {
    async fn get_submission(&self, id: &Uuid) -> Result<Option<Value>, Error> {
        let url = format!("{}/threatfeed/{}", self.base_url, id.hyphenated());
        self.get(&url).await
    }

    async fn get_feed(&self) -> Result<Value, Error> {
        let url = format!("{}/threatfeed/", self.base_url);
        self.get(&url)
            .await?
            .ok_or_else(|| Error::api(404, "threat feed endpoint not found"))
    }
}

// =============================================================================
// Submission lookup
// =============================================================================

/// Parse a submission identifier: a hyphenated UUID of any version,
/// case-insensitive, surrounding whitespace ignored.
pub fn parse_identifier(raw: &str) -> Result<Uuid, Error> {
    let trimmed = raw.trim();
    match Uuid::parse_str(trimmed) {
        // parse_str also accepts the simple, braced and urn forms
        Ok(id) if id.hyphenated().to_string() == trimmed.to_ascii_lowercase() => Ok(id),
        _ => Err(Error::validation(INVALID_UUID_MSG)),
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScanStatus {
    pub identifier: Uuid,
    pub scanned: bool,
    /// Raw service response, kept when it carried no scanner verdict.
    pub details: Option<Value>,
}

impl ScanStatus {
    pub fn message(&self) -> String {
        match (&self.details, self.scanned) {
            (_, true) => SCANNED_MSG.to_string(),
            (None, false) => NOT_SCANNED_MSG.to_string(),
            (Some(details), false) => {
                let pretty =
                    serde_json::to_string_pretty(details).unwrap_or_else(|_| details.to_string());
                format!("{}\n```json\n{}\n```", NOT_SCANNED_MSG, pretty)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum LookupOutcome {
    Found(ScanStatus),
    NotFound,
}

impl LookupOutcome {
    /// Chat-facing text for this outcome.
    pub fn message(&self) -> String {
        match self {
            LookupOutcome::Found(status) => status.message(),
            LookupOutcome::NotFound => NOT_FOUND_MSG.to_string(),
        }
    }

    /// Structured form handed back to the completion provider.
    pub fn to_json(&self) -> Value {
        match self {
            LookupOutcome::Found(status) => serde_json::json!({
                "identifier": status.identifier.hyphenated().to_string(),
                "found": true,
                "scanned": status.scanned,
                "message": status.message(),
            }),
            LookupOutcome::NotFound => serde_json::json!({
                "found": false,
                "message": NOT_FOUND_MSG,
            }),
        }
    }
}

/// Derive the scan status from a submission record.
///
/// The `metadata` entry with `type == "ScannerModule"` decides: a `result` of
/// 1 means scanned, 0 or null means not yet scanned. Without a usable entry
/// the submission counts as not scanned and the raw record is kept.
pub fn parse_scan_result(identifier: Uuid, data: &Value) -> ScanStatus {
    let metadata = data
        .get("metadata")
        .and_then(Value::as_array)
        .map(Vec::as_slice)
        .unwrap_or_default();

    for item in metadata {
        if item.get("type").and_then(Value::as_str) != Some("ScannerModule") {
            continue;
        }
        match item.get("result") {
            Some(v) if v.as_i64() == Some(1) => {
                return ScanStatus {
                    identifier,
                    scanned: true,
                    details: None,
                }
            }
            None | Some(Value::Null) => {}
            Some(v) if v.as_i64() == Some(0) => {}
            Some(_) => continue,
        }
        return ScanStatus {
            identifier,
            scanned: false,
            details: None,
        };
    }

    ScanStatus {
        identifier,
        scanned: false,
        details: Some(data.clone()),
    }
}

pub struct ThreatLookupTool {
    api: Arc<dyn ThreatApi>,
}

impl ThreatLookupTool {
    pub fn new(api: Arc<dyn ThreatApi>) -> Self {
        Self { api }
    }

    /// Look up one submission. Malformed identifiers are rejected before any
    /// network call.
    pub async fn lookup(&self, identifier: &str) -> Result<LookupOutcome, Error> {
        let id = parse_identifier(identifier)?;
        debug!(identifier = %id, "Looking up submission");

        match self.api.get_submission(&id).await? {
            Some(data) => Ok(LookupOutcome::Found(parse_scan_result(id, &data))),
            None => Ok(LookupOutcome::NotFound),
        }
    }
}

// =============================================================================
// Threat feed
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedItem {
    pub id: String,
    pub title: String,
    pub status: String,
    pub severity: String,
}

impl FeedItem {
    fn from_value(entry: &Value) -> Self {
        let field = |names: &[&str], missing: &str| {
            names
                .iter()
                .find_map(|name| entry.get(*name).and_then(text_of))
                .unwrap_or_else(|| missing.to_string())
        };

        Self {
            id: field(&["id", "uuid"], "<no id>"),
            title: field(&["title", "summary", "description"], "<no title>"),
            status: field(&["status"], "<no status>"),
            severity: field(&["severity"], "<no severity>"),
        }
    }

    /// One line of the rendered feed.
    pub fn line(&self) -> String {
        format!(
            "- [{}] {} (Status: {}, Severity: {})",
            self.id, self.title, self.status, self.severity
        )
    }
}

fn text_of(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Extract feed entries from the service response: the first of `tickets`,
/// `results` or `data` that is an array, or the response itself when it is
/// an array.
pub fn parse_feed(data: &Value) -> Vec<FeedItem> {
    let entries = match data {
        Value::Array(entries) => Some(entries),
        Value::Object(map) => ["tickets", "results", "data"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_array)),
        _ => None,
    };

    entries
        .map(|entries| entries.iter().map(FeedItem::from_value).collect())
        .unwrap_or_default()
}

pub fn format_feed(items: &[FeedItem]) -> String {
    if items.is_empty() {
        return NO_TICKETS_MSG.to_string();
    }
    let mut lines = vec!["ODIN Threat Feed Summary:".to_string()];
    lines.extend(items.iter().map(FeedItem::line));
    lines.join("\n")
}

pub struct ThreatFeedTool {
    api: Arc<dyn ThreatApi>,
}

impl ThreatFeedTool {
    pub fn new(api: Arc<dyn ThreatApi>) -> Self {
        Self { api }
    }

    /// Retrieve the current feed. Condensing it is the caller's job.
    pub async fn fetch_feed(&self) -> Result<Vec<FeedItem>, Error> {
        let data = self.api.get_feed().await?;
        let items = parse_feed(&data);
        debug!(items = items.len(), "Fetched threat feed");
        Ok(items)
    }
}

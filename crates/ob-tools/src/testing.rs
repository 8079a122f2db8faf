//! In-memory collaborators for tests.
//! Only compiled when running tests or with the `testing` feature.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use ob_core::Error;

use crate::history::{ChannelHistory, HistoryOrder, HistoryPage, MessageRecord, PageRequest};
use crate::threat::ThreatApi;

/// Build a human-authored message record.
pub fn record(
    id: &str,
    author_id: &str,
    author_name: &str,
    text: &str,
    timestamp: DateTime<Utc>,
) -> MessageRecord {
    MessageRecord {
        id: id.to_string(),
        author_id: author_id.to_string(),
        author_name: author_name.to_string(),
        text: text.to_string(),
        timestamp,
        is_bot: false,
    }
}

/// Channel history served from memory, paged by offset.
///
/// `messages` are given oldest first; pages are served in `order`.
pub struct StaticHistory {
    messages: Vec<MessageRecord>,
    order: HistoryOrder,
    page_size: usize,
    pages_served: AtomicUsize,
    failure: Mutex<Option<Error>>,
}

impl StaticHistory {
    pub fn new(messages: Vec<MessageRecord>, order: HistoryOrder) -> Self {
        Self {
            messages,
            order,
            page_size: 100,
            pages_served: AtomicUsize::new(0),
            failure: Mutex::new(None),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Fail the next fetch with `error`.
    pub fn failing(self, error: Error) -> Self {
        *self.failure.lock().unwrap() = Some(error);
        self
    }

    pub fn pages_served(&self) -> usize {
        self.pages_served.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ChannelHistory for StaticHistory {
    async fn fetch_page(&self, request: &PageRequest) -> Result<HistoryPage, Error> {
        if let Some(error) = self.failure.lock().unwrap().take() {
            return Err(error);
        }
        self.pages_served.fetch_add(1, Ordering::SeqCst);

        let mut sequence = self.messages.clone();
        if self.order == HistoryOrder::NewestFirst {
            sequence.reverse();
        }

        let offset: usize = request
            .cursor
            .as_deref()
            .and_then(|c| c.parse().ok())
            .unwrap_or(0);
        let size = self.page_size.min(request.limit.max(1));
        let end = (offset + size).min(sequence.len());
        let start = offset.min(end);

        Ok(HistoryPage {
            messages: sequence[start..end].to_vec(),
            next_cursor: (end < sequence.len()).then(|| end.to_string()),
            order: self.order,
        })
    }
}

/// Threat service served from memory.
pub struct StaticThreatApi {
    submissions: Mutex<HashMap<Uuid, Value>>,
    feed: Mutex<Value>,
    failure: Mutex<Option<Error>>,
    calls: AtomicUsize,
}

impl StaticThreatApi {
    pub fn new() -> Self {
        Self {
            submissions: Mutex::new(HashMap::new()),
            feed: Mutex::new(serde_json::json!({"tickets": []})),
            failure: Mutex::new(None),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn insert_submission(&self, id: &str, record: Value) {
        let id = Uuid::parse_str(id).unwrap();
        self.submissions.lock().unwrap().insert(id, record);
    }

    pub fn with_feed(self, feed: Value) -> Self {
        *self.feed.lock().unwrap() = feed;
        self
    }

    /// Fail the next call with `error`.
    pub fn failing(self, error: Error) -> Self {
        *self.failure.lock().unwrap() = Some(error);
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn begin_call(&self) -> Result<(), Error> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.failure.lock().unwrap().take() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Default for StaticThreatApi {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ThreatApi for StaticThreatApi {
    async fn get_submission(&self, id: &Uuid) -> Result<Option<Value>, Error> {
        self.begin_call()?;
        Ok(self.submissions.lock().unwrap().get(id).cloned())
    }

    async fn get_feed(&self) -> Result<Value, Error> {
        self.begin_call()?;
        Ok(self.feed.lock().unwrap().clone())
    }
}

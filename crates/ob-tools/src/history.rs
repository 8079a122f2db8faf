//! Day-windowed channel history, grouped by author.
//!
//! The aggregator pages through a `ChannelHistory` collaborator and keeps the
//! human-authored messages whose timestamp falls in `[day start, next day
//! start)` of a fixed reference timezone. Paging stops as soon as a page
//! crosses the far edge of the window, in whichever direction the
//! collaborator returns history.

use std::sync::{Arc, OnceLock};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use ob_core::Error;

use crate::command::is_command;

const DEFAULT_PAGE_LIMIT: usize = 100;
const DEFAULT_MAX_PAGES: usize = 500;
const DEFAULT_CALL_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageRecord {
    pub id: String,
    pub author_id: String,
    pub author_name: String,
    pub text: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub is_bot: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryOrder {
    NewestFirst,
    OldestFirst,
}

#[derive(Debug, Clone)]
pub struct PageRequest {
    pub channel_id: String,
    /// Opaque cursor from the previous page; `None` for the first page.
    pub cursor: Option<String>,
    /// Window being collected. Collaborators may use it to seed the first page.
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub limit: usize,
}

#[derive(Debug, Clone)]
pub struct HistoryPage {
    pub messages: Vec<MessageRecord>,
    /// Cursor for the next page; `None` when history is exhausted.
    pub next_cursor: Option<String>,
    pub order: HistoryOrder,
}

/// The channel-history seam.
#[async_trait]
pub trait ChannelHistory: Send + Sync {
    async fn fetch_page(&self, request: &PageRequest) -> Result<HistoryPage, Error>;
}

// =============================================================================
// Day window
// =============================================================================

/// One calendar day in a reference timezone, as a half-open UTC interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DayWindow {
    pub date: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl DayWindow {
    pub fn for_date(date: NaiveDate, tz: Tz) -> Result<Self, Error> {
        let next = date
            .succ_opt()
            .ok_or_else(|| Error::validation(format!("date out of range: {}", date)))?;
        Ok(Self {
            date,
            start: day_start(date, tz)?,
            end: day_start(next, tz)?,
        })
    }

    /// The window containing `instant` in `tz`.
    pub fn containing(instant: DateTime<Utc>, tz: Tz) -> Result<Self, Error> {
        Self::for_date(instant.with_timezone(&tz).date_naive(), tz)
    }

    pub fn contains(&self, timestamp: DateTime<Utc>) -> bool {
        self.start <= timestamp && timestamp < self.end
    }
}

fn day_start(date: NaiveDate, tz: Tz) -> Result<DateTime<Utc>, Error> {
    let midnight = date.and_time(NaiveTime::MIN);
    // A DST change at midnight skips it; the day then starts at the first
    // valid local instant.
    (0..=2)
        .find_map(|hours| {
            tz.from_local_datetime(&(midnight + TimeDelta::hours(hours)))
                .earliest()
        })
        .map(|local| local.with_timezone(&Utc))
        .ok_or_else(|| Error::validation(format!("no local midnight for {} in {}", date, tz)))
}

// =============================================================================
// Author groups
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorGroup {
    pub author_id: String,
    pub author_name: String,
    /// Chronological.
    pub messages: Vec<MessageRecord>,
}

/// Author groups ordered by each author's first message in the window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthorGroups {
    groups: Vec<AuthorGroup>,
}

impl AuthorGroups {
    fn from_messages(messages: Vec<MessageRecord>) -> Self {
        let mut groups: Vec<AuthorGroup> = Vec::new();
        for message in messages {
            match groups.iter_mut().find(|g| g.author_id == message.author_id) {
                Some(group) => group.messages.push(message),
                None => groups.push(AuthorGroup {
                    author_id: message.author_id.clone(),
                    author_name: message.author_name.clone(),
                    messages: vec![message],
                }),
            }
        }
        Self { groups }
    }

    pub fn get(&self, author_id: &str) -> Option<&AuthorGroup> {
        self.groups.iter().find(|g| g.author_id == author_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &AuthorGroup> {
        self.groups.iter()
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    pub fn message_count(&self) -> usize {
        self.groups.iter().map(|g| g.messages.len()).sum()
    }

    pub fn into_groups(self) -> Vec<AuthorGroup> {
        self.groups
    }

    /// Keep only the author matching `filter` by id or display name
    /// (case-insensitive, leading `@` ignored).
    fn retain_author(&mut self, filter: &str) {
        let wanted = filter.trim().trim_start_matches('@');
        self.groups.retain(|g| {
            g.author_id == wanted || g.author_name.eq_ignore_ascii_case(wanted)
        });
        self.groups.truncate(1);
    }
}

// =============================================================================
// Aggregator
// =============================================================================

fn mention_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<@!?\d+>").ok()).as_ref()
}

/// Remove user-mention tokens (`<@id>`, `<@!id>`) and trim.
pub fn strip_mentions(text: &str) -> String {
    match mention_regex() {
        Some(re) => re.replace_all(text, "").trim().to_string(),
        None => text.trim().to_string(),
    }
}

pub struct HistoryAggregator {
    history: Arc<dyn ChannelHistory>,
    timezone: Tz,
    bot_user_id: Option<String>,
    command_prefixes: Vec<String>,
    page_limit: usize,
    max_pages: usize,
    call_timeout: Duration,
}

impl HistoryAggregator {
    pub fn new(history: Arc<dyn ChannelHistory>, timezone: Tz) -> Self {
        Self {
            history,
            timezone,
            bot_user_id: None,
            command_prefixes: vec!["/".to_string(), "!".to_string()],
            page_limit: DEFAULT_PAGE_LIMIT,
            max_pages: DEFAULT_MAX_PAGES,
            call_timeout: Duration::from_secs(DEFAULT_CALL_TIMEOUT_SECS),
        }
    }

    pub fn with_bot_user_id(mut self, bot_user_id: Option<String>) -> Self {
        self.bot_user_id = bot_user_id;
        self
    }

    pub fn with_command_prefixes(mut self, prefixes: Vec<String>) -> Self {
        self.command_prefixes = prefixes;
        self
    }

    pub fn with_page_limit(mut self, page_limit: usize) -> Self {
        self.page_limit = page_limit.max(1);
        self
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    /// Collect the qualifying messages of `date` in `channel_id`, grouped by
    /// author. An author filter matching nobody yields empty groups.
    pub async fn collect(
        &self,
        channel_id: &str,
        date: NaiveDate,
        author_filter: Option<&str>,
    ) -> Result<AuthorGroups, Error> {
        let window = DayWindow::for_date(date, self.timezone)?;
        let mut collected = Vec::new();
        let mut cursor = None;
        let mut order = HistoryOrder::NewestFirst;

        for page_number in 0..self.max_pages {
            let request = PageRequest {
                channel_id: channel_id.to_string(),
                cursor: cursor.take(),
                window_start: window.start,
                window_end: window.end,
                limit: self.page_limit,
            };
            let page = tokio::time::timeout(self.call_timeout, self.history.fetch_page(&request))
                .await
                .map_err(|_| {
                    Error::timeout(format!(
                        "channel history fetch exceeded {}s",
                        self.call_timeout.as_secs()
                    ))
                })??;

            order = page.order;
            let passed_window = page.messages.iter().any(|m| match page.order {
                HistoryOrder::NewestFirst => m.timestamp < window.start,
                HistoryOrder::OldestFirst => m.timestamp >= window.end,
            });
            debug!(
                channel = %channel_id,
                page = page_number,
                messages = page.messages.len(),
                passed_window,
                "Fetched history page"
            );

            collected.extend(
                page.messages
                    .into_iter()
                    .filter(|m| window.contains(m.timestamp) && self.qualifies(m)),
            );

            match page.next_cursor {
                Some(next) if !passed_window => cursor = Some(next),
                _ => break,
            }
            if page_number + 1 == self.max_pages {
                warn!(channel = %channel_id, pages = self.max_pages, "History page limit reached");
            }
        }

        if order == HistoryOrder::NewestFirst {
            collected.reverse();
        }
        collected.sort_by_key(|m| m.timestamp);

        let mut groups = AuthorGroups::from_messages(collected);
        if let Some(filter) = author_filter {
            groups.retain_author(filter);
        }
        debug!(
            channel = %channel_id,
            date = %date,
            authors = groups.len(),
            messages = groups.message_count(),
            "Collected channel history"
        );
        Ok(groups)
    }

    fn qualifies(&self, message: &MessageRecord) -> bool {
        if message.is_bot || self.bot_user_id.as_deref() == Some(message.author_id.as_str()) {
            return false;
        }
        // attachment- or embed-only posts carry no text to summarize
        if message.text.trim().is_empty() {
            return false;
        }
        !is_command(&message.text, &self.command_prefixes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{record, StaticHistory};

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 20).unwrap()
    }

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
    }

    fn sample_history() -> Vec<MessageRecord> {
        vec![
            record("1", "u1", "alice", "too early", at("2024-03-19T23:59:59Z")),
            record("2", "u1", "alice", "first", at("2024-03-20T00:00:00Z")),
            record("3", "u2", "bob", "hello", at("2024-03-20T08:15:00Z")),
            record("4", "u1", "alice", "second", at("2024-03-20T12:00:00Z")),
            record("5", "u2", "bob", "/check abc", at("2024-03-20T13:00:00Z")),
            record("6", "u2", "bob", "last", at("2024-03-20T23:59:59Z")),
            record("7", "u1", "alice", "too late", at("2024-03-21T00:00:00Z")),
        ]
    }

    #[test]
    fn test_day_window_utc() {
        let window = DayWindow::for_date(date(), Tz::UTC).unwrap();
        assert_eq!(window.start, at("2024-03-20T00:00:00Z"));
        assert_eq!(window.end, at("2024-03-21T00:00:00Z"));
        assert!(window.contains(window.start));
        assert!(!window.contains(window.end));
    }

    #[test]
    fn test_day_window_other_timezone() {
        let window = DayWindow::for_date(date(), chrono_tz::America::New_York).unwrap();
        assert_eq!(window.start, at("2024-03-20T04:00:00Z"));
        assert_eq!(window.end, at("2024-03-21T04:00:00Z"));

        let window = DayWindow::containing(at("2024-03-21T02:00:00Z"), chrono_tz::America::New_York)
            .unwrap();
        assert_eq!(window.date, date());
    }

    #[test]
    fn test_day_window_skipped_midnight() {
        // Santiago springs forward at local midnight on 2024-09-08.
        let tz = chrono_tz::America::Santiago;
        let day = NaiveDate::from_ymd_opt(2024, 9, 8).unwrap();

        let window = DayWindow::for_date(day, tz).unwrap();
        assert_eq!(window.start, at("2024-09-08T04:00:00Z"));

        let previous = DayWindow::for_date(day.pred_opt().unwrap(), tz).unwrap();
        assert_eq!(previous.start, at("2024-09-07T04:00:00Z"));
        assert_eq!(previous.end, window.start);
    }

    #[test]
    fn test_day_window_fall_back_day() {
        // New York repeats 01:00-02:00 local on 2024-11-03.
        let tz = chrono_tz::America::New_York;
        let day = NaiveDate::from_ymd_opt(2024, 11, 3).unwrap();
        let windows: Vec<_> = [day.pred_opt().unwrap(), day, day.succ_opt().unwrap()]
            .into_iter()
            .map(|d| DayWindow::for_date(d, tz).unwrap())
            .collect();

        assert_eq!(windows[1].start, at("2024-11-03T04:00:00Z"));
        assert_eq!(windows[1].end, at("2024-11-04T05:00:00Z"));
        assert_eq!(windows[0].end, windows[1].start);
        assert_eq!(windows[1].end, windows[2].start);

        // both local 01:30s, plus each edge
        for instant in [
            at("2024-11-03T05:30:00Z"),
            at("2024-11-03T06:30:00Z"),
            at("2024-11-03T04:00:00Z"),
            at("2024-11-04T05:00:00Z"),
        ] {
            let hits = windows.iter().filter(|w| w.contains(instant)).count();
            assert_eq!(hits, 1, "{} is in {} windows", instant, hits);
        }
    }

    #[test]
    fn test_strip_mentions() {
        assert_eq!(strip_mentions("<@123> /check x"), "/check x");
        assert_eq!(strip_mentions("hi <@!42> there"), "hi  there");
    }

    #[tokio::test]
    async fn test_collect_window_boundaries() {
        for order in [HistoryOrder::NewestFirst, HistoryOrder::OldestFirst] {
            let history = Arc::new(StaticHistory::new(sample_history(), order).with_page_size(2));
            let aggregator = HistoryAggregator::new(history, Tz::UTC);

            let groups = aggregator.collect("c1", date(), None).await.unwrap();
            let texts: Vec<_> = groups
                .iter()
                .flat_map(|g| g.messages.iter().map(|m| m.text.as_str()))
                .collect();

            assert_eq!(texts, vec!["first", "second", "hello", "last"]);
            assert_eq!(groups.len(), 2);
            assert_eq!(groups.iter().next().unwrap().author_name, "alice");
        }
    }

    #[tokio::test]
    async fn test_collect_stops_after_passing_window() {
        let mut messages = sample_history();
        for i in 0..20 {
            messages.insert(
                0,
                record(&format!("old{}", i), "u3", "carol", "old", at("2024-03-01T10:00:00Z")),
            );
        }
        let history = Arc::new(
            StaticHistory::new(messages, HistoryOrder::NewestFirst).with_page_size(3),
        );
        let aggregator = HistoryAggregator::new(history.clone(), Tz::UTC);

        let groups = aggregator.collect("c1", date(), None).await.unwrap();
        assert_eq!(groups.message_count(), 4);
        // 27 messages at 3 per page would be 9 pages without the early stop
        assert_eq!(history.pages_served(), 3);
    }

    #[tokio::test]
    async fn test_collect_excludes_bots() {
        let mut messages = sample_history();
        let mut bot = record("8", "bot", "odinbot", "beep", at("2024-03-20T09:00:00Z"));
        bot.is_bot = true;
        messages.push(bot);
        messages.push(record("9", "me", "odinbot", "reply", at("2024-03-20T09:30:00Z")));
        messages.push(record("10", "u2", "bob", "<@99> !health", at("2024-03-20T10:00:00Z")));

        let history = Arc::new(StaticHistory::new(messages, HistoryOrder::OldestFirst));
        let aggregator =
            HistoryAggregator::new(history, Tz::UTC).with_bot_user_id(Some("me".to_string()));

        let groups = aggregator.collect("c1", date(), None).await.unwrap();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups.message_count(), 4);
    }

    #[tokio::test]
    async fn test_collect_keeps_prefixed_chatter() {
        let messages = vec![
            record("1", "u1", "alice", "!!! prod is down, rolling back", at("2024-03-20T09:00:00Z")),
            record("2", "u1", "alice", "/r/rust has a good thread", at("2024-03-20T09:10:00Z")),
            record(
                "3",
                "u1",
                "alice",
                "/check 123e4567-e89b-12d3-a456-426614174000",
                at("2024-03-20T09:20:00Z"),
            ),
        ];
        let history = Arc::new(StaticHistory::new(messages, HistoryOrder::OldestFirst));
        let aggregator = HistoryAggregator::new(history, Tz::UTC);

        let groups = aggregator.collect("c1", date(), None).await.unwrap();
        let alice = groups.get("u1").unwrap();
        assert_eq!(alice.messages.len(), 2);
        assert!(alice.messages.iter().all(|m| !m.text.starts_with("/check")));
    }

    #[tokio::test]
    async fn test_collect_skips_textless_messages() {
        let mut messages = sample_history();
        messages.push(record("11", "u1", "alice", "", at("2024-03-20T15:00:00Z")));
        messages.push(record("12", "u1", "alice", "  \n ", at("2024-03-20T15:05:00Z")));
        let history = Arc::new(StaticHistory::new(messages, HistoryOrder::OldestFirst));
        let aggregator = HistoryAggregator::new(history, Tz::UTC);

        let groups = aggregator.collect("c1", date(), None).await.unwrap();
        assert_eq!(groups.get("u1").unwrap().messages.len(), 2);
        assert_eq!(groups.message_count(), 4);
    }

    #[tokio::test]
    async fn test_collect_author_filter_is_subset() {
        let history = Arc::new(StaticHistory::new(sample_history(), HistoryOrder::NewestFirst));
        let aggregator = HistoryAggregator::new(history, Tz::UTC);

        let all = aggregator.collect("c1", date(), None).await.unwrap();
        let bob = aggregator.collect("c1", date(), Some("@Bob")).await.unwrap();
        assert_eq!(bob.len(), 1);
        assert_eq!(bob.get("u2"), all.get("u2"));

        let by_id = aggregator.collect("c1", date(), Some("u1")).await.unwrap();
        assert_eq!(by_id.get("u1"), all.get("u1"));

        let nobody = aggregator.collect("c1", date(), Some("dave")).await.unwrap();
        assert!(nobody.is_empty());
    }

    #[tokio::test]
    async fn test_collect_propagates_history_failure() {
        let history = Arc::new(
            StaticHistory::new(sample_history(), HistoryOrder::NewestFirst)
                .failing(Error::network("gateway down")),
        );
        let aggregator = HistoryAggregator::new(history, Tz::UTC);

        let err = aggregator.collect("c1", date(), None).await.unwrap_err();
        assert!(err.is_upstream());
    }
}

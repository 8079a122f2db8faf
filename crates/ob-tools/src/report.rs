//! Daily report assembly, persistence and chat rendering.
//!
//! One artifact exists per date. Writes for the same date are serialized
//! through a per-date async mutex and land via a temporary sibling file that
//! is renamed over the artifact, so readers never observe a partial report.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use chrono_tz::Tz;
use tracing::info;
use uuid::Uuid;

use ob_core::Error;

/// Outcome of summarizing one author's messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TopicOutcome {
    Summary(String),
    Unavailable { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerAuthorSummary {
    pub author_id: String,
    pub author_name: String,
    pub message_count: usize,
    pub outcome: TopicOutcome,
}

impl PerAuthorSummary {
    pub fn is_available(&self) -> bool {
        matches!(self.outcome, TopicOutcome::Summary(_))
    }

    pub fn topic(&self) -> String {
        match &self.outcome {
            TopicOutcome::Summary(topic) => topic.clone(),
            TopicOutcome::Unavailable { .. } => {
                format!("summary unavailable for {}", self.author_name)
            }
        }
    }

    pub fn line(&self) -> String {
        let noun = if self.message_count == 1 {
            "message"
        } else {
            "messages"
        };
        format!(
            "**{}**: {} ({} {})",
            self.author_name,
            self.topic(),
            self.message_count,
            noun
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DailyReport {
    pub date: NaiveDate,
    pub channel_id: String,
    pub timezone: String,
    pub header: String,
    pub summaries: Vec<PerAuthorSummary>,
}

impl DailyReport {
    /// Merge per-author summaries into a report. Failed summaries stay in
    /// place as placeholders.
    pub fn assemble(
        date: NaiveDate,
        channel_id: impl Into<String>,
        timezone: Tz,
        summaries: Vec<PerAuthorSummary>,
    ) -> Self {
        Self {
            date,
            channel_id: channel_id.into(),
            timezone: timezone.name().to_string(),
            header: format!("📊 Summary for {}", date.format("%Y-%m-%d")),
            summaries,
        }
    }

    pub fn failed_count(&self) -> usize {
        self.summaries.iter().filter(|s| !s.is_available()).count()
    }

    /// Full artifact text: header, context line, one section per author.
    pub fn to_text(&self) -> String {
        let mut text = format!(
            "{}\nChannel: {} | Timezone: {}\n",
            self.header, self.channel_id, self.timezone
        );
        for summary in &self.summaries {
            text.push('\n');
            text.push_str(&summary.line());
            if let TopicOutcome::Unavailable { reason } = &summary.outcome {
                text.push_str(&format!("\n  reason: {}", reason));
            }
            text.push('\n');
        }
        text
    }
}

// =============================================================================
// Store
// =============================================================================

pub struct ReportStore {
    dir: PathBuf,
    locks: Mutex<HashMap<NaiveDate, Arc<tokio::sync::Mutex<()>>>>,
}

impl ReportStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, date: NaiveDate) -> PathBuf {
        self.dir.join(format!(
            "discord_daily_summary_{}.txt",
            date.format("%Y-%m-%d")
        ))
    }

    fn lock_for(&self, date: NaiveDate) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(date).or_default().clone()
    }

    /// Drop the date's lock entry once no other writer holds or awaits it.
    fn release(&self, date: NaiveDate, lock: Arc<tokio::sync::Mutex<()>>) {
        drop(lock);
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.get(&date).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&date);
        }
    }

    /// Write `report` as the artifact for its date, replacing any earlier one.
    pub async fn persist(&self, report: &DailyReport) -> Result<PathBuf, Error> {
        let lock = self.lock_for(report.date);
        let result = {
            let _guard = lock.lock().await;
            self.write_artifact(report).await
        };
        self.release(report.date, lock);
        result
    }

    async fn write_artifact(&self, report: &DailyReport) -> Result<PathBuf, Error> {
        tokio::fs::create_dir_all(&self.dir).await.map_err(|e| {
            Error::io(format!("creating report directory {}: {}", self.dir.display(), e))
        })?;

        let path = self.path_for(report.date);
        let tmp = self.dir.join(format!(
            ".{}.{}.tmp",
            report.date.format("%Y-%m-%d"),
            Uuid::new_v4().simple()
        ));

        if let Err(e) = tokio::fs::write(&tmp, report.to_text()).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::io(format!("writing {}: {}", tmp.display(), e)));
        }
        if let Err(e) = tokio::fs::rename(&tmp, &path).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::io(format!("replacing {}: {}", path.display(), e)));
        }

        info!(
            date = %report.date,
            path = %path.display(),
            authors = report.summaries.len(),
            "Persisted daily report"
        );
        Ok(path)
    }
}

// =============================================================================
// Rendering
// =============================================================================

/// Render the chat digest for `report`, bounded to `max_chars` characters.
///
/// When the full digest does not fit, whole author lines are dropped from
/// the end and replaced by a note that says how many are missing and where
/// the full report lives.
pub fn render(report: &DailyReport, artifact: &Path, max_chars: usize) -> String {
    let lines: Vec<String> = report.summaries.iter().map(PerAuthorSummary::line).collect();
    let footer = format!("\n\nSummary saved to: `{}`", artifact.display());

    let full = format!("{}\n\n{}{}", report.header, lines.join("\n"), footer);
    if full.chars().count() <= max_chars {
        return full;
    }

    let total = lines.len();
    let note = |shown: usize| {
        format!(
            "\n\n(Truncated: showing {} of {} authors. Full report saved to: `{}`)",
            shown,
            total,
            artifact.display()
        )
    };
    let reserved = note(total).chars().count();
    let budget = max_chars.saturating_sub(reserved);

    let mut out = format!("{}\n", report.header);
    let mut used = out.chars().count();
    let mut shown = 0;
    for line in &lines {
        let cost = line.chars().count() + 1;
        if used + cost > budget {
            break;
        }
        out.push('\n');
        out.push_str(line);
        used += cost;
        shown += 1;
    }

    out.push_str(&note(shown));
    truncate_chars(&out, max_chars)
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => text[..idx].to_string(),
        None => text.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 20).unwrap()
    }

    fn summary(name: &str, count: usize, topic: &str) -> PerAuthorSummary {
        PerAuthorSummary {
            author_id: format!("id-{}", name),
            author_name: name.to_string(),
            message_count: count,
            outcome: TopicOutcome::Summary(topic.to_string()),
        }
    }

    fn failed(name: &str, count: usize) -> PerAuthorSummary {
        PerAuthorSummary {
            author_id: format!("id-{}", name),
            author_name: name.to_string(),
            message_count: count,
            outcome: TopicOutcome::Unavailable {
                reason: "Network error: connection reset".to_string(),
            },
        }
    }

    #[test]
    fn test_assemble_keeps_failure_placeholder() {
        let report = DailyReport::assemble(
            date(),
            "c1",
            Tz::UTC,
            vec![
                summary("alice", 3, "release planning"),
                failed("bob", 2),
                summary("carol", 1, "CI flakes"),
            ],
        );

        assert_eq!(report.summaries.len(), 3);
        assert_eq!(report.failed_count(), 1);
        let text = report.to_text();
        assert!(text.contains("**alice**: release planning (3 messages)"));
        assert!(text.contains("**bob**: summary unavailable for bob (2 messages)"));
        assert!(text.contains("**carol**: CI flakes (1 message)"));
        assert!(text.starts_with("📊 Summary for 2024-03-20"));
    }

    #[tokio::test]
    async fn test_persist_overwrites_same_date() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path().join("logs"));

        let first = DailyReport::assemble(date(), "c1", Tz::UTC, vec![summary("alice", 1, "one")]);
        let second = DailyReport::assemble(date(), "c1", Tz::UTC, vec![summary("bob", 2, "two")]);

        let path = store.persist(&first).await.unwrap();
        let again = store.persist(&second).await.unwrap();
        assert_eq!(path, again);
        assert!(path.ends_with("discord_daily_summary_2024-03-20.txt"));

        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content, second.to_text());
        assert!(!content.contains("alice"));

        let entries = std::fs::read_dir(store.dir()).unwrap().count();
        assert_eq!(entries, 1);
    }

    #[tokio::test]
    async fn test_concurrent_persist_same_date_is_whole() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(ReportStore::new(dir.path()));

        let reports: Vec<DailyReport> = (0..8)
            .map(|i| {
                let topic = "x".repeat(2_000 + i);
                DailyReport::assemble(date(), "c1", Tz::UTC, vec![summary("alice", i, &topic)])
            })
            .collect();

        let handles: Vec<_> = reports
            .iter()
            .cloned()
            .map(|report| {
                let store = store.clone();
                tokio::spawn(async move { store.persist(&report).await })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        let content = std::fs::read_to_string(store.path_for(date())).unwrap();
        assert!(reports.iter().any(|r| r.to_text() == content));
        assert!(store.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_date_locks_are_released() {
        let dir = tempfile::tempdir().unwrap();
        let store = ReportStore::new(dir.path());

        for day in 1..=5 {
            let date = NaiveDate::from_ymd_opt(2024, 3, day).unwrap();
            let report = DailyReport::assemble(date, "c1", Tz::UTC, vec![summary("alice", 1, "x")]);
            store.persist(&report).await.unwrap();
        }
        assert!(store.locks.lock().unwrap().is_empty());

        // a failed write releases its lock too
        let blocked = tempfile::NamedTempFile::new().unwrap();
        let store = ReportStore::new(blocked.path().join("reports"));
        let report = DailyReport::assemble(date(), "c1", Tz::UTC, vec![summary("alice", 1, "x")]);
        assert!(store.persist(&report).await.is_err());
        assert!(store.locks.lock().unwrap().is_empty());
    }

    #[test]
    fn test_render_fits() {
        let report = DailyReport::assemble(
            date(),
            "c1",
            Tz::UTC,
            vec![summary("alice", 2, "deploys"), failed("bob", 1)],
        );
        let text = render(&report, Path::new("logs/x.txt"), 2000);

        assert!(text.starts_with("📊 Summary for 2024-03-20\n\n**alice**: deploys (2 messages)"));
        assert!(text.contains("summary unavailable for bob"));
        assert!(text.ends_with("Summary saved to: `logs/x.txt`"));
    }

    #[test]
    fn test_render_truncates_with_note() {
        let summaries = (0..50)
            .map(|i| summary(&format!("user{}", i), 1, &"é".repeat(60)))
            .collect();
        let report = DailyReport::assemble(date(), "c1", Tz::UTC, summaries);
        let text = render(&report, Path::new("logs/x.txt"), 500);

        assert!(text.chars().count() <= 500);
        assert!(text.contains("**user0**"));
        assert!(!text.contains("**user49**"));
        assert!(text.contains("of 50 authors"));
        assert!(text.ends_with("Full report saved to: `logs/x.txt`)"));
    }
}

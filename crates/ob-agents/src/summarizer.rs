//! Per-author topic summaries.

use std::sync::Arc;

use chrono_tz::Tz;
use futures::future::join_all;
use tracing::{debug, warn};

use ob_core::{ChunkProcessor, ChunkerConfig, Error, Provider};
use ob_tools::{AuthorGroup, PerAuthorSummary, TopicOutcome};

const TOPIC_INSTRUCTION: &str = r#"You read the Discord messages one user posted in a channel on a single day, one message per line as "[HH:MM] text".

Identify the main topic of concern across these messages and reply with it as a short phrase of at most 15 words. If the messages cover several unrelated subjects, name the most recurring one and add "and other topics".

Reply with the phrase only: no quotes, no preamble, no mention of the user's name. Never add information that is not in the messages."#;

/// Summarizes one author's messages into a topic phrase. Payloads over the
/// configured size are chunked at message boundaries and merged.
pub struct PerAuthorSummarizer {
    processor: ChunkProcessor,
    timezone: Tz,
}

impl PerAuthorSummarizer {
    pub fn new(provider: Arc<dyn Provider>, config: ChunkerConfig, timezone: Tz) -> Self {
        Self {
            processor: ChunkProcessor::new(provider, config),
            timezone,
        }
    }

    pub fn with_model(mut self, model: Option<String>) -> Self {
        if let Some(model) = model {
            self.processor = self.processor.with_model(model);
        }
        self
    }

    pub async fn summarize(&self, group: &AuthorGroup) -> Result<String, Error> {
        let units: Vec<String> = group
            .messages
            .iter()
            .map(|m| {
                format!(
                    "[{}] {}",
                    m.timestamp.with_timezone(&self.timezone).format("%H:%M"),
                    single_line(&m.text)
                )
            })
            .collect();

        debug!(
            author = %group.author_name,
            messages = units.len(),
            "Summarizing author"
        );
        let topic = self.processor.condense(&units, TOPIC_INSTRUCTION).await?;
        Ok(single_line(&topic))
    }

    /// Summarize every group concurrently. A failure for one author becomes
    /// an `Unavailable` entry and never affects the others.
    pub async fn summarize_all<'a, I>(&self, groups: I) -> Vec<PerAuthorSummary>
    where
        I: IntoIterator<Item = &'a AuthorGroup>,
    {
        let tasks = groups
            .into_iter()
            .filter(|g| !g.messages.is_empty())
            .map(|group| async move {
                let outcome = match self.summarize(group).await {
                    Ok(topic) => TopicOutcome::Summary(topic),
                    Err(e) => {
                        warn!(author = %group.author_name, error = %e, "Author summary failed");
                        TopicOutcome::Unavailable {
                            reason: e.to_string(),
                        }
                    }
                };
                PerAuthorSummary {
                    author_id: group.author_id.clone(),
                    author_name: group.author_name.clone(),
                    message_count: group.messages.len(),
                    outcome,
                }
            });

        join_all(tasks).await
    }
}

fn single_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};
    use ob_core::testing::{text_response, MockProvider};
    use ob_tools::testing::record;

    fn at(rfc3339: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(rfc3339).unwrap().with_timezone(&Utc)
    }

    fn group(id: &str, name: &str, texts: &[&str]) -> AuthorGroup {
        AuthorGroup {
            author_id: id.to_string(),
            author_name: name.to_string(),
            messages: texts
                .iter()
                .enumerate()
                .map(|(i, t)| record(&format!("{}-{}", id, i), id, name, t, at("2024-03-20T09:05:00Z")))
                .collect(),
        }
    }

    #[tokio::test]
    async fn test_summarize_formats_payload() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_response("  Release\nplanning  ");
        let summarizer = PerAuthorSummarizer::new(
            provider.clone(),
            ChunkerConfig::default(),
            chrono_tz::Europe::Berlin,
        );

        let topic = summarizer
            .summarize(&group("u1", "alice", &["ship it\ntoday", "tag v2"]))
            .await
            .unwrap();

        assert_eq!(topic, "Release planning");
        let request = provider.last_request().unwrap();
        assert_eq!(request.messages[1].content, "[10:05] ship it today\n[10:05] tag v2");
        assert_eq!(request.max_tokens, Some(300));
    }

    #[tokio::test]
    async fn test_summarize_all_isolates_failures() {
        let provider = Arc::new(MockProvider::with_responder(|request| {
            if request.messages[1].content.contains("boom") {
                Err(Error::network("connection reset"))
            } else {
                Ok(text_response("deploys"))
            }
        }));
        let summarizer = PerAuthorSummarizer::new(provider, ChunkerConfig::default(), Tz::UTC);

        let groups = vec![
            group("u1", "alice", &["deploy"]),
            group("u2", "bob", &["boom"]),
            group("u3", "carol", &["deploy again", "and again"]),
            group("u4", "dave", &[]),
        ];
        let summaries = summarizer.summarize_all(&groups).await;

        assert_eq!(summaries.len(), 3);
        assert_eq!(summaries[0].outcome, TopicOutcome::Summary("deploys".to_string()));
        assert!(!summaries[1].is_available());
        assert_eq!(summaries[1].topic(), "summary unavailable for bob");
        assert_eq!(summaries[2].message_count, 2);
    }

    #[tokio::test]
    async fn test_summarize_chunks_long_history() {
        let provider = Arc::new(MockProvider::with_responder(|request| {
            let payload = &request.messages[1].content;
            if payload.contains("### Part") {
                Ok(text_response("merged topic"))
            } else {
                Ok(text_response("partial topic"))
            }
        }));
        let config = ChunkerConfig::new().with_threshold(100).with_chunk_size(60);
        let summarizer = PerAuthorSummarizer::new(provider.clone(), config, Tz::UTC);

        let texts: Vec<String> = (0..6).map(|i| format!("message number {} {}", i, "x".repeat(20))).collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let topic = summarizer.summarize(&group("u1", "alice", &refs)).await.unwrap();

        assert_eq!(topic, "merged topic");
        assert!(provider.request_count() > 2);
        for request in provider.requests() {
            let payload = &request.messages[1].content;
            if !payload.contains("### Part") {
                // every chunk holds whole messages only
                assert!(payload.lines().all(|l| l.starts_with("[09:05] message number")));
            }
        }
    }
}

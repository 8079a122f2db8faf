//! Chunk-and-merge processing for payloads too large for one completion.
//!
//! Input arrives as a list of units (chat messages, feed lines). When the
//! joined payload exceeds the configured threshold, this module:
//! 1. Packs units into chunks without ever splitting a unit
//! 2. Condenses each chunk with the LLM
//! 3. Merges the partial results in a final pass

use std::sync::Arc;

use futures::future::try_join_all;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::Error;
use crate::message::Message;
use crate::provider::{CompletionRequest, Provider};

/// Configuration for the chunk processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    /// Payload size (in bytes) above which content is chunked.
    #[serde(default = "default_threshold_bytes")]
    pub threshold_bytes: usize,

    /// Target size for each chunk (in bytes).
    #[serde(default = "default_chunk_size_bytes")]
    pub chunk_size_bytes: usize,

    /// Completion token budget for each call.
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Process chunks in parallel.
    #[serde(default = "default_parallel")]
    pub parallel: bool,
}

fn default_threshold_bytes() -> usize {
    12_000
}

fn default_chunk_size_bytes() -> usize {
    6_000
}

fn default_max_tokens() -> u32 {
    300
}

fn default_parallel() -> bool {
    true
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            threshold_bytes: default_threshold_bytes(),
            chunk_size_bytes: default_chunk_size_bytes(),
            max_tokens: default_max_tokens(),
            parallel: default_parallel(),
        }
    }
}

impl ChunkerConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the threshold in bytes.
    pub fn with_threshold(mut self, threshold_bytes: usize) -> Self {
        self.threshold_bytes = threshold_bytes;
        self
    }

    /// Set the chunk size in bytes.
    pub fn with_chunk_size(mut self, chunk_size_bytes: usize) -> Self {
        self.chunk_size_bytes = chunk_size_bytes;
        self
    }

    /// Set the per-call completion token budget.
    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    /// Set whether to process chunks in parallel.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }
}

/// Pack units into newline-joined chunks of at most `target_bytes`.
///
/// A unit is never split: one larger than the target becomes a chunk of its
/// own. Unit order is preserved.
pub fn chunk_units<S: AsRef<str>>(units: &[S], target_bytes: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();

    for unit in units {
        let unit = unit.as_ref();
        if !current.is_empty() && current.len() + unit.len() + 1 > target_bytes {
            chunks.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push('\n');
        }
        current.push_str(unit);
    }

    if !current.is_empty() {
        chunks.push(current);
    }

    chunks
}

fn joined_len<S: AsRef<str>>(units: &[S]) -> usize {
    let bytes: usize = units.iter().map(|u| u.as_ref().len()).sum();
    bytes + units.len().saturating_sub(1)
}

/// Processor for condensing content, chunking it first when it is too large.
pub struct ChunkProcessor {
    provider: Arc<dyn Provider>,
    config: ChunkerConfig,
    model: Option<String>,
}

impl ChunkProcessor {
    /// Create a new chunk processor.
    pub fn new(provider: Arc<dyn Provider>, config: ChunkerConfig) -> Self {
        Self {
            provider,
            config,
            model: None,
        }
    }

    /// Use a specific model instead of the provider default.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Check if the content should be chunked based on size threshold.
    pub fn should_chunk(&self, content: &str) -> bool {
        content.len() > self.config.threshold_bytes
    }

    /// Condense `units` according to `instruction`.
    ///
    /// Small payloads take exactly one completion call. Larger payloads take
    /// one call per chunk plus merge calls. Any failed call fails the whole
    /// operation.
    pub async fn condense<S: AsRef<str>>(
        &self,
        units: &[S],
        instruction: &str,
    ) -> Result<String, Error> {
        if joined_len(units) <= self.config.threshold_bytes {
            let payload = units
                .iter()
                .map(|u| u.as_ref())
                .collect::<Vec<_>>()
                .join("\n");
            return self.complete(instruction, &payload).await;
        }

        let chunks = chunk_units(units, self.config.chunk_size_bytes);
        debug!(
            units = units.len(),
            chunks = chunks.len(),
            "Payload over threshold, condensing in chunks"
        );
        let mut partials = self.condense_chunks(&chunks, instruction).await?;

        // Partials can themselves be too large to merge in one call.
        while partials.len() > 1 && joined_len(&partials) > self.config.threshold_bytes {
            let regrouped = chunk_units(&partials, self.config.chunk_size_bytes);
            if regrouped.len() >= partials.len() {
                break;
            }
            partials = self.merge_chunks(&regrouped, instruction).await?;
        }

        if partials.len() == 1 {
            return Ok(partials.remove(0));
        }

        let merged = partials
            .iter()
            .enumerate()
            .map(|(i, p)| format!("### Part {} of {}\n{}", i + 1, partials.len(), p))
            .collect::<Vec<_>>()
            .join("\n\n");
        self.complete(&merge_instruction(instruction), &merged).await
    }

    async fn condense_chunks(
        &self,
        chunks: &[String],
        instruction: &str,
    ) -> Result<Vec<String>, Error> {
        let total = chunks.len();
        let prompts: Vec<String> = (0..total)
            .map(|i| {
                format!(
                    "{}\n\nThe material is long, so you are seeing part {} of {}. \
                     Work only from this part.",
                    instruction,
                    i + 1,
                    total
                )
            })
            .collect();
        self.run_all(&prompts, chunks).await
    }

    async fn merge_chunks(
        &self,
        groups: &[String],
        instruction: &str,
    ) -> Result<Vec<String>, Error> {
        let prompt = merge_instruction(instruction);
        let prompts = vec![prompt; groups.len()];
        self.run_all(&prompts, groups).await
    }

    async fn run_all(&self, prompts: &[String], payloads: &[String]) -> Result<Vec<String>, Error> {
        if self.config.parallel {
            let futures = prompts
                .iter()
                .zip(payloads)
                .map(|(prompt, payload)| self.complete(prompt, payload));
            try_join_all(futures).await
        } else {
            let mut results = Vec::with_capacity(payloads.len());
            for (prompt, payload) in prompts.iter().zip(payloads) {
                results.push(self.complete(prompt, payload).await?);
            }
            Ok(results)
        }
    }

    async fn complete(&self, instruction: &str, payload: &str) -> Result<String, Error> {
        let messages = vec![Message::system(instruction), Message::user(payload)];
        let mut request = CompletionRequest::new(messages).with_max_tokens(self.config.max_tokens);

        if let Some(model) = self.model.as_deref().or(self.provider.default_model()) {
            request = request.with_model(model);
        }

        let response = self.provider.complete(request).await?;
        let text = response.text();
        if text.is_empty() {
            return Err(Error::api(502, "Completion returned no text"));
        }
        Ok(text.to_string())
    }

    /// Get the current configuration.
    pub fn config(&self) -> &ChunkerConfig {
        &self.config
    }
}

fn merge_instruction(instruction: &str) -> String {
    format!(
        "{}\n\nThe material was too long to process at once. Below are partial \
         results for consecutive parts of it. Merge them into one final answer \
         in the same format, without mentioning the parts.",
        instruction
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockProvider;

    #[test]
    fn test_chunker_config_defaults() {
        let config = ChunkerConfig::default();
        assert_eq!(config.threshold_bytes, 12_000);
        assert_eq!(config.chunk_size_bytes, 6_000);
        assert_eq!(config.max_tokens, 300);
        assert!(config.parallel);
    }

    #[test]
    fn test_chunker_config_builder() {
        let config = ChunkerConfig::new()
            .with_threshold(100)
            .with_chunk_size(50)
            .with_max_tokens(64)
            .with_parallel(false);

        assert_eq!(config.threshold_bytes, 100);
        assert_eq!(config.chunk_size_bytes, 50);
        assert_eq!(config.max_tokens, 64);
        assert!(!config.parallel);
    }

    #[test]
    fn test_chunk_units_never_splits_a_unit() {
        let units = vec!["aaaa", "bbbb", "cccccccccccc", "dd"];
        let chunks = chunk_units(&units, 10);

        assert_eq!(chunks, vec!["aaaa\nbbbb", "cccccccccccc", "dd"]);
        for unit in &units {
            assert_eq!(chunks.iter().filter(|c| c.contains(unit)).count(), 1);
        }
    }

    #[test]
    fn test_chunk_units_empty() {
        let units: Vec<String> = Vec::new();
        assert!(chunk_units(&units, 10).is_empty());
    }

    #[tokio::test]
    async fn test_condense_small_payload_single_call() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_response("short summary");
        let processor = ChunkProcessor::new(provider.clone(), ChunkerConfig::default());

        let result = processor
            .condense(&["hello", "world"], "Summarize")
            .await
            .unwrap();

        assert_eq!(result, "short summary");
        assert_eq!(provider.request_count(), 1);
        let request = provider.last_request().unwrap();
        assert_eq!(request.messages[1].content, "hello\nworld");
    }

    #[tokio::test]
    async fn test_condense_large_payload_chunks_then_merges() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_response("part one");
        provider.queue_response("part two");
        provider.queue_response("merged");
        let config = ChunkerConfig::new()
            .with_threshold(20)
            .with_chunk_size(15)
            .with_parallel(false);
        let processor = ChunkProcessor::new(provider.clone(), config);

        let units = vec!["first message", "second message"];
        let result = processor.condense(&units, "Summarize").await.unwrap();

        assert_eq!(result, "merged");
        assert_eq!(provider.request_count(), 3);
        let merge = provider.last_request().unwrap();
        assert!(merge.messages[1].content.contains("part one"));
        assert!(merge.messages[1].content.contains("part two"));
    }

    #[tokio::test]
    async fn test_condense_propagates_failure() {
        let provider = Arc::new(MockProvider::new());
        provider.queue_error(Error::network("connection refused"));
        let processor = ChunkProcessor::new(provider, ChunkerConfig::default());

        let err = processor.condense(&["hello"], "Summarize").await.unwrap_err();
        assert!(err.is_upstream());
    }
}

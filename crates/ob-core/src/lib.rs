//! ob-core: Core types and traits for odinbot
//!
//! This crate provides the foundational types shared by the odinbot
//! crates: the error taxonomy, conversation messages, the completion
//! provider seam, tool schemas with argument validation, and the
//! chunk-and-merge processor used for oversized prompts.

pub mod chunker;
pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use chunker::{chunk_units, ChunkProcessor, ChunkerConfig};
pub use error::Error;
pub use message::{Message, Role, ToolCall, Usage};
pub use provider::{
    CompletionRequest, CompletionResponse, FinishReason, Provider, TimeoutProvider,
};
pub use tool::{PropertySchema, ToolDefinition, ToolOutput, ToolParameters};

pub type Result<T> = std::result::Result<T, Error>;

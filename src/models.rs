//! Core data models used throughout Inkvault.
//!
//! These types represent the generation requests, streamed output, extracted
//! document structure, and vault items that flow through the generation and
//! ingestion pipelines.

use std::time::Duration;

use serde::Deserialize;

use crate::classify::GenerationError;

/// A single generation request submitted to the invocation engine.
///
/// Requests are created per user action and discarded after delivery;
/// nothing here is persisted.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// The user's task. Must be non-empty after sanitization.
    pub prompt: String,
    /// Optional pre-formatted context payload (see [`crate::context`]).
    pub context: Option<String>,
    /// Per-request override of the configured tool timeout.
    pub timeout: Option<Duration>,
}

impl GenerationRequest {
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            context: None,
            timeout: None,
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

/// The outcome of a generation request.
///
/// `partial` is `true` only when `error` is set and some content was
/// recovered before the failure.
#[derive(Debug, Clone, Default)]
pub struct GenerationResponse {
    pub content: String,
    pub partial: bool,
    pub error: Option<GenerationError>,
}

/// One unit of streamed output.
///
/// Exactly one chunk per stream carries `done == true`; it is always the
/// last chunk delivered. A terminal chunk with `error` set signals a failed
/// stream; without, a successful one.
#[derive(Debug, Clone)]
pub struct StreamChunk {
    pub stream_id: String,
    /// 0-indexed, strictly increasing within a stream.
    pub sequence: u64,
    pub content: String,
    pub done: bool,
    pub error: Option<GenerationError>,
}

/// Installation/health state of the external generation tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolState {
    Ready,
    NotInstalled,
    Outdated,
    AuthRequired,
    Error,
}

/// Result of probing the external tool (`<tool> --version`).
#[derive(Debug, Clone)]
pub struct ToolStatus {
    pub state: ToolState,
    pub version: Option<String>,
    pub message: Option<String>,
}

/// A section of a document as reported by the structured PDF extractor.
#[derive(Debug, Clone, Deserialize)]
pub struct Section {
    pub level: u32,
    pub title: String,
    /// Hierarchical path of section titles, e.g. `"Methods > Participants"`.
    pub heading_context: String,
    pub content: String,
    pub start_line: u64,
}

/// A chunk of extracted text, bounded and possibly overlapping its
/// neighbors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    pub content: String,
    /// 0-indexed, sequential within a vault item (continues across sections).
    pub index: usize,
    pub heading_context: Option<String>,
}

/// Persisted extraction state of a vault item.
///
/// Strictly forward-progressing; `Success`, `Partial`, and `Failed` are
/// terminal. Only the extraction orchestrator writes this field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractionStatus {
    Pending,
    Downloading,
    Extracting,
    Chunking,
    Embedding,
    Success,
    Partial,
    Failed,
}

impl ExtractionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionStatus::Pending => "pending",
            ExtractionStatus::Downloading => "downloading",
            ExtractionStatus::Extracting => "extracting",
            ExtractionStatus::Chunking => "chunking",
            ExtractionStatus::Embedding => "embedding",
            ExtractionStatus::Success => "success",
            ExtractionStatus::Partial => "partial",
            ExtractionStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExtractionStatus::Success | ExtractionStatus::Partial | ExtractionStatus::Failed
        )
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ExtractionStatus::Pending),
            "downloading" => Some(ExtractionStatus::Downloading),
            "extracting" => Some(ExtractionStatus::Extracting),
            "chunking" => Some(ExtractionStatus::Chunking),
            "embedding" => Some(ExtractionStatus::Embedding),
            "success" => Some(ExtractionStatus::Success),
            "partial" => Some(ExtractionStatus::Partial),
            "failed" => Some(ExtractionStatus::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for ExtractionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A vault item row as read back from SQLite.
#[derive(Debug, Clone)]
pub struct VaultItem {
    pub id: String,
    pub file_name: String,
    pub file_type: String,
    pub storage_path: String,
    pub extraction_status: ExtractionStatus,
    pub extraction_error: Option<String>,
    pub chunk_count: i64,
    pub updated_at: i64,
}

/// A summary of a prior editing operation, fed into the context builder.
#[derive(Debug, Clone)]
pub struct OperationSummary {
    pub operation_type: String,
    pub description: String,
}

/// A citation known to the project, rendered into the prompt context.
#[derive(Debug, Clone)]
pub struct CitationRef {
    pub short_ref: String,
    pub title: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_roundtrip() {
        for s in [
            ExtractionStatus::Pending,
            ExtractionStatus::Downloading,
            ExtractionStatus::Extracting,
            ExtractionStatus::Chunking,
            ExtractionStatus::Embedding,
            ExtractionStatus::Success,
            ExtractionStatus::Partial,
            ExtractionStatus::Failed,
        ] {
            assert_eq!(ExtractionStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(ExtractionStatus::parse("bogus"), None);
    }

    #[test]
    fn terminal_states() {
        assert!(ExtractionStatus::Success.is_terminal());
        assert!(ExtractionStatus::Partial.is_terminal());
        assert!(ExtractionStatus::Failed.is_terminal());
        assert!(!ExtractionStatus::Embedding.is_terminal());
        assert!(!ExtractionStatus::Pending.is_terminal());
    }
}

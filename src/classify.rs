//! Classification of raw process failures into a closed error taxonomy.
//!
//! Every raw failure signal (stderr text, exit codes, spawn errors) is
//! mapped to exactly one [`ErrorKind`] before it is surfaced to callers.
//! Rules are applied in order; the first match wins.

use std::time::Duration;

use regex::Regex;
use std::sync::OnceLock;

/// Closed set of generation failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ToolNotFound,
    AuthFailure,
    RateLimited,
    Timeout,
    MalformedOutput,
    ProcessCrash,
    ContextTooLong,
    Unknown,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ToolNotFound => "tool_not_found",
            ErrorKind::AuthFailure => "auth_failure",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Timeout => "timeout",
            ErrorKind::MalformedOutput => "malformed_output",
            ErrorKind::ProcessCrash => "process_crash",
            ErrorKind::ContextTooLong => "context_too_long",
            ErrorKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A classified generation failure.
#[derive(Debug, Clone)]
pub struct GenerationError {
    pub kind: ErrorKind,
    pub message: String,
    pub retryable: bool,
    /// Wait hint extracted from the raw message (rate limits only).
    pub retry_after: Option<Duration>,
    /// Content produced before the failure, preserved for the caller.
    pub partial_content: Option<String>,
    pub suggestion: Option<String>,
}

impl GenerationError {
    pub fn new(kind: ErrorKind, message: impl Into<String>, retryable: bool) -> Self {
        Self {
            kind,
            message: message.into(),
            retryable,
            retry_after: None,
            partial_content: None,
            suggestion: None,
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }
}

impl std::fmt::Display for GenerationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for GenerationError {}

/// Default wait when a rate-limit message carries no explicit duration.
const DEFAULT_RATE_LIMIT_WAIT: Duration = Duration::from_millis(60_000);

fn retry_after_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(\d+)\s*second").unwrap())
}

/// Extract a wait duration from phrases like `"retry in 30 seconds"`.
fn parse_retry_after(message: &str) -> Option<Duration> {
    let caps = retry_after_re().captures(message)?;
    let secs: u64 = caps.get(1)?.as_str().parse().ok()?;
    Some(Duration::from_secs(secs))
}

/// Classify a raw failure message into a [`GenerationError`].
///
/// `partial_content`, when supplied, is attached unchanged to the result.
pub fn classify(raw: &str, partial_content: Option<String>) -> GenerationError {
    let lower = raw.to_lowercase();

    let mut err = if lower.contains("authentication failed")
        || lower.contains("login required")
        || lower.contains("not logged in")
        || lower.contains("unauthorized")
    {
        GenerationError::new(ErrorKind::AuthFailure, raw, false)
            .with_suggestion("Run the tool's login command to re-authenticate")
    } else if lower.contains("rate limit") || lower.contains("too many requests") {
        let mut e = GenerationError::new(ErrorKind::RateLimited, raw, true);
        e.retry_after = Some(parse_retry_after(&lower).unwrap_or(DEFAULT_RATE_LIMIT_WAIT));
        e
    } else if lower.contains("timed out") || lower.contains("timeout") {
        GenerationError::new(ErrorKind::Timeout, raw, true)
    } else if lower.contains("no such file or directory")
        || lower.contains("command not found")
        || lower.contains("not recognized as an internal or external command")
        || lower.contains("program not found")
    {
        GenerationError::new(ErrorKind::ToolNotFound, raw, false)
            .with_suggestion("Install the generation tool and ensure it is on PATH")
    } else if lower.contains("context length")
        || lower.contains("context too long")
        || lower.contains("token limit")
        || lower.contains("maximum context")
    {
        GenerationError::new(ErrorKind::ContextTooLong, raw, false)
            .with_suggestion("Reduce the document or reference context and retry")
    } else if lower.contains("invalid json")
        || lower.contains("malformed")
        || lower.contains("parse error")
        || lower.contains("unexpected token")
    {
        GenerationError::new(ErrorKind::MalformedOutput, raw, true)
    } else if lower.contains("segmentation fault")
        || lower.contains("sigsegv")
        || lower.contains("sigkill")
        || lower.contains("killed")
        || lower.contains("terminated by signal")
    {
        GenerationError::new(ErrorKind::ProcessCrash, raw, true)
    } else {
        GenerationError::new(ErrorKind::Unknown, raw, false)
    };

    err.partial_content = partial_content;
    err
}

/// Classify a spawn-level I/O error (the process never started).
pub fn classify_spawn_error(err: &std::io::Error) -> GenerationError {
    if err.kind() == std::io::ErrorKind::NotFound {
        GenerationError::new(
            ErrorKind::ToolNotFound,
            format!("failed to spawn generation tool: {}", err),
            false,
        )
        .with_suggestion("Install the generation tool and ensure it is on PATH")
    } else {
        classify(&err.to_string(), None)
    }
}

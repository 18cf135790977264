//! Validation and cleanup of untrusted text before it reaches a subprocess
//! command line or context payload.
//!
//! Prompts are strict: empty input, oversized input, and anything that
//! could be parsed as a command-line flag is rejected before a process is
//! ever spawned. Context is lenient: it is truncated rather than rejected.

/// Maximum prompt length in characters.
pub const MAX_PROMPT_CHARS: usize = 50_000;
/// Maximum context length in characters before truncation.
pub const MAX_CONTEXT_CHARS: usize = 100_000;
/// Sentinel appended when content is cut to fit a budget.
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// Rejection reasons for prompt sanitization.
#[derive(Debug, PartialEq, Eq)]
pub enum SanitizeError {
    Empty,
    /// Input begins with `-` or `--` followed by a word character, which
    /// could be interpreted as a flag by the spawned tool.
    FlagInjection,
    TooLong { len: usize, max: usize },
}

impl std::fmt::Display for SanitizeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SanitizeError::Empty => write!(f, "prompt is empty"),
            SanitizeError::FlagInjection => {
                write!(f, "prompt must not start with a command-line flag")
            }
            SanitizeError::TooLong { len, max } => {
                write!(f, "prompt is {} characters (maximum {})", len, max)
            }
        }
    }
}

impl std::error::Error for SanitizeError {}

/// Strip control characters, keeping newline, tab, and carriage return.
fn strip_control(text: &str) -> String {
    text.chars()
        .filter(|c| !c.is_control() || matches!(c, '\n' | '\t' | '\r'))
        .collect()
}

/// Returns `true` when the text starts with a `-`/`--` flag pattern.
fn starts_with_flag(text: &str) -> bool {
    let rest = match text.strip_prefix("--").or_else(|| text.strip_prefix('-')) {
        Some(r) => r,
        None => return false,
    };
    rest.chars()
        .next()
        .map(|c| c.is_alphanumeric() || c == '_')
        .unwrap_or(false)
}

/// Validate and clean a user prompt.
///
/// Fails when the input is empty after trimming, starts with a flag
/// pattern, or exceeds [`MAX_PROMPT_CHARS`]. Control characters other than
/// `\n`, `\t`, `\r` are stripped silently.
pub fn sanitize_prompt(text: &str) -> Result<String, SanitizeError> {
    let cleaned = strip_control(text);
    let trimmed = cleaned.trim();

    if trimmed.is_empty() {
        return Err(SanitizeError::Empty);
    }
    if starts_with_flag(trimmed) {
        return Err(SanitizeError::FlagInjection);
    }
    let len = trimmed.chars().count();
    if len > MAX_PROMPT_CHARS {
        return Err(SanitizeError::TooLong {
            len,
            max: MAX_PROMPT_CHARS,
        });
    }

    Ok(trimmed.to_string())
}

/// Clean a context payload. Never fails: empty input yields an empty
/// string and oversized input is truncated with [`TRUNCATION_MARKER`].
pub fn sanitize_context(text: &str) -> String {
    let cleaned = strip_control(text);
    let trimmed = cleaned.trim();

    if trimmed.chars().count() <= MAX_CONTEXT_CHARS {
        return trimmed.to_string();
    }

    let cut: String = trimmed.chars().take(MAX_CONTEXT_CHARS).collect();
    format!("{}{}", cut, TRUNCATION_MARKER)
}

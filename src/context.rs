//! Token-budgeted prompt context assembly.
//!
//! Pure functions, no I/O: the caller supplies document content, reference
//! excerpts, chat history, prior operations, and citation metadata, and
//! gets back a single formatted context block plus a full prompt. Token
//! counts use the fixed `chars / 4` heuristic; each section is truncated
//! independently against its share of the budget.

use crate::models::{CitationRef, OperationSummary};
use crate::sanitize::TRUNCATION_MARKER;

/// Approximate chars-per-token ratio used for budgeting.
const CHARS_PER_TOKEN: usize = 4;

/// Budget shares. Document content takes the bulk; the remainder after
/// operations is split between reference excerpts and chat history.
const DOCUMENT_SHARE: f64 = 0.60;
const OPERATIONS_SHARE: f64 = 0.10;
const REFERENCES_SHARE_OF_REST: f64 = 0.70;

/// Everything the writing features know about the user's current state.
#[derive(Debug, Clone, Default)]
pub struct AiContext {
    pub document_content: String,
    pub reference_excerpts: Vec<String>,
    /// Most-recent-first, as the chat feature stores it.
    pub recent_chat: Vec<String>,
    pub recent_operations: Vec<OperationSummary>,
    pub citations: Vec<CitationRef>,
}

impl AiContext {
    pub fn is_empty(&self) -> bool {
        self.document_content.trim().is_empty()
            && self.reference_excerpts.is_empty()
            && self.recent_chat.is_empty()
            && self.recent_operations.is_empty()
            && self.citations.is_empty()
    }
}

/// Which editing surface the generation request came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationType {
    Selection,
    Cursor,
    Global,
    Chat,
}

impl OperationType {
    fn instructions(&self) -> &'static str {
        match self {
            OperationType::Selection => {
                "You are editing a selected passage of the user's document. \
                 Rewrite only the selected text according to the task. \
                 Return the replacement text with no commentary."
            }
            OperationType::Cursor => {
                "You are continuing the user's document from the cursor position. \
                 Write prose that flows naturally from the preceding text. \
                 Return only the inserted text with no commentary."
            }
            OperationType::Global => {
                "You are revising the user's entire document. \
                 Apply the task across the full text while preserving its voice. \
                 Return the complete revised document."
            }
            OperationType::Chat => {
                "You are a writing assistant discussing the user's project. \
                 Answer conversationally, citing reference materials by their \
                 short reference when relevant."
            }
        }
    }
}

/// Estimated token count for a piece of text: `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Cut `text` to roughly `max_tokens`, appending the truncation marker when
/// anything was removed. Cuts on a character boundary by construction.
pub fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    if estimate_tokens(text) <= max_tokens {
        return text.to_string();
    }
    let keep_chars = max_tokens * CHARS_PER_TOKEN;
    let cut: String = text.chars().take(keep_chars).collect();
    format!("{}{}", cut, TRUNCATION_MARKER)
}

/// Assemble the formatted context block, budgeted to `max_tokens`.
///
/// Sections appear in a fixed order; each is truncated to its own share of
/// the budget. Returns an empty string when the context has nothing in it.
pub fn format_context(ctx: &AiContext, max_tokens: usize) -> String {
    if ctx.is_empty() {
        return String::new();
    }

    let document_budget = (max_tokens as f64 * DOCUMENT_SHARE) as usize;
    let operations_budget = (max_tokens as f64 * OPERATIONS_SHARE) as usize;
    let rest = max_tokens.saturating_sub(document_budget + operations_budget);
    let references_budget = (rest as f64 * REFERENCES_SHARE_OF_REST) as usize;
    let chat_budget = rest.saturating_sub(references_budget);

    let mut out = String::new();

    if !ctx.document_content.trim().is_empty() {
        out.push_str("## Current Document\n\n");
        out.push_str(&truncate_to_tokens(&ctx.document_content, document_budget));
        out.push_str("\n\n");
    }

    if !ctx.recent_operations.is_empty() {
        let ops_text = ctx
            .recent_operations
            .iter()
            .map(|op| format!("- [{}] {}", op.operation_type, op.description))
            .collect::<Vec<_>>()
            .join("\n");
        out.push_str("## Recent Operations\n\n");
        out.push_str(&truncate_to_tokens(&ops_text, operations_budget));
        out.push_str("\n\n");
    }

    if !ctx.reference_excerpts.is_empty() {
        out.push_str("## Reference Materials\n\n");
        // Stop adding excerpts once 90% of the reference budget is spent.
        let soft_cap = references_budget * 9 / 10;
        let mut used = 0usize;
        for (i, excerpt) in ctx.reference_excerpts.iter().enumerate() {
            if used >= soft_cap {
                break;
            }
            let remaining = references_budget - used;
            let rendered = truncate_to_tokens(excerpt, remaining);
            used += estimate_tokens(&rendered);
            out.push_str(&format!("### Reference {}\n\n{}\n\n", i + 1, rendered));
        }
    }

    if !ctx.recent_chat.is_empty() {
        // Stored most-recent-first; emitted in chronological order.
        let chronological = ctx
            .recent_chat
            .iter()
            .rev()
            .cloned()
            .collect::<Vec<_>>()
            .join("\n");
        out.push_str("## Recent Chat\n\n");
        out.push_str(&truncate_to_tokens(&chronological, chat_budget));
        out.push_str("\n\n");
    }

    if !ctx.citations.is_empty() {
        // Citation lists are small; not token-budgeted.
        out.push_str("## Available Citations\n\n");
        for c in &ctx.citations {
            out.push_str(&format!("[{}] {}\n", c.short_ref, c.title));
        }
        out.push('\n');
    }

    out.trim_end().to_string()
}

/// Build the full prompt: operation instructions, the formatted context
/// (omitted entirely when empty), and the user's task.
pub fn build_prompt(user_prompt: &str, formatted_context: &str, operation: OperationType) -> String {
    let mut sections = vec![operation.instructions().to_string()];
    if !formatted_context.is_empty() {
        sections.push(format!("# Context\n\n{}", formatted_context));
    }
    sections.push(format!("# Task\n\n{}", user_prompt));
    sections.join("\n\n---\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx_with_doc(doc: &str) -> AiContext {
        AiContext {
            document_content: doc.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn token_estimate_rounds_up() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("abc"), 1);
        assert_eq!(estimate_tokens("abcd"), 1);
        assert_eq!(estimate_tokens("abcde"), 2);
    }

    #[test]
    fn empty_context_formats_to_empty_string() {
        assert_eq!(format_context(&AiContext::default(), 8000), "");
    }

    #[test]
    fn large_document_is_truncated() {
        let doc = "x".repeat(30_000);
        let out = format_context(&ctx_with_doc(&doc), 8000);
        assert!(out.contains(TRUNCATION_MARKER));
        assert!(out.len() < doc.len());
    }

    #[test]
    fn small_document_passes_through() {
        let out = format_context(&ctx_with_doc("A short draft."), 8000);
        assert!(out.contains("## Current Document"));
        assert!(out.contains("A short draft."));
        assert!(!out.contains(TRUNCATION_MARKER));
    }

    #[test]
    fn sections_appear_in_fixed_order() {
        let ctx = AiContext {
            document_content: "doc".to_string(),
            reference_excerpts: vec!["ref one".to_string()],
            recent_chat: vec!["newest".to_string(), "oldest".to_string()],
            recent_operations: vec![OperationSummary {
                operation_type: "selection".to_string(),
                description: "tightened intro".to_string(),
            }],
            citations: vec![CitationRef {
                short_ref: "Smith2021".to_string(),
                title: "On Writing".to_string(),
            }],
        };
        let out = format_context(&ctx, 8000);
        let doc = out.find("## Current Document").unwrap();
        let ops = out.find("## Recent Operations").unwrap();
        let refs = out.find("## Reference Materials").unwrap();
        let chat = out.find("## Recent Chat").unwrap();
        let cites = out.find("## Available Citations").unwrap();
        assert!(doc < ops && ops < refs && refs < chat && chat < cites);
    }

    #[test]
    fn chat_reemitted_chronologically() {
        let ctx = AiContext {
            recent_chat: vec!["third".to_string(), "second".to_string(), "first".to_string()],
            ..Default::default()
        };
        let out = format_context(&ctx, 8000);
        let first = out.find("first").unwrap();
        let second = out.find("second").unwrap();
        let third = out.find("third").unwrap();
        assert!(first < second && second < third);
    }

    #[test]
    fn references_get_numbered_subheadings() {
        let ctx = AiContext {
            reference_excerpts: vec!["alpha".to_string(), "beta".to_string()],
            ..Default::default()
        };
        let out = format_context(&ctx, 8000);
        assert!(out.contains("### Reference 1"));
        assert!(out.contains("### Reference 2"));
    }

    #[test]
    fn references_stop_at_soft_cap() {
        // Budget small enough that the first excerpt exhausts 90% of the
        // reference share; later excerpts are omitted.
        let ctx = AiContext {
            reference_excerpts: vec!["r".repeat(4000), "never rendered".to_string()],
            ..Default::default()
        };
        let out = format_context(&ctx, 200);
        assert!(out.contains("### Reference 1"));
        assert!(!out.contains("never rendered"));
    }

    #[test]
    fn citations_rendered_unbudgeted() {
        let ctx = AiContext {
            citations: vec![CitationRef {
                short_ref: "Doe2020".to_string(),
                title: "A Title".to_string(),
            }],
            ..Default::default()
        };
        let out = format_context(&ctx, 10);
        assert!(out.contains("[Doe2020] A Title"));
    }

    #[test]
    fn build_prompt_omits_empty_context() {
        let p = build_prompt("Fix grammar", "", OperationType::Selection);
        assert!(!p.contains("# Context"));
        assert!(p.contains("# Task"));
        assert_eq!(p.matches("---").count(), 1);
    }

    #[test]
    fn build_prompt_with_context_has_three_sections() {
        let p = build_prompt("Continue", "## Current Document\n\nhi", OperationType::Cursor);
        assert!(p.contains("# Context"));
        assert!(p.contains("cursor position"));
        assert_eq!(p.matches("\n\n---\n\n").count(), 2);
    }

    #[test]
    fn each_operation_has_distinct_instructions() {
        let kinds = [
            OperationType::Selection,
            OperationType::Cursor,
            OperationType::Global,
            OperationType::Chat,
        ];
        let rendered: Vec<&str> = kinds.iter().map(|k| k.instructions()).collect();
        for i in 0..rendered.len() {
            for j in i + 1..rendered.len() {
                assert_ne!(rendered[i], rendered[j]);
            }
        }
    }
}

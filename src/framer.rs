//! Line framing for newline-delimited subprocess output.
//!
//! Subprocess stdout arrives in arbitrary read-sized pieces. [`LineFramer`]
//! accepts those pieces and yields complete lines, carrying any unfinished
//! tail over to the next push. Parsing of the line contents lives with the
//! callers ([`crate::generate`], [`crate::stream`]).

/// Accumulates text pieces and yields complete `\n`-terminated lines.
#[derive(Debug, Default)]
pub struct LineFramer {
    carry: String,
}

impl LineFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a piece of output; returns every line completed by it.
    ///
    /// Trailing `\r` is stripped so CRLF output frames cleanly.
    pub fn push(&mut self, piece: &str) -> Vec<String> {
        self.carry.push_str(piece);

        let mut lines = Vec::new();
        while let Some(pos) = self.carry.find('\n') {
            let rest = self.carry.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.carry, rest);
            line.truncate(line.len() - 1); // drop '\n'
            if line.ends_with('\r') {
                line.truncate(line.len() - 1);
            }
            lines.push(line);
        }
        lines
    }

    /// Drain the unterminated remainder, if any. Call once at EOF.
    pub fn finish(&mut self) -> Option<String> {
        if self.carry.is_empty() {
            return None;
        }
        let mut tail = std::mem::take(&mut self.carry);
        if tail.ends_with('\r') {
            tail.truncate(tail.len() - 1);
        }
        Some(tail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_complete_lines() {
        let mut f = LineFramer::new();
        let lines = f.push("one\ntwo\n");
        assert_eq!(lines, vec!["one", "two"]);
        assert_eq!(f.finish(), None);
    }

    #[test]
    fn carries_partial_line_across_pushes() {
        let mut f = LineFramer::new();
        assert!(f.push("{\"content\":").is_empty());
        let lines = f.push("\"hi\"}\nnext");
        assert_eq!(lines, vec!["{\"content\":\"hi\"}"]);
        assert_eq!(f.finish(), Some("next".to_string()));
    }

    #[test]
    fn strips_carriage_returns() {
        let mut f = LineFramer::new();
        let lines = f.push("alpha\r\nbeta\r\n");
        assert_eq!(lines, vec!["alpha", "beta"]);
    }

    #[test]
    fn empty_lines_preserved() {
        let mut f = LineFramer::new();
        let lines = f.push("a\n\nb\n");
        assert_eq!(lines, vec!["a", "", "b"]);
    }

    #[test]
    fn finish_is_idempotent() {
        let mut f = LineFramer::new();
        f.push("tail");
        assert_eq!(f.finish(), Some("tail".to_string()));
        assert_eq!(f.finish(), None);
    }
}

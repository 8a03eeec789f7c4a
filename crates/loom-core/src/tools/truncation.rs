//! Output truncation utilities for tool results
//!
//! Dual-limit truncation (lines + bytes) with head/tail modes. Cuts always
//! land on UTF-8 character boundaries.

/// Result of a truncation operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TruncationResult {
    pub text: String,
    pub was_truncated: bool,
    pub lines_shown: usize,
    pub lines_total: usize,
    pub bytes_shown: usize,
    pub bytes_total: usize,
}

impl TruncationResult {
    /// Format a truncation notice for appending to output
    pub fn notice(&self) -> Option<String> {
        if !self.was_truncated {
            return None;
        }
        Some(format!(
            "\n[Output truncated: showed {} of {} lines ({}/{} bytes)]",
            self.lines_shown, self.lines_total, self.bytes_shown, self.bytes_total,
        ))
    }

    /// Truncated text with the notice appended when anything was cut
    pub fn into_text_with_notice(self) -> String {
        match self.notice() {
            Some(notice) => self.text + &notice,
            None => self.text,
        }
    }

    fn untouched(text: &str) -> Self {
        let lines_total = text.lines().count();
        Self {
            text: text.to_string(),
            was_truncated: false,
            lines_shown: lines_total,
            lines_total,
            bytes_shown: text.len(),
            bytes_total: text.len(),
        }
    }

    fn cut(text: String, lines_total: usize, bytes_total: usize) -> Self {
        Self {
            lines_shown: text.lines().count(),
            bytes_shown: text.len(),
            text,
            was_truncated: true,
            lines_total,
            bytes_total,
        }
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}

fn ceil_char_boundary(text: &str, mut index: usize) -> usize {
    if index >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(index) {
        index += 1;
    }
    index
}

/// Tail-truncate: keep the last N lines/bytes.
/// Best for command output where recent output is most relevant.
pub fn truncate_tail(text: &str, max_lines: usize, max_bytes: usize) -> TruncationResult {
    let bytes_total = text.len();
    let lines: Vec<&str> = text.lines().collect();
    let lines_total = lines.len();

    if lines_total <= max_lines && bytes_total <= max_bytes {
        return TruncationResult::untouched(text);
    }

    let line_limited = &lines[lines_total.saturating_sub(max_lines)..];
    let joined = line_limited.join("\n");
    if joined.len() <= max_bytes {
        return TruncationResult::cut(joined, lines_total, bytes_total);
    }

    // Keep the last max_bytes, starting at the next whole line when there is one.
    let skip = ceil_char_boundary(&joined, joined.len() - max_bytes);
    let start = joined[skip..]
        .find('\n')
        .map(|pos| skip + pos + 1)
        .filter(|&start| start < joined.len())
        .unwrap_or(skip);
    TruncationResult::cut(joined[start..].to_string(), lines_total, bytes_total)
}

/// Head-truncate: keep the first N lines/bytes.
/// Best for content where the beginning is most relevant.
pub fn truncate_head(text: &str, max_lines: usize, max_bytes: usize) -> TruncationResult {
    let bytes_total = text.len();
    let lines: Vec<&str> = text.lines().collect();
    let lines_total = lines.len();

    if lines_total <= max_lines && bytes_total <= max_bytes {
        return TruncationResult::untouched(text);
    }

    let line_limited = &lines[..lines_total.min(max_lines)];
    let joined = line_limited.join("\n");
    if joined.len() <= max_bytes {
        return TruncationResult::cut(joined, lines_total, bytes_total);
    }

    let limit = floor_char_boundary(&joined, max_bytes);
    let cutoff = joined[..limit]
        .rfind('\n')
        .filter(|&pos| pos > 0)
        .unwrap_or(limit);
    TruncationResult::cut(joined[..cutoff].to_string(), lines_total, bytes_total)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_truncation_needed() {
        let text = "line1\nline2\nline3";
        let result = truncate_tail(text, 100, 100_000);
        assert!(!result.was_truncated);
        assert_eq!(result.text, text);
        assert_eq!(result.lines_shown, 3);
        assert!(result.notice().is_none());
    }

    #[test]
    fn test_tail_truncate_by_lines() {
        let text = "line1\nline2\nline3\nline4\nline5";
        let result = truncate_tail(text, 2, 100_000);
        assert!(result.was_truncated);
        assert_eq!(result.lines_shown, 2);
        assert_eq!(result.text, "line4\nline5");
    }

    #[test]
    fn test_head_truncate_by_lines() {
        let text = "line1\nline2\nline3\nline4\nline5";
        let result = truncate_head(text, 2, 100_000);
        assert!(result.was_truncated);
        assert_eq!(result.lines_shown, 2);
        assert_eq!(result.text, "line1\nline2");
    }

    #[test]
    fn test_tail_truncate_by_bytes() {
        let text = "a".repeat(100) + "\n" + &"b".repeat(100);
        let result = truncate_tail(&text, 1000, 50);
        assert!(result.was_truncated);
        assert!(result.bytes_shown <= 50);
        assert!(result.text.chars().all(|c| c == 'b'));
    }

    #[test]
    fn test_head_truncate_multibyte_does_not_split_chars() {
        let text = "é".repeat(100);
        let result = truncate_head(&text, 10, 51);
        assert!(result.was_truncated);
        assert_eq!(result.bytes_shown, 50);
        assert!(result.text.chars().all(|c| c == 'é'));
    }

    #[test]
    fn test_tail_truncate_multibyte_does_not_split_chars() {
        let text = "ü".repeat(100);
        let result = truncate_tail(&text, 10, 51);
        assert_eq!(result.bytes_shown, 50);
    }

    #[test]
    fn test_truncation_notice() {
        let text = "line1\nline2\nline3\nline4\nline5";
        let result = truncate_tail(text, 2, 100_000);
        let notice = result.notice().unwrap();
        assert!(notice.contains("2 of 5 lines"));
        assert!(result.into_text_with_notice().ends_with("bytes)]"));
    }
}

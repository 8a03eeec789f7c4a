//! Bounded capture of a child's combined output

use std::collections::VecDeque;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::constants::process::READER_JOIN_TIMEOUT;

/// Keeps the most recent lines within a line and byte budget.
pub(crate) struct BoundedOutputBuffer {
    lines: VecDeque<String>,
    total_bytes: usize,
    dropped_lines: usize,
    max_lines: usize,
    max_bytes: usize,
}

impl BoundedOutputBuffer {
    pub(crate) fn new(max_lines: usize, max_bytes: usize) -> Self {
        Self {
            lines: VecDeque::new(),
            total_bytes: 0,
            dropped_lines: 0,
            max_lines,
            max_bytes,
        }
    }

    pub(crate) fn push_line(&mut self, line: &str) {
        let kept = tail_by_bytes(line, self.max_bytes);

        self.total_bytes = self.total_bytes.saturating_add(kept.len());
        self.lines.push_back(kept);

        while self.lines.len() > self.max_lines || self.total_bytes > self.max_bytes {
            let Some(removed) = self.lines.pop_front() else {
                break;
            };
            self.total_bytes = self.total_bytes.saturating_sub(removed.len());
            self.dropped_lines = self.dropped_lines.saturating_add(1);
        }
    }

    /// Captured text so far, leaving the buffer empty.
    pub(crate) fn take_text(&mut self) -> String {
        let mut out = self.lines.drain(..).collect::<Vec<_>>().join("\n");
        if self.dropped_lines > 0 {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!(
                "[... omitted {} earlier line(s) due to buffer limits ...]",
                self.dropped_lines
            ));
        }
        self.total_bytes = 0;
        self.dropped_lines = 0;
        out
    }
}

/// Keep the tail of a string within `max_bytes`, preserving UTF-8 boundaries.
pub(crate) fn tail_by_bytes(text: &str, max_bytes: usize) -> String {
    if text.len() <= max_bytes {
        return text.to_string();
    }

    let mut start = text.len().saturating_sub(max_bytes);
    while start < text.len() && !text.is_char_boundary(start) {
        start += 1;
    }
    text[start..].to_string()
}

pub(crate) type SharedBuffer = Arc<Mutex<BoundedOutputBuffer>>;

/// Drain one pipe into the shared buffer, line by line.
pub(crate) async fn collect_pipe_output<R>(pipe: Option<R>, buffer: SharedBuffer)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let Some(pipe) = pipe else {
        return;
    };

    // Raw bytes so invalid UTF-8 never closes the pipe under a live child.
    let mut reader = BufReader::new(pipe);
    let mut raw = Vec::new();
    loop {
        raw.clear();
        match reader.read_until(b'\n', &mut raw).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&raw);
                let line = line.strip_suffix('\n').unwrap_or(&*line);
                let line = line.strip_suffix('\r').unwrap_or(line);
                buffer.lock().await.push_line(line);
            }
            Err(e) => {
                tracing::debug!(error = %e, "Stopped reading command output");
                break;
            }
        }
    }
}

/// A grandchild may keep the pipe open after the group is gone; give up on
/// the reader instead of hanging.
pub(crate) async fn join_reader_with_timeout(mut handle: JoinHandle<()>) {
    if timeout(READER_JOIN_TIMEOUT, &mut handle).await.is_err() {
        handle.abort();
        let _ = handle.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_output_buffer_keeps_recent_lines() {
        let mut buffer = BoundedOutputBuffer::new(3, 1_000);
        for line in ["one", "two", "three", "four", "five"] {
            buffer.push_line(line);
        }

        let text = buffer.take_text();
        assert!(text.starts_with("three\nfour\nfive"));
        assert!(text.contains("omitted 2 earlier line(s)"));
    }

    #[test]
    fn bounded_output_buffer_clips_to_max_bytes() {
        let mut buffer = BoundedOutputBuffer::new(100, 10);
        buffer.push_line("0123456789abcdef");
        assert_eq!(buffer.take_text(), "6789abcdef");
    }

    #[test]
    fn take_text_resets_buffer() {
        let mut buffer = BoundedOutputBuffer::new(2, 100);
        buffer.push_line("a");
        buffer.push_line("b");
        buffer.push_line("c");
        assert!(!buffer.take_text().is_empty());
        assert_eq!(buffer.take_text(), "");
    }

    #[tokio::test]
    async fn invalid_utf8_is_replaced_not_fatal() {
        let buffer: SharedBuffer = Arc::new(Mutex::new(BoundedOutputBuffer::new(10, 1_000)));
        let input: &[u8] = b"ok\n\xff\xfe\r\nafter";
        collect_pipe_output(Some(input), buffer.clone()).await;
        assert_eq!(buffer.lock().await.take_text(), "ok\n\u{fffd}\u{fffd}\nafter");
    }

    #[tokio::test]
    async fn finished_reader_is_joined_once() {
        let handle = tokio::spawn(async {});
        tokio::task::yield_now().await;
        join_reader_with_timeout(handle).await;
    }

    #[test]
    fn tail_by_bytes_respects_char_boundaries() {
        let text = "héllo wörld";
        let tail = tail_by_bytes(text, 5);
        assert!(tail.len() <= 5);
        assert!(text.ends_with(&tail));
    }
}

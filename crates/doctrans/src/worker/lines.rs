//! Splits raw process output into text lines.
//!
//! Output arrives in arbitrary chunks, so partial lines are buffered until a
//! boundary shows up. `\n`, `\r\n` and a bare `\r` (progress-bar redraws) all
//! end a line. Bytes are decoded as UTF-8, replacing invalid sequences.
//! A line that grows past [`MAX_LINE_BYTES`] without a boundary is cut there.

/// Longest line kept in one piece; the rest continues on the next line.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Incremental byte-to-line splitter.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: Vec<u8>,
    after_cr: bool,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds a chunk and returns every line it completed.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut lines = Vec::new();
        for &byte in chunk {
            match byte {
                b'\n' if self.after_cr => {
                    // second half of a CRLF pair; the line was already emitted
                    self.after_cr = false;
                }
                b'\n' | b'\r' => {
                    self.after_cr = byte == b'\r';
                    if let Some(line) = self.take_line() {
                        lines.push(line);
                    }
                }
                _ => {
                    self.after_cr = false;
                    self.pending.push(byte);
                    if self.pending.len() >= MAX_LINE_BYTES {
                        if let Some(line) = self.take_line() {
                            lines.push(line);
                        }
                    }
                }
            }
        }
        lines
    }

    /// Flushes whatever is left once the stream has ended.
    pub fn finish(&mut self) -> Option<String> {
        self.after_cr = false;
        self.take_line()
    }

    fn take_line(&mut self) -> Option<String> {
        let bytes = std::mem::take(&mut self.pending);
        let line = String::from_utf8_lossy(&bytes).trim_end().to_string();
        if line.is_empty() {
            None
        } else {
            Some(line)
        }
    }
}

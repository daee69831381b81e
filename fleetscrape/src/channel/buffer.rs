//! Accumulation buffer with tail search.
//!
//! Only the last `search_depth` bytes are searched for the prompt
//! terminator, so prompt checks stay cheap on large outputs such as a full
//! running-config.

use std::ops::Range;

use vte::{Parser, Perform};

/// Collects printable output and C0 line controls, drops escape sequences.
#[derive(Debug, Default)]
struct PrintableSink {
    out: Vec<u8>,
}

impl Perform for PrintableSink {
    fn print(&mut self, c: char) {
        let mut utf8 = [0u8; 4];
        self.out
            .extend_from_slice(c.encode_utf8(&mut utf8).as_bytes());
    }

    fn execute(&mut self, byte: u8) {
        if matches!(byte, b'\n' | b'\r' | b'\t') {
            self.out.push(byte);
        }
    }
}

/// Buffer for accumulating shell output and searching its tail.
///
/// ANSI escape sequences are stripped on the way in. The parser keeps its
/// state between calls, so a sequence split across two reads is still
/// removed.
pub struct PatternBuffer {
    /// The accumulated, cleaned output.
    buffer: Vec<u8>,

    /// How many bytes from the end to search.
    search_depth: usize,

    parser: Parser,
}

impl PatternBuffer {
    /// Create a new buffer with the specified search depth.
    pub fn new(search_depth: usize) -> Self {
        Self {
            buffer: Vec::with_capacity(4096),
            search_depth,
            parser: Parser::new(),
        }
    }

    /// Append raw bytes, returning the range the cleaned bytes occupy.
    pub fn extend(&mut self, data: &[u8]) -> Range<usize> {
        let mut sink = PrintableSink {
            out: Vec::with_capacity(data.len()),
        };
        self.parser.advance(&mut sink, data);

        let start = self.buffer.len();
        self.buffer.extend_from_slice(&sink.out);
        start..self.buffer.len()
    }

    /// The tail region that prompt searches look at.
    pub fn tail(&self) -> &[u8] {
        let start = self.buffer.len().saturating_sub(self.search_depth);
        &self.buffer[start..]
    }

    /// The tail with trailing whitespace removed.
    pub fn trimmed_tail(&self) -> &[u8] {
        self.tail().trim_ascii_end()
    }

    /// The final line of the buffer, without its trailing whitespace.
    pub fn last_line(&self) -> &[u8] {
        let trimmed = self.buffer.trim_ascii_end();
        match memchr::memrchr2(b'\n', b'\r', trimmed) {
            Some(pos) => &trimmed[pos + 1..],
            None => trimmed,
        }
    }

    /// Take ownership of the buffer contents and reset.
    pub fn take(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.buffer)
    }

    /// Get a reference to the buffer contents.
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Get the current buffer length.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and any half-parsed escape sequence.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.parser = Parser::new();
    }
}

impl std::fmt::Debug for PatternBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PatternBuffer")
            .field("len", &self.buffer.len())
            .field("search_depth", &self.search_depth)
            .finish()
    }
}

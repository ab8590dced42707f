//! Reassembly of protocol lines from socket reads.
//!
//! The control socket has no length prefixing, newlines are the only
//! framing. A read can end anywhere, including in the middle of a line or
//! of a multi-byte character, so the bytes after the last newline of a
//! chunk are held back and prepended to the next one.

use std::collections::VecDeque;

/// Reads are done in sizes of this
pub(crate) const READ_FRAME_SIZE: usize = 4096;

/// Turns a sequence of byte chunks into complete lines.
#[derive(Debug, Default)]
pub struct LineReader {
    unparsed_bytes: Vec<u8>,
    lines: VecDeque<String>,
}

impl LineReader {
    pub fn new() -> Self {
        LineReader {
            unparsed_bytes: Vec::with_capacity(2 * READ_FRAME_SIZE),
            lines: VecDeque::with_capacity(20),
        }
    }

    /// Adds `frame` to the buffer and queues every line it completes. The
    /// trailing segment, if it has no newline yet, stays pending.
    pub fn feed(&mut self, frame: &[u8]) {
        self.unparsed_bytes.extend_from_slice(frame);

        let mut start = 0;
        while let Some(nl) = self.unparsed_bytes[start..]
            .iter()
            .position(|it| *it == b'\n')
        {
            let end = start + nl;
            let line = String::from_utf8_lossy(&self.unparsed_bytes[start..end]).into_owned();
            log::trace!("reader: complete line {:?}", line);
            self.lines.push_back(line);
            start = end + 1;
        }

        if start > 0 {
            self.unparsed_bytes.drain(..start);
        }
        if !self.unparsed_bytes.is_empty() {
            log::trace!("reader: {} pending bytes", self.unparsed_bytes.len());
        }
    }

    /// Pops the oldest complete line, if any
    pub fn next_line(&mut self) -> Option<String> {
        self.lines.pop_front()
    }

    /// Releases the pending partial line once the stream has ended. Returns
    /// `None` if nothing was pending.
    pub fn finish(&mut self) -> Option<String> {
        if self.unparsed_bytes.is_empty() {
            None
        } else {
            let line = String::from_utf8_lossy(&self.unparsed_bytes).into_owned();
            self.unparsed_bytes.clear();
            Some(line)
        }
    }

    /// Whether any bytes are held back waiting for a newline
    pub fn has_pending(&self) -> bool {
        !self.unparsed_bytes.is_empty()
    }

    /// Whether every byte fed so far has been handed out as a line
    pub fn is_drained(&self) -> bool {
        self.lines.is_empty() && self.unparsed_bytes.is_empty()
    }
}

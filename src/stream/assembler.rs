//! Incremental JSON event assembly for `text/event-stream` bodies.
//!
//! The agent backend frames each event as `data: {...}\n\n`, but transports
//! may split or merge those frames arbitrarily. The assembler ignores framing
//! and instead extracts every complete top-level JSON object from the text in
//! arrival order:
//!
//! ```text
//! data: {"content":      <- feed #1: incomplete, nothing emitted
//! {"parts":[...]}}\n\n   <- feed #2: one event emitted
//! ```
//!
//! Candidate objects are located with a resumable scanner that tracks brace
//! depth outside JSON strings (honouring escapes), so a `}` inside a string
//! value never closes an object early. Every balanced candidate is confirmed
//! with `serde_json` before it is emitted.
//!
//! An opening brace whose text can no longer become valid JSON (a stray `{`
//! in a comment line, say) is abandoned so that objects after it still get
//! through. A brace that is merely unterminated keeps waiting for input until
//! [`FragmentAssembler::finalize`].

use serde::de::IgnoredAny;
use serde_json::Value;
use tracing::{debug, warn};

/// Outcome of one scan over the buffered text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Candidate {
    /// A balanced `{...}` span, `end` exclusive.
    Complete { start: usize, end: usize },
    /// Need more input before anything can be decided.
    Incomplete,
}

/// Scanner position, kept between feeds so bytes are only examined once.
#[derive(Debug, Clone, Copy, Default)]
struct ScanState {
    pos: usize,
    start: Option<usize>,
    depth: usize,
    in_string: bool,
    escaped: bool,
    /// A nested object closed since the candidate was last checked.
    inner_closed: bool,
}

/// Reassembles complete JSON events from an arbitrarily chunked text stream.
#[derive(Debug, Default)]
pub struct FragmentAssembler {
    buffer: String,
    scan: ScanState,
    /// Trailing bytes of a UTF-8 sequence split across reads.
    utf8_carry: Vec<u8>,
    event_count: usize,
}

impl FragmentAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of events emitted so far.
    pub fn event_count(&self) -> usize {
        self.event_count
    }

    /// Bytes of text buffered but not yet consumed.
    pub fn buffered_len(&self) -> usize {
        self.buffer.len()
    }

    /// Append a text chunk without extracting anything.
    pub fn push(&mut self, chunk: &str) {
        if chunk.is_empty() {
            return;
        }
        self.buffer.push_str(chunk);
    }

    /// Append raw bytes, carrying an incomplete trailing UTF-8 sequence over
    /// to the next call. Invalid sequences are replaced with U+FFFD.
    pub fn push_bytes(&mut self, chunk: &[u8]) {
        if chunk.is_empty() {
            return;
        }

        let mut data = std::mem::take(&mut self.utf8_carry);
        data.extend_from_slice(chunk);

        let mut rest: &[u8] = &data;
        loop {
            match std::str::from_utf8(rest) {
                Ok(text) => {
                    self.buffer.push_str(text);
                    break;
                }
                Err(e) => {
                    let valid = e.valid_up_to();
                    self.buffer
                        .push_str(&String::from_utf8_lossy(&rest[..valid]));
                    match e.error_len() {
                        Some(len) => {
                            self.buffer.push(char::REPLACEMENT_CHARACTER);
                            rest = &rest[valid + len..];
                        }
                        None => {
                            self.utf8_carry = rest[valid..].to_vec();
                            break;
                        }
                    }
                }
            }
        }
    }

    /// Feed a text chunk and hand every completed event to `sink`, in order.
    pub fn feed<F>(&mut self, chunk: &str, mut sink: F)
    where
        F: FnMut(Value),
    {
        self.push(chunk);
        while let Some(event) = self.next_event() {
            sink(event);
        }
    }

    /// Byte-oriented counterpart of [`feed`](Self::feed).
    pub fn feed_bytes<F>(&mut self, chunk: &[u8], mut sink: F)
    where
        F: FnMut(Value),
    {
        self.push_bytes(chunk);
        while let Some(event) = self.next_event() {
            sink(event);
        }
    }

    /// Extract the next complete event from the buffer, if one is available.
    pub fn next_event(&mut self) -> Option<Value> {
        loop {
            match self.scan_candidate() {
                Candidate::Incomplete => {
                    if let Some(start) = self.abandonable_start() {
                        debug!(
                            "Text from offset {} can never form a JSON object, skipping its opening brace",
                            start
                        );
                        self.scan = ScanState {
                            pos: start + 1,
                            ..ScanState::default()
                        };
                        continue;
                    }
                    self.compact();
                    return None;
                }
                Candidate::Complete { start, end } => {
                    let parsed = serde_json::from_str::<Value>(&self.buffer[start..end]);
                    match parsed {
                        Ok(value) => {
                            self.buffer.drain(..end);
                            self.scan = ScanState::default();
                            self.event_count += 1;
                            debug!(
                                event_count = self.event_count,
                                buffered = self.buffer.len(),
                                "assembled stream event"
                            );
                            return Some(value);
                        }
                        Err(e) => {
                            debug!(
                                "Balanced candidate at offset {} is not valid JSON ({}), skipping its opening brace",
                                start, e
                            );
                            self.scan = ScanState {
                                pos: start + 1,
                                ..ScanState::default()
                            };
                        }
                    }
                }
            }
        }
    }

    /// Flush the stream tail. Emits any remaining complete events; an object
    /// still unterminated at this point is abandoned and the search resumes
    /// after its opening brace. Whatever cannot be used is logged and dropped.
    pub fn finalize<F>(&mut self, mut sink: F)
    where
        F: FnMut(Value),
    {
        if !self.utf8_carry.is_empty() {
            let carry = std::mem::take(&mut self.utf8_carry);
            self.buffer.push_str(&String::from_utf8_lossy(&carry));
        }

        loop {
            while let Some(event) = self.next_event() {
                sink(event);
            }

            let Some(start) = self.scan.start else {
                break;
            };
            warn!(
                "Dropping unterminated object of {} bytes at end of stream",
                self.buffer.len() - start
            );
            debug!("Unterminated stream tail: {}", &self.buffer[start..]);
            self.scan = ScanState {
                pos: start + 1,
                ..ScanState::default()
            };
        }

        self.buffer.clear();
        self.scan = ScanState::default();
    }

    /// Discard everything buffered, including any partial UTF-8 sequence.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.utf8_carry.clear();
        self.scan = ScanState::default();
    }

    fn scan_candidate(&mut self) -> Candidate {
        let bytes = self.buffer.as_bytes();
        let mut s = self.scan;

        while s.pos < bytes.len() {
            let b = bytes[s.pos];
            match s.start {
                None => {
                    if b == b'{' {
                        s.start = Some(s.pos);
                        s.depth = 1;
                        s.in_string = false;
                        s.escaped = false;
                    }
                }
                Some(start) => {
                    if s.in_string {
                        if s.escaped {
                            s.escaped = false;
                        } else if b == b'\\' {
                            s.escaped = true;
                        } else if b == b'"' {
                            s.in_string = false;
                        }
                    } else {
                        match b {
                            b'"' => s.in_string = true,
                            b'{' => s.depth += 1,
                            b'}' => {
                                s.depth -= 1;
                                s.inner_closed = true;
                                if s.depth == 0 {
                                    s.pos += 1;
                                    self.scan = s;
                                    return Candidate::Complete { start, end: s.pos };
                                }
                            }
                            _ => {}
                        }
                    }
                }
            }
            s.pos += 1;
        }

        self.scan = s;
        Candidate::Incomplete
    }

    /// Start of the open candidate if its text is already invalid JSON rather
    /// than merely cut short.
    ///
    /// Only rechecked after a nested object closes inside the open span.
    fn abandonable_start(&mut self) -> Option<usize> {
        let start = self.scan.start?;
        if !std::mem::take(&mut self.scan.inner_closed) {
            return None;
        }

        match serde_json::from_str::<IgnoredAny>(&self.buffer[start..]) {
            Err(e) if !e.is_eof() => Some(start),
            _ => None,
        }
    }

    /// Drop already-scanned text that cannot belong to any object.
    fn compact(&mut self) {
        if self.scan.start.is_none() && self.scan.pos > 0 {
            self.buffer.drain(..self.scan.pos);
            self.scan.pos = 0;
        }
    }
}

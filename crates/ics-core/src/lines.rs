//! Chunk-safe logical line assembly.
//!
//! RFC 5545 folds long content lines: a CRLF followed by a single SPACE or
//! TAB continues the previous logical line.  Both the fold and the line
//! terminator may straddle chunk boundaries, so the assembler keeps two
//! pieces of state between `push` calls: the incomplete tail of the last
//! raw line, and the pending folded logical line that cannot be finalized
//! until we see whether the next raw line starts with whitespace.
//!
//! Bytes are decoded lossily per raw line — `\r` and `\n` are ASCII, so
//! splitting at the byte level never cuts a UTF-8 sequence in a way that
//! corrupts neighbouring lines.

/// Incremental unfolder: bytes in, logical lines out.
#[derive(Debug, Default)]
pub struct LineAssembler {
    /// Raw bytes of a line not yet terminated by `\n`.
    tail: Vec<u8>,
    /// Completed raw line(s) awaiting the fold decision.
    pending: Option<String>,
}

impl LineAssembler {
    pub fn new() -> Self {
        LineAssembler::default()
    }

    /// Feed a chunk; returns every logical line completed by it.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        let mut out = Vec::new();
        for byte in chunk {
            if *byte == b'\n' {
                let mut raw = std::mem::take(&mut self.tail);
                if raw.last() == Some(&b'\r') {
                    raw.pop();
                }
                self.accept_raw_line(&raw, &mut out);
            } else {
                self.tail.push(*byte);
            }
        }
        out
    }

    /// Flush at end of stream: the unterminated tail (feeds in the wild
    /// often omit the final CRLF) and the pending folded line.
    pub fn finish(mut self) -> Vec<String> {
        let mut out = Vec::new();
        if !self.tail.is_empty() {
            let mut raw = std::mem::take(&mut self.tail);
            if raw.last() == Some(&b'\r') {
                raw.pop();
            }
            self.accept_raw_line(&raw, &mut out);
        }
        if let Some(pending) = self.pending.take() {
            out.push(pending);
        }
        out
    }

    fn accept_raw_line(&mut self, raw: &[u8], out: &mut Vec<String>) {
        let is_continuation = matches!(raw.first(), Some(&b' ') | Some(&b'\t'));
        let decoded = String::from_utf8_lossy(if is_continuation { &raw[1..] } else { raw });

        if is_continuation {
            match self.pending.as_mut() {
                Some(pending) => pending.push_str(&decoded),
                // A continuation with nothing to continue: treat the
                // content as its own line rather than dropping bytes.
                None => self.pending = Some(decoded.into_owned()),
            }
            return;
        }

        if let Some(done) = self.pending.take() {
            out.push(done);
        }
        self.pending = Some(decoded.into_owned());
    }
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

//! Message envelopes and trailer-based resynchronization.
//!
//! Messages carry no length prefix. Every message ends with a fixed trailer
//! that exists only so a reader that lost track of message boundaries can
//! find the next one:
//!
//! ```text
//! outbound: | routing tag (i32) | kind (string) | body | FF 00 FF 00 FF 00 01 |
//! inbound:  |                   | kind (string) | body | FF 00 FF 00 FF 00 01 |
//! ```
//!
//! The trailer is not an integrity check. A body can contain the trailer
//! bytes; resync then realigns one message late and the next decode failure
//! triggers another resync.

use crate::codec::ByteWriter;
use crate::error::EncodeError;
use crate::message::OutboundMessage;

/// Fixed byte sequence appended to every message.
pub const TRAILER: [u8; 7] = [0xFF, 0x00, 0xFF, 0x00, 0xFF, 0x00, 0x01];

/// Configuration for the framing layer.
#[derive(Debug, Clone)]
pub struct FrameConfig {
    /// Largest number of bytes one inbound message may span before it is
    /// treated as malformed. Default: 1 MB.
    pub max_message_size: usize,
    /// Whether inbound messages start with an `i32` routing tag. Default: false.
    pub inbound_routing_tag: bool,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_message_size: 1_048_576,
            inbound_routing_tag: false,
        }
    }
}

/// Encode `message` as a complete outbound envelope.
pub fn encode_envelope(
    routing_tag: i32,
    message: &dyn OutboundMessage,
) -> Result<Vec<u8>, EncodeError> {
    let mut w = ByteWriter::new();
    w.write_i32(routing_tag);
    w.write_str(message.kind())?;
    message.encode(&mut w)?;
    w.write_bytes(&TRAILER);
    Ok(w.into_inner())
}

const fn failure_table() -> [usize; TRAILER.len()] {
    let mut table = [0; TRAILER.len()];
    let mut k = 0;
    let mut i = 1;
    while i < TRAILER.len() {
        while k > 0 && TRAILER[i] != TRAILER[k] {
            k = table[k - 1];
        }
        if TRAILER[i] == TRAILER[k] {
            k += 1;
        }
        table[i] = k;
        i += 1;
    }
    table
}

/// Longest proper prefix of `TRAILER[..=i]` that is also a suffix of it.
const FAILURE: [usize; TRAILER.len()] = failure_table();

/// Streaming matcher for [`TRAILER`].
///
/// Bytes may be pushed in any chunking; the match state carries over. On a
/// mismatch the matcher falls back through the failure table instead of
/// discarding the partial match, so `FF 00 FF 00 FF 00 FF 00 01` matches.
#[derive(Debug, Clone, Default)]
pub struct TrailerScanner {
    matched: usize,
}

impl TrailerScanner {
    /// Create a scanner with no partial match.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of trailer bytes currently matched.
    pub fn matched(&self) -> usize {
        self.matched
    }

    /// Feed one byte. Returns `true` when it completes a trailer.
    pub fn push(&mut self, byte: u8) -> bool {
        loop {
            if byte == TRAILER[self.matched] {
                self.matched += 1;
                if self.matched == TRAILER.len() {
                    self.matched = 0;
                    return true;
                }
                return false;
            }
            if self.matched == 0 {
                return false;
            }
            self.matched = FAILURE[self.matched - 1];
        }
    }

    /// Feed `bytes` until a trailer completes.
    ///
    /// Returns the index just past the trailer, or `None` if `bytes` ran out
    /// first (the partial match is kept for the next call).
    pub fn scan(&mut self, bytes: &[u8]) -> Option<usize> {
        bytes
            .iter()
            .position(|&b| self.push(b))
            .map(|index| index + 1)
    }
}

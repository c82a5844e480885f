//! Inbound message framing: turns a byte stream into decoded messages.
//!
//! Bytes are buffered until a whole message (kind, body and trailer) decodes.
//! A decode that runs out of bytes is retried once more bytes arrive. Any
//! other failure puts the framer into resync mode, where it discards bytes
//! up to and including the next trailer and then tries again.

use crate::codec::ByteReader;
use crate::error::DecodeError;
use crate::framing::{FrameConfig, TRAILER, TrailerScanner};
use crate::message::Inbound;
use crate::registry::MessageRegistry;

/// Result of one [`InboundFramer::next_event`] call.
pub enum FrameEvent<M> {
    /// A complete message was decoded and its bytes consumed.
    Decoded(M),
    /// The buffered bytes do not complete a message (or a resync) yet.
    NeedMoreData,
    /// Decoding failed; the framer is now resyncing.
    Desync(DecodeError),
    /// A trailer was found; `skipped` bytes were discarded to get here.
    Realigned {
        /// Bytes discarded since the desync.
        skipped: usize,
    },
}

impl<M> std::fmt::Debug for FrameEvent<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Decoded(_) => f.write_str("Decoded"),
            Self::NeedMoreData => f.write_str("NeedMoreData"),
            Self::Desync(e) => f.debug_tuple("Desync").field(e).finish(),
            Self::Realigned { skipped } => {
                f.debug_struct("Realigned").field("skipped", skipped).finish()
            }
        }
    }
}

#[derive(Debug)]
enum Mode {
    Aligned,
    Resyncing {
        scanner: TrailerScanner,
        skipped: usize,
    },
}

/// Buffers inbound bytes and splits them into messages.
#[derive(Debug)]
pub struct InboundFramer {
    config: FrameConfig,
    buf: Vec<u8>,
    mode: Mode,
    /// Buffered length the last truncated decode needs before it can get
    /// further. 0 when unknown.
    wanted: usize,
}

impl InboundFramer {
    /// Create an empty framer.
    pub fn new(config: FrameConfig) -> Self {
        Self {
            config,
            buf: Vec::new(),
            mode: Mode::Aligned,
            wanted: 0,
        }
    }

    /// Append bytes received from the transport.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Bytes buffered but not yet consumed.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    /// Whether the framer is currently discarding bytes to find a trailer.
    pub fn is_resyncing(&self) -> bool {
        matches!(self.mode, Mode::Resyncing { .. })
    }

    /// Advance by at most one message or resync step.
    ///
    /// Call repeatedly until it returns [`FrameEvent::NeedMoreData`].
    pub fn next_event<C>(
        &mut self,
        registry: &MessageRegistry<C>,
        ctx: &C,
    ) -> FrameEvent<Box<dyn Inbound<C>>> {
        if let Mode::Resyncing { scanner, skipped } = &mut self.mode {
            return match scanner.scan(&self.buf) {
                Some(end) => {
                    let skipped = *skipped + end;
                    self.buf.drain(..end);
                    self.mode = Mode::Aligned;
                    FrameEvent::Realigned { skipped }
                }
                None => {
                    *skipped += self.buf.len();
                    self.buf.clear();
                    FrameEvent::NeedMoreData
                }
            };
        }

        // Past the size limit, decode once more so the overflow is reported.
        if self.buf.is_empty()
            || self.buf.len() < self.wanted.min(self.config.max_message_size.saturating_add(1))
        {
            return FrameEvent::NeedMoreData;
        }

        match self.decode_one(registry, ctx) {
            Ok((message, consumed)) => {
                self.buf.drain(..consumed);
                self.wanted = 0;
                FrameEvent::Decoded(message)
            }
            Err(DecodeError::Truncated { needed, available })
                if self.buf.len() <= self.config.max_message_size =>
            {
                let decoded = self.buf.len().saturating_sub(available);
                self.wanted = decoded.saturating_add(needed);
                FrameEvent::NeedMoreData
            }
            Err(e) => {
                self.wanted = 0;
                let e = if e.is_truncated() {
                    DecodeError::malformed(format!(
                        "message exceeds {} bytes without completing",
                        self.config.max_message_size
                    ))
                } else {
                    e
                };
                self.mode = Mode::Resyncing {
                    scanner: TrailerScanner::new(),
                    skipped: 0,
                };
                FrameEvent::Desync(e)
            }
        }
    }

    fn decode_one<C>(
        &self,
        registry: &MessageRegistry<C>,
        ctx: &C,
    ) -> Result<(Box<dyn Inbound<C>>, usize), DecodeError> {
        let mut r = ByteReader::new(&self.buf);
        if self.config.inbound_routing_tag {
            r.read_i32()?;
        }
        let kind = r.read_str()?;
        let decoder = registry
            .lookup(&kind)
            .ok_or_else(|| DecodeError::UnknownIdentifier {
                registry: "message",
                id: kind.clone(),
            })?;
        let message = decoder(&mut r, ctx)?;
        if r.read_bytes(TRAILER.len())? != TRAILER {
            return Err(DecodeError::malformed(format!(
                "'{kind}' body not followed by trailer"
            )));
        }
        Ok((message, r.position()))
    }
}

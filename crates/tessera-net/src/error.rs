//! Error types for the protocol layers.

/// Errors produced while decoding a message or one of its payloads.
///
/// Every variant except [`DecodeError::Truncated`] makes the stream lose
/// alignment and is recovered by the resync engine. `Truncated` means the
/// bytes seen so far end mid-message; the framer waits for more input and
/// only escalates it to a desync once the message grows past its size limit.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// Fewer bytes are available than the field requires.
    #[error("truncated: needed {needed} bytes, {available} available")]
    Truncated {
        /// Bytes the read required.
        needed: usize,
        /// Bytes that were left in the buffer.
        available: usize,
    },

    /// A registry had no decoder for the identifier.
    #[error("unknown {registry} identifier '{id}'")]
    UnknownIdentifier {
        /// Which registry missed (`"message"`, `"entity"`, `"renderer"`).
        registry: &'static str,
        /// The identifier that was looked up.
        id: String,
    },

    /// A registered decoder rejected its body.
    #[error("malformed body: {0}")]
    MalformedBody(String),

    /// A delta referenced an entity that is not held locally.
    #[error("reference to unknown entity {0:032x}")]
    UnknownEntityReference(u128),
}

impl DecodeError {
    /// Shorthand for [`DecodeError::MalformedBody`].
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedBody(reason.into())
    }

    /// Whether this error only means "not enough bytes yet".
    pub fn is_truncated(&self) -> bool {
        matches!(self, Self::Truncated { .. })
    }
}

/// Errors produced while encoding an outbound message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EncodeError {
    /// The string does not fit the `u16` length prefix.
    #[error("string of {0} bytes exceeds the u16 length prefix")]
    StringTooLong(usize),

    /// The byte blob does not fit the `i32` length prefix.
    #[error("blob of {0} bytes exceeds the i32 length prefix")]
    BlobTooLong(usize),

    /// The value has no wire representation on this side of the protocol.
    #[error("cannot encode {0}")]
    Unsupported(String),
}

/// Errors that end the key exchange. All of them are fatal for the connection.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// The shared secret does not fit a signed 64-bit value.
    #[error("shared secret exceeds the signed 64-bit range")]
    Overflow,

    /// The configured prime is unusable.
    #[error("invalid prime: {0}")]
    InvalidPrime(String),

    /// The peer sent a negative or oversized length prefix.
    #[error("invalid big-integer length {0}")]
    InvalidLength(i32),

    /// The transport failed, closed, or timed out during the exchange.
    #[error("connection closed during handshake")]
    TransportClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced by a connection to its owner.
#[derive(Debug, thiserror::Error)]
pub enum NetError {
    /// The connection is closed; nothing can be sent.
    #[error("connection closed")]
    Closed,

    /// The key exchange failed.
    #[error("handshake failed: {0}")]
    Handshake(#[from] HandshakeError),

    /// A message could not be encoded.
    #[error("encode failed: {0}")]
    Encode(#[from] EncodeError),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

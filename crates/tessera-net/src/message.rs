//! Message traits.
//!
//! A message type implements [`OutboundMessage`] if the client sends it and
//! [`Inbound`] if the client receives it; many implement both.

use crate::codec::ByteWriter;
use crate::error::EncodeError;

/// A message the client can send.
pub trait OutboundMessage {
    /// Short string identifying the message kind on the wire.
    fn kind(&self) -> &str;

    /// Write the message body (everything between kind and trailer).
    fn encode(&self, w: &mut ByteWriter) -> Result<(), EncodeError>;
}

/// A decoded message, applied once to the session context `C` and dropped.
pub trait Inbound<C>: Send {
    /// Kind the message was registered under, for diagnostics.
    fn kind(&self) -> &str;

    /// Apply the message to the session.
    fn execute(self: Box<Self>, ctx: &mut C);
}

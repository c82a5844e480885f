//! Client protocol stack: binary codec, key exchange, message framing with
//! trailer resync, the message registry and the connection dispatch loop.

pub mod codec;
pub mod connection;
pub mod dispatch;
pub mod error;
pub mod framing;
pub mod handshake;
pub mod message;
pub mod registry;

pub use codec::{ByteReader, ByteWriter};
pub use connection::{
    ConnectOptions, ConnectionHandle, ConnectionState, ConnectionStateWatch, ServerConnection,
};
pub use dispatch::{FrameEvent, InboundFramer};
pub use error::{DecodeError, EncodeError, HandshakeError, NetError};
pub use framing::{FrameConfig, TRAILER, TrailerScanner, encode_envelope};
pub use handshake::{HandshakeConfig, HandshakeState, KeyExchange, SharedSecret, serve_key_exchange};
pub use message::{Inbound, OutboundMessage};
pub use registry::{MessageDecoder, MessageRegistry};

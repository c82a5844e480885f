//! Client error types.

use tessera_net::{HandshakeError, NetError};

/// Errors surfaced while building or connecting a [`Client`](crate::Client).
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The connection failed or was closed.
    #[error("network error: {0}")]
    Net(#[from] NetError),

    /// The handshake settings do not form a usable key exchange.
    #[error("invalid handshake settings: {0}")]
    Handshake(#[from] HandshakeError),

    /// The configured server address did not resolve.
    #[error("could not resolve {address}: {source}")]
    Resolve {
        address: String,
        #[source]
        source: std::io::Error,
    },
}

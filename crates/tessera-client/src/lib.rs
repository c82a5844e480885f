//! Tessera client: connects to a game server, mirrors its world and reports
//! player input.
//!
//! ```no_run
//! # async fn run() -> Result<(), tessera_client::ClientError> {
//! let addr = "127.0.0.1:3333".parse().unwrap();
//! let mut client = tessera_client::Client::builder().connect(addr).await?;
//! client.wait_for_tick(std::time::Duration::from_secs(1));
//! println!("{} entities", client.world().len());
//! # Ok(())
//! # }
//! ```

pub mod client;
pub mod collaborators;
pub mod error;
pub mod keys;
pub mod messages;
pub mod session;

pub use client::{Client, ClientBuilder, Resources};
pub use collaborators::{
    EntityRenderer, FrameListener, ImageHandle, InputSource, ResourceResolver,
};
pub use error::ClientError;
pub use keys::{KeyCode, PressedKeys};
pub use messages::{
    ClientInfo, FullUpdate, HeartBeat, IncrementalUpdate, register_builtin_messages,
};
pub use session::Session;

//! Per-connection session context that inbound messages execute against.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tessera_net::{ConnectionHandle, NetError, OutboundMessage, SharedSecret};
use tessera_world::WorldSynchronizer;

use crate::keys::PressedKeys;
use crate::messages::ClientInfo;

/// State the dispatch loop owns for one connection.
///
/// Game-defined messages receive `&Session` while decoding and `&mut Session`
/// while executing.
pub struct Session {
    handle: ConnectionHandle,
    secret: SharedSecret,
    sync: WorldSynchronizer,
    keys: PressedKeys,
    in_game: Arc<AtomicBool>,
}

impl Session {
    pub(crate) fn new(
        handle: ConnectionHandle,
        secret: SharedSecret,
        sync: WorldSynchronizer,
        keys: PressedKeys,
        in_game: Arc<AtomicBool>,
    ) -> Self {
        Self {
            handle,
            secret,
            sync,
            keys,
            in_game,
        }
    }

    /// Send a message to the server.
    pub fn send(&self, message: &dyn OutboundMessage) -> Result<(), NetError> {
        self.handle.send(message)
    }

    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }

    /// Secret negotiated by the key exchange.
    pub fn secret(&self) -> SharedSecret {
        self.secret
    }

    pub fn sync(&self) -> &WorldSynchronizer {
        &self.sync
    }

    pub fn pressed_keys(&self) -> &PressedKeys {
        &self.keys
    }

    pub fn in_game(&self) -> bool {
        self.in_game.load(Ordering::Acquire)
    }

    /// Address subsequent messages to game `tag` and empty the mirror.
    pub fn join_game(&self, tag: i32) {
        join_game(&self.handle, &self.sync, &self.in_game, tag);
    }

    /// Address subsequent messages to the server itself.
    pub fn leave_game(&self) {
        leave_game(&self.handle, &self.in_game);
    }

    /// Finish a server tick: signal the owning thread and report held keys.
    pub(crate) fn tick(&self) {
        self.sync.signal_tick();
        let info = ClientInfo {
            keys: self.keys.snapshot(),
        };
        if let Err(e) = self.handle.send(&info) {
            tracing::debug!("Could not send client info: {e}");
        }
    }
}

pub(crate) fn join_game(
    handle: &ConnectionHandle,
    sync: &WorldSynchronizer,
    in_game: &AtomicBool,
    tag: i32,
) {
    tracing::info!("Joining game {tag}");
    handle.set_routing_tag(tag);
    sync.reset();
    in_game.store(true, Ordering::Release);
}

pub(crate) fn leave_game(handle: &ConnectionHandle, in_game: &AtomicBool) {
    tracing::info!("Leaving game {}", handle.routing_tag());
    handle.set_routing_tag(0);
    in_game.store(false, Ordering::Release);
}

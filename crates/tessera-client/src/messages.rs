//! Built-in messages.
//!
//! | kind        | payload                       | direction        |
//! |-------------|-------------------------------|------------------|
//! | `HeartBeat` | `bool isResponse, string text`| both             |
//! | `fullUpdt`  | entity snapshot               | server -> client |
//! | `clInfo`    | `i32 count, count × i32 key`  | client -> server |
//! | `incUpdt`   | world delta                   | server -> client |

use tessera_net::{
    ByteReader, ByteWriter, DecodeError, EncodeError, Inbound, MessageRegistry, OutboundMessage,
};
use tessera_world::{Delta, Entity, encode_snapshot};

use crate::keys::KeyCode;
use crate::session::Session;

pub const HEART_BEAT: &str = "HeartBeat";
pub const FULL_UPDATE: &str = "fullUpdt";
pub const CLIENT_INFO: &str = "clInfo";
pub const INCREMENTAL_UPDATE: &str = "incUpdt";

/// Register the built-in message decoders.
pub fn register_builtin_messages(registry: &mut MessageRegistry<Session>) {
    registry.register(HEART_BEAT, HeartBeat::decode);
    registry.register(FULL_UPDATE, FullUpdate::decode);
    registry.register(CLIENT_INFO, ClientInfo::decode);
    registry.register(INCREMENTAL_UPDATE, IncrementalUpdate::decode);
}

// ---------------------------------------------------------------------------
// HeartBeat
// ---------------------------------------------------------------------------

/// Liveness probe. A request is answered with a response carrying the same text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartBeat {
    pub is_response: bool,
    pub text: String,
}

impl HeartBeat {
    pub fn request(text: impl Into<String>) -> Self {
        Self {
            is_response: false,
            text: text.into(),
        }
    }

    fn read(r: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let is_response = r.read_bool()?;
        let text = r.read_str()?;
        Ok(Self { is_response, text })
    }

    fn decode(
        r: &mut ByteReader<'_>,
        _: &Session,
    ) -> Result<Box<dyn Inbound<Session>>, DecodeError> {
        Ok(Box::new(Self::read(r)?))
    }
}

impl OutboundMessage for HeartBeat {
    fn kind(&self) -> &str {
        HEART_BEAT
    }

    fn encode(&self, w: &mut ByteWriter) -> Result<(), EncodeError> {
        w.write_bool(self.is_response);
        w.write_str(&self.text)
    }
}

impl Inbound<Session> for HeartBeat {
    fn kind(&self) -> &str {
        HEART_BEAT
    }

    fn execute(self: Box<Self>, session: &mut Session) {
        if self.is_response {
            tracing::info!("Received heartbeat answer: {}", self.text);
            return;
        }
        let answer = HeartBeat {
            is_response: true,
            text: self.text,
        };
        if let Err(e) = session.send(&answer) {
            tracing::warn!("Failed to answer heartbeat: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// fullUpdt
// ---------------------------------------------------------------------------

/// Every entity of the world. Replaces the mirror and ends a server tick.
#[derive(Debug, Clone, PartialEq)]
pub struct FullUpdate {
    pub entities: Vec<Entity>,
}

impl FullUpdate {
    fn decode(
        r: &mut ByteReader<'_>,
        session: &Session,
    ) -> Result<Box<dyn Inbound<Session>>, DecodeError> {
        let entities = session.sync().decode_snapshot(r)?;
        Ok(Box::new(Self { entities }))
    }
}

impl OutboundMessage for FullUpdate {
    fn kind(&self) -> &str {
        FULL_UPDATE
    }

    fn encode(&self, w: &mut ByteWriter) -> Result<(), EncodeError> {
        encode_snapshot(w, &self.entities)
    }
}

impl Inbound<Session> for FullUpdate {
    fn kind(&self) -> &str {
        FULL_UPDATE
    }

    fn execute(self: Box<Self>, session: &mut Session) {
        session.sync().apply_snapshot(self.entities);
        session.tick();
    }
}

// ---------------------------------------------------------------------------
// clInfo
// ---------------------------------------------------------------------------

/// Keys held on the client, sent once per server tick.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClientInfo {
    pub keys: Vec<KeyCode>,
}

impl ClientInfo {
    fn read(r: &mut ByteReader<'_>) -> Result<Self, DecodeError> {
        let count = r.read_i32()?;
        if count < 0 {
            return Err(DecodeError::malformed(format!("negative key count {count}")));
        }
        let count = count as usize;
        if count.saturating_mul(4) > r.remaining() {
            return Err(DecodeError::Truncated {
                needed: count.saturating_mul(4),
                available: r.remaining(),
            });
        }
        let keys = (0..count)
            .map(|_| r.read_i32().map(KeyCode))
            .collect::<Result<_, _>>()?;
        Ok(Self { keys })
    }

    fn decode(
        r: &mut ByteReader<'_>,
        _: &Session,
    ) -> Result<Box<dyn Inbound<Session>>, DecodeError> {
        Ok(Box::new(Self::read(r)?))
    }
}

impl OutboundMessage for ClientInfo {
    fn kind(&self) -> &str {
        CLIENT_INFO
    }

    fn encode(&self, w: &mut ByteWriter) -> Result<(), EncodeError> {
        let count = i32::try_from(self.keys.len())
            .map_err(|_| EncodeError::Unsupported("more than i32::MAX keys".into()))?;
        w.write_i32(count);
        for key in &self.keys {
            w.write_i32(key.0);
        }
        Ok(())
    }
}

impl Inbound<Session> for ClientInfo {
    fn kind(&self) -> &str {
        CLIENT_INFO
    }

    fn execute(self: Box<Self>, _: &mut Session) {
        tracing::trace!("Ignoring client info echo with {} keys", self.keys.len());
    }
}

// ---------------------------------------------------------------------------
// incUpdt
// ---------------------------------------------------------------------------

/// Changes since the previous tick. Ends a server tick.
#[derive(Debug, Clone, PartialEq)]
pub struct IncrementalUpdate {
    pub delta: Delta,
}

impl IncrementalUpdate {
    fn decode(
        r: &mut ByteReader<'_>,
        session: &Session,
    ) -> Result<Box<dyn Inbound<Session>>, DecodeError> {
        let delta = session.sync().decode_delta(r)?;
        Ok(Box::new(Self { delta }))
    }
}

impl OutboundMessage for IncrementalUpdate {
    fn kind(&self) -> &str {
        INCREMENTAL_UPDATE
    }

    fn encode(&self, w: &mut ByteWriter) -> Result<(), EncodeError> {
        self.delta.encode(w)
    }
}

impl Inbound<Session> for IncrementalUpdate {
    fn kind(&self) -> &str {
        INCREMENTAL_UPDATE
    }

    fn execute(self: Box<Self>, session: &mut Session) {
        session.sync().apply_delta(self.delta);
        session.tick();
    }
}

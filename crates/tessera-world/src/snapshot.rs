//! Full world snapshots: `i32 count`, then `count × [i32 kind][entity body]`.

use tessera_net::{ByteReader, ByteWriter, DecodeError, EncodeError};

use crate::entity::Entity;
use crate::registry::{Registries, encode_entity};

/// Decode a full snapshot. Any failing entity fails the whole snapshot.
pub fn decode_snapshot(
    r: &mut ByteReader<'_>,
    registries: &Registries,
) -> Result<Vec<Entity>, DecodeError> {
    let count = r.read_i32()?;
    if count < 0 {
        return Err(DecodeError::malformed(format!("negative entity count {count}")));
    }
    // The smallest entity body is well over 4 bytes; cap the preallocation by
    // what the buffer could hold.
    let mut entities = Vec::with_capacity((count as usize).min(r.remaining() / 4));
    for index in 0..count {
        let kind = r.read_i32()?;
        let entity = registries.decode_entity(r, kind).map_err(|e| {
            if !e.is_truncated() {
                tracing::warn!("Snapshot entity {index} of {count} (kind {kind}) failed: {e}");
            }
            e
        })?;
        entities.push(entity);
    }
    Ok(entities)
}

/// Encode a full snapshot of built-in entities.
pub fn encode_snapshot(w: &mut ByteWriter, entities: &[Entity]) -> Result<(), EncodeError> {
    let count = i32::try_from(entities.len())
        .map_err(|_| EncodeError::Unsupported("snapshot with > i32::MAX entities".into()))?;
    w.write_i32(count);
    for entity in entities {
        encode_entity(w, entity)?;
    }
    Ok(())
}

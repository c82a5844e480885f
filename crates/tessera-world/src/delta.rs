//! Incremental world deltas.
//!
//! ```text
//! upserts:  { i32 kind, bool isNew, (entity body | uuid, patch*, 0xFF) }*  i32::MIN
//! removals: { uuid }*  i32::MIN
//! patch:    0x00 f64 x, f64 y | 0x01 f64 rot | 0x02 i32 rendererKind, payload
//! ```
//!
//! Every reference is checked against the entities known before the delta.
//! A delta that fails to decode is dropped whole.

use std::collections::HashMap;

use glam::DVec2;
use tessera_net::{ByteReader, ByteWriter, DecodeError, EncodeError};

use crate::entity::{Entity, EntityUuid, read_vec2, write_vec2};
use crate::registry::{Registries, encode_entity_body};
use crate::renderer::Renderer;
use crate::sync::EntityIndex;

/// Terminates both the upsert and removal lists.
pub const LIST_END: i32 = i32::MIN;

const TAG_POSITION: u8 = 0x00;
const TAG_ROTATION: u8 = 0x01;
const TAG_RENDERER: u8 = 0x02;
const TAG_END: u8 = 0xFF;

/// A single attribute change on an existing entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Patch {
    Position(DVec2),
    Rotation(f64),
    Renderer(Renderer),
}

impl Patch {
    pub(crate) fn apply(&self, entity: &mut Entity) {
        match self {
            Patch::Position(position) => entity.position = *position,
            Patch::Rotation(rotation) => entity.rotation = *rotation,
            Patch::Renderer(renderer) => entity.renderer = renderer.clone(),
        }
    }
}

/// One entry of the upsert list.
#[derive(Debug, Clone, PartialEq)]
pub enum Upsert {
    /// A new entity, sent with its full body.
    New(Entity),
    /// Changes to an entity already held.
    Patch {
        uuid: EntityUuid,
        patches: Vec<Patch>,
    },
}

/// A decoded incremental update.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Delta {
    pub upserts: Vec<Upsert>,
    pub removals: Vec<EntityUuid>,
}

impl Delta {
    /// Decode a delta, resolving references against `known`.
    pub fn decode(
        r: &mut ByteReader<'_>,
        registries: &Registries,
        known: &EntityIndex,
    ) -> Result<Self, DecodeError> {
        let mut delta = Delta::default();

        loop {
            let kind = r.read_i32()?;
            if kind == LIST_END {
                break;
            }
            if r.read_bool()? {
                delta.upserts.push(Upsert::New(registries.decode_entity(r, kind)?));
                continue;
            }
            let uuid = EntityUuid::decode(r)?;
            let shape = known
                .shape(uuid)
                .ok_or(DecodeError::UnknownEntityReference(uuid.0))?;
            let mut patches = Vec::new();
            loop {
                match r.read_u8()? {
                    TAG_END => break,
                    TAG_POSITION => patches.push(Patch::Position(read_vec2(r)?)),
                    TAG_ROTATION => patches.push(Patch::Rotation(r.read_f64()?)),
                    TAG_RENDERER => {
                        patches.push(Patch::Renderer(registries.decode_renderer(r, shape)?))
                    }
                    tag => {
                        return Err(DecodeError::malformed(format!(
                            "unknown patch tag {tag:#04x} for entity {uuid}"
                        )));
                    }
                }
            }
            delta.upserts.push(Upsert::Patch { uuid, patches });
        }

        // Duplicated UUIDs can be removed once per held copy.
        let mut removed: HashMap<EntityUuid, usize> = HashMap::new();
        loop {
            if r.peek_i32()? == LIST_END {
                r.read_i32()?;
                break;
            }
            let uuid = EntityUuid::decode(r)?;
            let count = removed.entry(uuid).or_insert(0);
            if *count >= known.count(uuid) {
                return Err(DecodeError::UnknownEntityReference(uuid.0));
            }
            *count += 1;
            delta.removals.push(uuid);
        }

        Ok(delta)
    }

    /// Encode the delta. New entities must have built-in shapes and renderers.
    pub fn encode(&self, w: &mut ByteWriter) -> Result<(), EncodeError> {
        for upsert in &self.upserts {
            match upsert {
                Upsert::New(entity) => {
                    w.write_i32(entity.shape.kind());
                    w.write_bool(true);
                    encode_entity_body(w, entity)?;
                }
                Upsert::Patch { uuid, patches } => {
                    // The kind of a patched entity is not read back; 0 is a
                    // placeholder.
                    w.write_i32(0);
                    w.write_bool(false);
                    uuid.encode(w);
                    for patch in patches {
                        match patch {
                            Patch::Position(position) => {
                                w.write_u8(TAG_POSITION);
                                write_vec2(w, *position);
                            }
                            Patch::Rotation(rotation) => {
                                w.write_u8(TAG_ROTATION);
                                w.write_f64(*rotation);
                            }
                            Patch::Renderer(renderer) => {
                                w.write_u8(TAG_RENDERER);
                                renderer.encode(w)?;
                            }
                        }
                    }
                    w.write_u8(TAG_END);
                }
            }
        }
        w.write_i32(LIST_END);

        for uuid in &self.removals {
            if uuid.hi() >> 32 == LIST_END as i64 {
                return Err(EncodeError::Unsupported(format!(
                    "removal of {uuid} collides with the list terminator"
                )));
            }
            uuid.encode(w);
        }
        w.write_i32(LIST_END);
        Ok(())
    }
}

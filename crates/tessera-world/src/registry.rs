//! Entity and renderer registries.
//!
//! Both map an `i32` kind to a plain decode function. Unlike the message
//! registry, registering a kind twice replaces the earlier decoder.

use std::collections::HashMap;

use tessera_net::{ByteReader, ByteWriter, DecodeError, EncodeError};

use crate::entity::{self, Entity, EntityUuid, Geometry, Shape};
use crate::renderer::{self, Renderer};

/// Decode the geometry part of an entity body.
pub type EntityDecoder = fn(&mut ByteReader<'_>) -> Result<Geometry, DecodeError>;

/// Decode a renderer payload for an entity with shape `host`.
pub type RendererDecoder = fn(&mut ByteReader<'_>, &Shape) -> Result<Renderer, DecodeError>;

/// Entity kind → geometry decoder.
#[derive(Default)]
pub struct EntityRegistry {
    decoders: HashMap<i32, EntityDecoder>,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `decoder` for `kind`, replacing any earlier registration.
    pub fn register(&mut self, kind: i32, decoder: EntityDecoder) {
        self.decoders.insert(kind, decoder);
    }

    pub fn lookup(&self, kind: i32) -> Option<EntityDecoder> {
        self.decoders.get(&kind).copied()
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

/// Renderer kind → payload decoder.
#[derive(Default)]
pub struct RendererRegistry {
    decoders: HashMap<i32, RendererDecoder>,
}

impl RendererRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `decoder` for `kind`, replacing any earlier registration.
    pub fn register(&mut self, kind: i32, decoder: RendererDecoder) {
        self.decoders.insert(kind, decoder);
    }

    pub fn lookup(&self, kind: i32) -> Option<RendererDecoder> {
        self.decoders.get(&kind).copied()
    }

    pub fn len(&self) -> usize {
        self.decoders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.decoders.is_empty()
    }
}

/// The entity and renderer registries a session decodes world state with.
///
/// Populated before connecting and shared read-only afterwards.
#[derive(Default)]
pub struct Registries {
    pub entities: EntityRegistry,
    pub renderers: RendererRegistry,
}

impl Registries {
    /// Registries holding only the built-in kinds.
    pub fn with_builtins() -> Self {
        let mut registries = Self::default();
        registries
            .entities
            .register(entity::kind::POLYGON, entity::decode_polygon);
        registries
            .entities
            .register(entity::kind::CIRCLE, entity::decode_circle);
        registries
            .renderers
            .register(renderer::kind::NONE, renderer::decode_none);
        registries
            .renderers
            .register(renderer::kind::POLY_COLOR, renderer::decode_poly_color);
        registries
            .renderers
            .register(renderer::kind::POLY_IMAGE, renderer::decode_poly_image);
        registries
            .renderers
            .register(renderer::kind::CIRCLE_COLOR, renderer::decode_circle_color);
        registries
    }

    /// Decode an entity body of the given `kind`:
    /// `uuid, bool isLocal, <geometry>, i32 rendererKind, <payload>`.
    pub fn decode_entity(&self, r: &mut ByteReader<'_>, kind: i32) -> Result<Entity, DecodeError> {
        let decoder = self
            .entities
            .lookup(kind)
            .ok_or_else(|| DecodeError::UnknownIdentifier {
                registry: "entity",
                id: kind.to_string(),
            })?;
        let uuid = EntityUuid::decode(r)?;
        let is_local = r.read_bool()?;
        let geometry = decoder(r)?;
        let renderer = self.decode_renderer(r, &geometry.shape)?;
        Ok(Entity::new(uuid, geometry, renderer, is_local))
    }

    /// Decode `[i32 kind][payload]` for an entity with shape `host`.
    pub fn decode_renderer(
        &self,
        r: &mut ByteReader<'_>,
        host: &Shape,
    ) -> Result<Renderer, DecodeError> {
        let kind = r.read_i32()?;
        let decoder = self
            .renderers
            .lookup(kind)
            .ok_or_else(|| DecodeError::UnknownIdentifier {
                registry: "renderer",
                id: kind.to_string(),
            })?;
        decoder(r, host)
    }
}

/// Write `[kind][entity body]` for an entity with built-in shape and renderer.
pub fn encode_entity(w: &mut ByteWriter, entity: &Entity) -> Result<(), EncodeError> {
    w.write_i32(entity.shape.kind());
    encode_entity_body(w, entity)
}

/// Write the entity body without its kind.
pub fn encode_entity_body(w: &mut ByteWriter, entity: &Entity) -> Result<(), EncodeError> {
    entity.uuid.encode(w);
    w.write_bool(entity.is_local);
    entity::encode_geometry(w, entity)?;
    entity.renderer.encode(w)
}

//! Client-side mirror of the server's world.
//!
//! Full snapshots and incremental deltas are decoded on the network side by a
//! [`WorldSynchronizer`] and applied on the owning thread by [`World::flush`].
//! Entity and renderer kinds are extensible through [`Registries`].

pub mod delta;
pub mod entity;
pub mod registry;
pub mod renderer;
pub mod snapshot;
pub mod sync;
pub mod world;

pub use delta::{Delta, LIST_END, Patch, Upsert};
pub use entity::{Entity, EntityUuid, Geometry, Polygon, Shape};
pub use registry::{
    EntityDecoder, EntityRegistry, Registries, RendererDecoder, RendererRegistry, encode_entity,
    encode_entity_body,
};
pub use renderer::{Color, Renderer};
pub use snapshot::{decode_snapshot, encode_snapshot};
pub use sync::{EntityChange, EntityIndex, WorldSynchronizer, WorldUpdate};
pub use world::{FlushSummary, World};

//! Network side of the world mirror.
//!
//! The dispatch loop decodes snapshots and deltas against an [`EntityIndex`]
//! describing what the [`World`] will hold once it has applied every queued
//! update, then queues the changes as [`WorldUpdate`]s. The owning thread
//! merges them in [`World::flush`]; the held entity list is never touched
//! from the network side.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::{Receiver, Sender};
use tessera_net::{ByteReader, DecodeError};

use crate::delta::{Delta, Patch, Upsert};
use crate::entity::{Entity, EntityUuid, Shape};
use crate::registry::Registries;
use crate::snapshot::decode_snapshot;
use crate::world::World;

/// A change queued for the owning thread.
#[derive(Debug, Clone, PartialEq)]
pub enum WorldUpdate {
    /// Replace every held entity.
    Replace(Vec<Entity>),
    /// Every change of one delta, applied in a single flush.
    Batch(Vec<EntityChange>),
    /// The server finished a tick.
    Tick,
}

/// One entity-level change within a [`WorldUpdate::Batch`].
#[derive(Debug, Clone, PartialEq)]
pub enum EntityChange {
    /// Append a new entity.
    Add(Entity),
    /// Patch the first held entity with `uuid`.
    Patch { uuid: EntityUuid, patches: Vec<Patch> },
    /// Flag the first held entity with `uuid` for removal.
    Remove(EntityUuid),
}

/// UUID → shape of every entity the mirror will hold.
///
/// Duplicate UUIDs are counted; lookups return the first copy's shape and a
/// removal drops the first copy.
#[derive(Debug, Default)]
pub struct EntityIndex {
    entries: HashMap<EntityUuid, Vec<Shape>>,
}

impl EntityIndex {
    /// Shape of the first held entity with `uuid`.
    pub fn shape(&self, uuid: EntityUuid) -> Option<&Shape> {
        self.entries.get(&uuid).and_then(|shapes| shapes.first())
    }

    /// Number of held entities with `uuid`.
    pub fn count(&self, uuid: EntityUuid) -> usize {
        self.entries.get(&uuid).map_or(0, Vec::len)
    }

    pub fn contains(&self, uuid: EntityUuid) -> bool {
        self.count(uuid) > 0
    }

    pub fn insert(&mut self, uuid: EntityUuid, shape: Shape) {
        self.entries.entry(uuid).or_default().push(shape);
    }

    /// Drop the first copy of `uuid`. Returns `false` if none is held.
    pub fn remove(&mut self, uuid: EntityUuid) -> bool {
        let Some(shapes) = self.entries.get_mut(&uuid) else {
            return false;
        };
        shapes.remove(0);
        if shapes.is_empty() {
            self.entries.remove(&uuid);
        }
        true
    }

    /// Total number of held entities.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    fn rebuild(&mut self, entities: &[Entity]) {
        self.clear();
        for entity in entities {
            self.insert(entity.uuid, entity.shape.clone());
        }
    }
}

/// Decodes world messages and queues their effects for the [`World`].
///
/// Cloneable: every clone shares the index and the queue, so the owning
/// thread can reset the mirror while the dispatch loop keeps its own copy.
#[derive(Clone)]
pub struct WorldSynchronizer {
    registries: Arc<Registries>,
    index: Arc<Mutex<EntityIndex>>,
    updates: Sender<WorldUpdate>,
}

impl WorldSynchronizer {
    /// Create a synchronizer and the [`World`] it feeds.
    pub fn new(registries: Arc<Registries>) -> (Self, World) {
        let (updates, receiver): (Sender<WorldUpdate>, Receiver<WorldUpdate>) =
            crossbeam_channel::unbounded();
        let sync = Self {
            registries,
            index: Arc::new(Mutex::new(EntityIndex::default())),
            updates,
        };
        (sync, World::new(receiver))
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    fn index(&self) -> MutexGuard<'_, EntityIndex> {
        self.index.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of entities the mirror holds once all queued updates apply.
    pub fn known_entities(&self) -> usize {
        self.index().len()
    }

    /// Whether an entity with `uuid` is held or queued.
    pub fn is_known(&self, uuid: EntityUuid) -> bool {
        self.index().contains(uuid)
    }

    /// Decode a full snapshot body.
    pub fn decode_snapshot(&self, r: &mut ByteReader<'_>) -> Result<Vec<Entity>, DecodeError> {
        decode_snapshot(r, &self.registries)
    }

    /// Decode a delta body against the currently known entities.
    pub fn decode_delta(&self, r: &mut ByteReader<'_>) -> Result<Delta, DecodeError> {
        Delta::decode(r, &self.registries, &self.index())
    }

    /// Queue a full replacement of the mirror.
    pub fn apply_snapshot(&self, entities: Vec<Entity>) {
        let mut index = self.index();
        index.rebuild(&entities);
        tracing::debug!("Queued snapshot of {} entities", entities.len());
        self.push(WorldUpdate::Replace(entities));
    }

    /// Queue the effects of a decoded delta as one batch.
    ///
    /// References that no longer resolve (the mirror was reset between decode
    /// and apply) are skipped.
    pub fn apply_delta(&self, delta: Delta) {
        let mut index = self.index();
        let mut changes = Vec::with_capacity(delta.upserts.len() + delta.removals.len());
        let (mut added, mut patched, mut removed) = (0usize, 0usize, 0usize);
        for upsert in delta.upserts {
            match upsert {
                Upsert::New(entity) => {
                    index.insert(entity.uuid, entity.shape.clone());
                    added += 1;
                    changes.push(EntityChange::Add(entity));
                }
                Upsert::Patch { uuid, patches } => {
                    if !index.contains(uuid) {
                        tracing::debug!("Dropping patch for entity {uuid} after reset");
                        continue;
                    }
                    patched += 1;
                    changes.push(EntityChange::Patch { uuid, patches });
                }
            }
        }
        for uuid in delta.removals {
            if index.remove(uuid) {
                removed += 1;
                changes.push(EntityChange::Remove(uuid));
            } else {
                tracing::debug!("Dropping removal of entity {uuid} after reset");
            }
        }
        tracing::trace!("Queued delta: {added} added, {patched} patched, {removed} removed");
        if !changes.is_empty() {
            self.push(WorldUpdate::Batch(changes));
        }
    }

    /// Queue a server tick.
    pub fn signal_tick(&self) {
        self.push(WorldUpdate::Tick);
    }

    /// Empty the mirror.
    pub fn reset(&self) {
        let mut index = self.index();
        index.clear();
        self.push(WorldUpdate::Replace(Vec::new()));
    }

    fn push(&self, update: WorldUpdate) {
        if self.updates.send(update).is_err() {
            tracing::debug!("World dropped, discarding update");
        }
    }
}

//! The owning thread's side of the world mirror.

use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError};

use crate::entity::{Entity, EntityUuid};
use crate::sync::{EntityChange, WorldUpdate};

/// What one [`World::flush`] applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushSummary {
    /// Entity updates applied (ticks excluded).
    pub applied: usize,
    /// Server ticks seen.
    pub ticks: usize,
    /// Entities dropped by removal reconciliation.
    pub removed: usize,
}

/// Locally held mirror of the server's entities.
///
/// Created together with its [`WorldSynchronizer`](crate::WorldSynchronizer).
/// Changes queued by the synchronizer become visible on the next
/// [`flush`](Self::flush).
pub struct World {
    entities: Vec<Entity>,
    updates: Receiver<WorldUpdate>,
    local_player: Option<usize>,
    ticks: u64,
}

impl World {
    pub(crate) fn new(updates: Receiver<WorldUpdate>) -> Self {
        Self {
            entities: Vec::new(),
            updates,
            local_player: None,
            ticks: 0,
        }
    }

    /// Held entities in arrival order.
    pub fn entities(&self) -> &[Entity] {
        &self.entities
    }

    /// First held entity with `uuid`.
    pub fn get(&self, uuid: EntityUuid) -> Option<&Entity> {
        self.entities.iter().find(|e| e.uuid == uuid)
    }

    /// The entity controlled by this client, if any.
    pub fn local_player(&self) -> Option<&Entity> {
        self.local_player.and_then(|i| self.entities.get(i))
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Server ticks observed by all flushes so far.
    pub fn server_ticks(&self) -> u64 {
        self.ticks
    }

    /// Apply every queued update, then drop entities flagged for removal.
    pub fn flush(&mut self) -> FlushSummary {
        let mut summary = FlushSummary::default();
        while let Ok(update) = self.updates.try_recv() {
            self.apply(update, &mut summary);
        }
        self.reconcile(&mut summary);
        summary
    }

    /// Block until a server tick arrives or `timeout` passes, applying
    /// updates as they arrive. Returns whether a tick was seen.
    pub fn wait_for_tick(&mut self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut summary = self.flush();
        while summary.ticks == 0 {
            let remaining = deadline.saturating_duration_since(Instant::now());
            match self.updates.recv_timeout(remaining) {
                Ok(update) => {
                    self.apply(update, &mut summary);
                    while let Ok(update) = self.updates.try_recv() {
                        self.apply(update, &mut summary);
                    }
                    self.reconcile(&mut summary);
                }
                Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        summary.ticks > 0
    }

    fn apply(&mut self, update: WorldUpdate, summary: &mut FlushSummary) {
        match update {
            WorldUpdate::Replace(entities) => {
                self.entities = entities;
                summary.applied += 1;
            }
            WorldUpdate::Batch(changes) => {
                for change in changes {
                    self.apply_change(change, summary);
                }
            }
            WorldUpdate::Tick => {
                self.ticks += 1;
                summary.ticks += 1;
            }
        }
    }

    fn apply_change(&mut self, change: EntityChange, summary: &mut FlushSummary) {
        match change {
            EntityChange::Add(entity) => {
                self.entities.push(entity);
                summary.applied += 1;
            }
            EntityChange::Patch { uuid, patches } => match self.live_mut(uuid) {
                Some(entity) => {
                    for patch in &patches {
                        patch.apply(entity);
                    }
                    summary.applied += 1;
                }
                None => tracing::debug!("Patch for entity {uuid} that is no longer held"),
            },
            EntityChange::Remove(uuid) => match self.live_mut(uuid) {
                Some(entity) => {
                    entity.pending_removal = true;
                    summary.applied += 1;
                }
                None => tracing::debug!("Removal of entity {uuid} that is no longer held"),
            },
        }
    }

    /// First held entity with `uuid` not already flagged for removal.
    fn live_mut(&mut self, uuid: EntityUuid) -> Option<&mut Entity> {
        self.entities
            .iter_mut()
            .find(|e| e.uuid == uuid && !e.pending_removal)
    }

    fn reconcile(&mut self, summary: &mut FlushSummary) {
        let before = self.entities.len();
        self.entities.retain(|e| !e.pending_removal);
        summary.removed += before - self.entities.len();

        let mut local = None;
        for (i, entity) in self.entities.iter().enumerate() {
            if !entity.is_local {
                continue;
            }
            match local {
                None => local = Some(i),
                Some(first) => tracing::warn!(
                    "More than one locally controlled entity in the world ({} and {})",
                    self.entities[first].uuid,
                    entity.uuid
                ),
            }
        }
        self.local_player = local;
    }
}

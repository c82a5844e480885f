//! Interfaces to the application's drawing, input and resource code.

use tessera_world::{Entity, World};

use crate::keys::KeyCode;

/// Application-owned image, as registered with [`Client::add_resource`].
///
/// [`Client::add_resource`]: crate::Client::add_resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle {
    /// Application-defined id (texture slot, atlas index, ...).
    pub id: u32,
    pub width: u32,
    pub height: u32,
}

/// Looks up images referenced by image renderers.
pub trait ResourceResolver {
    fn resolve_image(&self, key: &str) -> Option<ImageHandle>;
}

/// Draws one entity.
pub trait EntityRenderer {
    fn render(&mut self, entity: &Entity, resources: &dyn ResourceResolver);
}

/// Reports which keys are currently held.
pub trait InputSource {
    fn pressed_keys(&self) -> Vec<KeyCode>;
}

/// Notified once per frame in which at least one server tick was applied.
pub trait FrameListener {
    fn on_frame_tick(&mut self, world: &World);
}

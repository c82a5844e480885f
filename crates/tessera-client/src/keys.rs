//! Pressed-key tracking shared between the input side and the dispatch loop.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard};

/// Integer key code sent to the server in `clInfo`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyCode(pub i32);

impl KeyCode {
    pub const ENTER: KeyCode = KeyCode(10);
    pub const SHIFT: KeyCode = KeyCode(16);
    pub const ESCAPE: KeyCode = KeyCode(27);
    pub const SPACE: KeyCode = KeyCode(32);
    pub const LEFT: KeyCode = KeyCode(37);
    pub const UP: KeyCode = KeyCode(38);
    pub const RIGHT: KeyCode = KeyCode(39);
    pub const DOWN: KeyCode = KeyCode(40);
    pub const A: KeyCode = KeyCode(65);
    pub const D: KeyCode = KeyCode(68);
    pub const S: KeyCode = KeyCode(83);
    pub const W: KeyCode = KeyCode(87);
}

/// Set of currently held keys.
///
/// Clones share the same set. The application presses and releases keys;
/// the dispatch loop reads a snapshot once per server tick.
#[derive(Debug, Clone, Default)]
pub struct PressedKeys {
    keys: Arc<Mutex<BTreeSet<KeyCode>>>,
}

impl PressedKeys {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeSet<KeyCode>> {
        self.keys.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Mark `key` held. Returns `false` if it already was.
    pub fn press(&self, key: KeyCode) -> bool {
        self.lock().insert(key)
    }

    /// Mark `key` released. Returns `false` if it was not held.
    pub fn release(&self, key: KeyCode) -> bool {
        self.lock().remove(&key)
    }

    pub fn is_pressed(&self, key: KeyCode) -> bool {
        self.lock().contains(&key)
    }

    /// Replace the held set wholesale.
    pub fn set_all(&self, keys: impl IntoIterator<Item = KeyCode>) {
        let mut held = self.lock();
        held.clear();
        held.extend(keys);
    }

    pub fn release_all(&self) {
        self.lock().clear();
    }

    /// Held keys in ascending code order.
    pub fn snapshot(&self) -> Vec<KeyCode> {
        self.lock().iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_press_and_release() {
        let keys = PressedKeys::new();
        assert!(keys.press(KeyCode::W));
        assert!(!keys.press(KeyCode::W));
        assert!(keys.is_pressed(KeyCode::W));
        assert!(keys.release(KeyCode::W));
        assert!(!keys.release(KeyCode::W));
        assert!(keys.snapshot().is_empty());
    }

    #[test]
    fn test_clones_share_state() {
        let keys = PressedKeys::new();
        let reader = keys.clone();
        keys.press(KeyCode::SPACE);
        keys.press(KeyCode::A);
        assert_eq!(reader.snapshot(), vec![KeyCode::SPACE, KeyCode::A]);
    }

    #[test]
    fn test_set_all_replaces() {
        let keys = PressedKeys::new();
        keys.press(KeyCode::UP);
        keys.set_all([KeyCode::D, KeyCode::S]);
        assert_eq!(keys.snapshot(), vec![KeyCode::D, KeyCode::S]);
        keys.release_all();
        assert!(keys.snapshot().is_empty());
    }

    #[test]
    fn test_concurrent_presses() {
        let keys = PressedKeys::new();
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let keys = keys.clone();
                std::thread::spawn(move || {
                    for code in 0..50 {
                        keys.press(KeyCode(i * 50 + code));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(keys.snapshot().len(), 200);
    }
}

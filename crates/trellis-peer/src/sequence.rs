use std::collections::HashMap;

use parking_lot::Mutex;
use trellis_types::{ContainerId, IdentityKey, OpaqueHandle, WeakHandle};

struct Seen {
    handle: WeakHandle,
    key: IdentityKey,
}

#[derive(Default)]
struct SequenceState {
    next: u64,
    seen: HashMap<usize, Seen>,
}

/// Monotonic surrogate keys for in-memory objects of one container.
///
/// A key is assigned the first time an object is seen and stays with it
/// while the object is alive. Entries are keyed by allocation address but
/// verified against a weak handle, so an address reused after the original
/// object died gets a fresh key.
pub struct IdentitySequence {
    container: ContainerId,
    state: Mutex<SequenceState>,
}

impl IdentitySequence {
    pub fn new(container: ContainerId) -> Self {
        Self {
            container,
            state: Mutex::new(SequenceState::default()),
        }
    }

    pub fn container(&self) -> ContainerId {
        self.container
    }

    /// Key for `obj`, assigning the next one on first sight.
    pub fn key_for(&self, obj: &OpaqueHandle) -> IdentityKey {
        let mut state = self.state.lock();
        if let Some(key) = live_key(&state, obj) {
            return key;
        }
        state.next += 1;
        let key = IdentityKey::new(self.container, state.next);
        state.seen.insert(
            obj.addr(),
            Seen {
                handle: obj.downgrade(),
                key,
            },
        );
        key
    }

    /// Key for `obj` if it has been seen, without assigning one.
    pub fn existing(&self, obj: &OpaqueHandle) -> Option<IdentityKey> {
        live_key(&self.state.lock(), obj)
    }

    /// Drop entries whose objects are gone. Returns how many were removed.
    pub fn purge(&self) -> usize {
        let mut state = self.state.lock();
        let before = state.seen.len();
        state.seen.retain(|_, seen| seen.handle.upgrade().is_some());
        before - state.seen.len()
    }

    /// Number of tracked objects, dead ones included until purged.
    pub fn len(&self) -> usize {
        self.state.lock().seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn live_key(state: &SequenceState, obj: &OpaqueHandle) -> Option<IdentityKey> {
    let seen = state.seen.get(&obj.addr())?;
    match seen.handle.upgrade() {
        Some(alive) if alive.ptr_eq(obj) => Some(seen.key),
        _ => None,
    }
}

impl std::fmt::Debug for IdentitySequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("IdentitySequence")
            .field("container", &self.container)
            .field("next", &state.next)
            .field("tracked", &state.seen.len())
            .finish()
    }
}

//! Best-effort memory of peers' Noise static keys.
//!
//! A cache hit lets the initiator attempt the two-message IK pattern
//! instead of the full XX exchange. Entries are written only after a
//! successful XX handshake authenticated the peer. No TTL, no bound,
//! not persisted.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::identity::PeerId;
use crate::keypair::Key;

/// Mapping from peer identity to its Noise static public key.
///
/// Injected into the channel; the default is [`MemoryKeyCache`]. Reads
/// happen at initiator dispatch, writes on XX completion, so the lock is
/// never on the packet path.
pub trait StaticKeyCache: Send + Sync {
    /// Looks up the static key for a peer.
    fn get(&self, peer: &PeerId) -> Option<Key>;

    /// Records the static key seen for a peer, replacing any prior entry.
    fn put(&self, peer: PeerId, key: Key);

    /// Drops all entries.
    fn clear(&self);
}

/// In-process cache backed by a mutex-guarded map.
#[derive(Default)]
pub struct MemoryKeyCache {
    inner: Mutex<HashMap<PeerId, Key>>,
}

impl MemoryKeyCache {
    /// Creates an empty cache.
    pub fn new() -> Self {
        Self::default()
    }
}

impl StaticKeyCache for MemoryKeyCache {
    fn get(&self, peer: &PeerId) -> Option<Key> {
        self.inner.lock().unwrap().get(peer).copied()
    }

    fn put(&self, peer: PeerId, key: Key) {
        self.inner.lock().unwrap().insert(peer, key);
    }

    fn clear(&self) {
        self.inner.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::Identity;

    #[test]
    fn put_get_clear() {
        let cache = MemoryKeyCache::new();
        let peer = Identity::generate().peer_id();
        let key = Key::new([5; 32]);

        assert_eq!(cache.get(&peer), None);

        cache.put(peer, key);
        assert_eq!(cache.get(&peer), Some(key));

        cache.clear();
        assert_eq!(cache.get(&peer), None);
    }

    #[test]
    fn put_replaces_existing_entry() {
        let cache = MemoryKeyCache::new();
        let peer = Identity::generate().peer_id();

        cache.put(peer, Key::new([1; 32]));
        cache.put(peer, Key::new([2; 32]));
        assert_eq!(cache.get(&peer), Some(Key::new([2; 32])));
    }
}

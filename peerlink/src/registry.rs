//! Session registry: one entry per remote peer, mutated only through
//! [`SessionRegistry::update`].
//!
//! Discovery and invitation callbacks for the same peer can race (a peer
//! restarting produces lost/found/invite in quick succession). Funnelling
//! every create/replace/delete through a single read-modify-write closure that
//! runs under the entry's exclusive lock means two racing callbacks can never
//! both install a session for the same peer.
//!
//! Backed by [`scc::HashMap`], whose entry API locks only the bucket holding
//! the key, so updates for different peers proceed in parallel.

use peerlink_id::PeerIdentifier;

/// Concurrent map from peer identifier to session.
///
/// Generic over the stored value so the locking contract can be exercised on
/// its own; nodes use it with [`PeerSession`](crate::PeerSession).
pub struct SessionRegistry<V = crate::PeerSession> {
    sessions: scc::HashMap<PeerIdentifier, V>,
}

impl<V> Default for SessionRegistry<V>
where
    V: Clone + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> SessionRegistry<V>
where
    V: Clone + 'static,
{
    pub fn new() -> Self {
        Self {
            sessions: scc::HashMap::new(),
        }
    }

    /// Atomically replace the entry for `key` with whatever `f` returns.
    ///
    /// `f` sees the current value (if any) and runs while the entry is locked:
    /// no other `update` for the same key can interleave with it. Returning
    /// `None` removes the entry. The stored value is returned.
    ///
    /// `f` must not call back into the registry.
    pub fn update<F>(&self, key: PeerIdentifier, f: F) -> Option<V>
    where
        F: FnOnce(Option<&V>) -> Option<V>,
    {
        match self.sessions.entry(key) {
            scc::hash_map::Entry::Occupied(mut occupied) => match f(Some(occupied.get())) {
                Some(value) => {
                    *occupied.get_mut() = value.clone();
                    Some(value)
                }
                None => {
                    occupied.remove();
                    None
                }
            },
            scc::hash_map::Entry::Vacant(vacant) => {
                let value = f(None)?;
                vacant.insert_entry(value.clone());
                Some(value)
            }
        }
    }

    /// Snapshot of the current entry. Does not take the exclusive lock.
    pub fn lookup(&self, key: &PeerIdentifier) -> Option<V> {
        self.sessions.read(key, |_, value| value.clone())
    }

    pub fn keys(&self) -> Vec<PeerIdentifier> {
        let mut keys = Vec::with_capacity(self.sessions.len());
        self.sessions.scan(|key, _| keys.push(key.clone()));
        keys
    }

    pub fn values(&self) -> Vec<V> {
        let mut values = Vec::with_capacity(self.sessions.len());
        self.sessions.scan(|_, value| values.push(value.clone()));
        values
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}

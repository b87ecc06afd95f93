//! Identity → connection index

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::connection::{ConnectionId, IdentityId};
use crate::error::{Error, Result};

/// Index of live connections per identity.
///
/// An identity may hold several connections at once (devices, tabs). Each
/// identity's set lives in its own `DashMap` shard entry, so registrations
/// for unrelated identities do not serialize on one lock. A reverse index
/// keeps deregistration O(1) and enforces one identity per connection.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    by_identity: Arc<DashMap<IdentityId, HashSet<ConnectionId>>>,
    owners: Arc<DashMap<ConnectionId, IdentityId>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `connection_id` to the identity's set.
    ///
    /// Registering the same pair twice is a no-op. Registering a connection
    /// that already belongs to another identity fails and changes nothing.
    pub fn register(&self, identity_id: &str, connection_id: &str) -> Result<()> {
        // The owner slot stays locked until the identity set is updated.
        // Nothing takes these two locks in the opposite order.
        let owner = match self.owners.entry(connection_id.to_string()) {
            Entry::Occupied(owner) if owner.get() != identity_id => {
                return Err(Error::AlreadyRegistered {
                    connection_id: connection_id.to_string(),
                    identity_id: owner.get().clone(),
                });
            }
            Entry::Occupied(owner) => owner.into_ref(),
            Entry::Vacant(slot) => slot.insert(identity_id.to_string()),
        };

        self.by_identity
            .entry(identity_id.to_string())
            .or_default()
            .insert(connection_id.to_string());
        drop(owner);
        Ok(())
    }

    /// Remove `connection_id` from whichever identity holds it.
    ///
    /// Returns the identity it was registered under, or `None` if it never
    /// was. The identity entry is pruned once its set is empty.
    pub fn deregister(&self, connection_id: &str) -> Option<IdentityId> {
        let (_, identity_id) = self.owners.remove(connection_id)?;

        if let Entry::Occupied(mut entry) = self.by_identity.entry(identity_id.clone()) {
            entry.get_mut().remove(connection_id);
            if entry.get().is_empty() {
                entry.remove();
            }
        }
        Some(identity_id)
    }

    /// Snapshot of the identity's live connections (empty if none)
    pub fn connections_for(&self, identity_id: &str) -> HashSet<ConnectionId> {
        self.by_identity
            .get(identity_id)
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    /// The identity a connection is registered under
    pub fn identity_of(&self, connection_id: &str) -> Option<IdentityId> {
        self.owners.get(connection_id).map(|id| id.clone())
    }

    /// Number of identities with at least one live connection
    pub fn identity_count(&self) -> usize {
        self.by_identity.len()
    }

    /// Number of registered connections across all identities
    pub fn connection_count(&self) -> usize {
        self.owners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_creates_identity_set() {
        let registry = ConnectionRegistry::new();
        registry.register("u1", "c1").unwrap();
        registry.register("u1", "c2").unwrap();

        let conns = registry.connections_for("u1");
        assert_eq!(conns.len(), 2);
        assert!(conns.contains("c1") && conns.contains("c2"));
        assert_eq!(registry.identity_count(), 1);
        assert_eq!(registry.connection_count(), 2);
    }

    #[test]
    fn register_same_pair_twice_is_noop() {
        let registry = ConnectionRegistry::new();
        registry.register("u1", "c1").unwrap();
        registry.register("u1", "c1").unwrap();
        assert_eq!(registry.connections_for("u1").len(), 1);
    }

    #[test]
    fn register_under_second_identity_fails() {
        let registry = ConnectionRegistry::new();
        registry.register("u1", "c1").unwrap();

        let err = registry.register("u2", "c1").unwrap_err();
        assert!(matches!(err, Error::AlreadyRegistered { .. }));
        assert!(registry.connections_for("u2").is_empty());
        assert_eq!(registry.identity_of("c1").as_deref(), Some("u1"));
    }

    #[test]
    fn deregister_prunes_empty_identity() {
        let registry = ConnectionRegistry::new();
        registry.register("u1", "c1").unwrap();
        registry.register("u1", "c2").unwrap();

        assert_eq!(registry.deregister("c1").as_deref(), Some("u1"));
        assert_eq!(registry.identity_count(), 1);

        registry.deregister("c2");
        assert_eq!(registry.identity_count(), 0);
        assert!(registry.connections_for("u1").is_empty());
    }

    #[test]
    fn deregister_unknown_is_noop() {
        let registry = ConnectionRegistry::new();
        assert!(registry.deregister("never").is_none());
        registry.register("u1", "c1").unwrap();
        registry.deregister("c1");
        assert!(registry.deregister("c1").is_none());
    }

    #[test]
    fn deregistered_connection_never_listed() {
        let registry = ConnectionRegistry::new();
        let ops: &[(bool, &str)] = &[
            (true, "a"),
            (true, "b"),
            (false, "a"),
            (true, "c"),
            (false, "b"),
            (true, "a"),
            (false, "c"),
            (false, "a"),
        ];

        let mut live = HashSet::new();
        for (register, conn) in ops {
            if *register {
                registry.register("u1", conn).unwrap();
                live.insert(conn.to_string());
            } else {
                registry.deregister(conn);
                live.remove(*conn);
            }
            assert_eq!(registry.connections_for("u1"), live);
        }
        assert_eq!(registry.identity_count(), 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_churn_leaves_no_entries() {
        let registry = ConnectionRegistry::new();
        let mut handles = Vec::new();

        for task in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..200 {
                    let identity = format!("u{}", i % 5);
                    let conn = format!("t{task}-c{i}");
                    registry.register(&identity, &conn).unwrap();
                    tokio::task::yield_now().await;
                    assert!(registry.connections_for(&identity).contains(&conn));
                    registry.deregister(&conn);
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(registry.identity_count(), 0);
        assert_eq!(registry.connection_count(), 0);
    }
}

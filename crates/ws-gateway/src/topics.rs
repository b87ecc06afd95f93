//! Topic → subscriber index

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;

use crate::connection::ConnectionId;

/// Topic identifier, e.g. `post:42`
pub type TopicId = String;

/// Build the topic id for a discussion thread
pub fn post_topic(post_id: &str) -> TopicId {
    format!("post:{post_id}")
}

/// Dynamic membership of connections in topic groups.
///
/// Independent of the [`ConnectionRegistry`](crate::ConnectionRegistry): a
/// connection may be in any number of topics. Empty topics are pruned.
#[derive(Clone, Default)]
pub struct TopicMembership {
    members: Arc<DashMap<TopicId, HashSet<ConnectionId>>>,
    subscriptions: Arc<DashMap<ConnectionId, HashSet<TopicId>>>,
}

impl TopicMembership {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add the connection to the topic. Returns `false` if it was already a member.
    pub fn join(&self, connection_id: &str, topic_id: &str) -> bool {
        // The connection's subscription entry stays locked until both sets agree.
        let mut subscribed = self
            .subscriptions
            .entry(connection_id.to_string())
            .or_default();

        let added = subscribed.insert(topic_id.to_string());
        if added {
            self.members
                .entry(topic_id.to_string())
                .or_default()
                .insert(connection_id.to_string());
        }
        added
    }

    /// Remove the connection from the topic. Returns `false` if it was not a member.
    pub fn leave(&self, connection_id: &str, topic_id: &str) -> bool {
        let Entry::Occupied(mut subscribed) = self.subscriptions.entry(connection_id.to_string())
        else {
            return false;
        };

        let removed = subscribed.get_mut().remove(topic_id);
        if removed {
            remove_member(&self.members, topic_id, connection_id);
        }
        if subscribed.get().is_empty() {
            subscribed.remove();
        }
        removed
    }

    /// Remove the connection from every topic it belongs to.
    ///
    /// Returns the number of topics it left; a second call returns 0.
    pub fn leave_all(&self, connection_id: &str) -> usize {
        let Entry::Occupied(subscribed) = self.subscriptions.entry(connection_id.to_string())
        else {
            return 0;
        };

        for topic_id in subscribed.get() {
            remove_member(&self.members, topic_id, connection_id);
        }
        let (_, topics) = subscribed.remove_entry();
        topics.len()
    }

    /// Snapshot of the topic's current members
    pub fn members_of(&self, topic_id: &str) -> HashSet<ConnectionId> {
        self.members
            .get(topic_id)
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    /// Topics the connection currently belongs to
    pub fn topics_of(&self, connection_id: &str) -> HashSet<TopicId> {
        self.subscriptions
            .get(connection_id)
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    /// Number of topics with at least one member
    pub fn topic_count(&self) -> usize {
        self.members.len()
    }
}

/// Remove `value` from the set under `key`, pruning the key when the set empties
fn remove_member(map: &DashMap<String, HashSet<String>>, key: &str, value: &str) -> bool {
    let Entry::Occupied(mut entry) = map.entry(key.to_string()) else {
        return false;
    };
    let removed = entry.get_mut().remove(value);
    if entry.get().is_empty() {
        entry.remove();
    }
    removed
}

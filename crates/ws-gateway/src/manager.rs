//! Connection Manager: lifecycle, topic membership and delivery

use std::collections::HashSet;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::connection::{
    Connection, ConnectionId, DeliveryFailure, Frame, IdentityId, DEFAULT_QUEUE_CAPACITY,
};
use crate::error::Result;
use crate::event::{encode, GatewayEvent};
use crate::registry::ConnectionRegistry;
use crate::topics::{TopicId, TopicMembership};

/// Manages all authenticated WebSocket connections.
///
/// Cheap to clone; every clone shares the same state. Business code holds a
/// clone and calls [`emit_to_identity`](Self::emit_to_identity),
/// [`emit_to_topic`](Self::emit_to_topic) or [`broadcast`](Self::broadcast)
/// after its own write has succeeded. None of the three can fail: a
/// connection that cannot take the event is skipped and logged.
#[derive(Clone)]
pub struct ConnectionManager {
    /// All authenticated connections: connection_id -> handle
    connections: Arc<DashMap<ConnectionId, Connection>>,
    /// identity_id -> [connection_ids]
    registry: ConnectionRegistry,
    /// topic_id -> [connection_ids]
    topics: TopicMembership,
    /// Gateway instance ID
    instance_id: String,
    queue_capacity: usize,
}

impl ConnectionManager {
    /// Create a new connection manager
    pub fn new(instance_id: impl Into<String>) -> Self {
        Self {
            connections: Arc::new(DashMap::new()),
            registry: ConnectionRegistry::new(),
            topics: TopicMembership::new(),
            instance_id: instance_id.into(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Set the per-connection send queue depth
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity.max(1);
        self
    }

    /// Admit a connection that has passed authentication.
    ///
    /// Returns the handle and the receiving end of its send queue, which the
    /// connection task drains onto the socket.
    pub fn attach(
        &self,
        identity_id: IdentityId,
        client_ip: Option<String>,
        user_agent: Option<String>,
    ) -> Result<(Connection, mpsc::Receiver<Frame>)> {
        let (connection, receiver) = Connection::new(
            identity_id,
            self.instance_id.clone(),
            client_ip,
            user_agent,
            self.queue_capacity,
        );

        self.connections
            .insert(connection.id.clone(), connection.clone());

        if let Err(e) = self
            .registry
            .register(&connection.identity_id, &connection.id)
        {
            self.connections.remove(&connection.id);
            return Err(e);
        }

        info!(
            connection_id = %connection.id,
            identity_id = %connection.identity_id,
            total_connections = self.connections.len(),
            "Connection registered"
        );

        Ok((connection, receiver))
    }

    /// Tear down a connection: leave every topic and deregister it.
    ///
    /// Safe to call any number of times; returns `true` only for the call
    /// that actually removed the connection.
    pub fn close(&self, connection_id: &str) -> bool {
        let removed = self.connections.remove(connection_id);
        let topics_left = self.topics.leave_all(connection_id);
        let identity_id = self.registry.deregister(connection_id);

        let Some((_, connection)) = removed else {
            return false;
        };
        connection.terminate();

        info!(
            connection_id,
            identity_id = ?identity_id,
            topics_left,
            remaining_connections = self.connections.len(),
            "Connection unregistered"
        );
        true
    }

    /// Subscribe a connection to a topic.
    ///
    /// Returns whether the request was accepted: `false` if the connection is
    /// not (or no longer) authenticated. Joining twice is accepted.
    pub fn join(&self, connection_id: &str, topic_id: &str) -> bool {
        if !self.connections.contains_key(connection_id) {
            debug!(connection_id, topic_id, "Join from unknown connection ignored");
            return false;
        }

        self.topics.join(connection_id, topic_id);

        // A close racing this join has already run leave_all; undo our entry.
        if !self.connections.contains_key(connection_id) {
            self.topics.leave(connection_id, topic_id);
            return false;
        }

        info!(connection_id, topic_id, "Joined topic");
        true
    }

    /// Unsubscribe a connection from a topic. Leaving a topic never joined is accepted.
    pub fn leave(&self, connection_id: &str, topic_id: &str) -> bool {
        if !self.connections.contains_key(connection_id) {
            debug!(connection_id, topic_id, "Leave from unknown connection ignored");
            return false;
        }

        self.topics.leave(connection_id, topic_id);
        info!(connection_id, topic_id, "Left topic");
        true
    }

    /// Send an event to every live connection of an identity.
    ///
    /// An identity with no connections is not an error; nothing is queued
    /// for later.
    pub fn emit_to_identity<E: GatewayEvent + ?Sized>(&self, identity_id: &str, event: &E) -> usize {
        let targets = self.registry.connections_for(identity_id);
        if targets.is_empty() {
            debug!(identity_id, event = event.name(), "No live connections for identity");
            return 0;
        }

        let sent = self.deliver(targets, event);
        debug!(identity_id, event = event.name(), sent_count = sent, "Sent event to identity");
        sent
    }

    /// Send an event to every member of a topic
    pub fn emit_to_topic<E: GatewayEvent + ?Sized>(&self, topic_id: &str, event: &E) -> usize {
        let targets = self.topics.members_of(topic_id);
        if targets.is_empty() {
            debug!(topic_id, event = event.name(), "No members in topic");
            return 0;
        }

        let sent = self.deliver(targets, event);
        debug!(topic_id, event = event.name(), sent_count = sent, "Sent event to topic");
        sent
    }

    /// Broadcast an event to all connections
    pub fn broadcast<E: GatewayEvent + ?Sized>(&self, event: &E) -> usize {
        let handles: Vec<Connection> = self
            .connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        if handles.is_empty() {
            return 0;
        }

        let Some(frame) = self.encode(event) else {
            return 0;
        };
        let sent = self.push_all(handles, &frame, event.name());
        debug!(event = event.name(), sent_count = sent, "Broadcast event to all connections");
        sent
    }

    /// Ask every connection of an identity to close (e.g. after a ban).
    ///
    /// Teardown runs in each connection's task once its socket is closed.
    pub fn disconnect_identity(&self, identity_id: &str) -> usize {
        let handles = self.resolve(self.registry.connections_for(identity_id));
        for connection in &handles {
            connection.terminate();
        }
        if !handles.is_empty() {
            info!(identity_id, count = handles.len(), "Disconnecting identity");
        }
        handles.len()
    }

    /// Ask every connection to close
    pub fn disconnect_all(&self) -> usize {
        let mut count = 0;
        for entry in self.connections.iter() {
            entry.value().terminate();
            count += 1;
        }
        count
    }

    /// Live connection ids of an identity
    pub fn connections_for(&self, identity_id: &str) -> HashSet<ConnectionId> {
        self.registry.connections_for(identity_id)
    }

    /// Current members of a topic
    pub fn members_of(&self, topic_id: &str) -> HashSet<ConnectionId> {
        self.topics.members_of(topic_id)
    }

    /// Topics a connection has joined
    pub fn topics_of(&self, connection_id: &str) -> HashSet<TopicId> {
        self.topics.topics_of(connection_id)
    }

    /// Look up a connection handle
    pub fn get(&self, connection_id: &str) -> Option<Connection> {
        self.connections.get(connection_id).map(|c| c.value().clone())
    }

    /// Get total connection count
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Number of identities with a live connection
    pub fn identity_count(&self) -> usize {
        self.registry.identity_count()
    }

    /// Number of topics with at least one member
    pub fn topic_count(&self) -> usize {
        self.topics.topic_count()
    }

    /// List all connections
    pub fn list_connections(&self) -> Vec<Connection> {
        self.connections.iter().map(|e| e.value().clone()).collect()
    }

    /// Tear down connections whose writer side is gone. Returns how many were removed.
    pub fn cleanup_dead_connections(&self) -> usize {
        let dead_ids: Vec<ConnectionId> = self
            .connections
            .iter()
            .filter(|e| !e.value().is_active())
            .map(|e| e.key().clone())
            .collect();

        dead_ids.iter().filter(|id| self.close(id)).count()
    }

    /// Get the instance ID
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    fn deliver<E: GatewayEvent + ?Sized>(&self, targets: HashSet<ConnectionId>, event: &E) -> usize {
        let handles = self.resolve(targets);
        let Some(frame) = self.encode(event) else {
            return 0;
        };
        self.push_all(handles, &frame, event.name())
    }

    /// Clone handles out of the table so no shard lock is held while pushing
    fn resolve(&self, ids: HashSet<ConnectionId>) -> Vec<Connection> {
        ids.iter()
            .filter_map(|id| self.connections.get(id).map(|c| c.value().clone()))
            .collect()
    }

    fn encode<E: GatewayEvent + ?Sized>(&self, event: &E) -> Option<Frame> {
        match encode(event) {
            Ok(frame) => Some(frame),
            Err(e) => {
                error!(error = %e, event = event.name(), "Failed to serialize event");
                None
            }
        }
    }

    fn push_all(&self, handles: Vec<Connection>, frame: &Frame, event_name: &str) -> usize {
        let mut sent = 0;
        for connection in handles {
            match connection.push(frame.clone()) {
                Ok(()) => sent += 1,
                Err(DeliveryFailure::QueueFull) => {
                    warn!(
                        connection_id = %connection.id,
                        event = event_name,
                        "Send queue full, dropping event"
                    );
                }
                Err(DeliveryFailure::Closed) => {
                    debug!(
                        connection_id = %connection.id,
                        event = event_name,
                        "Connection closed before delivery"
                    );
                    self.close(&connection.id);
                }
            }
        }
        sent
    }
}

//! WebSocket connection handles

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Transport-assigned connection identifier
pub type ConnectionId = String;

/// Stable identifier of an authenticated user
pub type IdentityId = String;

/// A serialized text frame queued for a connection's writer task.
///
/// Shared between every connection a single emit reaches, so an event is
/// serialized once no matter how many sockets it goes out on.
pub type Frame = Arc<str>;

/// Default per-connection send queue depth
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Metadata about a connection
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    /// When the connection was authenticated
    pub connected_at: chrono::DateTime<chrono::Utc>,
    /// Gateway instance ID
    pub instance_id: String,
    /// Client IP address (if available)
    pub client_ip: Option<String>,
    /// User agent (if available)
    pub user_agent: Option<String>,
}

/// Why a push to one connection did not go through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// The writer side is gone; the socket closed or is closing
    Closed,
    /// The send queue is full; the frame was dropped
    QueueFull,
}

/// Handle to one live, authenticated WebSocket.
///
/// The socket itself is owned by its connection task. This handle only
/// carries the sending half of the connection's bounded queue and a token
/// that asks the task to terminate.
#[derive(Debug, Clone)]
pub struct Connection {
    /// Unique connection ID
    pub id: ConnectionId,
    /// Identity this connection authenticated as; never changes
    pub identity_id: IdentityId,
    /// Connection metadata
    pub metadata: ConnectionMetadata,
    sender: mpsc::Sender<Frame>,
    shutdown: CancellationToken,
}

impl Connection {
    /// Create a new connection handle and the receiving end of its queue
    pub fn new(
        identity_id: IdentityId,
        instance_id: String,
        client_ip: Option<String>,
        user_agent: Option<String>,
        queue_capacity: usize,
    ) -> (Self, mpsc::Receiver<Frame>) {
        let (sender, receiver) = mpsc::channel(queue_capacity.max(1));
        let connection = Self {
            id: uuid::Uuid::new_v4().to_string(),
            identity_id,
            metadata: ConnectionMetadata {
                connected_at: chrono::Utc::now(),
                instance_id,
                client_ip,
                user_agent,
            },
            sender,
            shutdown: CancellationToken::new(),
        };
        (connection, receiver)
    }

    /// Check if the connection is still active
    pub fn is_active(&self) -> bool {
        !self.sender.is_closed() && !self.shutdown.is_cancelled()
    }

    /// Enqueue a frame without waiting.
    ///
    /// Frames pushed on one connection leave in the order they were pushed.
    /// When the queue is full the new frame is dropped.
    pub fn push(&self, frame: Frame) -> Result<(), DeliveryFailure> {
        self.sender.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => DeliveryFailure::QueueFull,
            mpsc::error::TrySendError::Closed(_) => DeliveryFailure::Closed,
        })
    }

    /// Ask the connection task to close the socket
    pub fn terminate(&self) {
        self.shutdown.cancel();
    }

    /// Resolves once [`terminate`](Self::terminate) has been called
    pub async fn terminated(&self) {
        self.shutdown.cancelled().await
    }
}

//! # WS Gateway
//!
//! A WebSocket presence and fan-out gateway for Rust.
//!
//! ## Features
//!
//! - **Authenticated Connections**: every socket presents a bearer token at
//!   handshake time; plug in any `TokenVerifier` (HS256 JWT built in)
//! - **Identity Routing**: one identity may hold many connections (devices,
//!   tabs); `emit_to_identity` reaches all of them
//! - **Topic Routing**: connections join and leave named topics (one per
//!   discussion thread, say) and `emit_to_topic` reaches the members
//! - **Best-effort Delivery**: each connection has its own bounded FIFO send
//!   queue; a slow or closed socket never holds up or fails an emit
//! - **Built-in Server**: optional Axum-based server with the WebSocket
//!   endpoint, health probes and a stats endpoint
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ws_gateway::{Gateway, JwtVerifier};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Gateway::builder()
//!         .port(8080)
//!         .verifier(JwtVerifier::new(b"dev-secret"))
//!         .build()?
//!         .run()
//!         .await
//! }
//! ```
//!
//! ## Pushing Events
//!
//! ```rust,ignore
//! use serde::Serialize;
//! use ws_gateway::GatewayEvent;
//!
//! #[derive(Serialize)]
//! #[serde(rename_all = "camelCase")]
//! struct CommentLiked { comment_id: String, total_likes: usize }
//!
//! impl GatewayEvent for CommentLiked {
//!     fn name(&self) -> &str { "commentLiked" }
//! }
//!
//! let gateway = Gateway::builder().verifier(verifier).build()?;
//! let connections = gateway.connections();
//!
//! // After the like has been stored:
//! connections.emit_to_topic("post:42", &CommentLiked { comment_id, total_likes });
//! ```
//!
//! ## Client Protocol
//!
//! Connect to `/ws` with `Authorization: Bearer <token>` or `?token=<token>`.
//! Frames are JSON text:
//!
//! ```json
//! {"event": "joinTopic", "data": {"topicId": "post:42"}, "ack": 1}
//! {"event": "ack", "ack": 1, "data": {"ok": true}}
//! {"event": "commentAdded", "data": {"...": "..."}}
//! ```

pub mod auth;
mod connection;
mod error;
pub mod event;
mod manager;
mod registry;
mod topics;

#[cfg(feature = "server")]
mod gateway;
#[cfg(feature = "server")]
pub mod handler;

// Re-exports
pub use auth::{verifier_fn, Claims, JwtVerifier, TokenVerifier};
pub use connection::{
    Connection, ConnectionId, ConnectionMetadata, DeliveryFailure, Frame, IdentityId,
    DEFAULT_QUEUE_CAPACITY,
};
pub use error::{Error, Result};
pub use event::{ClientMessage, ClientRequest, GatewayEvent, JsonEvent};
pub use manager::ConnectionManager;
pub use registry::ConnectionRegistry;
pub use topics::{post_topic, TopicId, TopicMembership};

#[cfg(feature = "server")]
pub use gateway::{Gateway, GatewayBuilder};

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;

//! Error types for WS Gateway

use thiserror::Error;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in WS Gateway
///
/// Delivery failures never show up here: the delivery primitives on
/// [`ConnectionManager`](crate::ConnectionManager) absorb them per connection.
#[derive(Error, Debug)]
pub enum Error {
    /// Handshake carried no token, or the token failed verification
    #[error("Invalid token: {0}")]
    InvalidToken(String),

    /// Handshake token was well formed but past its expiry
    #[error("Token expired")]
    TokenExpired,

    /// Token verification did not finish within the handshake timeout
    #[error("Token verification timed out")]
    VerifierTimeout,

    /// A connection id was registered under a second identity
    #[error("Connection {connection_id} is already registered to identity {identity_id}")]
    AlreadyRegistered {
        connection_id: String,
        identity_id: String,
    },

    /// A token could not be signed
    #[error("Token signing failed: {0}")]
    TokenSigning(String),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

//! Handshake authentication
//!
//! A connection presents a bearer token when it is established. The gateway
//! hands it to a [`TokenVerifier`], which yields the identity the connection
//! will belong to for its whole life.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::connection::IdentityId;
use crate::error::{Error, Result};

/// Verifies handshake tokens
#[async_trait]
pub trait TokenVerifier: Send + Sync + 'static {
    /// Return the identity the token was issued to
    async fn verify(&self, token: &str) -> Result<IdentityId>;

    /// Return the verifier name (for logging)
    fn name(&self) -> &'static str {
        "custom"
    }
}

/// Verify an optional token, bounded by `timeout`.
///
/// A missing or blank token fails with [`Error::InvalidToken`] without
/// calling the verifier.
pub async fn verify_with_timeout<V: TokenVerifier + ?Sized>(
    verifier: &V,
    token: Option<&str>,
    timeout: Duration,
) -> Result<IdentityId> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::InvalidToken("no token".to_string()))?;

    tokio::time::timeout(timeout, verifier.verify(token))
        .await
        .map_err(|_| Error::VerifierTimeout)?
}

/// JWT claims carried by access tokens
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Identity id
    pub sub: String,
    /// Display name, when the issuer includes one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    /// Issued at (Unix timestamp)
    #[serde(default)]
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// HS256 JWT verifier
#[derive(Clone)]
pub struct JwtVerifier {
    decoding: DecodingKey,
    encoding: EncodingKey,
    validation: Validation,
}

impl JwtVerifier {
    /// Create a verifier for tokens signed with `secret`
    pub fn new(secret: &[u8]) -> Self {
        Self {
            decoding: DecodingKey::from_secret(secret),
            encoding: EncodingKey::from_secret(secret),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Validate a token and return its claims
    pub fn decode(&self, token: &str) -> Result<Claims> {
        let data = jsonwebtoken::decode::<Claims>(token, &self.decoding, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => Error::TokenExpired,
                _ => Error::InvalidToken(e.to_string()),
            })?;

        if data.claims.sub.trim().is_empty() {
            return Err(Error::InvalidToken("missing subject".to_string()));
        }
        Ok(data.claims)
    }

    /// Sign a token for `identity_id` valid for `ttl`.
    ///
    /// Tokens are normally minted by the credential service; this is for
    /// tests and tooling that share the secret.
    pub fn issue(&self, identity_id: &str, username: Option<&str>, ttl: Duration) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: identity_id.to_string(),
            username: username.map(str::to_string),
            iat: now,
            exp: now + ttl.as_secs() as i64,
        };

        jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::TokenSigning(e.to_string()))
    }
}

#[async_trait]
impl TokenVerifier for JwtVerifier {
    async fn verify(&self, token: &str) -> Result<IdentityId> {
        self.decode(token).map(|claims| claims.sub)
    }

    fn name(&self) -> &'static str {
        "jwt"
    }
}

/// Verifier backed by an async closure
pub struct FnVerifier<F> {
    f: F,
}

/// Helper to create a verifier from a closure
///
/// ```rust,ignore
/// let verifier = verifier_fn(|token: String| async move {
///     match token.as_str() {
///         "secret" => Ok("u1".to_string()),
///         _ => Err(Error::InvalidToken("unknown token".into())),
///     }
/// });
/// ```
pub fn verifier_fn<F, Fut>(f: F) -> FnVerifier<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<IdentityId>> + Send + 'static,
{
    FnVerifier { f }
}

#[async_trait]
impl<F, Fut> TokenVerifier for FnVerifier<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<IdentityId>> + Send + 'static,
{
    async fn verify(&self, token: &str) -> Result<IdentityId> {
        (self.f)(token.to_string()).await
    }
}

#[cfg(feature = "server")]
pub use handshake::HandshakeRequest;

#[cfg(feature = "server")]
mod handshake {
    use axum::http::{HeaderMap, Uri};

    /// Request context of a WebSocket handshake
    #[derive(Debug, Clone)]
    pub struct HandshakeRequest {
        /// Full request URI (path + query string)
        pub uri: Uri,
        /// HTTP headers from the request
        pub headers: HeaderMap,
        /// Client IP address (from X-Forwarded-For)
        pub client_ip: Option<String>,
    }

    impl HandshakeRequest {
        /// Get a header value as string
        pub fn header(&self, name: &str) -> Option<&str> {
            self.headers.get(name).and_then(|v| v.to_str().ok())
        }

        /// Get the Bearer token from Authorization header
        pub fn bearer_token(&self) -> Option<&str> {
            self.header("authorization")
                .and_then(|auth| auth.strip_prefix("Bearer "))
        }

        /// Get a query parameter value by name
        ///
        /// Values are not URL-decoded; JWTs never need it.
        pub fn query_param(&self, name: &str) -> Option<&str> {
            self.uri.query().and_then(|query| {
                query.split('&').find_map(|pair| {
                    let (key, value) = pair.split_once('=')?;
                    (key == name).then_some(value)
                })
            })
        }

        /// The handshake token: the bearer header, else the `token` query parameter
        pub fn token(&self) -> Option<&str> {
            self.bearer_token().or_else(|| self.query_param("token"))
        }
    }
}

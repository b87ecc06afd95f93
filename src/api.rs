//! REST endpoints for comments, likes, notifications and follows

use axum::{
    extract::{
        rejection::JsonRejection, FromRequest, FromRequestParts, OptionalFromRequestParts, Path,
        Query, State,
    },
    http::{header::AUTHORIZATION, request::Parts, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use thiserror::Error;

use crate::discussion::model::NewComment;
use crate::discussion::ServiceError;
use crate::state::AppState;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/comments", post(create_comment))
        .route("/api/comments/{id}", get(get_comment))
        .route("/api/comments/{id}/like", post(toggle_like))
        .route("/api/posts/{post_id}/comments", get(list_comments))
        .route("/api/notifications", get(list_notifications))
        .route("/api/notifications/{id}/read", post(mark_read))
        .route("/api/users/{id}", get(get_user))
        .route("/api/users/{id}/follow", post(toggle_follow))
        .with_state(state)
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Unauthorized(&'static str),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("internal error")]
    Internal,
}

impl From<ServiceError> for ApiError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Validation(msg) => Self::BadRequest(msg),
            ServiceError::NotFound(what) => Self::NotFound(what),
            ServiceError::Storage(e) => {
                tracing::error!(error = %e, "Storage failure");
                Self::Internal
            }
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = serde_json::json!({ "error": self.to_string() });
        (status, Json(body)).into_response()
    }
}

/// JSON body whose rejections use the API error shape
#[derive(FromRequest)]
#[from_request(via(axum::Json), rejection(ApiError))]
struct ApiJson<T>(T);

/// Caller identity from `Authorization: Bearer <jwt>`
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let token = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
            .ok_or(ApiError::Unauthorized("Missing bearer token"))?;

        let claims = state.verifier.decode(token).map_err(|e| {
            tracing::debug!(error = %e, "Rejected API token");
            ApiError::Unauthorized("Invalid or expired token")
        })?;

        let username = claims.username.as_deref().filter(|n| !n.is_empty());
        state
            .discussion
            .users()
            .remember(&claims.sub, username)
            .await;

        Ok(AuthUser {
            user_id: claims.sub,
        })
    }
}

/// Anonymous without an `Authorization` header; a bad token is still rejected
impl OptionalFromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Option<Self>, Self::Rejection> {
        if !parts.headers.contains_key(AUTHORIZATION) {
            return Ok(None);
        }
        <AuthUser as FromRequestParts<AppState>>::from_request_parts(parts, state)
            .await
            .map(Some)
    }
}

/// POST /api/comments
async fn create_comment(
    State(state): State<AppState>,
    user: AuthUser,
    ApiJson(body): ApiJson<NewComment>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state.discussion.create_comment(&user.user_id, body).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[derive(Debug, Default, Deserialize)]
struct ListQuery {
    #[serde(default)]
    threaded: bool,
}

/// GET /api/posts/{post_id}/comments[?threaded=true]
async fn list_comments(
    State(state): State<AppState>,
    Path(post_id): Path<String>,
    Query(query): Query<ListQuery>,
) -> Result<Response, ApiError> {
    if query.threaded {
        let thread = state.discussion.thread_for_post(&post_id).await?;
        Ok(Json(thread).into_response())
    } else {
        let comments = state.discussion.comments_for_post(&post_id).await?;
        Ok(Json(comments).into_response())
    }
}

/// GET /api/comments/{id}
async fn get_comment(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.discussion.get_comment(&id).await?))
}

/// POST /api/comments/{id}/like
async fn toggle_like(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.discussion.toggle_like(&user.user_id, &id).await?))
}

/// GET /api/notifications
async fn list_notifications(
    State(state): State<AppState>,
    user: AuthUser,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.discussion.notifications_for(&user.user_id).await?))
}

/// POST /api/notifications/{id}/read
async fn mark_read(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.discussion.mark_read(&user.user_id, &id).await?))
}

/// GET /api/users/{id}
async fn get_user(
    State(state): State<AppState>,
    viewer: Option<AuthUser>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let viewer_id = viewer.as_ref().map(|v| v.user_id.as_str());
    Ok(Json(state.discussion.user_profile(&id, viewer_id).await?))
}

/// POST /api/users/{id}/follow
async fn toggle_follow(
    State(state): State<AppState>,
    user: AuthUser,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    Ok(Json(state.discussion.toggle_follow(&user.user_id, &id).await?))
}

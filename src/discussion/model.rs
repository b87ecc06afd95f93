use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A comment, or a reply when `parent_id` is set
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Comment {
    #[serde(rename = "_id")]
    pub id: String,
    pub post_id: String,
    pub author_id: String,
    /// Sanitized before it is stored
    pub content: String,
    pub parent_id: Option<String>,
    /// Identities that liked the comment, in like order, no duplicates
    #[serde(default)]
    pub likes: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Comment {
    pub fn new(
        post_id: String,
        author_id: String,
        content: String,
        parent_id: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            post_id,
            author_id,
            content,
            parent_id,
            likes: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_liked_by(&self, user_id: &str) -> bool {
        self.likes.iter().any(|id| id == user_id)
    }
}

/// Request body for creating a comment
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewComment {
    pub post_id: String,
    pub content: String,
    #[serde(default)]
    pub parent_id: Option<String>,
}

/// A comment as returned to readers
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommentView {
    #[serde(flatten)]
    pub comment: Comment,
    pub author_name: String,
    pub total_likes: usize,
}

/// A comment with its replies, oldest first at every level
#[derive(Debug, Clone, Serialize)]
pub struct ThreadNode {
    #[serde(flatten)]
    pub view: CommentView,
    pub children: Vec<ThreadNode>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    Comment,
    Reply,
    Like,
    Follow,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    #[serde(rename = "_id")]
    pub id: String,
    /// Recipient
    pub to_user: String,
    /// Actor
    pub from_user: String,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment_id: Option<String>,
    pub read: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        to_user: String,
        from_user: String,
        kind: NotificationKind,
        post_id: Option<String>,
        comment_id: Option<String>,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            to_user,
            from_user,
            kind,
            post_id,
            comment_id,
            read: false,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of a like toggle
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LikeState {
    pub liked: bool,
    pub total_likes: usize,
}

/// A user known to the service, with follow relations kept on both sides
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default)]
    pub followers: Vec<String>,
    #[serde(default)]
    pub following: Vec<String>,
}

impl User {
    pub fn new(id: String, username: Option<String>) -> Self {
        Self {
            id,
            username,
            ..Self::default()
        }
    }

    pub fn follows(&self, user_id: &str) -> bool {
        self.following.iter().any(|id| id == user_id)
    }
}

/// Public profile; `is_following` is only set for a signed-in viewer
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserProfile {
    #[serde(flatten)]
    pub user: User,
    pub follower_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_following: Option<bool>,
}

/// Outcome of a follow toggle
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct FollowState {
    pub following: bool,
    pub follower_count: usize,
}

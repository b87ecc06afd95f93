//! Real-time events pushed through the gateway

use serde::Serialize;
use ws_gateway::GatewayEvent;

use super::model::{Comment, Notification};

/// Comment fields every viewer of a post receives
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct CommentPayload {
    #[serde(rename = "_id")]
    pub id: String,
    pub post_id: String,
    pub parent_id: Option<String>,
    pub content: String,
    pub author_id: String,
    pub author_name: String,
}

impl CommentPayload {
    pub fn new(comment: &Comment, author_name: String) -> Self {
        Self {
            id: comment.id.clone(),
            post_id: comment.post_id.clone(),
            parent_id: comment.parent_id.clone(),
            content: comment.content.clone(),
            author_id: comment.author_id.clone(),
            author_name,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ReplyPayload {
    #[serde(flatten)]
    pub comment: CommentPayload,
    /// The comment being replied to
    pub reply_to: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LikePayload {
    pub comment_id: String,
    pub total_likes: usize,
    pub liked: bool,
    /// Who liked or unliked
    pub user_id: String,
}

/// Every event the discussion service emits
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(untagged)]
pub enum DiscussionEvent {
    /// To the post's topic
    CommentAdded(CommentPayload),
    /// To the parent comment's author
    ReplyAdded(ReplyPayload),
    /// To the post's topic
    CommentLiked(LikePayload),
    /// To the recipient
    Notification(Notification),
}

impl GatewayEvent for DiscussionEvent {
    fn name(&self) -> &str {
        match self {
            Self::CommentAdded(_) => "commentAdded",
            Self::ReplyAdded(_) => "replyAdded",
            Self::CommentLiked(_) => "commentLiked",
            Self::Notification(_) => "notification",
        }
    }
}

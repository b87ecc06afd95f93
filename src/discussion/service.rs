//! Comment, like and notification operations.
//!
//! Every operation persists first and emits afterwards; what the gateway
//! manages to deliver never changes the outcome.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;
use ws_gateway::{post_topic, ConnectionManager};

use super::events::{CommentPayload, DiscussionEvent, LikePayload, ReplyPayload};
use super::model::{
    Comment, CommentView, FollowState, LikeState, NewComment, Notification, NotificationKind,
    ThreadNode, UserProfile,
};
use super::sanitize::ContentSanitizer;
use super::store::{CommentStore, NotificationStore, UserDirectory};

/// How many notifications a recipient sees at once
pub const NOTIFICATION_PAGE: usize = 50;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("{0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("storage error: {0}")]
    Storage(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, ServiceError>;

#[derive(Clone)]
pub struct DiscussionService {
    comments: Arc<dyn CommentStore>,
    notifications: Arc<dyn NotificationStore>,
    users: Arc<dyn UserDirectory>,
    sanitizer: Arc<dyn ContentSanitizer>,
    gateway: ConnectionManager,
}

impl DiscussionService {
    pub fn new(
        comments: Arc<dyn CommentStore>,
        notifications: Arc<dyn NotificationStore>,
        users: Arc<dyn UserDirectory>,
        sanitizer: Arc<dyn ContentSanitizer>,
        gateway: ConnectionManager,
    ) -> Self {
        Self {
            comments,
            notifications,
            users,
            sanitizer,
            gateway,
        }
    }

    pub fn users(&self) -> &Arc<dyn UserDirectory> {
        &self.users
    }

    /// Create a comment or a reply.
    ///
    /// Viewers of the post get `commentAdded`. The parent's author also gets
    /// `replyAdded`, unless they wrote the reply or the parent is gone.
    pub async fn create_comment(&self, author_id: &str, input: NewComment) -> Result<CommentView> {
        let post_id = input.post_id.trim();
        if post_id.is_empty() {
            return Err(ServiceError::Validation("postId is required".to_string()));
        }
        if input.content.trim().is_empty() {
            return Err(ServiceError::Validation("content is required".to_string()));
        }
        let parent_id = input
            .parent_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        let comment = Comment::new(
            post_id.to_string(),
            author_id.to_string(),
            self.sanitizer.sanitize(&input.content),
            parent_id,
        );
        let saved = self.comments.insert(comment).await?;
        let author_name = self.author_name(&saved.author_id).await;

        tracing::info!(
            comment_id = %saved.id,
            post_id = %saved.post_id,
            author_id = %saved.author_id,
            is_reply = saved.parent_id.is_some(),
            "Comment created"
        );

        let payload = CommentPayload::new(&saved, author_name.clone());

        if let Some(parent_id) = &saved.parent_id {
            match self.comments.find(parent_id).await {
                Ok(Some(parent)) if parent.author_id != saved.author_id => {
                    self.gateway.emit_to_identity(
                        &parent.author_id,
                        &DiscussionEvent::ReplyAdded(ReplyPayload {
                            comment: payload.clone(),
                            reply_to: parent.id,
                        }),
                    );
                }
                Ok(Some(_)) => {}
                Ok(None) => {
                    tracing::debug!(comment_id = %saved.id, parent_id = %parent_id, "Parent comment missing, skipping reply notification");
                }
                Err(e) => {
                    tracing::warn!(comment_id = %saved.id, parent_id = %parent_id, error = %e, "Parent lookup failed, skipping reply notification");
                }
            }
        }

        self.gateway.emit_to_topic(
            &post_topic(&saved.post_id),
            &DiscussionEvent::CommentAdded(payload),
        );

        Ok(CommentView {
            total_likes: saved.likes.len(),
            comment: saved,
            author_name,
        })
    }

    /// Comments on a post, newest first
    pub async fn comments_for_post(&self, post_id: &str) -> Result<Vec<CommentView>> {
        let mut comments = self.comments.find_by_post(post_id).await?;
        comments.reverse();
        self.views(comments).await
    }

    /// Reply tree of a post.
    ///
    /// Replies whose parent is missing become roots.
    pub async fn thread_for_post(&self, post_id: &str) -> Result<Vec<ThreadNode>> {
        let views = self.views(self.comments.find_by_post(post_id).await?).await?;
        Ok(build_thread(views))
    }

    pub async fn get_comment(&self, id: &str) -> Result<CommentView> {
        let comment = self
            .comments
            .find(id)
            .await?
            .ok_or(ServiceError::NotFound("Comment"))?;
        let author_name = self.author_name(&comment.author_id).await;
        Ok(CommentView {
            total_likes: comment.likes.len(),
            comment,
            author_name,
        })
    }

    /// Like the comment, or take the like back.
    ///
    /// A new like from someone other than the author is stored as a
    /// notification and pushed to the author.
    pub async fn toggle_like(&self, user_id: &str, comment_id: &str) -> Result<LikeState> {
        let comment = self
            .comments
            .find(comment_id)
            .await?
            .ok_or(ServiceError::NotFound("Comment"))?;
        let state = self
            .comments
            .toggle_like(comment_id, user_id)
            .await?
            .ok_or(ServiceError::NotFound("Comment"))?;

        tracing::info!(comment_id, user_id, liked = state.liked, total_likes = state.total_likes, "Like toggled");

        if state.liked && comment.author_id != user_id {
            let notification = self
                .notifications
                .insert(Notification::new(
                    comment.author_id.clone(),
                    user_id.to_string(),
                    NotificationKind::Like,
                    Some(comment.post_id.clone()),
                    Some(comment.id.clone()),
                ))
                .await?;
            self.gateway.emit_to_identity(
                &comment.author_id,
                &DiscussionEvent::Notification(notification),
            );
        }

        self.gateway.emit_to_topic(
            &post_topic(&comment.post_id),
            &DiscussionEvent::CommentLiked(LikePayload {
                comment_id: comment.id,
                total_likes: state.total_likes,
                liked: state.liked,
                user_id: user_id.to_string(),
            }),
        );

        Ok(state)
    }

    /// Latest notifications for a recipient, newest first
    pub async fn notifications_for(&self, user_id: &str) -> Result<Vec<Notification>> {
        Ok(self
            .notifications
            .latest_for(user_id, NOTIFICATION_PAGE)
            .await?)
    }

    /// Mark a notification read; only its recipient may
    pub async fn mark_read(&self, user_id: &str, notification_id: &str) -> Result<Notification> {
        self.notifications
            .mark_read(notification_id, user_id)
            .await?
            .ok_or(ServiceError::NotFound("Notification"))
    }

    /// Profile with follower count; `viewer_id` adds whether the viewer follows
    pub async fn user_profile(&self, user_id: &str, viewer_id: Option<&str>) -> Result<UserProfile> {
        let user = self
            .users
            .find(user_id)
            .await?
            .ok_or(ServiceError::NotFound("User"))?;
        let is_following = viewer_id.map(|viewer| user.followers.iter().any(|id| id == viewer));
        Ok(UserProfile {
            follower_count: user.followers.len(),
            user,
            is_following,
        })
    }

    /// Follow a user, or stop following.
    ///
    /// A new follow is stored as a notification and pushed to the target.
    pub async fn toggle_follow(&self, follower_id: &str, target_id: &str) -> Result<FollowState> {
        if follower_id == target_id {
            return Err(ServiceError::Validation("Can't follow yourself".to_string()));
        }
        let state = self
            .users
            .toggle_follow(follower_id, target_id)
            .await?
            .ok_or(ServiceError::NotFound("User"))?;

        tracing::info!(
            follower_id,
            target_id,
            following = state.following,
            follower_count = state.follower_count,
            "Follow toggled"
        );

        if state.following {
            let notification = self
                .notifications
                .insert(Notification::new(
                    target_id.to_string(),
                    follower_id.to_string(),
                    NotificationKind::Follow,
                    None,
                    None,
                ))
                .await?;
            self.gateway
                .emit_to_identity(target_id, &DiscussionEvent::Notification(notification));
        }

        Ok(state)
    }

    async fn author_name(&self, author_id: &str) -> String {
        match self.users.display_name(author_id).await {
            Some(name) => name,
            None => {
                tracing::debug!(author_id, "No display name, using author id");
                author_id.to_string()
            }
        }
    }

    async fn views(&self, comments: Vec<Comment>) -> Result<Vec<CommentView>> {
        let mut names: HashMap<String, String> = HashMap::new();
        let mut views = Vec::with_capacity(comments.len());
        for comment in comments {
            let author_name = match names.get(&comment.author_id) {
                Some(name) => name.clone(),
                None => {
                    let name = self.author_name(&comment.author_id).await;
                    names.insert(comment.author_id.clone(), name.clone());
                    name
                }
            };
            views.push(CommentView {
                total_likes: comment.likes.len(),
                comment,
                author_name,
            });
        }
        Ok(views)
    }
}

/// Assemble oldest-first comments into a forest
fn build_thread(views: Vec<CommentView>) -> Vec<ThreadNode> {
    let known: std::collections::HashSet<String> =
        views.iter().map(|v| v.comment.id.clone()).collect();

    let mut children: HashMap<String, Vec<CommentView>> = HashMap::new();
    let mut roots = Vec::new();
    for view in views {
        match view.comment.parent_id.clone() {
            Some(parent) if known.contains(&parent) && parent != view.comment.id => {
                children.entry(parent).or_default().push(view)
            }
            _ => roots.push(view),
        }
    }

    roots
        .into_iter()
        .map(|view| attach_children(view, &mut children))
        .collect()
}

fn attach_children(view: CommentView, children: &mut HashMap<String, Vec<CommentView>>) -> ThreadNode {
    let replies = children.remove(&view.comment.id).unwrap_or_default();
    ThreadNode {
        children: replies
            .into_iter()
            .map(|reply| attach_children(reply, children))
            .collect(),
        view,
    }
}

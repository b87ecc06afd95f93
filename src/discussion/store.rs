//! Persistence seams and their in-memory implementations

use async_trait::async_trait;
use dashmap::DashMap;

use super::model::{Comment, FollowState, LikeState, Notification, User};

#[async_trait]
pub trait CommentStore: Send + Sync + 'static {
    async fn insert(&self, comment: Comment) -> anyhow::Result<Comment>;

    async fn find(&self, id: &str) -> anyhow::Result<Option<Comment>>;

    /// Comments on a post, oldest first
    async fn find_by_post(&self, post_id: &str) -> anyhow::Result<Vec<Comment>>;

    /// Add or remove `user_id` from the comment's likes in one step.
    ///
    /// Returns `None` if the comment does not exist.
    async fn toggle_like(&self, id: &str, user_id: &str) -> anyhow::Result<Option<LikeState>>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync + 'static {
    async fn insert(&self, notification: Notification) -> anyhow::Result<Notification>;

    /// Up to `limit` notifications for a recipient, newest first
    async fn latest_for(&self, user_id: &str, limit: usize) -> anyhow::Result<Vec<Notification>>;

    /// Mark read if `user_id` is the recipient; `None` otherwise
    async fn mark_read(&self, id: &str, user_id: &str) -> anyhow::Result<Option<Notification>>;
}

/// Users seen by the service and who follows whom
#[async_trait]
pub trait UserDirectory: Send + Sync + 'static {
    async fn display_name(&self, user_id: &str) -> Option<String>;

    /// Record that the user exists; a username replaces the stored one
    async fn remember(&self, user_id: &str, username: Option<&str>);

    async fn find(&self, user_id: &str) -> anyhow::Result<Option<User>>;

    /// Follow `target_id`, or unfollow if already following.
    ///
    /// Returns `None` if either user is unknown.
    async fn toggle_follow(
        &self,
        follower_id: &str,
        target_id: &str,
    ) -> anyhow::Result<Option<FollowState>>;
}

#[derive(Default)]
pub struct MemoryCommentStore {
    comments: DashMap<String, Comment>,
    /// post_id -> comment ids in insertion order
    by_post: DashMap<String, Vec<String>>,
}

impl MemoryCommentStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CommentStore for MemoryCommentStore {
    async fn insert(&self, comment: Comment) -> anyhow::Result<Comment> {
        self.comments.insert(comment.id.clone(), comment.clone());
        self.by_post
            .entry(comment.post_id.clone())
            .or_default()
            .push(comment.id.clone());
        Ok(comment)
    }

    async fn find(&self, id: &str) -> anyhow::Result<Option<Comment>> {
        Ok(self.comments.get(id).map(|c| c.value().clone()))
    }

    async fn find_by_post(&self, post_id: &str) -> anyhow::Result<Vec<Comment>> {
        let ids = self
            .by_post
            .get(post_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();

        Ok(ids
            .iter()
            .filter_map(|id| self.comments.get(id).map(|c| c.value().clone()))
            .collect())
    }

    async fn toggle_like(&self, id: &str, user_id: &str) -> anyhow::Result<Option<LikeState>> {
        let Some(mut comment) = self.comments.get_mut(id) else {
            return Ok(None);
        };

        let liked = if comment.is_liked_by(user_id) {
            comment.likes.retain(|liker| liker != user_id);
            false
        } else {
            comment.likes.push(user_id.to_string());
            true
        };
        comment.updated_at = chrono::Utc::now();

        Ok(Some(LikeState {
            liked,
            total_likes: comment.likes.len(),
        }))
    }
}

#[derive(Default)]
pub struct MemoryNotificationStore {
    notifications: DashMap<String, Notification>,
    /// recipient -> notification ids in insertion order
    by_recipient: DashMap<String, Vec<String>>,
}

impl MemoryNotificationStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn insert(&self, notification: Notification) -> anyhow::Result<Notification> {
        self.notifications
            .insert(notification.id.clone(), notification.clone());
        self.by_recipient
            .entry(notification.to_user.clone())
            .or_default()
            .push(notification.id.clone());
        Ok(notification)
    }

    async fn latest_for(&self, user_id: &str, limit: usize) -> anyhow::Result<Vec<Notification>> {
        let ids = self
            .by_recipient
            .get(user_id)
            .map(|ids| ids.value().clone())
            .unwrap_or_default();

        Ok(ids
            .iter()
            .rev()
            .filter_map(|id| self.notifications.get(id).map(|n| n.value().clone()))
            .take(limit)
            .collect())
    }

    async fn mark_read(&self, id: &str, user_id: &str) -> anyhow::Result<Option<Notification>> {
        let Some(mut notification) = self.notifications.get_mut(id) else {
            return Ok(None);
        };
        if notification.to_user != user_id {
            return Ok(None);
        }

        notification.read = true;
        Ok(Some(notification.value().clone()))
    }
}

#[derive(Default)]
pub struct MemoryUserDirectory {
    users: DashMap<String, User>,
}

impl MemoryUserDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UserDirectory for MemoryUserDirectory {
    async fn display_name(&self, user_id: &str) -> Option<String> {
        self.users.get(user_id).and_then(|u| u.username.clone())
    }

    async fn remember(&self, user_id: &str, username: Option<&str>) {
        let mut user = self
            .users
            .entry(user_id.to_string())
            .or_insert_with(|| User::new(user_id.to_string(), None));
        if let Some(name) = username {
            user.username = Some(name.to_string());
        }
    }

    async fn find(&self, user_id: &str) -> anyhow::Result<Option<User>> {
        Ok(self.users.get(user_id).map(|u| u.value().clone()))
    }

    async fn toggle_follow(
        &self,
        follower_id: &str,
        target_id: &str,
    ) -> anyhow::Result<Option<FollowState>> {
        if !self.users.contains_key(target_id) {
            return Ok(None);
        }

        // One map guard at a time; both ids may hash to the same shard.
        let following = {
            let Some(mut follower) = self.users.get_mut(follower_id) else {
                return Ok(None);
            };
            if follower.follows(target_id) {
                follower.following.retain(|id| id != target_id);
                false
            } else {
                follower.following.push(target_id.to_string());
                true
            }
        };

        let Some(mut target) = self.users.get_mut(target_id) else {
            return Ok(None);
        };
        target.followers.retain(|id| id != follower_id);
        if following {
            target.followers.push(follower_id.to_string());
        }

        Ok(Some(FollowState {
            following,
            follower_count: target.followers.len(),
        }))
    }
}

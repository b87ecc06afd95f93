//! The discussion service: comments, replies, likes and notifications

pub mod events;
pub mod model;
pub mod sanitize;
pub mod service;
pub mod store;

pub use sanitize::{ContentSanitizer, HtmlSanitizer};
pub use service::{DiscussionService, ServiceError};
pub use store::{
    CommentStore, MemoryCommentStore, MemoryNotificationStore, MemoryUserDirectory,
    NotificationStore, UserDirectory,
};

use std::sync::Arc;

use ws_gateway::{ConnectionManager, JwtVerifier};

use crate::discussion::{
    DiscussionService, HtmlSanitizer, MemoryCommentStore, MemoryNotificationStore,
    MemoryUserDirectory,
};

#[derive(Clone)]
pub struct AppState {
    pub discussion: DiscussionService,
    /// Same verifier the WebSocket handshake uses
    pub verifier: JwtVerifier,
}

impl AppState {
    /// In-memory stores wired to the gateway's connections
    pub fn new(verifier: JwtVerifier, connections: ConnectionManager) -> Self {
        let discussion = DiscussionService::new(
            Arc::new(MemoryCommentStore::new()),
            Arc::new(MemoryNotificationStore::new()),
            Arc::new(MemoryUserDirectory::new()),
            Arc::new(HtmlSanitizer::new()),
            connections,
        );
        Self {
            discussion,
            verifier,
        }
    }
}

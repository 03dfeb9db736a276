//! Seams to the systems the broker talks to.
//!
//! Every call is bounded by a timeout inside the implementation and fails with a
//! [`CollaboratorError`], which callers log and swallow.

use crate::domain::{PeerOffer, ScreenshotsCompleted};
use crate::error::CollaboratorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub type CollaboratorResult<T> = std::result::Result<T, CollaboratorError>;

/// Looks up which peers currently hold a catalog item
#[async_trait]
pub trait PeerDirectory: Send + Sync {
    async fn peers_for_catalog(&self, catalog_id: &str) -> CollaboratorResult<Vec<PeerOffer>>;
}

/// Invite delivered to a peer through its edge relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeInvite {
    pub peer_id: String,
    pub catalog_id: String,
    pub token: String,
    pub screenshot_upload_url: String,
}

/// Delivers invites to peers
#[async_trait]
pub trait InviteTransport: Send + Sync {
    async fn send_invite(&self, edge_id: &str, invite: &EdgeInvite) -> CollaboratorResult<()>;
}

/// One uploaded file with its declared content type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenshotUpload {
    pub data: Vec<u8>,
    pub content_type: String,
}

impl ScreenshotUpload {
    pub fn new(data: impl Into<Vec<u8>>, content_type: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            content_type: content_type.into(),
        }
    }
}

/// Object storage for screenshot bytes
#[async_trait]
pub trait ScreenshotStorage: Send + Sync {
    /// Store one object under the catalog, returning its object name
    async fn upload(
        &self,
        catalog_id: &str,
        data: &[u8],
        content_type: &str,
    ) -> CollaboratorResult<String>;

    /// Time-limited URL for a stored object
    async fn presigned_url(&self, object_name: &str) -> CollaboratorResult<String>;
}

/// Announces fulfilled requests (`screenshots-completed`)
#[async_trait]
pub trait CompletionPublisher: Send + Sync {
    async fn publish(&self, event: &ScreenshotsCompleted) -> CollaboratorResult<()>;
}

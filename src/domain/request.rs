use crate::error::{BrokerError, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// An outstanding screenshot request held in the ledger
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingRequest {
    pub catalog_id: String,
    pub request_id: String,
    pub requester_service: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl PendingRequest {
    /// Time left before this entry lapses, negative once it has
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        self.expires_at - now
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A peer announcing which catalog items it currently holds.
///
/// Consumed once per event, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerOffer {
    pub peer_id: String,
    pub edge_id: String,
    #[serde(default)]
    pub catalog_ids: Vec<String>,
}

impl PeerOffer {
    /// Narrow the offer down to one catalog item
    pub fn for_catalog(&self, catalog_id: &str) -> PeerOffer {
        PeerOffer {
            peer_id: self.peer_id.clone(),
            edge_id: self.edge_id.clone(),
            catalog_ids: vec![catalog_id.to_string()],
        }
    }
}

/// Payload of the `screenshots-requested` topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenshotsRequested {
    pub catalog_id: String,
    pub request_id: String,
    pub requester_service: String,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl ScreenshotsRequested {
    /// Build the ledger entry, filling `expires_at` from the default TTL when absent
    pub fn into_pending(self, default_ttl: Duration) -> Result<PendingRequest> {
        if self.catalog_id.trim().is_empty() || self.request_id.trim().is_empty() {
            return Err(BrokerError::Validation(
                "catalog_id and request_id must be non-empty".to_string(),
            ));
        }

        let expires_at = self
            .expires_at
            .unwrap_or_else(|| self.created_at + default_ttl);
        if expires_at <= self.created_at {
            return Err(BrokerError::Validation(format!(
                "request {} expires at {} which is not after its creation at {}",
                self.request_id, expires_at, self.created_at
            )));
        }

        Ok(PendingRequest {
            catalog_id: self.catalog_id,
            request_id: self.request_id,
            requester_service: self.requester_service,
            created_at: self.created_at,
            expires_at,
        })
    }
}

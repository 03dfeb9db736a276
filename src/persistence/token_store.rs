use crate::domain::{BlacklistReason, IssuedToken, WinnerClaim};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

/// Backing store for token validity state: the blacklist, the issued-token registry
/// and the per-request winner keys. Expired rows read as absent.
#[async_trait]
pub trait TokenStore: Send + Sync {
    /// Insert or overwrite (last write wins)
    async fn set_blacklist(
        &self,
        token_id: &str,
        reason: BlacklistReason,
        ttl: Duration,
    ) -> Result<()>;

    /// Atomic set-if-absent. `None` means this call inserted the entry; otherwise the
    /// reason already on record is returned and nothing changes.
    async fn insert_blacklist_if_absent(
        &self,
        token_id: &str,
        reason: BlacklistReason,
        ttl: Duration,
    ) -> Result<Option<BlacklistReason>>;

    async fn blacklist_reason(&self, token_id: &str) -> Result<Option<BlacklistReason>>;

    async fn record_issued(&self, token: &IssuedToken, ttl: Duration) -> Result<()>;

    async fn issued_for_request(
        &self,
        catalog_id: &str,
        request_id: &str,
    ) -> Result<Vec<IssuedToken>>;

    /// Atomic set-if-absent on the `(catalog_id, request_id)` winner key
    async fn claim_winner(
        &self,
        catalog_id: &str,
        request_id: &str,
        token_id: &str,
        ttl: Duration,
    ) -> Result<WinnerClaim>;

    async fn winner_of(&self, catalog_id: &str, request_id: &str) -> Result<Option<String>>;

    /// Physically delete expired rows, returning how many went
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;
}

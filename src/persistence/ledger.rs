//! Pending-request ledger
//!
//! Outstanding requests live in one bucket per catalog item. A bucket's expiry only ever
//! moves forward, and the whole bucket (with every entry in it) disappears once it lapses.

use crate::domain::{PendingRequest, ScreenshotsRequested};
use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Backing store for the ledger.
///
/// Every write is atomic per catalog key; readers never see a lapsed bucket.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Store `request` under its catalog bucket and move the bucket's expiry to
    /// `max(current expiry, request.expires_at)`. A lapsed bucket is replaced, not extended.
    async fn put(&self, request: &PendingRequest, now: DateTime<Utc>) -> Result<()>;

    /// Entries of a live bucket, oldest first
    async fn list(&self, catalog_id: &str, now: DateTime<Utc>) -> Result<Vec<PendingRequest>>;

    /// Delete one entry, dropping the bucket when it empties. Returns whether it existed.
    async fn remove(&self, catalog_id: &str, request_id: &str) -> Result<bool>;

    /// Catalogs whose live bucket holds at least one entry
    async fn catalogs(&self, now: DateTime<Utc>) -> Result<HashSet<String>>;

    async fn bucket_expiry(
        &self,
        catalog_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>>;

    /// Physically delete lapsed buckets, returning how many went
    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64>;

    async fn ping(&self) -> Result<()>;
}

/// TTL-bounded map of outstanding requests, keyed by catalog
#[derive(Clone)]
pub struct PendingRequestLedger {
    store: Arc<dyn LedgerStore>,
    default_ttl: Duration,
}

impl PendingRequestLedger {
    pub fn new(store: Arc<dyn LedgerStore>, default_ttl: Duration) -> Self {
        Self { store, default_ttl }
    }

    /// TTL applied to requests that arrive without an `expires_at`
    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    /// Turn an inbound request event into a ledger entry
    pub fn admit(&self, event: ScreenshotsRequested) -> Result<PendingRequest> {
        event.into_pending(self.default_ttl)
    }

    /// Store a request. Already-expired requests are silently dropped.
    pub async fn add(&self, request: &PendingRequest) -> Result<bool> {
        self.add_at(request, Utc::now()).await
    }

    pub async fn add_at(&self, request: &PendingRequest, now: DateTime<Utc>) -> Result<bool> {
        if request.is_expired(now) {
            debug!(
                catalog_id = %request.catalog_id,
                request_id = %request.request_id,
                "Skipping already-expired request"
            );
            return Ok(false);
        }
        self.store.put(request, now).await?;
        Ok(true)
    }

    pub async fn list(&self, catalog_id: &str) -> Result<Vec<PendingRequest>> {
        self.store.list(catalog_id, Utc::now()).await
    }

    pub async fn remove(&self, catalog_id: &str, request_id: &str) -> Result<()> {
        if !self.store.remove(catalog_id, request_id).await? {
            debug!(%catalog_id, %request_id, "Pending request already gone");
        }
        Ok(())
    }

    pub async fn all_catalogs_with_pending(&self) -> Result<HashSet<String>> {
        self.store.catalogs(Utc::now()).await
    }

    /// When the catalog's bucket lapses, if it exists
    pub async fn bucket_expiry(&self, catalog_id: &str) -> Result<Option<DateTime<Utc>>> {
        self.store.bucket_expiry(catalog_id, Utc::now()).await
    }

    pub async fn ping(&self) -> Result<()> {
        self.store.ping().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::MemoryLedgerStore;

    fn ledger() -> PendingRequestLedger {
        PendingRequestLedger::new(Arc::new(MemoryLedgerStore::new()), Duration::hours(24))
    }

    fn request(catalog_id: &str, request_id: &str, ttl: Duration) -> PendingRequest {
        let now = Utc::now();
        PendingRequest {
            catalog_id: catalog_id.to_string(),
            request_id: request_id.to_string(),
            requester_service: "catalog-service".to_string(),
            created_at: now,
            expires_at: now + ttl,
        }
    }

    #[tokio::test]
    async fn test_expired_add_is_noop() {
        let ledger = ledger();
        let live = request("cat-1", "req-1", Duration::minutes(10));
        ledger.add(&live).await.unwrap();
        let before = ledger.bucket_expiry("cat-1").await.unwrap();

        let mut stale = request("cat-1", "req-2", Duration::hours(5));
        stale.created_at = Utc::now() - Duration::hours(2);
        stale.expires_at = Utc::now() - Duration::seconds(1);
        assert!(!ledger.add(&stale).await.unwrap());

        let entries = ledger.list("cat-1").await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].request_id, "req-1");
        assert_eq!(ledger.bucket_expiry("cat-1").await.unwrap(), before);

        let mut other = stale.clone();
        other.catalog_id = "cat-9".to_string();
        ledger.add(&other).await.unwrap();
        assert!(ledger.bucket_expiry("cat-9").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_bucket_expiry_takes_larger_ttl() {
        let ledger = ledger();
        let long = request("cat-1", "req-long", Duration::hours(3));
        let short = request("cat-1", "req-short", Duration::minutes(5));

        ledger.add(&long).await.unwrap();
        ledger.add(&short).await.unwrap();
        assert_eq!(
            ledger.bucket_expiry("cat-1").await.unwrap(),
            Some(long.expires_at)
        );

        let ledger = self::ledger();
        ledger.add(&short).await.unwrap();
        ledger.add(&long).await.unwrap();
        assert_eq!(
            ledger.bucket_expiry("cat-1").await.unwrap(),
            Some(long.expires_at)
        );
    }

    #[tokio::test]
    async fn test_repeated_add_is_idempotent() {
        let ledger = ledger();
        let req = request("cat-1", "req-1", Duration::hours(1));
        ledger.add(&req).await.unwrap();
        ledger.add(&req).await.unwrap();
        assert_eq!(ledger.list("cat-1").await.unwrap(), vec![req]);
    }

    #[tokio::test]
    async fn test_remove_and_catalog_enumeration() {
        let ledger = ledger();
        ledger
            .add(&request("cat-1", "req-1", Duration::hours(1)))
            .await
            .unwrap();
        ledger
            .add(&request("cat-1", "req-2", Duration::hours(1)))
            .await
            .unwrap();
        ledger
            .add(&request("cat-2", "req-3", Duration::hours(1)))
            .await
            .unwrap();

        let catalogs = ledger.all_catalogs_with_pending().await.unwrap();
        assert_eq!(
            catalogs,
            HashSet::from(["cat-1".to_string(), "cat-2".to_string()])
        );

        ledger.remove("cat-2", "req-3").await.unwrap();
        ledger.remove("cat-2", "req-3").await.unwrap();
        ledger.remove("cat-1", "nope").await.unwrap();
        ledger.remove("cat-1", "req-1").await.unwrap();

        let catalogs = ledger.all_catalogs_with_pending().await.unwrap();
        assert_eq!(catalogs, HashSet::from(["cat-1".to_string()]));
        assert_eq!(ledger.list("cat-2").await.unwrap(), vec![]);
        assert_eq!(ledger.list("cat-1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_list_unknown_catalog_is_empty() {
        assert!(ledger().list("missing").await.unwrap().is_empty());
    }
}

//! In-process stores backed by `DashMap`.
//!
//! Each key's shard lock makes single-key operations atomic, which is all the
//! ledger and token contracts need.

use crate::domain::{BlacklistReason, IssuedToken, PendingRequest, WinnerClaim};
use crate::error::Result;
use crate::persistence::{LedgerStore, TokenStore};
use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone)]
struct Bucket {
    entries: HashMap<String, PendingRequest>,
    expires_at: DateTime<Utc>,
}

impl Bucket {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

/// Ledger buckets kept in memory
#[derive(Default)]
pub struct MemoryLedgerStore {
    buckets: DashMap<String, Bucket>,
}

impl MemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemoryLedgerStore {
    async fn put(&self, request: &PendingRequest, now: DateTime<Utc>) -> Result<()> {
        match self.buckets.entry(request.catalog_id.clone()) {
            Entry::Occupied(mut occupied) => {
                let bucket = occupied.get_mut();
                if bucket.is_live(now) {
                    bucket.expires_at = bucket.expires_at.max(request.expires_at);
                } else {
                    bucket.entries.clear();
                    bucket.expires_at = request.expires_at;
                }
                bucket
                    .entries
                    .insert(request.request_id.clone(), request.clone());
            }
            Entry::Vacant(vacant) => {
                let mut entries = HashMap::new();
                entries.insert(request.request_id.clone(), request.clone());
                vacant.insert(Bucket {
                    entries,
                    expires_at: request.expires_at,
                });
            }
        }
        Ok(())
    }

    async fn list(&self, catalog_id: &str, now: DateTime<Utc>) -> Result<Vec<PendingRequest>> {
        let Some(bucket) = self.buckets.get(catalog_id) else {
            return Ok(Vec::new());
        };
        if !bucket.is_live(now) {
            return Ok(Vec::new());
        }
        let mut entries: Vec<PendingRequest> = bucket.entries.values().cloned().collect();
        entries.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.request_id.cmp(&b.request_id))
        });
        Ok(entries)
    }

    async fn remove(&self, catalog_id: &str, request_id: &str) -> Result<bool> {
        match self.buckets.entry(catalog_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                let existed = occupied.get_mut().entries.remove(request_id).is_some();
                if occupied.get().entries.is_empty() {
                    occupied.remove();
                }
                Ok(existed)
            }
            Entry::Vacant(_) => Ok(false),
        }
    }

    async fn catalogs(&self, now: DateTime<Utc>) -> Result<HashSet<String>> {
        Ok(self
            .buckets
            .iter()
            .filter(|b| b.is_live(now) && !b.entries.is_empty())
            .map(|b| b.key().clone())
            .collect())
    }

    async fn bucket_expiry(
        &self,
        catalog_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        Ok(self
            .buckets
            .get(catalog_id)
            .filter(|b| b.is_live(now))
            .map(|b| b.expires_at))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let before = self.buckets.len();
        self.buckets.retain(|_, b| b.is_live(now));
        Ok(before.saturating_sub(self.buckets.len()) as u64)
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct Expiring<T> {
    value: T,
    expires_at: DateTime<Utc>,
}

impl<T> Expiring<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Utc::now() + ttl,
        }
    }

    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

type RequestKey = (String, String);

fn request_key(catalog_id: &str, request_id: &str) -> RequestKey {
    (catalog_id.to_string(), request_id.to_string())
}

/// Blacklist, issued-token registry and winner keys kept in memory
#[derive(Default)]
pub struct MemoryTokenStore {
    blacklist: DashMap<String, Expiring<BlacklistReason>>,
    issued: DashMap<RequestKey, Vec<Expiring<IssuedToken>>>,
    winners: DashMap<RequestKey, Expiring<String>>,
}

impl MemoryTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn set_blacklist(
        &self,
        token_id: &str,
        reason: BlacklistReason,
        ttl: Duration,
    ) -> Result<()> {
        self.blacklist
            .insert(token_id.to_string(), Expiring::new(reason, ttl));
        Ok(())
    }

    async fn insert_blacklist_if_absent(
        &self,
        token_id: &str,
        reason: BlacklistReason,
        ttl: Duration,
    ) -> Result<Option<BlacklistReason>> {
        let now = Utc::now();
        match self.blacklist.entry(token_id.to_string()) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    return Ok(Some(occupied.get().value));
                }
                occupied.insert(Expiring::new(reason, ttl));
                Ok(None)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Expiring::new(reason, ttl));
                Ok(None)
            }
        }
    }

    async fn blacklist_reason(&self, token_id: &str) -> Result<Option<BlacklistReason>> {
        let now = Utc::now();
        Ok(self
            .blacklist
            .get(token_id)
            .filter(|e| e.is_live(now))
            .map(|e| e.value))
    }

    async fn record_issued(&self, token: &IssuedToken, ttl: Duration) -> Result<()> {
        let now = Utc::now();
        let mut tokens = self
            .issued
            .entry(request_key(&token.catalog_id, &token.request_id))
            .or_default();
        tokens.retain(|t| t.is_live(now) && t.value.token_id != token.token_id);
        tokens.push(Expiring::new(token.clone(), ttl));
        Ok(())
    }

    async fn issued_for_request(
        &self,
        catalog_id: &str,
        request_id: &str,
    ) -> Result<Vec<IssuedToken>> {
        let now = Utc::now();
        Ok(self
            .issued
            .get(&request_key(catalog_id, request_id))
            .map(|tokens| {
                tokens
                    .iter()
                    .filter(|t| t.is_live(now))
                    .map(|t| t.value.clone())
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn claim_winner(
        &self,
        catalog_id: &str,
        request_id: &str,
        token_id: &str,
        ttl: Duration,
    ) -> Result<WinnerClaim> {
        let now = Utc::now();
        match self.winners.entry(request_key(catalog_id, request_id)) {
            Entry::Occupied(mut occupied) => {
                if occupied.get().is_live(now) {
                    let winner = &occupied.get().value;
                    if winner == token_id {
                        return Ok(WinnerClaim::Won);
                    }
                    return Ok(WinnerClaim::Lost {
                        winner_token_id: winner.clone(),
                    });
                }
                occupied.insert(Expiring::new(token_id.to_string(), ttl));
                Ok(WinnerClaim::Won)
            }
            Entry::Vacant(vacant) => {
                vacant.insert(Expiring::new(token_id.to_string(), ttl));
                Ok(WinnerClaim::Won)
            }
        }
    }

    async fn winner_of(&self, catalog_id: &str, request_id: &str) -> Result<Option<String>> {
        let now = Utc::now();
        Ok(self
            .winners
            .get(&request_key(catalog_id, request_id))
            .filter(|w| w.is_live(now))
            .map(|w| w.value.clone()))
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> Result<u64> {
        let mut purged = 0u64;

        let before = self.blacklist.len();
        self.blacklist.retain(|_, e| e.is_live(now));
        purged += before.saturating_sub(self.blacklist.len()) as u64;

        let before = self.winners.len();
        self.winners.retain(|_, w| w.is_live(now));
        purged += before.saturating_sub(self.winners.len()) as u64;

        self.issued.retain(|_, tokens| {
            let before = tokens.len();
            tokens.retain(|t| t.is_live(now));
            purged += before.saturating_sub(tokens.len()) as u64;
            !tokens.is_empty()
        });

        Ok(purged)
    }
}

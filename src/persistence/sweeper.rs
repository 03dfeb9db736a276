//! Expiry Sweeper
//!
//! Stores without native TTL keep lapsed rows around. Readers already treat them as
//! absent; the sweeper reclaims the space on a fixed interval.

use crate::coordination::{ShutdownPhase, ShutdownToken};
use crate::error::Result;
use crate::persistence::{LedgerStore, TokenStore};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info};

/// Sweeper statistics
#[derive(Debug, Clone, Default)]
pub struct SweepStats {
    pub runs: u64,
    pub buckets_purged: u64,
    pub token_rows_purged: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Periodic purge of lapsed ledger buckets and token rows
pub struct ExpirySweeper {
    ledger: Arc<dyn LedgerStore>,
    tokens: Arc<dyn TokenStore>,
    interval: Duration,
    stats: Arc<RwLock<SweepStats>>,
}

impl ExpirySweeper {
    pub fn new(ledger: Arc<dyn LedgerStore>, tokens: Arc<dyn TokenStore>, interval: Duration) -> Self {
        Self {
            ledger,
            tokens,
            interval,
            stats: Arc::new(RwLock::new(SweepStats::default())),
        }
    }

    /// Run a single sweep, returning `(buckets, token rows)` purged
    pub async fn sweep_once(&self, now: DateTime<Utc>) -> Result<(u64, u64)> {
        let outcome = async {
            let buckets = self.ledger.purge_expired(now).await?;
            let token_rows = self.tokens.purge_expired(now).await?;
            Ok::<_, crate::error::BrokerError>((buckets, token_rows))
        }
        .await;

        let mut stats = self.stats.write().await;
        stats.runs += 1;
        stats.last_run = Some(now);
        match outcome {
            Ok((buckets, token_rows)) => {
                stats.buckets_purged += buckets;
                stats.token_rows_purged += token_rows;
                if buckets + token_rows > 0 {
                    debug!(buckets, token_rows, "Purged expired rows");
                }
                Ok((buckets, token_rows))
            }
            Err(e) => {
                stats.last_error = Some(e.to_string());
                Err(e)
            }
        }
    }

    /// Sweep until shutdown reaches the sweeper's phase
    pub async fn run(&self, mut shutdown: ShutdownToken) {
        info!("Expiry sweeper started (interval: {:?})", self.interval);
        let mut timer = tokio::time::interval(self.interval);
        timer.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    if let Err(e) = self.sweep_once(Utc::now()).await {
                        error!("Expiry sweep failed: {}", e);
                    }
                }
                _ = shutdown.wait_until(ShutdownPhase::StoppingSweeper) => break,
            }
        }

        info!("Expiry sweeper stopped");
    }

    /// Get current statistics
    pub async fn get_stats(&self) -> SweepStats {
        self.stats.read().await.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::{MemoryLedgerStore, MemoryTokenStore};
    use crate::domain::{BlacklistReason, PendingRequest};
    use chrono::Duration as ChronoDuration;

    #[tokio::test]
    async fn test_sweep_purges_only_lapsed_rows() {
        let ledger = Arc::new(MemoryLedgerStore::new());
        let tokens = Arc::new(MemoryTokenStore::new());
        let now = Utc::now();

        for (catalog_id, ttl) in [("short", ChronoDuration::minutes(1)), ("long", ChronoDuration::hours(1))] {
            let req = PendingRequest {
                catalog_id: catalog_id.to_string(),
                request_id: "r".to_string(),
                requester_service: "svc".to_string(),
                created_at: now,
                expires_at: now + ttl,
            };
            ledger.put(&req, now).await.unwrap();
        }
        tokens
            .set_blacklist("tok", BlacklistReason::AlreadyUsed, ChronoDuration::minutes(1))
            .await
            .unwrap();

        let sweeper = ExpirySweeper::new(ledger.clone(), tokens.clone(), Duration::from_secs(60));
        let later = now + ChronoDuration::minutes(5);
        let (buckets, token_rows) = sweeper.sweep_once(later).await.unwrap();

        assert_eq!(buckets, 1);
        assert_eq!(token_rows, 1);
        assert_eq!(ledger.catalogs(later).await.unwrap().len(), 1);

        let stats = sweeper.get_stats().await;
        assert_eq!(stats.runs, 1);
        assert_eq!(stats.buckets_purged, 1);
        assert!(stats.last_error.is_none());
    }
}

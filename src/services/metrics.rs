use chrono::Utc;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tracing::info;

/// Broker counters for observability
#[derive(Debug)]
pub struct BrokerMetrics {
    /// `screenshots-requested` events handled
    pub requests_received: AtomicU64,
    /// `peer-available` events handled
    pub offers_received: AtomicU64,
    pub tokens_issued: AtomicU64,
    pub invites_sent: AtomicU64,
    pub invites_failed: AtomicU64,
    pub redemptions_accepted: AtomicU64,
    /// Double redemptions and lost races
    pub redemptions_rejected: AtomicU64,
    pub uploads_succeeded: AtomicU64,
    pub uploads_failed: AtomicU64,
    pub completions_published: AtomicU64,
    pub events_redelivered: AtomicU64,
    started_at: AtomicI64,
}

impl Default for BrokerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl BrokerMetrics {
    pub fn new() -> Self {
        Self {
            requests_received: AtomicU64::new(0),
            offers_received: AtomicU64::new(0),
            tokens_issued: AtomicU64::new(0),
            invites_sent: AtomicU64::new(0),
            invites_failed: AtomicU64::new(0),
            redemptions_accepted: AtomicU64::new(0),
            redemptions_rejected: AtomicU64::new(0),
            uploads_succeeded: AtomicU64::new(0),
            uploads_failed: AtomicU64::new(0),
            completions_published: AtomicU64::new(0),
            events_redelivered: AtomicU64::new(0),
            started_at: AtomicI64::new(Utc::now().timestamp()),
        }
    }

    pub fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    fn counters(&self) -> [(&'static str, &'static str, u64); 11] {
        [
            ("requests_received_total", "Screenshot request events handled", Self::get(&self.requests_received)),
            ("offers_received_total", "Peer availability events handled", Self::get(&self.offers_received)),
            ("tokens_issued_total", "Upload tokens minted", Self::get(&self.tokens_issued)),
            ("invites_sent_total", "Invites accepted by the edge relay", Self::get(&self.invites_sent)),
            ("invites_failed_total", "Invites that could not be delivered", Self::get(&self.invites_failed)),
            ("redemptions_accepted_total", "Winning token redemptions", Self::get(&self.redemptions_accepted)),
            ("redemptions_rejected_total", "Redemptions refused as already used or already won", Self::get(&self.redemptions_rejected)),
            ("uploads_succeeded_total", "Screenshot files stored", Self::get(&self.uploads_succeeded)),
            ("uploads_failed_total", "Screenshot files that failed to store", Self::get(&self.uploads_failed)),
            ("completions_published_total", "Completion events published", Self::get(&self.completions_published)),
            ("events_redelivered_total", "Bus deliveries handed back for redelivery", Self::get(&self.events_redelivered)),
        ]
    }

    /// Export metrics in Prometheus format
    pub fn prometheus(&self) -> String {
        let mut out = String::new();
        for (name, help, value) in self.counters() {
            let _ = writeln!(out, "# HELP screenshot_broker_{name} {help}");
            let _ = writeln!(out, "# TYPE screenshot_broker_{name} counter");
            let _ = writeln!(out, "screenshot_broker_{name} {value}\n");
        }

        let uptime = Utc::now().timestamp() - self.started_at.load(Ordering::Relaxed);
        let _ = writeln!(out, "# HELP screenshot_broker_uptime_seconds Seconds since start");
        let _ = writeln!(out, "# TYPE screenshot_broker_uptime_seconds gauge");
        let _ = writeln!(out, "screenshot_broker_uptime_seconds {uptime}");
        out
    }

    /// Log a one-line status summary
    pub fn log_status(&self) {
        info!(
            requests = Self::get(&self.requests_received),
            offers = Self::get(&self.offers_received),
            invites = Self::get(&self.invites_sent),
            redeemed = Self::get(&self.redemptions_accepted),
            rejected = Self::get(&self.redemptions_rejected),
            "Broker status"
        );
    }
}

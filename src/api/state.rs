use crate::adapters::LocalObjectStore;
use crate::services::{BrokerMetrics, BusSender, CoordinationEngine};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Shared application state for API handlers
#[derive(Clone)]
pub struct AppState {
    /// Ledger, token authority and collaborators
    pub engine: CoordinationEngine,

    /// Producer side of the inbound event channel
    pub bus: BusSender,

    /// Upper bound on files accepted by one upload
    pub max_screenshots: usize,

    /// Disk-backed object store, served through signed URLs when present
    pub objects: Option<Arc<LocalObjectStore>>,

    /// Application start time
    pub start_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(engine: CoordinationEngine, bus: BusSender, max_screenshots: usize) -> Self {
        Self {
            engine,
            bus,
            max_screenshots,
            objects: None,
            start_time: Utc::now(),
        }
    }

    pub fn with_objects(mut self, objects: Arc<LocalObjectStore>) -> Self {
        self.objects = Some(objects);
        self
    }

    pub fn metrics(&self) -> &Arc<BrokerMetrics> {
        self.engine.metrics()
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> i64 {
        (Utc::now() - self.start_time).num_seconds()
    }
}

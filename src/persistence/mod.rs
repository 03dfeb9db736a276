//! Persistence Layer for broker state
//!
//! This module defines the shared stores the broker coordinates through:
//! - Pending-request ledger (TTL-bounded buckets per catalog)
//! - Token store (blacklist, issued-token registry, request winners)
//! - Expiry sweeper for backends without native TTL

pub mod ledger;
pub mod sweeper;
pub mod token_store;

pub use ledger::{LedgerStore, PendingRequestLedger};
pub use sweeper::{ExpirySweeper, SweepStats};
pub use token_store::TokenStore;

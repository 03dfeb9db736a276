pub mod adapters;
pub mod api;
pub mod bootstrap;
pub mod cli;
pub mod config;
pub mod coordination;
pub mod domain;
pub mod error;
pub mod persistence;
pub mod services;
pub mod signing;

pub use bootstrap::{Broker, Stores};
pub use config::AppConfig;
pub use coordination::{GracefulShutdown, ShutdownPhase, ShutdownSignal};
pub use error::{AuthError, BrokerError, CollaboratorError, Result};
pub use persistence::{ExpirySweeper, PendingRequestLedger};
pub use services::{CoordinationEngine, EventConsumer};
pub use signing::TokenAuthority;

//! Process coordination
//!
//! Ordered shutdown for the HTTP listener, the event consumer and the sweeper.

pub mod shutdown;

pub use shutdown::{
    install_signal_handlers, GracefulShutdown, ShutdownConfig, ShutdownError, ShutdownPhase,
    ShutdownSignal, ShutdownToken,
};

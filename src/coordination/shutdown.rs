//! Graceful Shutdown Handler
//!
//! Stops the broker in order: inbound intake first, then in-flight event handlers,
//! then the expiry sweeper. Each phase is bounded by its own timeout.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, error, info, warn};

/// Shutdown signal types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Normal graceful shutdown (SIGTERM, SIGINT)
    Graceful,
    /// Urgent shutdown - reduce timeouts
    Urgent,
}

impl std::fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownSignal::Graceful => write!(f, "graceful"),
            ShutdownSignal::Urgent => write!(f, "urgent"),
        }
    }
}

/// Configuration for graceful shutdown
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Total timeout for graceful shutdown (default: 60s)
    pub total_timeout_secs: u64,
    /// Time allowed for in-flight event handlers (default: 30s)
    pub drain_timeout_secs: u64,
    /// Time allowed for the sweeper to finish its current pass (default: 5s)
    pub sweeper_stop_timeout_secs: u64,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            total_timeout_secs: 60,
            drain_timeout_secs: 30,
            sweeper_stop_timeout_secs: 5,
        }
    }
}

impl ShutdownConfig {
    /// Halved timeouts for an urgent stop
    pub fn urgent(&self) -> Self {
        Self {
            total_timeout_secs: (self.total_timeout_secs / 2).max(1),
            drain_timeout_secs: (self.drain_timeout_secs / 2).max(1),
            sweeper_stop_timeout_secs: (self.sweeper_stop_timeout_secs / 2).max(1),
        }
    }
}

/// Shutdown phase tracking. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ShutdownPhase {
    /// Not shutting down
    Running,
    /// HTTP listener and bus intake closed
    StoppingIntake,
    /// Waiting for in-flight deliveries to be acked
    DrainingEvents,
    /// Sweeper asked to stop
    StoppingSweeper,
    /// Shutdown complete
    Complete,
}

impl std::fmt::Display for ShutdownPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownPhase::Running => write!(f, "running"),
            ShutdownPhase::StoppingIntake => write!(f, "stopping_intake"),
            ShutdownPhase::DrainingEvents => write!(f, "draining_events"),
            ShutdownPhase::StoppingSweeper => write!(f, "stopping_sweeper"),
            ShutdownPhase::Complete => write!(f, "complete"),
        }
    }
}

/// Graceful shutdown coordinator
pub struct GracefulShutdown {
    config: ShutdownConfig,
    shutdown_requested: AtomicBool,
    phase: Arc<watch::Sender<ShutdownPhase>>,
    phase_rx: watch::Receiver<ShutdownPhase>,
    signal_tx: broadcast::Sender<ShutdownSignal>,
    completion_tx: mpsc::Sender<()>,
    completion_rx: Arc<tokio::sync::Mutex<mpsc::Receiver<()>>>,
}

impl GracefulShutdown {
    /// Create a new graceful shutdown handler
    pub fn new(config: ShutdownConfig) -> Self {
        let (phase_tx, phase_rx) = watch::channel(ShutdownPhase::Running);
        let (signal_tx, _) = broadcast::channel(8);
        let (completion_tx, completion_rx) = mpsc::channel(1);

        Self {
            config,
            shutdown_requested: AtomicBool::new(false),
            phase: Arc::new(phase_tx),
            phase_rx,
            signal_tx,
            completion_tx,
            completion_rx: Arc::new(tokio::sync::Mutex::new(completion_rx)),
        }
    }

    /// Create with default configuration
    pub fn with_defaults() -> Self {
        Self::new(ShutdownConfig::default())
    }

    /// Subscribe to shutdown signals
    pub fn subscribe(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.signal_tx.subscribe()
    }

    /// Check if shutdown has been requested
    pub fn is_shutdown_requested(&self) -> bool {
        self.shutdown_requested.load(Ordering::SeqCst)
    }

    /// Get current shutdown phase
    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase_rx.borrow()
    }

    /// Request shutdown with specified signal type
    pub fn request_shutdown(&self, signal: ShutdownSignal) {
        if self.shutdown_requested.swap(true, Ordering::SeqCst) {
            warn!("Shutdown already requested, ignoring duplicate signal: {}", signal);
            return;
        }

        info!("Shutdown requested: {}", signal);
        let _ = self.signal_tx.send(signal);
    }

    fn set_phase(&self, phase: ShutdownPhase) {
        let _ = self.phase.send(phase);
        info!("Shutdown phase: {}", phase);
    }

    /// Execute the shutdown sequence:
    /// 1. Close intake (listener and bus channel)
    /// 2. Drain in-flight deliveries; resolves to the number abandoned
    /// 3. Stop the sweeper
    ///
    /// Each step is a lazy future that only starts once its phase is entered.
    pub async fn execute<F1, F2, F3>(
        &self,
        signal: ShutdownSignal,
        stop_intake: F1,
        drain_events: F2,
        stop_sweeper: F3,
    ) -> Result<(), ShutdownError>
    where
        F1: Future<Output = ()>,
        F2: Future<Output = usize>,
        F3: Future<Output = ()>,
    {
        let config = match signal {
            ShutdownSignal::Graceful => self.config.clone(),
            ShutdownSignal::Urgent => self.config.urgent(),
        };
        let start = std::time::Instant::now();
        let total_timeout = Duration::from_secs(config.total_timeout_secs);

        info!(
            "Starting {} shutdown (timeout: {}s)",
            signal, config.total_timeout_secs
        );

        self.set_phase(ShutdownPhase::StoppingIntake);
        stop_intake.await;
        debug!("Intake closed");

        self.set_phase(ShutdownPhase::DrainingEvents);
        match tokio::time::timeout(Duration::from_secs(config.drain_timeout_secs), drain_events)
            .await
        {
            Ok(0) => info!("All in-flight deliveries drained"),
            Ok(abandoned) => warn!("{} deliveries abandoned during drain", abandoned),
            Err(_) => warn!(
                "Event drain timeout after {}s, proceeding anyway",
                config.drain_timeout_secs
            ),
        }

        if start.elapsed() > total_timeout {
            error!("Total shutdown timeout exceeded");
            self.set_phase(ShutdownPhase::Complete);
            return Err(ShutdownError::Timeout);
        }

        self.set_phase(ShutdownPhase::StoppingSweeper);
        if tokio::time::timeout(
            Duration::from_secs(config.sweeper_stop_timeout_secs),
            stop_sweeper,
        )
        .await
        .is_err()
        {
            warn!(
                "Sweeper stop timeout after {}s",
                config.sweeper_stop_timeout_secs
            );
        }

        self.set_phase(ShutdownPhase::Complete);
        info!("Graceful shutdown completed in {:?}", start.elapsed());

        let _ = self.completion_tx.send(()).await;
        Ok(())
    }

    /// Wait for shutdown to complete
    pub async fn wait_for_completion(&self) {
        let mut rx = self.completion_rx.lock().await;
        let _ = rx.recv().await;
    }

    /// Create a token that can be used to check shutdown status
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            signal_rx: self.signal_tx.subscribe(),
            phase_rx: self.phase_rx.clone(),
        }
    }
}

/// Token for checking shutdown status in async tasks
pub struct ShutdownToken {
    signal_rx: broadcast::Receiver<ShutdownSignal>,
    phase_rx: watch::Receiver<ShutdownPhase>,
}

impl Clone for ShutdownToken {
    fn clone(&self) -> Self {
        Self {
            signal_rx: self.signal_rx.resubscribe(),
            phase_rx: self.phase_rx.clone(),
        }
    }
}

impl ShutdownToken {
    /// Wait for shutdown signal
    pub async fn wait_for_shutdown(&mut self) -> ShutdownSignal {
        match self.signal_rx.recv().await {
            Ok(signal) => signal,
            Err(_) => ShutdownSignal::Urgent,
        }
    }

    /// Get current phase
    pub fn current_phase(&self) -> ShutdownPhase {
        *self.phase_rx.borrow()
    }

    /// Wait until the sequence has reached `target` or gone past it
    pub async fn wait_until(&mut self, target: ShutdownPhase) {
        while *self.phase_rx.borrow_and_update() < target {
            if self.phase_rx.changed().await.is_err() {
                break;
            }
        }
    }
}

/// Shutdown errors
#[derive(Debug, Clone)]
pub enum ShutdownError {
    /// Shutdown timed out
    Timeout,
}

impl std::fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutdownError::Timeout => write!(f, "shutdown timed out"),
        }
    }
}

impl std::error::Error for ShutdownError {}

/// Helper to install OS signal handlers
pub fn install_signal_handlers(shutdown: Arc<GracefulShutdown>) {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        for (kind, name, level) in [
            (SignalKind::terminate(), "SIGTERM", ShutdownSignal::Graceful),
            (SignalKind::interrupt(), "SIGINT", ShutdownSignal::Graceful),
            (SignalKind::quit(), "SIGQUIT", ShutdownSignal::Urgent),
        ] {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                let mut stream = match signal(kind) {
                    Ok(stream) => stream,
                    Err(e) => {
                        error!("Failed to install {} handler: {}", name, e);
                        return;
                    }
                };
                stream.recv().await;
                info!("Received {}", name);
                shutdown.request_shutdown(level);
            });
        }
    }

    #[cfg(not(unix))]
    {
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to install Ctrl+C handler: {}", e);
                return;
            }
            info!("Received Ctrl+C");
            shutdown.request_shutdown(ShutdownSignal::Graceful);
        });
    }
}

//! Builds the broker from configuration and runs it until a shutdown signal.

use crate::adapters::{
    BroadcastPublisher, FanoutPublisher, HttpEdgeRelay, HttpPeerDirectory, LocalObjectStore,
    LoggingPublisher, MemoryLedgerStore, MemoryTokenStore, PostgresStore, WebhookPublisher,
};
use crate::api::{create_router, AppState};
use crate::config::{AppConfig, StoreBackend};
use crate::coordination::{
    install_signal_handlers, GracefulShutdown, ShutdownConfig, ShutdownPhase, ShutdownSignal,
};
use crate::error::{BrokerError, Result};
use crate::persistence::{ExpirySweeper, LedgerStore, PendingRequestLedger, TokenStore};
use crate::services::{
    BrokerMetrics, BusSender, Collaborators, CompletionPublisher, CoordinationEngine,
    EventConsumer,
};
use crate::signing::TokenAuthority;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// The two shared stores, whichever backend holds them
#[derive(Clone)]
pub struct Stores {
    pub ledger: Arc<dyn LedgerStore>,
    pub tokens: Arc<dyn TokenStore>,
}

impl Stores {
    pub fn memory() -> Self {
        Self {
            ledger: Arc::new(MemoryLedgerStore::new()),
            tokens: Arc::new(MemoryTokenStore::new()),
        }
    }

    /// Connect to Postgres and bring the schema up to date
    pub async fn postgres(database_url: &str, max_connections: u32) -> Result<Self> {
        let store = Arc::new(PostgresStore::new(database_url, max_connections).await?);
        store.migrate().await?;
        Ok(Self {
            ledger: store.clone(),
            tokens: store,
        })
    }

    pub async fn from_config(config: &AppConfig, force_memory: bool) -> Result<Self> {
        if force_memory || config.store.backend == StoreBackend::Memory {
            info!("Using in-memory stores");
            return Ok(Self::memory());
        }

        let url = config.store.database_url.as_deref().ok_or_else(|| {
            BrokerError::Validation("store.database_url is required for postgres".to_string())
        })?;
        info!("Using PostgreSQL stores");
        Self::postgres(url, config.store.max_connections).await
    }
}

/// A fully wired broker that has not started running yet
pub struct Broker {
    engine: CoordinationEngine,
    bus: BusSender,
    consumer: EventConsumer,
    sweeper: ExpirySweeper,
    completions: BroadcastPublisher,
    objects: Arc<LocalObjectStore>,
    max_screenshots: usize,
}

impl Broker {
    pub async fn build(config: &AppConfig, force_memory: bool) -> Result<Self> {
        let stores = Stores::from_config(config, force_memory).await?;
        Self::with_stores(config, stores)
    }

    pub fn with_stores(config: &AppConfig, stores: Stores) -> Result<Self> {
        let timeout = config.service.http_timeout();
        let objects = Arc::new(LocalObjectStore::from_config(&config.storage)?);
        let completions = BroadcastPublisher::new(config.bus.channel_capacity);

        let mut publishers: Vec<Arc<dyn CompletionPublisher>> =
            vec![Arc::new(completions.clone()), Arc::new(LoggingPublisher)];
        if let Some(url) = config.bus.completion_webhook_url.as_deref() {
            publishers.push(Arc::new(WebhookPublisher::new(url, timeout)?));
        }

        let collaborators = Collaborators {
            directory: Arc::new(HttpPeerDirectory::new(
                &config.service.peer_registry_url,
                timeout,
            )?),
            transport: Arc::new(HttpEdgeRelay::new(&config.service.edge_service_url, timeout)?),
            storage: objects.clone(),
            publisher: Arc::new(FanoutPublisher::new(publishers)),
        };

        let ledger =
            PendingRequestLedger::new(stores.ledger.clone(), config.service.pending_request_ttl());
        let tokens = TokenAuthority::from_config(&config.token, stores.tokens.clone())?;
        let engine = CoordinationEngine::new(
            ledger,
            tokens,
            collaborators,
            Arc::new(BrokerMetrics::new()),
            config.service.upload_path_prefix.clone(),
        );

        let (bus, consumer) = EventConsumer::channel(engine.clone(), config.bus.channel_capacity);
        let sweeper = ExpirySweeper::new(
            stores.ledger,
            stores.tokens,
            Duration::from_secs(config.store.sweep_interval_secs.max(1)),
        );

        Ok(Self {
            engine,
            bus,
            consumer,
            sweeper,
            completions,
            objects,
            max_screenshots: config.service.max_screenshots_per_request,
        })
    }

    pub fn engine(&self) -> &CoordinationEngine {
        &self.engine
    }

    /// In-process subscription to `screenshots-completed`
    pub fn completions(&self) -> &BroadcastPublisher {
        &self.completions
    }

    pub fn router(&self) -> Router {
        let state = AppState::new(self.engine.clone(), self.bus.clone(), self.max_screenshots)
            .with_objects(self.objects.clone());
        create_router(state)
    }

    /// Serve on `addr` until `shutdown` completes its sequence
    pub async fn run(self, addr: SocketAddr, shutdown: Arc<GracefulShutdown>) -> Result<()> {
        let app = self.router();
        let metrics = self.engine.metrics().clone();
        let mut signals = shutdown.token();

        let consumer = tokio::spawn(self.consumer.run(shutdown.token()));

        let sweeper = Arc::new(self.sweeper);
        let sweeper_task = {
            let sweeper = sweeper.clone();
            let token = shutdown.token();
            tokio::spawn(async move { sweeper.run(token).await })
        };

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("Screenshot broker listening on {}", addr);
        let server = {
            let mut token = shutdown.token();
            tokio::spawn(async move {
                axum::serve(listener, app)
                    .with_graceful_shutdown(async move {
                        token.wait_until(ShutdownPhase::StoppingIntake).await
                    })
                    .await
            })
        };

        // A request that landed before `signals` subscribed only shows in the flag
        let signal = if shutdown.is_shutdown_requested() {
            ShutdownSignal::Graceful
        } else {
            signals.wait_for_shutdown().await
        };

        let stop_intake = async {
            match tokio::time::timeout(Duration::from_secs(10), server).await {
                Ok(Ok(Ok(()))) => info!("HTTP listener closed"),
                Ok(Ok(Err(e))) => error!("HTTP server error: {}", e),
                Ok(Err(e)) => error!("HTTP server task failed: {}", e),
                Err(_) => warn!("HTTP listener did not close in time"),
            }
        };
        let drain_events = async {
            match consumer.await {
                Ok(stats) => stats.crashed as usize,
                Err(e) => {
                    error!("Event consumer task failed: {}", e);
                    1
                }
            }
        };
        let stop_sweeper = async {
            if let Err(e) = sweeper_task.await {
                error!("Sweeper task failed: {}", e);
            }
        };

        let outcome = shutdown
            .execute(signal, stop_intake, drain_events, stop_sweeper)
            .await;

        metrics.log_status();
        let stats = sweeper.get_stats().await;
        info!(
            sweeps = stats.runs,
            buckets_purged = stats.buckets_purged,
            token_rows_purged = stats.token_rows_purged,
            "Broker stopped"
        );

        outcome.map_err(|e| BrokerError::Internal(e.to_string()))
    }
}

/// `serve`: build from config and run until SIGINT/SIGTERM
pub async fn serve(config: AppConfig, force_memory: bool) -> Result<()> {
    if let Err(errors) = config.validate() {
        for e in &errors {
            error!("Invalid configuration: {}", e);
        }
        return Err(BrokerError::Validation(errors.join("; ")));
    }

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| BrokerError::Validation(format!("invalid server address: {e}")))?;

    let broker = Broker::build(&config, force_memory).await?;

    let shutdown = Arc::new(GracefulShutdown::new(ShutdownConfig::default()));
    install_signal_handlers(shutdown.clone());

    broker.run(addr, shutdown).await
}

//! Event consumer
//!
//! Inbound bus messages arrive as [`Delivery`] values on a bounded channel. Each one is
//! handled on its own task; the outcome is acked back to the producer, which redelivers
//! anything marked [`DeliveryOutcome::Redeliver`]. On shutdown the channel is closed,
//! buffered deliveries are still dispatched, and every in-flight handler is awaited.

use crate::coordination::{ShutdownPhase, ShutdownToken};
use crate::domain::BusMessage;
use crate::error::{BrokerError, Result};
use crate::services::engine::CoordinationEngine;
use crate::services::metrics::BrokerMetrics;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// How a delivery was settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Handled; do not send again
    Processed,
    /// Malformed or otherwise unprocessable; sending again will not help
    Rejected(String),
    /// Storage failure; the producer should send it again
    Redeliver(String),
}

impl DeliveryOutcome {
    pub fn is_ack(&self) -> bool {
        !matches!(self, DeliveryOutcome::Redeliver(_))
    }
}

/// One bus message plus an optional ack channel back to its producer
#[derive(Debug)]
pub struct Delivery {
    pub message: BusMessage,
    ack: Option<oneshot::Sender<DeliveryOutcome>>,
}

impl Delivery {
    /// A delivery nobody waits on
    pub fn new(message: BusMessage) -> Self {
        Self { message, ack: None }
    }

    /// A delivery whose outcome is reported on the returned receiver
    pub fn with_ack(message: BusMessage) -> (Self, oneshot::Receiver<DeliveryOutcome>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                message,
                ack: Some(tx),
            },
            rx,
        )
    }
}

fn settle(ack: Option<oneshot::Sender<DeliveryOutcome>>, topic: &str, outcome: DeliveryOutcome) {
    match ack {
        Some(ack) => {
            if ack.send(outcome).is_err() {
                debug!(%topic, "Producer stopped waiting for its ack");
            }
        }
        None => {
            if let DeliveryOutcome::Redeliver(reason) = outcome {
                warn!(%topic, "Dropping unacked delivery that needed redelivery: {}", reason);
            }
        }
    }
}

/// Producer side of the bus channel
#[derive(Clone)]
pub struct BusSender {
    tx: mpsc::Sender<Delivery>,
}

impl BusSender {
    /// Enqueue without waiting for the outcome
    pub async fn send(&self, message: BusMessage) -> Result<()> {
        self.tx
            .send(Delivery::new(message))
            .await
            .map_err(|_| BrokerError::Cancelled)
    }

    /// Enqueue and wait until the consumer settles the delivery
    pub async fn deliver(&self, message: BusMessage) -> Result<DeliveryOutcome> {
        let (delivery, ack) = Delivery::with_ack(message);
        self.tx
            .send(delivery)
            .await
            .map_err(|_| BrokerError::Cancelled)?;
        ack.await.map_err(|_| BrokerError::Cancelled)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Counts kept over the consumer's lifetime
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub processed: u64,
    pub rejected: u64,
    pub redelivered: u64,
    /// Handler tasks that panicked
    pub crashed: u64,
}

/// Consumer side: dispatches deliveries to the engine
pub struct EventConsumer {
    engine: CoordinationEngine,
    rx: mpsc::Receiver<Delivery>,
}

impl EventConsumer {
    /// Create the bus channel and its consumer
    pub fn channel(engine: CoordinationEngine, capacity: usize) -> (BusSender, EventConsumer) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (BusSender { tx }, EventConsumer { engine, rx })
    }

    /// Handle one message and classify the result
    pub async fn handle(engine: &CoordinationEngine, message: BusMessage) -> DeliveryOutcome {
        let topic = message.topic();
        let result = match message {
            BusMessage::ScreenshotsRequested(event) => {
                engine.on_request_event(event).await.map(|_| ())
            }
            BusMessage::PeerAvailable(offer) => {
                engine.on_peer_available_event(offer).await.map(|_| ())
            }
        };

        match result {
            Ok(()) => DeliveryOutcome::Processed,
            Err(e) if e.is_transient() => {
                BrokerMetrics::inc(&engine.metrics().events_redelivered);
                warn!(%topic, "Event handling failed, asking for redelivery: {}", e);
                DeliveryOutcome::Redeliver(e.to_string())
            }
            Err(e) => {
                warn!(%topic, "Event rejected: {}", e);
                DeliveryOutcome::Rejected(e.to_string())
            }
        }
    }

    fn dispatch(&self, tasks: &mut JoinSet<DeliveryOutcome>, delivery: Delivery) {
        let engine = self.engine.clone();
        tasks.spawn(async move {
            let Delivery { message, ack } = delivery;
            let topic = message.topic();
            let outcome = Self::handle(&engine, message).await;
            debug!(%topic, ?outcome, "Delivery settled");
            settle(ack, topic, outcome.clone());
            outcome
        });
    }

    fn record(stats: &mut ConsumerStats, joined: std::result::Result<DeliveryOutcome, tokio::task::JoinError>) {
        match joined {
            Ok(DeliveryOutcome::Processed) => stats.processed += 1,
            Ok(DeliveryOutcome::Rejected(_)) => stats.rejected += 1,
            Ok(DeliveryOutcome::Redeliver(_)) => stats.redelivered += 1,
            Err(e) => {
                stats.crashed += 1;
                error!("Event handler task failed: {}", e);
            }
        }
    }

    /// Consume until intake is closed (shutdown or every sender dropped), then drain
    pub async fn run(mut self, mut shutdown: ShutdownToken) -> ConsumerStats {
        info!("Event consumer started");
        let mut tasks = JoinSet::new();
        let mut stats = ConsumerStats::default();

        loop {
            tokio::select! {
                maybe = self.rx.recv() => match maybe {
                    Some(delivery) => self.dispatch(&mut tasks, delivery),
                    None => break,
                },
                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    Self::record(&mut stats, joined);
                }
                _ = shutdown.wait_until(ShutdownPhase::StoppingIntake) => {
                    self.rx.close();
                    while let Some(delivery) = self.rx.recv().await {
                        self.dispatch(&mut tasks, delivery);
                    }
                    break;
                }
            }
        }

        let in_flight = tasks.len();
        if in_flight > 0 {
            info!(in_flight, "Draining in-flight event handlers");
        }
        while let Some(joined) = tasks.join_next().await {
            Self::record(&mut stats, joined);
        }

        info!(
            processed = stats.processed,
            rejected = stats.rejected,
            redelivered = stats.redelivered,
            "Event consumer stopped"
        );
        stats
    }
}

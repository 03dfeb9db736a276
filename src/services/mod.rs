pub mod collaborators;
pub mod consumer;
pub mod engine;
pub mod metrics;

pub use collaborators::{
    CollaboratorResult, CompletionPublisher, EdgeInvite, InviteTransport, PeerDirectory,
    ScreenshotStorage, ScreenshotUpload,
};
pub use consumer::{BusSender, ConsumerStats, Delivery, DeliveryOutcome, EventConsumer};
pub use engine::{Collaborators, CoordinationEngine, Redemption, RequestOutcome};
pub use metrics::BrokerMetrics;

pub mod edge_client;
pub mod memory_store;
pub mod object_store;
pub mod peer_registry;
pub mod postgres;
pub mod publisher;
pub mod url_path;

pub use edge_client::HttpEdgeRelay;
pub use memory_store::{MemoryLedgerStore, MemoryTokenStore};
pub use object_store::{LocalObjectStore, MemoryObjectStore};
pub use peer_registry::HttpPeerDirectory;
pub use postgres::PostgresStore;
pub use publisher::{BroadcastPublisher, FanoutPublisher, LoggingPublisher, WebhookPublisher};

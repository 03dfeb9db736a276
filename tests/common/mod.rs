#![allow(dead_code)]

use async_trait::async_trait;
use axum::body::Body;
use axum::http::{header, Request};
use axum::Router;
use chrono::{DateTime, Duration, Utc};
use screenshot_broker::adapters::url_path;
use screenshot_broker::adapters::{
    BroadcastPublisher, LoggingPublisher, MemoryLedgerStore, MemoryObjectStore, MemoryTokenStore,
};
use screenshot_broker::api::{create_router, AppState};
use screenshot_broker::coordination::GracefulShutdown;
use screenshot_broker::domain::{PeerOffer, ScreenshotsCompleted, ScreenshotsRequested};
use screenshot_broker::error::CollaboratorError;
use screenshot_broker::persistence::PendingRequestLedger;
use screenshot_broker::services::{
    BrokerMetrics, BusSender, CollaboratorResult, Collaborators, CompletionPublisher,
    CoordinationEngine, EdgeInvite, EventConsumer, InviteTransport, PeerDirectory,
};
use screenshot_broker::signing::{HmacSigner, TokenAuthority};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

pub const SECRET: &str = "integration-test-secret-0123456789abcdef";
pub const BOUNDARY: &str = "broker-test-boundary";

/// Peer directory whose contents the test controls
#[derive(Default)]
pub struct FakeDirectory {
    peers: Mutex<HashMap<String, Vec<PeerOffer>>>,
}

impl FakeDirectory {
    pub fn set(&self, catalog_id: &str, peers: Vec<PeerOffer>) {
        self.peers
            .lock()
            .unwrap()
            .insert(catalog_id.to_string(), peers);
    }
}

#[async_trait]
impl PeerDirectory for FakeDirectory {
    async fn peers_for_catalog(&self, catalog_id: &str) -> CollaboratorResult<Vec<PeerOffer>> {
        Ok(self
            .peers
            .lock()
            .unwrap()
            .get(catalog_id)
            .cloned()
            .unwrap_or_default())
    }
}

/// Edge relay that records every invite it accepts
#[derive(Default)]
pub struct RecordingRelay {
    invites: Mutex<Vec<(String, EdgeInvite)>>,
    pub refuse: std::sync::atomic::AtomicBool,
}

impl RecordingRelay {
    pub fn invites(&self) -> Vec<(String, EdgeInvite)> {
        self.invites.lock().unwrap().clone()
    }
}

#[async_trait]
impl InviteTransport for RecordingRelay {
    async fn send_invite(&self, edge_id: &str, invite: &EdgeInvite) -> CollaboratorResult<()> {
        if self.refuse.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(CollaboratorError::UnexpectedStatus {
                service: "edge-relay",
                status: 503,
                body: "relay down".to_string(),
            });
        }
        self.invites
            .lock()
            .unwrap()
            .push((edge_id.to_string(), invite.clone()));
        Ok(())
    }
}

/// Fans completions to a broadcast channel and keeps a copy
pub struct CapturingPublisher {
    inner: BroadcastPublisher,
    events: Mutex<Vec<ScreenshotsCompleted>>,
}

impl CapturingPublisher {
    pub fn events(&self) -> Vec<ScreenshotsCompleted> {
        self.events.lock().unwrap().clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ScreenshotsCompleted> {
        self.inner.subscribe()
    }
}

#[async_trait]
impl CompletionPublisher for CapturingPublisher {
    async fn publish(&self, event: &ScreenshotsCompleted) -> CollaboratorResult<()> {
        self.events.lock().unwrap().push(event.clone());
        LoggingPublisher.publish(event).await?;
        self.inner.publish(event).await
    }
}

pub struct Harness {
    pub engine: CoordinationEngine,
    pub directory: Arc<FakeDirectory>,
    pub relay: Arc<RecordingRelay>,
    pub publisher: Arc<CapturingPublisher>,
    pub objects: Arc<MemoryObjectStore>,
}

impl Harness {
    pub fn new() -> Self {
        let directory = Arc::new(FakeDirectory::default());
        let relay = Arc::new(RecordingRelay::default());
        let publisher = Arc::new(CapturingPublisher {
            inner: BroadcastPublisher::new(16),
            events: Mutex::new(Vec::new()),
        });
        let objects = Arc::new(MemoryObjectStore::new("memory://screenshots"));

        let ledger = PendingRequestLedger::new(Arc::new(MemoryLedgerStore::new()), Duration::hours(24));
        let tokens = TokenAuthority::new(
            HmacSigner::new(SECRET).unwrap(),
            Arc::new(MemoryTokenStore::new()),
            Duration::minutes(30),
            Duration::hours(24),
        );
        let collaborators = Collaborators {
            directory: directory.clone(),
            transport: relay.clone(),
            storage: objects.clone(),
            publisher: publisher.clone(),
        };
        let engine = CoordinationEngine::new(
            ledger,
            tokens,
            collaborators,
            Arc::new(BrokerMetrics::new()),
            "/api/screenshot",
        );

        Self {
            engine,
            directory,
            relay,
            publisher,
            objects,
        }
    }

    /// Start a consumer and return the router fed by it
    pub fn serve(&self, shutdown: &GracefulShutdown) -> (Router, BusSender) {
        let (bus, consumer) = EventConsumer::channel(self.engine.clone(), 64);
        tokio::spawn(consumer.run(shutdown.token()));
        let state = AppState::new(self.engine.clone(), bus.clone(), 10);
        (create_router(state), bus)
    }
}

pub fn requested(catalog_id: &str, request_id: &str) -> ScreenshotsRequested {
    ScreenshotsRequested {
        catalog_id: catalog_id.to_string(),
        request_id: request_id.to_string(),
        requester_service: "catalog-service".to_string(),
        created_at: Utc::now(),
        expires_at: None,
    }
}

pub fn requested_until(
    catalog_id: &str,
    request_id: &str,
    expires_at: DateTime<Utc>,
) -> ScreenshotsRequested {
    ScreenshotsRequested {
        expires_at: Some(expires_at),
        ..requested(catalog_id, request_id)
    }
}

pub fn peer(peer_id: &str, edge_id: &str, catalogs: &[&str]) -> PeerOffer {
    PeerOffer {
        peer_id: peer_id.to_string(),
        edge_id: edge_id.to_string(),
        catalog_ids: catalogs.iter().map(|c| c.to_string()).collect(),
    }
}

/// Hand-built multipart body with one part per `(content type, bytes)`
pub fn multipart_body(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut body = Vec::new();
    for (i, (content_type, data)) in files.iter().enumerate() {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"files\"; filename=\"shot{i}\"\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(format!("Content-Type: {content_type}\r\n\r\n").as_bytes());
        body.extend_from_slice(data);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

pub fn upload_request(catalog_id: &str, token: Option<&str>, files: &[(&str, &[u8])]) -> Request<Body> {
    let path = url_path::append_segments("/api/screenshot", &[catalog_id]).unwrap();
    upload_request_to(&path, token, files)
}

pub fn upload_request_to(path: &str, token: Option<&str>, files: &[(&str, &[u8])]) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(path)
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        );
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    builder.body(Body::from(multipart_body(files))).unwrap()
}

pub fn json_request<T: serde::Serialize>(uri: &str, payload: &T) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(payload).unwrap()))
        .unwrap()
}

pub async fn body_json(response: axum::response::Response) -> serde_json::Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

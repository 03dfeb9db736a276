use crate::domain::{PeerOffer, ScreenshotsRequested};
use serde::{Deserialize, Serialize};

/// Payload of the `screenshots-completed` topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenshotsCompleted {
    pub catalog_id: String,
    pub request_id: String,
    pub screenshot_urls: Vec<String>,
    pub status: String,
}

impl ScreenshotsCompleted {
    pub fn new(catalog_id: &str, request_id: &str, screenshot_urls: Vec<String>) -> Self {
        Self {
            catalog_id: catalog_id.to_string(),
            request_id: request_id.to_string(),
            screenshot_urls,
            status: "completed".to_string(),
        }
    }
}

/// Inbound bus messages, one variant per consumed topic
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusMessage {
    ScreenshotsRequested(ScreenshotsRequested),
    PeerAvailable(PeerOffer),
}

impl BusMessage {
    pub fn topic(&self) -> &'static str {
        match self {
            BusMessage::ScreenshotsRequested(_) => "screenshots-requested",
            BusMessage::PeerAvailable(_) => "peer-available",
        }
    }
}

use serde::{Deserialize, Serialize};

// ============================================================================
// Upload Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadResponse {
    pub catalog_id: String,
    pub screenshot_urls: Vec<String>,
    pub status: String,
    pub message: String,
}

impl UploadResponse {
    pub fn success(catalog_id: String, screenshot_urls: Vec<String>) -> Self {
        let message = format!("{} screenshot(s) uploaded", screenshot_urls.len());
        Self {
            catalog_id,
            screenshot_urls,
            status: "success".to_string(),
            message,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
}

// ============================================================================
// Event Bridge Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventAccepted {
    pub topic: String,
    pub outcome: String,
}

// ============================================================================
// System Types
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub store: String,
    pub uptime_secs: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignedObjectQuery {
    pub expires: i64,
    pub signature: String,
}

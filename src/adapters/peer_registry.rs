//! Peer registry client
//!
//! Asks the registry which peers currently hold a catalog item.

use crate::domain::PeerOffer;
use crate::adapters::url_path;
use crate::error::{CollaboratorError, Result};
use crate::services::collaborators::{CollaboratorResult, PeerDirectory};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use url::Url;
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "peer-registry";

/// `GET {registry}/api/peers/catalog/{catalog_id}` over HTTP
#[derive(Clone)]
pub struct HttpPeerDirectory {
    client: Client,
    base_url: Url,
    timeout_ms: u64,
}

impl HttpPeerDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: url_path::parse_base(base_url)?,
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    fn catalog_url(&self, catalog_id: &str) -> Url {
        url_path::with_segments(&self.base_url, &["api", "peers", "catalog", catalog_id])
    }
}

#[async_trait]
impl PeerDirectory for HttpPeerDirectory {
    async fn peers_for_catalog(&self, catalog_id: &str) -> CollaboratorResult<Vec<PeerOffer>> {
        let resp = self
            .client
            .get(self.catalog_url(catalog_id))
            .send()
            .await
            .map_err(|e| CollaboratorError::from_reqwest(SERVICE, self.timeout_ms, e))?;

        let status = resp.status();
        if status != StatusCode::OK {
            let body = resp.text().await.unwrap_or_default();
            return Err(CollaboratorError::UnexpectedStatus {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }

        let peers: Vec<PeerOffer> = resp
            .json()
            .await
            .map_err(|e| CollaboratorError::Decode {
                service: SERVICE,
                reason: e.to_string(),
            })?;

        debug!(%catalog_id, peers = peers.len(), "Peer registry answered");
        Ok(peers)
    }
}

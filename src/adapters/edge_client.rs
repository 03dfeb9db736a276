//! Edge relay client. Delivers upload invites to peers.

use crate::adapters::url_path;
use crate::error::{CollaboratorError, Result};
use crate::services::collaborators::{CollaboratorResult, EdgeInvite, InviteTransport};
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use url::Url;
use std::time::Duration;
use tracing::debug;

const SERVICE: &str = "edge-relay";

#[derive(Clone)]
pub struct HttpEdgeRelay {
    client: Client,
    base_url: Url,
    timeout_ms: u64,
}

impl HttpEdgeRelay {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: url_path::parse_base(base_url)?,
            timeout_ms: timeout.as_millis() as u64,
        })
    }

    fn invite_url(&self, edge_id: &str) -> Url {
        url_path::with_segments(
            &self.base_url,
            &["api", "edge", edge_id, "screenshot", "request"],
        )
    }
}

#[async_trait]
impl InviteTransport for HttpEdgeRelay {
    /// The relay queues the invite and must answer 202; anything else is a failure
    async fn send_invite(&self, edge_id: &str, invite: &EdgeInvite) -> CollaboratorResult<()> {
        let resp = self
            .client
            .post(self.invite_url(edge_id))
            .json(invite)
            .send()
            .await
            .map_err(|e| CollaboratorError::from_reqwest(SERVICE, self.timeout_ms, e))?;

        let status = resp.status();
        if status != StatusCode::ACCEPTED {
            let body = resp.text().await.unwrap_or_default();
            return Err(CollaboratorError::UnexpectedStatus {
                service: SERVICE,
                status: status.as_u16(),
                body,
            });
        }

        debug!(%edge_id, peer_id = %invite.peer_id, "Edge relay accepted invite");
        Ok(())
    }
}

//! Coordination engine: fans screenshot requests out to peers and settles the
//! upload race. Holds no state of its own; everything lives in the ledger and the
//! token store.

use crate::adapters::url_path;
use crate::domain::{
    BlacklistReason, PeerOffer, PendingRequest, RequestState, ScreenshotsCompleted,
    ScreenshotsRequested, TokenPayload, WinnerClaim,
};
use crate::error::{AuthError, BrokerError, Result};
use crate::persistence::PendingRequestLedger;
use crate::services::collaborators::{
    CompletionPublisher, EdgeInvite, InviteTransport, PeerDirectory, ScreenshotStorage,
    ScreenshotUpload,
};
use crate::services::metrics::BrokerMetrics;
use crate::signing::TokenAuthority;
use futures::future::join_all;
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn};

/// The outbound collaborators the engine drives
#[derive(Clone)]
pub struct Collaborators {
    pub directory: Arc<dyn PeerDirectory>,
    pub transport: Arc<dyn InviteTransport>,
    pub storage: Arc<dyn ScreenshotStorage>,
    pub publisher: Arc<dyn CompletionPublisher>,
}

/// What handling one request event achieved
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOutcome {
    pub state: RequestState,
    pub invites_sent: usize,
}

/// Result of a winning redemption
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redemption {
    pub catalog_id: String,
    pub request_id: String,
    pub screenshot_urls: Vec<String>,
}

#[derive(Clone)]
pub struct CoordinationEngine {
    ledger: PendingRequestLedger,
    tokens: TokenAuthority,
    collaborators: Collaborators,
    metrics: Arc<BrokerMetrics>,
    upload_path_prefix: String,
}

impl CoordinationEngine {
    pub fn new(
        ledger: PendingRequestLedger,
        tokens: TokenAuthority,
        collaborators: Collaborators,
        metrics: Arc<BrokerMetrics>,
        upload_path_prefix: impl Into<String>,
    ) -> Self {
        Self {
            ledger,
            tokens,
            collaborators,
            metrics,
            upload_path_prefix: upload_path_prefix.into(),
        }
    }

    pub fn ledger(&self) -> &PendingRequestLedger {
        &self.ledger
    }

    pub fn tokens(&self) -> &TokenAuthority {
        &self.tokens
    }

    pub fn metrics(&self) -> &Arc<BrokerMetrics> {
        &self.metrics
    }

    /// Upload route for a catalog, with the id escaped as one path segment
    pub fn upload_locator(&self, catalog_id: &str) -> Result<String> {
        url_path::append_segments(&self.upload_path_prefix, &[catalog_id])
    }

    /// Handle a `screenshots-requested` event.
    ///
    /// Ledger failures propagate so the bus redelivers; directory and relay failures
    /// only leave the request waiting for a later peer.
    #[instrument(skip(self, event), fields(catalog_id = %event.catalog_id, request_id = %event.request_id))]
    pub async fn on_request_event(&self, event: ScreenshotsRequested) -> Result<RequestOutcome> {
        BrokerMetrics::inc(&self.metrics.requests_received);

        let request = match self.ledger.admit(event) {
            Ok(request) => request,
            Err(e) => {
                warn!("Rejecting malformed screenshot request: {}", e);
                return Err(e);
            }
        };

        if let Some(winner) = self
            .tokens
            .winner_of(&request.catalog_id, &request.request_id)
            .await?
        {
            info!(winner_token_id = %winner, "Request already fulfilled, ignoring redelivery");
            return Ok(RequestOutcome {
                state: RequestState::Fulfilled,
                invites_sent: 0,
            });
        }

        if !self.ledger.add(&request).await? {
            return Ok(RequestOutcome {
                state: RequestState::Requested,
                invites_sent: 0,
            });
        }

        let peers = match self
            .collaborators
            .directory
            .peers_for_catalog(&request.catalog_id)
            .await
        {
            Ok(peers) => peers,
            Err(e) => {
                warn!("Peer lookup failed, request waits for a peer: {}", e);
                Vec::new()
            }
        };

        if peers.is_empty() {
            debug!("No peers hold this catalog item yet");
            return Ok(RequestOutcome {
                state: RequestState::AwaitingPeer,
                invites_sent: 0,
            });
        }

        let invites_sent = self
            .invite_all(peers.iter().map(|peer| (peer, &request)))
            .await?;

        let state = if invites_sent > 0 {
            RequestState::Invited
        } else {
            RequestState::AwaitingPeer
        };
        info!(peers = peers.len(), invites_sent, %state, "Screenshot request handled");

        Ok(RequestOutcome {
            state,
            invites_sent,
        })
    }

    /// Handle a `peer-available` event: invite the peer to every pending request
    /// for the catalog items it holds. Returns the number of invites delivered.
    #[instrument(skip(self, offer), fields(peer_id = %offer.peer_id, edge_id = %offer.edge_id))]
    pub async fn on_peer_available_event(&self, offer: PeerOffer) -> Result<usize> {
        BrokerMetrics::inc(&self.metrics.offers_received);

        let catalogs: BTreeSet<&str> = offer.catalog_ids.iter().map(String::as_str).collect();
        let mut pending = Vec::new();
        for catalog_id in catalogs {
            pending.extend(self.ledger.list(catalog_id).await?);
        }

        if pending.is_empty() {
            debug!("Peer offers nothing that is pending");
            return Ok(0);
        }

        let invites_sent = self
            .invite_all(pending.iter().map(|request| (&offer, request)))
            .await?;
        info!(
            pending = pending.len(),
            invites_sent, "Peer availability handled"
        );
        Ok(invites_sent)
    }

    async fn invite_all<'a>(
        &self,
        pairs: impl Iterator<Item = (&'a PeerOffer, &'a PendingRequest)>,
    ) -> Result<usize> {
        let results = join_all(pairs.map(|(peer, request)| self.invite(peer, request))).await;

        let mut sent = 0;
        for result in results {
            if result? {
                sent += 1;
            }
        }
        Ok(sent)
    }

    /// Mint a token for `(peer, request)` and deliver it through the edge relay.
    ///
    /// Returns whether the relay accepted the invite. Only token-store failures are errors.
    pub async fn invite(&self, peer: &PeerOffer, request: &PendingRequest) -> Result<bool> {
        let screenshot_upload_url = self.upload_locator(&request.catalog_id)?;
        let token = self
            .tokens
            .issue(&peer.peer_id, &request.catalog_id, &request.request_id)?;
        BrokerMetrics::inc(&self.metrics.tokens_issued);
        self.tokens.track(&token).await?;

        let invite = EdgeInvite {
            peer_id: peer.peer_id.clone(),
            catalog_id: request.catalog_id.clone(),
            token: token.token.clone(),
            screenshot_upload_url,
        };

        match self
            .collaborators
            .transport
            .send_invite(&peer.edge_id, &invite)
            .await
        {
            Ok(()) => {
                BrokerMetrics::inc(&self.metrics.invites_sent);
                info!(
                    peer_id = %peer.peer_id,
                    catalog_id = %request.catalog_id,
                    request_id = %request.request_id,
                    token_id = %token.token_id(),
                    "Invite sent"
                );
                Ok(true)
            }
            Err(e) => {
                BrokerMetrics::inc(&self.metrics.invites_failed);
                warn!(
                    peer_id = %peer.peer_id,
                    request_id = %request.request_id,
                    "Invite not delivered: {}",
                    e
                );
                Ok(false)
            }
        }
    }

    /// Redeem a validated token: the race's decision point.
    ///
    /// Order: consume the token, claim the request, store files, revoke siblings,
    /// retire the ledger entry, publish completion.
    #[instrument(skip(self, payload, files), fields(catalog_id = %payload.catalog_id, request_id = %payload.request_id, token_id = %payload.token_id))]
    pub async fn redeem(
        &self,
        payload: &TokenPayload,
        files: Vec<ScreenshotUpload>,
    ) -> Result<Redemption> {
        if let Some(reason) = self.tokens.consume(payload).await? {
            BrokerMetrics::inc(&self.metrics.redemptions_rejected);
            info!(%reason, "Token already revoked");
            return Err(AuthError::Blacklisted(reason).into());
        }

        if let WinnerClaim::Lost { .. } = self.tokens.claim_request(payload).await? {
            self.tokens
                .blacklist(
                    &payload.token_id,
                    BlacklistReason::OtherPeerUploaded,
                    self.tokens.blacklist_ttl(),
                )
                .await?;
            BrokerMetrics::inc(&self.metrics.redemptions_rejected);
            return Err(BrokerError::RequestAlreadyFulfilled {
                catalog_id: payload.catalog_id.clone(),
                request_id: payload.request_id.clone(),
            });
        }

        let screenshot_urls = self.store_files(&payload.catalog_id, files).await;

        if let Err(e) = self.tokens.revoke_siblings(payload).await {
            error!("Sibling revocation failed, winner key still holds: {}", e);
        }

        if let Err(e) = self
            .ledger
            .remove(&payload.catalog_id, &payload.request_id)
            .await
        {
            warn!("Ledger entry not removed, it will lapse on its own: {}", e);
        }

        let completed = ScreenshotsCompleted::new(
            &payload.catalog_id,
            &payload.request_id,
            screenshot_urls.clone(),
        );
        match self.collaborators.publisher.publish(&completed).await {
            Ok(()) => BrokerMetrics::inc(&self.metrics.completions_published),
            Err(e) => error!("Completion not published: {}", e),
        }

        BrokerMetrics::inc(&self.metrics.redemptions_accepted);
        info!(urls = screenshot_urls.len(), "Screenshot request fulfilled");

        Ok(Redemption {
            catalog_id: payload.catalog_id.clone(),
            request_id: payload.request_id.clone(),
            screenshot_urls,
        })
    }

    /// Store each file in order; failures are skipped
    async fn store_files(&self, catalog_id: &str, files: Vec<ScreenshotUpload>) -> Vec<String> {
        let storage = &self.collaborators.storage;
        let mut urls = Vec::with_capacity(files.len());

        for (index, file) in files.iter().enumerate() {
            let stored = async {
                let object = storage
                    .upload(catalog_id, &file.data, &file.content_type)
                    .await?;
                storage.presigned_url(&object).await
            }
            .await;

            match stored {
                Ok(url) => {
                    BrokerMetrics::inc(&self.metrics.uploads_succeeded);
                    urls.push(url);
                }
                Err(e) => {
                    BrokerMetrics::inc(&self.metrics.uploads_failed);
                    warn!(index, content_type = %file.content_type, "Screenshot upload failed: {}", e);
                }
            }
        }

        urls
    }
}

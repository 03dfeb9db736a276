//! One-time upload tokens
//!
//! A token is `base64url(JSON payload) "." base64url(HMAC-SHA256(payload part))`.
//! Signature and expiry make it unforgeable and short-lived; the blacklist makes it
//! single-use. Validity state lives entirely in the [`TokenStore`].

use crate::config::TokenConfig;
use crate::domain::{
    BlacklistReason, IssuedToken, TokenPayload, TokenState, UploadToken, WinnerClaim,
};
use crate::error::{AuthError, Result};
use crate::persistence::TokenStore;
use crate::signing::HmacSigner;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as B64URL, Engine};
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Issues and validates upload tokens and owns their revocation state
#[derive(Clone)]
pub struct TokenAuthority {
    signer: HmacSigner,
    store: Arc<dyn TokenStore>,
    window: Duration,
    blacklist_ttl: Duration,
}

impl TokenAuthority {
    pub fn new(
        signer: HmacSigner,
        store: Arc<dyn TokenStore>,
        window: Duration,
        blacklist_ttl: Duration,
    ) -> Self {
        Self {
            signer,
            store,
            window,
            blacklist_ttl,
        }
    }

    pub fn from_config(config: &TokenConfig, store: Arc<dyn TokenStore>) -> Result<Self> {
        Ok(Self::new(
            HmacSigner::new(&config.secret)?,
            store,
            config.window(),
            config.blacklist_ttl(),
        ))
    }

    /// Lifetime of every token this authority mints
    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn blacklist_ttl(&self) -> Duration {
        self.blacklist_ttl
    }

    /// Mint a token for one (peer, catalog, request) triple. Touches no store.
    pub fn issue(&self, peer_id: &str, catalog_id: &str, request_id: &str) -> Result<UploadToken> {
        self.issue_at(peer_id, catalog_id, request_id, Utc::now())
    }

    pub fn issue_at(
        &self,
        peer_id: &str,
        catalog_id: &str,
        request_id: &str,
        now: DateTime<Utc>,
    ) -> Result<UploadToken> {
        let payload = TokenPayload {
            token_id: Uuid::new_v4().to_string(),
            peer_id: peer_id.to_string(),
            catalog_id: catalog_id.to_string(),
            request_id: request_id.to_string(),
            iat: now.timestamp(),
            exp: (now + self.window).timestamp(),
        };
        let token = self.encode(&payload)?;

        Ok(UploadToken {
            token,
            payload,
            issued_at: now,
        })
    }

    fn encode(&self, payload: &TokenPayload) -> Result<String> {
        let body = B64URL.encode(serde_json::to_vec(payload)?);
        let signature = self.signer.sign(&body)?;
        Ok(format!("{body}.{signature}"))
    }

    /// Check signature and structure only
    fn verify(&self, token: &str) -> std::result::Result<TokenPayload, AuthError> {
        let (body, signature) = token
            .trim()
            .split_once('.')
            .filter(|(b, s)| !b.is_empty() && !s.is_empty() && !s.contains('.'))
            .ok_or(AuthError::Unparseable)?;

        if !self.signer.verify(body, signature) {
            return Err(AuthError::BadSignature);
        }

        decode_body(body).ok_or(AuthError::Unparseable)
    }

    /// Full validation: structure, signature, revocation, then expiry.
    ///
    /// A revoked token reports its revocation reason even once it has also expired.
    pub async fn validate(&self, token: &str) -> Result<TokenPayload> {
        self.validate_at(token, Utc::now()).await
    }

    pub async fn validate_at(&self, token: &str, now: DateTime<Utc>) -> Result<TokenPayload> {
        let payload = self.verify(token)?;

        if let Some(reason) = self.store.blacklist_reason(&payload.token_id).await? {
            return Err(AuthError::Blacklisted(reason).into());
        }
        if payload.is_expired(now) {
            return Err(AuthError::Expired.into());
        }

        Ok(payload)
    }

    /// Read the token id without checking anything. Only for choosing a user-facing
    /// message or marking a token that already failed validation.
    pub fn peek_token_id(token: &str) -> Option<String> {
        Self::peek_payload(token).map(|p| p.token_id)
    }

    /// Unverified claims, for diagnostics
    pub fn peek_payload(token: &str) -> Option<TokenPayload> {
        let (body, _) = token.trim().split_once('.')?;
        decode_body(body)
    }

    /// Insert or overwrite a blacklist entry (last write wins)
    pub async fn blacklist(
        &self,
        token_id: &str,
        reason: BlacklistReason,
        ttl: Duration,
    ) -> Result<()> {
        self.store.set_blacklist(token_id, reason, ttl).await?;
        debug!(%token_id, %reason, "Token blacklisted");
        Ok(())
    }

    pub async fn blacklist_reason(&self, token_id: &str) -> Result<Option<BlacklistReason>> {
        self.store.blacklist_reason(token_id).await
    }

    /// Mark a token used, atomically. `None` means this caller consumed it; otherwise
    /// the reason it was already revoked with.
    pub async fn consume(&self, payload: &TokenPayload) -> Result<Option<BlacklistReason>> {
        self.store
            .insert_blacklist_if_absent(
                &payload.token_id,
                BlacklistReason::AlreadyUsed,
                self.blacklist_ttl,
            )
            .await
    }

    /// Register an issued token against its request so it can be revoked later
    pub async fn track(&self, token: &UploadToken) -> Result<()> {
        self.store
            .record_issued(&IssuedToken::from(&token.payload), self.blacklist_ttl)
            .await
    }

    /// Try to become the single winner of the token's request
    pub async fn claim_request(&self, payload: &TokenPayload) -> Result<WinnerClaim> {
        let claim = self
            .store
            .claim_winner(
                &payload.catalog_id,
                &payload.request_id,
                &payload.token_id,
                self.blacklist_ttl,
            )
            .await?;

        if let WinnerClaim::Lost { ref winner_token_id } = claim {
            info!(
                catalog_id = %payload.catalog_id,
                request_id = %payload.request_id,
                token_id = %payload.token_id,
                %winner_token_id,
                "Request already won by another token"
            );
        }
        Ok(claim)
    }

    pub async fn winner_of(&self, catalog_id: &str, request_id: &str) -> Result<Option<String>> {
        self.store.winner_of(catalog_id, request_id).await
    }

    /// Blacklist every other token issued for the winner's request
    pub async fn revoke_siblings(&self, winner: &TokenPayload) -> Result<usize> {
        let siblings = self
            .store
            .issued_for_request(&winner.catalog_id, &winner.request_id)
            .await?;

        let mut revoked = 0;
        for sibling in siblings
            .iter()
            .filter(|t| t.token_id != winner.token_id)
        {
            self.blacklist(
                &sibling.token_id,
                BlacklistReason::OtherPeerUploaded,
                self.blacklist_ttl,
            )
            .await?;
            revoked += 1;
        }

        if revoked > 0 {
            info!(
                catalog_id = %winner.catalog_id,
                request_id = %winner.request_id,
                revoked,
                "Revoked sibling tokens"
            );
        }
        Ok(revoked)
    }

    /// Lifecycle position of a token, as far as the store remembers it
    pub async fn state_of(&self, token_id: &str) -> Result<TokenState> {
        Ok(match self.store.blacklist_reason(token_id).await? {
            None => TokenState::Issued,
            Some(BlacklistReason::AlreadyUsed) => TokenState::Redeemed,
            Some(_) => TokenState::Blacklisted,
        })
    }
}

fn decode_body(body: &str) -> Option<TokenPayload> {
    let bytes = B64URL.decode(body).ok()?;
    match serde_json::from_slice(&bytes) {
        Ok(payload) => Some(payload),
        Err(e) => {
            debug!("Token payload did not decode: {}", e);
            None
        }
    }
}

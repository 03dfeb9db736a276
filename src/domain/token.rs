use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Why a token was revoked
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlacklistReason {
    AlreadyUsed,
    OtherPeerUploaded,
    Expired,
}

impl BlacklistReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BlacklistReason::AlreadyUsed => "already_used",
            BlacklistReason::OtherPeerUploaded => "other_peer_uploaded",
            BlacklistReason::Expired => "expired",
        }
    }
}

impl fmt::Display for BlacklistReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BlacklistReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "already_used" => Ok(BlacklistReason::AlreadyUsed),
            "other_peer_uploaded" => Ok(BlacklistReason::OtherPeerUploaded),
            "expired" => Ok(BlacklistReason::Expired),
            other => Err(format!("unknown blacklist reason: {other}")),
        }
    }
}

/// Claims carried inside a signed upload token
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPayload {
    pub token_id: String,
    pub peer_id: String,
    pub catalog_id: String,
    pub request_id: String,
    /// Issued-at, unix seconds
    pub iat: i64,
    /// Expiry, unix seconds
    pub exp: i64,
}

impl TokenPayload {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.exp, 0)
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.exp <= now.timestamp()
    }
}

/// A freshly minted token together with its encoded form
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadToken {
    pub token: String,
    pub payload: TokenPayload,
    pub issued_at: DateTime<Utc>,
}

impl UploadToken {
    pub fn token_id(&self) -> &str {
        &self.payload.token_id
    }
}

/// Registry row linking an issued token to its request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedToken {
    pub token_id: String,
    pub peer_id: String,
    pub catalog_id: String,
    pub request_id: String,
}

impl From<&TokenPayload> for IssuedToken {
    fn from(payload: &TokenPayload) -> Self {
        Self {
            token_id: payload.token_id.clone(),
            peer_id: payload.peer_id.clone(),
            catalog_id: payload.catalog_id.clone(),
            request_id: payload.request_id.clone(),
        }
    }
}

/// Outcome of a set-if-absent claim on a request's winner key
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WinnerClaim {
    Won,
    Lost { winner_token_id: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_round_trips_through_str() {
        for reason in [
            BlacklistReason::AlreadyUsed,
            BlacklistReason::OtherPeerUploaded,
            BlacklistReason::Expired,
        ] {
            assert_eq!(reason.as_str().parse::<BlacklistReason>(), Ok(reason));
        }
        assert!("stolen".parse::<BlacklistReason>().is_err());
    }

    #[test]
    fn test_reason_serde_matches_wire_names() {
        let json = serde_json::to_string(&BlacklistReason::OtherPeerUploaded).unwrap();
        assert_eq!(json, "\"other_peer_uploaded\"");
    }

    #[test]
    fn test_payload_expiry() {
        let now = Utc::now();
        let payload = TokenPayload {
            token_id: "t".into(),
            peer_id: "p".into(),
            catalog_id: "c".into(),
            request_id: "r".into(),
            iat: now.timestamp(),
            exp: now.timestamp() + 60,
        };
        assert!(!payload.is_expired(now));
        assert!(payload.is_expired(now + chrono::Duration::seconds(61)));
    }
}

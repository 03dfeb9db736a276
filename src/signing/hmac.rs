use crate::error::{BrokerError, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD as B64URL, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 signer shared by upload tokens and presigned object URLs
#[derive(Clone)]
pub struct HmacSigner {
    key: Vec<u8>,
}

impl std::fmt::Debug for HmacSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacSigner").finish_non_exhaustive()
    }
}

impl HmacSigner {
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self> {
        let key = secret.as_ref().to_vec();
        if key.is_empty() {
            return Err(BrokerError::Signature("HMAC secret is empty".to_string()));
        }
        if key.len() < 32 {
            tracing::warn!(
                "HMAC secret is only {} bytes; use at least 32 in production",
                key.len()
            );
        }
        Ok(Self { key })
    }

    fn mac(&self) -> Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|e| BrokerError::Signature(format!("HMAC init failed: {}", e)))
    }

    /// Raw signature bytes over `message`
    pub fn sign_bytes(&self, message: &[u8]) -> Result<Vec<u8>> {
        let mut mac = self.mac()?;
        mac.update(message);
        Ok(mac.finalize().into_bytes().to_vec())
    }

    /// Base64url (unpadded) signature, the form embedded in tokens
    pub fn sign(&self, message: &str) -> Result<String> {
        Ok(B64URL.encode(self.sign_bytes(message.as_bytes())?))
    }

    /// Hex signature, the form used in URL query strings
    pub fn sign_hex(&self, message: &str) -> Result<String> {
        Ok(hex::encode(self.sign_bytes(message.as_bytes())?))
    }

    /// Constant-time check of a base64url signature
    pub fn verify(&self, message: &str, signature: &str) -> bool {
        let Ok(expected) = B64URL.decode(signature) else {
            return false;
        };
        self.verify_bytes(message.as_bytes(), &expected)
    }

    /// Constant-time check of a hex signature
    pub fn verify_hex(&self, message: &str, signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        self.verify_bytes(message.as_bytes(), &expected)
    }

    fn verify_bytes(&self, message: &[u8], expected: &[u8]) -> bool {
        let Ok(mut mac) = self.mac() else {
            return false;
        };
        mac.update(message);
        mac.verify_slice(expected).is_ok()
    }
}

//! Capability tokens for stored-object downloads.
//!
//! A token is `body.sig` where `body` is the URL-safe base64 (no padding) of
//! the claims encoded as compact JSON `{"u":subject,"k":key,"e":expiry}` and
//! `sig` is the URL-safe base64 of HMAC-SHA256(body, secret). Verification
//! rejects any deviation: wrong shape, bad signature, past expiry, or a
//! subject that does not match the presenter. Signature comparison is
//! constant time via `Mac::verify_slice`.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use chrono::Utc;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use std::time::Duration;

use crate::error::AuthError;

type HmacSha256 = Hmac<Sha256>;

/// Default token lifetime.
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Claims carried by a capability token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapabilityClaims {
    /// Subject user.
    #[serde(rename = "u")]
    pub subject: String,

    /// Object-store key the subject may fetch.
    #[serde(rename = "k")]
    pub key: String,

    /// Expiry, seconds since the Unix epoch.
    #[serde(rename = "e")]
    pub expires: i64,
}

/// Mints and verifies capability tokens with a process-wide secret.
pub struct TokenMinter {
    secret: Vec<u8>,
    ttl: Duration,
}

impl TokenMinter {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            ttl: DEFAULT_TTL,
        }
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Mint a token authorizing `subject` to fetch `key`, expiring after the
    /// configured TTL.
    pub fn mint(&self, subject: &str, key: &str) -> String {
        let expires = Utc::now().timestamp() + self.ttl.as_secs() as i64;
        self.mint_with_expiry(subject, key, expires)
    }

    pub fn mint_with_expiry(&self, subject: &str, key: &str, expires: i64) -> String {
        let claims = CapabilityClaims {
            subject: subject.to_string(),
            key: key.to_string(),
            expires,
        };
        // CapabilityClaims has no map fields, so serialization cannot fail.
        let encoded = serde_json::to_vec(&claims).unwrap_or_default();
        let body = URL_SAFE_NO_PAD.encode(&encoded);
        let sig = URL_SAFE_NO_PAD.encode(self.sign(body.as_bytes()));
        format!("{body}.{sig}")
    }

    /// Verify a token presented by `expected_subject`.
    pub fn verify(&self, token: &str, expected_subject: &str) -> Result<CapabilityClaims, AuthError> {
        let (body, sig) = token
            .split_once('.')
            .ok_or_else(|| AuthError::InvalidToken("expected body.sig".to_string()))?;
        if body.is_empty() || sig.is_empty() || sig.contains('.') {
            return Err(AuthError::InvalidToken("expected body.sig".to_string()));
        }

        let sig_bytes = URL_SAFE_NO_PAD
            .decode(sig)
            .map_err(|e| AuthError::InvalidToken(format!("signature encoding: {e}")))?;

        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| AuthError::InvalidToken(format!("key setup: {e}")))?;
        mac.update(body.as_bytes());
        mac.verify_slice(&sig_bytes)
            .map_err(|_| AuthError::InvalidToken("signature mismatch".to_string()))?;

        let claims_bytes = URL_SAFE_NO_PAD
            .decode(body)
            .map_err(|e| AuthError::InvalidToken(format!("body encoding: {e}")))?;
        let claims: CapabilityClaims = serde_json::from_slice(&claims_bytes)
            .map_err(|e| AuthError::InvalidToken(format!("claims shape: {e}")))?;

        if claims.expires <= Utc::now().timestamp() {
            return Err(AuthError::TokenExpired);
        }
        if claims.subject != expected_subject {
            return Err(AuthError::SubjectMismatch);
        }
        Ok(claims)
    }

    /// Tokenized download URL for a stored object, as injected into tool
    /// arguments.
    pub fn download_url(&self, subject: &str, key: &str) -> String {
        let token = self.mint(subject, key);
        format!("/api/files/download/{key}?token={token}")
    }

    fn sign(&self, body: &[u8]) -> Vec<u8> {
        // new_from_slice only fails for unusable key lengths, which HMAC
        // does not have.
        let mut mac = HmacSha256::new_from_slice(&self.secret).unwrap_or_else(|_| {
            HmacSha256::new_from_slice(b"confab-fallback").expect("static key")
        });
        mac.update(body);
        mac.finalize().into_bytes().to_vec()
    }
}

//! HMAC signing for short-lived grants: locally served blob URLs and the
//! OAuth `state` round-trip.

use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use ring::hmac;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum GrantError {
    #[error("Signed URL has expired")]
    Expired,
    #[error("Signature does not match")]
    BadSignature,
}

/// Query parameters of a locally signed blob URL
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlobGrant {
    pub expires: i64,
    pub filename: String,
    pub content_type: String,
    pub signature: String,
}

#[derive(Clone)]
pub struct UrlSigner {
    key: hmac::Key,
}

impl UrlSigner {
    pub fn new(secret: &[u8]) -> Self {
        Self {
            key: hmac::Key::new(hmac::HMAC_SHA256, secret),
        }
    }

    pub fn sign(&self, payload: &str) -> String {
        let tag = hmac::sign(&self.key, payload.as_bytes());
        base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(tag.as_ref())
    }

    /// Constant-time check of `signature` against `payload`.
    pub fn verify(&self, payload: &str, signature: &str) -> bool {
        match base64::engine::general_purpose::URL_SAFE_NO_PAD.decode(signature) {
            Ok(tag) => hmac::verify(&self.key, payload.as_bytes(), &tag).is_ok(),
            Err(_) => false,
        }
    }

    pub fn sign_blob(
        &self,
        key: &str,
        filename: &str,
        content_type: &str,
        expires_at: DateTime<Utc>,
    ) -> BlobGrant {
        let expires = expires_at.timestamp();
        BlobGrant {
            expires,
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            signature: self.sign(&blob_payload(key, expires, filename, content_type)),
        }
    }

    /// Checked on every request: a grant is never cached server-side.
    pub fn verify_blob(
        &self,
        key: &str,
        grant: &BlobGrant,
        now: DateTime<Utc>,
    ) -> Result<(), GrantError> {
        let payload = blob_payload(key, grant.expires, &grant.filename, &grant.content_type);
        if !self.verify(&payload, &grant.signature) {
            return Err(GrantError::BadSignature);
        }
        if now.timestamp() >= grant.expires {
            return Err(GrantError::Expired);
        }
        Ok(())
    }

    /// Opaque `<expires>.<signature>` value for the OAuth state parameter.
    pub fn issue_state(&self, now: DateTime<Utc>, ttl: Duration) -> String {
        let expires = (now + ttl).timestamp();
        let payload = format!("oauth-state\n{expires}");
        format!("{expires}.{}", self.sign(&payload))
    }

    pub fn verify_state(&self, state: &str, now: DateTime<Utc>) -> Result<(), GrantError> {
        let (expires, signature) = state.split_once('.').ok_or(GrantError::BadSignature)?;
        let expires: i64 = expires.parse().map_err(|_| GrantError::BadSignature)?;
        if !self.verify(&format!("oauth-state\n{expires}"), signature) {
            return Err(GrantError::BadSignature);
        }
        if now.timestamp() >= expires {
            return Err(GrantError::Expired);
        }
        Ok(())
    }
}

fn blob_payload(key: &str, expires: i64, filename: &str, content_type: &str) -> String {
    format!("blob\n{key}\n{expires}\n{filename}\n{content_type}")
}

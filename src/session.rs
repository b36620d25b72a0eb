//! Browser sessions: the local `user_id` every token record is keyed by.
//!
//! The id is a UUID v4 carried in the `sid` cookie as
//! `base64url(hmac_sha256(id) || id)`, so a client cannot pick another
//! session's id.

use axum::http::{header, HeaderMap, HeaderValue};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use uuid::Uuid;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

pub const SESSION_COOKIE: &str = "sid";

const MAC_LEN: usize = 32;

fn new_hmac(key: &[u8]) -> Result<HmacSha256, AppError> {
    <HmacSha256 as Mac>::new_from_slice(key)
        .map_err(|e| AppError::Internal(format!("HMAC init failed: {e}")))
}

/// The session attached to one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    /// Set when the request carried no valid cookie and `id` was just minted.
    pub is_new: bool,
}

pub struct SessionSigner {
    key: Vec<u8>,
}

impl SessionSigner {
    pub fn new(key: impl Into<Vec<u8>>) -> Self {
        Self { key: key.into() }
    }

    pub fn sign(&self, session_id: &str) -> Result<String, AppError> {
        let mut mac = new_hmac(&self.key)?;
        mac.update(session_id.as_bytes());
        let signature = mac.finalize().into_bytes();

        let mut combined = signature.to_vec();
        combined.extend_from_slice(session_id.as_bytes());

        Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(&combined))
    }

    /// The session id inside a signed cookie value, if the signature holds.
    pub fn verify(&self, signed: &str) -> Option<String> {
        let combined = base64::engine::general_purpose::URL_SAFE_NO_PAD
            .decode(signed)
            .ok()?;
        if combined.len() <= MAC_LEN {
            return None;
        }

        let (signature, payload) = combined.split_at(MAC_LEN);
        let mut mac = new_hmac(&self.key).ok()?;
        mac.update(payload);
        mac.verify_slice(signature).ok()?;

        String::from_utf8(payload.to_vec()).ok()
    }

    /// Read the session from the request cookies, minting one when absent or forged.
    pub fn resolve(&self, headers: &HeaderMap) -> Session {
        let existing = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim().split_once('='))
            .find(|(name, _)| *name == SESSION_COOKIE)
            .and_then(|(_, value)| self.verify(value));

        match existing {
            Some(id) => Session { id, is_new: false },
            None => Session {
                id: Uuid::new_v4().to_string(),
                is_new: true,
            },
        }
    }

    /// `Set-Cookie` value for `session`.
    pub fn cookie(&self, session: &Session) -> Result<HeaderValue, AppError> {
        let value = format!(
            "{SESSION_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax",
            self.sign(&session.id)?
        );
        HeaderValue::from_str(&value)
            .map_err(|e| AppError::Internal(format!("Invalid session cookie: {e}")))
    }
}

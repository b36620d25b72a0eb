/// HubSpot request signature verification (v3).
///
/// HubSpot signs requests to app endpoints with the app's client secret.
/// Headers:
/// - `X-HubSpot-Signature-v3`: base64(HMAC-SHA256(secret, source))
/// - `X-HubSpot-Request-Timestamp`: milliseconds since the epoch
///
/// where `source = METHOD + "https://" + host + path_and_query + body + timestamp`.
use axum::http::{HeaderMap, Method};
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::AppError;

type HmacSha256 = Hmac<Sha256>;

pub const SIGNATURE_HEADER: &str = "x-hubspot-signature-v3";
pub const TIMESTAMP_HEADER: &str = "x-hubspot-request-timestamp";

/// Requests signed longer ago than this are rejected as replays.
pub const MAX_ALLOWED_TIMESTAMP_MS: i64 = 300_000;

/// The parts of an inbound request that go into the signature.
pub struct SignedRequest<'a> {
    pub method: &'a Method,
    pub host: &'a str,
    pub path_and_query: &'a str,
    pub body: &'a [u8],
}

pub fn has_signature(headers: &HeaderMap) -> bool {
    headers.contains_key(SIGNATURE_HEADER)
}

/// Verify the v3 signature headers against `request`, as of `now_ms`.
pub fn verify_v3(
    request: &SignedRequest<'_>,
    headers: &HeaderMap,
    client_secret: &str,
    now_ms: i64,
) -> Result<(), AppError> {
    let header = |name: &str| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .filter(|v| !v.is_empty())
    };

    let (Some(signature), Some(timestamp)) = (header(SIGNATURE_HEADER), header(TIMESTAMP_HEADER)) else {
        tracing::warn!("[Signature] Missing signature or timestamp header");
        return Err(AppError::InvalidSignature);
    };

    let ts: i64 = timestamp.trim().parse().map_err(|_| {
        tracing::warn!("[Signature] Unparseable timestamp {timestamp}");
        AppError::InvalidSignature
    })?;
    let age = now_ms.checked_sub(ts).ok_or_else(|| {
        tracing::warn!("[Signature] Timestamp {ts} out of range, rejecting");
        AppError::InvalidSignature
    })?;
    if age > MAX_ALLOWED_TIMESTAMP_MS {
        tracing::warn!("[Signature] Stale request ts={ts} now={now_ms}, rejecting");
        return Err(AppError::InvalidSignature);
    }

    let expected = sign_v3(request, timestamp, client_secret)?;

    if !constant_time_eq(expected.as_bytes(), signature.as_bytes()) {
        tracing::warn!(
            "[Signature] Mismatch for {} {}",
            request.method,
            request.path_and_query
        );
        return Err(AppError::InvalidSignature);
    }

    Ok(())
}

/// Compute the base64 v3 signature for `request` at `timestamp`.
pub fn sign_v3(request: &SignedRequest<'_>, timestamp: &str, client_secret: &str) -> Result<String, AppError> {
    let mut mac = HmacSha256::new_from_slice(client_secret.as_bytes())
        .map_err(|_| AppError::Internal("HMAC key error".into()))?;
    mac.update(request.method.as_str().as_bytes());
    mac.update(b"https://");
    mac.update(request.host.as_bytes());
    mac.update(request.path_and_query.as_bytes());
    mac.update(request.body);
    mac.update(timestamp.as_bytes());

    Ok(base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes()))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const SECRET: &str = "app-secret";
    const NOW: i64 = 1_760_875_200_000;

    fn request<'a>(body: &'a [u8]) -> SignedRequest<'a> {
        SignedRequest {
            method: &Method::POST,
            host: "dateshift.example.com",
            path_and_query: "/api/contacts/7/update-property",
            body,
        }
    }

    fn headers(signature: &str, timestamp: i64) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(SIGNATURE_HEADER, HeaderValue::from_str(signature).unwrap());
        h.insert(TIMESTAMP_HEADER, HeaderValue::from_str(&timestamp.to_string()).unwrap());
        h
    }

    #[test]
    fn test_valid_signature() {
        let body = br#"{"propertyName":"renewal_date","propertyValue":"2024-01-01"}"#;
        let req = request(body);
        let ts = NOW - 1_000;
        let sig = sign_v3(&req, &ts.to_string(), SECRET).unwrap();

        assert!(verify_v3(&req, &headers(&sig, ts), SECRET, NOW).is_ok());
    }

    #[test]
    fn test_body_tamper_rejected() {
        let req = request(b"{\"a\":1}");
        let sig = sign_v3(&req, &NOW.to_string(), SECRET).unwrap();

        let tampered = request(b"{\"a\":2}");
        assert!(matches!(
            verify_v3(&tampered, &headers(&sig, NOW), SECRET, NOW),
            Err(AppError::InvalidSignature)
        ));
    }

    #[test]
    fn test_wrong_secret_rejected() {
        let req = request(b"{}");
        let sig = sign_v3(&req, &NOW.to_string(), "other-secret").unwrap();
        assert!(verify_v3(&req, &headers(&sig, NOW), SECRET, NOW).is_err());
    }

    #[test]
    fn test_stale_timestamp_rejected() {
        let req = request(b"{}");
        let ts = NOW - MAX_ALLOWED_TIMESTAMP_MS - 1;
        let sig = sign_v3(&req, &ts.to_string(), SECRET).unwrap();
        assert!(verify_v3(&req, &headers(&sig, ts), SECRET, NOW).is_err());

        // Exactly at the limit is still accepted.
        let ts = NOW - MAX_ALLOWED_TIMESTAMP_MS;
        let sig = sign_v3(&req, &ts.to_string(), SECRET).unwrap();
        assert!(verify_v3(&req, &headers(&sig, ts), SECRET, NOW).is_ok());

        // A timestamp that overflows the age computation is rejected, not wrapped.
        let sig = sign_v3(&req, &i64::MIN.to_string(), SECRET).unwrap();
        assert!(matches!(
            verify_v3(&req, &headers(&sig, i64::MIN), SECRET, NOW),
            Err(AppError::InvalidSignature)
        ));
    }

    #[test]
    fn test_missing_headers_rejected() {
        let req = request(b"{}");
        assert!(verify_v3(&req, &HeaderMap::new(), SECRET, NOW).is_err());

        let mut only_sig = HeaderMap::new();
        only_sig.insert(SIGNATURE_HEADER, HeaderValue::from_static("abc"));
        assert!(has_signature(&only_sig));
        assert!(verify_v3(&req, &only_sig, SECRET, NOW).is_err());
    }
}

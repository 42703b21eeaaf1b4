//! Request fingerprinting
//!
//! Replay is positional, so fingerprints never pick an interaction. They let
//! the replayer notice when the request at the cursor is not the request the
//! client is sending now, and reject it under [`ReplayMatch::Verified`].
//!
//! [`ReplayMatch::Verified`]: crate::config::ReplayMatch::Verified

use sha2::{Digest, Sha256};

use crate::interaction::RequestSnapshot;

/// Compute SHA-256 fingerprint of a request
///
/// The fingerprint includes:
/// 1. Method (uppercase normalized)
/// 2. Path (normalized)
/// 3. Query parameters (sorted)
/// 4. Body
///
/// Headers are left out: credentials, user agents and idempotency keys
/// legitimately differ between a recording run and a replay run.
#[must_use]
pub fn fingerprint_request(request: &RequestSnapshot) -> [u8; 32] {
    let mut hasher = Sha256::new();

    // 1. Method (uppercase normalized)
    let method = request.method.to_uppercase();
    hasher.update((method.len() as u32).to_le_bytes());
    hasher.update(method.as_bytes());

    // 2. Path (normalized)
    let path = normalize_path(request.path());
    hasher.update((path.len() as u32).to_le_bytes());
    hasher.update(path.as_bytes());

    // 3. Query parameters (sorted)
    let mut query: Vec<(&str, &str)> = request
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| pair.split_once('=').unwrap_or((pair, "")))
        .collect();
    query.sort_unstable();
    hasher.update((query.len() as u32).to_le_bytes());
    for (key, value) in &query {
        hasher.update((key.len() as u32).to_le_bytes());
        hasher.update(key.as_bytes());
        hasher.update((value.len() as u32).to_le_bytes());
        hasher.update(value.as_bytes());
    }

    // 4. Body
    hasher.update((request.body.len() as u32).to_le_bytes());
    hasher.update(&request.body);

    hasher.finalize().into()
}

/// First 8 bytes of a fingerprint as hex, for logs
#[must_use]
pub fn short_hex(hash: &[u8; 32]) -> String {
    hex::encode(&hash[..8])
}

/// Normalize a URL path
fn normalize_path(path: &str) -> String {
    // Remove leading/trailing whitespace
    let trimmed = path.trim();

    // Ensure leading slash
    if trimmed.is_empty() || !trimmed.starts_with('/') {
        format!("/{trimmed}")
    } else {
        trimmed.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn test_request() -> RequestSnapshot {
        RequestSnapshot::new("GET", "/api/test")
    }

    #[test]
    fn test_fingerprint_deterministic() {
        let request = test_request();
        let hash1 = fingerprint_request(&request);
        let hash2 = fingerprint_request(&request);

        assert_eq!(hash1, hash2, "Fingerprint must be deterministic");
    }

    #[test]
    fn test_fingerprint_different_methods() {
        let req1 = test_request();
        let mut req2 = test_request();
        req2.method = "POST".to_string();

        assert_ne!(
            fingerprint_request(&req1),
            fingerprint_request(&req2),
            "Different methods should produce different hashes"
        );
    }

    #[test]
    fn test_method_case_insensitive() {
        let req1 = test_request();
        let mut req2 = test_request();
        req2.method = "get".to_string();

        assert_eq!(fingerprint_request(&req1), fingerprint_request(&req2));
    }

    #[test]
    fn test_fingerprint_different_paths() {
        let req1 = RequestSnapshot::new("GET", "/api/v1");
        let req2 = RequestSnapshot::new("GET", "/api/v2");

        assert_ne!(
            fingerprint_request(&req1),
            fingerprint_request(&req2),
            "Different paths should produce different hashes"
        );
    }

    #[test]
    fn test_query_order_independence() {
        let req1 = RequestSnapshot::new("GET", "/v1/customers?b=2&a=1");
        let req2 = RequestSnapshot::new("GET", "/v1/customers?a=1&b=2");

        assert_eq!(
            fingerprint_request(&req1),
            fingerprint_request(&req2),
            "Query parameter order should not affect fingerprint"
        );
    }

    #[test]
    fn test_headers_ignored_body_counted() {
        let mut req1 = test_request();
        req1.headers.append("Authorization", "Bearer sk_test_1");

        let mut req2 = test_request();
        req2.headers.append("Authorization", "Bearer sk_test_2");
        assert_eq!(fingerprint_request(&req1), fingerprint_request(&req2));

        req2.body = Bytes::from_static(b"amount=2000");
        assert_ne!(fingerprint_request(&req1), fingerprint_request(&req2));
    }

    #[test]
    fn test_short_hex() {
        let hash = fingerprint_request(&test_request());
        assert_eq!(short_hex(&hash).len(), 16);
    }

    #[test]
    fn test_path_normalization() {
        assert_eq!(normalize_path("/api/test"), "/api/test");
        assert_eq!(normalize_path("api/test"), "/api/test");
        assert_eq!(normalize_path("  /api/test  "), "/api/test");
        assert_eq!(normalize_path(""), "/");
    }
}

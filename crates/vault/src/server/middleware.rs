//! Axum middleware layers and request helpers.
//!
//! Includes request tracing, timeout enforcement, response compression, and
//! correlation-id extraction.

use std::time::Duration;

use axum::http::HeaderMap;
use uuid::Uuid;

/// Default per-request timeout applied to all routes.
pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Header carrying the caller's correlation id.
pub const CORRELATION_HEADER: &str = "x-correlation-id";

/// The request's correlation id, or a fresh one when the header is absent
/// or not a UUID.
pub fn correlation_id(headers: &HeaderMap) -> Uuid {
    headers
        .get(CORRELATION_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s.trim()).ok())
        .unwrap_or_else(Uuid::new_v4)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn uses_header_when_valid() {
        let id = Uuid::new_v4();
        let mut headers = HeaderMap::new();
        headers.insert(
            CORRELATION_HEADER,
            HeaderValue::from_str(&id.to_string()).unwrap(),
        );
        assert_eq!(correlation_id(&headers), id);
    }

    #[test]
    fn falls_back_to_fresh_id() {
        let mut headers = HeaderMap::new();
        headers.insert(CORRELATION_HEADER, HeaderValue::from_static("not-a-uuid"));
        let a = correlation_id(&headers);
        let b = correlation_id(&HeaderMap::new());
        assert_ne!(a, b);
        assert_eq!(a.get_version_num(), 4);
    }
}

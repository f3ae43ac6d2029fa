//! HTTP adapters for the ports defined in `idprov-core`.
//!
//! Every adapter folds transport failures into the fixed kinds
//! (`Timeout`, `ConnectionError`, `ThrottlingException`, `HTTPError`) so the
//! workflow's Retry rules can match them uniformly. Services may also answer
//! with an `{"error", "cause"}` envelope to raise a domain error kind.

pub mod activity;
pub mod callback;
pub mod status;
pub mod task_result;

use std::time::Duration;

use idprov_core::workflow::activity::{ActivityError, TransportFault};
use idprov_types::error::ErrorInfo;
use reqwest::StatusCode;

/// Build a client with a request timeout.
pub fn client(timeout: Duration) -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("idprov/", env!("CARGO_PKG_VERSION")))
        .build()
}

/// Classify a failed send (no response received).
pub fn send_fault(err: &reqwest::Error) -> TransportFault {
    if err.is_timeout() {
        TransportFault::Timeout
    } else {
        TransportFault::Connection
    }
}

/// Classify an unexpected response status.
pub fn status_fault(status: StatusCode) -> TransportFault {
    match status {
        StatusCode::TOO_MANY_REQUESTS => TransportFault::Throttled,
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => TransportFault::Timeout,
        other => TransportFault::Http(other.as_u16()),
    }
}

/// Map a non-success response onto an activity error.
///
/// An `{"error", "cause"}` body wins; otherwise the status decides the kind.
pub fn response_error(status: StatusCode, body: &str) -> ActivityError {
    if let Ok(info) = serde_json::from_str::<ErrorInfo>(body) {
        if !info.error.is_empty() {
            return ActivityError::new(info.error, info.cause);
        }
    }
    status_fault(status).into_error(format!("HTTP {status}: {}", truncate(body, 512)))
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use idprov_types::error::kinds;

    #[test]
    fn envelope_overrides_status() {
        let err = response_error(
            StatusCode::BAD_GATEWAY,
            r#"{"error":"ADGroupNotFoundError","cause":"group GRP-analyst missing"}"#,
        );
        assert_eq!(err.kind, "ADGroupNotFoundError");
        assert_eq!(err.cause, "group GRP-analyst missing");
    }

    #[test]
    fn status_maps_to_transport_kinds() {
        assert_eq!(response_error(StatusCode::TOO_MANY_REQUESTS, "").kind, kinds::THROTTLING);
        assert_eq!(response_error(StatusCode::GATEWAY_TIMEOUT, "").kind, kinds::TIMEOUT);
        let err = response_error(StatusCode::INTERNAL_SERVER_ERROR, "boom");
        assert_eq!(err.kind, kinds::HTTP_ERROR);
        assert!(err.cause.contains("500"));
    }
}

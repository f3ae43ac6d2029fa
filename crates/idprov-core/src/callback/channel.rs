//! Callback channel port and an in-memory recording implementation.

use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use idprov_types::error::kinds;

use super::token::CallbackToken;
use crate::workflow::activity::{ActivityError, TransportFault};

/// Which terminal signal a notification carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationKind {
    Success,
    Failure,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::Success => "success",
            NotificationKind::Failure => "failure",
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    /// The token already produced a notification.
    #[error("callback token already used")]
    TokenConsumed,

    /// The channel no longer accepts the token.
    #[error("callback token expired or invalid")]
    TokenExpired,

    #[error("{}: {cause}", .fault.kind())]
    Transport { fault: TransportFault, cause: String },

    /// A send went out but was never confirmed; it may have been delivered.
    #[error("callback delivery unknown: {0}")]
    DeliveryUnknown(String),

    #[error("callback ledger error: {0}")]
    Ledger(String),

    #[error("invalid callback request: {0}")]
    InvalidRequest(String),
}

impl From<CallbackError> for ActivityError {
    fn from(err: CallbackError) -> Self {
        match err {
            CallbackError::TokenConsumed => {
                ActivityError::new(kinds::CALLBACK_TOKEN_CONSUMED, "callback token already used")
            }
            CallbackError::TokenExpired => {
                ActivityError::new(kinds::CALLBACK_TOKEN_EXPIRED, "callback token expired or invalid")
            }
            CallbackError::Transport { fault, cause } => fault.into_error(cause),
            CallbackError::DeliveryUnknown(cause) => {
                ActivityError::new(kinds::CALLBACK_DELIVERY_UNKNOWN, cause)
            }
            CallbackError::Ledger(cause) => ActivityError::new(kinds::TASK_FAILED, cause),
            CallbackError::InvalidRequest(cause) => ActivityError::non_retriable(cause),
        }
    }
}

/// Boxed future returned by `CallbackChannel` methods.
pub type CallbackFuture<'a> = Pin<Box<dyn Future<Output = Result<(), CallbackError>> + Send + 'a>>;

/// Transport for success/failure signals.
///
/// The channel itself does not guarantee idempotency; `CallbackGateway`
/// guards it with the ledger.
pub trait CallbackChannel: Send + Sync {
    fn send_success<'a>(&'a self, token: &'a CallbackToken, output: &'a str) -> CallbackFuture<'a>;

    fn send_failure<'a>(
        &'a self,
        token: &'a CallbackToken,
        error: &'a str,
        cause: &'a str,
    ) -> CallbackFuture<'a>;
}

// ---------------------------------------------------------------------------
// Recording channel
// ---------------------------------------------------------------------------

/// A notification captured by `RecordingCallbackChannel`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentNotification {
    pub token_digest: String,
    pub kind: NotificationKind,
    /// Output text for success, `error: cause` for failure.
    pub body: String,
}

/// Channel that records every notification instead of sending it.
///
/// Used by dry runs and tests. `fail_next` makes the following sends fail
/// with a connection fault before anything is recorded. `lose_next_responses`
/// records the following sends and then reports a timeout.
#[derive(Debug, Default)]
pub struct RecordingCallbackChannel {
    sent: Mutex<Vec<SentNotification>>,
    failures: Mutex<u32>,
    lost_responses: Mutex<u32>,
}

impl RecordingCallbackChannel {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, count: u32) {
        *self.failures.lock().unwrap_or_else(|p| p.into_inner()) = count;
    }

    pub fn lose_next_responses(&self, count: u32) {
        *self.lost_responses.lock().unwrap_or_else(|p| p.into_inner()) = count;
    }

    pub fn sent(&self) -> Vec<SentNotification> {
        self.sent.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    fn record(&self, token: &CallbackToken, kind: NotificationKind, body: String) -> Result<(), CallbackError> {
        {
            let mut failures = self.failures.lock().unwrap_or_else(|p| p.into_inner());
            if *failures > 0 {
                *failures -= 1;
                return Err(CallbackError::Transport {
                    fault: TransportFault::Connection,
                    cause: "connection reset by peer".to_string(),
                });
            }
        }
        self.sent
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(SentNotification {
                token_digest: token.digest().to_string(),
                kind,
                body,
            });

        let mut lost = self.lost_responses.lock().unwrap_or_else(|p| p.into_inner());
        if *lost > 0 {
            *lost -= 1;
            return Err(CallbackError::Transport {
                fault: TransportFault::Timeout,
                cause: "response timed out".to_string(),
            });
        }
        Ok(())
    }
}

impl CallbackChannel for RecordingCallbackChannel {
    fn send_success<'a>(&'a self, token: &'a CallbackToken, output: &'a str) -> CallbackFuture<'a> {
        Box::pin(async move { self.record(token, NotificationKind::Success, output.to_string()) })
    }

    fn send_failure<'a>(
        &'a self,
        token: &'a CallbackToken,
        error: &'a str,
        cause: &'a str,
    ) -> CallbackFuture<'a> {
        Box::pin(async move { self.record(token, NotificationKind::Failure, format!("{error}: {cause}")) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn callback_errors_map_to_fixed_kinds() {
        let consumed: ActivityError = CallbackError::TokenConsumed.into();
        assert_eq!(consumed.kind, kinds::CALLBACK_TOKEN_CONSUMED);

        let transport: ActivityError = CallbackError::Transport {
            fault: TransportFault::Throttled,
            cause: "rate exceeded".into(),
        }
        .into();
        assert_eq!(transport.kind, kinds::THROTTLING);
        assert_eq!(transport.cause, "rate exceeded");

        let unknown: ActivityError = CallbackError::DeliveryUnknown("Timeout: no response".into()).into();
        assert_eq!(unknown.kind, kinds::CALLBACK_DELIVERY_UNKNOWN);
        assert_eq!(unknown.cause, "Timeout: no response");
    }

    #[tokio::test]
    async fn recording_channel_fails_then_records() {
        let channel = RecordingCallbackChannel::new();
        let token = CallbackToken::new("tok1").unwrap();
        channel.fail_next(1);
        assert!(matches!(
            channel.send_success(&token, "done").await,
            Err(CallbackError::Transport { .. })
        ));
        channel.send_failure(&token, "HTTPError", "502").await.unwrap();
        let sent = channel.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Failure);
        assert_eq!(sent[0].body, "HTTPError: 502");
    }
}

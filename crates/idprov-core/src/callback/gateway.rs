//! Callback gateway: ledger-guarded one-shot notifications.

use std::sync::Arc;

use serde_json::{json, Value};
use uuid::Uuid;

use super::channel::{CallbackChannel, CallbackError, NotificationKind};
use super::token::CallbackToken;
use crate::repository::ledger::{CallbackLedger, TokenClaim};
use crate::workflow::activity::{Activity, ActivityError, ActivityFuture, ActivityRequest};

/// Sends success/failure signals, at most one per token.
pub struct CallbackGateway<L: CallbackLedger> {
    ledger: L,
    channel: Arc<dyn CallbackChannel>,
}

impl<L: CallbackLedger> CallbackGateway<L> {
    pub fn new(ledger: L, channel: Arc<dyn CallbackChannel>) -> Self {
        Self { ledger, channel }
    }

    pub async fn notify_success(
        &self,
        execution_id: Uuid,
        token: &CallbackToken,
        output: &str,
    ) -> Result<(), CallbackError> {
        self.claim(execution_id, token, NotificationKind::Success).await?;
        let sent = self.channel.send_success(token, output).await;
        self.settle(execution_id, token, NotificationKind::Success, sent).await
    }

    pub async fn notify_failure(
        &self,
        execution_id: Uuid,
        token: &CallbackToken,
        error: &str,
        cause: &str,
    ) -> Result<(), CallbackError> {
        self.claim(execution_id, token, NotificationKind::Failure).await?;
        let sent = self.channel.send_failure(token, error, cause).await;
        self.settle(execution_id, token, NotificationKind::Failure, sent).await
    }

    /// Claim the token and record the attempt. Returns once the channel may
    /// be called exactly once.
    async fn claim(
        &self,
        execution_id: Uuid,
        token: &CallbackToken,
        kind: NotificationKind,
    ) -> Result<(), CallbackError> {
        let claim = self
            .ledger
            .claim(token.digest(), &execution_id, kind.as_str())
            .await
            .map_err(|e| CallbackError::Ledger(e.to_string()))?;

        match claim {
            TokenClaim::Acquired => {}
            TokenClaim::Reclaimed => {
                tracing::info!(
                    execution_id = %execution_id,
                    token = token.fingerprint(),
                    "resuming callback notification that was claimed but never sent"
                );
            }
            TokenClaim::Attempted => {
                tracing::warn!(
                    execution_id = %execution_id,
                    token = token.fingerprint(),
                    "earlier callback send was never confirmed; not sending again"
                );
                return Err(CallbackError::DeliveryUnknown(
                    "an earlier send with this token was never confirmed".to_string(),
                ));
            }
            TokenClaim::AlreadySent | TokenClaim::OutcomeConflict | TokenClaim::ClaimedElsewhere => {
                tracing::warn!(
                    execution_id = %execution_id,
                    token = token.fingerprint(),
                    claim = ?claim,
                    "callback token already used; notification suppressed"
                );
                return Err(CallbackError::TokenConsumed);
            }
        }

        self.ledger
            .mark_attempted(token.digest())
            .await
            .map_err(|e| CallbackError::Ledger(e.to_string()))
    }

    /// Record the channel's answer. A transport failure after the attempt
    /// leaves delivery unknown and is terminal.
    async fn settle(
        &self,
        execution_id: Uuid,
        token: &CallbackToken,
        kind: NotificationKind,
        sent: Result<(), CallbackError>,
    ) -> Result<(), CallbackError> {
        match sent {
            Ok(()) => {}
            Err(CallbackError::Transport { fault, cause }) => {
                tracing::warn!(
                    execution_id = %execution_id,
                    token = token.fingerprint(),
                    fault = fault.kind(),
                    cause = %cause,
                    "callback send failed after it went out; delivery unknown"
                );
                return Err(CallbackError::DeliveryUnknown(format!("{}: {cause}", fault.kind())));
            }
            Err(e) => return Err(e),
        }

        if let Err(e) = self.ledger.mark_sent(token.digest()).await {
            // Delivered; the attempt mark alone still blocks any resend.
            tracing::warn!(
                execution_id = %execution_id,
                token = token.fingerprint(),
                error = %e,
                "failed to confirm callback delivery in the ledger"
            );
        }
        tracing::info!(
            execution_id = %execution_id,
            token = token.fingerprint(),
            outcome = kind.as_str(),
            "callback notification sent"
        );
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Activity adapters
// ---------------------------------------------------------------------------

/// Exposes one side of the gateway as a workflow activity.
///
/// Success payload: `{task_token, output}`. Failure payload:
/// `{task_token, error, cause}`.
pub struct CallbackActivity<L: CallbackLedger> {
    gateway: Arc<CallbackGateway<L>>,
    kind: NotificationKind,
}

impl<L: CallbackLedger + 'static> CallbackActivity<L> {
    pub fn success(gateway: Arc<CallbackGateway<L>>) -> Arc<dyn Activity> {
        Arc::new(Self {
            gateway,
            kind: NotificationKind::Success,
        })
    }

    pub fn failure(gateway: Arc<CallbackGateway<L>>) -> Arc<dyn Activity> {
        Arc::new(Self {
            gateway,
            kind: NotificationKind::Failure,
        })
    }

    async fn send(&self, request: ActivityRequest) -> Result<Value, ActivityError> {
        let payload = &request.payload;
        let token = payload
            .get("task_token")
            .and_then(Value::as_str)
            .and_then(CallbackToken::new)
            .ok_or_else(|| ActivityError::non_retriable("callback request has no task_token"))?;

        match self.kind {
            NotificationKind::Success => {
                let output = text_field(payload, "output")?;
                self.gateway
                    .notify_success(request.execution_id, &token, output)
                    .await?;
            }
            NotificationKind::Failure => {
                let error = text_field(payload, "error")?;
                let cause = text_field(payload, "cause")?;
                self.gateway
                    .notify_failure(request.execution_id, &token, error, cause)
                    .await?;
            }
        }
        Ok(json!({ "notified": self.kind.as_str() }))
    }
}

impl<L: CallbackLedger + 'static> Activity for CallbackActivity<L> {
    fn invoke(&self, request: ActivityRequest) -> ActivityFuture<'_> {
        Box::pin(self.send(request))
    }
}

fn text_field<'a>(payload: &'a Value, key: &str) -> Result<&'a str, ActivityError> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ActivityError::from(CallbackError::InvalidRequest(format!("'{key}' must be a string"))))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callback::channel::RecordingCallbackChannel;
    use crate::repository::memory::InMemoryCallbackLedger;
    use idprov_types::error::kinds;

    fn gateway() -> (CallbackGateway<InMemoryCallbackLedger>, Arc<RecordingCallbackChannel>) {
        let channel = Arc::new(RecordingCallbackChannel::new());
        (
            CallbackGateway::new(InMemoryCallbackLedger::new(), channel.clone()),
            channel,
        )
    }

    #[tokio::test]
    async fn second_notification_for_token_is_refused() {
        let (gateway, channel) = gateway();
        let token = CallbackToken::new("tok1").unwrap();
        let id = Uuid::now_v7();

        gateway.notify_success(id, &token, "done").await.unwrap();
        assert!(matches!(
            gateway.notify_failure(id, &token, "HTTPError", "late").await,
            Err(CallbackError::TokenConsumed)
        ));
        assert!(matches!(
            gateway.notify_success(Uuid::now_v7(), &token, "other").await,
            Err(CallbackError::TokenConsumed)
        ));
        assert_eq!(channel.sent().len(), 1);
    }

    #[tokio::test]
    async fn lost_response_is_never_resent() {
        let (gateway, channel) = gateway();
        let token = CallbackToken::new("tok1").unwrap();
        let id = Uuid::now_v7();

        channel.lose_next_responses(3);
        for _ in 0..3 {
            assert!(matches!(
                gateway.notify_success(id, &token, "done").await,
                Err(CallbackError::DeliveryUnknown(_))
            ));
        }
        assert!(matches!(
            gateway.notify_failure(id, &token, "HTTPError", "late").await,
            Err(CallbackError::TokenConsumed)
        ));
        assert_eq!(channel.sent().len(), 1);
    }

    #[tokio::test]
    async fn failed_send_is_terminal_for_the_token() {
        let (gateway, channel) = gateway();
        let token = CallbackToken::new("tok1").unwrap();
        let id = Uuid::now_v7();

        channel.fail_next(1);
        assert!(matches!(
            gateway.notify_success(id, &token, "done").await,
            Err(CallbackError::DeliveryUnknown(_))
        ));
        assert!(matches!(
            gateway.notify_success(id, &token, "done").await,
            Err(CallbackError::DeliveryUnknown(_))
        ));
        assert!(matches!(
            gateway.notify_success(Uuid::now_v7(), &token, "done").await,
            Err(CallbackError::TokenConsumed)
        ));
        assert!(channel.sent().is_empty());
    }

    #[tokio::test]
    async fn claim_without_attempt_can_resume_same_outcome_only() {
        let ledger = InMemoryCallbackLedger::new();
        let token = CallbackToken::new("tok1").unwrap();
        let id = Uuid::now_v7();
        // A crash between claiming and calling the channel.
        ledger.claim(token.digest(), &id, "success").await.unwrap();

        let channel = Arc::new(RecordingCallbackChannel::new());
        let gateway = CallbackGateway::new(ledger, channel.clone());
        assert!(matches!(
            gateway.notify_failure(id, &token, "E", "C").await,
            Err(CallbackError::TokenConsumed)
        ));
        gateway.notify_success(id, &token, "done").await.unwrap();
        assert_eq!(channel.sent().len(), 1);
        assert_eq!(channel.sent()[0].kind, NotificationKind::Success);
    }

    #[tokio::test]
    async fn delivery_unknown_maps_to_fatal_kind() {
        let (gateway, channel) = gateway();
        channel.lose_next_responses(1);
        let activity = CallbackActivity::success(Arc::new(gateway));
        let err = activity
            .invoke(ActivityRequest {
                execution_id: Uuid::now_v7(),
                state: "Send task success".into(),
                attempt: 1,
                idempotency_key: "k".into(),
                payload: json!({ "task_token": "tok1", "output": "x" }),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, kinds::CALLBACK_DELIVERY_UNKNOWN);
        assert!(kinds::is_fatal(&err.kind));
    }

    #[tokio::test]
    async fn activity_reads_payload_and_maps_reuse_to_fatal_kind() {
        let (gateway, channel) = gateway();
        let gateway = Arc::new(gateway);
        let activity = CallbackActivity::success(gateway.clone());
        let request = ActivityRequest {
            execution_id: Uuid::now_v7(),
            state: "Send task success".into(),
            attempt: 1,
            idempotency_key: "k".into(),
            payload: json!({ "task_token": "tok1", "output": "Successfully executed" }),
        };

        let out = activity.invoke(request.clone()).await.unwrap();
        assert_eq!(out, json!({ "notified": "success" }));
        assert_eq!(channel.sent()[0].body, "Successfully executed");

        let failure = CallbackActivity::failure(gateway);
        let mut again = request;
        again.payload = json!({ "task_token": "tok1", "error": "E", "cause": "C" });
        again.execution_id = Uuid::now_v7();
        let err = failure.invoke(again).await.unwrap_err();
        assert_eq!(err.kind, kinds::CALLBACK_TOKEN_CONSUMED);
    }

    #[tokio::test]
    async fn activity_without_token_is_non_retriable() {
        let (gateway, _) = gateway();
        let activity = CallbackActivity::success(Arc::new(gateway));
        let err = activity
            .invoke(ActivityRequest {
                execution_id: Uuid::now_v7(),
                state: "Send task success".into(),
                attempt: 1,
                idempotency_key: "k".into(),
                payload: json!({ "output": "x" }),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind, kinds::NON_RETRIABLE);
    }
}

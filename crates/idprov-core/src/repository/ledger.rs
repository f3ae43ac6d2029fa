//! Callback token ledger.
//!
//! Records which execution has claimed a callback token, whether a send was
//! attempted and whether it was confirmed, so one token produces at most one
//! channel call even across restarts. Tokens are stored only as SHA-256
//! digests.

use idprov_types::error::RepositoryError;
use uuid::Uuid;

/// Result of trying to claim a token for a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenClaim {
    /// First claim; the caller may send.
    Acquired,
    /// This execution claimed it for the same outcome but never attempted a
    /// send (it crashed in between); the caller may send.
    Reclaimed,
    /// A send was attempted and never confirmed. The notification may have
    /// been delivered, so it must not be sent again.
    Attempted,
    /// A notification was already delivered with this token.
    AlreadySent,
    /// This execution claimed it for the other outcome.
    OutcomeConflict,
    /// Another execution holds the claim.
    ClaimedElsewhere,
}

impl TokenClaim {
    pub fn may_send(&self) -> bool {
        matches!(self, TokenClaim::Acquired | TokenClaim::Reclaimed)
    }

    /// Decide the claim for an existing row.
    pub fn for_existing(
        owner: &Uuid,
        stored_outcome: &str,
        attempted: bool,
        sent: bool,
        execution_id: &Uuid,
        outcome: &str,
    ) -> Self {
        if sent {
            TokenClaim::AlreadySent
        } else if owner != execution_id {
            TokenClaim::ClaimedElsewhere
        } else if stored_outcome != outcome {
            TokenClaim::OutcomeConflict
        } else if attempted {
            TokenClaim::Attempted
        } else {
            TokenClaim::Reclaimed
        }
    }
}

/// Storage for callback token claims.
pub trait CallbackLedger: Send + Sync {
    /// Claim `digest` for `execution_id`. `outcome` is "success" or "failure".
    fn claim(
        &self,
        digest: &str,
        execution_id: &Uuid,
        outcome: &str,
    ) -> impl std::future::Future<Output = Result<TokenClaim, RepositoryError>> + Send;

    /// Record that a send for `digest` is about to go out. Must be durable
    /// before the channel is called.
    fn mark_attempted(
        &self,
        digest: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    /// Record that the notification for `digest` was delivered.
    fn mark_sent(
        &self,
        digest: &str,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn existing_claims() {
        let a = Uuid::now_v7();
        let b = Uuid::now_v7();
        let claim = |owner: &Uuid, stored: &str, attempted: bool, sent: bool, outcome: &str| {
            TokenClaim::for_existing(owner, stored, attempted, sent, &a, outcome)
        };

        assert_eq!(claim(&a, "success", false, false, "success"), TokenClaim::Reclaimed);
        assert_eq!(claim(&a, "success", true, false, "success"), TokenClaim::Attempted);
        assert_eq!(claim(&a, "success", false, false, "failure"), TokenClaim::OutcomeConflict);
        assert_eq!(claim(&b, "success", false, false, "success"), TokenClaim::ClaimedElsewhere);
        assert_eq!(claim(&a, "success", true, true, "success"), TokenClaim::AlreadySent);
        assert!(!TokenClaim::Attempted.may_send());
        assert!(!TokenClaim::OutcomeConflict.may_send());
    }
}

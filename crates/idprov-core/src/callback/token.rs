//! One-shot callback token.

use secrecy::{ExposeSecret, SecretString};
use sha2::{Digest, Sha256};

/// Opaque credential supplied by the trigger event.
///
/// The raw value is only exposed to the callback channel; logs and the
/// ledger see the SHA-256 digest.
#[derive(Clone)]
pub struct CallbackToken {
    secret: SecretString,
    digest: String,
}

impl CallbackToken {
    /// Wrap a raw token. Blank tokens are rejected.
    pub fn new(raw: impl Into<String>) -> Option<Self> {
        let raw: String = raw.into();
        if raw.trim().is_empty() {
            return None;
        }
        let digest = format!("{:x}", Sha256::digest(raw.as_bytes()));
        Some(Self {
            secret: SecretString::from(raw),
            digest,
        })
    }

    /// Hex SHA-256 of the raw token.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Short digest prefix for log fields.
    pub fn fingerprint(&self) -> &str {
        &self.digest[..12]
    }

    pub fn expose(&self) -> &str {
        self.secret.expose_secret()
    }
}

impl std::fmt::Debug for CallbackToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackToken")
            .field("fingerprint", &self.fingerprint())
            .finish()
    }
}

impl PartialEq for CallbackToken {
    fn eq(&self, other: &Self) -> bool {
        self.digest == other.digest
    }
}

impl Eq for CallbackToken {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_and_debug_hides_token() {
        let a = CallbackToken::new("tok1").unwrap();
        let b = CallbackToken::new("tok1").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.digest().len(), 64);
        assert_eq!(a.expose(), "tok1");
        assert!(!format!("{a:?}").contains("tok1"));
        assert_ne!(a, CallbackToken::new("tok2").unwrap());
    }

    #[test]
    fn blank_token_rejected() {
        assert!(CallbackToken::new("").is_none());
        assert!(CallbackToken::new("   ").is_none());
    }
}

//! Activities: the named side-effecting operations Task states invoke.
//!
//! Each activity receives a JSON request and returns a JSON response or an
//! `ActivityError` carrying an error kind. Transport failures are folded
//! into the fixed kinds `Timeout`, `ConnectionError`, `ThrottlingException`
//! and `HTTPError` so Retry rules can match them uniformly.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use idprov_types::error::{kinds, ErrorInfo};
use serde_json::Value;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Request / error types
// ---------------------------------------------------------------------------

/// One invocation of an activity.
#[derive(Debug, Clone, PartialEq)]
pub struct ActivityRequest {
    pub execution_id: Uuid,
    pub state: String,
    /// 1-based invocation count for the current state entry.
    pub attempt: u32,
    /// Stable across process restarts for the same execution, state and attempt.
    pub idempotency_key: String,
    pub payload: Value,
}

/// An activity failure, classified by kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {cause}")]
pub struct ActivityError {
    pub kind: String,
    pub cause: String,
}

impl ActivityError {
    pub fn new(kind: impl Into<String>, cause: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            cause: cause.into(),
        }
    }

    pub fn non_retriable(cause: impl Into<String>) -> Self {
        Self::new(kinds::NON_RETRIABLE, cause)
    }

    pub fn into_error_info(self) -> ErrorInfo {
        ErrorInfo::new(self.kind, self.cause)
    }
}

/// Transport-level failure, mapped onto the fixed kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportFault {
    Timeout,
    Connection,
    Throttled,
    /// Unexpected HTTP status.
    Http(u16),
}

impl TransportFault {
    pub fn kind(&self) -> &'static str {
        match self {
            TransportFault::Timeout => kinds::TIMEOUT,
            TransportFault::Connection => kinds::CONNECTION_ERROR,
            TransportFault::Throttled => kinds::THROTTLING,
            TransportFault::Http(_) => kinds::HTTP_ERROR,
        }
    }

    pub fn into_error(self, cause: impl Into<String>) -> ActivityError {
        ActivityError::new(self.kind(), cause)
    }
}

// ---------------------------------------------------------------------------
// Activity trait
// ---------------------------------------------------------------------------

/// Boxed future returned by `Activity::invoke`.
pub type ActivityFuture<'a> = Pin<Box<dyn Future<Output = Result<Value, ActivityError>> + Send + 'a>>;

/// A registered side-effecting operation.
///
/// Stored as `Arc<dyn Activity>` in the registry, so `invoke` returns a
/// boxed future rather than using RPITIT.
pub trait Activity: Send + Sync {
    fn invoke(&self, request: ActivityRequest) -> ActivityFuture<'_>;
}

/// Adapts an async closure into an `Activity`.
pub struct FnActivity<F> {
    func: F,
}

impl<F, Fut> Activity for FnActivity<F>
where
    F: Fn(ActivityRequest) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value, ActivityError>> + Send + 'static,
{
    fn invoke(&self, request: ActivityRequest) -> ActivityFuture<'_> {
        Box::pin((self.func)(request))
    }
}

/// Wrap an async closure as an activity.
pub fn from_fn<F, Fut>(func: F) -> Arc<dyn Activity>
where
    F: Fn(ActivityRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ActivityError>> + Send + 'static,
{
    Arc::new(FnActivity { func })
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Activities by name. Built at startup; read-only afterwards.
#[derive(Clone, Default)]
pub struct ActivityRegistry {
    activities: HashMap<String, Arc<dyn Activity>>,
}

impl ActivityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, activity: Arc<dyn Activity>) {
        self.activities.insert(name.into(), activity);
    }

    /// Builder-style `register`.
    pub fn with(mut self, name: impl Into<String>, activity: Arc<dyn Activity>) -> Self {
        self.register(name, activity);
        self
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Activity>> {
        self.activities.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.activities.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.activities.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl std::fmt::Debug for ActivityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActivityRegistry")
            .field("activities", &self.names())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Gateway
// ---------------------------------------------------------------------------

/// Invokes registered activities with a per-invocation timeout.
#[derive(Debug, Clone)]
pub struct ActivityGateway {
    registry: ActivityRegistry,
    default_timeout: Duration,
}

impl ActivityGateway {
    pub fn new(registry: ActivityRegistry, default_timeout: Duration) -> Self {
        Self {
            registry,
            default_timeout,
        }
    }

    pub fn registry(&self) -> &ActivityRegistry {
        &self.registry
    }

    /// Invoke `name`. An elapsed timeout surfaces as kind `Timeout`.
    pub async fn invoke(
        &self,
        name: &str,
        request: ActivityRequest,
        timeout: Option<Duration>,
    ) -> Result<Value, ActivityError> {
        let Some(activity) = self.registry.get(name) else {
            return Err(ActivityError::new(
                kinds::ACTIVITY_NOT_REGISTERED,
                format!("activity '{name}' is not registered"),
            ));
        };
        let limit = timeout.unwrap_or(self.default_timeout);

        tracing::debug!(
            activity = name,
            execution_id = %request.execution_id,
            attempt = request.attempt,
            "invoking activity"
        );

        match tokio::time::timeout(limit, activity.invoke(request)).await {
            Ok(result) => result,
            Err(_) => Err(TransportFault::Timeout.into_error(format!(
                "activity '{name}' did not respond within {}s",
                limit.as_secs()
            ))),
        }
    }
}

//! File-backed parameter store for the `get_parameter` activity.
//!
//! The file is a JSON object keyed by parameter name. Values are returned as
//! JSON text, the way a hosted parameter store hands them out; string values
//! are passed through unchanged.

use std::path::PathBuf;
use std::sync::Arc;

use idprov_core::workflow::activity::{Activity, ActivityError, ActivityFuture, ActivityRequest};
use serde_json::{json, Value};

/// Kind raised when the requested parameter does not exist.
pub const PARAMETER_NOT_FOUND: &str = "ParameterNotFound";

pub struct FileParameterStore {
    path: PathBuf,
}

impl FileParameterStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn activity(path: impl Into<PathBuf>) -> Arc<dyn Activity> {
        Arc::new(Self::new(path))
    }

    /// Read one parameter as text.
    pub async fn get(&self, name: &str) -> Result<String, ActivityError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            ActivityError::non_retriable(format!(
                "failed to read parameter file {}: {e}",
                self.path.display()
            ))
        })?;
        let params: serde_json::Map<String, Value> = serde_json::from_str(&content).map_err(|e| {
            ActivityError::non_retriable(format!(
                "parameter file {} is not a JSON object: {e}",
                self.path.display()
            ))
        })?;

        match params.get(name) {
            Some(Value::String(text)) => Ok(text.clone()),
            Some(other) => Ok(other.to_string()),
            None => Err(ActivityError::new(
                PARAMETER_NOT_FOUND,
                format!("parameter '{name}' not found"),
            )),
        }
    }

    async fn fetch(&self, request: ActivityRequest) -> Result<Value, ActivityError> {
        let name = request
            .payload
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| ActivityError::non_retriable("get_parameter request has no name"))?;
        let value = self.get(name).await?;
        tracing::debug!(execution_id = %request.execution_id, parameter = name, "parameter read");
        Ok(json!({ "parameter": { "name": name, "value": value } }))
    }
}

impl Activity for FileParameterStore {
    fn invoke(&self, request: ActivityRequest) -> ActivityFuture<'_> {
        Box::pin(self.fetch(request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn request(name: &str) -> ActivityRequest {
        ActivityRequest {
            execution_id: Uuid::now_v7(),
            state: "Get base configs".into(),
            attempt: 1,
            idempotency_key: "k".into(),
            payload: json!({ "name": name }),
        }
    }

    #[tokio::test]
    async fn returns_values_as_json_text() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("parameters.json");
        tokio::fs::write(
            &path,
            r#"{
                "/CNS/identitystatemachine/base_configs": { "sso_state_enabled": "true" },
                "/CNS/plain": "text"
            }"#,
        )
        .await
        .unwrap();

        let store = FileParameterStore::new(&path);
        let out = store
            .invoke(request("/CNS/identitystatemachine/base_configs"))
            .await
            .unwrap();
        let text = out["parameter"]["value"].as_str().unwrap();
        let parsed: Value = serde_json::from_str(text).unwrap();
        assert_eq!(parsed["sso_state_enabled"], "true");

        assert_eq!(store.get("/CNS/plain").await.unwrap(), "text");
        let err = store.get("/CNS/missing").await.unwrap_err();
        assert_eq!(err.kind, PARAMETER_NOT_FOUND);
    }

    #[tokio::test]
    async fn missing_file_is_non_retriable() {
        let store = FileParameterStore::new("/nonexistent/parameters.json");
        let err = store.invoke(request("x")).await.unwrap_err();
        assert_eq!(err.kind, idprov_types::error::kinds::NON_RETRIABLE);
    }
}

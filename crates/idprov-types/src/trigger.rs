//! Trigger event and the closed tag sets of the provisioning domain.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Lifecycle event type carried in `detail-type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DetailType {
    #[serde(rename = "resource_creation_update")]
    ResourceCreationUpdate,
    #[serde(rename = "resource_deletion")]
    ResourceDeletion,
}

impl DetailType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetailType::ResourceCreationUpdate => "resource_creation_update",
            DetailType::ResourceDeletion => "resource_deletion",
        }
    }
}

/// Deployment module tag. Only `identity_access` is eligible for callbacks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentModule {
    IdentityAccess,
    IdentityCustom,
}

impl DeploymentModule {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentModule::IdentityAccess => "identity_access",
            DeploymentModule::IdentityCustom => "identity_custom",
        }
    }
}

/// Value written to the deployment-status sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentStatus {
    Running,
    Success,
    Failure,
}

/// Operation tag sent to AD group and assignment activities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    Create,
    Retrieve,
    Delete,
    Assign,
}

/// Workspace/deployment payload of a trigger event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventDetail {
    pub deployment_module: DeploymentModule,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_task_token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_workspace_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_account_id: Option<String>,
    /// Remaining identifiers, passed through to activities untouched.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Inbound lifecycle event that starts one execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerEvent {
    #[serde(rename = "detail-type")]
    pub detail_type: DetailType,
    pub detail: EventDetail,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TriggerEvent {
    /// Whether the event carries a non-empty callback token.
    pub fn has_callback_token(&self) -> bool {
        self.detail
            .callback_task_token
            .as_deref()
            .is_some_and(|t| !t.trim().is_empty())
    }

    /// The initial execution document.
    pub fn to_document(&self) -> Result<Value, serde_json::Error> {
        serde_json::to_value(self)
    }
}

//! Production activity registry.
//!
//! Wires every provisioning activity to its configured adapter: plain HTTP
//! activities, the HTTP status sink, the task-result pollers, the parameter
//! store and the ledger-guarded callback gateway.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use idprov_core::callback::gateway::{CallbackActivity, CallbackGateway};
use idprov_core::identity::activities;
use idprov_core::identity::status::DeploymentStatusActivity;
use idprov_core::identity::task_result::TaskResultActivity;
use idprov_core::repository::ledger::CallbackLedger;
use idprov_core::workflow::activity::ActivityRegistry;
use idprov_types::config::{ActivityEndpoint, GlobalConfig};

use crate::config::resolve_path;
use crate::http::activity::HttpActivity;
use crate::http::callback::HttpCallbackChannel;
use crate::http::status::HttpStatusSink;
use crate::http::task_result::HttpTaskResultSource;
use crate::parameter::FileParameterStore;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("no endpoint configured for activity '{0}' (add [activities.{0}] to config.toml)")]
    MissingEndpoint(String),

    #[error("no callback endpoint configured (set [callback] endpoint in config.toml)")]
    MissingCallbackEndpoint,

    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Endpoint and effective timeout for `name`.
fn endpoint_for<'a>(
    config: &'a GlobalConfig,
    name: &str,
) -> Result<(&'a ActivityEndpoint, Duration), RegistryError> {
    let endpoint = config
        .activities
        .get(name)
        .ok_or_else(|| RegistryError::MissingEndpoint(name.to_string()))?;
    let timeout = endpoint
        .timeout_secs
        .unwrap_or(config.engine.activity_timeout_secs);
    Ok((endpoint, Duration::from_secs(timeout)))
}

/// Build the registry for a live deployment.
pub fn build_registry<L: CallbackLedger + 'static>(
    config: &GlobalConfig,
    data_dir: &Path,
    ledger: L,
) -> Result<ActivityRegistry, RegistryError> {
    let mut registry = ActivityRegistry::new();

    for name in activities::REMOTE {
        let (ep, timeout) = endpoint_for(config, name)?;
        registry.register(*name, HttpActivity::shared(*name, &ep.url, timeout)?);
    }

    let (ep, timeout) = endpoint_for(config, activities::DEPLOYMENT_STATUS)?;
    registry.register(
        activities::DEPLOYMENT_STATUS,
        DeploymentStatusActivity::new(HttpStatusSink::new(&ep.url, timeout)?),
    );

    let (ep, timeout) = endpoint_for(config, activities::SAILPOINT_TASK_RESULT)?;
    registry.register(
        activities::SAILPOINT_TASK_RESULT,
        TaskResultActivity::sailpoint(HttpTaskResultSource::new(&ep.url, timeout)?),
    );
    let (ep, timeout) = endpoint_for(config, activities::CYBERARK_TASK_RESULT)?;
    registry.register(
        activities::CYBERARK_TASK_RESULT,
        TaskResultActivity::cyberark(HttpTaskResultSource::new(&ep.url, timeout)?),
    );

    // A local bundle takes precedence over a remote parameter service.
    let parameters = match &config.parameters.base_configs_path {
        Some(path) => FileParameterStore::activity(resolve_path(data_dir, path)),
        None => {
            let (ep, timeout) = endpoint_for(config, activities::GET_PARAMETER)?;
            HttpActivity::shared(activities::GET_PARAMETER, &ep.url, timeout)?
        }
    };
    registry.register(activities::GET_PARAMETER, parameters);

    let callback_endpoint = config
        .callback
        .endpoint
        .as_deref()
        .ok_or(RegistryError::MissingCallbackEndpoint)?;
    let channel = HttpCallbackChannel::new(
        callback_endpoint,
        Duration::from_secs(config.callback.timeout_secs),
    )?;
    let gateway = Arc::new(CallbackGateway::new(ledger, Arc::new(channel)));
    registry.register(activities::SEND_TASK_SUCCESS, CallbackActivity::success(gateway.clone()));
    registry.register(activities::SEND_TASK_FAILURE, CallbackActivity::failure(gateway));

    tracing::debug!(activities = ?registry.names(), "activity registry built");
    Ok(registry)
}

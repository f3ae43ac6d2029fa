//! Global configuration types.
//!
//! `GlobalConfig` represents the top-level `config.toml` that controls engine
//! limits, the callback channel, the parameter bundle and activity endpoints.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Top-level configuration for the orchestrator.
///
/// Loaded from `~/.idprov/config.toml`. All fields have sensible defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub callback: CallbackConfig,

    #[serde(default)]
    pub parameters: ParameterConfig,

    /// Endpoint per activity name.
    #[serde(default)]
    pub activities: BTreeMap<String, ActivityEndpoint>,
}

/// Limits applied by the execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Hard wall-clock budget per execution (190 minutes).
    #[serde(default = "default_execution_timeout_secs")]
    pub execution_timeout_secs: u64,

    /// Map concurrency when a Map state does not declare one.
    #[serde(default = "default_map_concurrency")]
    pub map_concurrency: u32,

    /// Maximum entries into a launch Task within one execution.
    #[serde(default = "default_relaunch_ceiling")]
    pub relaunch_ceiling: u32,

    /// How often the worker scans for due timers.
    #[serde(default = "default_timer_poll_interval_ms")]
    pub timer_poll_interval_ms: u64,

    /// Default per-invocation activity timeout.
    #[serde(default = "default_activity_timeout_secs")]
    pub activity_timeout_secs: u64,
}

fn default_execution_timeout_secs() -> u64 {
    190 * 60
}

fn default_map_concurrency() -> u32 {
    10
}

fn default_relaunch_ceiling() -> u32 {
    10
}

fn default_timer_poll_interval_ms() -> u64 {
    1_000
}

fn default_activity_timeout_secs() -> u64 {
    300
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            execution_timeout_secs: default_execution_timeout_secs(),
            map_concurrency: default_map_concurrency(),
            relaunch_ceiling: default_relaunch_ceiling(),
            timer_poll_interval_ms: default_timer_poll_interval_ms(),
            activity_timeout_secs: default_activity_timeout_secs(),
        }
    }
}

/// Callback channel used to report terminal status to the triggering caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackConfig {
    /// Base URL exposing `send-task-success` / `send-task-failure`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(default = "default_callback_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_callback_timeout_secs() -> u64 {
    30
}

impl Default for CallbackConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_secs: default_callback_timeout_secs(),
        }
    }
}

/// Location of the base-configuration parameter bundle.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParameterConfig {
    /// JSON file holding the bundle. Relative paths resolve against the data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_configs_path: Option<String>,
}

/// HTTP endpoint backing one activity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityEndpoint {
    pub url: String,

    /// Overrides `engine.activity_timeout_secs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_config_default_values() {
        let config = GlobalConfig::default();
        assert_eq!(config.engine.execution_timeout_secs, 11_400);
        assert_eq!(config.engine.map_concurrency, 10);
        assert!(config.callback.endpoint.is_none());
        assert!(config.activities.is_empty());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: GlobalConfig = toml::from_str(
            r#"
[engine]
map_concurrency = 4

[activities.ad_group]
url = "http://localhost:9000/ad-group"
timeout_secs = 60
"#,
        )
        .unwrap();
        assert_eq!(config.engine.map_concurrency, 4);
        assert_eq!(config.engine.relaunch_ceiling, 10);
        assert_eq!(config.callback.timeout_secs, 30);
        assert_eq!(config.activities["ad_group"].timeout_secs, Some(60));
    }
}

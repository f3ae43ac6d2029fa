//! In-process stand-ins for every provisioning activity.
//!
//! Used by `idprov run --dry-run` and by the end-to-end workflow tests. The
//! fakes answer with the response shapes the real services return, record
//! each invocation, and keep status updates and callback notifications in
//! memory so a run can be inspected afterwards.

use std::sync::{Arc, Mutex};

use idprov_types::trigger::DeploymentStatus;
use serde_json::{json, Value};

use super::activities;
use super::status::{DeploymentStatusActivity, RecordingStatusSink};
use super::task_result::{TaskResultActivity, TaskResultError, TaskResultSource, TaskResultStatus};
use crate::callback::channel::{RecordingCallbackChannel, SentNotification};
use crate::callback::gateway::{CallbackActivity, CallbackGateway};
use crate::repository::memory::InMemoryCallbackLedger;
use crate::workflow::activity::{
    from_fn, Activity, ActivityError, ActivityFuture, ActivityRegistry, ActivityRequest,
};

/// One recorded activity invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityCall {
    pub activity: String,
    pub state: String,
}

type CallLog = Arc<Mutex<Vec<ActivityCall>>>;

/// A registry of fake activities plus the in-memory sinks they write to.
pub struct Simulation {
    registry: ActivityRegistry,
    statuses: Arc<RecordingStatusSink>,
    callbacks: Arc<RecordingCallbackChannel>,
    calls: CallLog,
}

impl Simulation {
    /// Fakes for every activity, with `base_configs` served by the parameter
    /// store.
    pub fn new(base_configs: Value) -> Self {
        let statuses = Arc::new(RecordingStatusSink::new());
        let callbacks = Arc::new(RecordingCallbackChannel::new());
        let gateway = Arc::new(CallbackGateway::new(
            InMemoryCallbackLedger::new(),
            callbacks.clone(),
        ));

        let mut sim = Self {
            registry: ActivityRegistry::new(),
            statuses: statuses.clone(),
            callbacks,
            calls: Arc::new(Mutex::new(Vec::new())),
        };

        let parameter = base_configs.to_string();
        sim = sim
            .with_activity(activities::DEPLOYMENT_STATUS, DeploymentStatusActivity::new(statuses))
            .with_activity(
                activities::GET_PARAMETER,
                from_fn(move |req: ActivityRequest| {
                    let value = parameter.clone();
                    async move {
                        let name = req.payload["name"].as_str().unwrap_or_default().to_string();
                        Ok(json!({ "parameter": { "name": name, "value": value } }))
                    }
                }),
            )
            .with_activity(activities::WORKSPACE_ROLE_METADATA, from_fn(workspace_role_metadata))
            .with_activity(activities::AD_GROUP, from_fn(ad_group))
            .with_activity(
                activities::SSO_GET_GROUP,
                from_fn(|req: ActivityRequest| async move {
                    let group = req.payload["ad_group_name"].as_str().unwrap_or("group").to_string();
                    Ok(json!({ "identitystore_group_id": format!("ig-{group}") }))
                }),
            )
            .with_activity(
                activities::SSO_ASSIGN_PERMISSION_SET,
                from_fn(|req: ActivityRequest| async move {
                    let ps = req.payload["permissionset_name"].as_str().unwrap_or_default().to_string();
                    Ok(json!({ "message": format!("Permission set {ps} assigned") }))
                }),
            )
            .with_activity(activities::IAM_ENTITIES, from_fn(iam_entities))
            .with_activity(
                activities::SAILPOINT_LAUNCH,
                from_fn(|req: ActivityRequest| async move {
                    Ok(json!({ "sailpoint_taskresult_id": format!("sp-{}", req.idempotency_key) }))
                }),
            )
            .with_activity(
                activities::CYBERARK_LAUNCH,
                from_fn(|req: ActivityRequest| async move {
                    Ok(json!({ "cyberark_taskresult_id": format!("ca-{}", req.idempotency_key) }))
                }),
            )
            .with_activity(activities::SAILPOINT_TASK_RESULT, TaskResultActivity::sailpoint(CompletedTasks))
            .with_activity(activities::CYBERARK_TASK_RESULT, TaskResultActivity::cyberark(CompletedTasks))
            .with_activity(activities::SEND_TASK_SUCCESS, CallbackActivity::success(gateway.clone()))
            .with_activity(activities::SEND_TASK_FAILURE, CallbackActivity::failure(gateway));
        sim
    }

    /// Replace (or add) one activity. The replacement is recorded like the
    /// built-in fakes.
    pub fn with_activity(mut self, name: &str, activity: Arc<dyn Activity>) -> Self {
        let recorded = Recorded {
            name: name.to_string(),
            inner: activity,
            calls: self.calls.clone(),
        };
        self.registry.register(name, Arc::new(recorded));
        self
    }

    pub fn registry(&self) -> ActivityRegistry {
        self.registry.clone()
    }

    /// Deployment statuses written so far, in order.
    pub fn statuses(&self) -> Vec<DeploymentStatus> {
        self.statuses.statuses()
    }

    /// Callback notifications delivered so far.
    pub fn notifications(&self) -> Vec<SentNotification> {
        self.callbacks.sent()
    }

    pub fn callback_channel(&self) -> &RecordingCallbackChannel {
        &self.callbacks
    }

    pub fn calls(&self) -> Vec<ActivityCall> {
        self.calls.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Activity names in invocation order.
    pub fn activity_trace(&self) -> Vec<String> {
        self.calls().into_iter().map(|c| c.activity).collect()
    }
}

/// A base configuration with every integration enabled.
pub fn sample_base_configs() -> Value {
    json!({
        "sso_state_enabled": "true",
        "sailpoint_state_enabled": "true",
        "cyberark_state_enabled": "true",
        "sso_state_configs": {
            "identity_store_id": "d-9067000000",
            "sso_instance_arn": "arn:aws:sso:::instance/ssoins-0000000000000000"
        }
    })
}

struct Recorded {
    name: String,
    inner: Arc<dyn Activity>,
    calls: CallLog,
}

impl Activity for Recorded {
    fn invoke(&self, request: ActivityRequest) -> ActivityFuture<'_> {
        self.calls
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push(ActivityCall {
                activity: self.name.clone(),
                state: request.state.clone(),
            });
        self.inner.invoke(request)
    }
}

/// Task results that are always complete.
struct CompletedTasks;

impl TaskResultSource for CompletedTasks {
    async fn task_result(&self, _task_result_id: &str) -> Result<TaskResultStatus, TaskResultError> {
        Ok(TaskResultStatus::Succeeded)
    }
}

/// Roles come from `detail.roles_metadata` when the event carries them,
/// otherwise a single non-privileged workspace role is returned.
async fn workspace_role_metadata(req: ActivityRequest) -> Result<Value, ActivityError> {
    let detail = &req.payload["detail"];
    let roles = match detail.get("roles_metadata") {
        Some(Value::Array(roles)) => Value::Array(roles.clone()),
        Some(other) => {
            return Err(ActivityError::new(
                "MetadataRetrievalError",
                format!("roles_metadata must be a list, got {other}"),
            ));
        }
        None => json!([{
            "role_name": "analyst",
            "role_type": "WS",
            "privileged_category": "non-privileged",
            "permission_set_name": "AnalystAccess"
        }]),
    };
    let account_id = detail["target_account_id"].as_str().unwrap_or("000000000000");
    Ok(json!({
        "roles_metadata": roles,
        "workspace_metadata": {
            "workspace_name": detail["target_workspace_name"],
            "response_elements": [{ "account_id": account_id, "ci_number": "CI0000001" }]
        }
    }))
}

async fn ad_group(req: ActivityRequest) -> Result<Value, ActivityError> {
    match req.payload["operation"].as_str() {
        Some("create") => Ok(json!({ "message": "AD groups created" })),
        Some("retrieve") => {
            let role = req.payload["role"]["role_name"].as_str().unwrap_or("role");
            let name = format!("GRP-{role}");
            Ok(json!({
                "ad_group_name": name,
                "ad_group_full_dn_name": format!("CN={name},OU=Groups,DC=corp,DC=local")
            }))
        }
        other => Err(ActivityError::non_retriable(format!(
            "unsupported AD group operation {other:?}"
        ))),
    }
}

async fn iam_entities(req: ActivityRequest) -> Result<Value, ActivityError> {
    let role = req.payload["role_name"].as_str().unwrap_or("privileged");
    let account = req.payload["aws_account_id"].as_str().unwrap_or("000000000000");
    Ok(json!({
        "iam_user_name": format!("svc-{role}"),
        "access_key_id": "AKIAEXAMPLE",
        "encrypted_credentials": "ZW5jcnlwdGVk",
        "role_arn": format!("arn:aws:iam::{account}:role/{role}")
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use idprov_types::config::EngineConfig;
    use idprov_types::error::{kinds, ErrorInfo};
    use idprov_types::execution::ExecutionStatus;
    use idprov_types::trigger::TriggerEvent;

    use crate::callback::channel::NotificationKind;
    use crate::callback::token::CallbackToken;
    use idprov_types::workflow::StateKind;

    use crate::identity::definition::{provisioning_definition, provisioning_workflow};
    use crate::repository::memory::InMemoryExecutionRepository;
    use crate::workflow::clock::ManualClock;
    use crate::workflow::definition::Workflow;
    use crate::workflow::engine::{Engine, EngineBuilder};

    fn event(roles: Value) -> TriggerEvent {
        serde_json::from_value(json!({
            "detail-type": "resource_creation_update",
            "detail": {
                "deployment_module": "identity_access",
                "callback_task_token": "tok1",
                "target_workspace_name": "ws-analytics",
                "target_account_id": "123456789012",
                "roles_metadata": roles
            }
        }))
        .unwrap()
    }

    async fn run(sim: &Simulation, event: &TriggerEvent) -> (Engine<InMemoryExecutionRepository>, uuid::Uuid) {
        let workflow = provisioning_workflow(&EngineConfig::default()).unwrap();
        run_workflow(sim, workflow, event).await
    }

    async fn run_workflow(
        sim: &Simulation,
        workflow: Workflow,
        event: &TriggerEvent,
    ) -> (Engine<InMemoryExecutionRepository>, uuid::Uuid) {
        let config = EngineConfig::default();
        let clock = Arc::new(ManualClock::new(Utc::now()));
        let engine = EngineBuilder::new(workflow, InMemoryExecutionRepository::new(), sim.registry())
            .config(config)
            .clock(clock.clone())
            .build()
            .unwrap();
        let id = engine.start_event(event).await.unwrap();
        engine.run_to_completion(&clock).await.unwrap();
        (engine, id)
    }

    fn states_for(sim: &Simulation, activity: &str) -> Vec<String> {
        sim.calls()
            .into_iter()
            .filter(|c| c.activity == activity)
            .map(|c| c.state)
            .collect()
    }

    #[tokio::test]
    async fn non_privileged_role_with_permission_set_onboards() {
        let sim = Simulation::new(sample_base_configs());
        let roles = json!([{
            "role_name": "analyst",
            "role_type": "WS",
            "privileged_category": "non-privileged",
            "permission_set_name": "PS1"
        }]);
        let (engine, id) = run(&sim, &event(roles)).await;

        let record = engine.execution(id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Succeeded);
        assert_eq!(
            sim.activity_trace(),
            vec![
                activities::DEPLOYMENT_STATUS,
                activities::GET_PARAMETER,
                activities::WORKSPACE_ROLE_METADATA,
                activities::AD_GROUP,
                activities::AD_GROUP,
                activities::SSO_GET_GROUP,
                activities::SSO_ASSIGN_PERMISSION_SET,
                activities::SAILPOINT_LAUNCH,
                activities::SAILPOINT_TASK_RESULT,
                activities::DEPLOYMENT_STATUS,
                activities::SEND_TASK_SUCCESS,
            ]
        );
        assert_eq!(
            sim.statuses(),
            vec![DeploymentStatus::Running, DeploymentStatus::Success]
        );

        let sent = sim.notifications();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Success);
        assert_eq!(sent[0].token_digest, CallbackToken::new("tok1").unwrap().digest());
        assert_eq!(
            sent[0].body,
            "Successfully executed identity_access for account ws-analytics #123456789012."
        );

        let role = &record.document["role_iterator_output"][0]["role"];
        assert_eq!(role["ad_group_config"]["ad_group_name"], "GRP-analyst");
        assert_eq!(role["sailpoint_task_result"]["role_onboarding_status"], "COMPLETED");
        assert_eq!(role["ps_assignment_status"]["ps_assignment_status"], "Permission set PS1 assigned");
    }

    #[tokio::test]
    async fn missing_permission_set_skips_assignment() {
        let sim = Simulation::new(sample_base_configs());
        let roles = json!([{
            "role_name": "analyst",
            "role_type": "WS",
            "privileged_category": "non-privileged"
        }]);
        let (engine, id) = run(&sim, &event(roles)).await;

        assert_eq!(engine.execution(id).await.unwrap().status, ExecutionStatus::Succeeded);
        assert!(states_for(&sim, activities::SSO_ASSIGN_PERMISSION_SET).is_empty());
        assert_eq!(states_for(&sim, activities::SSO_GET_GROUP).len(), 1);
        assert_eq!(states_for(&sim, activities::SAILPOINT_LAUNCH).len(), 1);

        let child = &engine.children(id).await.unwrap()[0];
        let steps: Vec<String> = engine
            .step_logs(child.id)
            .await
            .unwrap()
            .into_iter()
            .map(|s| s.state)
            .collect();
        assert!(steps.contains(&"Skip permissionset assignment".to_string()));
    }

    #[tokio::test]
    async fn privileged_vm_role_goes_straight_to_cyberark() {
        let sim = Simulation::new(sample_base_configs());
        let roles = json!([{
            "role_name": "vm-admin",
            "role_type": "VM",
            "privileged_category": "privileged"
        }]);
        let (engine, id) = run(&sim, &event(roles)).await;

        let record = engine.execution(id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Succeeded);
        // The only AD call is the workspace-level group creation.
        assert_eq!(states_for(&sim, activities::AD_GROUP), vec!["Create AD group in CBAiNet"]);
        assert!(states_for(&sim, activities::SSO_GET_GROUP).is_empty());
        assert!(states_for(&sim, activities::IAM_ENTITIES).is_empty());
        assert!(states_for(&sim, activities::SAILPOINT_LAUNCH).is_empty());
        assert_eq!(states_for(&sim, activities::CYBERARK_LAUNCH).len(), 1);
        assert_eq!(states_for(&sim, activities::CYBERARK_TASK_RESULT).len(), 1);

        let role = &record.document["role_iterator_output"][0]["role"];
        assert_eq!(role["vm_resource_status"], "VM resource created");
        assert_eq!(role["cyberark_task_result"]["role_onboarding_status"], "COMPLETED");
    }

    #[tokio::test]
    async fn privileged_workspace_role_sets_up_iam_then_cyberark() {
        let sim = Simulation::new(sample_base_configs());
        let roles = json!([{
            "role_name": "ws-admin",
            "role_type": "WS",
            "privileged_category": "privileged",
            "iam_role_name": "ws-admin"
        }]);
        let (engine, id) = run(&sim, &event(roles)).await;

        let record = engine.execution(id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Succeeded);
        assert_eq!(states_for(&sim, activities::IAM_ENTITIES).len(), 1);
        assert_eq!(states_for(&sim, activities::CYBERARK_LAUNCH).len(), 1);
        assert_eq!(
            record.document["role_iterator_output"][0]["iam_details"]["role_arn"],
            "arn:aws:iam::123456789012:role/ws-admin"
        );
    }

    #[tokio::test]
    async fn unretried_ad_failure_notifies_cause_verbatim() {
        let sim = Simulation::new(sample_base_configs()).with_activity(
            activities::AD_GROUP,
            from_fn(|_req: ActivityRequest| async move {
                Err(ActivityError::new(
                    "ADGroupPermissionError",
                    "insufficient rights on OU=Workspaces",
                ))
            }),
        );
        let (engine, id) = run(&sim, &event(json!([]))).await;

        let record = engine.execution(id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(
            record.error,
            Some(ErrorInfo::new("ADGroupPermissionError", "insufficient rights on OU=Workspaces"))
        );
        assert_eq!(states_for(&sim, activities::AD_GROUP).len(), 1);
        assert_eq!(
            sim.statuses(),
            vec![DeploymentStatus::Running, DeploymentStatus::Failure]
        );

        let sent = sim.notifications();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Failure);
        assert_eq!(sent[0].body, "ADGroupPermissionError: insufficient rights on OU=Workspaces");
    }

    #[tokio::test]
    async fn unmatched_role_reaches_unhandled_choice() {
        let sim = Simulation::new(sample_base_configs());
        let roles = json!([{
            "role_name": "db",
            "role_type": "DB",
            "privileged_category": "privileged"
        }]);
        let (engine, id) = run(&sim, &event(roles)).await;

        let record = engine.execution(id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(
            record.error,
            Some(ErrorInfo::new(kinds::UNHANDLED_CHOICE, kinds::UNHANDLED_CHOICE_CAUSE))
        );
        // The AD lookup for the item already ran; the outcome is the same.
        assert_eq!(states_for(&sim, activities::AD_GROUP).len(), 2);
        let sent = sim.notifications();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Failure);
    }

    #[tokio::test]
    async fn event_without_token_sends_no_callback() {
        let sim = Simulation::new(sample_base_configs());
        let event: TriggerEvent = serde_json::from_value(json!({
            "detail-type": "resource_deletion",
            "detail": { "deployment_module": "identity_custom" }
        }))
        .unwrap();
        let (engine, id) = run(&sim, &event).await;

        let record = engine.execution(id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Succeeded);
        assert_eq!(engine.children(id).await.unwrap().len(), 1);
        assert_eq!(sim.statuses(), vec![DeploymentStatus::Running]);
        assert!(sim.notifications().is_empty());
    }

    #[tokio::test]
    async fn lost_callback_response_fails_without_resending() {
        let sim = Simulation::new(sample_base_configs());
        sim.callback_channel().lose_next_responses(1);
        let (engine, id) = run(&sim, &event(json!([]))).await;

        let record = engine.execution(id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(
            record.error.as_ref().map(|e| e.error.as_str()),
            Some(kinds::CALLBACK_DELIVERY_UNKNOWN)
        );
        assert_eq!(states_for(&sim, activities::SEND_TASK_SUCCESS).len(), 1);
        assert!(states_for(&sim, activities::SEND_TASK_FAILURE).is_empty());
        assert_eq!(sim.notifications().len(), 1);
    }

    fn offboarding_event() -> TriggerEvent {
        serde_json::from_value(json!({
            "detail-type": "resource_deletion",
            "detail": {
                "deployment_module": "identity_access",
                "callback_task_token": "tok1",
                "target_workspace_name": "ws-analytics",
                "target_account_id": "123456789012",
                "roles_metadata": [
                    { "role_name": "analyst", "role_type": "WS", "privileged_category": "non-privileged" },
                    { "role_name": "vm-admin", "role_type": "VM", "privileged_category": "privileged" }
                ]
            }
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn offboarding_is_repeatable_and_calls_nothing() {
        let definition = provisioning_definition(&EngineConfig::default()).unwrap();
        let StateKind::Map(offboarding) = &definition
            .graph
            .states
            .iter()
            .find(|s| s.id == "Role Iterator Offboarding")
            .unwrap()
            .kind
        else {
            panic!("expected map state");
        };
        let item_states: Vec<&str> = offboarding.iterator.states.iter().map(|s| s.id.as_str()).collect();

        let mut outputs = Vec::new();
        for _ in 0..2 {
            let sim = Simulation::new(sample_base_configs());
            let (engine, id) = run(&sim, &offboarding_event()).await;
            let record = engine.execution(id).await.unwrap();
            assert_eq!(record.status, ExecutionStatus::Succeeded);
            assert!(sim
                .calls()
                .iter()
                .all(|c| !item_states.contains(&c.state.as_str())));
            outputs.push(record.document["role_iterator_output"].clone());
        }

        assert_eq!(outputs[0], outputs[1]);
        let items = outputs[0].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[1]["role"]["role_name"], "vm-admin");
    }

    /// State ids each Map item passed through, by item index.
    async fn item_paths(engine: &Engine<InMemoryExecutionRepository>, id: uuid::Uuid) -> Vec<Vec<String>> {
        let mut children = engine.children(id).await.unwrap();
        children.sort_by_key(|c| c.parent.as_ref().map(|p| p.item_index));
        let mut paths = Vec::new();
        for child in children {
            let steps = engine.step_logs(child.id).await.unwrap();
            paths.push(steps.into_iter().map(|s| s.state).collect());
        }
        paths
    }

    #[tokio::test]
    async fn privilege_check_order_does_not_change_routing() {
        let roles = json!([
            { "role_name": "analyst", "role_type": "WS", "privileged_category": "non-privileged" },
            { "role_name": "ws-admin", "role_type": "WS", "privileged_category": "privileged", "iam_role_name": "ws-admin" },
            { "role_name": "vm-admin", "role_type": "VM", "privileged_category": "privileged" }
        ]);

        let sim = Simulation::new(sample_base_configs());
        let (engine, id) = run(&sim, &event(roles.clone())).await;
        assert_eq!(engine.execution(id).await.unwrap().status, ExecutionStatus::Succeeded);
        let declared = item_paths(&engine, id).await;

        let mut definition = provisioning_definition(&EngineConfig::default()).unwrap();
        let onboarding = definition
            .graph
            .states
            .iter_mut()
            .find(|s| s.id == "Role Iterator Onboarding")
            .unwrap();
        let StateKind::Map(map) = &mut onboarding.kind else {
            panic!("expected map state");
        };
        let check = map
            .iterator
            .states
            .iter_mut()
            .find(|s| s.id == "Privilege category check")
            .unwrap();
        let StateKind::Choice(choice) = &mut check.kind else {
            panic!("expected choice state");
        };
        choice.branches.reverse();

        let sim = Simulation::new(sample_base_configs());
        let (engine, id) = run_workflow(&sim, Workflow::build(definition).unwrap(), &event(roles)).await;
        assert_eq!(engine.execution(id).await.unwrap().status, ExecutionStatus::Succeeded);
        let reversed = item_paths(&engine, id).await;

        assert_eq!(declared.len(), 3);
        assert_eq!(declared, reversed);
        assert!(declared[1].contains(&"Setup IAM entities".to_string()));
        assert!(declared[2].contains(&"Setup VM identities".to_string()));
    }

    struct MissingTasks;

    impl TaskResultSource for MissingTasks {
        async fn task_result(&self, _task_result_id: &str) -> Result<TaskResultStatus, TaskResultError> {
            Err(TaskResultError::NotFound)
        }
    }

    #[tokio::test]
    async fn relaunch_loop_stops_at_ceiling() {
        let sim = Simulation::new(sample_base_configs()).with_activity(
            activities::SAILPOINT_TASK_RESULT,
            TaskResultActivity::sailpoint(MissingTasks),
        );
        let roles = json!([{
            "role_name": "analyst",
            "role_type": "WS",
            "privileged_category": "non-privileged"
        }]);
        let (engine, id) = run(&sim, &event(roles)).await;

        let ceiling = EngineConfig::default().relaunch_ceiling as usize;
        assert_eq!(states_for(&sim, activities::SAILPOINT_LAUNCH).len(), ceiling);
        assert_eq!(states_for(&sim, activities::SAILPOINT_TASK_RESULT).len(), ceiling);

        let record = engine.execution(id).await.unwrap();
        assert_eq!(record.status, ExecutionStatus::Failed);
        assert_eq!(
            record.error.as_ref().map(|e| e.error.as_str()),
            Some(kinds::RELAUNCH_LIMIT_EXCEEDED)
        );
        let sent = sim.notifications();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, NotificationKind::Failure);
    }
}

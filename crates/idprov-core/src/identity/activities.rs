//! Names under which provisioning activities are registered.

pub const DEPLOYMENT_STATUS: &str = "deployment_status";
pub const GET_PARAMETER: &str = "get_parameter";
pub const WORKSPACE_ROLE_METADATA: &str = "workspace_role_metadata";
pub const AD_GROUP: &str = "ad_group";
pub const SSO_GET_GROUP: &str = "sso_get_group";
pub const SSO_ASSIGN_PERMISSION_SET: &str = "sso_assign_permission_set";
pub const IAM_ENTITIES: &str = "iam_entities";
pub const SAILPOINT_LAUNCH: &str = "sailpoint_launch";
pub const SAILPOINT_TASK_RESULT: &str = "sailpoint_task_result";
pub const CYBERARK_LAUNCH: &str = "cyberark_launch";
pub const CYBERARK_TASK_RESULT: &str = "cyberark_task_result";
pub const SEND_TASK_SUCCESS: &str = "send_task_success";
pub const SEND_TASK_FAILURE: &str = "send_task_failure";

/// Activities that are a plain POST to a remote endpoint. The status sink,
/// parameter store, task-result pollers and callback pair have adapters of
/// their own.
pub const REMOTE: &[&str] = &[
    WORKSPACE_ROLE_METADATA,
    AD_GROUP,
    SSO_GET_GROUP,
    SSO_ASSIGN_PERMISSION_SET,
    IAM_ENTITIES,
    SAILPOINT_LAUNCH,
    CYBERARK_LAUNCH,
];

//! Axum router configuration with middleware.
//!
//! All routes are under `/api/v1/`.
//! Middleware: CORS, tracing.

use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::http::handlers;
use crate::state::AppState;

/// Build the complete API router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/events", post(handlers::event::submit_event))
        .route("/executions", get(handlers::execution::list_executions))
        .route("/executions/{id}", get(handlers::execution::get_execution))
        .route("/executions/{id}/steps", get(handlers::execution::get_steps))
        .route("/health", get(handlers::health::health));

    Router::new()
        .nest("/api/v1", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use idprov_types::execution::ExecutionStatus;
    use idprov_types::trigger::DeploymentStatus;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use crate::state::testing::test_state;

    fn event() -> Value {
        json!({
            "detail-type": "resource_creation_update",
            "detail": {
                "deployment_module": "identity_access",
                "callback_task_token": "tok-api",
                "target_workspace_name": "ws-analytics",
                "target_account_id": "123456789012",
                "roles_metadata": [{
                    "role_name": "analyst",
                    "role_type": "WS",
                    "privileged_category": "non-privileged",
                    "permission_set_name": "PS1"
                }]
            }
        })
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let resp = router.oneshot(request).await.unwrap();
        let status = resp.status();
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    fn post_event(body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/api/v1/events")
            .header("content-type", "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_workflow() {
        let t = test_state().await;
        let (status, body) = send(build_router(t.state.clone()), get("/api/v1/health")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "ok");
        assert_eq!(body["data"]["workflow"], t.state.engine.workflow().name());
    }

    #[tokio::test]
    async fn submitted_event_runs_to_success() {
        let t = test_state().await;
        let router = build_router(t.state.clone());

        let (status, body) = send(router.clone(), post_event(event().to_string())).await;
        assert_eq!(status, StatusCode::ACCEPTED);
        let id = body["data"]["execution_id"].as_str().unwrap().to_string();
        assert_eq!(
            body["_links"]["self"],
            format!("/api/v1/executions/{id}")
        );

        let (_, queued) = send(router.clone(), get(&format!("/api/v1/executions/{id}"))).await;
        assert_eq!(queued["data"]["status"], "running");

        t.state.engine.run_to_completion(&t.clock).await.unwrap();

        let (status, done) = send(router.clone(), get(&format!("/api/v1/executions/{id}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(done["data"]["status"], ExecutionStatus::Succeeded.as_str());
        assert_eq!(done["data"]["items"].as_array().unwrap().len(), 1);
        assert_eq!(done["data"]["items"][0]["item_index"], 0);
        assert_eq!(
            t.sim.statuses(),
            vec![DeploymentStatus::Running, DeploymentStatus::Success]
        );

        let (status, steps) = send(router, get(&format!("/api/v1/executions/{id}/steps"))).await;
        assert_eq!(status, StatusCode::OK);
        let steps = steps["data"].as_array().unwrap();
        assert!(!steps.is_empty());
        assert_eq!(steps.last().unwrap()["outcome"], "succeeded");
    }

    #[tokio::test]
    async fn malformed_event_is_rejected() {
        let t = test_state().await;
        let body = json!({ "detail-type": "resource_archival", "detail": {} }).to_string();
        let (status, body) = send(build_router(t.state), post_event(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["errors"][0]["code"], "VALIDATION_ERROR");
        assert!(body["data"].is_null());
    }

    #[tokio::test]
    async fn unknown_execution_is_not_found() {
        let t = test_state().await;
        let uri = format!("/api/v1/executions/{}", uuid::Uuid::now_v7());
        let (status, body) = send(build_router(t.state.clone()), get(&uri)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["errors"][0]["code"], "EXECUTION_NOT_FOUND");

        let (status, _) = send(build_router(t.state), get(&format!("{uri}/steps"))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn list_returns_top_level_executions() {
        let t = test_state().await;
        let router = build_router(t.state.clone());
        send(router.clone(), post_event(event().to_string())).await;
        send(router.clone(), post_event(event().to_string())).await;

        let (status, body) = send(router, get("/api/v1/executions?limit=1")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"].as_array().unwrap().len(), 1);
    }
}

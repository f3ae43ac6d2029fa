//! HTTP/REST API layer.
//!
//! Axum-based REST API at `/api/v1/` for submitting trigger events and
//! inspecting executions, with an envelope response format.

pub mod error;
pub mod handlers;
pub mod response;
pub mod router;

//! Shared domain types for the identity provisioning orchestrator.
//!
//! This crate contains the types used across the workspace: the workflow
//! definition model, document paths, error kinds, persisted execution
//! records, the trigger event, configuration and execution events.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod event;
pub mod execution;
pub mod path;
pub mod trigger;
pub mod workflow;

//! Infrastructure layer for the identity provisioning orchestrator.
//!
//! Contains implementations of the ports defined in `idprov-core`: SQLite
//! storage for executions and the callback ledger, HTTP adapters for
//! activities, deployment status, task results and callbacks, the file-backed
//! parameter store, and the config loader.

pub mod config;
pub mod http;
pub mod parameter;
pub mod registry;
pub mod sqlite;

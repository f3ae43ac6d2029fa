//! Business logic and repository trait definitions for the identity
//! provisioning orchestrator.
//!
//! This crate defines the workflow engine and the "ports" (repository,
//! activity and callback-channel traits) that the infrastructure layer
//! implements. It depends only on `idprov-types` -- never on `idprov-infra`
//! or any database/IO crate.

pub mod callback;
pub mod event;
pub mod identity;
pub mod repository;
pub mod workflow;

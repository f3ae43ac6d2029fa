//! Identity provisioning: the workflow graph and the activities that are
//! specific to it.
//!
//! - `activities` -- registered activity names
//! - `definition` -- the embedded provisioning workflow
//! - `status` -- deployment-status updates
//! - `task_result` -- long-poll result classification for launch/poll pairs
//! - `simulated` -- in-process activities for dry runs

pub mod activities;
pub mod definition;
pub mod simulated;
pub mod status;
pub mod task_result;

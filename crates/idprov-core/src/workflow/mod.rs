//! Workflow engine core: definitions, the state interpreter and durable execution.
//!
//! - `definition` -- YAML/JSON parsing and graph validation
//! - `document` -- path reads, result writes and template rendering
//! - `expression` -- Choice conditions (typed comparisons and JEXL)
//! - `policy` -- Retry/Catch routing and backoff
//! - `activity` -- activity trait, registry and invocation gateway
//! - `map` -- Map fan-out bookkeeping
//! - `interpreter` -- executes one state of one execution
//! - `checkpoint` -- persistence of records and step logs
//! - `clock` -- injectable time source
//! - `engine` -- ready queue, timers, Map joins and recovery

pub mod activity;
pub mod checkpoint;
pub mod clock;
pub mod definition;
pub mod document;
pub mod engine;
pub mod expression;
pub mod interpreter;
pub mod map;
pub mod policy;

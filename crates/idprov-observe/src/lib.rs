//! Observability setup shared by the `idprov` binary.

pub mod tracing_setup;

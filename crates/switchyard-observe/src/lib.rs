//! Observability setup for Switchyard binaries.

pub mod tracing_setup;

//! Observability setup for VoiceBus binaries.

pub mod tracing_setup;

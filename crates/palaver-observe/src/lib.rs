//! Observability setup for Palaver: tracing subscriber and OpenTelemetry export.

pub mod tracing_setup;

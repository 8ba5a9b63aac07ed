//! Common utilities for Conductor
//!
//! Provides process-level settings and telemetry shared by the
//! server binary and any future tooling.

pub mod settings;
pub mod telemetry;

pub use settings::ServerSettings;
pub use telemetry::init_tracing;

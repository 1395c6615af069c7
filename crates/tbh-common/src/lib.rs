//! ---
//! tbh_section: "04-configuration"
//! tbh_subsection: "module"
//! tbh_type: "source"
//! tbh_scope: "code"
//! tbh_description: "Shared primitives for the Timebase harness."
//! tbh_version: "v0.1.0"
//! tbh_owner: "tbd"
//! ---
//! Shared primitives for the Timebase harness workspace.
//! This crate exposes configuration loading and tracing setup consumed by the
//! sequencing crates and the `tbh-run` binary.

pub mod config;
pub mod logging;

pub use config::{
    ArtifactConfig, BinaryConfig, EndpointConfig, FixtureConfig, HarnessConfig,
    LoadedHarnessConfig, LoggingConfig, TimingConfig,
};
pub use logging::{env_filter, init_tracing, LogFormat};

//! Hostagent Plugin Library
//!
//! Supervises the telemetry subagents on behalf of a host plugin manager:
//! - Command execution with per-platform child isolation
//! - Per-subagent restart policy with a bounded retry budget
//! - Group supervision with shared cancellation
//! - Lifecycle state and the Start/Stop/GetStatus/Apply service
//! - gRPC server for the plugin manager

pub mod lifecycle;
pub mod policy;
pub mod preflight;
pub mod runner;
pub mod server;
pub mod service;
pub mod signals;
pub mod supervisor;

pub use lifecycle::{LifecycleState, PluginError, StatusReport};
pub use service::{LifecycleError, LifecycleService, StartOptions};

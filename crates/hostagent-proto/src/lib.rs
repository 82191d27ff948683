//! Hostagent Protocol Buffers
//!
//! Generated protobuf code for the plugin lifecycle contract spoken between
//! the host plugin manager and the hostagent plugin.
//!
//! This crate contains:
//! - `GuestAgentPlugin` service (Start, Stop, `GetStatus`, Apply)
//! - Request and response messages for those RPCs

#![allow(clippy::derive_partial_eq_without_eq)]

/// Plugin lifecycle API definitions.
///
/// All generated types and services are included here.
pub mod plugin_comm {
    tonic::include_proto!("plugin_comm");
}

pub use plugin_comm::*;

// Re-export prost_types for downstream crates that need Struct/Value conversion
pub use prost_types;

/// Fully-qualified gRPC service name.
pub const SERVICE_NAME: &str = "plugin_comm.GuestAgentPlugin";

/// `GuestAgentPlugin/Start`
pub const METHOD_START: &str = "GuestAgentPlugin/Start";

/// `GuestAgentPlugin/Stop`
pub const METHOD_STOP: &str = "GuestAgentPlugin/Stop";

/// `GuestAgentPlugin/GetStatus`
pub const METHOD_GET_STATUS: &str = "GuestAgentPlugin/GetStatus";

/// `GuestAgentPlugin/Apply`
pub const METHOD_APPLY: &str = "GuestAgentPlugin/Apply";

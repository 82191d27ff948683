//! Hostagent Core Library
//!
//! Shared functionality for hostagent components:
//! - Configuration resolution and hierarchy
//! - Well-known install and state directory layout
//! - Tracing/logging initialization
//! - Common error types

pub mod config;
pub mod error;
pub mod layout;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
pub use layout::PluginLayout;

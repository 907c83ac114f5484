//! Keyweave Core Library
//!
//! Ambient plumbing around `keyweave-crypto`:
//! - Configuration resolution and hierarchy
//! - Tracing subscriber setup
//! - Top-level error type

pub mod config;
pub mod error;
pub mod tracing_init;

pub use config::{Config, LogConfig, load_config};
pub use error::{Error, Result};

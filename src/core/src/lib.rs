//! Klaus Core - Shared Types for Artifact Distribution
//!
//! This crate provides the error type and configuration consumed by the
//! `klaus-artifact` crate and by the surrounding tooling that embeds it.

pub mod config;
pub mod error;

// Re-export commonly used types
pub use config::OciConfig;
pub use error::{ArtifactError, Result};

/// Klaus core version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

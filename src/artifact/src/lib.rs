//! Klaus Artifact - OCI distribution and local caching.
//!
//! Pulls, pushes and resolves versioned content bundles (plugins,
//! personalities, toolchains) stored as OCI artifacts in container
//! registries, and keeps a digest marker in every pulled directory so
//! unchanged artifacts are never downloaded twice.

#![allow(clippy::result_large_err)]

pub mod cache;
pub mod oci;

// Re-export common types
pub use cache::{CacheEntry, RESERVED_PREFIX};
pub use oci::{ArtifactClient, ArtifactReference, ListedArtifact, PullResult, PushResult};
pub use oci::{ArtifactConfig, ArtifactKind, ArtifactManifest, ContentKind, Descriptor};
pub use oci::{Credential, CredentialResolver, CredentialSource};
pub use oci::{MemoryRegistry, OciRegistry, RegistryClient};
pub use oci::{Source, SourceConfig, SourceResolver};

pub use klaus_core::{ArtifactError, OciConfig, Result};

/// Klaus artifact crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

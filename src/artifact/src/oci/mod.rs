//! OCI artifact support for klaus.
//!
//! Plugins and personalities are distributed as single-layer OCI artifacts:
//! a JSON config blob describing the artifact and one gzip tar layer with
//! its content. Toolchains are ordinary container images and only take part
//! in name resolution.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                        ArtifactClient                        │
//! │                                                              │
//! │  short name ──► SourceResolver ──► repository[:tag|@digest]  │
//! │                                          │                   │
//! │                     unpinned / latest ──► tags::latest_semver│
//! │                                          │                   │
//! │  RegistryClient::resolve ──► digest ──► cache::is_cached?    │
//! │                                          │ no                │
//! │  fetch_manifest ──► content layer ──► fetch_blob ──► verify  │
//! │                                          │                   │
//! │                    layers::unpack ──► cache::write           │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod client;
pub mod credentials;
pub mod kind;
pub mod layers;
pub mod manifest;
pub mod memory;
mod pull;
mod push;
pub mod reference;
pub mod registry;
pub mod sources;
pub mod tags;

pub use client::{ArtifactClient, ListedArtifact, LATEST_TAG};
pub use credentials::{Credential, CredentialResolver, CredentialSource};
pub use kind::{ArtifactKind, ContentKind};
pub use manifest::{ArtifactConfig, ArtifactManifest, Descriptor};
pub use memory::MemoryRegistry;
pub use pull::PullResult;
pub use push::PushResult;
pub use reference::ArtifactReference;
pub use registry::{OciRegistry, RegistryClient};
pub use sources::{Source, SourceConfig, SourceResolver};
pub use tags::latest_semver;

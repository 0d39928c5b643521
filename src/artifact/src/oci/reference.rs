//! OCI artifact reference parsing.
//!
//! Parses references like `gsoci.azurecr.io/giantswarm/klaus-plugins/gs-base:v0.1.0`
//! into structured components.

use klaus_core::error::{ArtifactError, Result};

/// Registry assumed when the first path component is not a hostname.
const DEFAULT_REGISTRY: &str = "docker.io";

/// Parsed artifact reference.
///
/// When both a tag and a digest are present the digest is authoritative.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ArtifactReference {
    /// Full repository path including the registry host
    /// (e.g., "gsoci.azurecr.io/giantswarm/klaus-plugins/gs-base")
    pub repository: String,
    /// Tag (e.g., "v0.1.0")
    pub tag: Option<String>,
    /// Digest (e.g., "sha256:abc123...")
    pub digest: Option<String>,
}

impl ArtifactReference {
    /// Parse a reference string.
    ///
    /// Supports formats:
    /// - `gs-base` (short name, unpinned)
    /// - `gs-base:v1.0.0`
    /// - `ghcr.io/org/plugin:v1.0.0`
    /// - `ghcr.io/org/plugin@sha256:abc...`
    /// - `localhost:5000/org/plugin:v1` (registry with port)
    pub fn parse(reference: &str) -> Result<Self> {
        let reference = reference.trim();
        if reference.is_empty() {
            return Err(ArtifactError::InvalidReference(
                "Empty artifact reference".to_string(),
            ));
        }

        let (name_tag, digest) = match reference.rfind('@') {
            Some(at_pos) => {
                let digest_part = &reference[at_pos + 1..];
                if !is_valid_digest(digest_part) {
                    return Err(ArtifactError::InvalidReference(format!(
                        "Invalid digest format in reference '{}': expected algorithm:hex",
                        reference
                    )));
                }
                (&reference[..at_pos], Some(digest_part.to_string()))
            }
            None => (reference, None),
        };

        // The tag separator is the last colon after the last slash; anything
        // before the last slash may contain a registry port.
        let last_slash = name_tag.rfind('/').map(|p| p + 1).unwrap_or(0);
        let (repository, tag) = match name_tag[last_slash..].rfind(':') {
            Some(colon_pos) => {
                let split = last_slash + colon_pos;
                let tag = &name_tag[split + 1..];
                if tag.is_empty() {
                    return Err(ArtifactError::InvalidReference(format!(
                        "Empty tag in reference '{}'",
                        reference
                    )));
                }
                (&name_tag[..split], Some(tag.to_string()))
            }
            None => (name_tag, None),
        };

        if repository.is_empty() || repository.ends_with('/') {
            return Err(ArtifactError::InvalidReference(format!(
                "Empty repository in reference '{}'",
                reference
            )));
        }

        Ok(Self {
            repository: repository.to_string(),
            tag,
            digest,
        })
    }

    /// Whether the reference names a tag or a digest.
    pub fn is_pinned(&self) -> bool {
        self.tag.is_some() || self.digest.is_some()
    }

    /// The segment used to resolve the manifest: digest first, then tag.
    pub fn resolution_target(&self) -> Option<&str> {
        self.digest.as_deref().or(self.tag.as_deref())
    }

    /// A copy of this reference pinned to `tag`, with any digest dropped.
    pub fn with_tag(&self, tag: impl Into<String>) -> Self {
        Self {
            repository: self.repository.clone(),
            tag: Some(tag.into()),
            digest: None,
        }
    }

    /// A copy of this reference pinned to `digest`.
    pub fn with_digest(&self, digest: impl Into<String>) -> Self {
        Self {
            repository: self.repository.clone(),
            tag: self.tag.clone(),
            digest: Some(digest.into()),
        }
    }

    /// Registry host (including port) used for credential lookup.
    pub fn host(&self) -> &str {
        match self.repository.split_once('/') {
            Some((first, _)) if looks_like_host(first) => first,
            _ => DEFAULT_REGISTRY,
        }
    }

    /// Whether the repository already carries a path (not a short name).
    pub fn is_qualified(&self) -> bool {
        self.repository.contains('/')
    }

    /// Get the full reference string.
    pub fn full_reference(&self) -> String {
        let mut s = self.repository.clone();
        if let Some(ref tag) = self.tag {
            s.push(':');
            s.push_str(tag);
        }
        if let Some(ref digest) = self.digest {
            s.push('@');
            s.push_str(digest);
        }
        s
    }
}

impl std::fmt::Display for ArtifactReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.full_reference())
    }
}

impl std::str::FromStr for ArtifactReference {
    type Err = ArtifactError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

fn looks_like_host(component: &str) -> bool {
    component.contains('.') || component.contains(':') || component == "localhost"
}

fn is_valid_digest(digest: &str) -> bool {
    match digest.split_once(':') {
        Some((algorithm, hex)) => {
            !algorithm.is_empty()
                && !hex.is_empty()
                && hex.chars().all(|c| c.is_ascii_hexdigit())
        }
        None => false,
    }
}

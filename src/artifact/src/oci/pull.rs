//! Cache-first artifact pull.
//!
//! A destination directory that already carries a marker for the resolved
//! manifest digest is left alone. Otherwise the content layer is fetched,
//! verified, extracted over the destination and a fresh marker is written.

use std::path::Path;

use klaus_core::error::Result;

use crate::cache::{self, CacheEntry};

use super::client::{verify_blob, ArtifactClient};
use super::kind::ContentKind;
use super::layers;
use super::reference::ArtifactReference;
use super::registry::RegistryClient;

/// Outcome of a pull.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PullResult {
    /// Tag-pinned reference that was pulled
    pub reference: String,
    /// Manifest digest now held by the destination
    pub digest: String,
    /// Whether the destination was already up to date
    pub cached: bool,
}

impl<R: RegistryClient> ArtifactClient<R> {
    /// Pull an artifact into `dest_dir`.
    ///
    /// `reference` may be a short name (expanded against the client's
    /// sources), and may be unpinned or tagged `latest`, in which case the
    /// highest semver tag is pulled.
    pub async fn pull(&self, reference: &str, dest_dir: &Path, kind: ContentKind) -> Result<PullResult> {
        let qualified = self.sources.resolve_ref(kind.into(), reference);
        self.bounded("pull", &qualified, self.pull_qualified(&qualified, dest_dir, kind))
            .await
    }

    async fn pull_qualified(&self, reference: &str, dest_dir: &Path, kind: ContentKind) -> Result<PullResult> {
        let pinned = self.pin(&ArtifactReference::parse(reference)?).await?;
        let full_ref = pinned.full_reference();

        let digest = self.registry.resolve(&pinned).await?;

        if cache::is_cached(dest_dir, &digest) {
            tracing::info!(
                reference = %full_ref,
                digest = %digest,
                target = %dest_dir.display(),
                "Artifact already up to date"
            );
            return Ok(PullResult {
                reference: full_ref,
                digest,
                cached: true,
            });
        }

        tracing::info!(
            reference = %full_ref,
            digest = %digest,
            target = %dest_dir.display(),
            kind = %kind,
            "Pulling artifact"
        );

        // Fetch by digest so a tag moved after resolution cannot swap content.
        let (manifest, _) = self
            .registry
            .fetch_manifest(&pinned.with_digest(digest.clone()))
            .await?;
        let layer = manifest.content_layer(kind)?;

        let blob = self.registry.fetch_blob(&pinned.repository, layer).await?;
        verify_blob(layer, &blob)?;

        layers::unpack(blob.as_slice(), dest_dir)?;
        cache::write(dest_dir, &CacheEntry::new(&digest, &full_ref))?;

        tracing::info!(
            reference = %full_ref,
            digest = %digest,
            size = blob.len(),
            "Artifact pulled"
        );

        Ok(PullResult {
            reference: full_ref,
            digest,
            cached: false,
        })
    }
}

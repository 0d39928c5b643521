//! Artifact push.

use std::path::Path;

use klaus_core::error::{ArtifactError, Result};

use super::client::ArtifactClient;
use super::kind::ContentKind;
use super::layers;
use super::manifest::{ArtifactConfig, ArtifactManifest, Descriptor};
use super::reference::ArtifactReference;
use super::registry::RegistryClient;

/// Outcome of a push.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushResult {
    /// Tagged reference that was pushed
    pub reference: String,
    /// Manifest digest
    pub digest: String,
}

impl<R: RegistryClient> ArtifactClient<R> {
    /// Package `source_dir` and push it as `reference`, which must carry a
    /// tag. Short names are expanded against the client's sources.
    ///
    /// The config blob, the content layer and the manifest are pushed in
    /// that order; each is content addressed, so repeating a push with the
    /// same inputs is harmless.
    pub async fn push(
        &self,
        source_dir: &Path,
        reference: &str,
        config: &ArtifactConfig,
        kind: ContentKind,
    ) -> Result<PushResult> {
        let qualified = self.sources.resolve_ref(kind.into(), reference);
        self.bounded(
            "push",
            &qualified,
            self.push_qualified(source_dir, &qualified, config, kind),
        )
        .await
    }

    async fn push_qualified(
        &self,
        source_dir: &Path,
        reference: &str,
        config: &ArtifactConfig,
        kind: ContentKind,
    ) -> Result<PushResult> {
        let parsed = ArtifactReference::parse(reference)?;
        let tag = parsed.tag.clone().ok_or_else(|| {
            ArtifactError::InvalidReference(format!(
                "Push reference '{}' must carry a tag",
                reference
            ))
        })?;
        let target = parsed.with_tag(tag);
        let full_ref = target.full_reference();

        tracing::info!(
            reference = %full_ref,
            source = %source_dir.display(),
            kind = %kind,
            "Pushing artifact"
        );

        let config_bytes = serde_json::to_vec(config)?;
        let config_descriptor = Descriptor::for_blob(kind.config_media_type(), &config_bytes);

        let layer_bytes = layers::pack(source_dir)?;
        let layer_descriptor = Descriptor::for_blob(kind.content_media_type(), &layer_bytes);

        let manifest = ArtifactManifest::new(
            config_descriptor.clone(),
            vec![layer_descriptor.clone()],
            config.annotations(),
        );

        self.registry
            .push_blob(&target.repository, &config_bytes, &config_descriptor.digest)
            .await?;
        self.registry
            .push_blob(&target.repository, &layer_bytes, &layer_descriptor.digest)
            .await?;
        let digest = self.registry.push_manifest(&target, &manifest).await?;

        tracing::info!(
            reference = %full_ref,
            digest = %digest,
            layer_size = layer_bytes.len(),
            "Artifact pushed"
        );

        Ok(PushResult {
            reference: full_ref,
            digest,
        })
    }
}

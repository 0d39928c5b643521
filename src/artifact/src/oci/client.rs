//! Artifact orchestration.
//!
//! [`ArtifactClient`] composes source expansion, tag resolution, registry
//! transport, the archive codec and the local cache. Pull and push live in
//! their own modules as further `impl` blocks.

use std::future::Future;

use futures::stream::{self, StreamExt};
use klaus_core::config::OciConfig;
use klaus_core::error::{ArtifactError, Result};

use super::kind::{ArtifactKind, ContentKind};
use super::manifest::{sha256_digest, ArtifactConfig, Descriptor};
use super::reference::ArtifactReference;
use super::registry::{OciRegistry, RegistryClient};
use super::sources::SourceResolver;
use super::tags::latest_semver;

/// Tag treated as "not pinned yet" and resolved to the highest semver tag.
pub const LATEST_TAG: &str = "latest";

/// Latest version of one artifact as seen in one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedArtifact {
    /// Short or full name the lookup was requested with
    pub name: String,
    /// Source the repository was expanded from
    pub source: String,
    pub repository: String,
    /// Highest semver tag
    pub tag: String,
    /// Manifest digest of that tag
    pub digest: String,
}

impl ListedArtifact {
    /// Digest-pinned reference to this artifact.
    pub fn reference(&self) -> String {
        format!("{}:{}@{}", self.repository, self.tag, self.digest)
    }
}

/// Pulls, pushes and resolves artifacts through a [`RegistryClient`].
pub struct ArtifactClient<R: RegistryClient = OciRegistry> {
    pub(crate) registry: R,
    pub(crate) sources: SourceResolver,
    pub(crate) config: OciConfig,
}

impl ArtifactClient<OciRegistry> {
    /// Create a client talking to real registries.
    pub fn new(config: OciConfig) -> Self {
        let registry = OciRegistry::new(&config);
        Self::with_registry(registry, config)
    }
}

impl<R: RegistryClient> ArtifactClient<R> {
    /// Create a client over any registry implementation, expanding short
    /// names against the built-in source.
    pub fn with_registry(registry: R, config: OciConfig) -> Self {
        Self {
            registry,
            sources: SourceResolver::default(),
            config,
        }
    }

    /// Expand short names against `sources` instead of the built-in source.
    pub fn with_sources(mut self, sources: SourceResolver) -> Self {
        self.sources = sources;
        self
    }

    pub fn registry(&self) -> &R {
        &self.registry
    }

    pub fn sources(&self) -> &SourceResolver {
        &self.sources
    }

    pub fn config(&self) -> &OciConfig {
        &self.config
    }

    /// Resolve a tag or digest reference to its manifest digest.
    pub async fn resolve(&self, reference: &str) -> Result<String> {
        let parsed = ArtifactReference::parse(reference)?;
        if !parsed.is_pinned() {
            return Err(ArtifactError::InvalidReference(format!(
                "Reference '{}' has no tag or digest",
                reference
            )));
        }
        self.registry.resolve(&parsed).await
    }

    /// List all tags of a repository.
    pub async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let parsed = ArtifactReference::parse(repository)?;
        self.registry.list_tags(&parsed.repository).await
    }

    /// Pin `repository` to its highest semver tag.
    pub async fn resolve_latest(&self, repository: &str) -> Result<ArtifactReference> {
        let parsed = ArtifactReference::parse(repository)?;
        let tags = self.registry.list_tags(&parsed.repository).await?;

        let tag = latest_semver(&tags)
            .ok_or_else(|| ArtifactError::NoSemverTags(parsed.repository.clone()))?;

        tracing::debug!(
            repository = %parsed.repository,
            tag = %tag,
            candidates = tags.len(),
            "Resolved latest semver tag"
        );

        Ok(parsed.with_tag(tag))
    }

    /// Pin an unpinned or `latest` reference to a concrete tag; anything
    /// already carrying a version tag or a digest is returned unchanged.
    pub async fn pin(&self, reference: &ArtifactReference) -> Result<ArtifactReference> {
        if reference.digest.is_some() {
            return Ok(reference.clone());
        }
        match reference.tag.as_deref() {
            Some(tag) if tag != LATEST_TAG => Ok(reference.clone()),
            _ => self.resolve_latest(&reference.repository).await,
        }
    }

    /// Fetch and decode an artifact's config blob without touching disk.
    pub async fn fetch_config(&self, reference: &str, kind: ContentKind) -> Result<ArtifactConfig> {
        let qualified = self.sources.resolve_ref(kind.into(), reference);

        self.bounded("fetch config", &qualified, async {
            let parsed = self.pin(&ArtifactReference::parse(&qualified)?).await?;
            let (manifest, _) = self.registry.fetch_manifest(&parsed).await?;
            if manifest.config.media_type != kind.config_media_type() {
                return Err(ArtifactError::NotFound(format!(
                    "{} has config media type {}, expected {}",
                    parsed,
                    manifest.config.media_type,
                    kind.config_media_type()
                )));
            }

            let data = self
                .registry
                .fetch_blob(&parsed.repository, &manifest.config)
                .await?;
            verify_blob(&manifest.config, &data)?;
            Ok(serde_json::from_slice(&data)?)
        })
        .await
    }

    /// Look up the latest version of each name in every source of
    /// `resolver`, at most `list_concurrency` lookups in flight.
    ///
    /// Any failing lookup fails the whole call. Results are sorted by name,
    /// then source.
    pub async fn list_artifacts(
        &self,
        resolver: &SourceResolver,
        kind: ArtifactKind,
        names: &[String],
    ) -> Result<Vec<ListedArtifact>> {
        let lookups: Vec<(String, String, String)> = names
            .iter()
            .flat_map(|name| {
                resolver
                    .candidates(kind, name)
                    .into_iter()
                    .map(move |(source, reference)| (name.clone(), source, reference))
            })
            .collect();

        let concurrency = self.config.list_concurrency.max(1);
        let results: Vec<Result<ListedArtifact>> = stream::iter(lookups)
            .map(|(name, source, reference)| async move {
                let pinned = self.pin(&ArtifactReference::parse(&reference)?).await?;
                let digest = self.registry.resolve(&pinned).await?;
                Ok::<_, ArtifactError>(ListedArtifact {
                    name,
                    source,
                    tag: pinned.tag.clone().unwrap_or_default(),
                    repository: pinned.repository,
                    digest,
                })
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut artifacts = results.into_iter().collect::<Result<Vec<_>>>()?;
        artifacts.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.source.cmp(&b.source)));

        tracing::debug!(kind = %kind, count = artifacts.len(), "Listed artifacts");
        Ok(artifacts)
    }

    /// Run `operation` under the configured timeout, if any.
    pub(crate) async fn bounded<T, F>(&self, operation: &str, reference: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        match self.config.operation_timeout() {
            Some(limit) => tokio::time::timeout(limit, fut).await.map_err(|_| {
                ArtifactError::Timeout(format!(
                    "{} {} did not finish within {}s",
                    operation,
                    reference,
                    limit.as_secs()
                ))
            })?,
            None => fut.await,
        }
    }
}

/// Digest algorithm blobs are verified with.
const SUPPORTED_DIGEST_ALGORITHM: &str = "sha256";

/// Check fetched bytes against their descriptor's size and digest.
pub(crate) fn verify_blob(descriptor: &Descriptor, data: &[u8]) -> Result<()> {
    let algorithm = descriptor
        .digest
        .split_once(':')
        .map(|(algorithm, _)| algorithm)
        .unwrap_or_default();
    if algorithm != SUPPORTED_DIGEST_ALGORITHM {
        return Err(ArtifactError::ArchiveInvalid(format!(
            "blob {} uses unsupported digest algorithm '{}'",
            descriptor.digest, algorithm
        )));
    }

    if descriptor.size > 0 && descriptor.size as u64 != data.len() as u64 {
        return Err(ArtifactError::ArchiveInvalid(format!(
            "blob {} is {} bytes, descriptor says {}",
            descriptor.digest,
            data.len(),
            descriptor.size
        )));
    }

    let actual = sha256_digest(data);
    if actual != descriptor.digest {
        return Err(ArtifactError::DigestMismatch {
            expected: descriptor.digest.clone(),
            actual,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oci::kind::PLUGIN_CONFIG_MEDIA_TYPE;
    use crate::oci::manifest::ArtifactManifest;
    use crate::oci::memory::MemoryRegistry;
    use crate::oci::sources::Source;

    fn client() -> ArtifactClient<MemoryRegistry> {
        ArtifactClient::with_registry(MemoryRegistry::new(), OciConfig::default())
    }

    /// Store a plugin manifest with its config blob under each tag.
    async fn publish(registry: &MemoryRegistry, repository: &str, tags: &[&str], name: &str) -> String {
        let config = ArtifactConfig {
            name: name.to_string(),
            version: "1.0.0".to_string(),
            ..Default::default()
        };
        let config_bytes = serde_json::to_vec(&config).unwrap();
        let descriptor = Descriptor::for_blob(PLUGIN_CONFIG_MEDIA_TYPE, &config_bytes);
        registry
            .push_blob(repository, &config_bytes, &descriptor.digest)
            .await
            .unwrap();

        let manifest = ArtifactManifest::new(descriptor, vec![], config.annotations());
        let digest = registry.insert_manifest(repository, tags[0], manifest).unwrap();
        for tag in &tags[1..] {
            registry.tag(repository, tag, &digest);
        }
        digest
    }

    #[tokio::test]
    async fn test_resolve_requires_pin() {
        let client = client();
        let err = client.resolve("r.io/org/plugin").await.unwrap_err();
        assert!(matches!(err, ArtifactError::InvalidReference(_)));
        assert_eq!(client.registry().resolves(), 0);
    }

    #[tokio::test]
    async fn test_resolve_tag() {
        let client = client();
        let digest = publish(client.registry(), "r.io/org/plugin", &["v1.0.0"], "plugin").await;
        assert_eq!(client.resolve("r.io/org/plugin:v1.0.0").await.unwrap(), digest);
    }

    #[tokio::test]
    async fn test_resolve_latest_picks_highest_semver() {
        let client = client();
        publish(client.registry(), "r.io/org/plugin", &["v0.9.0", "latest"], "a").await;
        publish(client.registry(), "r.io/org/plugin", &["v0.10.0"], "b").await;

        let pinned = client.resolve_latest("r.io/org/plugin").await.unwrap();
        assert_eq!(pinned.to_string(), "r.io/org/plugin:v0.10.0");
    }

    #[tokio::test]
    async fn test_resolve_latest_without_semver_tags() {
        let client = client();
        publish(client.registry(), "r.io/org/plugin", &["latest", "main"], "a").await;

        let err = client.resolve_latest("r.io/org/plugin").await.unwrap_err();
        assert!(matches!(err, ArtifactError::NoSemverTags(ref r) if r == "r.io/org/plugin"));
    }

    #[tokio::test]
    async fn test_pin_keeps_explicit_tag() {
        let client = client();
        let reference = ArtifactReference::parse("r.io/org/plugin:v2").unwrap();
        assert_eq!(client.pin(&reference).await.unwrap(), reference);
        assert_eq!(client.registry().tag_lists(), 0);
    }

    #[tokio::test]
    async fn test_pin_latest_tag() {
        let client = client();
        publish(client.registry(), "r.io/org/plugin", &["latest", "1.2.0"], "a").await;

        let reference = ArtifactReference::parse("r.io/org/plugin:latest").unwrap();
        let pinned = client.pin(&reference).await.unwrap();
        assert_eq!(pinned.tag.as_deref(), Some("1.2.0"));
    }

    #[tokio::test]
    async fn test_fetch_config() {
        let client = client();
        publish(client.registry(), "r.io/org/plugin", &["v1.0.0"], "gs-base").await;

        let config = client
            .fetch_config("r.io/org/plugin:v1.0.0", ContentKind::Plugin)
            .await
            .unwrap();
        assert_eq!(config.name, "gs-base");
        assert_eq!(config.version, "1.0.0");
    }

    #[tokio::test]
    async fn test_fetch_config_wrong_kind() {
        let client = client();
        publish(client.registry(), "r.io/org/plugin", &["v1.0.0"], "gs-base").await;

        let err = client
            .fetch_config("r.io/org/plugin:v1.0.0", ContentKind::Personality)
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_list_artifacts_sorted_across_sources() {
        let client = client();
        publish(client.registry(), "a.io/team/klaus-plugins/zeta", &["v1.0.0"], "zeta").await;
        publish(client.registry(), "a.io/team/klaus-plugins/alpha", &["v1.0.0", "v1.1.0"], "alpha").await;
        publish(client.registry(), "b.io/corp/klaus-plugins/alpha", &["v2.0.0"], "alpha").await;

        let second = Source::new("second", "b.io/corp");
        let mut first = Source::new("first", "a.io/team");
        first.default = true;
        let resolver = SourceResolver::new(vec![second, first]);

        let names = vec!["zeta".to_string(), "alpha".to_string()];
        client.registry().fail_repository("b.io/corp/klaus-plugins/zeta");
        let err = client
            .list_artifacts(&resolver, ArtifactKind::Plugin, &names)
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::Registry { .. }));

        let names = vec!["alpha".to_string()];
        let listed = client
            .list_artifacts(&resolver, ArtifactKind::Plugin, &names)
            .await
            .unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].source, "first");
        assert_eq!(listed[0].tag, "v1.1.0");
        assert_eq!(listed[1].source, "second");
        assert_eq!(listed[1].repository, "b.io/corp/klaus-plugins/alpha");
        assert_eq!(listed[1].tag, "v2.0.0");
    }

    #[tokio::test]
    async fn test_list_artifacts_sorted_by_name() {
        let client = client();
        publish(client.registry(), "a.io/team/klaus-plugins/zeta", &["v1.0.0"], "zeta").await;
        publish(client.registry(), "a.io/team/klaus-plugins/alpha", &["v1.0.0"], "alpha").await;

        let resolver = SourceResolver::new(vec![Source::new("first", "a.io/team")]);
        let names = vec!["zeta".to_string(), "alpha".to_string()];
        let listed = client
            .list_artifacts(&resolver, ArtifactKind::Plugin, &names)
            .await
            .unwrap();

        let order: Vec<&str> = listed.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(order, vec!["alpha", "zeta"]);
        assert!(listed[0].reference().starts_with("a.io/team/klaus-plugins/alpha:v1.0.0@sha256:"));
    }

    #[test]
    fn test_verify_blob() {
        let descriptor = Descriptor::for_blob("application/octet-stream", b"payload");
        assert!(verify_blob(&descriptor, b"payload").is_ok());

        let err = verify_blob(&descriptor, b"PAYLOAD").unwrap_err();
        assert!(matches!(err, ArtifactError::DigestMismatch { .. }));

        let err = verify_blob(&descriptor, b"longer payload").unwrap_err();
        assert!(matches!(err, ArtifactError::ArchiveInvalid(_)));
    }

    #[test]
    fn test_verify_blob_rejects_other_algorithms() {
        let mut descriptor = Descriptor::for_blob("application/octet-stream", b"payload");
        descriptor.digest = format!("sha512:{}", "ab".repeat(64));

        let err = verify_blob(&descriptor, b"payload").unwrap_err();
        assert!(matches!(err, ArtifactError::ArchiveInvalid(ref m) if m.contains("'sha512'")));

        descriptor.digest = "not-a-digest".to_string();
        let err = verify_blob(&descriptor, b"payload").unwrap_err();
        assert!(matches!(err, ArtifactError::ArchiveInvalid(_)));
    }

    /// Registry whose tag listing never completes.
    struct StalledRegistry;

    #[async_trait::async_trait]
    impl RegistryClient for StalledRegistry {
        async fn resolve(&self, _: &ArtifactReference) -> Result<String> {
            Err(ArtifactError::NotFound("stalled".to_string()))
        }

        async fn list_tags(&self, _: &str) -> Result<Vec<String>> {
            futures::future::pending::<()>().await;
            Ok(Vec::new())
        }

        async fn fetch_manifest(&self, _: &ArtifactReference) -> Result<(ArtifactManifest, String)> {
            Err(ArtifactError::NotFound("stalled".to_string()))
        }

        async fn fetch_blob(&self, _: &str, _: &Descriptor) -> Result<Vec<u8>> {
            Err(ArtifactError::NotFound("stalled".to_string()))
        }

        async fn push_blob(&self, _: &str, _: &[u8], _: &str) -> Result<()> {
            Err(ArtifactError::NotFound("stalled".to_string()))
        }

        async fn push_manifest(&self, _: &ArtifactReference, _: &ArtifactManifest) -> Result<String> {
            Err(ArtifactError::NotFound("stalled".to_string()))
        }
    }

    #[tokio::test]
    async fn test_fetch_config_timeout_covers_tag_resolution() {
        let config = OciConfig {
            operation_timeout_secs: Some(1),
            ..Default::default()
        };
        let client = ArtifactClient::with_registry(StalledRegistry, config);

        let err = client
            .fetch_config("r.io/org/plugin", ContentKind::Plugin)
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let config = OciConfig {
            operation_timeout_secs: Some(1),
            ..Default::default()
        };
        let client = ArtifactClient::with_registry(MemoryRegistry::new(), config);

        let err = client
            .bounded("pull", "r.io/org/plugin:v1", async {
                tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                Ok(())
            })
            .await
            .unwrap_err();
        assert!(matches!(err, ArtifactError::Timeout(_)));
    }
}

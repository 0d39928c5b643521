//! OCI registry transport.
//!
//! [`RegistryClient`] is the seam between artifact orchestration and the
//! network. [`OciRegistry`] implements it with the `oci-distribution` crate
//! against real registries (GHCR, ACR, Docker Hub, ...).

use std::future::Future;

use async_trait::async_trait;
use klaus_core::config::OciConfig;
use klaus_core::error::{ArtifactError, Result};
use oci_distribution::client::{ClientConfig, ClientProtocol};
use oci_distribution::errors::{OciDistributionError, OciErrorCode};
use oci_distribution::manifest::{OciDescriptor, OciImageManifest, OciManifest};
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use oci_distribution::{Client, Reference, RegistryOperation};

use super::credentials::CredentialResolver;
use super::manifest::{ArtifactManifest, Descriptor};
use super::reference::ArtifactReference;

/// Number of tags requested per page when listing.
const TAG_PAGE_SIZE: usize = 100;

/// Registry operations needed to pull, push and resolve artifacts.
#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Resolve a tag or digest reference to its manifest digest.
    async fn resolve(&self, reference: &ArtifactReference) -> Result<String>;

    /// List every tag of `repository`, following pagination.
    async fn list_tags(&self, repository: &str) -> Result<Vec<String>>;

    /// Fetch a manifest and its digest.
    async fn fetch_manifest(
        &self,
        reference: &ArtifactReference,
    ) -> Result<(ArtifactManifest, String)>;

    /// Fetch the blob described by `descriptor` from `repository`.
    async fn fetch_blob(&self, repository: &str, descriptor: &Descriptor) -> Result<Vec<u8>>;

    /// Upload a blob. Uploading bytes the registry already holds succeeds.
    async fn push_blob(&self, repository: &str, data: &[u8], digest: &str) -> Result<()>;

    /// Upload a manifest under the reference's tag and return its digest.
    async fn push_manifest(
        &self,
        reference: &ArtifactReference,
        manifest: &ArtifactManifest,
    ) -> Result<String>;
}

/// Registry client backed by `oci-distribution`.
pub struct OciRegistry {
    client: Client,
    credentials: CredentialResolver,
}

impl OciRegistry {
    /// Create a registry client with the standard credential chain.
    pub fn new(config: &OciConfig) -> Self {
        Self::with_credentials(config, CredentialResolver::from_config(config))
    }

    /// Create a registry client with an explicit credential resolver.
    pub fn with_credentials(config: &OciConfig, credentials: CredentialResolver) -> Self {
        let protocol = if config.insecure_registries.is_empty() {
            ClientProtocol::Https
        } else {
            ClientProtocol::HttpsExcept(config.insecure_registries.clone())
        };
        let client = Client::new(ClientConfig {
            protocol,
            ..Default::default()
        });

        Self {
            client,
            credentials,
        }
    }

    pub fn credentials(&self) -> &CredentialResolver {
        &self.credentials
    }

    fn auth_for(&self, reference: &ArtifactReference) -> OciRegistryAuth {
        self.credentials.resolve(reference.host()).to_oci_auth()
    }
}

#[async_trait]
impl RegistryClient for OciRegistry {
    async fn resolve(&self, reference: &ArtifactReference) -> Result<String> {
        let oci_ref = to_oci_reference(reference)?;
        let auth = self.auth_for(reference);

        self.client
            .fetch_manifest_digest(&oci_ref, &auth)
            .await
            .map_err(|e| classify(e, reference.host(), &reference.to_string(), "resolve"))
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        let reference = ArtifactReference::parse(repository)?;
        let oci_ref = repository_reference(&reference)?;
        let auth = self.auth_for(&reference);

        let host = reference.host();
        let oci_ref = &oci_ref;
        let auth = &auth;

        let tags = collect_tag_pages(|last| async move {
            let page = self
                .client
                .list_tags(oci_ref, auth, Some(TAG_PAGE_SIZE), last.as_deref())
                .await
                .map_err(|e| classify(e, host, repository, "list tags of"))?;
            tracing::debug!(repository, count = page.tags.len(), "Listed tag page");
            Ok::<_, ArtifactError>(page.tags)
        })
        .await?;

        Ok(tags)
    }

    async fn fetch_manifest(
        &self,
        reference: &ArtifactReference,
    ) -> Result<(ArtifactManifest, String)> {
        let oci_ref = to_oci_reference(reference)?;
        let auth = self.auth_for(reference);

        let (manifest, digest) = self
            .client
            .pull_manifest(&oci_ref, &auth)
            .await
            .map_err(|e| classify(e, reference.host(), &reference.to_string(), "fetch manifest of"))?;

        let image = match manifest {
            OciManifest::Image(image) => image,
            OciManifest::ImageIndex(_) => {
                return Err(ArtifactError::NotFound(format!(
                    "{} is an image index, not an artifact manifest",
                    reference
                )));
            }
        };

        Ok((from_wire(&image)?, digest))
    }

    async fn fetch_blob(&self, repository: &str, descriptor: &Descriptor) -> Result<Vec<u8>> {
        let reference = ArtifactReference::parse(repository)?;
        let oci_ref = repository_reference(&reference)?;
        let auth = self.auth_for(&reference);
        let oci_descriptor: OciDescriptor = convert(descriptor)?;

        self.client
            .auth(&oci_ref, &auth, RegistryOperation::Pull)
            .await
            .map_err(|e| classify(e, reference.host(), repository, "authenticate to"))?;

        tracing::debug!(
            repository,
            digest = %descriptor.digest,
            size = descriptor.size,
            "Fetching blob"
        );

        let mut data: Vec<u8> = Vec::new();
        self.client
            .pull_blob(&oci_ref, &oci_descriptor, &mut data)
            .await
            .map_err(|e| {
                classify(
                    e,
                    reference.host(),
                    &format!("{}@{}", repository, descriptor.digest),
                    "fetch blob",
                )
            })?;
        Ok(data)
    }

    async fn push_blob(&self, repository: &str, data: &[u8], digest: &str) -> Result<()> {
        let reference = ArtifactReference::parse(repository)?;
        let oci_ref = repository_reference(&reference)?;
        let auth = self.auth_for(&reference);

        self.client
            .auth(&oci_ref, &auth, RegistryOperation::Push)
            .await
            .map_err(|e| classify(e, reference.host(), repository, "authenticate to"))?;

        tracing::debug!(repository, digest, size = data.len(), "Pushing blob");

        self.client
            .push_blob(&oci_ref, data, digest)
            .await
            .map_err(|e| classify(e, reference.host(), &format!("{}@{}", repository, digest), "push blob"))?;
        Ok(())
    }

    async fn push_manifest(
        &self,
        reference: &ArtifactReference,
        manifest: &ArtifactManifest,
    ) -> Result<String> {
        let oci_ref = to_oci_reference(reference)?;
        let auth = self.auth_for(reference);
        let image: OciImageManifest = convert(manifest)?;

        self.client
            .auth(&oci_ref, &auth, RegistryOperation::Push)
            .await
            .map_err(|e| classify(e, reference.host(), &reference.to_string(), "authenticate to"))?;

        self.client
            .push_manifest(&oci_ref, &OciManifest::Image(image))
            .await
            .map_err(|e| classify(e, reference.host(), &reference.to_string(), "push manifest to"))?;

        // The registry hashes the exact bytes it received; ask it rather than
        // re-serializing locally.
        self.client
            .fetch_manifest_digest(&oci_ref, &auth)
            .await
            .map_err(|e| classify(e, reference.host(), &reference.to_string(), "resolve"))
    }
}

/// Convert a reference to an oci-distribution Reference, digest first.
fn to_oci_reference(reference: &ArtifactReference) -> Result<Reference> {
    let ref_str = if let Some(ref digest) = reference.digest {
        format!("{}@{}", reference.repository, digest)
    } else if let Some(ref tag) = reference.tag {
        format!("{}:{}", reference.repository, tag)
    } else {
        return Err(ArtifactError::InvalidReference(format!(
            "Reference '{}' has no tag or digest",
            reference
        )));
    };
    parse_oci_reference(&ref_str)
}

/// Reference addressing only the repository (tag listing and blob access).
fn repository_reference(reference: &ArtifactReference) -> Result<Reference> {
    parse_oci_reference(&reference.repository)
}

fn parse_oci_reference(ref_str: &str) -> Result<Reference> {
    ref_str.parse::<Reference>().map_err(|e| {
        ArtifactError::InvalidReference(format!("Invalid OCI reference '{}': {}", ref_str, e))
    })
}

/// Convert between our wire types and oci-distribution's through their
/// shared JSON shape.
fn convert<T: serde::Serialize, U: serde::de::DeserializeOwned>(value: &T) -> Result<U> {
    Ok(serde_json::from_value(serde_json::to_value(value)?)?)
}

fn from_wire(image: &OciImageManifest) -> Result<ArtifactManifest> {
    convert(image)
}

/// How a registry failure is reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FailureKind {
    Auth,
    NotFound,
    Other,
}

/// Classify by HTTP status.
fn status_kind(code: u16) -> FailureKind {
    match code {
        401 | 403 => FailureKind::Auth,
        404 => FailureKind::NotFound,
        _ => FailureKind::Other,
    }
}

/// Classify by the error codes of a registry error envelope.
fn envelope_kind<'a>(codes: impl IntoIterator<Item = &'a OciErrorCode>) -> FailureKind {
    let mut kind = FailureKind::Other;
    for code in codes {
        match code {
            OciErrorCode::Unauthorized | OciErrorCode::Denied => return FailureKind::Auth,
            OciErrorCode::ManifestUnknown | OciErrorCode::NameUnknown | OciErrorCode::BlobUnknown => {
                kind = FailureKind::NotFound
            }
            _ => {}
        }
    }
    kind
}

fn failure_kind(err: &OciDistributionError) -> FailureKind {
    match err {
        OciDistributionError::AuthenticationFailure(_)
        | OciDistributionError::UnauthorizedError { .. } => FailureKind::Auth,
        OciDistributionError::ImageManifestNotFoundError(_) => FailureKind::NotFound,
        OciDistributionError::ServerError { code, .. } => status_kind(*code),
        OciDistributionError::RegistryError { envelope, .. } => {
            envelope_kind(envelope.errors.iter().map(|e| &e.code))
        }
        _ => FailureKind::Other,
    }
}

/// Map a transport error to an artifact error, keeping the reference.
fn classify(err: OciDistributionError, registry: &str, reference: &str, action: &str) -> ArtifactError {
    let kind = failure_kind(&err);
    into_artifact_error(kind, err.to_string(), registry, reference, action)
}

fn into_artifact_error(
    kind: FailureKind,
    message: String,
    registry: &str,
    reference: &str,
    action: &str,
) -> ArtifactError {
    match kind {
        FailureKind::Auth => ArtifactError::Auth {
            registry: registry.to_string(),
            message: format!("Failed to {} {}: {}", action, reference, message),
        },
        FailureKind::NotFound => ArtifactError::NotFound(format!("{} ({})", reference, message)),
        FailureKind::Other => ArtifactError::Registry {
            reference: reference.to_string(),
            message: format!("Failed to {}: {}", action, message),
        },
    }
}

/// Accumulate tags across pages until a page comes back empty or the
/// `last` cursor stops advancing. Registries may return short pages before
/// the end, so page length is not a stop condition.
async fn collect_tag_pages<F, Fut>(mut fetch_page: F) -> Result<Vec<String>>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Vec<String>>>,
{
    let mut tags: Vec<String> = Vec::new();
    let mut last: Option<String> = None;
    loop {
        let page = fetch_page(last.clone()).await?;
        let next = match page.last() {
            Some(next) => next.clone(),
            None => break,
        };
        if last.as_deref() == Some(next.as_str()) {
            break;
        }
        tags.extend(page);
        last = Some(next);
    }
    Ok(tags)
}

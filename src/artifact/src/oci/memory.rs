//! In-memory registry.
//!
//! Implements [`RegistryClient`] without any network access, with call
//! counters so callers can assert which operations were performed. Used by
//! the test suites and by embedders that want an offline registry.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use klaus_core::error::{ArtifactError, Result};
use parking_lot::Mutex;

use super::manifest::{sha256_digest, ArtifactManifest, Descriptor};
use super::reference::ArtifactReference;
use super::registry::RegistryClient;

#[derive(Default)]
struct State {
    /// repository -> tags in push order, each with its manifest digest
    tags: HashMap<String, Vec<(String, String)>>,
    /// manifest digest -> manifest
    manifests: HashMap<String, ArtifactManifest>,
    /// blob digest -> bytes
    blobs: HashMap<String, Vec<u8>>,
    /// repositories whose requests fail with a registry error
    failing: HashSet<String>,
}

/// Registry that keeps manifests, tags and blobs in memory.
#[derive(Default)]
pub struct MemoryRegistry {
    state: Mutex<State>,
    resolves: AtomicUsize,
    tag_lists: AtomicUsize,
    manifest_fetches: AtomicUsize,
    blob_fetches: AtomicUsize,
    blob_pushes: AtomicUsize,
    manifest_pushes: AtomicUsize,
}

impl MemoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn resolves(&self) -> usize {
        self.resolves.load(Ordering::SeqCst)
    }

    pub fn tag_lists(&self) -> usize {
        self.tag_lists.load(Ordering::SeqCst)
    }

    pub fn manifest_fetches(&self) -> usize {
        self.manifest_fetches.load(Ordering::SeqCst)
    }

    pub fn blob_fetches(&self) -> usize {
        self.blob_fetches.load(Ordering::SeqCst)
    }

    pub fn blob_pushes(&self) -> usize {
        self.blob_pushes.load(Ordering::SeqCst)
    }

    pub fn manifest_pushes(&self) -> usize {
        self.manifest_pushes.load(Ordering::SeqCst)
    }

    /// Whether a blob with `digest` is stored.
    pub fn has_blob(&self, digest: &str) -> bool {
        self.state.lock().blobs.contains_key(digest)
    }

    /// Replace the stored bytes of a blob without updating its digest.
    pub fn overwrite_blob(&self, digest: &str, data: Vec<u8>) {
        self.state.lock().blobs.insert(digest.to_string(), data);
    }

    /// Store a manifest directly, bypassing blob checks, and tag it.
    pub fn insert_manifest(&self, repository: &str, tag: &str, manifest: ArtifactManifest) -> Result<String> {
        let digest = sha256_digest(&manifest.to_bytes()?);
        let mut state = self.state.lock();
        state.manifests.insert(digest.clone(), manifest);
        set_tag(&mut state, repository, tag, &digest);
        Ok(digest)
    }

    /// Point `tag` of `repository` at an already stored manifest.
    pub fn tag(&self, repository: &str, tag: &str, digest: &str) {
        set_tag(&mut self.state.lock(), repository, tag, digest);
    }

    /// Make every request against `repository` fail.
    pub fn fail_repository(&self, repository: &str) {
        self.state.lock().failing.insert(repository.to_string());
    }

    fn check_available(&self, repository: &str) -> Result<()> {
        if self.state.lock().failing.contains(repository) {
            return Err(ArtifactError::Registry {
                reference: repository.to_string(),
                message: "registry unavailable".to_string(),
            });
        }
        Ok(())
    }

    fn lookup(&self, reference: &ArtifactReference) -> Result<String> {
        let state = self.state.lock();

        if let Some(ref digest) = reference.digest {
            return if state.manifests.contains_key(digest) {
                Ok(digest.clone())
            } else {
                Err(ArtifactError::NotFound(reference.to_string()))
            };
        }

        let tag = reference.tag.as_deref().ok_or_else(|| {
            ArtifactError::InvalidReference(format!(
                "Reference '{}' has no tag or digest",
                reference
            ))
        })?;

        state
            .tags
            .get(&reference.repository)
            .and_then(|tags| tags.iter().find(|(t, _)| t == tag))
            .map(|(_, digest)| digest.clone())
            .ok_or_else(|| ArtifactError::NotFound(reference.to_string()))
    }
}

fn set_tag(state: &mut State, repository: &str, tag: &str, digest: &str) {
    let tags = state.tags.entry(repository.to_string()).or_default();
    match tags.iter_mut().find(|(t, _)| t == tag) {
        Some(entry) => entry.1 = digest.to_string(),
        None => tags.push((tag.to_string(), digest.to_string())),
    }
}

#[async_trait]
impl RegistryClient for MemoryRegistry {
    async fn resolve(&self, reference: &ArtifactReference) -> Result<String> {
        self.resolves.fetch_add(1, Ordering::SeqCst);
        self.check_available(&reference.repository)?;
        self.lookup(reference)
    }

    async fn list_tags(&self, repository: &str) -> Result<Vec<String>> {
        self.tag_lists.fetch_add(1, Ordering::SeqCst);
        self.check_available(repository)?;

        let state = self.state.lock();
        state
            .tags
            .get(repository)
            .map(|tags| tags.iter().map(|(t, _)| t.clone()).collect())
            .ok_or_else(|| ArtifactError::NotFound(format!("repository {}", repository)))
    }

    async fn fetch_manifest(
        &self,
        reference: &ArtifactReference,
    ) -> Result<(ArtifactManifest, String)> {
        self.manifest_fetches.fetch_add(1, Ordering::SeqCst);
        self.check_available(&reference.repository)?;

        let digest = self.lookup(reference)?;
        let state = self.state.lock();
        let manifest = state
            .manifests
            .get(&digest)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(reference.to_string()))?;
        Ok((manifest, digest))
    }

    async fn fetch_blob(&self, repository: &str, descriptor: &Descriptor) -> Result<Vec<u8>> {
        self.blob_fetches.fetch_add(1, Ordering::SeqCst);
        self.check_available(repository)?;

        self.state
            .lock()
            .blobs
            .get(&descriptor.digest)
            .cloned()
            .ok_or_else(|| ArtifactError::NotFound(format!("{}@{}", repository, descriptor.digest)))
    }

    async fn push_blob(&self, repository: &str, data: &[u8], digest: &str) -> Result<()> {
        self.blob_pushes.fetch_add(1, Ordering::SeqCst);
        self.check_available(repository)?;

        let actual = sha256_digest(data);
        if actual != digest {
            return Err(ArtifactError::DigestMismatch {
                expected: digest.to_string(),
                actual,
            });
        }
        self.state.lock().blobs.insert(actual, data.to_vec());
        Ok(())
    }

    async fn push_manifest(
        &self,
        reference: &ArtifactReference,
        manifest: &ArtifactManifest,
    ) -> Result<String> {
        self.manifest_pushes.fetch_add(1, Ordering::SeqCst);
        self.check_available(&reference.repository)?;

        let tag = reference.tag.as_deref().ok_or_else(|| {
            ArtifactError::InvalidReference(format!("Reference '{}' has no tag", reference))
        })?;

        let digest = sha256_digest(&manifest.to_bytes()?);
        let mut state = self.state.lock();
        for descriptor in std::iter::once(&manifest.config).chain(manifest.layers.iter()) {
            if !state.blobs.contains_key(&descriptor.digest) {
                return Err(ArtifactError::NotFound(format!(
                    "blob {} referenced by manifest was never pushed",
                    descriptor.digest
                )));
            }
        }
        state.manifests.insert(digest.clone(), manifest.clone());
        set_tag(&mut state, &reference.repository, tag, &digest);
        Ok(digest)
    }
}

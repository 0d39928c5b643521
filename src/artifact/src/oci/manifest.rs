//! OCI manifest wire types and the artifact config blob schema.

use std::collections::BTreeMap;

use klaus_core::error::{ArtifactError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::kind::ContentKind;

/// Media type of the OCI image manifest.
pub const OCI_MANIFEST_MEDIA_TYPE: &str = "application/vnd.oci.image.manifest.v1+json";

pub const ANNOTATION_TITLE: &str = "org.opencontainers.image.title";
pub const ANNOTATION_VERSION: &str = "org.opencontainers.image.version";
pub const ANNOTATION_DESCRIPTION: &str = "org.opencontainers.image.description";
pub const ANNOTATION_AUTHORS: &str = "org.opencontainers.image.authors";
pub const ANNOTATION_URL: &str = "org.opencontainers.image.url";
pub const ANNOTATION_SOURCE: &str = "org.opencontainers.image.source";
pub const ANNOTATION_LICENSES: &str = "org.opencontainers.image.licenses";

/// Compute the `sha256:<hex>` content digest of `data`.
pub fn sha256_digest(data: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(data)))
}

/// Content descriptor referencing a blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Descriptor {
    pub media_type: String,
    pub digest: String,
    pub size: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl Descriptor {
    /// Describe `data` with its content digest and length.
    pub fn for_blob(media_type: &str, data: &[u8]) -> Self {
        Self {
            media_type: media_type.to_string(),
            digest: sha256_digest(data),
            size: data.len() as i64,
            annotations: None,
        }
    }
}

/// OCI image manifest for a single-layer artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArtifactManifest {
    pub schema_version: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<String>,
    pub config: Descriptor,
    #[serde(default)]
    pub layers: Vec<Descriptor>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub annotations: Option<BTreeMap<String, String>>,
}

impl ArtifactManifest {
    /// Build a manifest, keeping only non-empty annotation values.
    ///
    /// An annotation set with nothing left is stored as `None` so it is
    /// omitted from the serialized manifest.
    pub fn new(
        config: Descriptor,
        layers: Vec<Descriptor>,
        annotations: BTreeMap<String, String>,
    ) -> Self {
        let annotations: BTreeMap<String, String> = annotations
            .into_iter()
            .filter(|(_, v)| !v.is_empty())
            .collect();

        Self {
            schema_version: 2,
            media_type: Some(OCI_MANIFEST_MEDIA_TYPE.to_string()),
            config,
            layers,
            annotations: if annotations.is_empty() {
                None
            } else {
                Some(annotations)
            },
        }
    }

    /// Locate the single layer carrying `kind`'s content media type.
    pub fn content_layer(&self, kind: ContentKind) -> Result<&Descriptor> {
        let media_type = kind.content_media_type();
        let mut matching = self.layers.iter().filter(|l| l.media_type == media_type);

        let layer = matching.next().ok_or_else(|| {
            ArtifactError::NotFound(format!(
                "manifest has no layer with media type {}",
                media_type
            ))
        })?;
        if matching.next().is_some() {
            return Err(ArtifactError::ArchiveInvalid(format!(
                "manifest has more than one layer with media type {}",
                media_type
            )));
        }
        Ok(layer)
    }

    /// Serialize to the exact bytes pushed to the registry.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Metadata stored as the artifact's config blob.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactConfig {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub version: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
}

impl ArtifactConfig {
    /// Standard OCI annotations derived from this config; empty values are
    /// dropped later by [`ArtifactManifest::new`].
    pub fn annotations(&self) -> BTreeMap<String, String> {
        let optional = |v: &Option<String>| v.clone().unwrap_or_default();

        BTreeMap::from([
            (ANNOTATION_TITLE.to_string(), self.name.clone()),
            (ANNOTATION_VERSION.to_string(), self.version.clone()),
            (ANNOTATION_DESCRIPTION.to_string(), self.description.clone()),
            (ANNOTATION_AUTHORS.to_string(), optional(&self.author)),
            (ANNOTATION_URL.to_string(), optional(&self.homepage)),
            (ANNOTATION_SOURCE.to_string(), optional(&self.repository)),
            (ANNOTATION_LICENSES.to_string(), optional(&self.license)),
        ])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(media_type: &str) -> Descriptor {
        Descriptor::for_blob(media_type, b"data")
    }

    #[test]
    fn test_sha256_digest() {
        assert_eq!(
            sha256_digest(b"hello"),
            "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn test_empty_annotations_are_omitted() {
        let annotations = BTreeMap::from([
            ("a".to_string(), String::new()),
            ("b".to_string(), String::new()),
        ]);
        let manifest = ArtifactManifest::new(descriptor("cfg"), vec![], annotations);
        assert!(manifest.annotations.is_none());

        let json = String::from_utf8(manifest.to_bytes().unwrap()).unwrap();
        assert!(!json.contains("annotations"));
    }

    #[test]
    fn test_empty_annotation_values_are_dropped() {
        let config = ArtifactConfig {
            name: "gs-base".to_string(),
            version: "1.0.0".to_string(),
            ..Default::default()
        };
        let manifest = ArtifactManifest::new(descriptor("cfg"), vec![], config.annotations());
        let annotations = manifest.annotations.unwrap();
        assert_eq!(annotations.len(), 2);
        assert_eq!(annotations[ANNOTATION_TITLE], "gs-base");
        assert_eq!(annotations[ANNOTATION_VERSION], "1.0.0");
    }

    #[test]
    fn test_manifest_wire_shape() {
        let manifest = ArtifactManifest::new(
            descriptor(ContentKind::Plugin.config_media_type()),
            vec![descriptor(ContentKind::Plugin.content_media_type())],
            BTreeMap::new(),
        );
        let value: serde_json::Value = serde_json::from_slice(&manifest.to_bytes().unwrap()).unwrap();
        assert_eq!(value["schemaVersion"], 2);
        assert_eq!(value["mediaType"], OCI_MANIFEST_MEDIA_TYPE);
        assert_eq!(value["config"]["size"], 4);
        assert_eq!(
            value["layers"][0]["mediaType"],
            ContentKind::Plugin.content_media_type()
        );
    }

    #[test]
    fn test_content_layer_found() {
        let manifest = ArtifactManifest::new(
            descriptor(ContentKind::Personality.config_media_type()),
            vec![
                descriptor("application/octet-stream"),
                descriptor(ContentKind::Personality.content_media_type()),
            ],
            BTreeMap::new(),
        );
        let layer = manifest.content_layer(ContentKind::Personality).unwrap();
        assert_eq!(layer.media_type, ContentKind::Personality.content_media_type());
    }

    #[test]
    fn test_content_layer_missing() {
        let manifest = ArtifactManifest::new(
            descriptor(ContentKind::Plugin.config_media_type()),
            vec![descriptor(ContentKind::Personality.content_media_type())],
            BTreeMap::new(),
        );
        let err = manifest.content_layer(ContentKind::Plugin).unwrap_err();
        assert!(matches!(err, ArtifactError::NotFound(_)));
    }

    #[test]
    fn test_content_layer_duplicate() {
        let media_type = ContentKind::Plugin.content_media_type();
        let manifest = ArtifactManifest::new(
            descriptor(ContentKind::Plugin.config_media_type()),
            vec![descriptor(media_type), descriptor(media_type)],
            BTreeMap::new(),
        );
        assert!(manifest.content_layer(ContentKind::Plugin).is_err());
    }

    #[test]
    fn test_parse_manifest_without_annotations() {
        let json = r#"{
            "schemaVersion": 2,
            "config": {"mediaType": "cfg", "digest": "sha256:aa", "size": 2},
            "layers": []
        }"#;
        let manifest: ArtifactManifest = serde_json::from_str(json).unwrap();
        assert!(manifest.annotations.is_none());
        assert!(manifest.media_type.is_none());
    }
}

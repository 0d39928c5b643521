//! Named artifact sources and short-name resolution.
//!
//! A source maps short artifact names like `gs-base` onto a registry base
//! (`<host>/<org>`), with the artifact kind's path prefix appended:
//! `gsoci.azurecr.io/giantswarm/klaus-plugins/gs-base`. Sources may override
//! the full base per kind.

use std::path::{Path, PathBuf};

use klaus_core::error::{ArtifactError, Result};
use serde::{Deserialize, Serialize};

use super::kind::ArtifactKind;

/// Name of the source that always exists.
pub const BUILTIN_SOURCE_NAME: &str = "giantswarm";

/// Registry base of the built-in source.
pub const BUILTIN_REGISTRY: &str = "gsoci.azurecr.io/giantswarm";

const MAX_SOURCE_NAME_LEN: usize = 63;

/// A named registry base used to expand short artifact names.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub name: String,
    pub registry: String,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub default: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub toolchains: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub personalities: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plugins: Option<String>,
}

impl Source {
    pub fn new(name: impl Into<String>, registry: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            registry: registry.into().trim_end_matches('/').to_string(),
            default: false,
            toolchains: None,
            personalities: None,
            plugins: None,
        }
    }

    /// The built-in Giant Swarm source.
    pub fn builtin() -> Self {
        Self::new(BUILTIN_SOURCE_NAME, BUILTIN_REGISTRY)
    }

    pub fn is_builtin(&self) -> bool {
        self.name == BUILTIN_SOURCE_NAME
    }

    /// Repository base for `kind`: the per-kind override if set, else
    /// `<registry>/<kind prefix>`.
    pub fn registry_for(&self, kind: ArtifactKind) -> String {
        let override_base = match kind {
            ArtifactKind::Plugin => self.plugins.as_deref(),
            ArtifactKind::Personality => self.personalities.as_deref(),
            ArtifactKind::Toolchain => self.toolchains.as_deref(),
        };
        match override_base.filter(|b| !b.is_empty()) {
            Some(base) => base.trim_end_matches('/').to_string(),
            None => format!("{}/{}", self.registry, kind.repository_prefix()),
        }
    }

    /// Strip surrounding whitespace and trailing slashes from the registry
    /// and per-kind overrides so expanded references never contain `//`.
    pub fn normalize(&mut self) {
        self.registry = self.registry.trim().trim_end_matches('/').to_string();
        for base in [&mut self.toolchains, &mut self.personalities, &mut self.plugins]
            .into_iter()
            .flatten()
        {
            *base = base.trim().trim_end_matches('/').to_string();
        }
    }

    pub fn validate(&self) -> Result<()> {
        validate_source_name(&self.name)?;
        let registry = self.registry.trim();
        if registry.is_empty() {
            return Err(ArtifactError::InvalidSource(format!(
                "source '{}' has an empty registry",
                self.name
            )));
        }
        if registry.contains("://") {
            return Err(ArtifactError::InvalidSource(format!(
                "source '{}' registry must not include a scheme: {}",
                self.name, registry
            )));
        }
        Ok(())
    }
}

/// Check that `name` is a DNS-label-like identifier: a lowercase letter
/// followed by lowercase letters, digits or hyphens.
pub fn validate_source_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(first) if first.is_ascii_lowercase() => {
            chars.all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        }
        _ => false,
    };
    if !valid || name.len() > MAX_SOURCE_NAME_LEN {
        return Err(ArtifactError::InvalidSource(format!(
            "invalid source name '{}': must start with a letter and contain only lowercase letters, digits and hyphens (max {} characters)",
            name, MAX_SOURCE_NAME_LEN
        )));
    }
    Ok(())
}

/// Persisted, validated list of sources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default)]
    sources: Vec<Source>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            sources: vec![Source::builtin()],
        }
    }
}

impl SourceConfig {
    /// Default location: `<config dir>/klaus/sources.yaml`.
    pub fn default_path() -> Result<PathBuf> {
        let dir = dirs::config_dir().ok_or_else(|| {
            ArtifactError::Config("Cannot determine config directory for sources".to_string())
        })?;
        Ok(dir.join("klaus").join("sources.yaml"))
    }

    /// Load sources from YAML. A missing file yields the built-in source only.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let data = std::fs::read_to_string(path).map_err(|e| {
            ArtifactError::Config(format!(
                "Failed to read sources file {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut config: SourceConfig = serde_yaml::from_str(&data)?;
        config.sources.iter_mut().for_each(Source::normalize);
        if !config.sources.iter().any(Source::is_builtin) {
            config.sources.insert(0, Source::builtin());
        }
        config.validate()?;
        Ok(config)
    }

    /// Save sources to YAML atomically (write tmp, rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp_path = path.with_extension("tmp");
        std::fs::write(&tmp_path, serde_yaml::to_string(self)?)?;
        std::fs::rename(&tmp_path, path).map_err(|e| {
            ArtifactError::Config(format!(
                "Failed to rename sources file {} -> {}: {}",
                tmp_path.display(),
                path.display(),
                e
            ))
        })?;
        Ok(())
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn get(&self, name: &str) -> Option<&Source> {
        self.sources.iter().find(|s| s.name == name)
    }

    /// Add a source. A source added as default clears the flag on all others.
    pub fn add(&mut self, mut source: Source) -> Result<()> {
        source.normalize();
        source.validate()?;
        if self.get(&source.name).is_some() {
            return Err(ArtifactError::InvalidSource(format!(
                "source '{}' already exists",
                source.name
            )));
        }
        if source.default {
            self.clear_default();
        }
        self.sources.push(source);
        Ok(())
    }

    /// Remove a source by name. The built-in source cannot be removed.
    pub fn remove(&mut self, name: &str) -> Result<()> {
        if name == BUILTIN_SOURCE_NAME {
            return Err(ArtifactError::InvalidSource(format!(
                "source '{}' is built in and cannot be removed",
                name
            )));
        }
        let before = self.sources.len();
        self.sources.retain(|s| s.name != name);
        if self.sources.len() == before {
            return Err(ArtifactError::NotFound(format!("source '{}'", name)));
        }
        Ok(())
    }

    /// Mark `name` as the only default source.
    pub fn set_default(&mut self, name: &str) -> Result<()> {
        if self.get(name).is_none() {
            return Err(ArtifactError::NotFound(format!("source '{}'", name)));
        }
        for source in &mut self.sources {
            source.default = source.name == name;
        }
        Ok(())
    }

    fn clear_default(&mut self) {
        for source in &mut self.sources {
            source.default = false;
        }
    }

    pub fn validate(&self) -> Result<()> {
        let mut defaults = 0;
        for (i, source) in self.sources.iter().enumerate() {
            source.validate()?;
            if self.sources[..i].iter().any(|s| s.name == source.name) {
                return Err(ArtifactError::InvalidSource(format!(
                    "duplicate source name '{}'",
                    source.name
                )));
            }
            if source.default {
                defaults += 1;
            }
        }
        if defaults > 1 {
            return Err(ArtifactError::InvalidSource(format!(
                "{} sources are marked default; at most one is allowed",
                defaults
            )));
        }
        Ok(())
    }

    /// Resolver over all sources, default first.
    pub fn resolver(&self) -> SourceResolver {
        SourceResolver::new(self.sources.clone())
    }
}

/// Expands short artifact names using an ordered list of sources.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceResolver {
    sources: Vec<Source>,
}

impl Default for SourceResolver {
    fn default() -> Self {
        Self::new(vec![Source::builtin()])
    }
}

impl SourceResolver {
    /// Build a resolver; the default source (if any) moves to the front,
    /// all others keep their order. An empty list falls back to the
    /// built-in source.
    pub fn new(mut sources: Vec<Source>) -> Self {
        if sources.is_empty() {
            sources.push(Source::builtin());
        }
        if let Some(pos) = sources.iter().position(|s| s.default) {
            let default = sources.remove(pos);
            sources.insert(0, default);
        }
        Self { sources }
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    /// The source short names are expanded against.
    pub fn primary(&self) -> &Source {
        &self.sources[0]
    }

    pub fn resolve_plugin_ref(&self, name: &str) -> String {
        self.resolve_ref(ArtifactKind::Plugin, name)
    }

    pub fn resolve_personality_ref(&self, name: &str) -> String {
        self.resolve_ref(ArtifactKind::Personality, name)
    }

    pub fn resolve_toolchain_ref(&self, name: &str) -> String {
        self.resolve_ref(ArtifactKind::Toolchain, name)
    }

    /// Expand a short name (keeping any `:tag` or `@digest` suffix) against
    /// the primary source. Anything containing `/` is already qualified and
    /// is returned unchanged.
    pub fn resolve_ref(&self, kind: ArtifactKind, name: &str) -> String {
        let name = name.trim();
        if name.is_empty() || name.contains('/') {
            return name.to_string();
        }
        expand(self.primary(), kind, name)
    }

    /// Expansions of `name` against every source, in resolver order.
    pub fn candidates(&self, kind: ArtifactKind, name: &str) -> Vec<(String, String)> {
        let name = name.trim();
        self.sources
            .iter()
            .map(|s| {
                let reference = if name.contains('/') {
                    name.to_string()
                } else {
                    expand(s, kind, name)
                };
                (s.name.clone(), reference)
            })
            .collect()
    }

    /// A resolver restricted to the source called `name`.
    pub fn for_source(&self, name: &str) -> Result<SourceResolver> {
        self.sources
            .iter()
            .find(|s| s.name == name)
            .map(|s| SourceResolver {
                sources: vec![s.clone()],
            })
            .ok_or_else(|| ArtifactError::NotFound(format!("source '{}'", name)))
    }

    /// A resolver restricted to the primary source.
    pub fn default_only(&self) -> SourceResolver {
        SourceResolver {
            sources: vec![self.primary().clone()],
        }
    }
}

fn expand(source: &Source, kind: ArtifactKind, name: &str) -> String {
    format!("{}/{}", source.registry_for(kind), name)
}

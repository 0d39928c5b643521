//! Artifact kinds and their fixed media types.

use std::fmt;

/// Config blob media type for plugins.
pub const PLUGIN_CONFIG_MEDIA_TYPE: &str = "application/vnd.giantswarm.klaus-plugin.config.v1+json";
/// Content layer media type for plugins.
pub const PLUGIN_CONTENT_MEDIA_TYPE: &str =
    "application/vnd.giantswarm.klaus-plugin.content.v1.tar+gzip";
/// Config blob media type for personalities.
pub const PERSONALITY_CONFIG_MEDIA_TYPE: &str =
    "application/vnd.giantswarm.klaus-personality.config.v1+json";
/// Content layer media type for personalities.
pub const PERSONALITY_CONTENT_MEDIA_TYPE: &str =
    "application/vnd.giantswarm.klaus-personality.content.v1.tar+gzip";

/// Kind of artifact addressed through a source's registry base.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactKind {
    Plugin,
    Personality,
    Toolchain,
}

impl ArtifactKind {
    /// Path segment appended to a source's registry base.
    pub fn repository_prefix(&self) -> &'static str {
        match self {
            Self::Plugin => "klaus-plugins",
            Self::Personality => "klaus-personalities",
            Self::Toolchain => "klaus-toolchains",
        }
    }
}

impl fmt::Display for ArtifactKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Plugin => write!(f, "plugin"),
            Self::Personality => write!(f, "personality"),
            Self::Toolchain => write!(f, "toolchain"),
        }
    }
}

/// Kind of artifact that carries a packaged content layer.
///
/// Toolchains are plain container images and are never pulled or pushed
/// through this path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Plugin,
    Personality,
}

impl ContentKind {
    pub fn config_media_type(&self) -> &'static str {
        match self {
            Self::Plugin => PLUGIN_CONFIG_MEDIA_TYPE,
            Self::Personality => PERSONALITY_CONFIG_MEDIA_TYPE,
        }
    }

    pub fn content_media_type(&self) -> &'static str {
        match self {
            Self::Plugin => PLUGIN_CONTENT_MEDIA_TYPE,
            Self::Personality => PERSONALITY_CONTENT_MEDIA_TYPE,
        }
    }
}

impl From<ContentKind> for ArtifactKind {
    fn from(kind: ContentKind) -> Self {
        match kind {
            ContentKind::Plugin => ArtifactKind::Plugin,
            ContentKind::Personality => ArtifactKind::Personality,
        }
    }
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        ArtifactKind::from(*self).fmt(f)
    }
}

//! Semantic-version tag selection.

use std::cmp::Ordering;

use semver::Version;

/// Parse a tag as a semantic version, accepting an optional leading `v`.
pub fn parse_semver_tag(tag: &str) -> Option<Version> {
    let trimmed = tag.strip_prefix('v').unwrap_or(tag);
    Version::parse(trimmed).ok()
}

/// Return the tag with the highest semantic version.
///
/// Tags that do not parse (`latest`, `main`, ...) are ignored. Returns
/// `None` when nothing parses. Ordering follows semver precedence, so build
/// metadata is ignored; when two distinct tags have equal precedence
/// (`1.0.0`, `v1.0.0`, `1.0.0+build.5`), the first one listed wins.
pub fn latest_semver<S: AsRef<str>>(tags: &[S]) -> Option<String> {
    let mut best: Option<(Version, &str)> = None;

    for tag in tags {
        let tag = tag.as_ref();
        let Some(version) = parse_semver_tag(tag) else {
            continue;
        };
        let newer = match &best {
            Some((current, _)) => version.cmp_precedence(current) == Ordering::Greater,
            None => true,
        };
        if newer {
            best = Some((version, tag));
        }
    }

    best.map(|(_, tag)| tag.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_highest_release() {
        assert_eq!(latest_semver(&["1.0.0", "2.1.0", "1.5.3"]), Some("2.1.0".to_string()));
    }

    #[test]
    fn test_no_semver_tags() {
        assert_eq!(latest_semver(&["latest", "dev"]), None);
    }

    #[test]
    fn test_empty_input() {
        let tags: Vec<String> = Vec::new();
        assert_eq!(latest_semver(&tags), None);
    }

    #[test]
    fn test_v_prefix_preserved() {
        assert_eq!(latest_semver(&["v1.0.0", "v2.0.0"]), Some("v2.0.0".to_string()));
    }

    #[test]
    fn test_non_semver_ignored() {
        assert_eq!(
            latest_semver(&["latest", "v0.3.1", "main", "0.10.0", "1.2"]),
            Some("0.10.0".to_string())
        );
    }

    #[test]
    fn test_prerelease_precedence() {
        // A pre-release of a higher version beats a lower release...
        assert_eq!(
            latest_semver(&["1.9.0", "2.0.0-rc.1"]),
            Some("2.0.0-rc.1".to_string())
        );
        // ...but sorts below its own release.
        assert_eq!(
            latest_semver(&["2.0.0-rc.1", "2.0.0", "2.0.0-beta.2"]),
            Some("2.0.0".to_string())
        );
    }

    #[test]
    fn test_equal_versions_keep_first() {
        assert_eq!(latest_semver(&["v1.0.0", "1.0.0"]), Some("v1.0.0".to_string()));
    }

    #[test]
    fn test_build_metadata_does_not_outrank() {
        assert_eq!(latest_semver(&["1.0.0", "1.0.0+b"]), Some("1.0.0".to_string()));
        assert_eq!(latest_semver(&["1.0.0+b", "1.0.0"]), Some("1.0.0+b".to_string()));
        assert_eq!(latest_semver(&["1.0.0+zzz", "1.0.1"]), Some("1.0.1".to_string()));
    }
}

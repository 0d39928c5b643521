use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Environment variable holding a base64-encoded Docker config JSON blob.
pub const DEFAULT_AUTH_ENV_VAR: &str = "KLAUS_REGISTRY_AUTH";

/// Default number of concurrent per-source lookups when listing artifacts.
pub const DEFAULT_LIST_CONCURRENCY: usize = 4;

/// Registry access configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OciConfig {
    /// Environment variable consulted first for credentials
    pub auth_env_var: String,

    /// Docker config file (`~/.docker/config.json`)
    pub docker_config_path: Option<PathBuf>,

    /// Podman auth file (`$XDG_RUNTIME_DIR/containers/auth.json`)
    pub podman_auth_path: Option<PathBuf>,

    /// Registries reached over plain HTTP (e.g. "localhost:5000")
    pub insecure_registries: Vec<String>,

    /// Upper bound for a single pull or push, in seconds
    pub operation_timeout_secs: Option<u64>,

    /// Worker bound for multi-source listing
    pub list_concurrency: usize,
}

impl Default for OciConfig {
    fn default() -> Self {
        Self {
            auth_env_var: DEFAULT_AUTH_ENV_VAR.to_string(),
            docker_config_path: default_docker_config_path(),
            podman_auth_path: default_podman_auth_path(),
            insecure_registries: Vec::new(),
            operation_timeout_secs: None,
            list_concurrency: DEFAULT_LIST_CONCURRENCY,
        }
    }
}

impl OciConfig {
    /// Per-operation timeout, if configured
    pub fn operation_timeout(&self) -> Option<Duration> {
        self.operation_timeout_secs
            .filter(|secs| *secs > 0)
            .map(Duration::from_secs)
    }

    /// Whether `host` should be contacted over plain HTTP
    pub fn is_insecure(&self, host: &str) -> bool {
        self.insecure_registries.iter().any(|r| r == host)
    }
}

/// `$DOCKER_CONFIG/config.json`, falling back to `~/.docker/config.json`.
fn default_docker_config_path() -> Option<PathBuf> {
    if let Some(dir) = std::env::var_os("DOCKER_CONFIG") {
        return Some(PathBuf::from(dir).join("config.json"));
    }
    dirs::home_dir().map(|home| home.join(".docker").join("config.json"))
}

fn default_podman_auth_path() -> Option<PathBuf> {
    std::env::var_os("XDG_RUNTIME_DIR")
        .map(|dir| PathBuf::from(dir).join("containers").join("auth.json"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OciConfig::default();
        assert_eq!(config.auth_env_var, "KLAUS_REGISTRY_AUTH");
        assert_eq!(config.list_concurrency, 4);
        assert!(config.insecure_registries.is_empty());
        assert!(config.operation_timeout().is_none());
    }

    #[test]
    fn test_operation_timeout() {
        let config = OciConfig {
            operation_timeout_secs: Some(30),
            ..Default::default()
        };
        assert_eq!(config.operation_timeout(), Some(Duration::from_secs(30)));

        let zero = OciConfig {
            operation_timeout_secs: Some(0),
            ..Default::default()
        };
        assert!(zero.operation_timeout().is_none());
    }

    #[test]
    fn test_is_insecure() {
        let config = OciConfig {
            insecure_registries: vec!["localhost:5000".to_string()],
            ..Default::default()
        };
        assert!(config.is_insecure("localhost:5000"));
        assert!(!config.is_insecure("ghcr.io"));
    }

    #[test]
    fn test_deserialize_partial() {
        let config: OciConfig =
            serde_json::from_str(r#"{"insecure_registries": ["localhost:5000"]}"#).unwrap();
        assert_eq!(config.insecure_registries, vec!["localhost:5000"]);
        assert_eq!(config.auth_env_var, DEFAULT_AUTH_ENV_VAR);
        assert_eq!(config.list_concurrency, DEFAULT_LIST_CONCURRENCY);
    }
}

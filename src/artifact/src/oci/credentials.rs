//! Registry credential resolution.
//!
//! Credentials are looked up per registry host from an ordered list of
//! sources, mirroring container-runtime conventions:
//!
//! 1. A base64-encoded Docker config JSON blob in an environment variable
//! 2. The Docker config file (`~/.docker/config.json`)
//! 3. The Podman auth file (`$XDG_RUNTIME_DIR/containers/auth.json`)
//! 4. Anonymous access
//!
//! A source that is missing or malformed is skipped. Resolution never fails.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use klaus_core::config::OciConfig;
use oci_distribution::secrets::RegistryAuth as OciRegistryAuth;
use parking_lot::Mutex;
use serde::Deserialize;

/// Credentials for a single registry host.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    username: Option<String>,
    password: Option<String>,
}

// Never print the password.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl Credential {
    /// Create anonymous authentication (no credentials).
    pub fn anonymous() -> Self {
        Self {
            username: None,
            password: None,
        }
    }

    /// Create basic authentication with username and password.
    pub fn basic(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: Some(username.into()),
            password: Some(password.into()),
        }
    }

    pub fn is_anonymous(&self) -> bool {
        self.username.is_none()
    }

    pub fn username(&self) -> Option<&str> {
        self.username.as_deref()
    }

    pub fn password(&self) -> Option<&str> {
        self.password.as_deref()
    }

    /// Convert to oci-distribution auth type.
    pub(crate) fn to_oci_auth(&self) -> OciRegistryAuth {
        match (&self.username, &self.password) {
            (Some(u), Some(p)) => OciRegistryAuth::Basic(u.clone(), p.clone()),
            _ => OciRegistryAuth::Anonymous,
        }
    }
}

/// One step of the credential chain.
pub trait CredentialSource: Send + Sync {
    /// Short label used in logs.
    fn name(&self) -> &str;

    /// Credentials for `hostport`, or `None` to fall through.
    fn lookup(&self, hostport: &str) -> Option<Credential>;
}

/// Docker config JSON blob held in an environment variable.
pub struct EnvConfigSource {
    var: String,
}

impl EnvConfigSource {
    pub fn new(var: impl Into<String>) -> Self {
        Self { var: var.into() }
    }
}

impl CredentialSource for EnvConfigSource {
    fn name(&self) -> &str {
        &self.var
    }

    fn lookup(&self, hostport: &str) -> Option<Credential> {
        let encoded = std::env::var(&self.var).ok()?;
        let decoded = match STANDARD.decode(encoded.trim()) {
            Ok(d) => d,
            Err(e) => {
                tracing::debug!(var = %self.var, error = %e, "Ignoring undecodable auth blob");
                return None;
            }
        };
        lookup_in_config(&decoded, hostport, &self.var)
    }
}

/// Docker/Podman `auths` file on disk.
pub struct AuthFileSource {
    name: String,
    path: PathBuf,
}

impl AuthFileSource {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
        }
    }
}

impl CredentialSource for AuthFileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn lookup(&self, hostport: &str) -> Option<Credential> {
        let data = std::fs::read(&self.path).ok()?;
        lookup_in_config(&data, hostport, &self.name)
    }
}

#[derive(Debug, Default, Deserialize)]
struct AuthConfigFile {
    #[serde(default)]
    auths: HashMap<String, AuthEntry>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl AuthEntry {
    fn credential(&self) -> Option<Credential> {
        if let Some(auth) = self.auth.as_deref().filter(|a| !a.is_empty()) {
            let decoded = STANDARD.decode(auth.trim()).ok()?;
            let decoded = String::from_utf8(decoded).ok()?;
            // Passwords may contain colons; only the first one separates.
            let (user, pass) = decoded.split_once(':')?;
            return Some(Credential::basic(user, pass));
        }
        match (&self.username, &self.password) {
            (Some(u), Some(p)) if !u.is_empty() => Some(Credential::basic(u, p)),
            _ => None,
        }
    }
}

/// Look up `hostport` in a Docker-style `auths` document, trying the exact
/// key first and then the host with its port stripped.
fn lookup_in_config(data: &[u8], hostport: &str, source: &str) -> Option<Credential> {
    let file: AuthConfigFile = match serde_json::from_slice(data) {
        Ok(f) => f,
        Err(e) => {
            tracing::debug!(source, error = %e, "Ignoring malformed auth config");
            return None;
        }
    };

    if let Some(cred) = file.auths.get(hostport).and_then(AuthEntry::credential) {
        return Some(cred);
    }

    let (host, _port) = hostport.rsplit_once(':')?;
    file.auths.get(host).and_then(AuthEntry::credential)
}

/// Ordered credential chain with a per-host cache.
pub struct CredentialResolver {
    sources: Vec<Box<dyn CredentialSource>>,
    cache: Mutex<HashMap<String, Credential>>,
}

impl CredentialResolver {
    /// Build the standard chain from configuration.
    pub fn from_config(config: &OciConfig) -> Self {
        let mut sources: Vec<Box<dyn CredentialSource>> =
            vec![Box::new(EnvConfigSource::new(config.auth_env_var.clone()))];
        if let Some(path) = &config.docker_config_path {
            sources.push(Box::new(AuthFileSource::new("docker", path.clone())));
        }
        if let Some(path) = &config.podman_auth_path {
            sources.push(Box::new(AuthFileSource::new("podman", path.clone())));
        }
        Self::with_sources(sources)
    }

    /// Build a chain from explicit sources, tried in order.
    pub fn with_sources(sources: Vec<Box<dyn CredentialSource>>) -> Self {
        Self {
            sources,
            cache: Mutex::new(HashMap::new()),
        }
    }

    /// Resolve credentials for a registry host (optionally with port).
    pub fn resolve(&self, hostport: &str) -> Credential {
        if let Some(cached) = self.cache.lock().get(hostport) {
            return cached.clone();
        }

        let credential = self
            .sources
            .iter()
            .find_map(|source| {
                source.lookup(hostport).map(|cred| {
                    tracing::debug!(host = hostport, source = source.name(), "Using registry credentials");
                    cred
                })
            })
            .unwrap_or_else(Credential::anonymous);

        self.cache
            .lock()
            .insert(hostport.to_string(), credential.clone());
        credential
    }

    /// Forget cached credentials, e.g. after a login changed them.
    pub fn clear_cache(&self) {
        self.cache.lock().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_debug_redacts_password() {
        let credential = Credential::basic("robot", "s3cr3t:with-colon");
        let printed = format!("{:?}", credential);
        assert!(printed.contains("robot"));
        assert!(printed.contains("<redacted>"));
        assert!(!printed.contains("s3cr3t"));

        let anonymous = format!("{:?}", Credential::anonymous());
        assert!(anonymous.contains("None"));
        assert!(!anonymous.contains("<redacted>"));
    }

    fn encode(user_pass: &str) -> String {
        STANDARD.encode(user_pass)
    }

    fn auths_json(entries: &[(&str, &str)]) -> String {
        let auths: serde_json::Map<String, serde_json::Value> = entries
            .iter()
            .map(|(host, up)| (host.to_string(), serde_json::json!({ "auth": encode(up) })))
            .collect();
        serde_json::json!({ "auths": auths }).to_string()
    }

    fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_exact_host_port_match() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "config.json",
            &auths_json(&[("localhost:5000", "a:b"), ("localhost", "c:d")]),
        );
        let source = AuthFileSource::new("docker", path);
        assert_eq!(source.lookup("localhost:5000"), Some(Credential::basic("a", "b")));
    }

    #[test]
    fn test_falls_back_to_bare_host() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "config.json", &auths_json(&[("registry.io", "user:pass")]));
        let source = AuthFileSource::new("docker", path);
        assert_eq!(source.lookup("registry.io:443"), Some(Credential::basic("user", "pass")));
        assert_eq!(source.lookup("other.io"), None);
    }

    #[test]
    fn test_password_with_colons() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "config.json", &auths_json(&[("ghcr.io", "user:pa:ss:word")]));
        let source = AuthFileSource::new("docker", path);
        let cred = source.lookup("ghcr.io").unwrap();
        assert_eq!(cred.username(), Some("user"));
        assert_eq!(cred.password(), Some("pa:ss:word"));
    }

    #[test]
    fn test_username_password_fields() {
        let dir = TempDir::new().unwrap();
        let path = write_file(
            &dir,
            "auth.json",
            r#"{"auths": {"quay.io": {"username": "u", "password": "p"}}}"#,
        );
        let source = AuthFileSource::new("podman", path);
        assert_eq!(source.lookup("quay.io"), Some(Credential::basic("u", "p")));
    }

    #[test]
    fn test_malformed_file_falls_through() {
        let dir = TempDir::new().unwrap();
        let broken = write_file(&dir, "broken.json", "{ not json");
        let bad_auth = write_file(
            &dir,
            "bad.json",
            r#"{"auths": {"ghcr.io": {"auth": "!!!not-base64!!!"}}}"#,
        );
        let good = write_file(&dir, "good.json", &auths_json(&[("ghcr.io", "ok:yes")]));

        let resolver = CredentialResolver::with_sources(vec![
            Box::new(AuthFileSource::new("broken", broken)),
            Box::new(AuthFileSource::new("bad", bad_auth)),
            Box::new(AuthFileSource::new("good", good)),
        ]);
        assert_eq!(resolver.resolve("ghcr.io"), Credential::basic("ok", "yes"));
    }

    #[test]
    fn test_missing_sources_yield_anonymous() {
        let dir = TempDir::new().unwrap();
        let resolver = CredentialResolver::with_sources(vec![
            Box::new(EnvConfigSource::new("KLAUS_TEST_AUTH_UNSET_VARIABLE")),
            Box::new(AuthFileSource::new("docker", dir.path().join("missing.json"))),
        ]);
        let cred = resolver.resolve("ghcr.io");
        assert!(cred.is_anonymous());
        assert!(matches!(cred.to_oci_auth(), OciRegistryAuth::Anonymous));
    }

    #[test]
    fn test_env_blob_preferred_over_docker_config() {
        let dir = TempDir::new().unwrap();
        let docker = write_file(&dir, "config.json", &auths_json(&[("ghcr.io", "file:secret")]));
        let var = "KLAUS_TEST_AUTH_PREFERS_ENV";
        std::env::set_var(var, STANDARD.encode(auths_json(&[("ghcr.io", "env:secret")])));

        let resolver = CredentialResolver::with_sources(vec![
            Box::new(EnvConfigSource::new(var)),
            Box::new(AuthFileSource::new("docker", docker)),
        ]);
        assert_eq!(resolver.resolve("ghcr.io"), Credential::basic("env", "secret"));
        std::env::remove_var(var);
    }

    #[test]
    fn test_env_blob_without_host_falls_through() {
        let dir = TempDir::new().unwrap();
        let docker = write_file(&dir, "config.json", &auths_json(&[("ghcr.io", "file:secret")]));
        let var = "KLAUS_TEST_AUTH_OTHER_HOST";
        std::env::set_var(var, STANDARD.encode(auths_json(&[("quay.io", "env:secret")])));

        let resolver = CredentialResolver::with_sources(vec![
            Box::new(EnvConfigSource::new(var)),
            Box::new(AuthFileSource::new("docker", docker)),
        ]);
        assert_eq!(resolver.resolve("ghcr.io"), Credential::basic("file", "secret"));
        std::env::remove_var(var);
    }

    #[test]
    fn test_resolution_is_cached_until_cleared() {
        let dir = TempDir::new().unwrap();
        let path = write_file(&dir, "config.json", &auths_json(&[("ghcr.io", "one:1")]));
        let resolver =
            CredentialResolver::with_sources(vec![Box::new(AuthFileSource::new("docker", path.clone()))]);

        assert_eq!(resolver.resolve("ghcr.io"), Credential::basic("one", "1"));
        std::fs::write(&path, auths_json(&[("ghcr.io", "two:2")])).unwrap();
        assert_eq!(resolver.resolve("ghcr.io"), Credential::basic("one", "1"));

        resolver.clear_cache();
        assert_eq!(resolver.resolve("ghcr.io"), Credential::basic("two", "2"));
    }

    #[test]
    fn test_to_oci_auth_basic() {
        let cred = Credential::basic("user", "pass");
        assert!(matches!(cred.to_oci_auth(), OciRegistryAuth::Basic(_, _)));
    }
}

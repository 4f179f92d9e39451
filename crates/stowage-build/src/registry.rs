//! Registry access for manifest verification and session detection.

use async_trait::async_trait;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::RegistryError;

#[async_trait]
pub trait RegistryClient: Send + Sync {
    /// Platforms (`os/arch[/variant]`) published under `reference`.
    async fn inspect_platforms(&self, reference: &str) -> Result<Vec<String>, RegistryError>;

    /// Whether the client holds credentials for `registry`.
    fn has_session(&self, registry: &str) -> bool;
}

/// Uses `docker buildx imagetools inspect --raw` and the docker client config.
#[derive(Debug, Clone)]
pub struct DockerImagetools {
    program: String,
    config_dir: Option<PathBuf>,
}

impl Default for DockerImagetools {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerImagetools {
    pub fn new() -> Self {
        Self {
            program: "docker".to_string(),
            config_dir: None,
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Read credentials from `dir/config.json` instead of the default location.
    pub fn with_config_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config_dir = Some(dir.into());
        self
    }

    fn config_path(&self) -> Option<PathBuf> {
        if let Some(dir) = &self.config_dir {
            return Some(dir.join("config.json"));
        }
        if let Some(dir) = std::env::var_os("DOCKER_CONFIG") {
            return Some(Path::new(&dir).join("config.json"));
        }
        std::env::var_os("HOME").map(|home| Path::new(&home).join(".docker").join("config.json"))
    }
}

#[async_trait]
impl RegistryClient for DockerImagetools {
    async fn inspect_platforms(&self, reference: &str) -> Result<Vec<String>, RegistryError> {
        debug!(reference = %reference, "inspecting manifest");
        let output = Command::new(&self.program)
            .args(["buildx", "imagetools", "inspect", "--raw", reference])
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|source| RegistryError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(RegistryError::Query {
                reference: reference.to_string(),
                detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let raw: Value = serde_json::from_slice(&output.stdout).map_err(|e| RegistryError::Manifest {
            reference: reference.to_string(),
            detail: e.to_string(),
        })?;
        platforms_from_index(&raw).ok_or_else(|| RegistryError::Manifest {
            reference: reference.to_string(),
            detail: "not a multi-platform index".to_string(),
        })
    }

    fn has_session(&self, registry: &str) -> bool {
        let Some(path) = self.config_path() else {
            return false;
        };
        let Ok(contents) = std::fs::read_to_string(&path) else {
            debug!(path = %path.display(), "no docker client config");
            return false;
        };
        serde_json::from_str::<Value>(&contents)
            .map(|config| config_has_session(&config, registry))
            .unwrap_or(false)
    }
}

/// Platforms listed in an OCI index or docker manifest list. Attestation
/// entries (`unknown/unknown`) are dropped. `None` when `raw` is a single
/// image manifest.
pub fn platforms_from_index(raw: &Value) -> Option<Vec<String>> {
    let manifests = raw.get("manifests")?.as_array()?;
    Some(
        manifests
            .iter()
            .filter_map(|m| m.get("platform"))
            .filter_map(|p| {
                let os = p.get("os")?.as_str()?;
                let arch = p.get("architecture")?.as_str()?;
                if os == "unknown" || arch == "unknown" {
                    return None;
                }
                Some(match p.get("variant").and_then(Value::as_str) {
                    Some(variant) => format!("{}/{}/{}", os, arch, variant),
                    None => format!("{}/{}", os, arch),
                })
            })
            .collect(),
    )
}

/// Whether a docker client config holds credentials usable for `registry`.
pub fn config_has_session(config: &Value, registry: &str) -> bool {
    let wanted = registry_host(registry);
    let names_registry = |key: &str| registry_host(key) == wanted;

    let in_auths = config
        .get("auths")
        .and_then(Value::as_object)
        .is_some_and(|auths| auths.keys().any(|k| names_registry(k)));
    let in_helpers = config
        .get("credHelpers")
        .and_then(Value::as_object)
        .is_some_and(|helpers| helpers.keys().any(|k| names_registry(k)));
    let has_store = config
        .get("credsStore")
        .and_then(Value::as_str)
        .is_some_and(|s| !s.is_empty());

    in_auths || in_helpers || has_store
}

fn registry_host(value: &str) -> String {
    let trimmed = value
        .trim()
        .trim_start_matches("https://")
        .trim_start_matches("http://");
    let host = trimmed.split('/').next().unwrap_or(trimmed).to_ascii_lowercase();
    match host.as_str() {
        "index.docker.io" | "registry-1.docker.io" => "docker.io".to_string(),
        _ => host,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_platforms_from_index() {
        let raw = json!({
            "mediaType": "application/vnd.oci.image.index.v1+json",
            "manifests": [
                {"digest": "sha256:a", "platform": {"os": "linux", "architecture": "amd64"}},
                {"digest": "sha256:b", "platform": {"os": "linux", "architecture": "arm64", "variant": "v8"}},
                {"digest": "sha256:c", "platform": {"os": "unknown", "architecture": "unknown"}}
            ]
        });
        assert_eq!(
            platforms_from_index(&raw).unwrap(),
            vec!["linux/amd64", "linux/arm64/v8"]
        );
    }

    #[test]
    fn test_single_manifest_has_no_platform_list() {
        let raw = json!({"mediaType": "application/vnd.oci.image.manifest.v1+json", "layers": []});
        assert!(platforms_from_index(&raw).is_none());
    }

    #[test]
    fn test_session_from_auths() {
        let config = json!({"auths": {"ghcr.io": {"auth": "xyz"}}});
        assert!(config_has_session(&config, "ghcr.io"));
        assert!(!config_has_session(&config, "quay.io"));

        let hub = json!({"auths": {"https://index.docker.io/v1/": {}}});
        assert!(config_has_session(&hub, "docker.io"));
    }

    #[test]
    fn test_session_from_helpers_and_store() {
        assert!(config_has_session(&json!({"credHelpers": {"gcr.io": "gcloud"}}), "gcr.io"));
        assert!(config_has_session(&json!({"credsStore": "desktop"}), "ghcr.io"));
        assert!(!config_has_session(&json!({}), "ghcr.io"));
    }

    #[test]
    fn test_has_session_reads_config_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let client = DockerImagetools::new().with_config_dir(dir.path());
        assert!(!client.has_session("ghcr.io"));

        std::fs::write(dir.path().join("config.json"), r#"{"auths":{"ghcr.io":{}}}"#).unwrap();
        assert!(client.has_session("ghcr.io"));
    }

    #[tokio::test]
    async fn test_failed_inspect_is_query_error() {
        let client = DockerImagetools::new().with_program("false");
        let err = client.inspect_platforms("ghcr.io/acme/api:latest").await.unwrap_err();
        assert!(matches!(err, RegistryError::Query { .. }));
    }
}

//! The external image builder.
//!
//! [`ImageBuilder`] is the seam the orchestrator drives; [`DockerBuildx`] is
//! the production implementation. Timeouts and cancellation are applied by
//! the caller by dropping the returned future, which kills the child process.

use async_trait::async_trait;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

use crate::error::BuildError;
use crate::request::BuildRequest;

/// What a successful build reported back.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildOutcome {
    /// Manifest digest, present when the image was pushed.
    pub digest: Option<String>,
    /// Last lines of builder output, for the report.
    pub log_tail: String,
}

#[async_trait]
pub trait ImageBuilder: Send + Sync {
    async fn build(&self, request: &BuildRequest) -> Result<BuildOutcome, BuildError>;
}

/// Drives `docker buildx build`.
#[derive(Debug, Clone)]
pub struct DockerBuildx {
    program: String,
    builder_instance: Option<String>,
}

impl Default for DockerBuildx {
    fn default() -> Self {
        Self::new()
    }
}

impl DockerBuildx {
    pub fn new() -> Self {
        Self {
            program: "docker".to_string(),
            builder_instance: None,
        }
    }

    /// Use another executable in place of `docker`.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Select a named buildx builder instance.
    pub fn with_builder_instance(mut self, name: impl Into<String>) -> Self {
        self.builder_instance = Some(name.into());
        self
    }

    /// Arguments passed to the program for `request`.
    pub fn command_args(&self, request: &BuildRequest, metadata_file: &Path) -> Vec<String> {
        let mut args = vec!["buildx".to_string(), "build".to_string()];
        if let Some(instance) = &self.builder_instance {
            args.push("--builder".into());
            args.push(instance.clone());
        }
        args.push("--platform".into());
        args.push(request.platform_strings().join(","));
        args.push("--file".into());
        args.push(request.descriptor().display().to_string());
        for tag in request.tags() {
            args.push("--tag".into());
            args.push(tag.clone());
        }
        if request.no_cache() {
            args.push("--no-cache".into());
        }
        if request.push() {
            args.push("--push".into());
        }
        args.push("--progress".into());
        args.push("plain".into());
        args.push("--metadata-file".into());
        args.push(metadata_file.display().to_string());
        args.push(request.context().display().to_string());
        args
    }
}

#[async_trait]
impl ImageBuilder for DockerBuildx {
    async fn build(&self, request: &BuildRequest) -> Result<BuildOutcome, BuildError> {
        let metadata = tempfile::Builder::new()
            .prefix("stowage-build-")
            .suffix(".json")
            .tempfile()?;
        let args = self.command_args(request, metadata.path());
        debug!(unit = %request.unit(), program = %self.program, args = ?args, "invoking builder");

        let mut command = Command::new(&self.program);
        command.args(&args).stdin(Stdio::null()).kill_on_drop(true);
        if request.verbose() {
            command.stdout(Stdio::inherit()).stderr(Stdio::inherit());
        } else {
            command.stdout(Stdio::piped()).stderr(Stdio::piped());
        }

        let child = command.spawn().map_err(|source| BuildError::Spawn {
            program: self.program.clone(),
            source,
        })?;
        let output = child.wait_with_output().await?;
        let stderr = String::from_utf8_lossy(&output.stderr);

        if !output.status.success() {
            return Err(BuildError::Exited {
                status: output.status.to_string(),
                detail: failure_detail(&stderr),
            });
        }

        Ok(BuildOutcome {
            digest: read_digest(metadata.path())?,
            log_tail: tail_lines(&stderr, 20),
        })
    }
}

/// `containerimage.digest` from a buildx metadata file. An empty or absent
/// file yields `None`.
pub fn read_digest(path: &Path) -> Result<Option<String>, BuildError> {
    let contents = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    if contents.trim().is_empty() {
        return Ok(None);
    }
    let value: serde_json::Value =
        serde_json::from_str(&contents).map_err(|e| BuildError::Metadata(e.to_string()))?;
    Ok(value
        .get("containerimage.digest")
        .and_then(|d| d.as_str())
        .map(str::to_string))
}

/// The most useful line of builder stderr: the last `ERROR` line, else the
/// last non-empty one.
fn failure_detail(stderr: &str) -> String {
    let lines: Vec<&str> = stderr.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    lines
        .iter()
        .rev()
        .find(|l| l.contains("ERROR"))
        .or_else(|| lines.last())
        .map(|l| l.to_string())
        .unwrap_or_else(|| "no output".to_string())
}

fn tail_lines(text: &str, n: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    let start = lines.len().saturating_sub(n);
    lines[start..].join("\n")
}

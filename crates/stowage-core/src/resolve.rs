//! Copy-source path resolution.
//!
//! Relative sources resolve against the directory holding the descriptor, not
//! against the build context root. This is the working assumption for every
//! unit unless the run is configured with [`ResolutionMode::ContextRoot`], in
//! which case the unit's context directory takes the descriptor directory's
//! place in the rules below.
//!
//! Rules, first match wins:
//! 1. `--from=` (stage alias or external image) → stage-local, no path
//! 2. operand contains a variable → unresolved, no path
//! 3. `ADD` of a URL → remote, no path
//! 4. `../x` → `parent(base)/x`
//! 5. `./x` or `x` → `base/x`
//! 6. `/x` → `/x`

use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::path::{Component, Path, PathBuf};

use crate::domain::{BuildUnit, CopyInstruction, CopyKind, CopySource, StageRef};

/// Which directory relative copy sources are anchored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResolutionMode {
    #[default]
    Descriptor,
    ContextRoot,
}

/// A filesystem location a copy source must exist at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedPath {
    /// Operand as written in the descriptor.
    pub source: String,
    pub path: PathBuf,
    /// The source contains glob metacharacters.
    pub is_glob: bool,
    /// Glob pattern to match when `is_glob`: the anchor directory escaped,
    /// the operand left live.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
}

/// How a single copy source was classified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    StageLocal(StageRef),
    Variable,
    Remote,
    Path(ResolvedPath),
}

/// Resolves copy sources for one descriptor.
#[derive(Debug, Clone)]
pub struct PathResolver {
    base: PathBuf,
}

impl PathResolver {
    /// Resolver anchored at `base`, normally the descriptor's directory.
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: normalize(&base.into()),
        }
    }

    pub fn for_unit(unit: &BuildUnit, mode: ResolutionMode) -> Self {
        match mode {
            ResolutionMode::Descriptor => Self::new(unit.descriptor_dir()),
            ResolutionMode::ContextRoot => Self::new(unit.context()),
        }
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Classify one source operand of `copy`.
    pub fn resolve(&self, copy: &CopyInstruction, source: &CopySource) -> Resolution {
        if let Some(stage) = &copy.from_stage {
            return Resolution::StageLocal(stage.clone());
        }
        if source.has_variable {
            return Resolution::Variable;
        }
        if copy.kind == CopyKind::Add && is_remote(&source.path) {
            return Resolution::Remote;
        }
        let glob = is_glob(&source.path);
        Resolution::Path(ResolvedPath {
            source: source.path.clone(),
            path: self.resolve_str(&source.path),
            is_glob: glob,
            pattern: glob.then(|| self.glob_pattern(&source.path)),
        })
    }

    /// Every source of `copy`, classified, in operand order.
    pub fn resolve_all(&self, copy: &CopyInstruction) -> Vec<Resolution> {
        copy.sources.iter().map(|s| self.resolve(copy, s)).collect()
    }

    /// Apply the path rules to a plain source string.
    pub fn resolve_str(&self, source: &str) -> PathBuf {
        if let Some(rest) = source.strip_prefix("../") {
            let parent = self.base.parent().unwrap_or(&self.base);
            normalize(&parent.join(rest))
        } else if Path::new(source).is_absolute() {
            normalize(Path::new(source))
        } else {
            let rest = source.strip_prefix("./").unwrap_or(source);
            normalize(&self.base.join(rest))
        }
    }

    /// Glob pattern for a wildcard source. Only the operand carries glob
    /// syntax; metacharacters in the anchor directory match literally.
    pub fn glob_pattern(&self, source: &str) -> String {
        if Path::new(source).is_absolute() {
            return source.to_string();
        }
        let (anchor, rest) = match source.strip_prefix("../") {
            Some(rest) => (self.base.parent().unwrap_or(&self.base), rest),
            None => (self.base.as_path(), source.strip_prefix("./").unwrap_or(source)),
        };
        let anchor = Pattern::escape(&anchor.to_string_lossy());
        format!("{}/{}", anchor.trim_end_matches('/'), rest)
    }
}

fn is_remote(source: &str) -> bool {
    let lower = source.to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("git@")
}

fn is_glob(source: &str) -> bool {
    source.contains(['*', '?', '['])
}

/// Lexically normalize `path`: drop `.` and fold `..` without touching the filesystem.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}

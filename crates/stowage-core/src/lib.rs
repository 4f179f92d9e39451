//! stowage core library
//!
//! Discovery, descriptor parsing, path resolution, compliance policy,
//! dependency validation and run reporting. Building and publishing images
//! lives in `stowage-build`.

pub mod config;
pub mod context;
pub mod descriptor;
pub mod discovery;
pub mod domain;
pub mod error;
pub mod obs;
pub mod platform;
pub mod policy;
pub mod report;
pub mod resolve;
pub mod telemetry;
pub mod validate;

pub use config::{
    load_or_default, CachePolicy, ConfigOverrides, PolicyMode, RunConfig, RunMode,
    CONFIG_FILE_NAME,
};
pub use context::{cancellation, CancelHandle, CancelSignal, RunContext};
pub use descriptor::{Descriptor, ParseError};
pub use discovery::{discover, ScanSpec, UnitRegistry, UnitSpec};
pub use domain::{
    BuildResult, BuildStatus, BuildUnit, CopyInstruction, CopyKind, FromInstruction, Instruction,
    IssueKind, SkipReason, StageRef, Tier, ValidationIssue, Verification,
};
pub use error::{DiscoveryError, Result, StowageError};
pub use platform::Platform;
pub use policy::{ComplianceVerdict, ComplianceViolation, PolicyRule, PolicySet};
pub use report::{ReportCollector, RunMeta, RunReport};
pub use resolve::{PathResolver, Resolution, ResolutionMode, ResolvedPath};
pub use validate::{validate_units, SourceStats, UnitValidation};

pub use obs::{
    emit_build_dispatched, emit_build_finished, emit_run_finished, emit_run_started,
    emit_verify_finished, run_span, RunSpan,
};
pub use telemetry::init_tracing;

/// stowage version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! Errors raised while building images or querying a registry.
//!
//! Both are unit-scoped: the orchestrator turns a [`BuildError`] into a
//! `Failed` result and the verifier turns a [`RegistryError`] into a
//! verification annotation. Neither aborts the run.

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("builder exited with {status}: {detail}")]
    Exited { status: String, detail: String },

    #[error("timed out after {}s", .0.as_secs())]
    TimedOut(Duration),

    #[error("cancelled")]
    Cancelled,

    #[error("invalid build request: {0}")]
    InvalidRequest(String),

    #[error("unreadable build metadata: {0}")]
    Metadata(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("failed to start {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("inspect of {reference} failed: {detail}")]
    Query { reference: String, detail: String },

    #[error("unexpected manifest for {reference}: {detail}")]
    Manifest { reference: String, detail: String },
}

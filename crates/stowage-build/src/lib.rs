//! stowage build
//!
//! Turns validated build units into published multi-platform images:
//! - builds one immutable request per unit
//! - dispatches them fail-fast or with bounded parallelism
//! - verifies pushed manifests against the requested platforms

pub mod builder;
pub mod error;
pub mod fakes;
pub mod orchestrator;
pub mod pipeline;
pub mod registry;
pub mod request;
pub mod verifier;

pub use builder::{BuildOutcome, DockerBuildx, ImageBuilder};
pub use error::{BuildError, RegistryError};
pub use orchestrator::Orchestrator;
pub use pipeline::Pipeline;
pub use registry::{DockerImagetools, RegistryClient};
pub use request::{BuildRequest, BuildRequestBuilder};
pub use verifier::ManifestVerifier;

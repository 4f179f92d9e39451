//! Post-push manifest verification.
//!
//! A pushed unit's canonical tag is inspected and its published platforms
//! compared, normalized, with the requested ones. The outcome is attached as
//! an annotation; a failed verification never turns a success into a failure.

use futures::future::join_all;
use std::sync::Arc;
use tracing::debug;

use stowage_core::platform::missing_platforms;
use stowage_core::{emit_verify_finished, BuildResult, Platform, Verification};

use crate::registry::RegistryClient;

pub struct ManifestVerifier {
    registry: Arc<dyn RegistryClient>,
}

impl ManifestVerifier {
    pub fn new(registry: Arc<dyn RegistryClient>) -> Self {
        Self { registry }
    }

    /// Verify one result. Results that were not pushed pass through unchanged.
    pub async fn verify(&self, result: BuildResult) -> BuildResult {
        if !result.is_succeeded() || !result.pushed {
            return result;
        }
        let Some(tag) = result.canonical_tag().map(str::to_string) else {
            return result;
        };

        let requested: Vec<Platform> = result
            .platforms
            .iter()
            .filter_map(|p| p.parse().ok())
            .collect();

        let verification = match self.registry.inspect_platforms(&tag).await {
            Ok(available) => {
                debug!(unit = %result.unit, tag = %tag, available = ?available, "manifest inspected");
                let missing = missing_platforms(&requested, &available);
                if missing.is_empty() {
                    Verification::Verified {
                        platforms: requested.iter().map(ToString::to_string).collect(),
                    }
                } else {
                    let names: Vec<String> = missing.iter().map(ToString::to_string).collect();
                    Verification::VerificationFailed {
                        reason: format!("{} is missing platforms: {}", tag, names.join(", ")),
                    }
                }
            }
            Err(e) => Verification::VerificationFailed {
                reason: e.to_string(),
            },
        };

        emit_verify_finished(&result.unit, &verification);
        result.with_verification(verification)
    }

    /// Verify every result concurrently, preserving order.
    pub async fn verify_all(&self, results: Vec<BuildResult>) -> Vec<BuildResult> {
        join_all(results.into_iter().map(|r| self.verify(r))).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::StaticRegistry;
    use stowage_core::SkipReason;

    fn pushed(unit: &str) -> BuildResult {
        BuildResult::succeeded(
            unit,
            vec!["linux/amd64".into(), "linux/arm64".into()],
            vec![format!("ghcr.io/acme/{}:latest", unit)],
            true,
            Some(format!("ghcr.io/acme/{}@sha256:abc", unit)),
            10,
        )
    }

    #[tokio::test]
    async fn test_all_platforms_present() {
        let registry = StaticRegistry::new()
            .with_platforms("ghcr.io/acme/api:latest", &["linux/amd64", "linux/arm64/v8"]);
        let verifier = ManifestVerifier::new(Arc::new(registry));
        let result = verifier.verify(pushed("api")).await;
        assert!(matches!(result.verification, Verification::Verified { .. }));
    }

    #[tokio::test]
    async fn test_missing_platform_is_annotation_only() {
        let registry = StaticRegistry::new().with_platforms("ghcr.io/acme/api:latest", &["linux/amd64"]);
        let verifier = ManifestVerifier::new(Arc::new(registry));
        let result = verifier.verify(pushed("api")).await;
        assert!(result.is_succeeded());
        match &result.verification {
            Verification::VerificationFailed { reason } => assert!(reason.contains("linux/arm64")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_query_error_is_annotation_only() {
        let verifier = ManifestVerifier::new(Arc::new(StaticRegistry::new()));
        let result = verifier.verify(pushed("api")).await;
        assert!(result.is_succeeded());
        assert!(result.verification.is_failed());
    }

    #[tokio::test]
    async fn test_unpushed_and_skipped_are_untouched() {
        let verifier = ManifestVerifier::new(Arc::new(StaticRegistry::new()));
        let local = BuildResult::succeeded("api", vec!["linux/amd64".into()], vec!["api:latest".into()], false, None, 1);
        let skipped = BuildResult::skipped("web", SkipReason::Blocked);
        let out = verifier.verify_all(vec![local, skipped]).await;
        assert!(out.iter().all(|r| r.verification == Verification::NotAttempted));
        assert_eq!(out[1].unit, "web");
    }
}

//! In-memory fakes for the builder and registry traits (testing only)
//!
//! `ScriptedBuilder` records every request it receives and fails, stalls or
//! succeeds per unit name. `StaticRegistry` answers manifest queries from a
//! fixed table.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::builder::{BuildOutcome, ImageBuilder};
use crate::error::{BuildError, RegistryError};
use crate::registry::RegistryClient;
use crate::request::BuildRequest;

// ---------------------------------------------------------------------------
// ScriptedBuilder
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct ScriptedBuilder {
    failing: HashSet<String>,
    delays: HashMap<String, Duration>,
    requests: Mutex<Vec<BuildRequest>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

/// Counts a build as in flight until dropped, including when the build
/// future is abandoned on timeout or cancellation.
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize, high_water: &AtomicUsize) -> Self {
        let now = counter.fetch_add(1, Ordering::SeqCst) + 1;
        high_water.fetch_max(now, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds of `unit` exit non-zero.
    pub fn failing(mut self, unit: &str) -> Self {
        self.failing.insert(unit.to_string());
        self
    }

    /// Builds of `unit` take `delay` before completing.
    pub fn delayed(mut self, unit: &str, delay: Duration) -> Self {
        self.delays.insert(unit.to_string(), delay);
        self
    }

    /// Every request received, in dispatch order.
    pub fn requests(&self) -> Vec<BuildRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Most builds ever running at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn dispatched_units(&self) -> Vec<String> {
        self.requests()
            .iter()
            .map(|r| r.unit().to_string())
            .collect()
    }
}

#[async_trait]
impl ImageBuilder for ScriptedBuilder {
    async fn build(&self, request: &BuildRequest) -> Result<BuildOutcome, BuildError> {
        self.requests.lock().unwrap().push(request.clone());
        let _running = InFlight::enter(&self.in_flight, &self.max_in_flight);

        if let Some(delay) = self.delays.get(request.unit()) {
            tokio::time::sleep(*delay).await;
        }

        if self.failing.contains(request.unit()) {
            return Err(BuildError::Exited {
                status: "exit status: 1".to_string(),
                detail: format!("scripted failure for {}", request.unit()),
            });
        }

        Ok(BuildOutcome {
            digest: request.push().then(|| format!("sha256:{:0>64}", request.unit().len())),
            log_tail: String::new(),
        })
    }
}

// ---------------------------------------------------------------------------
// StaticRegistry
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct StaticRegistry {
    manifests: HashMap<String, Vec<String>>,
    sessions: HashSet<String>,
    queries: Mutex<Vec<String>>,
}

impl StaticRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish `platforms` under `reference`.
    pub fn with_platforms(mut self, reference: &str, platforms: &[&str]) -> Self {
        self.manifests.insert(
            reference.to_string(),
            platforms.iter().map(|p| p.to_string()).collect(),
        );
        self
    }

    /// Pretend to hold credentials for `registry`.
    pub fn with_session(mut self, registry: &str) -> Self {
        self.sessions.insert(registry.to_string());
        self
    }

    /// References queried so far.
    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl RegistryClient for StaticRegistry {
    async fn inspect_platforms(&self, reference: &str) -> Result<Vec<String>, RegistryError> {
        self.queries.lock().unwrap().push(reference.to_string());
        self.manifests
            .get(reference)
            .cloned()
            .ok_or_else(|| RegistryError::Query {
                reference: reference.to_string(),
                detail: "manifest unknown".to_string(),
            })
    }

    fn has_session(&self, registry: &str) -> bool {
        self.sessions.contains(registry)
    }
}

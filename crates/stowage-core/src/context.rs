//! Per-run state passed explicitly to every stage of a run.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use crate::config::RunConfig;
use crate::error::Result;

/// Trips the cancellation signal of one run.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        // send_replace never fails, even with no receivers left.
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Receiving side of the cancellation signal.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once the run has been cancelled.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                // Sender dropped without cancelling.
                std::future::pending::<()>().await;
            }
        }
    }
}

/// A linked handle/signal pair.
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle { tx: Arc::new(tx) }, CancelSignal { rx })
}

/// Configuration and identity of one run.
#[derive(Debug, Clone)]
pub struct RunContext {
    root: PathBuf,
    config: Arc<RunConfig>,
    run_id: Uuid,
    config_digest: String,
    cancel: CancelSignal,
}

impl RunContext {
    /// Validate `config` and bind it to a fresh run id.
    pub fn new(root: impl Into<PathBuf>, config: RunConfig, cancel: CancelSignal) -> Result<Self> {
        config.validate()?;
        let config_digest = config.digest()?;
        Ok(Self {
            root: root.into(),
            config: Arc::new(config),
            run_id: Uuid::new_v4(),
            config_digest,
            cancel,
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn config_digest(&self) -> &str {
        &self.config_digest
    }

    pub fn cancel_signal(&self) -> CancelSignal {
        self.cancel.clone()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}

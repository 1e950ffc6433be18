//! Capture cycle orchestration
//!
//! One cycle snapshots the clock, resolves the revision once and runs every
//! invoker in turn. Each capture is stored independently: a failing analyzer,
//! a failing insert or an unresolvable revision never stops the rest of the
//! cycle.

pub mod scheduler;

use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

use crate::app::Config;
use crate::capture::{CommandRunner, Invoker, SystemRunner, ToolError};
use crate::revision::{self, RevisionError, RevisionResolver};
use crate::store::{LogKind, LogStore, StoreError};

pub use scheduler::spawn_scheduler;

/// Result of the revision lookup for one cycle
#[derive(Debug)]
pub enum RevisionOutcome {
    Resolved(String),
    /// Captures went ahead with an empty revision
    Failed(RevisionError),
}

impl RevisionOutcome {
    /// Value written to the `revision` column
    pub fn tag(&self) -> &str {
        match self {
            RevisionOutcome::Resolved(revision) => revision,
            RevisionOutcome::Failed(_) => "",
        }
    }
}

#[derive(Debug)]
pub enum CaptureStatus {
    Stored { bytes: usize },
    /// Analyzer failed; nothing was written for this kind
    ToolFailed(ToolError),
    /// Analyzer succeeded but the row could not be written
    StoreFailed(StoreError),
}

#[derive(Debug)]
pub struct CaptureOutcome {
    pub kind: LogKind,
    pub status: CaptureStatus,
}

impl CaptureOutcome {
    pub fn is_stored(&self) -> bool {
        matches!(self.status, CaptureStatus::Stored { .. })
    }
}

/// What one capture cycle did
#[derive(Debug)]
pub struct CycleReport {
    pub created_at: i64,
    pub revision: RevisionOutcome,
    pub captures: Vec<CaptureOutcome>,
}

impl CycleReport {
    /// Number of rows written by the cycle
    pub fn stored_count(&self) -> usize {
        self.captures.iter().filter(|c| c.is_stored()).count()
    }

    pub fn all_stored(&self) -> bool {
        !self.captures.is_empty() && self.captures.iter().all(CaptureOutcome::is_stored)
    }

    pub fn stored_kinds(&self) -> Vec<&LogKind> {
        self.captures
            .iter()
            .filter(|c| c.is_stored())
            .map(|c| &c.kind)
            .collect()
    }
}

#[derive(Debug)]
pub enum CleanupStatus {
    Removed,
    /// Nothing to remove
    Missing,
    Failed(std::io::Error),
}

#[derive(Debug)]
pub struct CleanupOutcome {
    pub path: PathBuf,
    pub status: CleanupStatus,
}

/// Runs capture cycles against a shared store
pub struct Collector {
    store: Arc<LogStore>,
    runner: Arc<dyn CommandRunner>,
    resolver: Arc<dyn RevisionResolver>,
    invokers: Vec<Invoker>,
    cleanup_paths: Vec<PathBuf>,
}

impl Collector {
    pub fn new(
        store: Arc<LogStore>,
        runner: Arc<dyn CommandRunner>,
        resolver: Arc<dyn RevisionResolver>,
        invokers: Vec<Invoker>,
    ) -> Self {
        Self {
            store,
            runner,
            resolver,
            invokers,
            cleanup_paths: Vec::new(),
        }
    }

    /// Collector wired to the real analyzers and revision backend
    pub fn from_config(config: &Config, store: Arc<LogStore>) -> Self {
        let runner: Arc<dyn CommandRunner> =
            Arc::new(SystemRunner::from_timeout_secs(config.capture.timeout_secs));
        let resolver = revision::resolver_for(
            config.revision.backend,
            runner.clone(),
            &config.revision.git_command,
            &config.repository,
        );

        Self::new(store, runner, resolver, Invoker::from_config(&config.capture))
            .with_cleanup_paths(config.cleanup_paths())
    }

    pub fn with_cleanup_paths(mut self, paths: Vec<PathBuf>) -> Self {
        self.cleanup_paths = paths;
        self
    }

    pub fn invokers(&self) -> &[Invoker] {
        &self.invokers
    }

    /// Run one cycle stamped with the current time
    pub async fn run_cycle(&self) -> CycleReport {
        self.run_cycle_at(chrono::Utc::now().timestamp()).await
    }

    /// Run one cycle whose rows all carry `created_at`
    pub async fn run_cycle_at(&self, created_at: i64) -> CycleReport {
        let revision = match self.resolver.resolve().await {
            Ok(revision) => RevisionOutcome::Resolved(revision),
            Err(e) => {
                warn!("Failed to get revision: {}", e);
                RevisionOutcome::Failed(e)
            }
        };

        let mut captures = Vec::with_capacity(self.invokers.len());
        for invoker in &self.invokers {
            let status = match invoker.capture(self.runner.as_ref()).await {
                Ok(content) => {
                    let bytes = content.len();
                    let kind = invoker.kind().clone();
                    let tag = revision.tag().to_string();
                    let stored = LogStore::blocking(&self.store, move |store| {
                        store.insert(&kind, &content, &tag, created_at)
                    })
                    .await;
                    match stored {
                        Ok(()) => CaptureStatus::Stored { bytes },
                        Err(e) => {
                            warn!("Failed to store {} capture: {}", invoker.kind(), e);
                            CaptureStatus::StoreFailed(e)
                        }
                    }
                }
                Err(e) => {
                    warn!("{}: {}", invoker.kind(), e);
                    CaptureStatus::ToolFailed(e)
                }
            };
            captures.push(CaptureOutcome {
                kind: invoker.kind().clone(),
                status,
            });
        }

        let report = CycleReport {
            created_at,
            revision,
            captures,
        };
        info!(
            "Capture cycle at {} (revision {:?}): {}/{} stored",
            created_at,
            report.revision.tag(),
            report.stored_count(),
            report.captures.len()
        );
        report
    }

    /// Remove the raw log files so the next cycle only sees fresh traffic
    pub fn cleanup(&self) -> Vec<CleanupOutcome> {
        remove_logs(&self.cleanup_paths)
    }

    /// Run a cycle, then clean up if `cleanup` is set and every capture landed
    pub async fn run_cycle_and_cleanup(&self, cleanup: bool) -> CycleReport {
        let report = self.run_cycle().await;
        if cleanup {
            if report.all_stored() {
                self.cleanup();
            } else {
                warn!("Skipping log cleanup: not every capture was stored");
            }
        }
        report
    }
}

/// Delete each of `paths`; a file that is already gone counts as done
pub fn remove_logs(paths: &[PathBuf]) -> Vec<CleanupOutcome> {
    paths
        .iter()
        .map(|path| {
            let status = match std::fs::remove_file(path) {
                Ok(()) => {
                    info!("Removed {}", path.display());
                    CleanupStatus::Removed
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => CleanupStatus::Missing,
                Err(e) => {
                    warn!("Failed to remove {}: {}", path.display(), e);
                    CleanupStatus::Failed(e)
                }
            };
            CleanupOutcome {
                path: path.clone(),
                status,
            }
        })
        .collect()
}

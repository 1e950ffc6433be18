//! Source revision lookup for the tracked checkout
//!
//! Every capture is tagged with the commit that was deployed when it was
//! taken. Resolution failures are reported to the caller, which carries on
//! with an empty revision rather than losing the capture.

use async_trait::async_trait;
use git2::Repository;
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

use crate::capture::{CommandRunner, ToolError};

#[derive(Debug, Error)]
pub enum RevisionError {
    #[error("git failed in {repo}: {source}")]
    Command {
        repo: PathBuf,
        #[source]
        source: ToolError,
    },
    #[error("failed to read HEAD of {repo}: {source}")]
    Libgit2 {
        repo: PathBuf,
        #[source]
        source: git2::Error,
    },
    #[error("no revision reported for {repo}")]
    Empty { repo: PathBuf },
}

/// How the revision of the checkout is read
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RevisionBackend {
    /// `git rev-parse HEAD` as a child process
    #[default]
    Git,
    /// In-process lookup through libgit2
    Libgit2,
}

#[async_trait]
pub trait RevisionResolver: Send + Sync {
    /// Current revision identifier, whitespace-trimmed
    async fn resolve(&self) -> Result<String, RevisionError>;
}

/// Asks the `git` executable for `HEAD`
pub struct GitCommandResolver {
    runner: Arc<dyn CommandRunner>,
    git: String,
    repo: PathBuf,
}

impl GitCommandResolver {
    pub fn new(
        runner: Arc<dyn CommandRunner>,
        git: impl Into<String>,
        repo: impl Into<PathBuf>,
    ) -> Self {
        Self {
            runner,
            git: git.into(),
            repo: repo.into(),
        }
    }
}

#[async_trait]
impl RevisionResolver for GitCommandResolver {
    async fn resolve(&self) -> Result<String, RevisionError> {
        let args = [OsString::from("rev-parse"), OsString::from("HEAD")];
        let output = self
            .runner
            .run(&self.git, &args, Some(&self.repo))
            .await
            .map_err(|source| RevisionError::Command {
                repo: self.repo.clone(),
                source,
            })?;

        let revision = String::from_utf8_lossy(&output).trim().to_string();
        if revision.is_empty() {
            return Err(RevisionError::Empty {
                repo: self.repo.clone(),
            });
        }

        debug!("Resolved revision {} via git", revision);
        Ok(revision)
    }
}

/// Reads `HEAD` with libgit2, no external `git` needed
pub struct Libgit2Resolver {
    repo: PathBuf,
}

impl Libgit2Resolver {
    pub fn new(repo: impl Into<PathBuf>) -> Self {
        Self { repo: repo.into() }
    }
}

#[async_trait]
impl RevisionResolver for Libgit2Resolver {
    async fn resolve(&self) -> Result<String, RevisionError> {
        let revision = head_commit_id(&self.repo).map_err(|source| RevisionError::Libgit2 {
            repo: self.repo.clone(),
            source,
        })?;

        debug!("Resolved revision {} via libgit2", revision);
        Ok(revision)
    }
}

/// Full hex id of the commit `HEAD` points at
fn head_commit_id(path: &Path) -> Result<String, git2::Error> {
    let repo = Repository::discover(path)?;
    let commit = repo.head()?.peel_to_commit()?;
    Ok(commit.id().to_string())
}

/// Resolver for the configured backend
pub fn resolver_for(
    backend: RevisionBackend,
    runner: Arc<dyn CommandRunner>,
    git: &str,
    repo: &Path,
) -> Arc<dyn RevisionResolver> {
    match backend {
        RevisionBackend::Git => Arc::new(GitCommandResolver::new(runner, git, repo)),
        RevisionBackend::Libgit2 => Arc::new(Libgit2Resolver::new(repo)),
    }
}

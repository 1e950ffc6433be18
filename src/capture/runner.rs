//! Child-process execution for the external analyzers

use async_trait::async_trait;
use std::ffi::OsString;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to collect output of `{program}`: {source}")]
    Io {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` exited with {}: {stderr}", exit_label(.code))]
    Failed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },
    #[error("`{program}` produced no output")]
    EmptyOutput { program: String },
    #[error("`{program}` did not finish within {after:?} and was killed")]
    TimedOut { program: String, after: Duration },
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("status {}", code),
        None => "a signal".to_string(),
    }
}

/// Runs an external program to completion and hands back its stdout
///
/// The seam between capture logic and real executables; tests swap in a
/// runner that returns canned output.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(
        &self,
        program: &str,
        args: &[OsString],
        cwd: Option<&Path>,
    ) -> Result<Vec<u8>, ToolError>;
}

/// Arguments joined for log lines; non-UTF-8 bytes are shown lossily
pub fn display_args(args: &[OsString]) -> String {
    args.iter()
        .map(|arg| arg.to_string_lossy())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Runs programs as real child processes
#[derive(Debug, Clone, Default)]
pub struct SystemRunner {
    timeout: Option<Duration>,
}

impl SystemRunner {
    /// Runner that waits for the child however long it takes
    pub fn new() -> Self {
        Self { timeout: None }
    }

    /// Runner that kills the child after `limit`
    pub fn with_timeout(limit: Duration) -> Self {
        Self {
            timeout: Some(limit),
        }
    }

    /// `0` means no limit
    pub fn from_timeout_secs(secs: u64) -> Self {
        if secs == 0 {
            Self::new()
        } else {
            Self::with_timeout(Duration::from_secs(secs))
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[async_trait]
impl CommandRunner for SystemRunner {
    async fn run(
        &self,
        program: &str,
        args: &[OsString],
        cwd: Option<&Path>,
    ) -> Result<Vec<u8>, ToolError> {
        let mut cmd = Command::new(program);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(dir) = cwd {
            cmd.current_dir(dir);
        }

        debug!("Running {} {}", program, display_args(args));

        let child = cmd.spawn().map_err(|source| ToolError::Spawn {
            program: program.to_string(),
            source,
        })?;

        // Dropping the wait future on timeout drops the child, which kills it
        let output = match self.timeout {
            Some(limit) => timeout(limit, child.wait_with_output())
                .await
                .map_err(|_| ToolError::TimedOut {
                    program: program.to_string(),
                    after: limit,
                })?,
            None => child.wait_with_output().await,
        }
        .map_err(|source| ToolError::Io {
            program: program.to_string(),
            source,
        })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!("{} failed: {}", program, stderr);
            return Err(ToolError::Failed {
                program: program.to_string(),
                code: output.status.code(),
                stderr,
            });
        }

        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<OsString> {
        vec![OsString::from("-c"), OsString::from(script)]
    }

    #[tokio::test]
    async fn test_captures_stdout() {
        let runner = SystemRunner::new();
        let out = runner.run("sh", &sh("printf 'a,b\\n1,2\\n'"), None).await.unwrap();
        assert_eq!(out, b"a,b\n1,2\n");
    }

    #[tokio::test]
    async fn test_nonzero_exit_is_an_error() {
        let runner = SystemRunner::new();
        let err = runner
            .run("sh", &sh("echo broken >&2; exit 3"), None)
            .await
            .unwrap_err();
        match err {
            ToolError::Failed { code, stderr, .. } => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "broken");
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_missing_program_fails_to_spawn() {
        let runner = SystemRunner::new();
        let err = runner
            .run("definitely-not-an-installed-analyzer", &[], None)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_the_child() {
        let runner = SystemRunner::with_timeout(Duration::from_millis(100));
        let err = runner.run("sh", &sh("sleep 5"), None).await.unwrap_err();
        assert!(matches!(err, ToolError::TimedOut { .. }));
    }

    #[tokio::test]
    async fn test_runs_in_working_directory() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker"), "here").unwrap();

        let runner = SystemRunner::new();
        let out = runner
            .run("sh", &sh("cat marker"), Some(dir.path()))
            .await
            .unwrap();
        assert_eq!(out, b"here");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_non_utf8_argument_reaches_the_child_unchanged() {
        use std::os::unix::ffi::OsStringExt;

        let dir = tempfile::tempdir().unwrap();
        let name = OsString::from_vec(b"slow-\xff.log".to_vec());
        std::fs::write(dir.path().join(&name), "exact").unwrap();

        let runner = SystemRunner::new();
        let out = runner
            .run("cat", &[name], Some(dir.path()))
            .await
            .unwrap();
        assert_eq!(out, b"exact");
    }

    #[test]
    fn test_zero_timeout_means_unbounded() {
        assert_eq!(SystemRunner::from_timeout_secs(0).timeout(), None);
        assert_eq!(
            SystemRunner::from_timeout_secs(30).timeout(),
            Some(Duration::from_secs(30))
        );
    }

    #[test]
    fn test_failed_message_names_tool_and_status() {
        let err = ToolError::Failed {
            program: "alp".to_string(),
            code: Some(2),
            stderr: "no such file".to_string(),
        };
        assert_eq!(err.to_string(), "`alp` exited with status 2: no such file");
    }
}

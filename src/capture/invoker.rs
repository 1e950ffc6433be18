//! Command lines for the two analyzers and the capture of their output

use std::ffi::OsString;
use std::path::Path;
use tracing::{debug, info};

use super::runner::{display_args, CommandRunner, ToolError};
use crate::app::config::CaptureConfig;
use crate::store::LogKind;

/// One external analyzer, bound to the log file it reads
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invoker {
    kind: LogKind,
    program: String,
    args: Vec<OsString>,
}

impl Invoker {
    pub fn new(kind: LogKind, program: impl Into<String>, args: Vec<OsString>) -> Self {
        Self {
            kind,
            program: program.into(),
            args,
        }
    }

    /// `pt-query-digest` over the full slow log, JSON output
    pub fn query_digest(program: &str, slow_log: &Path) -> Self {
        let args = vec![
            OsString::from("--limit"),
            OsString::from("100%"),
            OsString::from("--output"),
            OsString::from("json"),
            slow_log.as_os_str().to_os_string(),
        ];
        Self::new(LogKind::digest(), program, args)
    }

    /// `alp <format>` over the access log, CSV output
    pub fn access_log(program: &str, format: &str, alp_config: &Path, access_log: &Path) -> Self {
        let args = vec![
            OsString::from(format),
            OsString::from("--config"),
            alp_config.as_os_str().to_os_string(),
            OsString::from("--file"),
            access_log.as_os_str().to_os_string(),
            OsString::from("--format"),
            OsString::from("csv"),
        ];
        Self::new(LogKind::access_log(), program, args)
    }

    /// The configured digest and access-log invokers, in capture order
    pub fn from_config(config: &CaptureConfig) -> Vec<Self> {
        vec![
            Self::query_digest(&config.digest_command, &config.slow_log),
            Self::access_log(
                &config.alp_command,
                &config.alp_format,
                &config.alp_config,
                &config.access_log,
            ),
        ]
    }

    pub fn kind(&self) -> &LogKind {
        &self.kind
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    pub fn args(&self) -> &[OsString] {
        &self.args
    }

    /// Full command line, for logs
    pub fn command_line(&self) -> String {
        format!("{} {}", self.program, display_args(&self.args))
    }

    /// Run the analyzer once and return its raw output
    pub async fn capture<R>(&self, runner: &R) -> Result<Vec<u8>, ToolError>
    where
        R: CommandRunner + ?Sized,
    {
        debug!("Capturing {}: {}", self.kind, self.command_line());

        let output = runner.run(&self.program, &self.args, None).await?;
        if output.is_empty() {
            return Err(ToolError::EmptyOutput {
                program: self.program.clone(),
            });
        }

        info!("Captured {} ({} bytes)", self.kind, output.len());
        Ok(output)
    }
}

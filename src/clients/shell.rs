// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 stepflow contributors

//! Shell test runner
//!
//! Runs test commands on the local machine instead of inside a pod.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use super::{TestClient, TestJob, TestOutcome};
use crate::errors::{ClientError, StepflowError, StepflowResult};

/// Runs each test as `bash -c <commands>` in a working directory
pub struct ShellTestClient {
    shell: String,
    working_dir: PathBuf,
}

impl ShellTestClient {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            shell: "bash".to_string(),
            working_dir: working_dir.into(),
        }
    }

    pub fn with_shell(mut self, shell: &str) -> Self {
        self.shell = shell.to_string();
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    /// Locate the shell on PATH
    pub fn check_available(&self) -> StepflowResult<PathBuf> {
        which::which(&self.shell).map_err(|_| StepflowError::ToolNotFound {
            tool: self.shell.clone(),
            help: Some(format!(
                "Install {} or run with --backend memory",
                self.shell
            )),
        })
    }
}

impl Default for ShellTestClient {
    fn default() -> Self {
        Self::new(".")
    }
}

#[async_trait]
impl TestClient for ShellTestClient {
    async fn run_test(
        &self,
        job: &TestJob,
        cancel: &CancellationToken,
    ) -> Result<TestOutcome, ClientError> {
        let start = Instant::now();

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c").arg(&job.commands);
        cmd.current_dir(&self.working_dir);
        cmd.envs(&job.env);
        cmd.env("TEST_IMAGE", &job.image);
        cmd.kill_on_drop(true);

        let output = tokio::select! {
            output = cmd.output() => output.map_err(|e| {
                ClientError::Other(format!("could not start '{}': {}", self.shell, e))
            })?,
            _ = cancel.cancelled() => {
                return Err(ClientError::Other(format!("test {} was cancelled", job.name)));
            }
        };

        let mut combined = String::from_utf8_lossy(&output.stdout).to_string();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        tracing::debug!(
            test = %job.name,
            status = ?output.status.code(),
            duration_ms = start.elapsed().as_millis() as u64,
            "test command finished"
        );

        Ok(TestOutcome {
            success: output.status.success(),
            output: combined,
        })
    }
}

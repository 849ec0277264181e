//! Execution sandbox boundary and dependency installation.
//!
//! The sandbox runs UNTRUSTED generated code. The core's contract is
//! `execute(entry_file, working_dir, timeout) -> ExecutionResult`:
//! time-bounded, isolated execution is the implementation's (and the
//! deployment's) responsibility — resource, filesystem, and network
//! isolation are enforced entirely outside this crate. `ProcessSandbox`
//! provides the time bound only.

use std::path::Path;
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use crate::errors::{ExecutionFailure, InstallError};

/// Wall-clock limit for one execution of generated code.
pub const EXECUTION_TIMEOUT: Duration = Duration::from_secs(300);

static MISSING_MODULE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"No module named '([^']+)'").expect("missing-module pattern is valid")
});

static MODULE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]+$").expect("module-name pattern is valid"));

/// Outcome of running one entry file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionResult {
    pub success: bool,
    pub error: Option<String>,
    pub failure: Option<ExecutionFailure>,
}

impl ExecutionResult {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            error: None,
            failure: None,
        }
    }

    pub fn failed(error: impl Into<String>, failure: ExecutionFailure) -> Self {
        Self {
            success: false,
            error: Some(error.into()),
            failure: Some(failure),
        }
    }

    /// The missing-module name, when the failure was an unresolved import.
    pub fn missing_module(&self) -> Option<&str> {
        match &self.failure {
            Some(ExecutionFailure::MissingModule { name }) => Some(name),
            _ => None,
        }
    }
}

/// External collaborator that executes a generated entry file.
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run `entry_file` inside `working_dir`, bounded by `timeout`.
    /// `Err` means the sandbox itself failed (could not spawn); a program
    /// that ran and failed comes back as `Ok` with a classified failure.
    async fn execute(
        &self,
        entry_file: &str,
        working_dir: &Path,
        timeout: Duration,
    ) -> Result<ExecutionResult>;
}

/// Runs the entry file with a configured interpreter as a direct child
/// process. Only the wall-clock bound is enforced here.
pub struct ProcessSandbox {
    interpreter: String,
}

impl ProcessSandbox {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }
}

impl Default for ProcessSandbox {
    fn default() -> Self {
        Self::new("python3")
    }
}

#[async_trait]
impl Sandbox for ProcessSandbox {
    async fn execute(
        &self,
        entry_file: &str,
        working_dir: &Path,
        timeout: Duration,
    ) -> Result<ExecutionResult> {
        let child = Command::new(&self.interpreter)
            .arg(entry_file)
            .current_dir(working_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // The child must not outlive a timed-out future.
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn {} {}", self.interpreter, entry_file))?;

        let output = match tokio::time::timeout(timeout, child.wait_with_output()).await {
            Ok(result) => result.context("Failed to wait for sandboxed process")?,
            Err(_) => {
                let secs = timeout.as_secs();
                return Ok(ExecutionResult::failed(
                    format!("Execution timed out ({} seconds)", secs),
                    ExecutionFailure::Timeout { secs },
                ));
            }
        };

        if output.status.success() {
            return Ok(ExecutionResult::succeeded());
        }

        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let code = output.status.code().unwrap_or(-1);
        let failure = match MISSING_MODULE_RE
            .captures(&stderr)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
        {
            Some(name) => ExecutionFailure::MissingModule { name },
            None => ExecutionFailure::NonZeroExit { code },
        };

        Ok(ExecutionResult::failed(
            format!("Error {}:\n{}", code, stderr),
            failure,
        ))
    }
}

/// Ensure a module name is safe to hand to an installer command.
pub fn validate_module_name(module: &str) -> bool {
    MODULE_NAME_RE.is_match(module)
}

/// External collaborator that installs a missing dependency.
#[async_trait]
pub trait Installer: Send + Sync {
    async fn install(&self, module: &str) -> Result<(), InstallError>;
}

/// Installs packages into the interpreter's environment via `-m pip`.
///
/// Installation mutates interpreter-wide package state: concurrent
/// self-heal loops sharing one interpreter can race each other. Deployments
/// must either serialize installs or give each request an isolated
/// environment.
pub struct PipInstaller {
    interpreter: String,
}

impl PipInstaller {
    pub fn new(interpreter: impl Into<String>) -> Self {
        Self {
            interpreter: interpreter.into(),
        }
    }
}

impl Default for PipInstaller {
    fn default() -> Self {
        Self::new("python3")
    }
}

#[async_trait]
impl Installer for PipInstaller {
    async fn install(&self, module: &str) -> Result<(), InstallError> {
        if !validate_module_name(module) {
            return Err(InstallError::InvalidModuleName(module.to_string()));
        }

        let output = Command::new(&self.interpreter)
            .args(["-m", "pip", "install"])
            .arg(module)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(InstallError::SpawnFailed)?;

        if !output.status.success() {
            return Err(InstallError::CommandFailed {
                module: module.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(())
    }
}

//! Self-healing generation loop: generate, execute, feed failures back.
//!
//! An independent top-level workflow from the staged pipeline — the two
//! share only the code-block parser. Each generation attempt stages its
//! file map in a fresh directory, runs the entry file through the sandbox
//! boundary, and either finishes, installs a missing dependency and re-runs
//! (without consuming an attempt), or records the error and regenerates
//! with the accumulated context.

use std::path::Path;
use std::time::Duration;

use crate::capability::Capability;
use crate::codemap::{FileMap, parse_code_blocks};
use crate::errors::HealError;
use crate::sandbox::{EXECUTION_TIMEOUT, Installer, Sandbox};
use crate::store::materialize;

/// Generation attempts before giving up.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
/// Dependency installs allowed per generation attempt.
pub const DEFAULT_MAX_INSTALL_ATTEMPTS: u32 = 3;

/// Preferred entry file; used whenever the generated map contains it.
pub const ENTRY_FILE: &str = "main.py";
/// Fallback entry file when the preferred name is absent.
pub const FALLBACK_ENTRY_FILE: &str = "implemented_app.py";

const ERROR_HISTORY_WINDOW: usize = 3;

/// Bounded record of recent attempt errors. Only the three most recent
/// entries are retained — older ones are dropped on push, which is the
/// documented trimming policy for prompt construction.
#[derive(Debug, Clone, Default)]
pub struct ErrorHistory {
    entries: Vec<String>,
}

impl ErrorHistory {
    pub fn push(&mut self, error: impl Into<String>) {
        self.entries.push(error.into());
        if self.entries.len() > ERROR_HISTORY_WINDOW {
            self.entries.remove(0);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    fn render(&self) -> String {
        self.entries.join("\n")
    }
}

/// The entry file to execute for a generated map.
pub fn entry_file(files: &FileMap) -> &'static str {
    if files.contains(ENTRY_FILE) {
        ENTRY_FILE
    } else {
        FALLBACK_ENTRY_FILE
    }
}

/// The retry workflow over one capability, one sandbox, and one installer.
pub struct SelfHealLoop {
    capability: Box<dyn Capability>,
    sandbox: Box<dyn Sandbox>,
    installer: Box<dyn Installer>,
    max_attempts: u32,
    max_install_attempts: u32,
    execution_timeout: Duration,
}

impl SelfHealLoop {
    pub fn new(
        capability: Box<dyn Capability>,
        sandbox: Box<dyn Sandbox>,
        installer: Box<dyn Installer>,
    ) -> Self {
        Self {
            capability,
            sandbox,
            installer,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            max_install_attempts: DEFAULT_MAX_INSTALL_ATTEMPTS,
            execution_timeout: EXECUTION_TIMEOUT,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_max_install_attempts(mut self, max_install_attempts: u32) -> Self {
        self.max_install_attempts = max_install_attempts;
        self
    }

    pub fn with_execution_timeout(mut self, timeout: Duration) -> Self {
        self.execution_timeout = timeout;
        self
    }

    /// Run the loop for `task`, staging each attempt under `work_root`.
    /// Returns the first file map whose entry file executes successfully,
    /// or `Exhausted` once the attempt budget is spent — after which no
    /// further generation calls are made.
    pub async fn run(&mut self, task: &str, work_root: &Path) -> Result<FileMap, HealError> {
        let mut history = ErrorHistory::default();
        let mut previous: Option<(FileMap, String)> = None;

        for attempt in 1..=self.max_attempts {
            let prompt = match &previous {
                None => task.to_string(),
                Some((files, last_error)) => retry_prompt(task, files, last_error, &history),
            };

            let response = match self.capability.generate(&prompt).await {
                Ok(response) => response,
                Err(e) => {
                    let message = format!("Generation failed: {}", e);
                    eprintln!(
                        "[heal] attempt {}/{}: {}",
                        attempt, self.max_attempts, message
                    );
                    history.push(message.as_str());
                    if let Some((_, last_error)) = &mut previous {
                        *last_error = message;
                    }
                    continue;
                }
            };

            let files = parse_code_blocks(&response)?;

            let attempt_dir = work_root.join(format!("attempt-{}", attempt));
            materialize(&files, &attempt_dir)
                .await
                .map_err(|e| HealError::Stage {
                    path: attempt_dir.clone(),
                    source: e,
                })?;

            let entry = entry_file(&files);
            let mut result = self
                .sandbox
                .execute(entry, &attempt_dir, self.execution_timeout)
                .await?;

            // Missing imports are resolved in place: install and re-run
            // without consuming a generation attempt.
            let mut installs = 0;
            while !result.success && installs < self.max_install_attempts {
                let Some(module) = result.missing_module().map(str::to_string) else {
                    break;
                };
                installs += 1;
                eprintln!("[heal] missing module {}, installing", module);
                match self.installer.install(&module).await {
                    Ok(()) => {
                        result = self
                            .sandbox
                            .execute(entry, &attempt_dir, self.execution_timeout)
                            .await?;
                    }
                    Err(e) => {
                        history.push(format!("Failed to install {}: {}", module, e));
                        break;
                    }
                }
            }

            if result.success {
                return Ok(files);
            }

            let error = result
                .error
                .unwrap_or_else(|| "Execution failed".to_string());
            eprintln!(
                "[heal] attempt {}/{} failed: {}",
                attempt, self.max_attempts, error
            );
            history.push(error.as_str());
            previous = Some((files, error));
        }

        Err(HealError::Exhausted {
            attempts: self.max_attempts,
        })
    }
}

/// Feedback prompt for attempts after the first: the original task, the
/// previous file map re-serialized, the last error, and the trailing error
/// history.
fn retry_prompt(task: &str, files: &FileMap, last_error: &str, history: &ErrorHistory) -> String {
    format!(
        "Original task: {task}\n\n\
         Previous code:\n{code}\n\
         Last error:\n{last_error}\n\n\
         Error history:\n{history}\n\n\
         Please fix this code considering the dependency issues.",
        code = files.to_fenced(),
        history = history.render(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capability::Capability;
    use crate::errors::{ExecutionFailure, GenerationError, InstallError};
    use crate::sandbox::ExecutionResult;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// Capability double: pops scripted responses, counts calls, records
    /// prompts.
    struct ScriptedCapability {
        responses: Mutex<Vec<Result<String, GenerationError>>>,
        calls: Arc<AtomicU32>,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedCapability {
        fn new(responses: Vec<Result<String, GenerationError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                calls: Arc::new(AtomicU32::new(0)),
                prompts: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl Capability for ScriptedCapability {
        async fn generate(&mut self, input: &str) -> Result<String, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.prompts.lock().unwrap().push(input.to_string());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(GenerationError::EmptyResponse);
            }
            responses.remove(0)
        }
    }

    /// Sandbox double: pops scripted execution results.
    struct ScriptedSandbox {
        results: Mutex<Vec<ExecutionResult>>,
        executions: Arc<AtomicU32>,
    }

    impl ScriptedSandbox {
        fn new(results: Vec<ExecutionResult>) -> Self {
            Self {
                results: Mutex::new(results),
                executions: Arc::new(AtomicU32::new(0)),
            }
        }
    }

    #[async_trait]
    impl Sandbox for ScriptedSandbox {
        async fn execute(
            &self,
            _entry_file: &str,
            _working_dir: &Path,
            _timeout: Duration,
        ) -> Result<ExecutionResult> {
            self.executions.fetch_add(1, Ordering::SeqCst);
            let mut results = self.results.lock().unwrap();
            if results.is_empty() {
                Ok(ExecutionResult::succeeded())
            } else {
                Ok(results.remove(0))
            }
        }
    }

    struct RecordingInstaller {
        installed: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl RecordingInstaller {
        fn new() -> Self {
            Self {
                installed: Arc::new(Mutex::new(Vec::new())),
                fail: false,
            }
        }

        fn failing() -> Self {
            Self {
                installed: Arc::new(Mutex::new(Vec::new())),
                fail: true,
            }
        }
    }

    #[async_trait]
    impl Installer for RecordingInstaller {
        async fn install(&self, module: &str) -> Result<(), InstallError> {
            if self.fail {
                return Err(InstallError::CommandFailed {
                    module: module.to_string(),
                    stderr: "no matching distribution".to_string(),
                });
            }
            self.installed.lock().unwrap().push(module.to_string());
            Ok(())
        }
    }

    fn missing(module: &str) -> ExecutionResult {
        ExecutionResult::failed(
            format!("Error 1:\nNo module named '{}'", module),
            ExecutionFailure::MissingModule {
                name: module.to_string(),
            },
        )
    }

    fn crashed(message: &str) -> ExecutionResult {
        ExecutionResult::failed(
            format!("Error 1:\n{}", message),
            ExecutionFailure::NonZeroExit { code: 1 },
        )
    }

    const RESPONSE: &str = "```main.py\nprint(1)\n```\n";

    #[test]
    fn test_error_history_keeps_last_three() {
        let mut history = ErrorHistory::default();
        for error in ["first", "second", "third", "fourth"] {
            history.push(error);
        }
        assert_eq!(history.len(), 3);
        let entries: Vec<_> = history.iter().collect();
        assert_eq!(entries, vec!["second", "third", "fourth"]);
    }

    #[test]
    fn test_entry_file_prefers_main() {
        let with_main: FileMap = [
            ("util.py".to_string(), Some("x".to_string())),
            ("main.py".to_string(), Some("y".to_string())),
        ]
        .into_iter()
        .collect();
        assert_eq!(entry_file(&with_main), ENTRY_FILE);

        let without_main: FileMap = [("app.py".to_string(), Some("x".to_string()))]
            .into_iter()
            .collect();
        assert_eq!(entry_file(&without_main), FALLBACK_ENTRY_FILE);
    }

    #[tokio::test]
    async fn test_first_attempt_success() {
        let workdir = tempfile::tempdir().unwrap();
        let capability = ScriptedCapability::new(vec![Ok(RESPONSE.to_string())]);
        let calls = capability.calls.clone();

        let mut heal = SelfHealLoop::new(
            Box::new(capability),
            Box::new(ScriptedSandbox::new(vec![])),
            Box::new(RecordingInstaller::new()),
        );
        let files = heal.run("task", workdir.path()).await.unwrap();

        assert!(files.contains("main.py"));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(workdir.path().join("attempt-1/main.py").is_file());
    }

    #[tokio::test]
    async fn test_missing_modules_resolved_within_one_attempt() {
        let workdir = tempfile::tempdir().unwrap();
        let capability = ScriptedCapability::new(vec![Ok(RESPONSE.to_string())]);
        let calls = capability.calls.clone();
        let sandbox = ScriptedSandbox::new(vec![
            missing("numpy"),
            missing("rasterio"),
            ExecutionResult::succeeded(),
        ]);
        let executions = sandbox.executions.clone();
        let installer = RecordingInstaller::new();
        let installed = installer.installed.clone();

        let mut heal = SelfHealLoop::new(
            Box::new(capability),
            Box::new(sandbox),
            Box::new(installer),
        );
        let files = heal.run("task", workdir.path()).await.unwrap();

        assert!(files.contains("main.py"));
        // Exactly one generation attempt, three executions, two installs.
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(executions.load(Ordering::SeqCst), 3);
        assert_eq!(
            installed.lock().unwrap().clone(),
            vec!["numpy".to_string(), "rasterio".to_string()]
        );
    }

    #[tokio::test]
    async fn test_install_budget_bounds_reruns() {
        let workdir = tempfile::tempdir().unwrap();
        // Every execution reports another missing module; installs are
        // capped at 3 per attempt, then the attempt is charged.
        let capability =
            ScriptedCapability::new(vec![Ok(RESPONSE.to_string()), Ok(RESPONSE.to_string())]);
        let calls = capability.calls.clone();
        let sandbox = ScriptedSandbox::new(vec![
            missing("a"),
            missing("b"),
            missing("c"),
            missing("d"),
            ExecutionResult::succeeded(),
        ]);

        let mut heal = SelfHealLoop::new(
            Box::new(capability),
            Box::new(sandbox),
            Box::new(RecordingInstaller::new()),
        );
        let files = heal.run("task", workdir.path()).await.unwrap();

        assert!(files.contains("main.py"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_failed_install_falls_through_to_next_attempt() {
        let workdir = tempfile::tempdir().unwrap();
        let capability =
            ScriptedCapability::new(vec![Ok(RESPONSE.to_string()), Ok(RESPONSE.to_string())]);
        let calls = capability.calls.clone();
        let sandbox =
            ScriptedSandbox::new(vec![missing("imaginary-pkg"), ExecutionResult::succeeded()]);

        let mut heal = SelfHealLoop::new(
            Box::new(capability),
            Box::new(sandbox),
            Box::new(RecordingInstaller::failing()),
        );
        let files = heal.run("task", workdir.path()).await.unwrap();

        assert!(files.contains("main.py"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_exhaustion_after_max_attempts() {
        let workdir = tempfile::tempdir().unwrap();
        let capability = ScriptedCapability::new(vec![
            Ok(RESPONSE.to_string()),
            Ok(RESPONSE.to_string()),
            Ok(RESPONSE.to_string()),
        ]);
        let calls = capability.calls.clone();
        let sandbox = ScriptedSandbox::new(vec![
            crashed("boom 1"),
            crashed("boom 2"),
            crashed("boom 3"),
            // Would succeed, but the budget is spent before a fourth call.
            ExecutionResult::succeeded(),
        ]);

        let mut heal = SelfHealLoop::new(
            Box::new(capability),
            Box::new(sandbox),
            Box::new(RecordingInstaller::new()),
        )
        .with_max_attempts(3);
        let err = heal.run("task", workdir.path()).await.unwrap_err();

        assert!(matches!(err, HealError::Exhausted { attempts: 3 }));
        // No generation calls beyond the budget.
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_prompt_carries_error_context() {
        let workdir = tempfile::tempdir().unwrap();
        let capability =
            ScriptedCapability::new(vec![Ok(RESPONSE.to_string()), Ok(RESPONSE.to_string())]);
        let prompts = capability.prompts.clone();
        let sandbox = ScriptedSandbox::new(vec![
            crashed("NameError: name 'x' is not defined"),
            ExecutionResult::succeeded(),
        ]);

        let mut heal = SelfHealLoop::new(
            Box::new(capability),
            Box::new(sandbox),
            Box::new(RecordingInstaller::new()),
        );
        heal.run("implement the filter", workdir.path())
            .await
            .unwrap();

        let prompts = prompts.lock().unwrap();
        assert_eq!(prompts.len(), 2);
        assert_eq!(prompts[0], "implement the filter");
        assert!(prompts[1].contains("Original task: implement the filter"));
        assert!(prompts[1].contains("```main.py"));
        assert!(prompts[1].contains("NameError"));
        assert!(prompts[1].contains("Error history:"));
    }

    #[tokio::test]
    async fn test_generation_failure_is_retried_within_budget() {
        let workdir = tempfile::tempdir().unwrap();
        let capability = ScriptedCapability::new(vec![
            Err(GenerationError::EmptyResponse),
            Ok(RESPONSE.to_string()),
        ]);
        let calls = capability.calls.clone();

        let mut heal = SelfHealLoop::new(
            Box::new(capability),
            Box::new(ScriptedSandbox::new(vec![])),
            Box::new(RecordingInstaller::new()),
        );
        let files = heal.run("task", workdir.path()).await.unwrap();

        assert!(files.contains("main.py"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_blockless_response_is_fatal() {
        let workdir = tempfile::tempdir().unwrap();
        let capability =
            ScriptedCapability::new(vec![Ok("Sorry, I cannot produce code.".to_string())]);
        let calls = capability.calls.clone();

        let mut heal = SelfHealLoop::new(
            Box::new(capability),
            Box::new(ScriptedSandbox::new(vec![])),
            Box::new(RecordingInstaller::new()),
        );
        let err = heal.run("task", workdir.path()).await.unwrap_err();

        assert!(matches!(err, HealError::Parse(_)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fresh_directory_per_attempt() {
        let workdir = tempfile::tempdir().unwrap();
        let capability =
            ScriptedCapability::new(vec![Ok(RESPONSE.to_string()), Ok(RESPONSE.to_string())]);
        let sandbox = ScriptedSandbox::new(vec![crashed("boom"), ExecutionResult::succeeded()]);

        let mut heal = SelfHealLoop::new(
            Box::new(capability),
            Box::new(sandbox),
            Box::new(RecordingInstaller::new()),
        );
        heal.run("task", workdir.path()).await.unwrap();

        assert!(workdir.path().join("attempt-1/main.py").is_file());
        assert!(workdir.path().join("attempt-2/main.py").is_file());
    }
}

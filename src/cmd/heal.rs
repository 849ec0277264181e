//! Self-healing workflow — `paperforge heal <paper>`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use uuid::Uuid;

use paperforge::capability::CliGenerator;
use paperforge::config::PaperforgeConfig;
use paperforge::document::read_document;
use paperforge::heal::SelfHealLoop;
use paperforge::pipeline::prompts;
use paperforge::sandbox::{PipInstaller, ProcessSandbox};
use paperforge::store::{ArtifactStore, LocalArtifactStore};
use paperforge::workdir::WorkDir;

/// Generate code from the paper, execute it, and retry with error feedback
/// until it runs or the attempt budget is spent. The working directory is
/// released on every exit path; only a successful result is persisted.
pub async fn cmd_heal(paper: &Path, config: PaperforgeConfig) -> Result<()> {
    let paper_text = read_document(paper)?;
    let task = prompts::heal_task_prompt(&paper_text);

    let workdir = WorkDir::create().context("Failed to create working directory")?;

    let mut heal = SelfHealLoop::new(
        Box::new(CliGenerator::new(
            config.generator_cmd.as_str(),
            prompts::CODER_SYSTEM_PROMPT,
        )),
        Box::new(ProcessSandbox::new(config.interpreter.as_str())),
        Box::new(PipInstaller::new(config.interpreter.as_str())),
    )
    .with_max_attempts(config.max_attempts)
    .with_max_install_attempts(config.max_install_attempts)
    .with_execution_timeout(Duration::from_secs(config.execution_timeout_secs));

    let files = heal.run(&task, workdir.path()).await?;

    let store = Arc::new(LocalArtifactStore::new(config.output_dir.clone()));
    let project_id = Uuid::new_v4().to_string();
    let location = store
        .persist(&project_id, &files)
        .await
        .with_context(|| format!("Failed to persist project {}", project_id))?;

    println!("Project {} verified and written to {}", project_id, location);
    println!("Generated files:");
    for path in files.paths() {
        println!("- {}", path);
    }
    Ok(())
}

//! Staged pipeline workflow — `paperforge generate <paper>`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Result, bail};

use paperforge::config::PaperforgeConfig;
use paperforge::document::read_document;
use paperforge::pipeline::{PipelineRunner, run_with_events};
use paperforge::progress::{ProgressEvent, ProgressStream};
use paperforge::store::LocalArtifactStore;
use paperforge::ui::PipelineUi;

const STAGE_COUNT: u64 = 6;

/// Run the six-stage pipeline for one paper, driving the terminal UI from
/// the progress stream. A stage failure prints a diagnostic and exits
/// non-zero; nothing is persisted for a failed run.
pub async fn cmd_generate(paper: &Path, config: PaperforgeConfig) -> Result<()> {
    let paper_text = read_document(paper)?;

    let store = Arc::new(LocalArtifactStore::new(config.output_dir.clone()));
    let (tx, mut rx) = ProgressStream::with_heartbeat(Duration::from_secs(config.heartbeat_secs));
    let runner = PipelineRunner::from_config(&config, store).with_events(tx.clone());

    let pipeline = tokio::spawn(run_with_events(runner, paper_text, tx));

    let ui = PipelineUi::new(STAGE_COUNT);
    let mut failure: Option<String> = None;
    while let Some(event) = rx.next_event().await {
        match event {
            ProgressEvent::Heartbeat { .. } => ui.heartbeat(),
            ProgressEvent::Complete {
                project_id, files, ..
            } => {
                ui.finish("Code generation complete");
                ui.print_line(format!("Project {} generated:", project_id));
                for path in files.paths() {
                    ui.print_line(format!("- {}", path));
                }
            }
            ProgressEvent::Error { message } => {
                ui.fail(&message);
                failure = Some(message);
            }
            stage => ui.start_stage(stage.message()),
        }
    }
    pipeline.await?;

    if let Some(message) = failure {
        bail!("{}", message);
    }
    Ok(())
}

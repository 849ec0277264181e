//! The staged generation pipeline: read → plan → implement → analyze →
//! improve → persist.
//!
//! Each stage delegates to an external capability and is announced on the
//! progress stream before it starts. Unlike the self-healing loop, this
//! path never executes the generated code; the two workflows share only
//! the code-block parser. Capability failures here are fatal — there is no
//! automatic retry.

pub mod prompts;

use std::sync::Arc;

use uuid::Uuid;

use crate::capability::{Capability, CliGenerator};
use crate::codemap::{FileMap, parse_code_blocks};
use crate::config::PaperforgeConfig;
use crate::document::SourceDocument;
use crate::errors::PipelineError;
use crate::progress::{ProgressEvent, ProgressSender};
use crate::store::ArtifactStore;

/// Sidecar file recording the implementation plan next to the code.
pub const PLAN_FILE: &str = "implementation_plan.md";
/// Sidecar file recording the analysis next to the code.
pub const ANALYSIS_FILE: &str = "code_analysis.md";

/// Result of a completed pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineOutcome {
    pub project_id: String,
    pub files: FileMap,
    pub plan: String,
    pub analysis: String,
    /// Durable location reference recorded by the artifact store.
    pub location: String,
}

/// Drives the six pipeline stages for one request.
pub struct PipelineRunner {
    planner: Box<dyn Capability>,
    coder: Box<dyn Capability>,
    analyst: Box<dyn Capability>,
    store: Arc<dyn ArtifactStore>,
    events: Option<ProgressSender>,
}

impl PipelineRunner {
    pub fn new(
        planner: Box<dyn Capability>,
        coder: Box<dyn Capability>,
        analyst: Box<dyn Capability>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        Self {
            planner,
            coder,
            analyst,
            store,
            events: None,
        }
    }

    /// Wire up CLI-subprocess capabilities per the config.
    pub fn from_config(config: &PaperforgeConfig, store: Arc<dyn ArtifactStore>) -> Self {
        let cmd = config.generator_cmd.as_str();
        Self::new(
            Box::new(CliGenerator::new(cmd, prompts::PLANNER_SYSTEM_PROMPT)),
            Box::new(CliGenerator::new(cmd, prompts::CODER_SYSTEM_PROMPT)),
            Box::new(CliGenerator::new(cmd, prompts::ANALYST_SYSTEM_PROMPT)),
            store,
        )
    }

    /// Publish stage events (and let the caller publish terminal events)
    /// on `events`.
    pub fn with_events(mut self, events: ProgressSender) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: ProgressEvent) {
        if let Some(events) = &self.events {
            events.send(event);
        }
    }

    /// Run all six stages for `paper_text`. A stage event precedes each
    /// stage; the terminal `complete`/`error` event is the caller's to
    /// publish (see [`run_with_events`]).
    pub async fn run(&mut self, paper_text: &str) -> Result<PipelineOutcome, PipelineError> {
        let project_id = Uuid::new_v4().to_string();

        self.emit(ProgressEvent::ReadingPaper {
            message: "Reading paper...".to_string(),
        });
        let document = SourceDocument::from_text(paper_text.to_string())?;
        let content = document.implementation_text();

        self.emit(ProgressEvent::GeneratingPlan {
            message: "Generating implementation plan...".to_string(),
        });
        let plan = self.planner.generate(&content).await?;

        self.emit(ProgressEvent::ImplementingCode {
            message: "Implementing code...".to_string(),
        });
        let response = self
            .coder
            .generate(&prompts::implement_prompt(&content, &plan))
            .await?;
        let files = parse_code_blocks(&response)?;

        self.emit(ProgressEvent::AnalyzingCode {
            message: "Analyzing code...".to_string(),
        });
        let analysis = self
            .analyst
            .generate(&prompts::analyze_prompt(&content, &plan, &files))
            .await?;

        self.emit(ProgressEvent::ImprovingCode {
            message: "Improving code based on analysis...".to_string(),
        });
        let files = match self.improve(&files, &analysis).await {
            Ok(improved) => improved,
            Err(e) => {
                // The unimproved map is still a complete result; keep it.
                eprintln!(
                    "[pipeline] improvement pass failed, keeping current implementation: {}",
                    e
                );
                files
            }
        };

        self.emit(ProgressEvent::WritingFiles {
            message: "Writing files...".to_string(),
        });
        let persisted = files.merge(&sidecars(&plan, &analysis));
        let location = self
            .store
            .persist(&project_id, &persisted)
            .await
            .map_err(|e| PipelineError::Persistence {
                project_id: project_id.clone(),
                source: e,
            })?;

        Ok(PipelineOutcome {
            project_id,
            files,
            plan,
            analysis,
            location,
        })
    }

    /// Improvement pass: regenerate with the critique and overlay the
    /// result onto the current map, so files the pass does not mention are
    /// never dropped.
    async fn improve(
        &mut self,
        files: &FileMap,
        analysis: &str,
    ) -> Result<FileMap, PipelineError> {
        let response = self
            .coder
            .generate(&prompts::improve_prompt(analysis, files))
            .await?;
        let delta = parse_code_blocks(&response)?;
        Ok(files.merge(&delta))
    }
}

fn sidecars(plan: &str, analysis: &str) -> FileMap {
    [
        (PLAN_FILE.to_string(), Some(plan.to_string())),
        (ANALYSIS_FILE.to_string(), Some(analysis.to_string())),
    ]
    .into_iter()
    .collect()
}

/// Run the pipeline to completion and publish the terminal event: a
/// `complete` carrying the project id and generated files, or an `error`
/// with the failure description.
pub async fn run_with_events(mut runner: PipelineRunner, paper_text: String, events: ProgressSender) {
    match runner.run(&paper_text).await {
        Ok(outcome) => {
            events.send(ProgressEvent::Complete {
                message: "Code generation complete".to_string(),
                project_id: outcome.project_id,
                files: outcome.files,
            });
        }
        Err(e) => {
            events.send(ProgressEvent::Error {
                message: format!("{:#}", anyhow::Error::from(e)),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::GenerationError;
    use crate::progress::ProgressStream;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Capability double: pops scripted responses, records prompts.
    struct ScriptedCapability {
        responses: Mutex<Vec<Result<String, GenerationError>>>,
        prompts: Arc<Mutex<Vec<String>>>,
    }

    impl ScriptedCapability {
        fn new(responses: Vec<Result<String, GenerationError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                prompts: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl Capability for ScriptedCapability {
        async fn generate(&mut self, input: &str) -> Result<String, GenerationError> {
            self.prompts.lock().unwrap().push(input.to_string());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(GenerationError::EmptyResponse);
            }
            responses.remove(0)
        }
    }

    /// Store double recording persisted maps.
    #[derive(Default)]
    struct RecordingStore {
        persisted: Mutex<Vec<(String, FileMap)>>,
    }

    #[async_trait]
    impl ArtifactStore for RecordingStore {
        async fn persist(&self, project_id: &str, files: &FileMap) -> anyhow::Result<String> {
            self.persisted
                .lock()
                .unwrap()
                .push((project_id.to_string(), files.clone()));
            Ok(format!("memory://{}", project_id))
        }

        async fn lookup(&self, _project_id: &str) -> Option<String> {
            None
        }
    }

    const PAPER: &str = "Methodology\nWe propagate sigma points through the motion model and \
                         update the estimate from the innovation covariance.";

    const IMPLEMENT_RESPONSE: &str =
        "```main.py\nprint('v1')\n```\n```util.py\nx = 1\n```\n```data/\n```\n";
    const IMPROVE_RESPONSE: &str = "```main.py\nprint('v2')\n```\n";

    fn runner(
        planner: ScriptedCapability,
        coder: ScriptedCapability,
        analyst: ScriptedCapability,
        store: Arc<RecordingStore>,
    ) -> PipelineRunner {
        PipelineRunner::new(
            Box::new(planner),
            Box::new(coder),
            Box::new(analyst),
            store,
        )
    }

    #[tokio::test]
    async fn test_full_run_merges_improvement_onto_initial_map() {
        let store = Arc::new(RecordingStore::default());
        let mut runner = runner(
            ScriptedCapability::new(vec![Ok("the plan".to_string())]),
            ScriptedCapability::new(vec![
                Ok(IMPLEMENT_RESPONSE.to_string()),
                Ok(IMPROVE_RESPONSE.to_string()),
            ]),
            ScriptedCapability::new(vec![Ok("the analysis".to_string())]),
            store.clone(),
        );

        let outcome = runner.run(PAPER).await.unwrap();

        assert_eq!(outcome.plan, "the plan");
        assert_eq!(outcome.analysis, "the analysis");
        // Improved file replaced, untouched files retained, order kept.
        assert_eq!(outcome.files.get("main.py"), Some(Some("print('v2')")));
        assert_eq!(outcome.files.get("util.py"), Some(Some("x = 1")));
        assert_eq!(outcome.files.get("data/"), Some(None));
        assert_eq!(
            outcome.files.paths().collect::<Vec<_>>(),
            vec!["main.py", "util.py", "data/"]
        );

        // Persisted tree carries the sidecar documents as well.
        let persisted = store.persisted.lock().unwrap();
        assert_eq!(persisted.len(), 1);
        let (project_id, persisted_map) = &persisted[0];
        assert_eq!(project_id, &outcome.project_id);
        assert_eq!(persisted_map.get(PLAN_FILE), Some(Some("the plan")));
        assert_eq!(persisted_map.get(ANALYSIS_FILE), Some(Some("the analysis")));
        assert_eq!(outcome.location, format!("memory://{}", outcome.project_id));
    }

    #[tokio::test]
    async fn test_improvement_failure_keeps_unimproved_map() {
        let store = Arc::new(RecordingStore::default());
        let mut runner = runner(
            ScriptedCapability::new(vec![Ok("plan".to_string())]),
            ScriptedCapability::new(vec![
                Ok(IMPLEMENT_RESPONSE.to_string()),
                Err(GenerationError::EmptyResponse),
            ]),
            ScriptedCapability::new(vec![Ok("analysis".to_string())]),
            store,
        );

        let outcome = runner.run(PAPER).await.unwrap();
        assert_eq!(outcome.files.get("main.py"), Some(Some("print('v1')")));
        assert_eq!(outcome.files.len(), 3);
    }

    #[tokio::test]
    async fn test_blockless_improvement_keeps_unimproved_map() {
        let store = Arc::new(RecordingStore::default());
        let mut runner = runner(
            ScriptedCapability::new(vec![Ok("plan".to_string())]),
            ScriptedCapability::new(vec![
                Ok(IMPLEMENT_RESPONSE.to_string()),
                Ok("The code already looks good.".to_string()),
            ]),
            ScriptedCapability::new(vec![Ok("analysis".to_string())]),
            store,
        );

        let outcome = runner.run(PAPER).await.unwrap();
        assert_eq!(outcome.files.get("main.py"), Some(Some("print('v1')")));
    }

    #[tokio::test]
    async fn test_document_without_sections_fails_before_any_generation() {
        let store = Arc::new(RecordingStore::default());
        let planner = ScriptedCapability::new(vec![Ok("plan".to_string())]);
        let planner_prompts = planner.prompts.clone();
        let mut runner = runner(
            planner,
            ScriptedCapability::new(vec![]),
            ScriptedCapability::new(vec![]),
            store,
        );

        let err = runner.run("Introduction\nNothing useful.").await.unwrap_err();
        assert!(matches!(err, PipelineError::NoImplementationContent));
        assert!(planner_prompts.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_planner_failure_is_fatal_without_retry() {
        let store = Arc::new(RecordingStore::default());
        let planner = ScriptedCapability::new(vec![Err(GenerationError::EmptyResponse)]);
        let planner_prompts = planner.prompts.clone();
        let mut runner = runner(
            planner,
            ScriptedCapability::new(vec![]),
            ScriptedCapability::new(vec![]),
            store,
        );

        let err = runner.run(PAPER).await.unwrap_err();
        assert!(matches!(err, PipelineError::Generation(_)));
        assert_eq!(planner_prompts.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stage_events_precede_stages_and_complete_terminates() {
        let store = Arc::new(RecordingStore::default());
        let runner = runner(
            ScriptedCapability::new(vec![Ok("plan".to_string())]),
            ScriptedCapability::new(vec![
                Ok(IMPLEMENT_RESPONSE.to_string()),
                Ok(IMPROVE_RESPONSE.to_string()),
            ]),
            ScriptedCapability::new(vec![Ok("analysis".to_string())]),
            store,
        );

        let (tx, mut rx) = ProgressStream::with_heartbeat(Duration::from_secs(3600));
        let runner = runner.with_events(tx.clone());
        tokio::spawn(run_with_events(runner, PAPER.to_string(), tx));

        let mut statuses = Vec::new();
        while let Some(event) = rx.next_event().await {
            let value: serde_json::Value =
                serde_json::from_str(event.to_json_line().trim()).unwrap();
            statuses.push(value["status"].as_str().unwrap().to_string());
        }

        assert_eq!(
            statuses,
            vec![
                "reading_paper",
                "generating_plan",
                "implementing_code",
                "analyzing_code",
                "improving_code",
                "writing_files",
                "complete",
            ]
        );
    }

    #[tokio::test]
    async fn test_fatal_error_surfaces_as_error_event() {
        let store = Arc::new(RecordingStore::default());
        let runner = runner(
            ScriptedCapability::new(vec![]),
            ScriptedCapability::new(vec![]),
            ScriptedCapability::new(vec![]),
            store,
        );

        let (tx, mut rx) = ProgressStream::with_heartbeat(Duration::from_secs(3600));
        let runner = runner.with_events(tx.clone());
        tokio::spawn(run_with_events(
            runner,
            "No recognized headings here.".to_string(),
            tx,
        ));

        let mut last = None;
        while let Some(event) = rx.next_event().await {
            last = Some(event);
        }
        match last.unwrap() {
            ProgressEvent::Error { message } => {
                assert!(message.contains("No implementation sections"));
            }
            other => panic!("Expected error event, got {other:?}"),
        }
    }
}

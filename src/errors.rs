//! Typed error hierarchy for the paperforge pipeline.
//!
//! Two top-level enums cover the two workflows:
//! - `PipelineError` — staged orchestrator failures (fatal, no retry)
//! - `HealError` — self-healing loop failures
//!
//! plus `GenerationError` for the text-generation boundary, `InstallError`
//! for dependency installation, `ParseError` for blockless generator
//! output, and `ExecutionFailure` classifying sandbox outcomes.

use thiserror::Error;

/// The generator produced no fenced code blocks headed by a file path.
#[derive(Debug, Error)]
#[error("No code blocks with file paths found in generated output")]
pub struct ParseError;

/// Errors from the external text-generation boundary.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("Failed to spawn generator command `{cmd}`: {source}")]
    SpawnFailed {
        cmd: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Generator exited with non-zero code {exit_code}: {stderr}")]
    NonZeroExit { exit_code: i32, stderr: String },

    #[error("Generator produced empty output")]
    EmptyResponse,

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the staged generation pipeline. All variants are fatal for
/// the current request: the run terminates and partial artifacts are
/// removed where feasible.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Unreadable document at {path}: {reason}")]
    DocumentFormat {
        path: std::path::PathBuf,
        reason: String,
    },

    #[error(
        "No implementation sections found in the document \
         (expected a heading such as Implementation, Methodology, Algorithm, \
         Methods, System Design, Architecture, or Experimental Setup)"
    )]
    NoImplementationContent,

    #[error("Generation capability failed: {0}")]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Failed to persist project {project_id}: {source}")]
    Persistence {
        project_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Errors from the self-healing execution loop.
#[derive(Debug, Error)]
pub enum HealError {
    #[error("Failed to resolve after {attempts} generation attempts")]
    Exhausted { attempts: u32 },

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Failed to stage generated files at {path}: {source}")]
    Stage {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Classified failure of one sandbox execution. `MissingModule` is locally
/// recoverable (install and re-run without consuming a generation attempt);
/// the other variants consume one.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionFailure {
    #[error("Execution timed out ({secs} seconds)")]
    Timeout { secs: u64 },

    #[error("Process exited with code {code}")]
    NonZeroExit { code: i32 },

    #[error("Missing module: {name}")]
    MissingModule { name: String },
}

/// Errors from automatic dependency installation.
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("Invalid module name: {0}")]
    InvalidModuleName(String),

    #[error("Installation failed for {module}: {stderr}")]
    CommandFailed { module: String, stderr: String },

    #[error("Failed to spawn installer: {0}")]
    SpawnFailed(#[source] std::io::Error),
}

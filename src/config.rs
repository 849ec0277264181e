//! Runtime configuration, loaded from `paperforge.toml`.
//!
//! Every knob has a default; a missing config file means defaults. The
//! generator command can also be overridden with the `GENERATOR_CMD`
//! environment variable, which takes precedence over the file.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

/// Runtime configuration for paperforge.
#[derive(Debug, Clone)]
pub struct PaperforgeConfig {
    /// CLI command used as the text-generation capability.
    pub generator_cmd: String,
    /// Interpreter used to execute generated code and install packages.
    pub interpreter: String,
    /// Wall-clock limit for one sandbox execution, in seconds.
    pub execution_timeout_secs: u64,
    /// Generation attempts for the self-healing loop.
    pub max_attempts: u32,
    /// Dependency installs per generation attempt.
    pub max_install_attempts: u32,
    /// Directory persisted projects are written under.
    pub output_dir: PathBuf,
    /// Seconds between progress-stream heartbeats.
    pub heartbeat_secs: u64,
}

impl Default for PaperforgeConfig {
    fn default() -> Self {
        Self {
            generator_cmd: "claude".to_string(),
            interpreter: "python3".to_string(),
            execution_timeout_secs: 300,
            max_attempts: 5,
            max_install_attempts: 3,
            output_dir: PathBuf::from("generated_projects"),
            heartbeat_secs: 20,
        }
    }
}

/// Raw TOML structure for `paperforge.toml`.
#[derive(Debug, Deserialize)]
struct PaperforgeToml {
    generator: Option<GeneratorSection>,
    sandbox: Option<SandboxSection>,
    heal: Option<HealSection>,
    output: Option<OutputSection>,
}

#[derive(Debug, Deserialize)]
struct GeneratorSection {
    cmd: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SandboxSection {
    interpreter: Option<String>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct HealSection {
    max_attempts: Option<u32>,
    max_install_attempts: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct OutputSection {
    dir: Option<PathBuf>,
    heartbeat_secs: Option<u64>,
}

impl PaperforgeConfig {
    /// Load config from `<project_dir>/paperforge.toml`, falling back to
    /// defaults for anything unset. `GENERATOR_CMD` overrides the file.
    pub fn load(project_dir: &Path) -> Result<Self> {
        let mut config = Self::default();

        let config_path = project_dir.join("paperforge.toml");
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)
                .with_context(|| format!("Failed to read {}", config_path.display()))?;
            let toml: PaperforgeToml = toml::from_str(&content)
                .with_context(|| format!("Failed to parse {}", config_path.display()))?;

            if let Some(generator) = toml.generator
                && let Some(cmd) = generator.cmd
            {
                config.generator_cmd = cmd;
            }
            if let Some(sandbox) = toml.sandbox {
                if let Some(interpreter) = sandbox.interpreter {
                    config.interpreter = interpreter;
                }
                if let Some(timeout_secs) = sandbox.timeout_secs {
                    config.execution_timeout_secs = timeout_secs;
                }
            }
            if let Some(heal) = toml.heal {
                if let Some(max_attempts) = heal.max_attempts {
                    config.max_attempts = max_attempts;
                }
                if let Some(max_install_attempts) = heal.max_install_attempts {
                    config.max_install_attempts = max_install_attempts;
                }
            }
            if let Some(output) = toml.output {
                if let Some(dir) = output.dir {
                    config.output_dir = dir;
                }
                if let Some(heartbeat_secs) = output.heartbeat_secs {
                    config.heartbeat_secs = heartbeat_secs;
                }
            }
        }

        if let Ok(cmd) = std::env::var("GENERATOR_CMD") {
            config.generator_cmd = cmd;
        }

        Ok(config)
    }
}

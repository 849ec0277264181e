//! The external text-generation boundary.
//!
//! Everything the pipeline knows about a generator is `generate(input) ->
//! text`. Each capability instance keeps an ordered, append-only
//! [`ConversationLog`] of (input, output) pairs and replays it verbatim on
//! every subsequent call, so later requests see earlier exchanges. The log
//! grows without bound for the life of the instance; instances are owned
//! per request, so the bound is the request itself.

use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::errors::GenerationError;

/// One prior (input, output) exchange with a capability.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exchange {
    pub input: String,
    pub output: String,
}

/// Ordered, append-only record of a capability's prior exchanges.
#[derive(Debug, Clone, Default)]
pub struct ConversationLog {
    exchanges: Vec<Exchange>,
}

impl ConversationLog {
    pub fn record(&mut self, input: impl Into<String>, output: impl Into<String>) {
        self.exchanges.push(Exchange {
            input: input.into(),
            output: output.into(),
        });
    }

    pub fn len(&self) -> usize {
        self.exchanges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.exchanges.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Exchange> {
        self.exchanges.iter()
    }

    /// Render the log as a replay block for prompt construction, oldest
    /// exchange first.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for exchange in &self.exchanges {
            out.push_str("## Previous request\n");
            out.push_str(&exchange.input);
            out.push_str("\n\n## Previous response\n");
            out.push_str(&exchange.output);
            out.push_str("\n\n");
        }
        out
    }
}

/// An opaque text-generation collaborator.
#[async_trait]
pub trait Capability: Send {
    /// Generate a response for `input`, replaying this instance's prior
    /// exchanges, and append the new (input, output) pair to its history.
    async fn generate(&mut self, input: &str) -> Result<String, GenerationError>;
}

/// Capability backed by a generator CLI subprocess (`claude --print` by
/// default). The full prompt — system preamble, replayed history, current
/// request — is written to the child's stdin; its stdout is the response.
pub struct CliGenerator {
    cmd: String,
    system_prompt: String,
    log: ConversationLog,
}

impl CliGenerator {
    pub fn new(cmd: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            cmd: cmd.into(),
            system_prompt: system_prompt.into(),
            log: ConversationLog::default(),
        }
    }

    pub fn log(&self) -> &ConversationLog {
        &self.log
    }

    fn build_prompt(&self, input: &str) -> String {
        let mut prompt = String::new();
        prompt.push_str(&self.system_prompt);
        prompt.push_str("\n\n");
        if !self.log.is_empty() {
            prompt.push_str(&self.log.render());
        }
        prompt.push_str("## Request\n");
        prompt.push_str(input);
        prompt
    }
}

#[async_trait]
impl Capability for CliGenerator {
    async fn generate(&mut self, input: &str) -> Result<String, GenerationError> {
        let prompt = self.build_prompt(input);

        let mut child = Command::new(&self.cmd)
            .arg("--print")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| GenerationError::SpawnFailed {
                cmd: self.cmd.clone(),
                source: e,
            })?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(prompt.as_bytes())
                .await
                .map_err(|e| GenerationError::Other(e.into()))?;
            stdin
                .shutdown()
                .await
                .map_err(|e| GenerationError::Other(e.into()))?;
        }

        let output = child
            .wait_with_output()
            .await
            .map_err(|e| GenerationError::Other(e.into()))?;

        if !output.status.success() {
            return Err(GenerationError::NonZeroExit {
                exit_code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let text = String::from_utf8_lossy(&output.stdout).to_string();
        if text.trim().is_empty() {
            return Err(GenerationError::EmptyResponse);
        }

        self.log.record(input, text.as_str());
        Ok(text)
    }
}

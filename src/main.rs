use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

use paperforge::config::PaperforgeConfig;

mod cmd;

#[derive(Parser)]
#[command(name = "paperforge")]
#[command(version, about = "Turn research papers into runnable projects")]
pub struct Cli {
    /// Directory to load paperforge.toml from (defaults to the current
    /// directory)
    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Override the generator command for this invocation
    #[arg(long, global = true)]
    pub generator_cmd: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the staged pipeline: read, plan, implement, analyze, improve,
    /// persist
    Generate {
        /// Path to the paper text (already extracted from its original
        /// format)
        paper: PathBuf,
    },
    /// Generate code, execute it, and retry with error feedback until it
    /// runs
    Heal {
        /// Path to the paper text
        paper: PathBuf,
    },
    /// Serve the HTTP surface with streaming progress
    Serve {
        /// Port to serve on
        #[arg(short, long, default_value = "8000")]
        port: u16,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };

    let mut config = PaperforgeConfig::load(&project_dir)?;
    if let Some(generator_cmd) = cli.generator_cmd.clone() {
        config.generator_cmd = generator_cmd;
    }

    match &cli.command {
        Commands::Generate { paper } => cmd::cmd_generate(paper, config).await?,
        Commands::Heal { paper } => cmd::cmd_heal(paper, config).await?,
        Commands::Serve { port } => cmd::cmd_serve(*port, config).await?,
    }

    Ok(())
}

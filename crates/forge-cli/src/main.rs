use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;
use std::process::ExitCode;

mod commands;
mod output;

use commands::admin::run_config;
use commands::completions::run_completions;
use commands::run::run_agent;

#[derive(Parser)]
#[command(name = "forge")]
#[command(about = "Local-model coding agent", long_about = None)]
struct Cli {
    /// Print events and results as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging to stderr.
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    /// Workspace root (defaults to the current directory).
    #[arg(long, global = true)]
    workspace: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the agent on one task.
    Run(RunArgs),
    /// Write default project settings, or show the merged configuration.
    Config(ConfigArgs),
    /// Generate shell completion scripts.
    Completions(CompletionsArgs),
}

#[derive(Args)]
pub(crate) struct RunArgs {
    /// Task for the agent.
    #[arg(required = true, trailing_var_arg = true)]
    prompt: Vec<String>,

    /// Audit instead of changing code; only the review report may be written.
    #[arg(long)]
    review: bool,

    /// Skip THOUGHT lines for faster, cheaper turns.
    #[arg(long)]
    fast: bool,

    /// Pin tool paths to this workspace sub-folder.
    #[arg(long)]
    target: Option<String>,

    /// Override the configured model for this run.
    #[arg(long)]
    model: Option<String>,

    /// Maximum number of agent steps before stopping.
    #[arg(long)]
    max_steps: Option<usize>,

    /// JSON conversation file; loaded before the run and rewritten after it.
    #[arg(long)]
    history: Option<PathBuf>,
}

#[derive(Args)]
pub(crate) struct ConfigArgs {
    /// Print the merged configuration (secrets redacted).
    #[arg(long)]
    show: bool,
}

#[derive(Args)]
pub(crate) struct CompletionsArgs {
    #[arg(value_enum)]
    shell: Shell,
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let workspace = match &cli.workspace {
        Some(path) => path.clone(),
        None => std::env::current_dir()?,
    };
    match cli.command {
        Commands::Run(args) => {
            let success = run_agent(&workspace, args, cli.json, cli.verbose)?;
            Ok(if success {
                ExitCode::SUCCESS
            } else {
                ExitCode::FAILURE
            })
        }
        Commands::Config(args) => {
            run_config(&workspace, args, cli.json)?;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Completions(args) => {
            run_completions(args)?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// Top-level CLI entry point for the reconciliation engine.
#[derive(Parser, Debug)]
#[command(
    name = "dotfiles",
    about = "Declarative environment reconciliation engine",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(flatten)]
    pub global: GlobalOpts,
}

/// Options shared across all subcommands.
#[derive(Parser, Debug, Clone, Default)]
pub struct GlobalOpts {
    /// Units file (default: ./units.toml)
    #[arg(short, long, global = true, env = "DOTFILES_CONFIG")]
    pub config: Option<PathBuf>,

    /// State file (default: $XDG_STATE_HOME/dotfiles/state.json)
    #[arg(long, global = true, env = "DOTFILES_STATE")]
    pub state: Option<PathBuf>,

    /// Preview changes without applying
    #[arg(short = 'd', long, global = true)]
    pub dry_run: bool,
}

/// Available subcommands.
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Show the changes apply would make
    Plan(PlanOpts),
    /// Converge units to their desired state
    Apply(ApplyOpts),
    /// Report unit status
    Status(StatusOpts),
    /// Generate shell completions
    Completions(CompletionsOpts),
    /// Print version information
    Version,
}

/// Options for the `plan` subcommand.
#[derive(Parser, Debug, Clone, Default)]
pub struct PlanOpts {
    /// Units to plan, with their dependencies (default: all)
    pub ids: Vec<String>,

    /// Print the plan as JSON
    #[arg(long)]
    pub json: bool,
}

/// Options for the `apply` subcommand.
#[derive(Parser, Debug, Clone, Default)]
pub struct ApplyOpts {
    /// Units to apply, with their dependencies (default: all)
    pub ids: Vec<String>,
}

/// Options for the `status` subcommand.
#[derive(Parser, Debug, Clone, Default)]
pub struct StatusOpts {
    /// Units to inspect, with their dependencies (default: all)
    pub ids: Vec<String>,

    /// Compare captured, expected, and last-applied state
    #[arg(long)]
    pub detailed: bool,

    /// Print statuses as JSON
    #[arg(long)]
    pub json: bool,
}

/// Options for the `completions` subcommand.
#[derive(Parser, Debug, Clone)]
pub struct CompletionsOpts {
    /// Target shell
    #[arg(value_enum)]
    pub shell: clap_complete::Shell,
}

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;

use dotfiles_engine::cli::{Cli, Command};
use dotfiles_engine::commands;
use dotfiles_engine::logging::{self, Logger};

fn main() -> Result<()> {
    let _ = enable_ansi_support::enable_ansi_support();
    let args = Cli::parse();

    let command = match &args.command {
        Command::Plan(_) => "plan",
        Command::Apply(_) => "apply",
        Command::Status(_) => "status",
        Command::Completions(opts) => {
            return commands::completions::run(opts, &mut std::io::stdout());
        }
        Command::Version => {
            commands::version::run();
            return Ok(());
        }
    };

    logging::init_subscriber(args.verbose, command);
    let log = Arc::new(Logger::new(command));
    log.debug(&format!("dotfiles {}", commands::version::version()));

    match args.command {
        Command::Plan(opts) => commands::plan::run(&args.global, &opts, &log),
        Command::Apply(opts) => commands::apply::run(&args.global, &opts, &log),
        Command::Status(opts) => commands::status::run(&args.global, &opts, &log),
        Command::Completions(_) | Command::Version => Ok(()),
    }
}

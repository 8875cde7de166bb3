//! Command: generate shell completions.
use std::io::Write;

use anyhow::Result;
use clap::CommandFactory;

use crate::cli::{Cli, CompletionsOpts};

/// Write the completion script for the requested shell to `out`.
///
/// # Errors
///
/// Returns an error if the script cannot be written.
pub fn run(opts: &CompletionsOpts, out: &mut impl Write) -> Result<()> {
    let mut cmd = Cli::command();
    let name = cmd.get_name().to_string();
    clap_complete::generate(opts.shell, &mut cmd, name, out);
    out.flush()?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use clap_complete::Shell;

    #[test]
    fn bash_script_mentions_subcommands() {
        let mut buf = Vec::new();
        run(&CompletionsOpts { shell: Shell::Bash }, &mut buf).unwrap();
        let script = String::from_utf8(buf).unwrap();
        assert!(script.contains("dotfiles"));
        assert!(script.contains("apply"));
        assert!(script.contains("status"));
    }
}

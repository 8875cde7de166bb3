//! Unit declarations loaded from a TOML file.
//!
//! Each array-of-tables section maps to one unit family:
//!
//! | Section | Factory |
//! |---|---|
//! | `[[paths]]` | [`paths_unit`] |
//! | `[[aliases]]` | [`aliases_unit`] |
//! | `[[packages]]` | [`packages_unit`] |
//! | `[[shell_init]]` | [`shell_init_unit`] |
//! | `[shell_env]` | [`shell_env_unit`] |
pub mod toml_loader;
pub mod validation;

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::contrib::{AliasEntry, PackageEntry, PathEntry, ShellInitSnippet};
use crate::error::ConfigError;
use crate::units::{
    ContributorSpec, Unit, aliases_unit, packages_unit, paths_unit, shell_env_unit,
    shell_init_unit,
};

/// File name looked up in the working directory when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "units.toml";

/// Where the rendered shell environment goes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ShellEnvConfig {
    /// Output file; may start with `~/`.
    pub target: String,
}

/// Every unit declared in a units file.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UnitsConfig {
    /// `PATH` contributors.
    #[serde(default)]
    pub paths: Vec<ContributorSpec<PathEntry>>,
    /// Alias contributors.
    #[serde(default)]
    pub aliases: Vec<ContributorSpec<AliasEntry>>,
    /// Package contributors.
    #[serde(default)]
    pub packages: Vec<ContributorSpec<PackageEntry>>,
    /// Shell-init contributors.
    #[serde(default)]
    pub shell_init: Vec<ContributorSpec<ShellInitSnippet>>,
    /// Consumer unit settings; omitted means no shell file is written.
    #[serde(default)]
    pub shell_env: Option<ShellEnvConfig>,
}

impl UnitsConfig {
    /// Load a units file; a missing file is an empty configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        toml_loader::load_config(path)
    }

    /// Ids of every contributor unit in declaration order.
    #[must_use]
    pub fn contributor_ids(&self) -> Vec<String> {
        self.paths
            .iter()
            .map(|s| s.id.clone())
            .chain(self.aliases.iter().map(|s| s.id.clone()))
            .chain(self.packages.iter().map(|s| s.id.clone()))
            .chain(self.shell_init.iter().map(|s| s.id.clone()))
            .collect()
    }

    /// Total number of declared units, including the shell environment unit.
    #[must_use]
    pub fn unit_count(&self) -> usize {
        self.paths.len()
            + self.aliases.len()
            + self.packages.len()
            + self.shell_init.len()
            + usize::from(self.shell_env.is_some())
    }

    /// Build every declared unit.  The shell environment unit, when
    /// configured, depends on all contributors.
    #[must_use]
    pub fn into_units(self) -> Vec<Box<dyn Unit>> {
        let contributors = self.contributor_ids();
        let mut units: Vec<Box<dyn Unit>> = Vec::with_capacity(self.unit_count());
        units.extend(
            self.paths
                .into_iter()
                .map(|s| Box::new(paths_unit(s)) as Box<dyn Unit>),
        );
        units.extend(
            self.aliases
                .into_iter()
                .map(|s| Box::new(aliases_unit(s)) as Box<dyn Unit>),
        );
        units.extend(
            self.packages
                .into_iter()
                .map(|s| Box::new(packages_unit(s)) as Box<dyn Unit>),
        );
        units.extend(
            self.shell_init
                .into_iter()
                .map(|s| Box::new(shell_init_unit(s)) as Box<dyn Unit>),
        );
        if let Some(env) = self.shell_env {
            units.push(Box::new(shell_env_unit(&env.target, contributors)));
        }
        units
    }
}

/// Resolve the units file: an explicit path wins, otherwise
/// [`DEFAULT_CONFIG_FILE`] in `cwd`.  Existing paths are canonicalized.
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>, cwd: &Path) -> PathBuf {
    let path = explicit.map_or_else(|| cwd.join(DEFAULT_CONFIG_FILE), |p| cwd.join(p));
    dunce::canonicalize(&path).unwrap_or(path)
}

/// Default state file: `$XDG_STATE_HOME/dotfiles/state.json`
/// (`~/.local/state/dotfiles/state.json`).
#[must_use]
pub fn default_state_path() -> PathBuf {
    crate::logging::xdg_dir("XDG_STATE_HOME", ".local/state")
        .join("dotfiles")
        .join("state.json")
}

//! The concrete contribution namespaces and their merge policies.
use std::collections::{BTreeMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use super::{Contribution, Namespace};

/// A directory to place on `PATH`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathEntry {
    /// Directory to add.
    pub path: String,
    /// Place ahead of entries registered without `prepend`.
    #[serde(default)]
    pub prepend: bool,
}

/// PATH entries: prepends first, then appends, first occurrence wins.
#[derive(Debug)]
pub struct Paths;

impl Namespace for Paths {
    type Item = PathEntry;
    type Resolved = Vec<String>;

    const NAME: &'static str = "paths";
    const CONTRIB_KEY: &'static str = "contrib.paths";
    const RESOLVED_KEY: &'static str = "resolved.paths";

    fn identity(item: &PathEntry) -> String {
        item.path.clone()
    }

    fn resolve(contributions: &[Contribution<PathEntry>]) -> Vec<String> {
        let (prepend, append): (Vec<&PathEntry>, Vec<&PathEntry>) =
            contributions.iter().map(|c| &c.data).partition(|e| e.prepend);
        let mut seen = HashSet::new();
        prepend
            .into_iter()
            .chain(append)
            .filter(|e| seen.insert(e.path.as_str()))
            .map(|e| e.path.clone())
            .collect()
    }
}

/// A shell alias definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliasEntry {
    /// Alias name.
    pub name: String,
    /// Command the alias expands to.
    pub command: String,
}

/// Shell aliases keyed by name; the last registration of a name wins.
#[derive(Debug)]
pub struct Aliases;

impl Namespace for Aliases {
    type Item = AliasEntry;
    type Resolved = BTreeMap<String, String>;

    const NAME: &'static str = "aliases";
    const CONTRIB_KEY: &'static str = "contrib.aliases";
    const RESOLVED_KEY: &'static str = "resolved.aliases";

    // Name and command together, so a later unit can redefine an alias.
    fn identity(item: &AliasEntry) -> String {
        format!("{}={}", item.name, item.command)
    }

    fn resolve(contributions: &[Contribution<AliasEntry>]) -> BTreeMap<String, String> {
        contributions
            .iter()
            .map(|c| (c.data.name.clone(), c.data.command.clone()))
            .collect()
    }
}

/// Package manager a package request targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageManager {
    /// Homebrew (macOS and Linuxbrew).
    Homebrew,
    /// apt (Ubuntu).
    Apt,
    /// yum (Amazon Linux 2).
    Yum,
    /// `cargo install`.
    Cargo,
    /// `npm install -g`.
    Npm,
}

impl fmt::Display for PackageManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Homebrew => "homebrew",
            Self::Apt => "apt",
            Self::Yum => "yum",
            Self::Cargo => "cargo",
            Self::Npm => "npm",
        };
        f.write_str(name)
    }
}

/// A package to install with a given manager.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageEntry {
    /// Package name as the manager knows it.
    pub name: String,
    /// Manager responsible for the package.
    pub manager: PackageManager,
}

/// Package requests grouped by manager, registration order within a group.
#[derive(Debug)]
pub struct Packages;

impl Namespace for Packages {
    type Item = PackageEntry;
    type Resolved = BTreeMap<PackageManager, Vec<String>>;

    const NAME: &'static str = "packages";
    const CONTRIB_KEY: &'static str = "contrib.packages";
    const RESOLVED_KEY: &'static str = "resolved.packages";

    fn identity(item: &PackageEntry) -> String {
        format!("{}:{}", item.manager, item.name)
    }

    fn resolve(contributions: &[Contribution<PackageEntry>]) -> BTreeMap<PackageManager, Vec<String>> {
        let mut grouped: BTreeMap<PackageManager, Vec<String>> = BTreeMap::new();
        for c in contributions {
            grouped
                .entry(c.data.manager)
                .or_default()
                .push(c.data.name.clone());
        }
        grouped
    }
}

/// A snippet sourced during shell start-up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShellInitSnippet {
    /// Snippet name, unique within the namespace.
    pub name: String,
    /// Shell code, emitted verbatim.
    pub content: String,
}

/// Shell-init snippets in registration order.
///
/// Order is preserved verbatim because later snippets may rely on earlier
/// ones having been sourced.
#[derive(Debug)]
pub struct ShellInit;

impl Namespace for ShellInit {
    type Item = ShellInitSnippet;
    type Resolved = Vec<ShellInitSnippet>;

    const NAME: &'static str = "shell-init";
    const CONTRIB_KEY: &'static str = "contrib.shell.init";
    const RESOLVED_KEY: &'static str = "resolved.shell.init";

    fn identity(item: &ShellInitSnippet) -> String {
        item.name.clone()
    }

    fn resolve(contributions: &[Contribution<ShellInitSnippet>]) -> Vec<ShellInitSnippet> {
        contributions.iter().map(|c| c.data.clone()).collect()
    }
}

//! Units that fan config entries into a contribution namespace.
use anyhow::{Context as _, Result};
use serde::Deserialize;
use serde_json::Value;

use super::{Context, ModuleResult, PlanChange, PlanResult, Unit};
use crate::contrib::{
    AliasEntry, Aliases, ContributionTable, Contributions, Namespace, PackageEntry, Packages,
    PathEntry, Paths, ShellInit, ShellInitSnippet,
};
use crate::platform::Platform;

/// Declaration of one contributor unit, as read from the units file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ContributorSpec<T> {
    /// Unit id.
    pub id: String,
    /// Entries the unit contributes.
    #[serde(default = "Vec::new")]
    pub entries: Vec<T>,
    /// Platforms the unit applies to; `None` means all.
    #[serde(default)]
    pub platforms: Option<Vec<Platform>>,
    /// Units that must run first.
    #[serde(default)]
    pub depends_on: Vec<String>,
}

impl<T> ContributorSpec<T> {
    /// A spec with entries only.
    #[must_use]
    pub fn new(id: &str, entries: Vec<T>) -> Self {
        Self {
            id: id.to_string(),
            entries,
            platforms: None,
            depends_on: Vec::new(),
        }
    }
}

type TableFn<N> = for<'a> fn(&'a Contributions) -> &'a ContributionTable<N>;

/// Contributes a fixed list of entries to namespace `N`.
pub struct ContributorUnit<N: Namespace> {
    id: String,
    entries: Vec<N::Item>,
    platforms: Option<Vec<Platform>>,
    depends_on: Vec<String>,
    table: TableFn<N>,
}

impl<N: Namespace> std::fmt::Debug for ContributorUnit<N> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContributorUnit")
            .field("id", &self.id)
            .field("namespace", &N::NAME)
            .field("entries", &self.entries)
            .field("platforms", &self.platforms)
            .field("depends_on", &self.depends_on)
            .finish()
    }
}

impl<N: Namespace> ContributorUnit<N> {
    fn from_spec(spec: ContributorSpec<N::Item>, table: TableFn<N>) -> Self {
        Self {
            id: spec.id,
            entries: spec.entries,
            platforms: spec.platforms,
            depends_on: spec.depends_on,
            table,
        }
    }

    fn missing<'a>(&'a self, ctx: &Context) -> Result<Vec<&'a N::Item>> {
        let table = (self.table)(&ctx.contributions);
        let mut missing = Vec::new();
        for entry in &self.entries {
            if !table.contains(entry)? {
                missing.push(entry);
            }
        }
        Ok(missing)
    }
}

impl<N: Namespace> Unit for ContributorUnit<N> {
    fn id(&self) -> &str {
        &self.id
    }

    fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    fn is_applicable(&self, ctx: &Context) -> Result<bool> {
        Ok(self
            .platforms
            .as_ref()
            .is_none_or(|p| p.contains(&ctx.platform)))
    }

    fn plan(&self, ctx: &Context) -> Result<PlanResult> {
        let changes = self
            .missing(ctx)?
            .into_iter()
            .map(|entry| {
                PlanChange::new(format!("contribute {} '{}'", N::NAME, N::identity(entry)))
            })
            .collect();
        Ok(PlanResult::with_changes(changes))
    }

    fn apply(&self, ctx: &Context) -> Result<ModuleResult> {
        let table = (self.table)(&ctx.contributions);
        let mut added = 0usize;
        for entry in &self.entries {
            let identity = N::identity(entry);
            if table
                .add(entry.clone(), self.platforms.clone())
                .with_context(|| format!("adding {} '{identity}'", N::NAME))?
            {
                ctx.report_progress(&self.id, &format!("added {} '{identity}'", N::NAME));
                added += 1;
            }
        }
        let result = ModuleResult::ok(added > 0);
        Ok(if added > 0 {
            result.with_message(format!("added {added} {} entries", N::NAME))
        } else {
            result
        })
    }

    fn capture_state(&self, ctx: &Context) -> Option<Result<Value>> {
        let table = (self.table)(&ctx.contributions);
        let present = self.entries.iter().try_fold(Vec::new(), |mut acc, entry| {
            if table.contains(entry)? {
                acc.push(Value::String(N::identity(entry)));
            }
            Ok::<_, anyhow::Error>(acc)
        });
        Some(present.map(Value::Array))
    }

    fn expected_state(&self, _ctx: &Context) -> Option<Result<Value>> {
        Some(Ok(Value::Array(
            self.entries
                .iter()
                .map(|e| Value::String(N::identity(e)))
                .collect(),
        )))
    }
}

/// Unit contributing `PATH` entries.
#[must_use]
pub fn paths_unit(spec: ContributorSpec<PathEntry>) -> ContributorUnit<Paths> {
    ContributorUnit::from_spec(spec, Contributions::paths)
}

/// Unit contributing shell aliases.
#[must_use]
pub fn aliases_unit(spec: ContributorSpec<AliasEntry>) -> ContributorUnit<Aliases> {
    ContributorUnit::from_spec(spec, Contributions::aliases)
}

/// Unit contributing package requests.
#[must_use]
pub fn packages_unit(spec: ContributorSpec<PackageEntry>) -> ContributorUnit<Packages> {
    ContributorUnit::from_spec(spec, Contributions::packages)
}

/// Unit contributing shell-init snippets.
#[must_use]
pub fn shell_init_unit(spec: ContributorSpec<ShellInitSnippet>) -> ContributorUnit<ShellInit> {
    ContributorUnit::from_spec(spec, Contributions::shell_init)
}

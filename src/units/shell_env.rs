//! The consumer unit that merges every contribution namespace and renders
//! the result as a sourceable POSIX shell file.
//!
//! Contributor units only register fragments.  [`ShellEnvUnit`] depends on
//! all of them, so by the time it runs each namespace is complete; it then
//! persists the resolved collections under their `resolved.*` keys and
//! writes the rendered file.
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context as _, Result};
use serde_json::{Map, Value, json};

use super::{Context, ModuleResult, PlanChange, PlanResult, Unit, UnitDetails};
use crate::comparator::checksum;
use crate::contrib::{
    Aliases, ContributionTable, Namespace, PackageManager, Packages, Paths, ShellInit,
    ShellInitSnippet,
};

/// Default id of the shell environment unit.
pub const SHELL_ENV_ID: &str = "shell-env";

/// First line of every rendered file.
const HEADER: &str = "# Generated by `dotfiles apply`. Do not edit.";

/// Fully resolved contents of every namespace.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShellEnv {
    /// `PATH` entries in precedence order.
    pub paths: Vec<String>,
    /// Alias name to command.
    pub aliases: BTreeMap<String, String>,
    /// Package names grouped by manager.
    pub packages: BTreeMap<PackageManager, Vec<String>>,
    /// Start-up snippets in registration order.
    pub init: Vec<ShellInitSnippet>,
}

impl ShellEnv {
    /// Resolve every namespace against the current contributions.
    ///
    /// # Errors
    ///
    /// Returns an error if a contribution list is malformed.
    pub fn resolve(ctx: &Context) -> Result<Self> {
        let c = &ctx.contributions;
        Ok(Self {
            paths: c.paths().resolve()?,
            aliases: c.aliases().resolve()?,
            packages: c.packages().resolve()?,
            init: c.shell_init().resolve()?,
        })
    }
}

/// Render `env` as a POSIX shell file.  Empty sections are omitted.
#[must_use]
pub fn render_shell_env(env: &ShellEnv) -> String {
    let mut sections = vec![format!("{HEADER}\n")];

    if !env.paths.is_empty() {
        let joined = env
            .paths
            .iter()
            .map(|p| path_word(p))
            .collect::<Vec<_>>()
            .join(":");
        sections.push(format!("export PATH=\"{joined}:$PATH\"\n"));
    }

    if !env.aliases.is_empty() {
        let mut block = String::new();
        for (name, command) in &env.aliases {
            writeln!(block, "{}", alias_line(name, command)).unwrap_or(());
        }
        sections.push(block);
    }

    if !env.packages.is_empty() {
        let mut block = String::new();
        for (manager, names) in &env.packages {
            writeln!(
                block,
                "# packages ({manager}): {}",
                comment_text(&names.join(" "))
            )
            .unwrap_or(());
        }
        sections.push(block);
    }

    for snippet in &env.init {
        let mut block = format!("# {}\n{}", comment_text(&snippet.name), snippet.content);
        if !block.ends_with('\n') {
            block.push('\n');
        }
        sections.push(block);
    }

    sections.join("\n")
}

/// A PATH entry for use inside double quotes.  `~/` becomes `$HOME/`; the
/// rest is escaped so it expands to itself.
fn path_word(path: &str) -> String {
    path.strip_prefix("~/").map_or_else(
        || double_quote_escape(path),
        |rest| format!("$HOME/{}", double_quote_escape(rest)),
    )
}

fn double_quote_escape(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '"' | '\\' | '`' | '$') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Names outside the portable alias charset are quoted together with their
/// command, so the shell rejects them instead of parsing them.
fn alias_line(name: &str, command: &str) -> String {
    let plain = !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.' | '+' | '@' | '%'));
    if plain {
        format!("alias {name}={}", single_quote(command))
    } else {
        format!("alias {}", single_quote(&format!("{name}={command}")))
    }
}

fn comment_text(value: &str) -> String {
    value.replace(['\n', '\r'], " ")
}

fn single_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Writes the merged shell environment to a file.
#[derive(Debug, Clone)]
pub struct ShellEnvUnit {
    id: String,
    target: String,
    depends_on: Vec<String>,
}

/// Build the shell environment unit.
///
/// `target` may start with `~/`.  `contributors` are the ids of every unit
/// feeding a namespace; the unit runs after all of them.
#[must_use]
pub fn shell_env_unit(target: &str, contributors: Vec<String>) -> ShellEnvUnit {
    ShellEnvUnit {
        id: SHELL_ENV_ID.to_string(),
        target: target.to_string(),
        depends_on: contributors,
    }
}

/// Whether the stored resolved collection differs from `resolved`.
fn resolved_stale<N: Namespace>(
    table: &ContributionTable<N>,
    resolved: &N::Resolved,
) -> Result<bool> {
    Ok(table.read()?.as_ref() != Some(resolved))
}

fn read_existing(path: &Path) -> Result<Option<String>> {
    match std::fs::read_to_string(path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

fn stored_checksum<N: Namespace>(ctx: &Context) -> Value {
    ctx.state
        .get_value(N::RESOLVED_KEY)
        .map_or(Value::Null, |v| Value::String(checksum(&v)))
}

fn fresh_checksum<N: Namespace>(resolved: &N::Resolved) -> Result<Value> {
    Ok(Value::String(checksum(&serde_json::to_value(resolved)?)))
}

impl ShellEnvUnit {
    fn stale_namespaces(&self, ctx: &Context, env: &ShellEnv) -> Result<Vec<&'static str>> {
        let c = &ctx.contributions;
        let mut stale = Vec::new();
        if resolved_stale(c.paths(), &env.paths)? {
            stale.push(Paths::NAME);
        }
        if resolved_stale(c.aliases(), &env.aliases)? {
            stale.push(Aliases::NAME);
        }
        if resolved_stale(c.packages(), &env.packages)? {
            stale.push(Packages::NAME);
        }
        if resolved_stale(c.shell_init(), &env.init)? {
            stale.push(ShellInit::NAME);
        }
        Ok(stale)
    }

    fn sync_resolved<N: Namespace>(
        &self,
        ctx: &Context,
        table: &ContributionTable<N>,
        resolved: &N::Resolved,
    ) -> Result<bool> {
        if !resolved_stale(table, resolved)? {
            return Ok(false);
        }
        table.write(resolved)?;
        ctx.report_progress(&self.id, &format!("wrote resolved {}", N::NAME));
        Ok(true)
    }
}

impl Unit for ShellEnvUnit {
    fn id(&self) -> &str {
        &self.id
    }

    fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    fn is_applicable(&self, _ctx: &Context) -> Result<bool> {
        Ok(true)
    }

    fn plan(&self, ctx: &Context) -> Result<PlanResult> {
        let env = ShellEnv::resolve(ctx)?;
        let mut changes: Vec<PlanChange> = self
            .stale_namespaces(ctx, &env)?
            .into_iter()
            .map(|ns| PlanChange::new(format!("write resolved {ns}")))
            .collect();

        let path = ctx.expand_home(&self.target);
        let rendered = render_shell_env(&env);
        match read_existing(&path)? {
            None => changes.push(PlanChange::new(format!("create {}", path.display()))),
            Some(existing) if existing != rendered => changes.push(
                PlanChange::new(format!("update {}", path.display())).with_details(format!(
                    "{} lines on disk, {} rendered",
                    existing.lines().count(),
                    rendered.lines().count()
                )),
            ),
            Some(_) => {}
        }
        Ok(PlanResult::with_changes(changes))
    }

    fn apply(&self, ctx: &Context) -> Result<ModuleResult> {
        let env = ShellEnv::resolve(ctx)?;
        let c = &ctx.contributions;
        let mut wrote = false;
        wrote |= self.sync_resolved(ctx, c.paths(), &env.paths)?;
        wrote |= self.sync_resolved(ctx, c.aliases(), &env.aliases)?;
        wrote |= self.sync_resolved(ctx, c.packages(), &env.packages)?;
        wrote |= self.sync_resolved(ctx, c.shell_init(), &env.init)?;

        let path = ctx.expand_home(&self.target);
        let rendered = render_shell_env(&env);
        let file_changed = read_existing(&path)?.as_deref() != Some(rendered.as_str());
        if file_changed {
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            std::fs::write(&path, &rendered)
                .with_context(|| format!("writing {}", path.display()))?;
            ctx.log.info(&format!("wrote {}", path.display()));
        }

        Ok(ModuleResult::ok(file_changed || wrote))
    }

    fn capture_state(&self, ctx: &Context) -> Option<Result<Value>> {
        let path = ctx.expand_home(&self.target);
        Some(read_existing(&path).map(|existing| {
            let resolved: Map<String, Value> = [
                (Paths::NAME, stored_checksum::<Paths>(ctx)),
                (Aliases::NAME, stored_checksum::<Aliases>(ctx)),
                (Packages::NAME, stored_checksum::<Packages>(ctx)),
                (ShellInit::NAME, stored_checksum::<ShellInit>(ctx)),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
            json!({
                "file": existing.map(|s| checksum(&Value::String(s))),
                "resolved": resolved,
            })
        }))
    }

    fn expected_state(&self, ctx: &Context) -> Option<Result<Value>> {
        let expected = || -> Result<Value> {
            let env = ShellEnv::resolve(ctx)?;
            let resolved: Map<String, Value> = [
                (Paths::NAME, fresh_checksum::<Paths>(&env.paths)?),
                (Aliases::NAME, fresh_checksum::<Aliases>(&env.aliases)?),
                (Packages::NAME, fresh_checksum::<Packages>(&env.packages)?),
                (ShellInit::NAME, fresh_checksum::<ShellInit>(&env.init)?),
            ]
            .into_iter()
            .map(|(k, v)| (k.to_string(), v))
            .collect();
            Ok(json!({
                "file": checksum(&Value::String(render_shell_env(&env))),
                "resolved": resolved,
            }))
        };
        Some(expected())
    }

    fn details(&self, ctx: &Context) -> Option<Result<UnitDetails>> {
        let path = ctx.expand_home(&self.target);
        Some(read_existing(&path).map(|existing| {
            let mut details = UnitDetails::default();
            if let Some(contents) = existing
                && !contents.starts_with(HEADER)
            {
                details
                    .issues
                    .push(format!("{} was not generated by dotfiles", path.display()));
                details
                    .recommendations
                    .push(format!("back up {} before applying", path.display()));
            }
            details
        }))
    }
}

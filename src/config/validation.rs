//! Non-fatal checks over a loaded [`UnitsConfig`].
//!
//! Warnings are reported before the engine registers anything; the engine
//! still rejects duplicate ids and missing dependencies on its own.
use std::collections::{HashMap, HashSet};

use super::UnitsConfig;
use crate::contrib::{PackageManager, PathEntry};
use crate::platform::Platform;
use crate::units::{ContributorSpec, SHELL_ENV_ID};

/// A validation warning detected during configuration loading.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    /// The configuration section (e.g. "paths", "packages").
    pub source: String,
    /// The unit or entry that triggered the warning.
    pub item: String,
    /// Human-readable warning message.
    pub message: String,
}

impl ValidationWarning {
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        item: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            source: source.into(),
            item: item.into(),
            message: message.into(),
        }
    }
}

/// A check over the whole configuration.
pub trait ConfigValidator {
    /// Validate the configuration and return any warnings found.
    fn validate(&self, config: &UnitsConfig, platform: Platform) -> Vec<ValidationWarning>;

    /// Human-readable validator name.
    fn name(&self) -> &'static str;
}

/// `(section, spec)` pairs for every contributor, in declaration order.
fn sections(config: &UnitsConfig) -> Vec<(&'static str, SpecView<'_>)> {
    let mut out = Vec::new();
    out.extend(config.paths.iter().map(|s| ("paths", SpecView::of(s))));
    out.extend(config.aliases.iter().map(|s| ("aliases", SpecView::of(s))));
    out.extend(config.packages.iter().map(|s| ("packages", SpecView::of(s))));
    out.extend(config.shell_init.iter().map(|s| ("shell_init", SpecView::of(s))));
    out
}

/// The entry-independent fields of a [`ContributorSpec`].
struct SpecView<'a> {
    id: &'a str,
    entries: usize,
    platforms: Option<&'a [Platform]>,
    depends_on: &'a [String],
}

impl<'a> SpecView<'a> {
    fn of<T>(spec: &'a ContributorSpec<T>) -> Self {
        Self {
            id: &spec.id,
            entries: spec.entries.len(),
            platforms: spec.platforms.as_deref(),
            depends_on: &spec.depends_on,
        }
    }

    fn applies_to(&self, platform: Platform) -> bool {
        self.platforms.is_none_or(|p| p.contains(&platform))
    }
}

/// Empty, duplicate, and reserved unit ids.
#[derive(Debug)]
pub struct UnitIdValidator;

impl ConfigValidator for UnitIdValidator {
    fn validate(&self, config: &UnitsConfig, _platform: Platform) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();
        let mut seen: HashMap<&str, &str> = HashMap::new();

        for (section, spec) in sections(config) {
            if spec.id.trim().is_empty() {
                warnings.push(ValidationWarning::new(section, spec.id, "unit id is empty"));
                continue;
            }
            if let Some(first) = seen.insert(spec.id, section) {
                warnings.push(ValidationWarning::new(
                    section,
                    spec.id,
                    format!("unit id already declared in [[{first}]]"),
                ));
            }
            if spec.id == SHELL_ENV_ID && config.shell_env.is_some() {
                warnings.push(ValidationWarning::new(
                    section,
                    spec.id,
                    "unit id is reserved for the shell environment unit",
                ));
            }
        }

        warnings
    }

    fn name(&self) -> &'static str {
        "unit-ids"
    }
}

/// Unknown and self-referencing `depends_on` entries.
#[derive(Debug)]
pub struct DependencyValidator;

impl ConfigValidator for DependencyValidator {
    fn validate(&self, config: &UnitsConfig, _platform: Platform) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();
        let views = sections(config);
        let mut known: HashSet<&str> = views.iter().map(|(_, s)| s.id).collect();
        if config.shell_env.is_some() {
            known.insert(SHELL_ENV_ID);
        }

        for (section, spec) in &views {
            for dep in spec.depends_on {
                if dep == spec.id {
                    warnings.push(ValidationWarning::new(
                        *section,
                        spec.id,
                        "unit depends on itself",
                    ));
                } else if !known.contains(dep.as_str()) {
                    warnings.push(ValidationWarning::new(
                        *section,
                        spec.id,
                        format!("depends on unknown unit '{dep}'"),
                    ));
                }
            }
        }

        warnings
    }

    fn name(&self) -> &'static str {
        "dependencies"
    }
}

/// Entry-level problems: empty units, malformed paths and aliases, and
/// package managers that do not exist on this platform.
#[derive(Debug)]
pub struct EntryValidator;

impl EntryValidator {
    fn check_path(entry: &PathEntry) -> Option<&'static str> {
        if entry.path.trim().is_empty() {
            Some("path is empty")
        } else if !entry.path.starts_with('/') && !entry.path.starts_with("~/") {
            Some("path should be absolute or start with ~/")
        } else if entry.path.contains(':') {
            Some("path must not contain ':'")
        } else {
            None
        }
    }

    const fn manager_supported(manager: PackageManager, platform: Platform) -> bool {
        match manager {
            PackageManager::Apt => matches!(platform, Platform::Ubuntu),
            PackageManager::Yum => matches!(platform, Platform::Al2),
            PackageManager::Homebrew | PackageManager::Cargo | PackageManager::Npm => true,
        }
    }
}

impl ConfigValidator for EntryValidator {
    fn validate(&self, config: &UnitsConfig, platform: Platform) -> Vec<ValidationWarning> {
        let mut warnings = Vec::new();

        for (section, spec) in sections(config) {
            if spec.entries == 0 {
                warnings.push(ValidationWarning::new(section, spec.id, "unit has no entries"));
            }
            if spec.platforms.is_some_and(<[Platform]>::is_empty) {
                warnings.push(ValidationWarning::new(
                    section,
                    spec.id,
                    "empty platform list; the unit never applies",
                ));
            }
        }

        for spec in &config.paths {
            for entry in &spec.entries {
                if let Some(message) = Self::check_path(entry) {
                    warnings.push(ValidationWarning::new("paths", &entry.path, message));
                }
            }
        }

        for spec in &config.aliases {
            for entry in &spec.entries {
                if entry.name.is_empty()
                    || entry.name.contains(|c: char| c.is_whitespace() || c == '=')
                {
                    warnings.push(ValidationWarning::new(
                        "aliases",
                        &entry.name,
                        "alias name must be non-empty without whitespace or '='",
                    ));
                }
            }
        }

        for spec in &config.packages {
            if !SpecView::of(spec).applies_to(platform) {
                continue;
            }
            for entry in &spec.entries {
                if !Self::manager_supported(entry.manager, platform) {
                    warnings.push(ValidationWarning::new(
                        "packages",
                        &entry.name,
                        format!("{} is not available on {platform}", entry.manager),
                    ));
                }
            }
        }

        for spec in &config.shell_init {
            for entry in &spec.entries {
                if entry.content.trim().is_empty() {
                    warnings.push(ValidationWarning::new(
                        "shell_init",
                        &entry.name,
                        "snippet content is empty",
                    ));
                }
            }
        }

        if let Some(env) = &config.shell_env
            && env.target.trim().is_empty()
        {
            warnings.push(ValidationWarning::new(
                "shell_env",
                SHELL_ENV_ID,
                "target path is empty",
            ));
        }

        warnings
    }

    fn name(&self) -> &'static str {
        "entries"
    }
}

/// Validate all configuration and return collected warnings.
#[must_use]
pub fn validate_all(config: &UnitsConfig, platform: Platform) -> Vec<ValidationWarning> {
    let validators: Vec<Box<dyn ConfigValidator>> = vec![
        Box::new(UnitIdValidator),
        Box::new(DependencyValidator),
        Box::new(EntryValidator),
    ];

    let mut all_warnings = Vec::new();
    for validator in validators {
        all_warnings.extend(validator.validate(config, platform));
    }
    all_warnings
}

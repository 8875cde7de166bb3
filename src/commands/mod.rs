pub mod apply;
pub mod completions;
pub mod plan;
pub mod status;
pub mod version;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context as _, Result};
use serde::Serialize;
use serde_json::{Map, Value};

use crate::cli::GlobalOpts;
use crate::config::{self, UnitsConfig, validation};
use crate::engine::{Engine, Report};
use crate::logging::{Log, Logger};
use crate::state::{JsonFileStore, StateStore};
use crate::units::Environment;

/// Shared state produced by the common command setup sequence.
///
/// Encapsulates environment detection, configuration loading, and engine
/// construction so that each command does not have to repeat the boilerplate.
#[derive(Debug)]
pub struct CommandSetup {
    pub engine: Engine,
    pub config_path: PathBuf,
    pub state_path: PathBuf,
}

impl CommandSetup {
    /// Detect the environment, load the units file, open the state store,
    /// and register every declared unit.
    ///
    /// # Errors
    ///
    /// Returns an error if the environment cannot be detected, the units file
    /// fails to parse, the state file is unreadable, or registration fails.
    pub fn init(global: &GlobalOpts, log: &Arc<Logger>) -> Result<Self> {
        let env = Environment::detect()?;
        let config_path = config::resolve_config_path(global.config.as_deref(), &env.cwd);
        let state_path = global
            .state
            .clone()
            .unwrap_or_else(config::default_state_path);

        log.stage("Loading configuration");
        log.debug(&format!("platform: {}", env.platform));
        log.debug(&format!("units file: {}", config_path.display()));
        log.debug(&format!("state file: {}", state_path.display()));

        let units = UnitsConfig::load(&config_path)
            .with_context(|| format!("loading {}", config_path.display()))?;

        let warnings = validation::validate_all(&units, env.platform);
        if !warnings.is_empty() {
            log.warn(&format!(
                "found {} configuration warning(s):",
                warnings.len()
            ));
            for warning in &warnings {
                log.warn(&format!(
                    "  {} [{}]: {}",
                    warning.source, warning.item, warning.message
                ));
            }
        }

        let store = JsonFileStore::open(&state_path)
            .with_context(|| format!("opening state file {}", state_path.display()))?;

        let mut engine = Engine::new(
            env,
            Arc::clone(log) as Arc<dyn Log>,
            Arc::new(store) as Arc<dyn StateStore>,
        );
        for unit in units.into_units() {
            engine.register(unit)?;
        }
        log.info(&format!("loaded {} unit(s)", engine.len()));

        Ok(Self {
            engine,
            config_path,
            state_path,
        })
    }
}

/// `None` (every unit) for an empty id list.
#[must_use]
pub fn selection(ids: &[String]) -> Option<&[String]> {
    (!ids.is_empty()).then_some(ids)
}

/// Print a report to stdout as a JSON object keyed by unit id.
///
/// # Errors
///
/// Returns an error if a result cannot be serialized.
#[allow(clippy::print_stdout)]
pub fn print_report_json<T: Serialize>(report: &Report<T>) -> Result<()> {
    let mut out = Map::new();
    for (id, value) in report.iter() {
        out.insert(id.to_string(), serde_json::to_value(value)?);
    }
    println!("{}", serde_json::to_string_pretty(&Value::Object(out))?);
    Ok(())
}

/// Print the summary (unless output is machine-readable) and bail if any
/// unit failed.
///
/// # Errors
///
/// Returns an error if one or more units recorded a failure.
pub fn finish(log: &Logger, summary: bool) -> Result<()> {
    if summary {
        log.print_summary();
    }

    let count = log.failure_count();
    if count > 0 {
        anyhow::bail!("{count} unit(s) failed");
    }
    Ok(())
}

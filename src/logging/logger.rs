//! Structured logger with summary collection.
use std::path::PathBuf;
use std::sync::Mutex;

use super::types::{Log, UnitEntry, UnitOutcome};
use super::utils::log_file_path;

/// Implement the display methods of [`Log`] by delegating to inherent methods
/// of the same name on the implementing type.
macro_rules! forward_log_methods {
    ($($method:ident),+ $(,)?) => {
        $(
            fn $method(&self, msg: &str) {
                self.$method(msg);
            }
        )+
    };
}

/// Structured logger with dry-run awareness and summary collection.
///
/// Messages go through [`tracing`]; the subscriber installed by
/// [`init_subscriber`](super::subscriber::init_subscriber) writes them to the
/// console and to `$XDG_CACHE_HOME/dotfiles/<command>.log`.
#[derive(Debug)]
pub struct Logger {
    units: Mutex<Vec<UnitEntry>>,
    log_file: Option<PathBuf>,
}

impl Logger {
    /// Create a new logger.
    ///
    /// Stores the log file path for display in the run summary.  The file
    /// itself is created by the subscriber's file layer.
    #[must_use]
    pub fn new(command: &str) -> Self {
        Self {
            units: Mutex::new(Vec::new()),
            log_file: log_file_path(command),
        }
    }

    /// Return the log file path, if available.
    #[cfg(test)]
    pub const fn log_path(&self) -> Option<&PathBuf> {
        self.log_file.as_ref()
    }

    /// Return a clone of all recorded unit entries.
    #[must_use]
    pub fn unit_entries(&self) -> Vec<UnitEntry> {
        self.units
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }

    /// Log an error message.
    pub fn error(&self, msg: &str) {
        tracing::error!("{msg}");
    }

    /// Log a warning message.
    pub fn warn(&self, msg: &str) {
        tracing::warn!("{msg}");
    }

    /// Log a stage header (major section).
    pub fn stage(&self, msg: &str) {
        tracing::info!(target: "dotfiles::stage", "{msg}");
    }

    /// Log an informational message.
    pub fn info(&self, msg: &str) {
        tracing::info!("{msg}");
    }

    /// Log a debug message (suppressed on console unless verbose; always
    /// written to the log file).
    pub fn debug(&self, msg: &str) {
        tracing::debug!("{msg}");
    }

    /// Log a dry-run action message.
    pub fn dry_run(&self, msg: &str) {
        tracing::info!(target: "dotfiles::dry_run", "{msg}");
    }

    /// Record a unit outcome for the summary.
    ///
    /// A unit appears once in the summary: recording the same id again
    /// replaces its earlier entry.
    pub fn record_unit(&self, id: &str, outcome: UnitOutcome, message: Option<&str>) {
        let mut guard = self
            .units
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let entry = UnitEntry {
            id: id.to_string(),
            outcome,
            message: message.map(String::from),
        };
        if let Some(existing) = guard.iter_mut().find(|e| e.id == id) {
            *existing = entry;
        } else {
            guard.push(entry);
        }
    }

    /// Return `true` if any recorded unit has failed.
    #[must_use]
    pub fn has_failures(&self) -> bool {
        self.failure_count() > 0
    }

    /// Count the number of failed units.
    #[must_use]
    pub fn failure_count(&self) -> usize {
        self.units
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .iter()
            .filter(|u| u.outcome == UnitOutcome::Failed)
            .count()
    }

    /// Print the summary of all recorded units.
    #[allow(clippy::print_stdout)]
    pub fn print_summary(&self) {
        let units = self.unit_entries();
        if units.is_empty() {
            return;
        }

        println!();
        self.stage("Summary");

        let mut applied = 0u32;
        let mut stale = 0u32;
        let mut not_applicable = 0u32;
        let mut skipped = 0u32;
        let mut dry_run = 0u32;
        let mut failed = 0u32;

        for unit in &units {
            let (icon, color) = match unit.outcome {
                UnitOutcome::Applied => {
                    applied += 1;
                    ("✓", "\x1b[32m")
                }
                UnitOutcome::Stale => {
                    stale += 1;
                    ("●", "\x1b[36m")
                }
                UnitOutcome::NotApplicable => {
                    not_applicable += 1;
                    ("·", "\x1b[2m")
                }
                UnitOutcome::Skipped => {
                    skipped += 1;
                    ("○", "\x1b[33m")
                }
                UnitOutcome::DryRun => {
                    dry_run += 1;
                    ("~", "\x1b[37m")
                }
                UnitOutcome::Failed => {
                    failed += 1;
                    ("✗", "\x1b[31m")
                }
            };

            let suffix = unit
                .message
                .as_ref()
                .map_or_else(String::new, |msg| format!(" ({msg})"));

            self.info(&format!("{color}{icon} {}{suffix}\x1b[0m", unit.id));
        }

        println!();
        let total = applied + stale + not_applicable + skipped + dry_run + failed;
        self.info(&format!(
            "{total} units: \x1b[32m{applied} applied\x1b[0m, \x1b[36m{stale} stale\x1b[0m, \x1b[2m{not_applicable} n/a\x1b[0m, \x1b[33m{skipped} skipped\x1b[0m, \x1b[37m{dry_run} dry-run\x1b[0m, \x1b[31m{failed} failed\x1b[0m"
        ));

        if let Some(path) = &self.log_file {
            self.info(&format!("\x1b[2mlog: {}\x1b[0m", path.display()));
        }
    }
}

impl Log for Logger {
    forward_log_methods!(stage, info, debug, warn, error, dry_run);

    fn record_unit(&self, id: &str, outcome: UnitOutcome, message: Option<&str>) {
        self.record_unit(id, outcome, message);
    }
}

//! Command: converge units to their desired state.
use std::sync::Arc;

use anyhow::Result;

use super::{CommandSetup, selection};
use crate::cli::{ApplyOpts, GlobalOpts};
use crate::engine::EngineHooks;
use crate::logging::{Logger, UnitOutcome};
use crate::units::UnitStatus;

/// Run the apply command.
///
/// With `--dry-run` the engine only plans, and every pending change is
/// logged as a dry-run line instead of being made.
///
/// # Errors
///
/// Returns an error if setup fails, the selection is invalid, or one or more
/// units failed.
pub fn run(global: &GlobalOpts, opts: &ApplyOpts, log: &Arc<Logger>) -> Result<()> {
    let setup = CommandSetup::init(global, log)?;
    let ids = selection(&opts.ids);

    if global.dry_run {
        log.stage("Planning (dry run)");
        let report = setup.engine.plan(ids)?;
        for (id, plan) in report.iter() {
            if plan.is_empty() {
                continue;
            }
            for change in &plan.changes {
                log.dry_run(&format!("{id}: {}", change.summary));
            }
            log.record_unit(
                id,
                UnitOutcome::DryRun,
                Some(&format!("{} change(s)", plan.changes.len())),
            );
        }
        return super::finish(log, true);
    }

    let hook_log = Arc::clone(log);
    let engine = setup.engine.with_hooks(EngineHooks {
        on_module_status_change: Some(Box::new(move |id: &str, status: UnitStatus| {
            hook_log.debug(&format!("{id} -> {status}"));
        })),
        // Context::report_progress already writes progress to the debug log.
        on_progress: None,
    });

    log.stage("Applying");
    let report = engine.apply(ids)?;
    let changed = report
        .iter()
        .filter(|(_, r)| r.changed == Some(true))
        .count();
    log.info(&format!("{changed} of {} unit(s) changed", report.len()));

    super::finish(log, true)
}

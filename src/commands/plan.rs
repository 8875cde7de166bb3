//! Command: show what `apply` would change.
use std::sync::Arc;

use anyhow::Result;

use super::{CommandSetup, selection};
use crate::cli::{GlobalOpts, PlanOpts};
use crate::engine::Report;
use crate::logging::Logger;
use crate::units::PlanResult;

/// Run the plan command.
///
/// # Errors
///
/// Returns an error if setup fails, the selection is invalid, or any unit
/// could not be planned.
pub fn run(global: &GlobalOpts, opts: &PlanOpts, log: &Arc<Logger>) -> Result<()> {
    let setup = CommandSetup::init(global, log)?;

    log.stage("Planning");
    let report = setup.engine.plan(selection(&opts.ids))?;

    if opts.json {
        super::print_report_json(&report)?;
    } else {
        print_changes(&report, log);
    }

    super::finish(log, !opts.json)
}

/// Log each unit's pending changes; converged units get a single line.
pub fn print_changes(report: &Report<PlanResult>, log: &Logger) {
    for (id, plan) in report.iter() {
        if plan.is_empty() {
            log.debug(&format!("{id}: up to date"));
            continue;
        }
        log.info(&format!("{id}: {} change(s)", plan.changes.len()));
        for change in &plan.changes {
            log.info(&format!("  {}", change.summary));
            if let Some(details) = &change.details {
                log.debug(&format!("    {details}"));
            }
        }
    }
}

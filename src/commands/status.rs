//! Command: report unit status.
use std::sync::Arc;

use anyhow::Result;

use super::{CommandSetup, selection};
use crate::cli::{GlobalOpts, StatusOpts};
use crate::logging::{Logger, UnitOutcome};
use crate::units::{StatusResult, UnitStatus};

/// Run the status command.
///
/// # Errors
///
/// Returns an error if setup fails, the selection is invalid, or any unit
/// is in the failed state.
pub fn run(global: &GlobalOpts, opts: &StatusOpts, log: &Arc<Logger>) -> Result<()> {
    let setup = CommandSetup::init(global, log)?;
    let ids = selection(&opts.ids);

    log.stage("Checking status");
    if opts.detailed {
        let report = setup.engine.detailed_statuses(ids)?;
        if opts.json {
            super::print_report_json(&report)?;
        }
        for (id, status) in report.iter() {
            if !opts.json {
                print_detailed(id, status, log);
            }
            log.record_unit(id, outcome_of(status.status), status.message.as_deref());
        }
    } else {
        let report = setup.engine.statuses(ids)?;
        if opts.json {
            super::print_report_json(&report)?;
        }
        for (id, status) in report.iter() {
            log.record_unit(id, outcome_of(status.status), None);
        }
    }

    super::finish(log, !opts.json)
}

/// Summary outcome for a unit status.
#[must_use]
pub const fn outcome_of(status: UnitStatus) -> UnitOutcome {
    match status {
        UnitStatus::Applied => UnitOutcome::Applied,
        UnitStatus::Stale | UnitStatus::Pending => UnitOutcome::Stale,
        UnitStatus::Skipped => UnitOutcome::Skipped,
        UnitStatus::Failed => UnitOutcome::Failed,
    }
}

fn print_detailed(id: &str, status: &StatusResult, log: &Logger) {
    match &status.message {
        Some(message) => log.info(&format!("{id}: {} ({message})", status.status)),
        None => log.info(&format!("{id}: {}", status.status)),
    }
    for line in &status.details.diff {
        log.info(&format!("  {line}"));
    }
    for issue in &status.details.issues {
        log.warn(&format!("  {id}: {issue}"));
    }
    for rec in &status.details.recommendations {
        log.info(&format!("  → {rec}"));
    }
    log.debug(&format!(
        "  checksums: current={} desired={} last_applied={}",
        status.metadata.checksums.current,
        status.metadata.checksums.desired,
        status
            .metadata
            .checksums
            .last_applied
            .as_deref()
            .unwrap_or("-")
    ));
}

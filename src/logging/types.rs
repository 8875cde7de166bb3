//! Summary entries, unit outcomes, and the [`Log`] trait.

/// One unit's outcome, kept for the run summary.
#[derive(Debug, Clone)]
pub struct UnitEntry {
    /// Unit id.
    pub id: String,
    /// What happened to the unit.
    pub outcome: UnitOutcome,
    /// Optional detail (error text, skip reason, change count).
    pub message: Option<String>,
}

/// How a unit ended up in this run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitOutcome {
    /// The unit is in its desired state (after apply, or confirmed by status).
    Applied,
    /// The unit has pending changes.
    Stale,
    /// `is_applicable` returned false on this machine.
    NotApplicable,
    /// Not executed because a dependency failed.
    Skipped,
    /// Changes were only previewed.
    DryRun,
    /// The unit's operation failed.
    Failed,
}

/// Logging sink handed to units through the run context.
///
/// [`Logger`](super::logger::Logger) is the production implementation;
/// tests may substitute their own to capture messages.
pub trait Log: Send + Sync {
    /// Log a stage header (major section).
    fn stage(&self, msg: &str);
    /// Log an informational message.
    fn info(&self, msg: &str);
    /// Log a debug message (may be suppressed on console).
    fn debug(&self, msg: &str);
    /// Log a warning message.
    fn warn(&self, msg: &str);
    /// Log an error message.
    fn error(&self, msg: &str);
    /// Log a dry-run action message.
    fn dry_run(&self, msg: &str);
    /// Record a unit outcome for the summary.
    fn record_unit(&self, id: &str, outcome: UnitOutcome, message: Option<&str>);
}

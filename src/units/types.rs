//! Values exchanged between units, the engine, and the comparator.
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One change a unit would make.
///
/// # Examples
///
/// ```
/// use dotfiles_engine::units::PlanChange;
///
/// let change = PlanChange::new("add /opt/bin to PATH").with_details("prepend");
/// assert_eq!(change.summary, "add /opt/bin to PATH");
/// assert_eq!(change.details.as_deref(), Some("prepend"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanChange {
    /// One-line description.
    pub summary: String,
    /// Optional longer explanation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl PlanChange {
    /// Create a change with a summary only.
    #[must_use]
    pub fn new(summary: impl Into<String>) -> Self {
        Self {
            summary: summary.into(),
            details: None,
        }
    }

    /// Attach details.
    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// Read-only description of what `apply` would do.  Never cached.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanResult {
    /// Pending changes; empty when the unit is already in its desired state.
    pub changes: Vec<PlanChange>,
}

impl PlanResult {
    /// A plan with nothing to do.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Build a plan from a list of changes.
    #[must_use]
    pub const fn with_changes(changes: Vec<PlanChange>) -> Self {
        Self { changes }
    }

    /// Whether the plan has no changes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

/// Message attached to results of units skipped because a dependency failed.
pub const SKIPPED_MESSAGE: &str = "skipped";

/// Message attached to results of units whose `apply` returned an error.
pub const EXCEPTION_MESSAGE: &str = "exception";

/// Outcome of `apply`.
///
/// # Examples
///
/// ```
/// use dotfiles_engine::units::ModuleResult;
///
/// let skipped = ModuleResult::skipped();
/// assert!(skipped.success);
/// assert_eq!(skipped.changed, Some(false));
/// assert_eq!(skipped.message.as_deref(), Some("skipped"));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModuleResult {
    /// Whether the unit reached its desired state.
    pub success: bool,
    /// Whether anything was modified.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub changed: Option<bool>,
    /// Human-readable note.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Error description for failed results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ModuleResult {
    /// Successful apply that did or did not modify anything.
    #[must_use]
    pub const fn ok(changed: bool) -> Self {
        Self {
            success: true,
            changed: Some(changed),
            message: None,
            error: None,
        }
    }

    /// Result recorded for a dependent of a failed unit.
    #[must_use]
    pub fn skipped() -> Self {
        Self {
            success: true,
            changed: Some(false),
            message: Some(SKIPPED_MESSAGE.to_string()),
            error: None,
        }
    }

    /// Result recorded when `apply` returned an error.
    #[must_use]
    pub fn exception(error: &anyhow::Error) -> Self {
        Self {
            success: false,
            changed: None,
            message: Some(EXCEPTION_MESSAGE.to_string()),
            error: Some(format!("{error:#}")),
        }
    }

    /// Unsuccessful result reported by the unit itself.
    #[must_use]
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            changed: None,
            message: None,
            error: Some(error.into()),
        }
    }

    /// Attach a message.
    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Whether this is the placeholder result of a skipped dependent.
    #[must_use]
    pub fn is_skipped(&self) -> bool {
        self.success && self.message.as_deref() == Some(SKIPPED_MESSAGE)
    }
}

/// Judgement of whether reality matches intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnitStatus {
    /// Reality differs from intent; `apply` would change something.
    Stale,
    /// An apply is in progress.
    Pending,
    /// Reality matches intent.
    Applied,
    /// Not executed because a dependency failed.
    Skipped,
    /// The last operation failed.
    Failed,
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Stale => "stale",
            Self::Pending => "pending",
            Self::Applied => "applied",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Where a coarse status came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatusBasis {
    /// The unit reported its own status.
    Unit,
    /// Derived from the number of planned changes.  An empty plan means
    /// "nothing to do", not that the unit confirmed its state.
    Plan,
    /// Neither the unit nor its plan could be consulted.
    Fallback,
}

/// Coarse status together with how it was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoarseStatus {
    /// The verdict.
    pub status: UnitStatus,
    /// How the verdict was reached.
    pub basis: StatusBasis,
}

/// Extra diagnostics a unit may attach to its detailed status.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitDetails {
    /// Problems found.
    #[serde(default)]
    pub issues: Vec<String>,
    /// Suggested remedies.
    #[serde(default)]
    pub recommendations: Vec<String>,
}

/// Current vs desired state and the observed differences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDetails {
    /// Captured current state.
    pub current: Value,
    /// Expected state.
    pub desired: Value,
    /// Differences between `current` and `desired`.
    pub diff: Vec<String>,
    /// Problems found.
    pub issues: Vec<String>,
    /// Suggested remedies.
    pub recommendations: Vec<String>,
}

/// Checksums of the compared snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checksums {
    /// Checksum of the current snapshot.
    pub current: String,
    /// Checksum of the expected snapshot.
    pub desired: String,
    /// Checksum of the after-state recorded by the last apply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied: Option<String>,
}

/// When the status was computed and when the unit was last applied.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamps {
    /// Time of this check.
    pub checked_at: DateTime<Utc>,
    /// Time of the last recorded apply attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_applied: Option<DateTime<Utc>>,
}

/// Outcome of the snapshot comparison.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateComparison {
    /// Whether any comparison found a difference.
    pub differs: bool,
    /// Time the comparison ran.
    pub last_validated: DateTime<Utc>,
}

/// Metadata attached to a detailed status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusMetadata {
    /// Snapshot checksums.
    pub checksums: Checksums,
    /// Check and apply times.
    pub timestamps: Timestamps,
    /// Comparison outcome.
    pub state_comparison: StateComparison,
}

/// Full status produced by the state comparator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusResult {
    /// The verdict.
    pub status: UnitStatus,
    /// Why the verdict was reached.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Current vs desired state.
    pub details: StatusDetails,
    /// Checksums and timestamps.
    pub metadata: StatusMetadata,
}

//! The unit contract and the concrete unit families.
//!
//! A [`Unit`] describes the desired state of one facet of the environment
//! and exposes a uniform plan/apply/status contract.  Besides the three
//! required operations a unit may opt into extra capabilities (state
//! capture, custom comparison, diagnostics) by overriding the
//! `Option`-returning methods; the engine and the state comparator branch on
//! whether a capability is present, never on the concrete type.
//!
//! Concrete families are built by factory functions from config records:
//! [`paths_unit`], [`aliases_unit`], [`packages_unit`], [`shell_init_unit`]
//! and [`shell_env_unit`].

mod context;
mod contributor;
mod shell_env;
mod types;

pub use context::{Context, Environment, ProgressSink};
pub use contributor::{
    ContributorSpec, ContributorUnit, aliases_unit, packages_unit, paths_unit, shell_init_unit,
};
pub use shell_env::{SHELL_ENV_ID, ShellEnv, ShellEnvUnit, render_shell_env, shell_env_unit};
pub use types::{
    Checksums, CoarseStatus, EXCEPTION_MESSAGE, ModuleResult, PlanChange, PlanResult,
    SKIPPED_MESSAGE, StateComparison, StatusBasis, StatusDetails, StatusMetadata, StatusResult,
    Timestamps, UnitDetails, UnitStatus,
};

use anyhow::Result;
use serde_json::Value;

use crate::comparator::StateSnapshot;

/// A self-contained configuration component.
///
/// `plan` must be read-only and `apply` idempotent: applying a unit that is
/// already in its desired state reports `changed: false`.
pub trait Unit: Send + Sync {
    /// Unique id.
    fn id(&self) -> &str;

    /// Ids of units that must complete the same operation first.
    fn depends_on(&self) -> &[String] {
        &[]
    }

    /// Whether the unit applies on this machine.
    ///
    /// # Errors
    ///
    /// Returns an error if applicability cannot be determined.
    fn is_applicable(&self, ctx: &Context) -> Result<bool>;

    /// Describe the changes `apply` would make.
    ///
    /// # Errors
    ///
    /// Returns an error if the current state cannot be inspected.
    fn plan(&self, ctx: &Context) -> Result<PlanResult>;

    /// Converge reality to the desired state.
    ///
    /// # Errors
    ///
    /// Returns an error if the unit could not be applied.
    fn apply(&self, ctx: &Context) -> Result<ModuleResult>;

    /// The unit's own verdict, if it can produce one cheaply.
    fn status(&self, _ctx: &Context) -> Option<Result<UnitStatus>> {
        None
    }

    /// Observe the current state as JSON.
    fn capture_state(&self, _ctx: &Context) -> Option<Result<Value>> {
        None
    }

    /// The state `apply` converges to, as JSON comparable with
    /// [`capture_state`](Self::capture_state).
    fn expected_state(&self, _ctx: &Context) -> Option<Result<Value>> {
        None
    }

    /// Custom snapshot comparison.  `Ok(true)` means the snapshots differ.
    fn compare_state(&self, _a: &StateSnapshot, _b: &StateSnapshot) -> Option<Result<bool>> {
        None
    }

    /// Extra issues and recommendations for detailed statuses.
    fn details(&self, _ctx: &Context) -> Option<Result<UnitDetails>> {
        None
    }

    /// Notification after the engine has settled this unit's status.
    fn on_status_change(&self, _status: UnitStatus) {}

    /// A progress message this unit sent through its context during `apply`.
    fn on_progress(&self, _message: &str) {}
}

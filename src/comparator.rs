//! Checksum-based drift detection.
//!
//! The comparator turns a unit's own hooks into a status verdict.  It takes
//! a *current* snapshot (what the machine looks like), an *expected*
//! snapshot (what `apply` converges to) and the [`ApplyMetadata`] persisted
//! by the last apply, then applies these rules in order:
//!
//! 1. the plan has at least one change: **stale**;
//! 2. current and expected snapshots differ: **stale**;
//! 3. the last apply's after-state differs from the current snapshot, or its
//!    expected state differs from today's expectation: **stale**;
//! 4. otherwise **applied**.
//!
//! Capture and comparison failures never propagate.  They are logged and
//! treated as drift.

use std::collections::BTreeSet;
use std::fmt::Write as _;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256};

use crate::error::StoreError;
use crate::state::{StateStore, StateStoreExt};
use crate::units::{
    Checksums, Context, ModuleResult, PlanResult, StateComparison, StatusDetails, StatusMetadata,
    StatusResult, Timestamps, Unit, UnitDetails, UnitStatus,
};

/// Store key prefix for [`ApplyMetadata`] records.
pub const APPLY_METADATA_PREFIX: &str = "apply_metadata:";

/// Store key of the apply metadata for `unit_id`.
#[must_use]
pub fn apply_metadata_key(unit_id: &str) -> String {
    format!("{APPLY_METADATA_PREFIX}{unit_id}")
}

/// How a snapshot's state was obtained.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotSource {
    /// `capture_state`.
    Captured,
    /// Synthesized from `status`.
    Status,
    /// `{id, applicable}` because the unit exposes neither.
    #[default]
    Fallback,
    /// `expected_state`.
    Expected,
    /// Synthesized from `plan`.
    Plan,
    /// The hook failed; `state` carries `{error, fallback: true}`.
    Error,
}

/// Timestamped, checksummed capture of a unit's state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Unit the snapshot belongs to.
    pub unit_id: String,
    /// Capture time.
    pub timestamp: DateTime<Utc>,
    /// [`checksum`] of `state`.
    pub checksum: String,
    /// Captured state.
    pub state: Value,
    /// How `state` was obtained.
    #[serde(default)]
    pub source: SnapshotSource,
}

impl StateSnapshot {
    /// Capture `state` now.
    #[must_use]
    pub fn new(unit_id: &str, state: Value, source: SnapshotSource) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            timestamp: Utc::now(),
            checksum: checksum(&state),
            state,
            source,
        }
    }

    fn failed(unit_id: &str, error: &anyhow::Error) -> Self {
        Self::new(
            unit_id,
            json!({ "error": format!("{error:#}"), "fallback": true }),
            SnapshotSource::Error,
        )
    }
}

/// Audit record written after every apply attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplyMetadata {
    /// Unit id.
    pub unit_id: String,
    /// When the attempt finished.
    pub applied_at: DateTime<Utc>,
    /// State before the attempt.
    pub before_state: StateSnapshot,
    /// State after the attempt (the before-state if capture failed).
    pub after_state: StateSnapshot,
    /// Expected state at the time of the attempt.
    pub expected_state: StateSnapshot,
    /// Checksum of the plan the attempt started from.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan_checksum: Option<String>,
    /// Whether the attempt succeeded.
    pub success: bool,
}

/// Lowercase hex SHA-256 of the canonical JSON form of `state`.
///
/// Canonical means object keys sorted and no insignificant whitespace, so
/// equal values always hash equally regardless of construction order.
///
/// # Examples
///
/// ```
/// use dotfiles_engine::comparator::checksum;
/// use serde_json::json;
///
/// assert_eq!(checksum(&json!({"a": 1, "b": 2})), checksum(&json!({"b": 2, "a": 1})));
/// assert_ne!(checksum(&json!({"a": 1})), checksum(&json!({"a": 2})));
/// assert_eq!(checksum(&json!(null)).len(), 64);
/// ```
#[must_use]
pub fn checksum(state: &Value) -> String {
    let mut canonical = String::new();
    write_canonical(state, &mut canonical);
    let digest = Sha256::digest(canonical.as_bytes());
    let mut hex = String::with_capacity(64);
    for b in &digest {
        // write! to a String is infallible
        write!(hex, "{b:02x}").unwrap_or(());
    }
    hex
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                if let Some(v) = map.get(key) {
                    write_canonical(v, out);
                }
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Capture the current state, propagating hook failures.
fn try_snapshot(unit: &dyn Unit, ctx: &Context) -> Result<StateSnapshot> {
    let id = unit.id();
    if let Some(captured) = unit.capture_state(ctx) {
        return Ok(StateSnapshot::new(id, captured?, SnapshotSource::Captured));
    }
    if let Some(status) = unit.status(ctx) {
        let state = json!({ "id": id, "status": status? });
        return Ok(StateSnapshot::new(id, state, SnapshotSource::Status));
    }
    let applicable = unit.is_applicable(ctx)?;
    Ok(StateSnapshot::new(
        id,
        json!({ "id": id, "applicable": applicable }),
        SnapshotSource::Fallback,
    ))
}

/// Capture the current state of `unit`.
///
/// Prefers `capture_state`, then a shape synthesized from `status`, then
/// `{id, applicable}`.  A failing hook yields `{error, fallback: true}`.
#[must_use]
pub fn snapshot(unit: &dyn Unit, ctx: &Context) -> StateSnapshot {
    try_snapshot(unit, ctx).unwrap_or_else(|e| {
        ctx.log
            .warn(&format!("{}: state capture failed: {e:#}", unit.id()));
        StateSnapshot::failed(unit.id(), &e)
    })
}

/// Capture the state `unit` is expected to reach.
///
/// Prefers `expected_state`, else synthesizes from `plan`: an empty plan
/// gives `{id, status: "applied"}`, otherwise `{id, status: "stale",
/// changes}`.  The applied shape matches what [`snapshot`] synthesizes from
/// a unit reporting `applied` through `status`.
#[must_use]
pub fn expected_snapshot(unit: &dyn Unit, ctx: &Context) -> StateSnapshot {
    expected_from(unit, ctx, None)
}

/// Like [`expected_snapshot`], reusing an already computed plan.
fn expected_from(
    unit: &dyn Unit,
    ctx: &Context,
    plan: Option<&Result<PlanResult>>,
) -> StateSnapshot {
    let id = unit.id();
    let outcome = match unit.expected_state(ctx) {
        Some(expected) => expected.map(|state| (state, SnapshotSource::Expected)),
        None => {
            let fresh;
            let plan = match plan {
                Some(plan) => plan,
                None => {
                    fresh = unit.plan(ctx);
                    &fresh
                }
            };
            match plan {
                Ok(plan) => Ok((plan_shape(id, plan), SnapshotSource::Plan)),
                Err(e) => Err(anyhow::anyhow!("{e:#}")),
            }
        }
    };
    match outcome {
        Ok((state, source)) => StateSnapshot::new(id, state, source),
        Err(e) => {
            ctx.log
                .warn(&format!("{id}: expected state unavailable: {e:#}"));
            StateSnapshot::failed(id, &e)
        }
    }
}

fn plan_shape(id: &str, plan: &PlanResult) -> Value {
    if plan.is_empty() {
        json!({ "id": id, "status": UnitStatus::Applied })
    } else {
        let changes: Vec<&str> = plan.changes.iter().map(|c| c.summary.as_str()).collect();
        json!({ "id": id, "status": UnitStatus::Stale, "changes": changes })
    }
}

/// Whether `current` and `expected` have shapes that can be compared.
///
/// A plan-derived expectation only matches the shape synthesized from
/// `status`.  The `{id, applicable}` fallback matches nothing; rule 1 has
/// already consulted the plan for such units.  A failed capture stays
/// comparable so it counts as drift.
fn comparable(current: &StateSnapshot, expected: &StateSnapshot) -> bool {
    !matches!(
        (current.source, expected.source),
        (SnapshotSource::Fallback, _) | (SnapshotSource::Captured, SnapshotSource::Plan)
    )
}

/// Whether two snapshots differ.
///
/// Uses the unit's `compare_state` when present, else checksum inequality.
/// Failed captures and comparator errors count as a difference.
#[must_use]
pub fn compare(unit: &dyn Unit, ctx: &Context, a: &StateSnapshot, b: &StateSnapshot) -> bool {
    if a.source == SnapshotSource::Error || b.source == SnapshotSource::Error {
        return true;
    }
    match unit.compare_state(a, b) {
        Some(Ok(differs)) => differs,
        Some(Err(e)) => {
            ctx.log
                .warn(&format!("{}: state comparison failed: {e:#}", unit.id()));
            true
        }
        None => a.checksum != b.checksum,
    }
}

/// Load the apply metadata recorded for `unit_id`.
///
/// # Errors
///
/// Returns an error if the stored record does not have the expected shape.
pub fn load_apply_metadata(
    state: &dyn StateStore,
    unit_id: &str,
) -> Result<Option<ApplyMetadata>, StoreError> {
    state.get(&apply_metadata_key(unit_id))
}

/// Top-level keys that were added, removed, or changed between `current`
/// and `desired`.
fn diff_states(current: &Value, desired: &Value) -> Vec<String> {
    match (current, desired) {
        (Value::Object(cur), Value::Object(des)) => {
            let keys: BTreeSet<&String> = cur.keys().chain(des.keys()).collect();
            keys.into_iter()
                .filter_map(|key| match (cur.get(key), des.get(key)) {
                    (None, Some(_)) => Some(format!("added {key}")),
                    (Some(_), None) => Some(format!("removed {key}")),
                    (Some(c), Some(d)) if c != d => Some(format!("changed {key}")),
                    _ => None,
                })
                .collect()
        }
        (c, d) if c == d => Vec::new(),
        _ => vec!["changed state".to_string()],
    }
}

/// Compute the full status of `unit`.
#[must_use]
pub fn resolve(unit: &dyn Unit, ctx: &Context) -> StatusResult {
    let id = unit.id();
    let checked_at = Utc::now();

    let plan = unit.plan(ctx);
    let current = snapshot(unit, ctx);
    let expected = expected_from(unit, ctx, Some(&plan));

    let mut issues = Vec::new();
    let mut recommendations = Vec::new();
    match unit.details(ctx) {
        Some(Ok(UnitDetails {
            issues: i,
            recommendations: r,
        })) => {
            issues.extend(i);
            recommendations.extend(r);
        }
        Some(Err(e)) => ctx.log.warn(&format!("{id}: details unavailable: {e:#}")),
        None => {}
    }
    if let Some(error) = current.state.get("error").and_then(Value::as_str)
        && current.source == SnapshotSource::Error
    {
        issues.push(format!("state capture failed: {error}"));
    }

    let metadata = load_apply_metadata(ctx.state.as_ref(), id).unwrap_or_else(|e| {
        ctx.log
            .warn(&format!("{id}: ignoring unreadable apply metadata: {e}"));
        None
    });

    let snapshots_differ =
        comparable(&current, &expected) && compare(unit, ctx, &current, &expected);

    let (after_differs, expectation_changed) = metadata.as_ref().map_or((false, false), |m| {
        let after = compare(unit, ctx, &m.after_state, &current);
        // A plan-derived expectation recorded before apply describes the
        // pending changes, not the converged state.
        let expectation = m.expected_state.source != SnapshotSource::Plan
            && expected.source != SnapshotSource::Plan
            && compare(unit, ctx, &m.expected_state, &expected);
        (after, expectation)
    });

    let differs = snapshots_differ || after_differs || expectation_changed;

    let (status, message) = match &plan {
        Ok(p) if !p.is_empty() => (
            UnitStatus::Stale,
            Some(format!("{} pending change(s)", p.changes.len())),
        ),
        Err(e) => {
            ctx.log.warn(&format!("{id}: plan failed: {e:#}"));
            issues.push(format!("plan failed: {e:#}"));
            (UnitStatus::Stale, Some("plan unavailable".to_string()))
        }
        Ok(_) if snapshots_differ => (
            UnitStatus::Stale,
            Some("current state differs from expected state".to_string()),
        ),
        Ok(_) if after_differs => (
            UnitStatus::Stale,
            Some("state drifted since last apply".to_string()),
        ),
        Ok(_) if expectation_changed => (
            UnitStatus::Stale,
            Some("expected state changed since last apply".to_string()),
        ),
        Ok(_) => (UnitStatus::Applied, None),
    };

    if status == UnitStatus::Stale && recommendations.is_empty() {
        recommendations.push(format!("run `dotfiles apply {id}`"));
    }

    StatusResult {
        status,
        message,
        details: StatusDetails {
            diff: diff_states(&current.state, &expected.state),
            current: current.state.clone(),
            desired: expected.state.clone(),
            issues,
            recommendations,
        },
        metadata: StatusMetadata {
            checksums: Checksums {
                current: current.checksum,
                desired: expected.checksum,
                last_applied: metadata.as_ref().map(|m| m.after_state.checksum.clone()),
            },
            timestamps: Timestamps {
                checked_at,
                last_applied: metadata.as_ref().map(|m| m.applied_at),
            },
            state_comparison: StateComparison {
                differs,
                last_validated: checked_at,
            },
        },
    }
}

/// Status for a unit whose applicability could not be determined.
#[must_use]
pub fn failed_status(error: &anyhow::Error) -> StatusResult {
    let now = Utc::now();
    let empty = json!({});
    StatusResult {
        status: UnitStatus::Failed,
        message: Some(format!("{error:#}")),
        details: StatusDetails {
            current: empty.clone(),
            desired: empty.clone(),
            diff: Vec::new(),
            issues: vec![format!("{error:#}")],
            recommendations: Vec::new(),
        },
        metadata: StatusMetadata {
            checksums: Checksums {
                current: checksum(&empty),
                desired: checksum(&empty),
                last_applied: None,
            },
            timestamps: Timestamps {
                checked_at: now,
                last_applied: None,
            },
            state_comparison: StateComparison {
                differs: true,
                last_validated: now,
            },
        },
    }
}

/// Run `apply_fn` and persist an [`ApplyMetadata`] record for the attempt.
///
/// The record is written and the store flushed whether or not `apply_fn`
/// succeeds.  This is the only writer of apply metadata.
///
/// # Errors
///
/// Returns the error of `apply_fn`.  If `apply_fn` succeeded but the record
/// could not be persisted, the persistence error is returned instead; if
/// both failed, the apply error wins and the persistence error is logged.
pub fn record_apply<F>(unit: &dyn Unit, ctx: &Context, apply_fn: F) -> Result<ModuleResult>
where
    F: FnOnce() -> Result<ModuleResult>,
{
    let id = unit.id();
    let before = snapshot(unit, ctx);
    let plan = unit.plan(ctx);
    let expected = expected_from(unit, ctx, Some(&plan));
    let plan_checksum = plan
        .ok()
        .and_then(|p| serde_json::to_value(p).ok())
        .map(|v| checksum(&v));

    let outcome = apply_fn();

    let after = try_snapshot(unit, ctx).unwrap_or_else(|e| {
        ctx.log
            .warn(&format!("{id}: after-apply capture failed, keeping before-state: {e:#}"));
        before.clone()
    });

    let record = ApplyMetadata {
        unit_id: id.to_string(),
        applied_at: Utc::now(),
        before_state: before,
        after_state: after,
        expected_state: expected,
        plan_checksum,
        success: matches!(&outcome, Ok(r) if r.success),
    };

    let persisted = ctx
        .state
        .set(&apply_metadata_key(id), &record)
        .and_then(|()| ctx.state.flush());

    match (outcome, persisted) {
        (outcome, Ok(())) => outcome,
        (Ok(result), Err(e)) if result.success => Err(anyhow::Error::new(e)
            .context(format!("failed to persist apply metadata for '{id}'"))),
        (outcome, Err(e)) => {
            ctx.log
                .error(&format!("{id}: failed to persist apply metadata: {e}"));
            outcome
        }
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::platform::Platform;
    use crate::state::{MockStateStore, StateStore};
    use crate::units::test_helpers::{MockUnit, context_over, make_context};
    use crate::units::{PlanChange, Unit};

    /// Unit whose only extra capability is a failing `capture_state`.
    struct BrokenCapture;

    impl Unit for BrokenCapture {
        fn id(&self) -> &str {
            "broken"
        }
        fn is_applicable(&self, _ctx: &Context) -> Result<bool> {
            Ok(true)
        }
        fn plan(&self, _ctx: &Context) -> Result<PlanResult> {
            Ok(PlanResult::empty())
        }
        fn apply(&self, _ctx: &Context) -> Result<ModuleResult> {
            Ok(ModuleResult::ok(false))
        }
        fn capture_state(&self, _ctx: &Context) -> Option<Result<Value>> {
            Some(Err(anyhow::anyhow!("permission denied")))
        }
        fn expected_state(&self, _ctx: &Context) -> Option<Result<Value>> {
            Some(Ok(json!({ "ok": true })))
        }
    }

    /// Unit with a custom comparator that always errors.
    struct FailingComparator;

    impl Unit for FailingComparator {
        fn id(&self) -> &str {
            "cmp"
        }
        fn is_applicable(&self, _ctx: &Context) -> Result<bool> {
            Ok(true)
        }
        fn plan(&self, _ctx: &Context) -> Result<PlanResult> {
            Ok(PlanResult::empty())
        }
        fn apply(&self, _ctx: &Context) -> Result<ModuleResult> {
            Ok(ModuleResult::ok(false))
        }
        fn capture_state(&self, _ctx: &Context) -> Option<Result<Value>> {
            Some(Ok(json!(1)))
        }
        fn expected_state(&self, _ctx: &Context) -> Option<Result<Value>> {
            Some(Ok(json!(1)))
        }
        fn compare_state(&self, _a: &StateSnapshot, _b: &StateSnapshot) -> Option<Result<bool>> {
            Some(Err(anyhow::anyhow!("comparator exploded")))
        }
    }

    // -----------------------------------------------------------------------
    // checksum
    // -----------------------------------------------------------------------

    #[test]
    fn checksum_ignores_key_order_and_nests() {
        let a = json!({ "outer": { "b": [1, 2], "a": "x" }, "z": null });
        let b = json!({ "z": null, "outer": { "a": "x", "b": [1, 2] } });
        assert_eq!(checksum(&a), checksum(&b));
    }

    #[test]
    fn checksum_is_sensitive_to_array_order() {
        assert_ne!(checksum(&json!([1, 2])), checksum(&json!([2, 1])));
    }

    #[test]
    fn checksum_of_empty_object_is_known_digest() {
        // sha256("{}")
        assert_eq!(
            checksum(&json!({})),
            "44136fa355b3678a1146ad16f7e8649e94fb4fc21fe77e8310c060f61caaff8a"
        );
    }

    // -----------------------------------------------------------------------
    // snapshot / expected_snapshot
    // -----------------------------------------------------------------------

    #[test]
    fn snapshot_prefers_capture_state() {
        let (ctx, _store) = make_context(Platform::Macos);
        let unit = MockUnit::new("u");
        let snap = snapshot(&unit, &ctx);
        assert_eq!(snap.source, SnapshotSource::Captured);
        assert_eq!(snap.state, json!({ "installed": false }));
        assert_eq!(snap.checksum, checksum(&snap.state));
    }

    #[test]
    fn snapshot_synthesizes_from_status() {
        let (ctx, _store) = make_context(Platform::Macos);
        let unit = MockUnit::new("u").stateless().with_status(UnitStatus::Applied);
        let snap = snapshot(&unit, &ctx);
        assert_eq!(snap.source, SnapshotSource::Status);
        assert_eq!(snap.state, json!({ "id": "u", "status": "applied" }));
    }

    #[test]
    fn snapshot_falls_back_to_applicability() {
        let (ctx, _store) = make_context(Platform::Macos);
        let unit = MockUnit::new("u").stateless();
        let snap = snapshot(&unit, &ctx);
        assert_eq!(snap.source, SnapshotSource::Fallback);
        assert_eq!(snap.state, json!({ "id": "u", "applicable": true }));
    }

    #[test]
    fn snapshot_downgrades_capture_failure() {
        let (ctx, _store) = make_context(Platform::Macos);
        let snap = snapshot(&BrokenCapture, &ctx);
        assert_eq!(snap.source, SnapshotSource::Error);
        assert_eq!(snap.state["fallback"], json!(true));
        assert_eq!(snap.state["error"], json!("permission denied"));
    }

    #[test]
    fn expected_snapshot_synthesizes_from_plan() {
        let (ctx, _store) = make_context(Platform::Macos);
        let pending = MockUnit::new("u").stateless();
        let snap = expected_snapshot(&pending, &ctx);
        assert_eq!(snap.source, SnapshotSource::Plan);
        assert_eq!(
            snap.state,
            json!({ "id": "u", "status": "stale", "changes": ["converge u"] })
        );

        let done = MockUnit::new("u").stateless().converged();
        assert_eq!(
            expected_snapshot(&done, &ctx).state,
            json!({ "id": "u", "status": "applied" })
        );
    }

    #[test]
    fn expected_snapshot_prefers_expected_state() {
        let (ctx, _store) = make_context(Platform::Macos);
        let unit = MockUnit::new("u");
        let snap = expected_snapshot(&unit, &ctx);
        assert_eq!(snap.source, SnapshotSource::Expected);
        assert_eq!(snap.state, json!({ "installed": true }));
        assert_eq!(unit.plan_calls.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    // -----------------------------------------------------------------------
    // compare
    // -----------------------------------------------------------------------

    #[test]
    fn compare_uses_checksums_by_default() {
        let (ctx, _store) = make_context(Platform::Macos);
        let unit = MockUnit::new("u");
        let a = StateSnapshot::new("u", json!({ "x": 1 }), SnapshotSource::Captured);
        let b = StateSnapshot::new("u", json!({ "x": 1 }), SnapshotSource::Expected);
        let c = StateSnapshot::new("u", json!({ "x": 2 }), SnapshotSource::Expected);
        assert!(!compare(&unit, &ctx, &a, &b));
        assert!(compare(&unit, &ctx, &a, &c));
    }

    #[test]
    fn comparator_error_means_differs() {
        let (ctx, _store) = make_context(Platform::Macos);
        let a = StateSnapshot::new("cmp", json!(1), SnapshotSource::Captured);
        assert!(compare(&FailingComparator, &ctx, &a, &a.clone()));
    }

    #[test]
    fn failed_capture_means_differs() {
        let (ctx, _store) = make_context(Platform::Macos);
        let unit = MockUnit::new("u");
        let failed = StateSnapshot::failed("u", &anyhow::anyhow!("x"));
        assert!(compare(&unit, &ctx, &failed, &failed.clone()));
    }

    // -----------------------------------------------------------------------
    // resolve
    // -----------------------------------------------------------------------

    #[test]
    fn pending_plan_is_stale() {
        let (ctx, _store) = make_context(Platform::Macos);
        let unit = MockUnit::new("u");
        let status = resolve(&unit, &ctx);
        assert_eq!(status.status, UnitStatus::Stale);
        assert_eq!(status.message.as_deref(), Some("1 pending change(s)"));
        assert_eq!(status.details.diff, vec!["changed installed"]);
        assert!(status.metadata.state_comparison.differs);
        assert_eq!(status.details.recommendations, vec!["run `dotfiles apply u`"]);
    }

    #[test]
    fn converged_unit_without_history_is_applied() {
        let (ctx, _store) = make_context(Platform::Macos);
        let unit = MockUnit::new("u").converged();
        let status = resolve(&unit, &ctx);
        assert_eq!(status.status, UnitStatus::Applied);
        assert!(!status.metadata.state_comparison.differs);
        assert_eq!(status.metadata.checksums.current, status.metadata.checksums.desired);
        assert!(status.metadata.timestamps.last_applied.is_none());
    }

    #[test]
    fn plan_only_unit_is_applied_when_plan_is_empty() {
        let (ctx, _store) = make_context(Platform::Macos);
        let unit = MockUnit::new("u").stateless().converged();
        assert_eq!(resolve(&unit, &ctx).status, UnitStatus::Applied);
    }

    #[test]
    fn capture_only_unit_converges_after_apply() {
        let (ctx, _store) = make_context(Platform::Macos);
        let unit = MockUnit::new("u").capture_only();
        record_apply(&unit, &ctx, || unit.apply(&ctx)).unwrap();
        record_apply(&unit, &ctx, || unit.apply(&ctx)).unwrap();

        let status = resolve(&unit, &ctx);
        assert_eq!(status.status, UnitStatus::Applied, "{:?}", status.message);
        assert!(status.message.is_none());
        assert!(!status.metadata.state_comparison.differs);

        *unit.observed().lock().unwrap() = json!({ "installed": false });
        let status = resolve(&unit, &ctx);
        assert_eq!(status.status, UnitStatus::Stale);
        assert_eq!(status.message.as_deref(), Some("1 pending change(s)"));
        assert!(status.metadata.state_comparison.differs);
    }

    #[test]
    fn status_snapshot_is_compared_with_plan_expectation() {
        let (ctx, _store) = make_context(Platform::Macos);
        let unit = MockUnit::new("u")
            .stateless()
            .converged()
            .with_status(UnitStatus::Stale);
        let status = resolve(&unit, &ctx);
        assert_eq!(status.status, UnitStatus::Stale);
        assert_eq!(
            status.message.as_deref(),
            Some("current state differs from expected state")
        );
    }

    #[test]
    fn capture_failure_is_stale_with_issue() {
        let (ctx, _store) = make_context(Platform::Macos);
        let status = resolve(&BrokenCapture, &ctx);
        assert_eq!(status.status, UnitStatus::Stale);
        assert!(
            status
                .details
                .issues
                .iter()
                .any(|i| i.contains("permission denied"))
        );
    }

    #[test]
    fn drift_after_apply_is_detected() {
        let (ctx, _store) = make_context(Platform::Macos);
        let unit = MockUnit::new("u");
        record_apply(&unit, &ctx, || unit.apply(&ctx)).unwrap();
        assert_eq!(resolve(&unit, &ctx).status, UnitStatus::Applied);

        // Change the record so its after-state no longer matches reality.
        let key = apply_metadata_key("u");
        let mut meta: ApplyMetadata = ctx.state.get(&key).unwrap().unwrap();
        meta.after_state =
            StateSnapshot::new("u", json!({ "installed": "old" }), SnapshotSource::Captured);
        ctx.state.set(&key, &meta).unwrap();

        let status = resolve(&unit, &ctx);
        assert_eq!(status.status, UnitStatus::Stale);
        assert_eq!(status.message.as_deref(), Some("state drifted since last apply"));
        assert!(status.metadata.state_comparison.differs);
    }

    #[test]
    fn changed_expectation_since_apply_is_stale() {
        let (ctx, _store) = make_context(Platform::Macos);
        let unit = MockUnit::new("u");
        record_apply(&unit, &ctx, || unit.apply(&ctx)).unwrap();

        let key = apply_metadata_key("u");
        let mut meta: ApplyMetadata = ctx.state.get(&key).unwrap().unwrap();
        meta.expected_state =
            StateSnapshot::new("u", json!({ "theme": "dark" }), SnapshotSource::Expected);
        ctx.state.set(&key, &meta).unwrap();

        let status = resolve(&unit, &ctx);
        assert_eq!(status.status, UnitStatus::Stale);
        assert_eq!(
            status.message.as_deref(),
            Some("expected state changed since last apply")
        );
    }

    #[test]
    fn resolve_reports_last_applied_metadata() {
        let (ctx, _store) = make_context(Platform::Macos);
        let unit = MockUnit::new("u");
        record_apply(&unit, &ctx, || unit.apply(&ctx)).unwrap();
        let status = resolve(&unit, &ctx);
        assert!(status.metadata.timestamps.last_applied.is_some());
        assert_eq!(
            status.metadata.checksums.last_applied.as_deref(),
            Some(status.metadata.checksums.current.as_str())
        );
    }

    // -----------------------------------------------------------------------
    // record_apply
    // -----------------------------------------------------------------------

    #[test]
    fn record_apply_persists_before_and_after() {
        let (ctx, _store) = make_context(Platform::Macos);
        let unit = MockUnit::new("u");
        let result = record_apply(&unit, &ctx, || unit.apply(&ctx)).unwrap();
        assert_eq!(result, ModuleResult::ok(true));

        let meta = load_apply_metadata(ctx.state.as_ref(), "u").unwrap().unwrap();
        assert!(meta.success);
        assert_eq!(meta.before_state.state, json!({ "installed": false }));
        assert_eq!(meta.after_state.state, json!({ "installed": true }));
        assert_eq!(meta.expected_state.state, json!({ "installed": true }));
        assert!(meta.plan_checksum.is_some());
    }

    #[test]
    fn record_apply_persists_failed_attempts() {
        let (ctx, _store) = make_context(Platform::Macos);
        let unit = MockUnit::new("u").failing("boom");
        let err = record_apply(&unit, &ctx, || unit.apply(&ctx)).unwrap_err();
        assert_eq!(err.to_string(), "boom");

        let meta = load_apply_metadata(ctx.state.as_ref(), "u").unwrap().unwrap();
        assert!(!meta.success);
        assert_eq!(meta.after_state.state, meta.before_state.state);
    }

    #[test]
    fn record_apply_keeps_before_state_when_after_capture_fails() {
        let (ctx, _store) = make_context(Platform::Macos);
        record_apply(&BrokenCapture, &ctx, || Ok(ModuleResult::ok(false))).unwrap();
        let meta = load_apply_metadata(ctx.state.as_ref(), "broken")
            .unwrap()
            .unwrap();
        assert_eq!(meta.after_state, meta.before_state);
    }

    #[test]
    fn record_apply_flushes_store() {
        let mut store = MockStateStore::new();
        store.expect_get_value().returning(|_| None);
        store.expect_set_value().times(1).returning(|_, _| ());
        store.expect_flush().times(1).returning(|| Ok(()));
        let ctx = context_over(Platform::Macos, Arc::new(store));
        let unit = MockUnit::new("u");
        record_apply(&unit, &ctx, || unit.apply(&ctx)).unwrap();
    }

    #[test]
    fn flush_failure_fails_successful_apply() {
        let mut store = MockStateStore::new();
        store.expect_get_value().returning(|_| None);
        store.expect_set_value().returning(|_, _| ());
        store.expect_flush().returning(|| {
            Err(StoreError::Io {
                path: "/state.json".to_string(),
                source: std::io::Error::other("read-only file system"),
            })
        });
        let ctx = context_over(Platform::Macos, Arc::new(store));
        let unit = MockUnit::new("u");
        let err = record_apply(&unit, &ctx, || unit.apply(&ctx)).unwrap_err();
        assert!(format!("{err:#}").contains("read-only file system"));
        assert!(err.to_string().contains("apply metadata for 'u'"));
    }

    #[test]
    fn apply_error_wins_over_flush_failure() {
        let mut store = MockStateStore::new();
        store.expect_get_value().returning(|_| None);
        store.expect_set_value().returning(|_, _| ());
        store.expect_flush().returning(|| {
            Err(StoreError::Io {
                path: "/state.json".to_string(),
                source: std::io::Error::other("disk full"),
            })
        });
        let ctx = context_over(Platform::Macos, Arc::new(store));
        let unit = MockUnit::new("u").failing("apply exploded");
        let err = record_apply(&unit, &ctx, || unit.apply(&ctx)).unwrap_err();
        assert_eq!(err.to_string(), "apply exploded");
    }

    #[test]
    fn diff_lists_top_level_keys() {
        let current = json!({ "a": 1, "b": 2, "gone": true });
        let desired = json!({ "a": 1, "b": 3, "new": true });
        assert_eq!(
            diff_states(&current, &desired),
            vec!["changed b", "removed gone", "added new"]
        );
        assert!(diff_states(&json!(1), &json!(1)).is_empty());
        assert_eq!(diff_states(&json!(1), &json!(2)), vec!["changed state"]);
    }

    #[test]
    fn plan_shape_lists_change_summaries() {
        let plan = PlanResult::with_changes(vec![PlanChange::new("a"), PlanChange::new("b")]);
        assert_eq!(
            plan_shape("x", &plan),
            json!({ "id": "x", "status": "stale", "changes": ["a", "b"] })
        );
    }

    #[test]
    fn failed_status_carries_error() {
        let status = failed_status(&anyhow::anyhow!("no HOME"));
        assert_eq!(status.status, UnitStatus::Failed);
        assert_eq!(status.message.as_deref(), Some("no HOME"));
        assert!(status.metadata.state_comparison.differs);
    }

    #[test]
    fn store_trait_object_is_usable_for_metadata() {
        let (ctx, store) = make_context(Platform::Macos);
        assert!(load_apply_metadata(store.as_ref() as &dyn StateStore, "u").unwrap().is_none());
        let unit = MockUnit::new("u");
        record_apply(&unit, &ctx, || unit.apply(&ctx)).unwrap();
        assert!(store.has(&apply_metadata_key("u")));
    }
}

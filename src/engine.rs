//! The reconciliation engine.
//!
//! Units are registered once, then every operation walks them in dependency
//! order, one unit at a time.  Later units may read contributions written by
//! earlier ones, so execution is strictly sequential.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::comparator;
use crate::contrib::Contributions;
use crate::error::EngineError;
use crate::graph::DependencyGraph;
use crate::logging::{Log, UnitOutcome};
use crate::state::StateStore;
use crate::units::{
    CoarseStatus, Context, Environment, ModuleResult, PlanResult, ProgressSink, StatusBasis,
    StatusResult, Unit, UnitStatus,
};

/// Callback receiving `(unit_id, status)` transitions during `apply`.
pub type StatusHook = Box<dyn Fn(&str, UnitStatus) + Send + Sync>;

/// Optional observers for UI integration.
#[derive(Default)]
pub struct EngineHooks {
    /// Called on every status transition during `apply`.
    pub on_module_status_change: Option<StatusHook>,
    /// Receives progress reports units send through their context.
    pub on_progress: Option<ProgressSink>,
}

impl fmt::Debug for EngineHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineHooks")
            .field(
                "on_module_status_change",
                &self.on_module_status_change.as_ref().map(|_| "<fn>"),
            )
            .field("on_progress", &self.on_progress.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// Per-unit results in execution order.
#[derive(Debug, Clone, PartialEq)]
pub struct Report<T> {
    entries: Vec<(String, T)>,
}

impl<T> Default for Report<T> {
    fn default() -> Self {
        Self {
            entries: Vec::new(),
        }
    }
}

impl<T> Report<T> {
    fn push(&mut self, id: &str, value: T) {
        self.entries.push((id.to_string(), value));
    }

    /// Result for `id`, if the unit was part of the run.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&T> {
        self.entries.iter().find(|(k, _)| k == id).map(|(_, v)| v)
    }

    /// Whether `id` has a result.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == id)
    }

    /// Unit ids in execution order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// `(id, result)` pairs in execution order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of results.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the report is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> IntoIterator for Report<T> {
    type Item = (String, T);
    type IntoIter = std::vec::IntoIter<(String, T)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

/// Registry of units plus the machinery to plan, apply, and inspect them.
pub struct Engine {
    units: HashMap<String, Arc<dyn Unit>>,
    graph: DependencyGraph,
    env: Environment,
    log: Arc<dyn Log>,
    state: Arc<dyn StateStore>,
    contributions: Arc<Contributions>,
    hooks: EngineHooks,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Engine")
            .field("units", &self.graph.len())
            .field("env", &self.env)
            .field("log", &"<dyn Log>")
            .field("state", &"<dyn StateStore>")
            .field("hooks", &self.hooks)
            .finish_non_exhaustive()
    }
}

impl Engine {
    /// Create an engine with no units.
    ///
    /// The contribution tables are created here and shared by every context
    /// the engine builds, so legacy list upgrades happen once per process.
    #[must_use]
    pub fn new(env: Environment, log: Arc<dyn Log>, state: Arc<dyn StateStore>) -> Self {
        let contributions = Arc::new(Contributions::new(&state, env.platform));
        Self {
            units: HashMap::new(),
            graph: DependencyGraph::new(),
            env,
            log,
            state,
            contributions,
            hooks: EngineHooks::default(),
        }
    }

    /// Install observers.
    #[must_use]
    pub fn with_hooks(mut self, hooks: EngineHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Register `unit`.
    ///
    /// Dependencies are checked when an operation runs, so units may be
    /// registered in any order.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::DuplicateModule`] if the id is taken.
    pub fn register(&mut self, unit: Box<dyn Unit>) -> Result<(), EngineError> {
        let id = unit.id().to_string();
        self.graph.add(&id, unit.depends_on())?;
        self.units.insert(id, Arc::from(unit));
        Ok(())
    }

    /// Number of registered units.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.len()
    }

    /// Whether no unit is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.is_empty()
    }

    /// Build the context for one run.
    #[must_use]
    pub fn build_context(&self) -> Context {
        let ctx = self.bare_context();
        match &self.hooks.on_progress {
            Some(sink) => ctx.with_progress(Arc::clone(sink)),
            None => ctx,
        }
    }

    fn bare_context(&self) -> Context {
        Context::new(
            &self.env,
            Arc::clone(&self.log),
            Arc::clone(&self.state),
            Arc::clone(&self.contributions),
        )
    }

    /// Context for applying `id`.  Progress reaches the unit's own
    /// `on_progress` first, then the engine hook.
    fn apply_context(&self, id: &str) -> Context {
        let unit = self.units.get(id).map(Arc::clone);
        let hook = self.hooks.on_progress.clone();
        self.bare_context()
            .with_progress(Arc::new(move |unit_id: &str, message: &str| {
                if let Some(unit) = &unit {
                    unit.on_progress(message);
                }
                if let Some(hook) = &hook {
                    hook(unit_id, message);
                }
            }))
    }

    /// Execution order for `ids` (all units when `None`).
    ///
    /// # Errors
    ///
    /// Returns an error if a dependency is missing, the graph has a cycle,
    /// or an id in `ids` is not registered.
    pub fn order(&self, ids: Option<&[String]>) -> Result<Vec<String>, EngineError> {
        self.graph.build_order(ids)
    }

    /// Iterate units in execution order, skipping unknown ids.
    fn walk<'a>(&'a self, order: &'a [String]) -> impl Iterator<Item = &'a dyn Unit> + 'a {
        order
            .iter()
            .filter_map(|id| self.units.get(id).map(Arc::as_ref))
    }

    /// Evaluate applicability; errors are logged with the unit id.
    fn applicable(&self, unit: &dyn Unit, ctx: &Context) -> Result<bool, anyhow::Error> {
        unit.is_applicable(ctx).inspect_err(|e| {
            self.log
                .error(&format!("{}: applicability check failed: {e:#}", unit.id()));
        })
    }

    fn emit(&self, id: &str, status: UnitStatus) {
        if let Some(hook) = &self.hooks.on_module_status_change {
            hook(id, status);
        }
    }

    /// Collect the plan of every applicable unit.  Read-only.
    ///
    /// Units whose applicability check or plan fails are logged, recorded as
    /// failed in the summary, and left out of the report.
    ///
    /// # Errors
    ///
    /// Returns an ordering error before any unit is consulted.
    pub fn plan(&self, ids: Option<&[String]>) -> Result<Report<PlanResult>, EngineError> {
        let order = self.order(ids)?;
        let ctx = self.build_context();
        let mut report = Report::default();

        for unit in self.walk(&order) {
            let id = unit.id();
            match self.applicable(unit, &ctx) {
                Ok(true) => {}
                Ok(false) => {
                    self.log.record_unit(id, UnitOutcome::NotApplicable, None);
                    continue;
                }
                Err(e) => {
                    self.log
                        .record_unit(id, UnitOutcome::Failed, Some(&format!("{e:#}")));
                    continue;
                }
            }
            match unit.plan(&ctx) {
                Ok(plan) => {
                    let (outcome, message) = if plan.is_empty() {
                        (UnitOutcome::Applied, None)
                    } else {
                        (
                            UnitOutcome::Stale,
                            Some(format!("{} change(s)", plan.changes.len())),
                        )
                    };
                    self.log.record_unit(id, outcome, message.as_deref());
                    report.push(id, plan);
                }
                Err(e) => {
                    self.log.error(&format!("{id}: plan failed: {e:#}"));
                    self.log
                        .record_unit(id, UnitOutcome::Failed, Some(&format!("{e:#}")));
                }
            }
        }
        Ok(report)
    }

    /// Apply every applicable unit in dependency order.
    ///
    /// A failing unit (error or `success: false`) does not stop the run, but
    /// every unit that transitively depends on it is recorded as skipped and
    /// never invoked.  The store is flushed after each unit and once more at
    /// the end.
    ///
    /// # Errors
    ///
    /// Returns an ordering error before any unit is invoked.
    pub fn apply(&self, ids: Option<&[String]>) -> Result<Report<ModuleResult>, EngineError> {
        let order = self.order(ids)?;
        let in_run: HashSet<&str> = order.iter().map(String::as_str).collect();
        let ctx = self.build_context();
        let mut report = Report::default();

        for unit in self.walk(&order) {
            let id = unit.id();
            if report.contains(id) {
                continue;
            }

            let result = match self.applicable(unit, &ctx) {
                Ok(false) => {
                    self.log.record_unit(id, UnitOutcome::NotApplicable, None);
                    continue;
                }
                Ok(true) => {
                    self.emit(id, UnitStatus::Pending);
                    let unit_ctx = self.apply_context(id);
                    comparator::record_apply(unit, &unit_ctx, || unit.apply(&unit_ctx))
                        .unwrap_or_else(|e| {
                            self.log.error(&format!("{id}: apply failed: {e:#}"));
                            ModuleResult::exception(&e)
                        })
                }
                Err(e) => ModuleResult::exception(&e),
            };

            if result.success {
                let message = match result.changed {
                    Some(false) => Some("unchanged"),
                    _ => None,
                };
                self.log.record_unit(id, UnitOutcome::Applied, message);
                self.emit(id, UnitStatus::Applied);
                unit.on_status_change(UnitStatus::Applied);
                report.push(id, result);
                continue;
            }

            let reason = result
                .error
                .clone()
                .or_else(|| result.message.clone())
                .unwrap_or_else(|| "unsuccessful".to_string());
            self.log.record_unit(id, UnitOutcome::Failed, Some(&reason));
            self.emit(id, UnitStatus::Failed);
            report.push(id, result);

            for dependent in self.graph.transitive_dependents(id) {
                if !in_run.contains(dependent.as_str()) || report.contains(&dependent) {
                    continue;
                }
                self.log.record_unit(
                    &dependent,
                    UnitOutcome::Skipped,
                    Some(&format!("dependency '{id}' failed")),
                );
                self.emit(&dependent, UnitStatus::Skipped);
                report.push(&dependent, ModuleResult::skipped());
            }
        }

        if let Err(e) = ctx.state.flush() {
            self.log.error(&format!("final state flush failed: {e}"));
        }
        Ok(report)
    }

    /// Coarse status of every applicable unit.  Read-only.
    ///
    /// Uses the unit's own `status` when available, else the size of its
    /// plan; the result's [`StatusBasis`] says which.  When neither works the
    /// unit is reported stale.
    ///
    /// # Errors
    ///
    /// Returns an ordering error before any unit is consulted.
    pub fn statuses(&self, ids: Option<&[String]>) -> Result<Report<CoarseStatus>, EngineError> {
        let order = self.order(ids)?;
        let ctx = self.build_context();
        let mut report = Report::default();

        for unit in self.walk(&order) {
            let id = unit.id();
            match self.applicable(unit, &ctx) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(_) => {
                    report.push(
                        id,
                        CoarseStatus {
                            status: UnitStatus::Failed,
                            basis: StatusBasis::Fallback,
                        },
                    );
                    continue;
                }
            }
            report.push(id, self.coarse_status(unit, &ctx));
        }
        Ok(report)
    }

    fn coarse_status(&self, unit: &dyn Unit, ctx: &Context) -> CoarseStatus {
        let id = unit.id();
        match unit.status(ctx) {
            Some(Ok(status)) => {
                return CoarseStatus {
                    status,
                    basis: StatusBasis::Unit,
                };
            }
            Some(Err(e)) => self.log.warn(&format!("{id}: status failed: {e:#}")),
            None => {}
        }
        match unit.plan(ctx) {
            Ok(plan) => CoarseStatus {
                status: if plan.is_empty() {
                    UnitStatus::Applied
                } else {
                    UnitStatus::Stale
                },
                basis: StatusBasis::Plan,
            },
            Err(e) => {
                self.log.warn(&format!("{id}: plan failed: {e:#}"));
                CoarseStatus {
                    status: UnitStatus::Stale,
                    basis: StatusBasis::Fallback,
                }
            }
        }
    }

    /// Full comparator status of every applicable unit.  Read-only.
    ///
    /// # Errors
    ///
    /// Returns an ordering error before any unit is consulted.
    pub fn detailed_statuses(
        &self,
        ids: Option<&[String]>,
    ) -> Result<Report<StatusResult>, EngineError> {
        let order = self.order(ids)?;
        let ctx = self.build_context();
        let mut report = Report::default();

        for unit in self.walk(&order) {
            let status = match self.applicable(unit, &ctx) {
                Ok(true) => comparator::resolve(unit, &ctx),
                Ok(false) => continue,
                Err(e) => comparator::failed_status(&e),
            };
            report.push(unit.id(), status);
        }
        Ok(report)
    }
}

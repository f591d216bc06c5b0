//! Wave executor - drives a plan to completion
//!
//! Waves run strictly in order. Units inside a wave run on a rayon pool and
//! only talk to each other through the [`ReferenceResolver`]: a unit's
//! exports are committed at the wave barrier, after every unit of the wave
//! has finished.

use rayon::prelude::*;
use std::collections::{BTreeMap, HashMap};

use crate::context::{CancellationToken, DeployContext, NoProgress, ProgressCallback};
use crate::error::{Error, Result, UnresolvedReason};
use crate::graph::Edge;
use crate::plan::Plan;
use crate::provider::{Handle, ProviderError, ResourceProvider};
use crate::report::{DeploymentResult, Phase, SkipCause, UnitReport, UnitStatus};
use crate::resolver::ReferenceResolver;
use crate::types::{ApplyOutcome, ExecuteOptions, ExecuteSummary, FailurePolicy, ResolvedIntent, Value};
use crate::unit::{AttributeRef, Unit};

/// Composition-root entry point
///
/// Owns the scheduling state of a run. Units never mutate it; they return
/// their exports as values.
pub struct Orchestrator<'a, P: ResourceProvider + ?Sized> {
    provider: &'a P,
    context: DeployContext,
    options: ExecuteOptions,
    cancel: CancellationToken,
}

/// Successful deployment pass of one unit
struct UnitPass {
    exports: BTreeMap<String, String>,
    summary: ExecuteSummary,
}

/// Failed deployment pass of one unit
struct UnitFailure {
    error: Error,
    summary: ExecuteSummary,
}

impl<'a, P: ResourceProvider + ?Sized> Orchestrator<'a, P> {
    pub fn new(provider: &'a P, context: DeployContext) -> Self {
        Self {
            provider,
            context,
            options: ExecuteOptions::default(),
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: ExecuteOptions) -> Self {
        self.options = options;
        self
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Token that cancels this orchestrator's runs
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Validate units and edges without touching any provider
    pub fn plan(&self, units: &[Unit], edges: &[Edge]) -> Result<Plan> {
        Plan::build(units, edges, &self.context)
    }

    /// Plan and execute a deployment
    pub fn run(&self, units: &[Unit], edges: &[Edge]) -> DeploymentResult {
        self.run_with_progress(units, edges, &mut NoProgress)
    }

    /// Plan and execute a deployment, reporting progress
    ///
    /// Planning errors produce a failed result in which every unit is
    /// skipped; the provider is never called.
    pub fn run_with_progress<C: ProgressCallback>(
        &self,
        units: &[Unit],
        edges: &[Edge],
        progress: &mut C,
    ) -> DeploymentResult {
        match self.plan(units, edges) {
            Ok(plan) => self.execute(&plan, progress),
            Err(e) => {
                log::warn!("planning failed: {e}");
                DeploymentResult::planning_failed(units, e)
            }
        }
    }

    /// Execute a validated plan wave by wave
    pub fn execute<C: ProgressCallback>(&self, plan: &Plan, progress: &mut C) -> DeploymentResult {
        log::debug!("executing plan\n{}", plan.describe());
        let resolver = ReferenceResolver::new(self.context.clone(), self.options.resolve_policy)
            .with_cancellation(self.cancel.clone());
        for unit in plan.units() {
            resolver.register(&unit.name, &unit.locality);
        }

        let mut statuses: HashMap<String, UnitStatus> = HashMap::new();
        let mut summaries: HashMap<String, ExecuteSummary> = HashMap::new();
        let mut first_error: Option<Error> = None;
        let mut halted_by: Option<String> = None;

        for wave in plan.waves() {
            progress.on_wave_start(wave);

            let mut runnable: Vec<&Unit> = Vec::new();
            for name in &wave.units {
                if let Some(cause) = self.skip_cause(plan, name, &statuses, halted_by.as_deref()) {
                    log::info!("skipping {name}: {cause}");
                    resolver.mark_failed(name);
                    statuses.insert(name.clone(), UnitStatus::Skipped { cause });
                } else if let Some(unit) = plan.unit(name) {
                    runnable.push(unit);
                }
            }

            if !runnable.is_empty() {
                log::info!(
                    "wave {}: deploying {}",
                    wave.index,
                    runnable
                        .iter()
                        .map(|unit| unit.name.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                );
            }

            let outcomes = self.run_wave(&runnable, &resolver);

            // Barrier: every unit of the wave has finished
            for (unit, outcome) in runnable.iter().zip(outcomes) {
                match outcome {
                    Ok(pass) => {
                        resolver.commit(
                            &unit.name,
                            pass.exports,
                            &plan.consumer_localities(&unit.name),
                        );
                        summaries.insert(unit.name.clone(), pass.summary);
                        statuses.insert(unit.name.clone(), UnitStatus::Completed);
                    }
                    Err(failure) => {
                        log::warn!("unit {} failed: {}", unit.name, failure.error);
                        let dependents = plan.transitive_consumers(&unit.name);
                        if !dependents.is_empty() {
                            log::warn!("skipping dependents of {}: {}", unit.name, dependents.join(", "));
                        }
                        resolver.mark_failed(&unit.name);
                        summaries.insert(unit.name.clone(), failure.summary);
                        if first_error.is_none() {
                            first_error = Some(failure.error.clone());
                        }
                        if halted_by.is_none()
                            && self.options.failure_policy == FailurePolicy::HaltNewWaves
                        {
                            halted_by = Some(unit.name.clone());
                        }
                        statuses.insert(
                            unit.name.clone(),
                            UnitStatus::Failed {
                                reason: failure.error,
                            },
                        );
                    }
                }
            }

            for name in &wave.units {
                if let Some(status) = statuses.get(name) {
                    progress.on_unit_complete(name, status);
                }
            }
            progress.on_wave_complete(wave);
        }

        let mut summary = ExecuteSummary::default();
        let units: Vec<UnitReport> = plan
            .units()
            .iter()
            .map(|unit| {
                let unit_summary = summaries.remove(&unit.name).unwrap_or_default();
                summary.merge(&unit_summary);
                UnitReport {
                    name: unit.name.clone(),
                    locality: unit.locality.clone(),
                    wave: plan.wave_of(&unit.name),
                    status: statuses.remove(&unit.name).unwrap_or(UnitStatus::Skipped {
                        cause: SkipCause::Cancelled,
                    }),
                    summary: unit_summary,
                }
            })
            .collect();

        let phase = if units.iter().all(|report| report.status.is_completed()) {
            Phase::Completed
        } else {
            Phase::Failed
        };

        // A cancellation that arrives after the last unit finished changes nothing
        if first_error.is_none() && phase == Phase::Failed && self.cancel.is_cancelled() {
            first_error = Some(Error::Cancelled);
        }

        DeploymentResult {
            phase,
            units,
            exports: resolver.export_table(),
            error: first_error,
            summary,
        }
    }

    /// Why a unit must not start, if anything
    ///
    /// A failed producer takes precedence over a halted run, which takes
    /// precedence over cancellation.
    fn skip_cause(
        &self,
        plan: &Plan,
        name: &str,
        statuses: &HashMap<String, UnitStatus>,
        halted_by: Option<&str>,
    ) -> Option<SkipCause> {
        for producer in plan.graph().producers_of(name) {
            match statuses.get(producer) {
                Some(UnitStatus::Completed) => {}
                Some(UnitStatus::Skipped {
                    cause: SkipCause::DependencyFailed { unit },
                }) => {
                    return Some(SkipCause::DependencyFailed { unit: unit.clone() });
                }
                Some(UnitStatus::Skipped { cause }) => return Some(cause.clone()),
                Some(UnitStatus::Failed { .. }) | None => {
                    return Some(SkipCause::DependencyFailed {
                        unit: producer.to_string(),
                    });
                }
            }
        }

        if let Some(unit) = halted_by {
            return Some(SkipCause::RunHalted {
                unit: unit.to_string(),
            });
        }
        if self.cancel.is_cancelled() {
            return Some(SkipCause::Cancelled);
        }
        None
    }

    /// Deploy the units of one wave, results in input order
    fn run_wave(
        &self,
        units: &[&Unit],
        resolver: &ReferenceResolver,
    ) -> Vec<std::result::Result<UnitPass, UnitFailure>> {
        let jobs = self.options.jobs.max(1);
        if jobs == 1 || units.len() <= 1 {
            return units
                .iter()
                .map(|unit| self.deploy_unit(unit, resolver))
                .collect();
        }

        match rayon::ThreadPoolBuilder::new().num_threads(jobs).build() {
            Ok(pool) => pool.install(|| {
                units
                    .par_iter()
                    .map(|unit| self.deploy_unit(unit, resolver))
                    .collect()
            }),
            Err(e) => {
                log::warn!("failed to create thread pool, deploying sequentially: {e}");
                units
                    .iter()
                    .map(|unit| self.deploy_unit(unit, resolver))
                    .collect()
            }
        }
    }

    /// One unit's deployment pass
    ///
    /// On failure every resource created during this pass is rolled back.
    fn deploy_unit(
        &self,
        unit: &Unit,
        resolver: &ReferenceResolver,
    ) -> std::result::Result<UnitPass, UnitFailure> {
        log::debug!("deploying {} to {}", unit.name, unit.locality);

        let mut summary = ExecuteSummary::default();
        let mut created: Vec<Handle> = Vec::new();

        match self.apply_unit(unit, resolver, &mut summary, &mut created) {
            Ok(exports) => Ok(UnitPass { exports, summary }),
            Err(error) => {
                if !created.is_empty() {
                    match self.provider.rollback(&unit.locality, &unit.name, &created) {
                        Ok(()) => {
                            log::warn!(
                                "rolled back {} resources created by {}",
                                created.len(),
                                unit.name
                            );
                            summary.rolled_back = created.len();
                        }
                        Err(e) => log::warn!("rollback of {} failed: {e}", unit.name),
                    }
                }
                Err(UnitFailure { error, summary })
            }
        }
    }

    fn apply_unit(
        &self,
        unit: &Unit,
        resolver: &ReferenceResolver,
        summary: &mut ExecuteSummary,
        created: &mut Vec<Handle>,
    ) -> Result<BTreeMap<String, String>> {
        let mut imports: HashMap<AttributeRef, String> = HashMap::new();
        for reference in unit.imports() {
            let value = resolver.resolve(&reference, &unit.locality)?;
            imports.insert(reference, value);
        }

        let mut handles: HashMap<String, Handle> = HashMap::new();
        let intents = unit
            .boundaries
            .iter()
            .map(|boundary| boundary.to_intent())
            .chain(unit.intents.iter().cloned());

        for intent in intents {
            if self.cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            let mut properties = BTreeMap::new();
            for (key, value) in intent.values() {
                let resolved = resolve_value(unit, &intent.logical_id, value, &imports, &handles)?;
                properties.insert(key.to_string(), resolved);
            }

            let resolved = ResolvedIntent::new(
                &unit.name,
                &intent.logical_id,
                intent.kind,
                self.context.physical_name(&unit.name, &intent.logical_id),
                properties,
                unit.tags.clone(),
            );

            let applied = self
                .provider
                .apply(&unit.locality, &resolved, &self.cancel)
                .map_err(|e| match e {
                    ProviderError::Aborted => Error::Cancelled,
                    other => Error::ProviderApply {
                        unit: unit.name.clone(),
                        resource: intent.logical_id.clone(),
                        message: other.to_string(),
                    },
                })?;

            log::debug!(
                "{}/{}: {:?} ({})",
                unit.name,
                intent.logical_id,
                applied.outcome,
                applied.handle.physical_id
            );
            summary.add_outcome(applied.outcome);
            if applied.outcome == ApplyOutcome::Created {
                created.push(applied.handle.clone());
            }
            handles.insert(intent.logical_id.clone(), applied.handle);
        }

        unit.exports
            .iter()
            .map(|(key, value)| {
                let owner = format!("export {key}");
                resolve_value(unit, &owner, value, &imports, &handles).map(|v| (key.clone(), v))
            })
            .collect()
    }
}

fn resolve_value(
    unit: &Unit,
    owner: &str,
    value: &Value,
    imports: &HashMap<AttributeRef, String>,
    handles: &HashMap<String, Handle>,
) -> Result<String> {
    match value {
        Value::Literal(text) => Ok(text.clone()),
        Value::Import(reference) => imports
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::unresolved(reference, UnresolvedReason::UnknownProducer)),
        Value::Local {
            resource,
            attribute,
        } => handles
            .get(resource)
            .and_then(|handle| handle.attribute(attribute))
            .map(str::to_string)
            .ok_or_else(|| Error::ProviderApply {
                unit: unit.name.clone(),
                resource: owner.to_string(),
                message: format!("{resource} has no attribute {attribute}"),
            }),
    }
}

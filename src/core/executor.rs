//! SS-018: Executor — orchestration loop for apply and destroy.
//!
//! declare → DAG → plan → for each change: resolve → provider → lock → events
//! → outputs. No rollback: a failed resource is recorded as failed and
//! whatever converged before it stays.

use super::output::AttributeStore;
use super::planner;
use super::resolver;
use super::state;
use super::types::*;
use crate::provider::Provider;
use crate::stack::Deployment;
use crate::tripwire::eventlog;
use std::collections::HashSet;
use std::path::Path;
use std::time::Instant;

/// Configuration for an apply or destroy run.
pub struct ApplyConfig<'a> {
    pub config: &'a StackConfig,
    pub deployment: &'a Deployment,
    pub state_dir: &'a Path,
    pub force: bool,
    pub dry_run: bool,
    pub resource_filter: Option<&'a str>,
}

/// Outcome of applying a single change.
enum ResourceOutcome {
    Converged,
    Destroyed,
    Unchanged,
    /// Locked but never created; dropped from the lock
    Forgotten,
    /// Filtered out, or waiting on a failed dependency
    Skipped,
    /// Failed; includes whether to stop (jidoka)
    Failed { should_stop: bool },
}

/// Shared context for recording resource outcomes.
struct RecordCtx<'a> {
    lock: &'a mut StateLock,
    store: &'a mut AttributeStore,
    state_dir: &'a Path,
    stack: &'a str,
    tripwire: bool,
    failure_policy: &'a FailurePolicy,
}

impl RecordCtx<'_> {
    fn event(&self, event: ProvenanceEvent) {
        log_tripwire(self.state_dir, self.stack, self.tripwire, event);
    }

    fn record_success(
        &mut self,
        change: &PlannedChange,
        depends_on: Vec<String>,
        attributes: Attributes,
        duration: f64,
    ) {
        self.store
            .insert(change.resource_id.clone(), attributes.clone());
        self.lock.resources.insert(
            change.resource_id.clone(),
            ResourceLock {
                kind: change.kind.clone(),
                status: ResourceStatus::Converged,
                applied_at: Some(eventlog::now_iso8601()),
                duration_seconds: Some(duration),
                hash: change.hash.clone(),
                attributes,
                depends_on,
            },
        );
        self.event(ProvenanceEvent::ResourceConverged {
            stack: self.stack.to_string(),
            resource: change.resource_id.clone(),
            duration_seconds: duration,
            hash: change.hash.clone(),
        });
    }

    /// Record a failure. Attributes of an already-created resource are kept
    /// so a later destroy can still find it. Returns true if jidoka should stop.
    fn record_failure(&mut self, resource_id: &str, kind: &ResourceKind, duration: f64, error: &str) -> bool {
        log::error!("{}: {}", resource_id, error);
        let attributes = self
            .lock
            .resources
            .get(resource_id)
            .map(|rl| rl.attributes.clone())
            .unwrap_or_default();
        let depends_on = self
            .lock
            .resources
            .get(resource_id)
            .map(|rl| rl.depends_on.clone())
            .unwrap_or_default();
        self.lock.resources.insert(
            resource_id.to_string(),
            ResourceLock {
                kind: kind.clone(),
                status: ResourceStatus::Failed,
                applied_at: Some(eventlog::now_iso8601()),
                duration_seconds: Some(duration),
                hash: String::new(),
                attributes,
                depends_on,
            },
        );
        self.event(ProvenanceEvent::ResourceFailed {
            stack: self.stack.to_string(),
            resource: resource_id.to_string(),
            error: error.to_string(),
        });

        if *self.failure_policy == FailurePolicy::StopOnFirst {
            eprintln!(
                "JIDOKA: stopping after failure on {}/{}: {}",
                self.stack, resource_id, error
            );
            return true;
        }
        false
    }

    fn record_destroyed(&mut self, resource_id: &str) {
        self.lock.resources.shift_remove(resource_id);
        self.store.remove(resource_id);
        self.event(ProvenanceEvent::ResourceDestroyed {
            stack: self.stack.to_string(),
            resource: resource_id.to_string(),
        });
    }
}

/// Log a tripwire event if tripwire is enabled.
fn log_tripwire(state_dir: &Path, stack: &str, tripwire: bool, event: ProvenanceEvent) {
    if tripwire {
        if let Err(e) = eventlog::append_event(state_dir, stack, event) {
            log::warn!("event log: {}", e);
        }
    }
}

/// Attributes of every converged resource in the lock.
fn store_from_lock(lock: &StateLock) -> AttributeStore {
    lock.resources
        .iter()
        .filter(|(_, rl)| rl.status == ResourceStatus::Converged)
        .map(|(id, rl)| (id.clone(), rl.attributes.clone()))
        .collect()
}

/// Delete one locked resource. A resource that never got created is just forgotten.
fn delete_locked(
    ctx: &mut RecordCtx,
    provider: &mut dyn Provider,
    resource_id: &str,
) -> ResourceOutcome {
    let Some(rl) = ctx.lock.resources.get(resource_id).cloned() else {
        return ResourceOutcome::Skipped;
    };
    if rl.attributes.is_empty() {
        ctx.lock.resources.shift_remove(resource_id);
        return ResourceOutcome::Forgotten;
    }

    ctx.event(ProvenanceEvent::ResourceStarted {
        stack: ctx.stack.to_string(),
        resource: resource_id.to_string(),
        action: PlanAction::Destroy.to_string(),
    });
    let name = rl.attributes.get("name").map(String::as_str).unwrap_or("?");
    log::info!("{}: destroying {} {}", resource_id, rl.kind, name);

    let start = Instant::now();
    match provider.delete(resource_id, &rl.kind, &rl.attributes) {
        Ok(()) => {
            ctx.record_destroyed(resource_id);
            ResourceOutcome::Destroyed
        }
        Err(e) => {
            let should_stop =
                ctx.record_failure(resource_id, &rl.kind, start.elapsed().as_secs_f64(), &e);
            ResourceOutcome::Failed { should_stop }
        }
    }
}

/// Apply a single planned change, returning its outcome.
fn apply_single_resource(
    cfg: &ApplyConfig,
    change: &PlannedChange,
    provider: &mut dyn Provider,
    blocked: &HashSet<String>,
    ctx: &mut RecordCtx,
) -> ResourceOutcome {
    if let Some(filter) = cfg.resource_filter {
        if change.resource_id != filter {
            return ResourceOutcome::Skipped;
        }
    }

    if change.action == PlanAction::Destroy {
        return delete_locked(ctx, provider, &change.resource_id);
    }

    if change.action == PlanAction::NoOp && !cfg.force {
        return ResourceOutcome::Unchanged;
    }

    let resource = match cfg.deployment.stack.resources.get(&change.resource_id) {
        Some(r) => r,
        None => return ResourceOutcome::Skipped,
    };
    let depends_on = resource.dependencies();
    if let Some(dep) = depends_on.iter().find(|d| blocked.contains(*d)) {
        log::warn!("{}: skipped, dependency '{}' failed", change.resource_id, dep);
        return ResourceOutcome::Skipped;
    }

    ctx.event(ProvenanceEvent::ResourceStarted {
        stack: ctx.stack.to_string(),
        resource: change.resource_id.clone(),
        action: change.action.to_string(),
    });
    log::info!("{}", change.description);

    let start = Instant::now();
    let current = ctx
        .lock
        .resources
        .get(&change.resource_id)
        .map(|rl| rl.attributes.clone())
        .unwrap_or_default();
    let result = resolver::resolve_resource(&change.resource_id, resource, &*ctx.store).and_then(
        |resolved| {
            if current.is_empty() {
                provider.create(&change.resource_id, &resolved)
            } else {
                provider.update(&change.resource_id, &resolved, &current)
            }
        },
    );
    let duration = start.elapsed().as_secs_f64();

    match result {
        Ok(attributes) => {
            ctx.record_success(change, depends_on, attributes, duration);
            ResourceOutcome::Converged
        }
        Err(e) => {
            let should_stop = ctx.record_failure(&change.resource_id, &change.kind, duration, &e);
            ResourceOutcome::Failed { should_stop }
        }
    }
}

/// Execute the apply loop.
pub fn apply(cfg: &ApplyConfig, provider: &mut dyn Provider) -> Result<ApplyResult, String> {
    let start = Instant::now();
    let stack_name = cfg.deployment.stack.name.as_str();

    let execution_order = resolver::build_execution_order(&cfg.deployment.stack)?;
    let existing = state::load_lock(cfg.state_dir, stack_name)?;
    let plan = planner::plan(&cfg.deployment.stack, &execution_order, existing.as_ref())?;

    let mut result = ApplyResult {
        stack: stack_name.to_string(),
        resources_converged: 0,
        resources_unchanged: 0,
        resources_destroyed: 0,
        resources_failed: 0,
        resources_skipped: 0,
        outputs: existing
            .as_ref()
            .map(|l| l.outputs.clone())
            .unwrap_or_default(),
        total_duration: start.elapsed(),
    };

    if cfg.dry_run {
        result.resources_unchanged = plan.unchanged;
        return Ok(result);
    }

    let run_id = eventlog::generate_run_id();
    let mut lock = existing.unwrap_or_else(|| state::new_lock(stack_name));
    let mut store = store_from_lock(&lock);

    log_tripwire(
        cfg.state_dir,
        stack_name,
        cfg.config.policy.tripwire,
        ProvenanceEvent::ApplyStarted {
            stack: stack_name.to_string(),
            run_id: run_id.clone(),
            stepstack_version: env!("CARGO_PKG_VERSION").to_string(),
        },
    );
    log::info!("Applying stack {} with the {} provider", stack_name, provider.name());

    let mut blocked: HashSet<String> = HashSet::new();
    let mut ctx = RecordCtx {
        lock: &mut lock,
        store: &mut store,
        state_dir: cfg.state_dir,
        stack: stack_name,
        tripwire: cfg.config.policy.tripwire,
        failure_policy: &cfg.config.policy.failure,
    };

    for change in &plan.changes {
        match apply_single_resource(cfg, change, provider, &blocked, &mut ctx) {
            ResourceOutcome::Converged => result.resources_converged += 1,
            ResourceOutcome::Destroyed => result.resources_destroyed += 1,
            ResourceOutcome::Unchanged => result.resources_unchanged += 1,
            ResourceOutcome::Forgotten => {}
            ResourceOutcome::Skipped => {
                if cfg.resource_filter.is_none() {
                    result.resources_skipped += 1;
                    blocked.insert(change.resource_id.clone());
                }
            }
            ResourceOutcome::Failed { should_stop } => {
                result.resources_failed += 1;
                blocked.insert(change.resource_id.clone());
                if should_stop {
                    break;
                }
            }
        }
    }

    let (outputs, unresolved) = cfg.deployment.outputs.resolve_all(&store);
    for e in &unresolved {
        log::warn!("{}", e);
    }
    lock.outputs = outputs;
    result.outputs = lock.outputs.clone();

    finish(cfg, provider, &mut lock)?;

    result.total_duration = start.elapsed();
    log_tripwire(
        cfg.state_dir,
        stack_name,
        cfg.config.policy.tripwire,
        ProvenanceEvent::ApplyCompleted {
            stack: stack_name.to_string(),
            run_id,
            resources_converged: result.resources_converged,
            resources_unchanged: result.resources_unchanged,
            resources_failed: result.resources_failed,
            total_seconds: result.total_duration.as_secs_f64(),
        },
    );
    Ok(result)
}

/// Order in which a lock's resources are deleted: orphans first, then the
/// declared resources in reverse dependency order.
pub fn destroy_order(cfg: &ApplyConfig, lock: &StateLock) -> Result<Vec<String>, String> {
    let stack = &cfg.deployment.stack;
    let mut order = planner::orphans(stack, lock);
    let execution_order = resolver::build_execution_order(stack)?;
    order.extend(
        execution_order
            .into_iter()
            .rev()
            .filter(|id| lock.resources.contains_key(id)),
    );
    if let Some(filter) = cfg.resource_filter {
        order.retain(|id| id == filter);
    }
    Ok(order)
}

/// Delete every locked resource.
pub fn destroy(cfg: &ApplyConfig, provider: &mut dyn Provider) -> Result<ApplyResult, String> {
    let start = Instant::now();
    let stack_name = cfg.deployment.stack.name.as_str();
    let mut result = ApplyResult {
        stack: stack_name.to_string(),
        resources_converged: 0,
        resources_unchanged: 0,
        resources_destroyed: 0,
        resources_failed: 0,
        resources_skipped: 0,
        outputs: indexmap::IndexMap::new(),
        total_duration: start.elapsed(),
    };
    let Some(mut lock) = state::load_lock(cfg.state_dir, stack_name)? else {
        log::info!("Stack {} has no state, nothing to destroy", stack_name);
        return Ok(result);
    };
    let order = destroy_order(cfg, &lock)?;
    if cfg.dry_run {
        result.outputs = lock.outputs;
        return Ok(result);
    }

    let run_id = eventlog::generate_run_id();
    let mut store = store_from_lock(&lock);
    let mut ctx = RecordCtx {
        lock: &mut lock,
        store: &mut store,
        state_dir: cfg.state_dir,
        stack: stack_name,
        tripwire: cfg.config.policy.tripwire,
        failure_policy: &cfg.config.policy.failure,
    };

    for id in &order {
        match delete_locked(&mut ctx, provider, id) {
            ResourceOutcome::Destroyed => result.resources_destroyed += 1,
            ResourceOutcome::Failed { should_stop } => {
                result.resources_failed += 1;
                if should_stop {
                    break;
                }
            }
            _ => {}
        }
    }

    // Outputs that still resolve against surviving resources are kept
    let (outputs, _) = cfg.deployment.outputs.resolve_all(&store);
    lock.outputs = outputs;
    result.outputs = lock.outputs.clone();

    finish(cfg, provider, &mut lock)?;

    result.total_duration = start.elapsed();
    log_tripwire(
        cfg.state_dir,
        stack_name,
        cfg.config.policy.tripwire,
        ProvenanceEvent::DestroyCompleted {
            stack: stack_name.to_string(),
            run_id,
            resources_destroyed: result.resources_destroyed,
            resources_failed: result.resources_failed,
        },
    );
    Ok(result)
}

fn finish(cfg: &ApplyConfig, provider: &mut dyn Provider, lock: &mut StateLock) -> Result<(), String> {
    lock.generated_at = eventlog::now_iso8601();
    if cfg.config.policy.lock_file {
        state::save_lock(cfg.state_dir, lock)?;
    }
    provider.flush()
}

//! SS-006: Plan generation — diff the declared stack against lock state.

use super::resolver::preview_resource;
use super::types::*;
use crate::stack::Stack;
use crate::tripwire::hasher;
use std::path::Path;

/// Generate an execution plan by comparing the declared stack to its lock.
pub fn plan(
    stack: &Stack,
    execution_order: &[String],
    lock: Option<&StateLock>,
) -> Result<ExecutionPlan, String> {
    let mut changes = Vec::new();
    let mut to_create = 0u32;
    let mut to_update = 0u32;
    let mut to_destroy = 0u32;
    let mut unchanged = 0u32;

    if let Some(lock) = lock {
        for id in orphans(stack, lock) {
            let rl = &lock.resources[&id];
            to_destroy += 1;
            changes.push(PlannedChange {
                description: format!("{}: destroy (no longer declared)", id),
                resource_id: id,
                kind: rl.kind.clone(),
                action: PlanAction::Destroy,
                hash: String::new(),
            });
        }
    }

    for resource_id in execution_order {
        let resource = match stack.resources.get(resource_id) {
            Some(r) => r,
            None => continue,
        };
        let hash = hash_desired_state(resource_id, resource)?;
        let action = determine_action(resource_id, &hash, lock);
        match action {
            PlanAction::Create => to_create += 1,
            PlanAction::Update => to_update += 1,
            PlanAction::Destroy => to_destroy += 1,
            PlanAction::NoOp => unchanged += 1,
        }
        changes.push(PlannedChange {
            resource_id: resource_id.clone(),
            kind: resource.kind.clone(),
            description: describe_action(resource_id, resource, &action),
            action,
            hash,
        });
    }

    Ok(ExecutionPlan {
        name: stack.name.clone(),
        changes,
        execution_order: execution_order.to_vec(),
        to_create,
        to_update,
        to_destroy,
        unchanged,
    })
}

/// Locked resources the stack no longer declares, dependents first.
pub fn orphans(stack: &Stack, lock: &StateLock) -> Vec<String> {
    // Lock entries are recorded in apply order, so reversing it deletes
    // dependents before what they depend on.
    lock.resources
        .keys()
        .rev()
        .filter(|id| !stack.resources.contains_key(*id))
        .cloned()
        .collect()
}

fn determine_action(resource_id: &str, desired_hash: &str, lock: Option<&StateLock>) -> PlanAction {
    match lock.and_then(|l| l.resources.get(resource_id)) {
        None => PlanAction::Create,
        Some(rl) if rl.status == ResourceStatus::Converged && rl.hash == desired_hash => {
            PlanAction::NoOp
        }
        // Changed, or previously failed: re-apply
        Some(_) => PlanAction::Update,
    }
}

/// Hash the desired state of a resource. Deferred inputs contribute their
/// placeholder rendering; a readable `code` archive contributes its content hash.
pub fn hash_desired_state(resource_id: &str, resource: &Resource) -> Result<String, String> {
    let props = preview_resource(resource_id, resource)?;
    let mut components: Vec<String> = vec![resource.kind.to_string(), resource.name.clone()];
    for (key, value) in &props {
        components.push(format!("{}={}", key, value));
    }
    for (key, value) in &resource.tags {
        components.push(format!("tag:{}={}", key, value));
    }
    if let Some(code) = props.get("code") {
        if let Ok(archive_hash) = hasher::hash_file(Path::new(code)) {
            components.push(archive_hash);
        }
    }
    let refs: Vec<&str> = components.iter().map(|s| s.as_str()).collect();
    Ok(hasher::composite_hash(&refs))
}

/// Generate a human-readable description of a planned action.
fn describe_action(resource_id: &str, resource: &Resource, action: &PlanAction) -> String {
    match action {
        PlanAction::Create => match resource.kind {
            ResourceKind::IamRole => format!("{}: create role {}", resource_id, resource.name),
            ResourceKind::LambdaFunction => {
                format!("{}: create function {}", resource_id, resource.name)
            }
            ResourceKind::StateMachine => {
                format!("{}: create state machine {}", resource_id, resource.name)
            }
            ResourceKind::EventRule => {
                format!("{}: create schedule {}", resource_id, resource.name)
            }
            ResourceKind::EventTarget => {
                format!("{}: attach target to {}", resource_id, resource.name)
            }
        },
        PlanAction::Update => format!("{}: update (desired state changed)", resource_id),
        PlanAction::Destroy => format!("{}: destroy", resource_id),
        PlanAction::NoOp => format!("{}: no changes", resource_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::resolver::build_execution_order;
    use crate::core::state::new_lock;
    use crate::stack::{declare, Deployment};

    fn deployment() -> Deployment {
        let config = crate::core::parser::parse_config("version: \"1.0\"\nname: demo\n").unwrap();
        declare(&config).unwrap()
    }

    fn converged_lock(stack: &Stack, order: &[String]) -> StateLock {
        let mut lock = new_lock(&stack.name);
        for id in order {
            let resource = &stack.resources[id];
            lock.resources.insert(
                id.clone(),
                ResourceLock {
                    kind: resource.kind.clone(),
                    status: ResourceStatus::Converged,
                    applied_at: None,
                    duration_seconds: None,
                    hash: hash_desired_state(id, resource).unwrap(),
                    attributes: Attributes::new(),
                    depends_on: resource.dependencies(),
                },
            );
        }
        lock
    }

    #[test]
    fn test_ss006_plan_all_create() {
        let d = deployment();
        let order = build_execution_order(&d.stack).unwrap();
        let plan = plan(&d.stack, &order, None).unwrap();
        assert_eq!(plan.to_create, 7);
        assert_eq!(plan.unchanged, 0);
        assert!(plan.changes.iter().all(|c| c.action == PlanAction::Create));
        assert!(plan.changes.iter().all(|c| c.hash.starts_with("blake3:")));
    }

    #[test]
    fn test_ss006_plan_all_unchanged() {
        let d = deployment();
        let order = build_execution_order(&d.stack).unwrap();
        let lock = converged_lock(&d.stack, &order);
        let plan = plan(&d.stack, &order, Some(&lock)).unwrap();
        assert_eq!(plan.unchanged, 7);
        assert_eq!(plan.to_create + plan.to_update + plan.to_destroy, 0);
    }

    #[test]
    fn test_ss006_region_change_updates_regional_resources() {
        let d = deployment();
        let order = build_execution_order(&d.stack).unwrap();
        let lock = converged_lock(&d.stack, &order);

        let config = crate::core::parser::parse_config(
            "version: \"1.0\"\nname: demo\nregion: us-east-1\n",
        )
        .unwrap();
        let moved = declare(&config).unwrap();
        let plan = plan(&moved.stack, &order, Some(&lock)).unwrap();
        let action = |id: &str| {
            plan.changes
                .iter()
                .find(|c| c.resource_id == id)
                .map(|c| c.action.clone())
                .unwrap()
        };
        for id in ["lambda", "step-function", "event-rule", "event-target"] {
            assert_eq!(action(id), PlanAction::Update, "{}", id);
        }
        // Scoped roles trust the regional states principal
        assert_eq!(action("step-function-role"), PlanAction::Update);
        assert_eq!(action("event-rule-role"), PlanAction::Update);
        // IAM is global
        assert_eq!(action("lambda-role"), PlanAction::NoOp);
        assert_eq!(plan.to_update, 6);
    }

    #[test]
    fn test_ss006_plan_update_on_hash_mismatch() {
        let d = deployment();
        let order = build_execution_order(&d.stack).unwrap();
        let mut lock = converged_lock(&d.stack, &order);
        lock.resources["lambda"].hash = "blake3:stale".to_string();
        let plan = plan(&d.stack, &order, Some(&lock)).unwrap();
        assert_eq!(plan.to_update, 1);
        let change = plan.changes.iter().find(|c| c.resource_id == "lambda").unwrap();
        assert_eq!(change.action, PlanAction::Update);
    }

    #[test]
    fn test_ss006_plan_failed_is_reapplied() {
        let d = deployment();
        let order = build_execution_order(&d.stack).unwrap();
        let mut lock = converged_lock(&d.stack, &order);
        lock.resources["event-target"].status = ResourceStatus::Failed;
        let plan = plan(&d.stack, &order, Some(&lock)).unwrap();
        assert_eq!(plan.to_update, 1);
    }

    #[test]
    fn test_ss006_plan_orphans_destroyed_first() {
        let d = deployment();
        let order = build_execution_order(&d.stack).unwrap();
        let mut lock = converged_lock(&d.stack, &order);
        for id in ["old-role", "old-function"] {
            lock.resources.insert(
                id.to_string(),
                ResourceLock {
                    kind: ResourceKind::IamRole,
                    status: ResourceStatus::Converged,
                    applied_at: None,
                    duration_seconds: None,
                    hash: "blake3:x".to_string(),
                    attributes: Attributes::new(),
                    depends_on: Vec::new(),
                },
            );
        }
        let plan = plan(&d.stack, &order, Some(&lock)).unwrap();
        assert_eq!(plan.to_destroy, 2);
        assert_eq!(plan.changes[0].resource_id, "old-function");
        assert_eq!(plan.changes[1].resource_id, "old-role");
        assert!(plan.changes[..2].iter().all(|c| c.action == PlanAction::Destroy));
        assert_eq!(plan.unchanged, 7);
    }

    #[test]
    fn test_ss006_hash_deterministic_and_sensitive() {
        let d = deployment();
        let lambda = &d.stack.resources["lambda"];
        let h1 = hash_desired_state("lambda", lambda).unwrap();
        assert_eq!(h1, hash_desired_state("lambda", lambda).unwrap());

        let mut changed = lambda.clone();
        changed
            .inputs
            .insert("runtime".to_string(), "python3.12".into());
        assert_ne!(h1, hash_desired_state("lambda", &changed).unwrap());

        let mut tagged = lambda.clone();
        tagged.tags.insert("team".to_string(), "ops".to_string());
        assert_ne!(h1, hash_desired_state("lambda", &tagged).unwrap());
    }

    #[test]
    fn test_ss006_hash_tracks_archive_content() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path().join("package.zip");
        std::fs::write(&archive, "v1").unwrap();
        let resource = Resource::new(ResourceKind::LambdaFunction, "fn")
            .input("code", archive.to_string_lossy().to_string().into());
        let before = hash_desired_state("lambda", &resource).unwrap();
        std::fs::write(&archive, "v2").unwrap();
        assert_ne!(before, hash_desired_state("lambda", &resource).unwrap());
    }

    #[test]
    fn test_ss006_describe_action() {
        let d = deployment();
        let rule = &d.stack.resources["event-rule"];
        assert_eq!(
            describe_action("event-rule", rule, &PlanAction::Create),
            "event-rule: create schedule demo"
        );
        assert_eq!(
            describe_action("event-rule", rule, &PlanAction::NoOp),
            "event-rule: no changes"
        );
    }
}

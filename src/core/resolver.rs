//! SS-005: Dependency DAG construction and deferred-input resolution.
//!
//! Edges come from explicit `depends_on` plus every resource referenced by an
//! input `Output`. Topological order uses Kahn's algorithm with deterministic
//! (alphabetical) tie-breaking.

use super::output::AttributeStore;
use super::types::*;
use crate::resources::iam;
use crate::stack::Stack;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet, VecDeque};

/// Input key carrying the ARN a role's inline policy must be scoped to.
/// Checked during resolution, never sent to the provider.
pub const POLICY_SCOPE: &str = "policy_scope";

/// Resolve every input of a resource against created resources.
pub fn resolve_resource(
    id: &str,
    resource: &Resource,
    store: &AttributeStore,
) -> Result<ResolvedResource, String> {
    let mut props = IndexMap::new();
    for (key, value) in &resource.inputs {
        let resolved = value
            .resolve(store)
            .map_err(|e| format!("resource '{}' input '{}': {}", id, key, e))?;
        props.insert(key.clone(), resolved);
    }

    if let Some(scope) = props.shift_remove(POLICY_SCOPE) {
        let policy = props
            .get("policy")
            .ok_or_else(|| format!("resource '{}' is scoped but has no policy", id))?;
        iam::verify_scope(policy, &scope).map_err(|e| format!("resource '{}': {}", id, e))?;
    }

    Ok(ResolvedResource {
        kind: resource.kind.clone(),
        name: resource.name.clone(),
        props,
        tags: resource.tags.clone(),
    })
}

/// Render every input with placeholders for values not yet known.
pub fn preview_resource(id: &str, resource: &Resource) -> Result<IndexMap<String, String>, String> {
    let mut props = IndexMap::new();
    for (key, value) in &resource.inputs {
        let rendered = value
            .preview()
            .map_err(|e| format!("resource '{}' input '{}': {}", id, key, e))?;
        props.insert(key.clone(), rendered);
    }
    Ok(props)
}

/// Build a topological execution order from resource dependencies.
/// Uses Kahn's algorithm with alphabetical tie-breaking for determinism.
pub fn build_execution_order(stack: &Stack) -> Result<Vec<String>, String> {
    let resource_ids: Vec<String> = stack.resources.keys().cloned().collect();
    let mut in_degree: HashMap<String, usize> = HashMap::new();
    let mut adjacency: HashMap<String, Vec<String>> = HashMap::new();

    for id in &resource_ids {
        in_degree.insert(id.clone(), 0);
        adjacency.insert(id.clone(), Vec::new());
    }

    for (id, resource) in &stack.resources {
        for dep in resource.dependencies() {
            let dependents = adjacency
                .get_mut(&dep)
                .ok_or_else(|| format!("resource '{}' depends on unknown '{}'", id, dep))?;
            dependents.push(id.clone());
            if let Some(degree) = in_degree.get_mut(id) {
                *degree += 1;
            }
        }
    }

    let mut zero_degree: Vec<String> = in_degree
        .iter()
        .filter(|(_, &d)| d == 0)
        .map(|(id, _)| id.clone())
        .collect();
    zero_degree.sort();
    let mut queue: VecDeque<String> = zero_degree.into();

    let mut order = Vec::new();
    while let Some(current) = queue.pop_front() {
        order.push(current.clone());

        let mut next_ready: Vec<String> = Vec::new();
        if let Some(neighbors) = adjacency.get(&current) {
            for neighbor in neighbors {
                if let Some(degree) = in_degree.get_mut(neighbor) {
                    *degree -= 1;
                    if *degree == 0 {
                        next_ready.push(neighbor.clone());
                    }
                }
            }
        }
        next_ready.sort();
        queue.extend(next_ready);
    }

    if order.len() != resource_ids.len() {
        let ordered: HashSet<_> = order.iter().collect();
        let mut cycle_members: Vec<&str> = resource_ids
            .iter()
            .filter(|id| !ordered.contains(id))
            .map(|s| s.as_str())
            .collect();
        cycle_members.sort();
        return Err(format!(
            "dependency cycle detected involving: {}",
            cycle_members.join(", ")
        ));
    }

    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::output::{Output, ResourceRef};

    fn resource(kind: ResourceKind, refs: &[&str]) -> Resource {
        let mut r = Resource::new(kind, "n");
        for (i, dep) in refs.iter().enumerate() {
            r = r.input(&format!("in{}", i), ResourceRef::new(dep).arn());
        }
        r
    }

    #[test]
    fn test_ss005_topo_linear() {
        let mut stack = Stack::new("t", "eu-west-1");
        stack.register("c", resource(ResourceKind::EventRule, &["b"])).unwrap();
        stack.register("a", resource(ResourceKind::IamRole, &[])).unwrap();
        stack.register("b", resource(ResourceKind::LambdaFunction, &["a"])).unwrap();
        assert_eq!(build_execution_order(&stack).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_ss005_topo_alphabetical_ties() {
        let mut stack = Stack::new("t", "eu-west-1");
        stack.register("beta", resource(ResourceKind::IamRole, &[])).unwrap();
        stack.register("alpha", resource(ResourceKind::IamRole, &[])).unwrap();
        assert_eq!(build_execution_order(&stack).unwrap(), vec!["alpha", "beta"]);
    }

    #[test]
    fn test_ss005_topo_explicit_depends_on() {
        let mut stack = Stack::new("t", "eu-west-1");
        let mut late = resource(ResourceKind::IamRole, &[]);
        late.depends_on.push("zeta".to_string());
        stack.register("alpha", late).unwrap();
        stack.register("zeta", resource(ResourceKind::IamRole, &[])).unwrap();
        assert_eq!(build_execution_order(&stack).unwrap(), vec!["zeta", "alpha"]);
    }

    #[test]
    fn test_ss005_topo_cycle() {
        let mut stack = Stack::new("t", "eu-west-1");
        stack.register("a", resource(ResourceKind::IamRole, &["b"])).unwrap();
        stack.register("b", resource(ResourceKind::IamRole, &["a"])).unwrap();
        let err = build_execution_order(&stack).unwrap_err();
        assert!(err.contains("cycle"));
        assert!(err.contains("a, b"));
    }

    #[test]
    fn test_ss005_topo_unknown_dependency() {
        let mut stack = Stack::new("t", "eu-west-1");
        stack.register("a", resource(ResourceKind::IamRole, &["ghost"])).unwrap();
        let err = build_execution_order(&stack).unwrap_err();
        assert!(err.contains("unknown 'ghost'"));
    }

    #[test]
    fn test_ss005_resolve_resource() {
        let r = Resource::new(ResourceKind::LambdaFunction, "fn")
            .input("handler", Output::known("bootstrap"))
            .input("role", ResourceRef::new("role").arn());
        let mut store = AttributeStore::new();
        store.insert(
            "role".to_string(),
            Attributes::from([("arn".to_string(), "arn:aws:iam::1:role/r".to_string())]),
        );
        let resolved = resolve_resource("lambda", &r, &store).unwrap();
        assert_eq!(resolved.prop("role").unwrap(), "arn:aws:iam::1:role/r");
        assert_eq!(resolved.prop("handler").unwrap(), "bootstrap");
    }

    #[test]
    fn test_ss005_resolve_resource_unresolved() {
        let r = Resource::new(ResourceKind::LambdaFunction, "fn")
            .input("role", ResourceRef::new("role").arn());
        let err = resolve_resource("lambda", &r, &AttributeStore::new()).unwrap_err();
        assert!(err.contains("input 'role'"));
    }

    #[test]
    fn test_ss005_scope_checked_and_stripped() {
        let target = ResourceRef::new("lambda");
        let r = Resource::new(ResourceKind::IamRole, "role")
            .input(
                "policy",
                target.arn().apply(|arn| {
                    iam::permission_policy(&["lambda:InvokeFunction"], arn).to_json()
                }),
            )
            .input(POLICY_SCOPE, target.arn());
        let mut store = AttributeStore::new();
        store.insert(
            "lambda".to_string(),
            Attributes::from([("arn".to_string(), "arn:aws:lambda:eu-west-1:1:function:f".to_string())]),
        );
        let resolved = resolve_resource("role", &r, &store).unwrap();
        assert!(!resolved.props.contains_key(POLICY_SCOPE));
        assert!(resolved.prop("policy").unwrap().contains("function:f"));
    }

    #[test]
    fn test_ss005_scope_mismatch_rejected() {
        let r = Resource::new(ResourceKind::IamRole, "role")
            .input(
                "policy",
                Output::known(iam::permission_policy(&["lambda:InvokeFunction"], "*").to_json().unwrap()),
            )
            .input(POLICY_SCOPE, ResourceRef::new("lambda").arn());
        let mut store = AttributeStore::new();
        store.insert(
            "lambda".to_string(),
            Attributes::from([("arn".to_string(), "arn:aws:lambda:eu-west-1:1:function:f".to_string())]),
        );
        assert!(resolve_resource("role", &r, &store).is_err());
    }

    #[test]
    fn test_ss005_preview_resource() {
        let r = Resource::new(ResourceKind::LambdaFunction, "fn")
            .input("role", ResourceRef::new("role").arn());
        let props = preview_resource("lambda", &r).unwrap();
        assert_eq!(props["role"], "${role.arn}");
    }
}

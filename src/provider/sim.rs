//! SS-016: Simulated account provider.
//!
//! Keeps an in-memory model of the account, persisted as YAML next to the
//! lock. Enforces the constraints the real services enforce on this stack:
//! unique names, existing roles and functions behind every reference,
//! well-formed policy and definition documents, valid schedules, a readable
//! archive holding the handler, and rules emptied of targets before deletion.

use super::{complete_attributes, Provider};
use crate::core::cron::CronExpr;
use crate::core::state::write_atomic;
use crate::core::types::{Attributes, ResolvedResource, ResourceKind};
use crate::resources::{iam, lambda, sfn};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Where a stack's simulated account lives.
pub fn account_path(state_dir: &Path, stack: &str) -> PathBuf {
    state_dir.join(stack).join("sim-account.yaml")
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimAccount {
    pub account_id: String,
    pub region: String,
    #[serde(default)]
    pub roles: IndexMap<String, SimRole>,
    #[serde(default)]
    pub functions: IndexMap<String, SimFunction>,
    #[serde(default)]
    pub state_machines: IndexMap<String, SimStateMachine>,
    #[serde(default)]
    pub rules: IndexMap<String, SimRule>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimRole {
    pub arn: String,
    pub trusted_service: String,
    /// Inline policies by name
    pub policies: IndexMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimFunction {
    pub arn: String,
    pub role: String,
    pub runtime: String,
    pub handler: String,
    pub description: String,
    pub code_sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimStateMachine {
    pub arn: String,
    pub role_arn: String,
    pub definition: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimRule {
    pub arn: String,
    pub schedule_expression: String,
    pub description: String,
    #[serde(default)]
    pub tags: IndexMap<String, String>,
    #[serde(default)]
    pub targets: IndexMap<String, SimTarget>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimTarget {
    pub arn: String,
    pub role_arn: String,
    pub input: String,
}

impl SimAccount {
    pub fn new(account_id: &str, region: &str) -> Self {
        Self {
            account_id: account_id.to_string(),
            region: region.to_string(),
            ..Self::default()
        }
    }

    /// Number of resources of every kind, targets included.
    pub fn resource_count(&self) -> usize {
        self.roles.len()
            + self.functions.len()
            + self.state_machines.len()
            + self.rules.len()
            + self.rules.values().map(|r| r.targets.len()).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.resource_count() == 0
    }

    /// Inline policies across every role.
    pub fn policy_count(&self) -> usize {
        self.roles.values().map(|r| r.policies.len()).sum()
    }

    fn role_arn(&self, name: &str) -> String {
        format!("arn:aws:iam::{}:role/{}", self.account_id, name)
    }

    fn function_arn(&self, name: &str) -> String {
        format!(
            "arn:aws:lambda:{}:{}:function:{}",
            self.region, self.account_id, name
        )
    }

    fn state_machine_arn(&self, name: &str) -> String {
        format!(
            "arn:aws:states:{}:{}:stateMachine:{}",
            self.region, self.account_id, name
        )
    }

    fn rule_arn(&self, name: &str) -> String {
        format!("arn:aws:events:{}:{}:rule/{}", self.region, self.account_id, name)
    }

    fn role_by_arn(&self, arn: &str) -> Result<&SimRole, String> {
        self.roles
            .values()
            .find(|r| r.arn == arn)
            .ok_or_else(|| format!("role {} does not exist", arn))
    }

    fn function_by_arn(&self, arn: &str) -> Option<&SimFunction> {
        self.functions.values().find(|f| f.arn == arn)
    }

    fn state_machine_by_arn(&self, arn: &str) -> Option<(&String, &SimStateMachine)> {
        self.state_machines.iter().find(|(_, m)| m.arn == arn)
    }

    fn put_role(&mut self, r: &ResolvedResource, exists: bool) -> Result<Attributes, String> {
        if self.roles.contains_key(&r.name) != exists {
            return Err(existence_error(r, exists));
        }
        let trusted_service = iam::trusted_service(r.prop("assume_role_policy")?)?;
        let policy = r.prop("policy")?;
        iam::PolicyDocument::parse(policy)?;
        let arn = self.role_arn(&r.name);
        self.roles.insert(
            r.name.clone(),
            SimRole {
                arn: arn.clone(),
                trusted_service,
                policies: IndexMap::from([(r.prop("policy_name")?.to_string(), policy.to_string())]),
            },
        );
        Ok(Attributes::from([("arn".to_string(), arn)]))
    }

    fn put_function(&mut self, r: &ResolvedResource, exists: bool) -> Result<Attributes, String> {
        if self.functions.contains_key(&r.name) != exists {
            return Err(existence_error(r, exists));
        }
        let role = r.prop("role")?;
        let trusted = &self.role_by_arn(role)?.trusted_service;
        if trusted != iam::LAMBDA_SERVICE {
            return Err(format!(
                "role {} cannot be assumed by {} (trusts {})",
                role,
                iam::LAMBDA_SERVICE,
                trusted
            ));
        }
        let runtime = r.prop("runtime")?;
        let handler = r.prop("handler")?;
        let archive = lambda::inspect_archive(Path::new(r.prop("code")?), runtime, handler)?;
        let arn = self.function_arn(&r.name);
        self.functions.insert(
            r.name.clone(),
            SimFunction {
                arn: arn.clone(),
                role: role.to_string(),
                runtime: runtime.to_string(),
                handler: handler.to_string(),
                description: r.prop("description")?.to_string(),
                code_sha256: archive.code_sha256.clone(),
            },
        );
        Ok(Attributes::from([
            ("arn".to_string(), arn),
            ("code_sha256".to_string(), archive.code_sha256),
        ]))
    }

    fn put_state_machine(&mut self, r: &ResolvedResource, exists: bool) -> Result<Attributes, String> {
        if self.state_machines.contains_key(&r.name) != exists {
            return Err(existence_error(r, exists));
        }
        let role_arn = r.prop("role_arn")?;
        let role = self.role_by_arn(role_arn)?;
        let definition = r.prop("definition")?;
        let def = sfn::parse_definition(definition)?;
        for function in sfn::invoked_functions(&def) {
            if self.function_by_arn(&function).is_none() {
                return Err(format!("definition invokes missing function {}", function));
            }
            if !role.policies.values().any(|p| iam::verify_scope(p, &function).is_ok()) {
                return Err(format!("role {} may not invoke {}", role_arn, function));
            }
        }
        let arn = self.state_machine_arn(&r.name);
        self.state_machines.insert(
            r.name.clone(),
            SimStateMachine {
                arn: arn.clone(),
                role_arn: role_arn.to_string(),
                definition: definition.to_string(),
            },
        );
        Ok(Attributes::from([("arn".to_string(), arn)]))
    }

    // put-rule is an upsert; targets survive it
    fn put_rule(&mut self, r: &ResolvedResource) -> Result<Attributes, String> {
        let schedule_expression = r.prop("schedule_expression")?;
        CronExpr::parse(schedule_expression)?;
        let arn = self.rule_arn(&r.name);
        let targets = self
            .rules
            .shift_remove(&r.name)
            .map(|old| old.targets)
            .unwrap_or_default();
        self.rules.insert(
            r.name.clone(),
            SimRule {
                arn: arn.clone(),
                schedule_expression: schedule_expression.to_string(),
                description: r.prop("description")?.to_string(),
                tags: r.tags.clone(),
                targets,
            },
        );
        Ok(Attributes::from([("arn".to_string(), arn)]))
    }

    fn put_target(&mut self, r: &ResolvedResource) -> Result<Attributes, String> {
        let rule = r.prop("rule")?;
        let arn = r.prop("arn")?;
        let role_arn = r.prop("role_arn")?;
        let input = r.prop("input")?;
        if self.state_machine_by_arn(arn).is_none() {
            return Err(format!("target state machine {} does not exist", arn));
        }
        let role = self.role_by_arn(role_arn)?;
        if !role.policies.values().any(|p| iam::verify_scope(p, arn).is_ok()) {
            return Err(format!("role {} may not start {}", role_arn, arn));
        }
        let payload: serde_json::Value =
            serde_json::from_str(input).map_err(|e| format!("target input is not JSON: {}", e))?;
        if !payload.is_object() {
            return Err("target input must be a JSON object".to_string());
        }
        let entry = self
            .rules
            .get_mut(rule)
            .ok_or_else(|| format!("rule {} does not exist", rule))?;
        entry.targets.insert(
            r.name.clone(),
            SimTarget {
                arn: arn.to_string(),
                role_arn: role_arn.to_string(),
                input: input.to_string(),
            },
        );
        Ok(Attributes::new())
    }

    fn put(&mut self, r: &ResolvedResource, exists: bool) -> Result<Attributes, String> {
        match r.kind {
            ResourceKind::IamRole => self.put_role(r, exists),
            ResourceKind::LambdaFunction => self.put_function(r, exists),
            ResourceKind::StateMachine => self.put_state_machine(r, exists),
            ResourceKind::EventRule => self.put_rule(r),
            ResourceKind::EventTarget => self.put_target(r),
        }
    }

    fn remove(&mut self, kind: &ResourceKind, attrs: &Attributes) -> Result<(), String> {
        let name = attrs.get("name").map(|s| s.as_str()).unwrap_or_default();
        match kind {
            // The inline policy goes with the role
            ResourceKind::IamRole => {
                self.roles.shift_remove(name);
            }
            ResourceKind::LambdaFunction => {
                self.functions.shift_remove(name);
            }
            ResourceKind::StateMachine => {
                let arn = attrs.get("arn").map(|s| s.as_str()).unwrap_or_default();
                let key = self.state_machine_by_arn(arn).map(|(k, _)| k.clone());
                if let Some(key) = key {
                    self.state_machines.shift_remove(&key);
                }
            }
            ResourceKind::EventRule => {
                if let Some(rule) = self.rules.get(name) {
                    if !rule.targets.is_empty() {
                        return Err(format!("rule {} still has targets", name));
                    }
                }
                self.rules.shift_remove(name);
            }
            ResourceKind::EventTarget => {
                let rule = attrs.get("rule").map(|s| s.as_str()).unwrap_or_default();
                let target_id = attrs.get("target_id").map(|s| s.as_str()).unwrap_or_default();
                if let Some(rule) = self.rules.get_mut(rule) {
                    rule.targets.shift_remove(target_id);
                }
            }
        }
        Ok(())
    }
}

fn existence_error(r: &ResolvedResource, exists: bool) -> String {
    if exists {
        format!("{} {} does not exist", r.kind, r.name)
    } else {
        format!("{} {} already exists", r.kind, r.name)
    }
}

/// Provider backed by a [`SimAccount`].
#[derive(Debug)]
pub struct SimProvider {
    pub account: SimAccount,
    path: Option<PathBuf>,
    fail_on: HashSet<String>,
}

impl SimProvider {
    /// Account held in memory only.
    pub fn in_memory(account_id: &str, region: &str) -> Self {
        Self {
            account: SimAccount::new(account_id, region),
            path: None,
            fail_on: HashSet::new(),
        }
    }

    /// Load the account at `path`, or start an empty one there. A stored
    /// account that still holds resources must match `account_id` and
    /// `region`; an empty one is moved to them.
    pub fn open(path: &Path, account_id: &str, region: &str) -> Result<Self, String> {
        let mut account: SimAccount = if path.exists() {
            let content = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
            serde_yaml_ng::from_str(&content)
                .map_err(|e| format!("invalid sim account {}: {}", path.display(), e))?
        } else {
            SimAccount::new(account_id, region)
        };
        if account.account_id != account_id || account.region != region {
            if !account.is_empty() {
                return Err(format!(
                    "sim account {} holds {} resources in {}/{}, stack is configured for {}/{}; \
                     destroy with the previous region and account first",
                    path.display(),
                    account.resource_count(),
                    account.account_id,
                    account.region,
                    account_id,
                    region
                ));
            }
            account = SimAccount::new(account_id, region);
        }
        Ok(Self {
            account,
            path: Some(path.to_path_buf()),
            fail_on: HashSet::new(),
        })
    }

    /// Make every operation on logical id `id` fail.
    pub fn fail_on(&mut self, id: &str) {
        self.fail_on.insert(id.to_string());
    }

    fn check_fault(&self, id: &str) -> Result<(), String> {
        if self.fail_on.contains(id) {
            return Err(format!("injected failure on '{}'", id));
        }
        Ok(())
    }
}

impl Provider for SimProvider {
    fn name(&self) -> &'static str {
        "sim"
    }

    fn create(&mut self, id: &str, resource: &ResolvedResource) -> Result<Attributes, String> {
        self.check_fault(id)?;
        let attrs = self.account.put(resource, false)?;
        complete_attributes(resource, attrs)
    }

    fn update(
        &mut self,
        id: &str,
        resource: &ResolvedResource,
        _current: &Attributes,
    ) -> Result<Attributes, String> {
        self.check_fault(id)?;
        let attrs = self.account.put(resource, true)?;
        complete_attributes(resource, attrs)
    }

    fn delete(&mut self, id: &str, kind: &ResourceKind, attrs: &Attributes) -> Result<(), String> {
        self.check_fault(id)?;
        self.account.remove(kind, attrs)
    }

    fn flush(&mut self) -> Result<(), String> {
        match &self.path {
            Some(path) => write_atomic(path, &self.account),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::output::AttributeStore;
    use crate::core::resolver::{build_execution_order, resolve_resource};
    use crate::stack::{self, Deployment};

    fn deployment(dir: &Path) -> Deployment {
        let archive = dir.join("package.zip");
        lambda::write_test_archive(&archive, &["bootstrap"]);
        let yaml = format!(
            "version: \"1.0\"\nname: demo\nfunction:\n  archive: {}\n",
            archive.display()
        );
        let config = crate::core::parser::parse_config(&yaml).unwrap();
        stack::declare(&config).unwrap()
    }

    /// Create every resource in order, returning the attribute store.
    fn create_all(provider: &mut SimProvider, d: &Deployment) -> AttributeStore {
        let mut store = AttributeStore::new();
        for id in build_execution_order(&d.stack).unwrap() {
            let resolved = resolve_resource(&id, &d.stack.resources[&id], &store).unwrap();
            let attrs = provider.create(&id, &resolved).unwrap();
            store.insert(id, attrs);
        }
        store
    }

    #[test]
    fn test_ss016_create_full_stack() {
        let dir = tempfile::tempdir().unwrap();
        let d = deployment(dir.path());
        let mut provider = SimProvider::in_memory("123456789012", "eu-west-1");
        let store = create_all(&mut provider, &d);

        assert_eq!(provider.account.resource_count(), 7);
        assert_eq!(provider.account.policy_count(), 3);
        assert_eq!(
            store["lambda"]["arn"],
            "arn:aws:lambda:eu-west-1:123456789012:function:demo-lambda"
        );
        assert_eq!(
            store["step-function"]["id"],
            "arn:aws:states:eu-west-1:123456789012:stateMachine:demo-step-function"
        );
        assert_eq!(store["event-rule"]["name"], "demo");
        let rule = &provider.account.rules["demo"];
        assert_eq!(rule.schedule_expression, "cron(30 10 ? * MON-FRI *)");
        assert_eq!(rule.targets["demo"].arn, store["step-function"]["arn"]);
    }

    #[test]
    fn test_ss016_duplicate_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let d = deployment(dir.path());
        let mut provider = SimProvider::in_memory("123456789012", "eu-west-1");
        let resolved = resolve_resource("lambda-role", &d.stack.resources["lambda-role"], &AttributeStore::new())
            .unwrap();
        provider.create("lambda-role", &resolved).unwrap();
        let err = provider.create("lambda-role", &resolved).unwrap_err();
        assert!(err.contains("already exists"));
    }

    #[test]
    fn test_ss016_function_needs_existing_role() {
        let dir = tempfile::tempdir().unwrap();
        let d = deployment(dir.path());
        let mut provider = SimProvider::in_memory("123456789012", "eu-west-1");
        let mut store = AttributeStore::new();
        store.insert(
            "lambda-role".to_string(),
            Attributes::from([(
                "arn".to_string(),
                "arn:aws:iam::123456789012:role/ghost".to_string(),
            )]),
        );
        let resolved = resolve_resource("lambda", &d.stack.resources["lambda"], &store).unwrap();
        let err = provider.create("lambda", &resolved).unwrap_err();
        assert!(err.contains("does not exist"));
    }

    #[test]
    fn test_ss016_function_needs_archive() {
        let dir = tempfile::tempdir().unwrap();
        let d = deployment(dir.path());
        std::fs::remove_file(dir.path().join("package.zip")).unwrap();
        let mut provider = SimProvider::in_memory("123456789012", "eu-west-1");
        let role = resolve_resource("lambda-role", &d.stack.resources["lambda-role"], &AttributeStore::new())
            .unwrap();
        let mut store = AttributeStore::new();
        store.insert("lambda-role".to_string(), provider.create("lambda-role", &role).unwrap());
        let resolved = resolve_resource("lambda", &d.stack.resources["lambda"], &store).unwrap();
        let err = provider.create("lambda", &resolved).unwrap_err();
        assert!(err.contains("cannot read archive"));
    }

    #[test]
    fn test_ss016_rule_rejects_bad_schedule() {
        let mut provider = SimProvider::in_memory("123456789012", "eu-west-1");
        let rule = ResolvedResource {
            kind: ResourceKind::EventRule,
            name: "demo".to_string(),
            props: IndexMap::from([
                ("description".to_string(), "d".to_string()),
                ("schedule_expression".to_string(), "cron(61 10 ? * MON-FRI *)".to_string()),
            ]),
            tags: IndexMap::new(),
        };
        assert!(provider.create("event-rule", &rule).is_err());
    }

    #[test]
    fn test_ss016_rule_with_targets_cannot_be_deleted() {
        let dir = tempfile::tempdir().unwrap();
        let d = deployment(dir.path());
        let mut provider = SimProvider::in_memory("123456789012", "eu-west-1");
        let store = create_all(&mut provider, &d);
        let err = provider
            .delete("event-rule", &ResourceKind::EventRule, &store["event-rule"])
            .unwrap_err();
        assert!(err.contains("still has targets"));

        provider
            .delete("event-target", &ResourceKind::EventTarget, &store["event-target"])
            .unwrap();
        provider
            .delete("event-rule", &ResourceKind::EventRule, &store["event-rule"])
            .unwrap();
        // Idempotent
        provider
            .delete("event-rule", &ResourceKind::EventRule, &store["event-rule"])
            .unwrap();
    }

    #[test]
    fn test_ss016_update_requires_existing() {
        let dir = tempfile::tempdir().unwrap();
        let d = deployment(dir.path());
        let mut provider = SimProvider::in_memory("123456789012", "eu-west-1");
        let role = resolve_resource("lambda-role", &d.stack.resources["lambda-role"], &AttributeStore::new())
            .unwrap();
        let err = provider.update("lambda-role", &role, &Attributes::new()).unwrap_err();
        assert!(err.contains("does not exist"));
    }

    #[test]
    fn test_ss016_injected_failure() {
        let dir = tempfile::tempdir().unwrap();
        let d = deployment(dir.path());
        let mut provider = SimProvider::in_memory("123456789012", "eu-west-1");
        provider.fail_on("lambda-role");
        let role = resolve_resource("lambda-role", &d.stack.resources["lambda-role"], &AttributeStore::new())
            .unwrap();
        assert!(provider.create("lambda-role", &role).unwrap_err().contains("injected"));
    }

    #[test]
    fn test_ss016_flush_and_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let d = deployment(dir.path());
        let path = account_path(dir.path(), "demo");
        let mut provider = SimProvider::open(&path, "123456789012", "eu-west-1").unwrap();
        create_all(&mut provider, &d);
        provider.flush().unwrap();

        let reopened = SimProvider::open(&path, "123456789012", "eu-west-1").unwrap();
        assert_eq!(reopened.account, provider.account);
    }

    #[test]
    fn test_ss016_reopen_in_other_region_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let d = deployment(dir.path());
        let path = account_path(dir.path(), "demo");
        let mut provider = SimProvider::open(&path, "123456789012", "eu-west-1").unwrap();
        create_all(&mut provider, &d);
        provider.flush().unwrap();

        let err = SimProvider::open(&path, "123456789012", "us-east-1").unwrap_err();
        assert!(err.contains("eu-west-1"), "{}", err);
        assert!(SimProvider::open(&path, "000000000000", "eu-west-1").is_err());
    }

    #[test]
    fn test_ss016_empty_account_follows_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = account_path(dir.path(), "demo");
        let mut provider = SimProvider::open(&path, "123456789012", "eu-west-1").unwrap();
        provider.flush().unwrap();

        let moved = SimProvider::open(&path, "000000000000", "us-east-1").unwrap();
        assert_eq!(moved.account.region, "us-east-1");
        assert_eq!(moved.account.account_id, "000000000000");
    }
}

//! SS-001: Stack configuration, resource declarations, lock state, plans,
//! and provenance events.
//!
//! Config and lock types derive Serialize/Deserialize for YAML roundtripping.

use super::output::Output;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Top-level stack.yaml
// ============================================================================

/// Root configuration: the desired shape of the deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackConfig {
    /// Schema version (must be "1.0")
    pub version: String,

    /// Stack name, also the prefix of every physical resource name
    pub name: String,

    /// Optional description
    #[serde(default)]
    pub description: Option<String>,

    /// Which provider backs the resource APIs
    #[serde(default)]
    pub provider: ProviderKind,

    /// Target region
    #[serde(default = "default_region")]
    pub region: String,

    /// Account id used when synthesizing ARNs (sim provider)
    #[serde(default = "default_account_id")]
    pub account_id: String,

    /// Compute function settings
    #[serde(default)]
    pub function: FunctionSettings,

    /// Workflow definition settings
    #[serde(default)]
    pub workflow: WorkflowSettings,

    /// Scheduled trigger settings
    #[serde(default)]
    pub schedule: ScheduleSettings,

    /// Execution policy
    #[serde(default)]
    pub policy: Policy,
}

fn default_region() -> String {
    "eu-west-1".to_string()
}

fn default_account_id() -> String {
    "123456789012".to_string()
}

/// Provider backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Simulated account persisted under the state directory
    #[default]
    Sim,
    /// Real account, driven through the `aws` CLI
    AwsCli,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sim => write!(f, "sim"),
            Self::AwsCli => write!(f, "aws_cli"),
        }
    }
}

/// Compute function settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FunctionSettings {
    /// Pre-built deployment archive
    #[serde(default = "default_archive")]
    pub archive: String,

    /// Runtime identifier
    #[serde(default = "default_runtime")]
    pub runtime: String,

    /// Handler entry point
    #[serde(default = "default_handler")]
    pub handler: String,

    #[serde(default = "default_function_description")]
    pub description: String,
}

impl Default for FunctionSettings {
    fn default() -> Self {
        Self {
            archive: default_archive(),
            runtime: default_runtime(),
            handler: default_handler(),
            description: default_function_description(),
        }
    }
}

fn default_archive() -> String {
    "package.zip".to_string()
}

fn default_runtime() -> String {
    "provided.al2023".to_string()
}

fn default_handler() -> String {
    "bootstrap".to_string()
}

fn default_function_description() -> String {
    "Lambda function".to_string()
}

/// Workflow definition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSettings {
    #[serde(default = "default_comment")]
    pub comment: String,

    /// Name of the single task state
    #[serde(default = "default_state_name")]
    pub state_name: String,

    /// Hard bound on total execution time
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u32,

    #[serde(default)]
    pub retry: RetrySettings,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            comment: default_comment(),
            state_name: default_state_name(),
            timeout_seconds: default_timeout_seconds(),
            retry: RetrySettings::default(),
        }
    }
}

fn default_comment() -> String {
    "Example of a step function that calls lambda.".to_string()
}

fn default_state_name() -> String {
    "first-step".to_string()
}

fn default_timeout_seconds() -> u32 {
    1800
}

/// Retry policy for transient provider errors.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_retry_errors")]
    pub errors: Vec<String>,

    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u32,

    #[serde(default = "default_backoff_rate")]
    pub backoff_rate: f64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            errors: default_retry_errors(),
            interval_seconds: default_interval_seconds(),
            backoff_rate: default_backoff_rate(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_retry_errors() -> Vec<String> {
    vec![
        "Lambda.ServiceException".to_string(),
        "Lambda.AWSLambdaException".to_string(),
        "Lambda.SdkClientException".to_string(),
    ]
}

fn default_interval_seconds() -> u32 {
    2
}

fn default_backoff_rate() -> f64 {
    2.0
}

fn default_max_attempts() -> u32 {
    6
}

/// Scheduled trigger settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleSettings {
    /// 6-field cron expression (minutes hours dom month dow year)
    #[serde(default = "default_expression")]
    pub expression: String,

    #[serde(default = "default_schedule_description")]
    pub description: String,

    /// Static payload passed to every execution
    #[serde(default = "default_input")]
    pub input: serde_json::Value,

    /// Tags applied to the rule
    #[serde(default = "default_tags")]
    pub tags: IndexMap<String, String>,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            expression: default_expression(),
            description: default_schedule_description(),
            input: default_input(),
            tags: default_tags(),
        }
    }
}

fn default_expression() -> String {
    "30 10 ? * MON-FRI *".to_string()
}

fn default_schedule_description() -> String {
    "Pulumi Step Functions".to_string()
}

fn default_input() -> serde_json::Value {
    serde_json::json!({ "pulumi_step_functions": true })
}

fn default_tags() -> IndexMap<String, String> {
    IndexMap::from([("pulumi".to_string(), "true".to_string())])
}

// ============================================================================
// Policy
// ============================================================================

/// Execution policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Policy {
    /// Failure handling
    #[serde(default)]
    pub failure: FailurePolicy,

    /// Append provenance events on every apply/destroy
    #[serde(default = "default_true")]
    pub tripwire: bool,

    /// Persist state after apply
    #[serde(default = "default_true")]
    pub lock_file: bool,
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            failure: FailurePolicy::default(),
            tripwire: true,
            lock_file: true,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Failure handling strategy.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    #[default]
    StopOnFirst,
    /// Keep going, skipping only dependents of failed resources
    ContinueIndependent,
}

// ============================================================================
// Resources
// ============================================================================

/// Resource kind enum.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    IamRole,
    LambdaFunction,
    StateMachine,
    EventRule,
    EventTarget,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::IamRole => write!(f, "iam_role"),
            Self::LambdaFunction => write!(f, "lambda_function"),
            Self::StateMachine => write!(f, "state_machine"),
            Self::EventRule => write!(f, "event_rule"),
            Self::EventTarget => write!(f, "event_target"),
        }
    }
}

/// A declared resource. Inputs may be deferred on other resources' attributes.
#[derive(Debug, Clone)]
pub struct Resource {
    pub kind: ResourceKind,

    /// Physical name
    pub name: String,

    /// Input properties, keyed by property name
    pub inputs: IndexMap<String, Output>,

    /// Explicit dependencies on top of the ones implied by inputs
    pub depends_on: Vec<String>,

    pub tags: IndexMap<String, String>,
}

impl Resource {
    pub fn new(kind: ResourceKind, name: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            inputs: IndexMap::new(),
            depends_on: Vec::new(),
            tags: IndexMap::new(),
        }
    }

    /// Builder-style input setter.
    pub fn input(mut self, key: &str, value: Output) -> Self {
        self.inputs.insert(key.to_string(), value);
        self
    }

    /// Every resource this one must wait for, explicit and implied, deduplicated.
    pub fn dependencies(&self) -> Vec<String> {
        let mut deps: Vec<String> = self.depends_on.clone();
        for value in self.inputs.values() {
            for dep in value.dependencies() {
                if !deps.contains(&dep) {
                    deps.push(dep);
                }
            }
        }
        deps
    }
}

/// A resource with every input resolved to a concrete string.
#[derive(Debug, Clone)]
pub struct ResolvedResource {
    pub kind: ResourceKind,
    pub name: String,
    pub props: IndexMap<String, String>,
    pub tags: IndexMap<String, String>,
}

impl ResolvedResource {
    /// Fetch a required property.
    pub fn prop(&self, key: &str) -> Result<&str, String> {
        self.props
            .get(key)
            .map(|s| s.as_str())
            .ok_or_else(|| format!("{} '{}' is missing property '{}'", self.kind, self.name, key))
    }
}

/// Provider-assigned attributes of a created resource (id, name, arn, ...).
pub type Attributes = IndexMap<String, String>;

// ============================================================================
// State / Lock file
// ============================================================================

/// Per-stack state lock file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateLock {
    /// Schema version
    pub schema: String,

    /// Stack name
    pub stack: String,

    /// When the lock was generated
    pub generated_at: String,

    /// Generator version
    pub generator: String,

    /// BLAKE3 version
    pub blake3_version: String,

    /// Per-resource state
    pub resources: IndexMap<String, ResourceLock>,

    /// Resolved deployment outputs
    #[serde(default)]
    pub outputs: IndexMap<String, String>,
}

/// Per-resource lock entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLock {
    pub kind: ResourceKind,

    /// Convergence status
    pub status: ResourceStatus,

    /// When the resource was last applied
    #[serde(default)]
    pub applied_at: Option<String>,

    /// Duration of last apply in seconds
    #[serde(default)]
    pub duration_seconds: Option<f64>,

    /// BLAKE3 hash of the desired state that was applied
    pub hash: String,

    /// Provider-assigned attributes
    #[serde(default)]
    pub attributes: Attributes,

    /// Dependencies at apply time (drives destroy order for orphans)
    #[serde(default)]
    pub depends_on: Vec<String>,
}

/// Resource convergence status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceStatus {
    Converged,
    Failed,
}

impl fmt::Display for ResourceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Converged => write!(f, "CONVERGED"),
            Self::Failed => write!(f, "FAILED"),
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Action to take on a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanAction {
    Create,
    Update,
    Destroy,
    NoOp,
}

impl fmt::Display for PlanAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Create => write!(f, "CREATE"),
            Self::Update => write!(f, "UPDATE"),
            Self::Destroy => write!(f, "DESTROY"),
            Self::NoOp => write!(f, "NO-OP"),
        }
    }
}

/// A single planned change.
#[derive(Debug, Clone)]
pub struct PlannedChange {
    /// Logical resource id
    pub resource_id: String,

    pub kind: ResourceKind,

    /// Action to take
    pub action: PlanAction,

    /// Desired-state hash (empty for Destroy)
    pub hash: String,

    /// Human-readable description
    pub description: String,
}

/// Full execution plan.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    /// Stack name
    pub name: String,

    /// Destroys of orphaned resources first, then the stack in topological order
    pub changes: Vec<PlannedChange>,

    /// Topological execution order (resource IDs)
    pub execution_order: Vec<String>,

    /// Summary counts
    pub to_create: u32,
    pub to_update: u32,
    pub to_destroy: u32,
    pub unchanged: u32,
}

// ============================================================================
// Provenance events
// ============================================================================

/// Provenance event for the JSONL event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ProvenanceEvent {
    ApplyStarted {
        stack: String,
        run_id: String,
        stepstack_version: String,
    },
    ResourceStarted {
        stack: String,
        resource: String,
        action: String,
    },
    ResourceConverged {
        stack: String,
        resource: String,
        duration_seconds: f64,
        hash: String,
    },
    ResourceFailed {
        stack: String,
        resource: String,
        error: String,
    },
    ResourceDestroyed {
        stack: String,
        resource: String,
    },
    ApplyCompleted {
        stack: String,
        run_id: String,
        resources_converged: u32,
        resources_unchanged: u32,
        resources_failed: u32,
        total_seconds: f64,
    },
    DestroyCompleted {
        stack: String,
        run_id: String,
        resources_destroyed: u32,
        resources_failed: u32,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: ProvenanceEvent,
}

// ============================================================================
// Apply result
// ============================================================================

/// Result of an apply or destroy run.
#[derive(Debug, Clone)]
pub struct ApplyResult {
    pub stack: String,
    pub resources_converged: u32,
    pub resources_unchanged: u32,
    pub resources_destroyed: u32,
    pub resources_failed: u32,
    /// Not attempted because a dependency failed
    pub resources_skipped: u32,
    pub outputs: IndexMap<String, String>,
    pub total_duration: std::time::Duration,
}

// ============================================================================
// Tests
// ============================================================================

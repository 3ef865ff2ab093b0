//! SS-009: State machine handler — workflow definition document and scripts.
//!
//! The definition is a single Task state invoking the function through the
//! optimized `lambda:invoke` integration. The whole input goes in (`$`), the
//! function result (`$.Payload`) comes out.

use super::{delete_if_present, heredoc_var, quote};
use crate::core::types::{Attributes, ResolvedResource, WorkflowSettings};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

pub const LAMBDA_INVOKE: &str = "arn:aws:states:::lambda:invoke";
const NOT_FOUND: &str = "StateMachineDoesNotExist";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct StateMachineDefinition {
    pub comment: String,
    pub start_at: String,
    pub states: IndexMap<String, TaskState>,
    pub timeout_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TaskState {
    #[serde(rename = "Type")]
    pub state_type: String,
    pub resource: String,
    pub output_path: String,
    pub parameters: TaskParameters,
    pub retry: Vec<Retrier>,
    pub end: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskParameters {
    #[serde(rename = "FunctionName")]
    pub function_name: String,
    #[serde(rename = "Payload.$")]
    pub payload: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Retrier {
    pub error_equals: Vec<String>,
    pub interval_seconds: u32,
    pub max_attempts: u32,
    #[serde(serialize_with = "serialize_rate")]
    pub backoff_rate: f64,
}

/// Whole rates render as JSON integers (`2`, not `2.0`).
fn serialize_rate<S: serde::Serializer>(rate: &f64, serializer: S) -> Result<S::Ok, S::Error> {
    if rate.fract() == 0.0 && rate.is_finite() && *rate >= 0.0 && *rate <= u32::MAX as f64 {
        serializer.serialize_u32(*rate as u32)
    } else {
        serializer.serialize_f64(*rate)
    }
}

/// Build the definition for a function ARN.
pub fn definition(function_arn: &str, settings: &WorkflowSettings) -> StateMachineDefinition {
    let task = TaskState {
        state_type: "Task".to_string(),
        resource: LAMBDA_INVOKE.to_string(),
        output_path: "$.Payload".to_string(),
        parameters: TaskParameters {
            function_name: function_arn.to_string(),
            payload: "$".to_string(),
        },
        retry: vec![Retrier {
            error_equals: settings.retry.errors.clone(),
            interval_seconds: settings.retry.interval_seconds,
            max_attempts: settings.retry.max_attempts,
            backoff_rate: settings.retry.backoff_rate,
        }],
        end: true,
    };
    StateMachineDefinition {
        comment: settings.comment.clone(),
        start_at: settings.state_name.clone(),
        states: IndexMap::from([(settings.state_name.clone(), task)]),
        timeout_seconds: settings.timeout_seconds,
    }
}

/// Render the definition JSON for a function ARN.
pub fn render_definition(function_arn: &str, settings: &WorkflowSettings) -> Result<String, String> {
    serde_json::to_string_pretty(&definition(function_arn, settings))
        .map_err(|e| format!("definition serialize error: {}", e))
}

/// Parse a rendered definition.
pub fn parse_definition(json: &str) -> Result<StateMachineDefinition, String> {
    let def: StateMachineDefinition =
        serde_json::from_str(json).map_err(|e| format!("malformed state machine definition: {}", e))?;
    if !def.states.contains_key(&def.start_at) {
        return Err(format!("StartAt '{}' names no state", def.start_at));
    }
    Ok(def)
}

/// Function ARNs invoked by the definition's task states.
pub fn invoked_functions(def: &StateMachineDefinition) -> Vec<String> {
    def.states
        .values()
        .filter(|s| s.resource == LAMBDA_INVOKE)
        .map(|s| s.parameters.function_name.clone())
        .collect()
}

/// Generate shell to create the state machine.
pub fn create_script(resource: &ResolvedResource) -> Result<String, String> {
    Ok([
        "set -euo pipefail".to_string(),
        heredoc_var("DEFINITION", resource.prop("definition")?),
        format!(
            "aws stepfunctions create-state-machine --name {} --definition \"$DEFINITION\" \
             --role-arn {} --query '{{arn:stateMachineArn}}' --output json",
            quote(&resource.name),
            quote(resource.prop("role_arn")?)
        ),
    ]
    .join("\n"))
}

/// Generate shell to update definition and role in place.
pub fn update_script(resource: &ResolvedResource, current: &Attributes) -> Result<String, String> {
    let arn = current
        .get("arn")
        .ok_or_else(|| format!("state_machine '{}' has no recorded arn", resource.name))?;
    Ok([
        "set -euo pipefail".to_string(),
        heredoc_var("DEFINITION", resource.prop("definition")?),
        format!(
            "aws stepfunctions update-state-machine --state-machine-arn {} \
             --definition \"$DEFINITION\" --role-arn {} > /dev/null",
            quote(arn),
            quote(resource.prop("role_arn")?)
        ),
        format!(
            "aws stepfunctions describe-state-machine --state-machine-arn {} \
             --query '{{arn:stateMachineArn}}' --output json",
            quote(arn)
        ),
    ]
    .join("\n"))
}

/// Generate shell to delete the state machine.
pub fn delete_script(attrs: &Attributes) -> Result<String, String> {
    let arn = attrs
        .get("arn")
        .ok_or_else(|| "state_machine state has no arn".to_string())?;
    let delete = format!(
        "aws stepfunctions delete-state-machine --state-machine-arn {}",
        quote(arn)
    );
    Ok(format!(
        "set -euo pipefail\n{}",
        delete_if_present(&delete, NOT_FOUND)
    ))
}

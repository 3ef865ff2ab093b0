//! SS-007: IAM role handler — policy documents and role scripts.
//!
//! A role carries its trust policy and one inline permission policy. The
//! inline policy is put after the role is created and deleted before it, so a
//! destroyed role never leaves an orphaned policy behind.

use super::{delete_if_present, heredoc_var, quote};
use crate::core::types::{Attributes, ResolvedResource};
use serde::{Deserialize, Serialize};

pub const POLICY_VERSION: &str = "2012-10-17";
pub const LAMBDA_SERVICE: &str = "lambda.amazonaws.com";
pub const LOG_ACTIONS: [&str; 3] = [
    "logs:CreateLogGroup",
    "logs:CreateLogStream",
    "logs:PutLogEvents",
];
pub const LOG_RESOURCE: &str = "arn:aws:logs:*:*:*";

/// Error code IAM reports for a missing role or policy.
const NOT_FOUND: &str = "NoSuchEntity";

/// Regional service principal of the workflow service.
pub fn states_service(region: &str) -> String {
    format!("states.{}.amazonaws.com", region)
}

/// An IAM policy document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct PolicyDocument {
    pub version: String,
    pub statement: Vec<Statement>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Statement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sid: Option<String>,
    pub effect: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<Principal>,
    pub action: OneOrMany,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<OneOrMany>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Principal {
    pub service: String,
}

/// `"Action": "x"` and `"Action": ["x", "y"]` are both valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl OneOrMany {
    pub fn to_vec(&self) -> Vec<String> {
        match self {
            Self::One(s) => vec![s.clone()],
            Self::Many(v) => v.clone(),
        }
    }
}

impl PolicyDocument {
    pub fn to_json(&self) -> Result<String, String> {
        serde_json::to_string(self).map_err(|e| format!("policy serialize error: {}", e))
    }

    pub fn parse(json: &str) -> Result<Self, String> {
        serde_json::from_str(json).map_err(|e| format!("malformed policy document: {}", e))
    }
}

/// Trust policy letting one service principal assume the role.
pub fn trust_policy(service: &str) -> PolicyDocument {
    PolicyDocument {
        version: POLICY_VERSION.to_string(),
        statement: vec![Statement {
            sid: None,
            effect: "Allow".to_string(),
            principal: Some(Principal {
                service: service.to_string(),
            }),
            action: OneOrMany::One("sts:AssumeRole".to_string()),
            resource: None,
        }],
    }
}

/// Permission policy allowing `actions` on a single resource.
pub fn permission_policy(actions: &[&str], resource: &str) -> PolicyDocument {
    PolicyDocument {
        version: POLICY_VERSION.to_string(),
        statement: vec![Statement {
            sid: None,
            effect: "Allow".to_string(),
            principal: None,
            action: OneOrMany::Many(actions.iter().map(|a| a.to_string()).collect()),
            resource: Some(OneOrMany::One(resource.to_string())),
        }],
    }
}

/// Check that every statement of `policy` targets exactly `expected_arn`.
pub fn verify_scope(policy: &str, expected_arn: &str) -> Result<(), String> {
    if expected_arn.trim().is_empty() || expected_arn.contains('*') {
        return Err(format!("policy scope '{}' is not a concrete ARN", expected_arn));
    }
    let doc = PolicyDocument::parse(policy)?;
    if doc.statement.is_empty() {
        return Err("scoped policy has no statements".to_string());
    }
    for statement in &doc.statement {
        let resources = statement
            .resource
            .as_ref()
            .map(|r| r.to_vec())
            .unwrap_or_default();
        if resources.len() != 1 || resources[0] != expected_arn {
            return Err(format!(
                "policy Resource {:?} is not scoped to {}",
                resources, expected_arn
            ));
        }
    }
    Ok(())
}

/// Check a trust policy names exactly one service principal.
pub fn trusted_service(trust: &str) -> Result<String, String> {
    let doc = PolicyDocument::parse(trust)?;
    let services: Vec<&str> = doc
        .statement
        .iter()
        .filter_map(|s| s.principal.as_ref().map(|p| p.service.as_str()))
        .collect();
    match services.as_slice() {
        [one] => Ok(one.to_string()),
        _ => Err(format!("trust policy must name one service, found {}", services.len())),
    }
}

/// Generate shell to create the role and put its inline policy.
pub fn create_script(resource: &ResolvedResource) -> Result<String, String> {
    let trust = resource.prop("assume_role_policy")?;
    let policy_name = resource.prop("policy_name")?;
    let policy = resource.prop("policy")?;
    let name = quote(&resource.name);

    Ok([
        "set -euo pipefail".to_string(),
        heredoc_var("TRUST", trust),
        heredoc_var("POLICY", policy),
        format!(
            "OUT=$(aws iam create-role --role-name {} --assume-role-policy-document \"$TRUST\" \
             --query '{{arn:Role.Arn}}' --output json)",
            name
        ),
        format!(
            "aws iam put-role-policy --role-name {} --policy-name {} --policy-document \"$POLICY\"",
            name,
            quote(policy_name)
        ),
        "echo \"$OUT\"".to_string(),
    ]
    .join("\n"))
}

/// Generate shell to replace the trust policy and inline policy in place.
pub fn update_script(resource: &ResolvedResource) -> Result<String, String> {
    let trust = resource.prop("assume_role_policy")?;
    let policy_name = resource.prop("policy_name")?;
    let policy = resource.prop("policy")?;
    let name = quote(&resource.name);

    Ok([
        "set -euo pipefail".to_string(),
        heredoc_var("TRUST", trust),
        heredoc_var("POLICY", policy),
        format!(
            "aws iam update-assume-role-policy --role-name {} --policy-document \"$TRUST\"",
            name
        ),
        format!(
            "aws iam put-role-policy --role-name {} --policy-name {} --policy-document \"$POLICY\"",
            name,
            quote(policy_name)
        ),
        format!(
            "aws iam get-role --role-name {} --query '{{arn:Role.Arn}}' --output json",
            name
        ),
    ]
    .join("\n"))
}

/// Generate shell to delete the inline policy, then the role.
pub fn delete_script(attrs: &Attributes) -> Result<String, String> {
    let name = attrs
        .get("name")
        .ok_or_else(|| "iam_role state has no name".to_string())?;
    let mut lines = vec!["set -euo pipefail".to_string()];
    if let Some(policy_name) = attrs.get("policy_name") {
        lines.push(delete_if_present(
            &format!(
                "aws iam delete-role-policy --role-name {} --policy-name {}",
                quote(name),
                quote(policy_name)
            ),
            NOT_FOUND,
        ));
    }
    lines.push(delete_if_present(
        &format!("aws iam delete-role --role-name {}", quote(name)),
        NOT_FOUND,
    ));
    Ok(lines.join("\n"))
}

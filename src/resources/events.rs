//! SS-010: Scheduled rule and rule target handlers.

use super::{delete_if_present, heredoc_var, quote};
use crate::core::types::{Attributes, ResolvedResource};
use serde::{Deserialize, Serialize};

const NOT_FOUND: &str = "ResourceNotFoundException";

/// One rule target entry as the provider expects it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TargetEntry {
    pub id: String,
    pub arn: String,
    pub role_arn: String,
    pub input: String,
}

/// Encode the static trigger payload. Must be a JSON object.
pub fn target_input(input: &serde_json::Value) -> Result<String, String> {
    if !input.is_object() {
        return Err("trigger input must be a JSON object".to_string());
    }
    serde_json::to_string(input).map_err(|e| format!("trigger input serialize error: {}", e))
}

/// Build the target entry of a resolved event target.
pub fn target_entry(resource: &ResolvedResource) -> Result<TargetEntry, String> {
    Ok(TargetEntry {
        id: resource.name.clone(),
        arn: resource.prop("arn")?.to_string(),
        role_arn: resource.prop("role_arn")?.to_string(),
        input: resource.prop("input")?.to_string(),
    })
}

fn put_rule(resource: &ResolvedResource) -> Result<String, String> {
    Ok(format!(
        "aws events put-rule --name {} --schedule-expression {} --description {}",
        quote(&resource.name),
        quote(resource.prop("schedule_expression")?),
        quote(resource.prop("description")?)
    ))
}

fn tag_args(resource: &ResolvedResource) -> String {
    resource
        .tags
        .iter()
        .map(|(key, value)| format!(" {}", quote(&format!("Key={},Value={}", key, value))))
        .collect()
}

/// Generate shell to create the rule. put-rule only applies `--tags` when
/// it creates the rule.
pub fn rule_script(resource: &ResolvedResource) -> Result<String, String> {
    let mut cmd = put_rule(resource)?;
    if !resource.tags.is_empty() {
        cmd.push_str(" --tags");
        cmd.push_str(&tag_args(resource));
    }
    cmd.push_str(" --query '{arn:RuleArn}' --output json");
    Ok(["set -euo pipefail".to_string(), cmd].join("\n"))
}

/// Generate shell to update the rule in place, then converge its tags:
/// declared tags are set and undeclared keys removed.
pub fn rule_update_script(resource: &ResolvedResource) -> Result<String, String> {
    let mut lines = vec![
        "set -euo pipefail".to_string(),
        format!(
            "ARN=$({} --query 'RuleArn' --output text)",
            put_rule(resource)?
        ),
    ];
    if !resource.tags.is_empty() {
        lines.push(format!(
            "aws events tag-resource --resource-arn \"$ARN\" --tags{}",
            tag_args(resource)
        ));
    }
    let keep: Vec<String> = resource.tags.keys().map(|k| quote(k)).collect();
    lines.push(
        "for KEY in $(aws events list-tags-for-resource --resource-arn \"$ARN\" \
         --query 'Tags[].Key' --output text); do"
            .to_string(),
    );
    if keep.is_empty() {
        lines.push("  [ \"$KEY\" = None ] && continue".to_string());
    } else {
        lines.push(format!("  case \"$KEY\" in {}|None) continue ;; esac", keep.join("|")));
    }
    lines.push(
        "  aws events untag-resource --resource-arn \"$ARN\" --tag-keys \"$KEY\"".to_string(),
    );
    lines.push("done".to_string());
    lines.push("printf '{\"arn\":\"%s\"}\\n' \"$ARN\"".to_string());
    Ok(lines.join("\n"))
}

/// Generate shell to attach the target to its rule (put-targets is an upsert).
pub fn target_script(resource: &ResolvedResource) -> Result<String, String> {
    let entry = target_entry(resource)?;
    let targets = serde_json::to_string(&[&entry])
        .map_err(|e| format!("target serialize error: {}", e))?;
    let rule = resource.prop("rule")?;
    Ok([
        "set -euo pipefail".to_string(),
        heredoc_var("TARGETS", &targets),
        format!(
            "FAILED=$(aws events put-targets --rule {} --targets \"$TARGETS\" \
             --query 'FailedEntryCount' --output text)",
            quote(rule)
        ),
        "[ \"$FAILED\" = \"0\" ] || { echo \"put-targets rejected $FAILED entries\" >&2; exit 1; }"
            .to_string(),
        format!(
            "printf '{{\"rule\":\"%s\",\"target_id\":\"%s\"}}\\n' {} {}",
            quote(rule),
            quote(&entry.id)
        ),
    ]
    .join("\n"))
}

/// Generate shell to delete the rule.
pub fn delete_rule_script(attrs: &Attributes) -> Result<String, String> {
    let name = attrs
        .get("name")
        .ok_or_else(|| "event_rule state has no name".to_string())?;
    let delete = format!("aws events delete-rule --name {}", quote(name));
    Ok(format!(
        "set -euo pipefail\n{}",
        delete_if_present(&delete, NOT_FOUND)
    ))
}

/// Generate shell to detach the target from its rule.
pub fn delete_target_script(attrs: &Attributes) -> Result<String, String> {
    let rule = attrs
        .get("rule")
        .ok_or_else(|| "event_target state has no rule".to_string())?;
    let target_id = attrs
        .get("target_id")
        .ok_or_else(|| "event_target state has no target_id".to_string())?;
    let remove = format!(
        "aws events remove-targets --rule {} --ids {}",
        quote(rule),
        quote(target_id)
    );
    Ok(format!(
        "set -euo pipefail\n{}",
        delete_if_present(&remove, NOT_FOUND)
    ))
}

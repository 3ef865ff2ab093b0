//! Resource handlers — documents and `aws` CLI scripts per resource kind.
//!
//! Each handler produces:
//! 1. A "create" script that provisions the resource and prints its attributes as JSON
//! 2. An "update" script that converges an existing resource in place
//! 3. A "delete" script driven by the attributes recorded in the lock

pub mod events;
pub mod iam;
pub mod lambda;
pub mod sfn;

use crate::core::types::{Attributes, ResolvedResource, ResourceKind};

/// Generate a create script for a resource.
pub fn create_script(resource: &ResolvedResource) -> Result<String, String> {
    match resource.kind {
        ResourceKind::IamRole => iam::create_script(resource),
        ResourceKind::LambdaFunction => lambda::create_script(resource),
        ResourceKind::StateMachine => sfn::create_script(resource),
        ResourceKind::EventRule => events::rule_script(resource),
        ResourceKind::EventTarget => events::target_script(resource),
    }
}

/// Generate an update script for a resource, given its current attributes.
pub fn update_script(resource: &ResolvedResource, current: &Attributes) -> Result<String, String> {
    match resource.kind {
        ResourceKind::IamRole => iam::update_script(resource),
        ResourceKind::LambdaFunction => lambda::update_script(resource),
        ResourceKind::StateMachine => sfn::update_script(resource, current),
        ResourceKind::EventRule => events::rule_update_script(resource),
        // put-targets is an upsert
        ResourceKind::EventTarget => events::target_script(resource),
    }
}

/// Generate a delete script from recorded attributes.
pub fn delete_script(kind: &ResourceKind, attrs: &Attributes) -> Result<String, String> {
    match kind {
        ResourceKind::IamRole => iam::delete_script(attrs),
        ResourceKind::LambdaFunction => lambda::delete_script(attrs),
        ResourceKind::StateMachine => sfn::delete_script(attrs),
        ResourceKind::EventRule => events::delete_rule_script(attrs),
        ResourceKind::EventTarget => events::delete_target_script(attrs),
    }
}

/// Wrap a delete command so the service's not-found error counts as
/// success. Any other failure keeps its message and exit code.
pub fn delete_if_present(command: &str, not_found: &str) -> String {
    format!(
        "ERR=$({} 2>&1 >/dev/null) || {{\n  \
         RC=$?\n  \
         grep -q {} <<<\"$ERR\" || {{ printf '%s\\n' \"$ERR\" >&2; exit \"$RC\"; }}\n\
         }}",
        command,
        quote(not_found)
    )
}

/// Single-quote a value for bash.
pub fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "'\\''"))
}

/// Assign multi-line content to a shell variable via a quoted heredoc (no expansion).
pub fn heredoc_var(var: &str, content: &str) -> String {
    format!("{}=$(cat <<'STEPSTACK_EOF'\n{}\nSTEPSTACK_EOF\n)", var, content)
}

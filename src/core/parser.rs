//! SS-004: YAML parsing and validation.
//!
//! Parses stack.yaml and validates structural constraints:
//! - Version must be "1.0"
//! - Name, region and account id formats
//! - Schedule must be a valid 6-field cron expression
//! - Function and retry settings must be usable
//!
//! `validate_deployment` checks a declared stack before any provider call:
//! every reference and explicit dependency must name a declared resource.

use super::cron::CronExpr;
use super::types::*;
use crate::stack::Deployment;
use regex::Regex;
use std::path::Path;

/// Validation error.
#[derive(Debug, Clone)]
pub struct ValidationError {
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

fn error(message: String) -> ValidationError {
    ValidationError { message }
}

/// Parse a stack.yaml file from disk. A relative archive path is taken
/// relative to the file's directory.
pub fn parse_config_file(path: &Path) -> Result<StackConfig, String> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
    let mut config = parse_config(&content)?;
    let archive = Path::new(&config.function.archive);
    if archive.is_relative() {
        if let Some(base) = path.parent() {
            config.function.archive = base.join(archive).to_string_lossy().to_string();
        }
    }
    Ok(config)
}

/// Parse a stack.yaml from a string.
pub fn parse_config(yaml: &str) -> Result<StackConfig, String> {
    serde_yaml_ng::from_str(yaml).map_err(|e| format!("YAML parse error: {}", e))
}

/// Validate a parsed config. Returns a list of errors (empty = valid).
pub fn validate_config(config: &StackConfig) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if config.version != "1.0" {
        errors.push(error(format!(
            "version must be \"1.0\", got \"{}\"",
            config.version
        )));
    }

    // Role names cap at 64 characters; the longest is `<name>-step-function-role`.
    let name_re = Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_-]{0,39}$").expect("valid regex");
    if config.name.is_empty() {
        errors.push(error("name must not be empty".to_string()));
    } else if !name_re.is_match(&config.name) {
        errors.push(error(format!(
            "name '{}' must be 1-40 characters of letters, digits, '-' or '_'",
            config.name
        )));
    }

    let region_re = Regex::new(r"^[a-z]{2}(-[a-z]+)+-\d$").expect("valid regex");
    if !region_re.is_match(&config.region) {
        errors.push(error(format!("region '{}' is not a valid region", config.region)));
    }

    let account_re = Regex::new(r"^\d{12}$").expect("valid regex");
    if !account_re.is_match(&config.account_id) {
        errors.push(error(format!(
            "account_id '{}' must be 12 digits",
            config.account_id
        )));
    }

    validate_function(&config.function, &mut errors);
    validate_workflow(&config.workflow, &mut errors);

    if let Err(e) = CronExpr::parse(&config.schedule.expression) {
        errors.push(error(format!("schedule: {}", e)));
    }
    if !config.schedule.input.is_object() {
        errors.push(error("schedule input must be a JSON object".to_string()));
    }

    errors
}

fn validate_function(function: &FunctionSettings, errors: &mut Vec<ValidationError>) {
    if function.archive.trim().is_empty() {
        errors.push(error("function archive must not be empty".to_string()));
    }
    if function.runtime.trim().is_empty() {
        errors.push(error("function runtime must not be empty".to_string()));
    }
    if function.handler.trim().is_empty() {
        errors.push(error("function handler must not be empty".to_string()));
    }
    if function.runtime.starts_with("python") && !function.handler.contains('.') {
        errors.push(error(format!(
            "function handler '{}' must be <module>.<function> for {}",
            function.handler, function.runtime
        )));
    }
}

fn validate_workflow(workflow: &WorkflowSettings, errors: &mut Vec<ValidationError>) {
    if workflow.state_name.trim().is_empty() {
        errors.push(error("workflow state_name must not be empty".to_string()));
    }
    if workflow.timeout_seconds == 0 {
        errors.push(error("workflow timeout_seconds must be positive".to_string()));
    }
    let retry = &workflow.retry;
    if retry.errors.is_empty() {
        errors.push(error("workflow retry must name at least one error".to_string()));
    }
    if retry.interval_seconds == 0 {
        errors.push(error("workflow retry interval_seconds must be positive".to_string()));
    }
    if retry.backoff_rate < 1.0 {
        errors.push(error(format!(
            "workflow retry backoff_rate must be >= 1.0, got {}",
            retry.backoff_rate
        )));
    }
    if retry.max_attempts == 0 {
        errors.push(error("workflow retry max_attempts must be positive".to_string()));
    }
}

/// Validate a declared stack's reference graph.
pub fn validate_deployment(deployment: &Deployment) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let resources = &deployment.stack.resources;

    for (id, resource) in resources {
        for dep in resource.dependencies() {
            if dep == *id {
                errors.push(error(format!("resource '{}' depends on itself", id)));
            } else if !resources.contains_key(&dep) {
                errors.push(error(format!(
                    "resource '{}' depends on unknown resource '{}'",
                    id, dep
                )));
            }
        }
        if resource.name.trim().is_empty() {
            errors.push(error(format!("resource '{}' has no name", id)));
        }
    }

    for (key, value) in deployment.outputs.iter() {
        for dep in value.dependencies() {
            if !resources.contains_key(&dep) {
                errors.push(error(format!(
                    "output '{}' references unknown resource '{}'",
                    key, dep
                )));
            }
        }
    }

    errors
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::output::{Output, OutputSink};
    use crate::stack::Stack;

    fn valid_yaml() -> &'static str {
        r#"
version: "1.0"
name: pulumi-step-functions
region: eu-west-1
account_id: "123456789012"
"#
    }

    fn messages(errors: &[ValidationError]) -> Vec<&str> {
        errors.iter().map(|e| e.message.as_str()).collect()
    }

    #[test]
    fn test_ss004_parse_valid() {
        let config = parse_config(valid_yaml()).unwrap();
        assert_eq!(config.name, "pulumi-step-functions");
        let errors = validate_config(&config);
        assert!(errors.is_empty(), "unexpected errors: {:?}", messages(&errors));
    }

    #[test]
    fn test_ss004_bad_version() {
        let config = parse_config("version: \"2.0\"\nname: test\n").unwrap();
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.message.contains("version")));
    }

    #[test]
    fn test_ss004_bad_name() {
        let config = parse_config("version: \"1.0\"\nname: \"has space\"\n").unwrap();
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.message.contains("letters, digits")));

        let config = parse_config("version: \"1.0\"\nname: \"\"\n").unwrap();
        let errors = validate_config(&config);
        assert!(errors.iter().any(|e| e.message.contains("must not be empty")));
    }

    #[test]
    fn test_ss004_bad_region_and_account() {
        let yaml = r#"
version: "1.0"
name: test
region: europe
account_id: "12345"
"#;
        let errors = validate_config(&parse_config(yaml).unwrap());
        assert!(errors.iter().any(|e| e.message.contains("region")));
        assert!(errors.iter().any(|e| e.message.contains("12 digits")));
    }

    #[test]
    fn test_ss004_bad_schedule() {
        let yaml = r#"
version: "1.0"
name: test
schedule:
  expression: "30 10 * * MON-FRI *"
"#;
        let errors = validate_config(&parse_config(yaml).unwrap());
        assert!(errors.iter().any(|e| e.message.starts_with("schedule:")));
    }

    #[test]
    fn test_ss004_schedule_input_must_be_object() {
        let yaml = r#"
version: "1.0"
name: test
schedule:
  input: [1, 2]
"#;
        let errors = validate_config(&parse_config(yaml).unwrap());
        assert!(errors.iter().any(|e| e.message.contains("JSON object")));
    }

    #[test]
    fn test_ss004_python_handler_shape() {
        let yaml = r#"
version: "1.0"
name: test
function:
  runtime: python3.9
  handler: lambda_handler
"#;
        let errors = validate_config(&parse_config(yaml).unwrap());
        assert!(errors.iter().any(|e| e.message.contains("<module>.<function>")));
    }

    #[test]
    fn test_ss004_retry_bounds() {
        let yaml = r#"
version: "1.0"
name: test
workflow:
  timeout_seconds: 0
  retry:
    errors: []
    backoff_rate: 0.5
    max_attempts: 0
"#;
        let errors = validate_config(&parse_config(yaml).unwrap());
        let msgs = messages(&errors);
        assert!(msgs.iter().any(|m| m.contains("timeout_seconds")));
        assert!(msgs.iter().any(|m| m.contains("at least one error")));
        assert!(msgs.iter().any(|m| m.contains("backoff_rate")));
        assert!(msgs.iter().any(|m| m.contains("max_attempts")));
    }

    #[test]
    fn test_ss004_parse_file_resolves_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stack.yaml");
        std::fs::write(&path, valid_yaml()).unwrap();
        let config = parse_config_file(&path).unwrap();
        assert_eq!(
            Path::new(&config.function.archive),
            dir.path().join("package.zip")
        );
    }

    #[test]
    fn test_ss004_parse_invalid_yaml() {
        assert!(parse_config("not: [valid: yaml: {{").is_err());
    }

    #[test]
    fn test_ss004_deployment_dangling_reference() {
        let mut stack = Stack::new("test", "eu-west-1");
        let resource = Resource::new(ResourceKind::LambdaFunction, "test-lambda")
            .input("role", Output::reference("ghost-role", "arn"));
        stack.register("lambda", resource).unwrap();
        let mut outputs = OutputSink::new();
        outputs
            .export("missing", Output::reference("nowhere", "name"))
            .unwrap();
        let errors = validate_deployment(&Deployment { stack, outputs });
        let msgs = messages(&errors);
        assert!(msgs.iter().any(|m| m.contains("unknown resource 'ghost-role'")));
        assert!(msgs.iter().any(|m| m.contains("output 'missing'")));
    }

    #[test]
    fn test_ss004_deployment_self_reference() {
        let mut stack = Stack::new("test", "eu-west-1");
        let resource = Resource::new(ResourceKind::EventRule, "test")
            .input("description", Output::reference("rule", "arn"));
        stack.register("rule", resource).unwrap();
        let errors = validate_deployment(&Deployment {
            stack,
            outputs: OutputSink::new(),
        });
        assert!(errors.iter().any(|e| e.message.contains("depends on itself")));
    }
}

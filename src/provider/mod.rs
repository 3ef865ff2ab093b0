//! SS-015: Providers — the seam between the engine and a cloud account.
//!
//! The engine hands a provider fully resolved resources and gets back the
//! attributes (name, id, arn, ...) downstream `Output`s resolve against.

pub mod cli;
pub mod sim;

use crate::core::types::{Attributes, ProviderKind, ResolvedResource, ResourceKind, StackConfig};
use std::path::Path;

/// Creates, converges and deletes resources in an account.
pub trait Provider {
    /// Short name for logs.
    fn name(&self) -> &'static str;

    /// Create a resource, returning its attributes.
    fn create(&mut self, id: &str, resource: &ResolvedResource) -> Result<Attributes, String>;

    /// Converge an existing resource in place, given its recorded attributes.
    fn update(
        &mut self,
        id: &str,
        resource: &ResolvedResource,
        current: &Attributes,
    ) -> Result<Attributes, String>;

    /// Delete a resource by its recorded attributes. Deleting what is already
    /// gone succeeds.
    fn delete(&mut self, id: &str, kind: &ResourceKind, attrs: &Attributes) -> Result<(), String>;

    /// Persist any provider-side state at the end of a run.
    fn flush(&mut self) -> Result<(), String> {
        Ok(())
    }
}

/// Open the provider a stack is configured for.
pub fn open(config: &StackConfig, state_dir: &Path) -> Result<Box<dyn Provider>, String> {
    match config.provider {
        ProviderKind::Sim => {
            let path = sim::account_path(state_dir, &config.name);
            Ok(Box::new(sim::SimProvider::open(
                &path,
                &config.account_id,
                &config.region,
            )?))
        }
        ProviderKind::AwsCli => Ok(Box::new(cli::AwsCliProvider::new(&config.region))),
    }
}

/// Fill in the attributes every provider must report: `name` and `id` for
/// all kinds, `arn` for everything but targets, and the keys delete needs.
pub fn complete_attributes(
    resource: &ResolvedResource,
    mut attrs: Attributes,
) -> Result<Attributes, String> {
    attrs
        .entry("name".to_string())
        .or_insert_with(|| resource.name.clone());

    if resource.kind != ResourceKind::EventTarget {
        match attrs.get("arn") {
            Some(arn) if !arn.trim().is_empty() => {}
            _ => {
                return Err(format!(
                    "{} '{}': provider reported no arn",
                    resource.kind, resource.name
                ))
            }
        }
    }

    let id = match resource.kind {
        ResourceKind::IamRole => {
            attrs.insert(
                "policy_name".to_string(),
                resource.prop("policy_name")?.to_string(),
            );
            resource.name.clone()
        }
        ResourceKind::LambdaFunction | ResourceKind::EventRule => resource.name.clone(),
        // A state machine is identified by its ARN
        ResourceKind::StateMachine => attrs["arn"].clone(),
        ResourceKind::EventTarget => {
            let rule = resource.prop("rule")?.to_string();
            attrs.insert("rule".to_string(), rule.clone());
            attrs.insert("target_id".to_string(), resource.name.clone());
            format!("{}/{}", rule, resource.name)
        }
    };
    attrs.insert("id".to_string(), id);
    Ok(attrs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn resolved(kind: ResourceKind, props: &[(&str, &str)]) -> ResolvedResource {
        ResolvedResource {
            kind,
            name: "demo".to_string(),
            props: props
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            tags: IndexMap::new(),
        }
    }

    #[test]
    fn test_ss015_complete_state_machine_id_is_arn() {
        let r = resolved(ResourceKind::StateMachine, &[]);
        let arn = "arn:aws:states:eu-west-1:1:stateMachine:demo";
        let attrs =
            complete_attributes(&r, Attributes::from([("arn".to_string(), arn.to_string())]))
                .unwrap();
        assert_eq!(attrs["id"], arn);
        assert_eq!(attrs["name"], "demo");
    }

    #[test]
    fn test_ss015_complete_role_records_policy_name() {
        let r = resolved(ResourceKind::IamRole, &[("policy_name", "demo-policy")]);
        let attrs = complete_attributes(
            &r,
            Attributes::from([("arn".to_string(), "arn:aws:iam::1:role/demo".to_string())]),
        )
        .unwrap();
        assert_eq!(attrs["policy_name"], "demo-policy");
        assert_eq!(attrs["id"], "demo");
    }

    #[test]
    fn test_ss015_complete_target() {
        let r = resolved(ResourceKind::EventTarget, &[("rule", "demo")]);
        let attrs = complete_attributes(&r, Attributes::new()).unwrap();
        assert_eq!(attrs["rule"], "demo");
        assert_eq!(attrs["target_id"], "demo");
        assert_eq!(attrs["id"], "demo/demo");
    }

    #[test]
    fn test_ss015_complete_requires_arn() {
        let r = resolved(ResourceKind::LambdaFunction, &[]);
        let err = complete_attributes(&r, Attributes::new()).unwrap_err();
        assert!(err.contains("no arn"));
        let blank = Attributes::from([("arn".to_string(), " ".to_string())]);
        assert!(complete_attributes(&r, blank).is_err());
    }

    #[test]
    fn test_ss015_open_sim_provider() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::core::parser::parse_config("version: \"1.0\"\nname: demo\n").unwrap();
        let provider = open(&config, dir.path()).unwrap();
        assert_eq!(provider.name(), "sim");
    }

    #[test]
    fn test_ss015_open_cli_provider() {
        let dir = tempfile::tempdir().unwrap();
        let config = crate::core::parser::parse_config(
            "version: \"1.0\"\nname: demo\nprovider: aws_cli\n",
        )
        .unwrap();
        let provider = open(&config, dir.path()).unwrap();
        assert_eq!(provider.name(), "aws-cli");
    }
}

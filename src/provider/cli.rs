//! SS-017: `aws` CLI provider — runs generated resource scripts through bash.

use super::{complete_attributes, Provider};
use crate::core::types::{Attributes, ResolvedResource, ResourceKind};
use crate::resources;
use crate::transport::local::exec_local_env;
use crate::transport::ExecOutput;

/// Provider driving a real account through the `aws` command line.
#[derive(Debug, Clone)]
pub struct AwsCliProvider {
    env: Vec<(String, String)>,
}

impl AwsCliProvider {
    pub fn new(region: &str) -> Self {
        Self {
            env: vec![
                ("AWS_DEFAULT_REGION".to_string(), region.to_string()),
                ("AWS_PAGER".to_string(), String::new()),
            ],
        }
    }

    /// Extra environment for every script (profile, endpoint, PATH).
    pub fn with_env(mut self, key: &str, value: &str) -> Self {
        self.env.push((key.to_string(), value.to_string()));
        self
    }

    fn run(&self, id: &str, script: &str) -> Result<ExecOutput, String> {
        log::debug!("{}: running script\n{}", id, script);
        let env: Vec<(&str, &str)> = self
            .env
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        let out = exec_local_env(script, &env)?;
        if !out.success() {
            return Err(format!("exit code {}: {}", out.exit_code, out.stderr.trim()));
        }
        Ok(out)
    }

    fn converge(&self, id: &str, resource: &ResolvedResource, script: &str) -> Result<Attributes, String> {
        let out = self.run(id, script)?;
        let attrs = if out.stdout.trim().is_empty() {
            Attributes::new()
        } else {
            out.attributes()?
        };
        complete_attributes(resource, attrs)
    }
}

impl Provider for AwsCliProvider {
    fn name(&self) -> &'static str {
        "aws-cli"
    }

    fn create(&mut self, id: &str, resource: &ResolvedResource) -> Result<Attributes, String> {
        let script = resources::create_script(resource)?;
        self.converge(id, resource, &script)
    }

    fn update(
        &mut self,
        id: &str,
        resource: &ResolvedResource,
        current: &Attributes,
    ) -> Result<Attributes, String> {
        let script = resources::update_script(resource, current)?;
        self.converge(id, resource, &script)
    }

    fn delete(&mut self, id: &str, kind: &ResourceKind, attrs: &Attributes) -> Result<(), String> {
        let script = resources::delete_script(kind, attrs)?;
        self.run(id, &script).map(|_| ())
    }
}

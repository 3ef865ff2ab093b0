//! Stack declarations — the four provisioning steps.
//!
//! Each step returns a [`ResourceRef`] whose deferred attributes are threaded
//! into the next step. Exports go through an explicit [`OutputSink`].
//!
//! 1. Lambda execution role
//! 2. Compute function
//! 3. Workflow role + workflow definition
//! 4. Scheduler role + scheduled trigger

use crate::core::cron::CronExpr;
use crate::core::output::{Output, OutputSink, ResourceRef};
use crate::core::resolver::POLICY_SCOPE;
use crate::core::types::*;
use crate::resources::{events, iam, sfn};
use indexmap::IndexMap;

/// Logical ids of the declared resources.
pub const LAMBDA_ROLE: &str = "lambda-role";
pub const LAMBDA: &str = "lambda";
pub const STEP_FUNCTION_ROLE: &str = "step-function-role";
pub const STEP_FUNCTION: &str = "step-function";
pub const EVENT_RULE_ROLE: &str = "event-rule-role";
pub const EVENT_RULE: &str = "event-rule";
pub const EVENT_TARGET: &str = "event-target";

/// The declared resource graph.
#[derive(Debug, Clone)]
pub struct Stack {
    pub name: String,
    /// Region every regional resource lives in
    pub region: String,
    pub resources: IndexMap<String, Resource>,
}

impl Stack {
    pub fn new(name: &str, region: &str) -> Self {
        Self {
            name: name.to_string(),
            region: region.to_string(),
            resources: IndexMap::new(),
        }
    }

    /// Declare a resource under a logical id.
    pub fn register(&mut self, id: &str, resource: Resource) -> Result<ResourceRef, String> {
        if self.resources.contains_key(id) {
            return Err(format!("resource '{}' declared twice", id));
        }
        self.resources.insert(id.to_string(), resource);
        Ok(ResourceRef::new(id))
    }

    /// Physical name for a resource of this stack.
    pub fn physical_name(&self, suffix: &str) -> String {
        if suffix.is_empty() {
            self.name.clone()
        } else {
            format!("{}-{}", self.name, suffix)
        }
    }

    /// Region input for regional resources. Moving the stack to another
    /// region changes their desired state.
    fn region_input(&self) -> Output {
        Output::known(self.region.as_str())
    }
}

/// A declared stack together with its exports.
#[derive(Debug, Clone)]
pub struct Deployment {
    pub stack: Stack,
    pub outputs: OutputSink,
}

/// Declare the whole stack from config.
pub fn declare(config: &StackConfig) -> Result<Deployment, String> {
    let mut stack = Stack::new(&config.name, &config.region);
    let mut outputs = OutputSink::new();

    log::info!("Declaring Lambda...");
    let lambda_role = create_lambda_iam_role(&mut stack)?;
    let lambda = create_lambda_function(&mut stack, &config.function, &lambda_role, &mut outputs)?;

    // The step function depends on the Lambda function existing
    log::info!("Declaring Step Function...");
    let step_fn_role = create_step_function_iam_role(&mut stack, &lambda)?;
    let step_fn = create_step_function(
        &mut stack,
        &config.workflow,
        &lambda,
        &step_fn_role,
        &mut outputs,
    )?;

    // The event rule depends on the step function existing
    log::info!("Declaring event rule that will trigger the step function");
    let rule_role = create_event_rule_iam_role(&mut stack, &step_fn)?;
    create_event_rule(&mut stack, &config.schedule, &step_fn, &rule_role, &mut outputs)?;

    Ok(Deployment { stack, outputs })
}

/// Role the function executes as, allowed to write its logs.
pub fn create_lambda_iam_role(stack: &mut Stack) -> Result<ResourceRef, String> {
    let trust = iam::trust_policy(iam::LAMBDA_SERVICE).to_json()?;
    let policy = iam::permission_policy(&iam::LOG_ACTIONS, iam::LOG_RESOURCE).to_json()?;
    let role = Resource::new(ResourceKind::IamRole, &stack.physical_name("lambda-role"))
        .input("assume_role_policy", Output::known(trust))
        .input("policy_name", Output::known(stack.physical_name("lambda-role-policy")))
        .input("policy", Output::known(policy));
    stack.register(LAMBDA_ROLE, role)
}

/// The compute function, bound to its execution role.
pub fn create_lambda_function(
    stack: &mut Stack,
    settings: &FunctionSettings,
    role: &ResourceRef,
    outputs: &mut OutputSink,
) -> Result<ResourceRef, String> {
    let function = Resource::new(ResourceKind::LambdaFunction, &stack.physical_name("lambda"))
        .input("region", stack.region_input())
        .input("description", Output::known(settings.description.as_str()))
        .input("role", role.arn())
        .input("runtime", Output::known(settings.runtime.as_str()))
        .input("handler", Output::known(settings.handler.as_str()))
        .input("code", Output::known(settings.archive.as_str()));
    let lambda = stack.register(LAMBDA, function)?;
    outputs.export("lambda", lambda.name())?;
    Ok(lambda)
}

/// Role the workflow runs as, allowed to invoke exactly one function.
pub fn create_step_function_iam_role(
    stack: &mut Stack,
    lambda: &ResourceRef,
) -> Result<ResourceRef, String> {
    let trust = iam::trust_policy(&iam::states_service(&stack.region)).to_json()?;
    let role = Resource::new(ResourceKind::IamRole, &stack.physical_name("step-function-role"))
        .input("assume_role_policy", Output::known(trust))
        .input(
            "policy_name",
            Output::known(stack.physical_name("step-function-role-policy")),
        )
        .input(
            "policy",
            lambda
                .arn()
                .apply(|arn| iam::permission_policy(&["lambda:InvokeFunction"], arn).to_json()),
        )
        .input(POLICY_SCOPE, lambda.arn());
    stack.register(STEP_FUNCTION_ROLE, role)
}

/// Single-task workflow invoking the function, with bounded retry.
pub fn create_step_function(
    stack: &mut Stack,
    settings: &WorkflowSettings,
    lambda: &ResourceRef,
    role: &ResourceRef,
    outputs: &mut OutputSink,
) -> Result<ResourceRef, String> {
    let workflow = settings.clone();
    let machine = Resource::new(ResourceKind::StateMachine, &stack.physical_name("step-function"))
        .input("region", stack.region_input())
        .input("role_arn", role.arn())
        .input(
            "definition",
            lambda
                .arn()
                .apply(move |arn| sfn::render_definition(arn, &workflow)),
        );
    let step_fn = stack.register(STEP_FUNCTION, machine)?;
    outputs.export("step_function", step_fn.id())?;
    Ok(step_fn)
}

/// Role the schedule assumes, allowed to start exactly one workflow.
pub fn create_event_rule_iam_role(
    stack: &mut Stack,
    step_function: &ResourceRef,
) -> Result<ResourceRef, String> {
    let trust = iam::trust_policy(&iam::states_service(&stack.region)).to_json()?;
    let role = Resource::new(ResourceKind::IamRole, &stack.physical_name("event-rule-role"))
        .input("assume_role_policy", Output::known(trust))
        .input(
            "policy_name",
            Output::known(stack.physical_name("event-rule-role-policy")),
        )
        .input(
            "policy",
            step_function
                .arn()
                .apply(|arn| iam::permission_policy(&["states:StartExecution"], arn).to_json()),
        )
        .input(POLICY_SCOPE, step_function.arn());
    stack.register(EVENT_RULE_ROLE, role)
}

/// Cron rule plus the target binding it to the workflow.
pub fn create_event_rule(
    stack: &mut Stack,
    settings: &ScheduleSettings,
    step_function: &ResourceRef,
    role: &ResourceRef,
    outputs: &mut OutputSink,
) -> Result<ResourceRef, String> {
    let cron = CronExpr::parse(&settings.expression)?;
    log::info!("Declaring event rule ({})...", cron.describe());

    let mut rule = Resource::new(ResourceKind::EventRule, &stack.physical_name(""))
        .input("region", stack.region_input())
        .input("description", Output::known(settings.description.as_str()))
        .input("schedule_expression", Output::known(cron.schedule_expression()));
    rule.tags = settings.tags.clone();
    let rule = stack.register(EVENT_RULE, rule)?;

    let target = Resource::new(ResourceKind::EventTarget, &stack.physical_name(""))
        .input("region", stack.region_input())
        .input("rule", rule.name())
        .input("arn", step_function.arn())
        .input("role_arn", role.arn())
        .input("input", Output::known(events::target_input(&settings.input)?));
    stack.register(EVENT_TARGET, target)?;

    outputs.export("event_rule", rule.name())?;
    log::info!("Event rule declared");
    Ok(rule)
}

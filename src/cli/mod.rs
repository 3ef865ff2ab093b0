//! SS-020: CLI subcommands — init, validate, plan, apply, destroy, outputs, status, render.

use crate::core::output::AttributeStore;
use crate::core::{executor, parser, planner, resolver, state, types};
use crate::provider;
use crate::stack::{self, Deployment};
use crate::tripwire::eventlog;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::{Path, PathBuf};

#[derive(Parser, Debug)]
#[command(
    name = "stepstack",
    version,
    about = "Scheduled serverless workflow stack: a function, a state machine invoking it, and a cron trigger"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new stack project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate stack.yaml and the declared resource graph
    Validate {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,
    },

    /// Show execution plan (diff declared stack vs lock)
    Plan {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,

        /// Target specific resource
        #[arg(short, long)]
        resource: Option<String>,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Converge the account to the declared stack
    Apply {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,

        /// Target specific resource
        #[arg(short, long)]
        resource: Option<String>,

        /// Force re-apply all resources
        #[arg(long)]
        force: bool,

        /// Show what would be executed without running
        #[arg(long)]
        dry_run: bool,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Delete every resource recorded in the lock
    Destroy {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,

        /// Target specific resource
        #[arg(short, long)]
        resource: Option<String>,

        /// Show what would be deleted without running
        #[arg(long)]
        dry_run: bool,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Print the deployment outputs recorded by the last apply
    Outputs {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,

        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show current state from lock files
    Status {
        /// State directory
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,

        /// Target specific stack
        #[arg(short, long)]
        stack: Option<String>,
    },

    /// Print a resource's rendered inputs
    Render {
        /// Path to stack.yaml
        #[arg(short, long, default_value = "stack.yaml")]
        file: PathBuf,

        /// Logical resource id (default: all)
        #[arg(short, long)]
        resource: Option<String>,

        /// State directory; recorded attributes replace placeholders
        #[arg(long, default_value = "state")]
        state_dir: PathBuf,
    },

    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Plan {
            file,
            resource,
            state_dir,
        } => cmd_plan(&file, &state_dir, resource.as_deref()),
        Commands::Apply {
            file,
            resource,
            force,
            dry_run,
            state_dir,
        } => cmd_apply(&file, &state_dir, resource.as_deref(), force, dry_run),
        Commands::Destroy {
            file,
            resource,
            dry_run,
            state_dir,
        } => cmd_destroy(&file, &state_dir, resource.as_deref(), dry_run),
        Commands::Outputs {
            file,
            state_dir,
            json,
        } => cmd_outputs(&file, &state_dir, json),
        Commands::Status { state_dir, stack } => cmd_status(&state_dir, stack.as_deref()),
        Commands::Render {
            file,
            resource,
            state_dir,
        } => cmd_render(&file, &state_dir, resource.as_deref()),
        Commands::Completions { shell } => {
            clap_complete::generate(shell, &mut Cli::command(), "stepstack", &mut std::io::stdout());
            Ok(())
        }
    }
}

const TEMPLATE: &str = r#"version: "1.0"
name: pulumi-step-functions
description: "Scheduled workflow invoking a function"

# sim: simulated account under state/; aws_cli: the aws command line
provider: sim
region: eu-west-1

function:
  archive: package.zip
  runtime: provided.al2023
  handler: bootstrap

schedule:
  expression: "30 10 ? * MON-FRI *"
  description: "Pulumi Step Functions"
  input:
    pulumi_step_functions: true

policy:
  failure: stop_on_first
  tripwire: true
  lock_file: true
"#;

fn cmd_init(path: &Path) -> Result<(), String> {
    let config_path = path.join("stack.yaml");
    if config_path.exists() {
        return Err(format!("{} already exists", config_path.display()));
    }

    let state_dir = path.join("state");
    std::fs::create_dir_all(&state_dir).map_err(|e| format!("cannot create state dir: {}", e))?;
    std::fs::write(&config_path, TEMPLATE)
        .map_err(|e| format!("cannot write {}: {}", config_path.display(), e))?;

    println!("Initialized stepstack project at {}", path.display());
    println!("  Created: {}", config_path.display());
    println!("  Created: {}/", state_dir.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let (config, deployment) = parse_and_validate(file)?;
    let order = resolver::build_execution_order(&deployment.stack)?;
    println!(
        "OK: {} ({} resources, {} outputs, provider {:?})",
        config.name,
        order.len(),
        deployment.outputs.len(),
        config.provider
    );
    Ok(())
}

/// Parse, validate and declare a stack, returning errors if invalid.
fn parse_and_validate(file: &Path) -> Result<(types::StackConfig, Deployment), String> {
    let config = parser::parse_config_file(file)?;
    let mut errors = parser::validate_config(&config);
    if errors.is_empty() {
        let deployment = stack::declare(&config)?;
        errors = parser::validate_deployment(&deployment);
        if errors.is_empty() {
            return Ok((config, deployment));
        }
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err(format!("{} validation error(s)", errors.len()))
}

fn cmd_plan(file: &Path, state_dir: &Path, resource_filter: Option<&str>) -> Result<(), String> {
    let (_config, deployment) = parse_and_validate(file)?;
    let execution_order = resolver::build_execution_order(&deployment.stack)?;
    let lock = state::load_lock(state_dir, &deployment.stack.name)?;
    let plan = planner::plan(&deployment.stack, &execution_order, lock.as_ref())?;
    print_plan(&plan, resource_filter);
    Ok(())
}

/// Display a plan to stdout.
fn print_plan(plan: &types::ExecutionPlan, resource_filter: Option<&str>) {
    println!("Planning: {} ({} resources)", plan.name, plan.execution_order.len());
    println!();
    for change in &plan.changes {
        if let Some(filter) = resource_filter {
            if change.resource_id != filter {
                continue;
            }
        }
        let symbol = match change.action {
            types::PlanAction::Create => "+",
            types::PlanAction::Update => "~",
            types::PlanAction::Destroy => "-",
            types::PlanAction::NoOp => " ",
        };
        println!("  {} {}", symbol, change.description);
    }
    println!();
    println!(
        "Plan: {} to add, {} to change, {} to destroy, {} unchanged.",
        plan.to_create, plan.to_update, plan.to_destroy, plan.unchanged
    );
}

fn cmd_apply(
    file: &Path,
    state_dir: &Path,
    resource_filter: Option<&str>,
    force: bool,
    dry_run: bool,
) -> Result<(), String> {
    let (config, deployment) = parse_and_validate(file)?;
    let cfg = executor::ApplyConfig {
        config: &config,
        deployment: &deployment,
        state_dir,
        force,
        dry_run,
        resource_filter,
    };

    if dry_run {
        cmd_plan(file, state_dir, resource_filter)?;
        println!("Dry run — no changes applied.");
        return Ok(());
    }

    let mut provider = provider::open(&config, state_dir)?;
    let result = executor::apply(&cfg, provider.as_mut())?;

    println!(
        "{}: {} converged, {} unchanged, {} destroyed, {} failed, {} skipped ({:.1}s)",
        result.stack,
        result.resources_converged,
        result.resources_unchanged,
        result.resources_destroyed,
        result.resources_failed,
        result.resources_skipped,
        result.total_duration.as_secs_f64()
    );
    print_outputs(&result.outputs);

    println!();
    if result.resources_failed > 0 {
        println!(
            "Apply completed with errors: {} converged, {} unchanged, {} FAILED",
            result.resources_converged, result.resources_unchanged, result.resources_failed
        );
        return Err(format!("{} resource(s) failed", result.resources_failed));
    }
    println!(
        "Apply complete: {} converged, {} unchanged.",
        result.resources_converged, result.resources_unchanged
    );
    Ok(())
}

fn cmd_destroy(
    file: &Path,
    state_dir: &Path,
    resource_filter: Option<&str>,
    dry_run: bool,
) -> Result<(), String> {
    let (config, deployment) = parse_and_validate(file)?;
    let cfg = executor::ApplyConfig {
        config: &config,
        deployment: &deployment,
        state_dir,
        force: false,
        dry_run,
        resource_filter,
    };

    if dry_run {
        match state::load_lock(state_dir, &deployment.stack.name)? {
            Some(lock) => {
                for id in executor::destroy_order(&cfg, &lock)? {
                    println!("  - {}: destroy", id);
                }
            }
            None => println!("No state found for {}.", deployment.stack.name),
        }
        println!("Dry run — nothing destroyed.");
        return Ok(());
    }

    let mut provider = provider::open(&config, state_dir)?;
    let result = executor::destroy(&cfg, provider.as_mut())?;
    println!(
        "{}: {} destroyed, {} failed ({:.1}s)",
        result.stack,
        result.resources_destroyed,
        result.resources_failed,
        result.total_duration.as_secs_f64()
    );
    if result.resources_failed > 0 {
        return Err(format!("{} resource(s) failed to delete", result.resources_failed));
    }
    Ok(())
}

fn print_outputs(outputs: &indexmap::IndexMap<String, String>) {
    if outputs.is_empty() {
        return;
    }
    println!();
    println!("Outputs:");
    for (key, value) in outputs {
        println!("  {}: {}", key, value);
    }
}

fn cmd_outputs(file: &Path, state_dir: &Path, json: bool) -> Result<(), String> {
    let config = parser::parse_config_file(file)?;
    let lock = state::load_lock(state_dir, &config.name)?
        .ok_or_else(|| format!("no state for {}; run `stepstack apply` first", config.name))?;
    if json {
        let doc = serde_json::to_string_pretty(&lock.outputs)
            .map_err(|e| format!("JSON serialize error: {}", e))?;
        println!("{}", doc);
    } else {
        for (key, value) in &lock.outputs {
            println!("{}: {}", key, value);
        }
    }
    Ok(())
}

fn cmd_status(state_dir: &Path, stack_filter: Option<&str>) -> Result<(), String> {
    let entries = std::fs::read_dir(state_dir)
        .map_err(|e| format!("cannot read state dir {}: {}", state_dir.display(), e))?;

    let mut found = false;
    for entry in entries.flatten() {
        let name = entry.file_name().to_string_lossy().to_string();
        if let Some(filter) = stack_filter {
            if name != filter {
                continue;
            }
        }
        if !entry.path().is_dir() {
            continue;
        }

        if let Some(lock) = state::load_lock(state_dir, &name)? {
            found = true;
            println!("Stack: {}", lock.stack);
            println!("  Generated: {}", lock.generated_at);
            println!("  Generator: {}", lock.generator);
            println!("  Resources: {}", lock.resources.len());
            for (id, rl) in &lock.resources {
                let duration = rl
                    .duration_seconds
                    .map(|d| format!(" ({:.2}s)", d))
                    .unwrap_or_default();
                println!("    {}: {} [{}]{}", id, rl.status, rl.kind, duration);
            }
            if let Some(last) = eventlog::read_events(state_dir, &name)?.last() {
                println!("  Last event: {} {}", last.ts, event_name(&last.event));
            }
            println!();
        }
    }

    if !found {
        println!("No state found. Run `stepstack apply` first.");
    }
    Ok(())
}

fn event_name(event: &types::ProvenanceEvent) -> &'static str {
    match event {
        types::ProvenanceEvent::ApplyStarted { .. } => "apply_started",
        types::ProvenanceEvent::ResourceStarted { .. } => "resource_started",
        types::ProvenanceEvent::ResourceConverged { .. } => "resource_converged",
        types::ProvenanceEvent::ResourceFailed { .. } => "resource_failed",
        types::ProvenanceEvent::ResourceDestroyed { .. } => "resource_destroyed",
        types::ProvenanceEvent::ApplyCompleted { .. } => "apply_completed",
        types::ProvenanceEvent::DestroyCompleted { .. } => "destroy_completed",
    }
}

/// Rendered inputs of one resource: resolved when the lock has what it
/// needs, placeholders otherwise.
fn render_resource(
    id: &str,
    resource: &types::Resource,
    store: &AttributeStore,
) -> Result<indexmap::IndexMap<String, String>, String> {
    match resolver::resolve_resource(id, resource, store) {
        Ok(resolved) => Ok(resolved.props),
        Err(_) => resolver::preview_resource(id, resource),
    }
}

fn cmd_render(file: &Path, state_dir: &Path, resource_filter: Option<&str>) -> Result<(), String> {
    let (_config, deployment) = parse_and_validate(file)?;
    let order = resolver::build_execution_order(&deployment.stack)?;
    if let Some(filter) = resource_filter {
        if !deployment.stack.resources.contains_key(filter) {
            return Err(format!("unknown resource '{}'", filter));
        }
    }

    let store: AttributeStore = state::load_lock(state_dir, &deployment.stack.name)?
        .map(|lock| {
            lock.resources
                .into_iter()
                .map(|(id, rl)| (id, rl.attributes))
                .collect()
        })
        .unwrap_or_default();

    for id in &order {
        if resource_filter.is_some_and(|f| f != id.as_str()) {
            continue;
        }
        let resource = &deployment.stack.resources[id];
        let props = render_resource(id, resource, &store)?;
        println!("# {} ({} {})", id, resource.kind, resource.name);
        for (key, value) in &props {
            if value.contains('\n') {
                println!("{}: |", key);
                for line in value.lines() {
                    println!("  {}", line);
                }
            } else {
                println!("{}: {}", key, value);
            }
        }
        println!();
    }
    Ok(())
}

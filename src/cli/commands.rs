use crate::{
    cli::args::{CheckArgs, OutputFormat, RunArgs},
    core::{
        config::ConfigLoader,
        process::{InstanceStatus, ProcessDefinition, ProcessEngine, ProcessInstance, Variables},
    },
    Result,
};
use anyhow::{anyhow, Context};
use serde_json::Value;
use std::path::Path;

fn parse_input(raw: Option<&str>) -> Result<Variables> {
    let Some(raw) = raw else {
        return Ok(Variables::new());
    };
    match serde_json::from_str::<Value>(raw).context("--input must be valid JSON")? {
        Value::Object(map) => Ok(map),
        other => Err(anyhow!("--input must be a JSON object, got {}", other)),
    }
}

pub async fn run(args: RunArgs, config_path: Option<&Path>) -> Result<()> {
    let config = ConfigLoader::load(config_path)?;
    let definition = ProcessDefinition::load_from_file(&args.definition)?;
    let input = parse_input(args.input.as_deref())?;
    tracing::info!(
        "Running process {} from {}",
        definition.id,
        args.definition.display()
    );

    let process_id = definition.id.clone();
    let engine = ProcessEngine::new(config.engine);
    engine.deploy_process(definition).await?;
    let instance = engine
        .start_process(&process_id, input, &args.initiated_by)
        .await?;

    match args.format {
        OutputFormat::Text => print_instance(&instance),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&instance)?),
    }

    match &instance.fault {
        Some(fault) if instance.status == InstanceStatus::Faulted => {
            Err(anyhow!("process instance faulted: {}", fault))
        }
        _ => Ok(()),
    }
}

fn print_instance(instance: &ProcessInstance) {
    println!("Instance: {}", instance.instance_id);
    println!("Process: {}", instance.process_id);
    println!("Status: {}", instance.status);
    println!("Started: {}", instance.started_at);
    if let Some(completed) = instance.completed_at {
        println!("Completed: {}", completed);
    }
    if let Some(fault) = &instance.fault {
        println!("Fault: {}", fault);
    }

    println!("\nActivities:");
    for entry in &instance.execution_log {
        match &entry.error {
            Some(error) => println!(
                "  {} ({}) {} in {}ms: {}",
                entry.activity_id,
                entry.kind,
                entry.status.as_str(),
                entry.duration_ms,
                error
            ),
            None => println!(
                "  {} ({}) {} in {}ms",
                entry.activity_id,
                entry.kind,
                entry.status.as_str(),
                entry.duration_ms
            ),
        }
    }

    println!("\nVariables:");
    for (name, value) in &instance.variables {
        println!("  {} = {}", name, value);
    }
}

pub fn check(args: CheckArgs) -> Result<()> {
    let definition = ProcessDefinition::load_from_file(&args.definition)?;
    let dangling = definition.dangling_references();
    if dangling.is_empty() {
        println!(
            "{} ({} activities): all references resolve",
            definition.id,
            definition.activities.len()
        );
        return Ok(());
    }

    for reference in &dangling {
        println!("dangling: {}", reference);
    }
    Err(anyhow!(
        "{} dangling reference(s) in {}",
        dangling.len(),
        definition.id
    ))
}

pub fn show_config(config_path: Option<&Path>) -> Result<()> {
    let config = ConfigLoader::load(config_path)?;
    match config_path {
        Some(path) => println!("# source: {}", path.display()),
        None => println!("# source: defaults"),
    }
    print!("{}", toml::to_string_pretty(&config)?);

    println!("\n# environment overrides:");
    for doc in ConfigLoader::env_var_documentation() {
        println!("#   {}", doc);
    }
    Ok(())
}

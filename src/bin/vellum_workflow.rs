//! Workflow definition CLI
//!
//! Validates workflow and graph definition files, browses templates, and
//! instantiates them, against the engine's built-in registries.
//!
//! # Usage
//!
//! ```bash
//! # Validate a workflow definition file
//! vellum-workflow validate workflow.json
//!
//! # Validate a graph definition file
//! vellum-workflow validate --graph review-loop.json
//!
//! # Browse templates
//! vellum-workflow templates list
//! vellum-workflow templates list --category "Document Processing"
//! vellum-workflow templates show rag-ingestion
//!
//! # Instantiate a template
//! vellum-workflow instantiate rag-ingestion --param chunk_size=500
//!
//! # Print a graph summary
//! vellum-workflow summary review-loop.json
//! ```
//!
//! # Exit Codes
//!
//! - 0: success
//! - 2: validation error
//! - 3: not found
//! - 1: any other failure

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use vellum_workflows::{
    validate_graph, validate_workflow, EngineError, GraphDefinition, TemplateRegistry, Validation,
    WorkflowDefinition,
};

#[derive(Parser, Debug)]
#[command(name = "vellum-workflow")]
#[command(about = "Validate, browse, and instantiate workflow definitions")]
#[command(version)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Validate a workflow (or graph) definition file
    Validate {
        /// Path to the JSON definition
        path: PathBuf,

        /// Treat the file as a graph definition
        #[arg(long)]
        graph: bool,
    },

    /// Browse workflow templates
    Templates {
        #[command(subcommand)]
        command: TemplateCommand,
    },

    /// Instantiate a template and print the rendered definition
    Instantiate {
        /// Template id
        template_id: String,

        /// Parameter overrides as key=value (value parsed as JSON, falling
        /// back to a plain string)
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },

    /// Print a human-readable summary of a graph definition file
    Summary {
        /// Path to the JSON graph definition
        path: PathBuf,
    },
}

#[derive(Subcommand, Debug)]
enum TemplateCommand {
    /// List templates, optionally filtered by category
    List {
        #[arg(long)]
        category: Option<String>,
    },

    /// Show one template's parameters and metadata
    Show { template_id: String },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    match run(args) {
        Ok(code) => code,
        Err(e) => {
            // Engine errors carry their own exit codes
            if let Some(engine_error) = e.downcast_ref::<EngineError>() {
                eprintln!("Error: {}", engine_error);
                return ExitCode::from(engine_error.exit_code() as u8);
            }
            eprintln!("Error: {:#}", e);
            ExitCode::from(1)
        }
    }
}

fn run(args: Args) -> Result<ExitCode> {
    match args.command {
        Command::Validate { path, graph } => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let validation = if graph {
                let def: GraphDefinition =
                    serde_json::from_str(&text).context("parsing graph definition")?;
                validate_graph(&def)
            } else {
                let def: WorkflowDefinition =
                    serde_json::from_str(&text).context("parsing workflow definition")?;
                validate_workflow(&def)
            };
            Ok(report_validation(&path, validation))
        }

        Command::Templates { command } => {
            let registry = TemplateRegistry::builtin();
            match command {
                TemplateCommand::List { category } => {
                    for info in registry.list(category.as_deref()) {
                        println!("{:<28} {:<22} {}", info.template_id, info.category, info.description);
                    }
                    Ok(ExitCode::SUCCESS)
                }
                TemplateCommand::Show { template_id } => {
                    let template = registry.get(&template_id).ok_or_else(|| {
                        EngineError::not_found(
                            vellum_workflows::ResourceKind::Template,
                            template_id.as_str(),
                        )
                    })?;
                    let info = template.info();
                    println!("Template: {}", info.name);
                    println!("Description: {}", info.description);
                    println!("Category: {}", info.category);
                    println!("Version: {}", info.version);
                    println!("Parameters:");
                    for (name, schema) in &info.parameters {
                        let default = schema
                            .default
                            .as_ref()
                            .map(|v| v.to_string())
                            .unwrap_or_else(|| "required".to_string());
                        println!(
                            "  {} ({}): {} [default: {}]",
                            name,
                            schema.kind.name(),
                            schema.description.as_deref().unwrap_or(""),
                            default
                        );
                    }
                    Ok(ExitCode::SUCCESS)
                }
            }
        }

        Command::Instantiate {
            template_id,
            params,
        } => {
            let registry = TemplateRegistry::builtin();
            let params = parse_params(&params)?;
            let definition = registry.instantiate(&template_id, &params)?;
            println!("{}", serde_json::to_string_pretty(&definition)?);
            Ok(ExitCode::SUCCESS)
        }

        Command::Summary { path } => {
            let text = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            let def: GraphDefinition =
                serde_json::from_str(&text).context("parsing graph definition")?;
            let validation = validate_graph(&def);
            if !validation.valid {
                return Ok(report_validation(&path, validation));
            }
            println!("{}", def.summary());
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn report_validation(path: &std::path::Path, validation: Validation) -> ExitCode {
    if validation.valid {
        println!("{}: valid", path.display());
        ExitCode::SUCCESS
    } else {
        eprintln!(
            "{}: invalid: {}",
            path.display(),
            validation.error.unwrap_or_default()
        );
        ExitCode::from(2)
    }
}

/// Parse `key=value` pairs; values are JSON when they parse, strings
/// otherwise.
fn parse_params(raw: &[String]) -> Result<Map<String, Value>> {
    let mut params = Map::new();
    for pair in raw {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("parameter '{}' is not key=value", pair))?;
        let parsed = serde_json::from_str(value).unwrap_or(Value::String(value.to_string()));
        params.insert(key.to_string(), parsed);
    }
    Ok(params)
}

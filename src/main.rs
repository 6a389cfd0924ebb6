//! bpmnflow - BPMN process kernel
//!
//! Loads process models from a directory and advances documents through them.

mod commands;

use bpmnflow_core::ModelResolver;
use bpmnflow_kernel::{load_models, Config, PluginFactoryRegistry, WorkflowKernel};
use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bpmnflow")]
#[command(about = "Advance business documents through BPMN process models")]
#[command(version)]
struct Cli {
    /// Directory of model JSON files (overrides the configured directory)
    #[arg(short, long, env = "BPMNFLOW_MODELS_DIR")]
    models: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Process a document's event and print the updated document
    Process {
        /// Document JSON (or @file.json to read from file)
        #[arg(short, long)]
        document: String,

        /// Event to process (overrides $eventid)
        #[arg(short, long)]
        event: Option<i64>,

        /// Write the updated document to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Compute the task a document would reach, without side effects
    Eval {
        /// Document JSON (or @file.json to read from file)
        #[arg(short, long)]
        document: String,

        /// Event to evaluate (overrides $eventid)
        #[arg(short, long)]
        event: Option<i64>,
    },

    /// List registered model versions
    Models,

    /// List the events callable on a task, or all tasks of a model version
    Events {
        /// Model version
        #[arg(short, long)]
        version: String,

        /// Task id (lists the model's tasks if omitted)
        #[arg(short, long)]
        task: Option<i64>,
    },

    /// Validate a model file and print its checksum
    Check {
        /// Model file
        file: PathBuf,
    },
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Load configuration (from file if BPMNFLOW_CONFIG is set, then env overrides)
    let mut config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if std::env::var("BPMNFLOW_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };
    if let Some(dir) = cli.models {
        config.models.dir = dir;
    }

    // Model files are validated on their own, without a populated resolver
    if let Commands::Check { file } = &cli.command {
        return print(commands::check(file));
    }

    let resolver = Arc::new(ModelResolver::new());
    let report = load_models(&resolver, &config.models)?;
    tracing::info!(
        "Loaded {} model(s) from {}",
        report.total(),
        config.models.dir.display()
    );

    // The command line ships no plugins; a configured plugin name fails here
    let mut kernel = WorkflowKernel::with_config(resolver, config.kernel.clone());
    kernel.register_configured_plugins(&PluginFactoryRegistry::new())?;

    print(commands::execute(kernel, cli.command))
}

fn print(result: Result<String, Box<dyn std::error::Error>>) -> Result<(), Box<dyn std::error::Error>> {
    match result {
        Ok(output) => {
            println!("{}", output);
            Ok(())
        }
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    }
}

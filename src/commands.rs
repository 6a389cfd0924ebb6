//! Command execution.

use crate::Commands;
use bpmnflow_core::{Document, ModelGraph};
use bpmnflow_kernel::WorkflowKernel;
use colored::Colorize;
use serde_json::Value;
use std::path::Path;

/// Executes a command and returns the formatted output.
pub fn execute(mut kernel: WorkflowKernel, cmd: Commands) -> Result<String, Box<dyn std::error::Error>> {
    match cmd {
        Commands::Check { file } => check(&file),

        Commands::Process {
            document,
            event,
            output,
        } => {
            let mut doc = parse_document(&document, event)?;
            let result = kernel.process(&mut doc)?;
            eprintln!(
                "{} {} {} → {} ({}) [{}]",
                "Processed".green(),
                doc.unique_id().cyan(),
                result.previous_task,
                result.task.to_string().yellow(),
                result.model_version,
                result.history.join(", ")
            );
            write_document(&doc, output.as_deref())
        }

        Commands::Eval { document, event } => {
            let doc = parse_document(&document, event)?;
            let task = kernel.eval(&doc)?;
            Ok(format!(
                "{} {}.{} → {}",
                "Evaluated".green(),
                doc.task_id(),
                doc.event_id(),
                task.to_string().yellow()
            ))
        }

        Commands::Models => {
            let resolver = kernel.context().resolver();
            let versions = resolver.versions();
            if versions.is_empty() {
                return Ok("No models registered".yellow().to_string());
            }

            let mut output = format!("{}\n", "Models:".bold());
            for version in versions {
                let graph = resolver.get_model(&version)?;
                let groups: Vec<String> = resolver
                    .find_all_process_groups(&graph)
                    .map(|g| g.into_iter().collect())
                    .unwrap_or_default();
                output.push_str(&format!(
                    "  {} [groups: {}] (checksum: {})\n",
                    version.cyan(),
                    groups.join(", "),
                    graph.checksum
                ));
            }
            Ok(output.trim_end().to_string())
        }

        Commands::Events { version, task } => {
            let resolver = kernel.context().resolver();
            let graph = resolver.get_model(&version)?;

            match task {
                Some(task_id) => {
                    let events = resolver.find_events_by_task(&graph, task_id)?;
                    let mut output =
                        format!("{}\n", format!("Task {} in {}", task_id, version.cyan()).bold());
                    for event in events {
                        let mut line = format!("  {} {}", event.id.to_string().yellow(), event.name);
                        if let Some(adapter) = &event.signal_adapter {
                            line.push_str(&format!(" (adapter: {})", adapter));
                        }
                        if let Some(next) = event.follow_up_event() {
                            line.push_str(&format!(" (follow-up: {})", next));
                        }
                        output.push_str(&line);
                        output.push('\n');
                    }
                    Ok(output.trim_end().to_string())
                }
                None => {
                    let mut output = format!("{}\n", format!("Model {}", version.cyan()).bold());
                    for task in graph.tasks() {
                        output.push_str(&format!(
                            "  {} {} [{}]\n",
                            task.id.to_string().yellow(),
                            task.name,
                            task.group
                        ));
                    }
                    Ok(output.trim_end().to_string())
                }
            }
        }
    }
}

/// Validates a model file on its own.
pub fn check(file: &Path) -> Result<String, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(file)?;
    let json: Value = serde_json::from_str(&content)?;
    let graph = ModelGraph::from_json(&json)?;
    Ok(format!(
        "{} model {} ({} elements, checksum: {})",
        "Valid".green(),
        graph.version().cyan(),
        graph.elements().len(),
        graph.checksum
    ))
}

/// Parses a document argument (either inline JSON or @file.json).
fn parse_document(arg: &str, event: Option<i64>) -> Result<Document, Box<dyn std::error::Error>> {
    let json = parse_json_arg(arg)?;
    let mut doc = Document::from_json(&json)?;
    if let Some(event) = event {
        doc.set_event_id(event);
    }
    Ok(doc)
}

fn write_document(doc: &Document, output: Option<&Path>) -> Result<String, Box<dyn std::error::Error>> {
    let json = format_json(&doc.to_json());
    match output {
        Some(path) => {
            std::fs::write(path, &json)?;
            Ok(format!("{} {}", "Written".green(), path.display()))
        }
        None => Ok(json),
    }
}

/// Parses a JSON argument (either inline JSON or @file.json).
fn parse_json_arg(arg: &str) -> Result<Value, Box<dyn std::error::Error>> {
    if let Some(path) = arg.strip_prefix('@') {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    } else {
        Ok(serde_json::from_str(arg)?)
    }
}

/// Formats JSON for display.
fn format_json(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

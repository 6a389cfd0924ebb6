//! The processing kernel.
//!
//! A kernel advances a document through its process model: it loads the
//! requested event for the document's current task, runs the adapters and
//! plugins, resolves the next element and repeats while events are pending.
//! A call is synchronous and single-threaded; kernels for different
//! documents may share one [`ModelResolver`].

use crate::adapter::{clear_adapter_errors, Adapter, AdapterSet};
use crate::config::KernelConfig;
use crate::context::WorkflowContext;
use crate::error::KernelError;
use crate::plugin::{Plugin, PluginChain, PluginFactoryRegistry};
use bpmnflow_core::{
    items, CoreError, Document, Event, ItemValue, ModelElement, ModelResolver, ModelSwitch, Task,
};
use chrono::{SecondsFormat, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

/// Outcome of a successful `process` call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessResult {
    /// Task the document was at when the call started.
    pub previous_task: i64,
    /// Task the document is parked at.
    pub task: i64,
    pub model_version: String,
    /// Processed `task.event` transitions, in order.
    pub history: Vec<String>,
}

/// Drives documents through their process models.
pub struct WorkflowKernel {
    ctx: WorkflowContext,
    adapters: AdapterSet,
    plugins: PluginChain,
    history: Vec<String>,
}

impl WorkflowKernel {
    /// Creates a kernel with default settings.
    pub fn new(resolver: Arc<ModelResolver>) -> Self {
        Self::with_config(resolver, KernelConfig::default())
    }

    pub fn with_config(resolver: Arc<ModelResolver>, config: KernelConfig) -> Self {
        Self {
            ctx: WorkflowContext::new(resolver, config),
            adapters: AdapterSet::default(),
            plugins: PluginChain::default(),
            history: Vec::new(),
        }
    }

    pub fn context(&self) -> &WorkflowContext {
        &self.ctx
    }

    /// Transitions processed by the last `process` call, including a failed one.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    // =========================================================================
    // Registration
    // =========================================================================

    /// Initializes and registers a plugin. Plugins run in registration order.
    pub fn register_plugin(&mut self, plugin: Box<dyn Plugin>) -> Result<(), KernelError> {
        self.plugins.register(plugin, &self.ctx)
    }

    /// Creates a plugin through the factory registry and registers it.
    pub fn register_plugin_by_name(
        &mut self,
        factories: &PluginFactoryRegistry,
        name: &str,
    ) -> Result<(), KernelError> {
        let plugin = factories.create(name)?;
        self.register_plugin(plugin)
    }

    /// Registers the plugins listed in the kernel configuration.
    pub fn register_configured_plugins(
        &mut self,
        factories: &PluginFactoryRegistry,
    ) -> Result<(), KernelError> {
        let names = self.ctx.config().plugins.clone();
        for name in &names {
            self.register_plugin_by_name(factories, name)?;
        }
        Ok(())
    }

    pub fn unregister_plugin(&mut self, name: &str) -> Result<(), KernelError> {
        self.plugins.unregister(name)
    }

    pub fn unregister_all_plugins(&mut self) {
        debug!(count = self.plugins.len(), "unregistering all plugins");
        self.plugins.clear();
    }

    pub fn plugin_names(&self) -> Vec<&str> {
        self.plugins.names()
    }

    /// Registers an adapter. An adapter with the same id is replaced.
    pub fn register_adapter(&mut self, adapter: Arc<dyn Adapter>) {
        debug!(adapter = adapter.id(), "adapter registered");
        self.adapters.register(adapter);
    }

    pub fn adapter_ids(&self) -> Vec<&str> {
        self.adapters.ids()
    }

    // =========================================================================
    // Processing
    // =========================================================================

    /// Processes the document's event and all events that follow from it.
    ///
    /// On failure the document keeps the changes made so far, including the
    /// transition log, and [`history`](Self::history) holds the transitions
    /// processed before the failure.
    pub fn process(&mut self, doc: &mut Document) -> Result<ProcessResult, KernelError> {
        self.history.clear();
        validate(doc)?;

        if doc.unique_id().is_empty() {
            doc.set_item(items::UNIQUE_ID, generate_unique_id());
        }
        if !doc.has_item(items::WORKITEM_ID) {
            doc.set_item(items::WORKITEM_ID, generate_unique_id());
        }
        doc.set_item(items::TRANSACTION_ID, generate_transaction_id());

        let previous_task = doc.task_id();
        doc.set_item(items::LAST_TASK, previous_task);
        clear_adapter_errors(doc);

        let Self {
            ctx,
            adapters,
            plugins,
            history,
        } = self;
        transition_loop(ctx, doc, history, |version, doc, event| {
            adapters.execute(version, doc, event)?;
            plugins.run(doc, event)
        })?;

        Ok(ProcessResult {
            previous_task,
            task: doc.task_id(),
            model_version: doc.model_version(),
            history: self.history.clone(),
        })
    }

    /// Computes the task a document would be parked at, without running
    /// adapters or plugins and without changing the document.
    pub fn eval(&self, doc: &Document) -> Result<i64, KernelError> {
        let mut doc = doc.clone();
        validate(&doc)?;
        let mut history = Vec::new();
        transition_loop(&self.ctx, &mut doc, &mut history, |_, _, _| Ok(()))?;
        Ok(doc.task_id())
    }
}

fn validate(doc: &Document) -> Result<(), KernelError> {
    if doc.is_empty() {
        return Err(KernelError::UndefinedDocument);
    }
    let task = doc.task_id();
    if task <= 0 {
        return Err(KernelError::UndefinedTask { task });
    }
    let event = doc.event_id();
    if event <= 0 {
        return Err(KernelError::UndefinedEvent { event });
    }
    Ok(())
}

/// Events resolved as next elements within one call, keyed by
/// (version, task, event). They are accepted even though they are not
/// callable from the task directly.
type ChainedEvents = HashMap<(String, i64, i64), Event>;

fn transition_loop<F>(
    ctx: &WorkflowContext,
    doc: &mut Document,
    history: &mut Vec<String>,
    mut execute: F,
) -> Result<(), KernelError>
where
    F: FnMut(&str, &mut Document, &Event) -> Result<(), KernelError>,
{
    let resolver = ctx.resolver();
    let mut chained = ChainedEvents::new();

    loop {
        if doc.event_id() <= 0 {
            match doc.pop_pending_event() {
                Some(next) => doc.set_event_id(next),
                None => return Ok(()),
            }
        }

        let graph = resolver.find_model_for_document(doc)?;
        let version = graph.version().to_string();
        let (task_id, event_id) = (doc.task_id(), doc.event_id());
        let transition = format!("{}.{}", task_id, event_id);

        if history.contains(&transition) {
            return Err(KernelError::LoopDetected {
                transition,
                history: history.clone(),
            });
        }

        let event = match resolver.find_event_by_id(&graph, task_id, event_id)? {
            Some(event) => event,
            None => chained
                .get(&(version.clone(), task_id, event_id))
                .cloned()
                .ok_or_else(|| CoreError::UndefinedModelEntry {
                    version: version.clone(),
                    entry: transition.clone(),
                })?,
        };

        info!(
            "{} ({} ▷ {}→{})",
            doc.unique_id(),
            version,
            task_id,
            event_id
        );
        doc.set_item(items::LAST_EVENT, event.id);
        doc.set_item(items::LAST_EVENT_DATE, Utc::now());

        execute(&version, doc, &event)?;
        history.push(transition.clone());

        doc.set_event_id(0);
        match resolver.find_next_element(&graph, &event, doc)? {
            Some(ModelElement::Task(task)) => update_workflow_status(doc, &task),
            Some(ModelElement::Event(next)) => {
                debug!(transition = %transition, next = next.id, "chained event");
                doc.append_pending_event(next.id);
                chained.insert((version.clone(), task_id, next.id), next);
            }
            None => debug!(transition = %transition, "no next element"),
        }

        if let Some(follow_up) = event.follow_up_event() {
            doc.append_pending_event(follow_up);
        }

        if let Some(switch) = &event.model_switch {
            apply_model_switch(resolver, doc, switch)?;
        }

        let next_task = doc.task_id();
        append_log_entry(ctx.config(), doc, &version, &transition, next_task);
    }
}

/// Moves the document to the task it was resolved to.
fn update_workflow_status(doc: &mut Document, task: &Task) {
    doc.set_task_id(task.id);
    doc.set_item(items::WORKFLOW_STATUS, task.name.clone());
    if !task.group.is_empty() {
        doc.set_item(items::WORKFLOW_GROUP, task.group.clone());
    }
    if let Some(doc_type) = &task.doc_type {
        doc.set_item(items::TYPE, doc_type.clone());
    }
}

fn apply_model_switch(
    resolver: &ModelResolver,
    doc: &mut Document,
    switch: &ModelSwitch,
) -> Result<(), KernelError> {
    info!(
        from = %doc.model_version(),
        to = %switch.version,
        "switching model version"
    );
    doc.set_model_version(switch.version.clone());
    let graph = resolver.find_model_for_document(doc)?;

    if let Some(task_id) = switch.task {
        let task = resolver
            .find_task_by_id(&graph, task_id)
            .ok_or_else(|| CoreError::UndefinedModelEntry {
                version: graph.version().to_string(),
                entry: format!("task {}", task_id),
            })?;
        update_workflow_status(doc, &task);
    }

    doc.set_event_id(switch.event);
    Ok(())
}

/// Appends `timestamp|version|task.event|nextTask[|comment]` to the
/// transition log, dropping the oldest entries beyond the configured cap.
fn append_log_entry(
    config: &KernelConfig,
    doc: &mut Document,
    version: &str,
    transition: &str,
    next_task: i64,
) {
    let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
    let mut entry = format!("{}|{}|{}|{}", timestamp, version, transition, next_task);

    let comment = doc
        .remove_item(&config.log_comment_item)
        .and_then(|values| values.into_iter().next())
        .map(|v| v.to_string())
        .unwrap_or_default();
    if !comment.is_empty() {
        entry.push('|');
        entry.push_str(&comment);
    }

    let mut log = doc.get_item(items::TRANSITION_LOG).to_vec();
    log.push(ItemValue::Text(entry));
    if config.max_log_entries > 0 && log.len() > config.max_log_entries {
        let excess = log.len() - config.max_log_entries;
        log.drain(..excess);
    }
    doc.set_items(items::TRANSITION_LOG, log);
}

/// Time-based hex prefix plus a random hex suffix. A label, not a secret.
fn generate_unique_id() -> String {
    let random = Uuid::new_v4();
    format!(
        "{:x}-{}",
        Utc::now().timestamp_millis(),
        hex::encode(&random.as_bytes()[..4])
    )
}

fn generate_transaction_id() -> String {
    hex::encode(&Uuid::new_v4().as_bytes()[..8])
}

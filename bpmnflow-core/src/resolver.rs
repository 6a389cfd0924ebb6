//! Model registry and resolution.
//!
//! The resolver owns all registered model graphs by version and caches the
//! entity lookups derived from them. Cached entities are handed out as owned
//! copies, so callers can never change registry state through a result.
//!
//! Cache invalidation is always a full clear: adding or removing a model
//! swaps in a fresh cache set. Lookups racing with an invalidation write into
//! the discarded set, and lookups against a graph that is no longer the
//! registered one bypass the cache.

use crate::document::Document;
use crate::error::CoreError;
use crate::expression::{ConditionEvaluator, ExpressionEvaluator};
use crate::model::{ElementKind, Event, ModelElement, ModelGraph, ProcessKind, ProcessRaw, Task};
use crate::navigation;
use dashmap::DashMap;
use parking_lot::RwLock;
use regex::Regex;
use serde_json::Value;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Receives notifications about model resolution side effects.
pub trait ResolutionObserver: Send + Sync {
    /// A document carrying an unknown model version was moved to the newest
    /// model containing its process group.
    fn on_model_migrated(&self, from: &str, to: &str, group: &str);
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct TaskKey {
    version: String,
    task: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct EventKey {
    version: String,
    task: i64,
    event: i64,
}

#[derive(Default)]
struct Caches {
    tasks: DashMap<TaskKey, Task>,
    events: DashMap<EventKey, Event>,
    task_events: DashMap<TaskKey, Vec<Event>>,
    groups: DashMap<String, BTreeSet<String>>,
}

/// Registry of versioned process models.
pub struct ModelResolver {
    models: DashMap<String, Arc<ModelGraph>>,
    caches: RwLock<Arc<Caches>>,
    evaluator: Arc<dyn ExpressionEvaluator>,
    observer: Option<Arc<dyn ResolutionObserver>>,
}

impl Default for ModelResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelResolver {
    /// Creates a resolver using the built-in condition evaluator.
    pub fn new() -> Self {
        Self::with_evaluator(Arc::new(ConditionEvaluator::new()))
    }

    /// Creates a resolver with a custom expression evaluator.
    pub fn with_evaluator(evaluator: Arc<dyn ExpressionEvaluator>) -> Self {
        Self {
            models: DashMap::new(),
            caches: RwLock::new(Arc::new(Caches::default())),
            evaluator,
            observer: None,
        }
    }

    /// Registers an observer for resolution side effects.
    pub fn with_observer(mut self, observer: Arc<dyn ResolutionObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    /// The evaluator used for sequence-flow conditions.
    pub fn evaluator(&self) -> &dyn ExpressionEvaluator {
        self.evaluator.as_ref()
    }

    // =========================================================================
    // Registry
    // =========================================================================

    /// Registers a model.
    ///
    /// Returns `false` if an identical model (same checksum) is already
    /// registered. A changed model with the same version replaces the old one.
    pub fn add_model(&self, graph: ModelGraph) -> Result<bool, CoreError> {
        let version = graph.version().to_string();
        if version.trim().is_empty() {
            return Err(CoreError::invalid_definition("model version must not be empty"));
        }

        if let Some(existing) = self.models.get(&version) {
            if existing.checksum == graph.checksum {
                debug!(version = %version, "model already registered");
                return Ok(false);
            }
        }

        let checksum = graph.checksum.clone();
        let replaced = self.publish(|models| {
            models.insert(version.clone(), Arc::new(graph)).is_some()
        });

        info!(
            version = %version,
            checksum = %checksum,
            replaced,
            "model added"
        );
        Ok(true)
    }

    /// Parses, validates and registers a model from JSON.
    pub fn add_model_json(&self, json: &Value) -> Result<bool, CoreError> {
        self.add_model(ModelGraph::from_json(json)?)
    }

    /// Removes a model. No-op if the version is not registered.
    pub fn remove_model(&self, version: &str) {
        if self.publish(|models| models.remove(version).is_some()) {
            info!(version, "model removed");
        }
    }

    /// Returns a registered model.
    pub fn get_model(&self, version: &str) -> Result<Arc<ModelGraph>, CoreError> {
        self.models
            .get(version)
            .map(|m| Arc::clone(m.value()))
            .ok_or_else(|| CoreError::UndefinedModelVersion {
                version: version.to_string(),
            })
    }

    /// Returns all registered versions, sorted ascending.
    pub fn versions(&self) -> Vec<String> {
        let mut versions: Vec<String> = self.models.iter().map(|m| m.key().clone()).collect();
        versions.sort();
        versions
    }

    /// Returns the versions matching a regular expression, highest first.
    ///
    /// An invalid pattern matches nothing.
    pub fn find_versions_by_regex(&self, pattern: &str) -> Vec<String> {
        let Ok(regex) = Regex::new(pattern) else {
            debug!(pattern, "model version is not a valid regular expression");
            return Vec::new();
        };
        let mut versions: Vec<String> = self
            .models
            .iter()
            .filter(|m| regex.is_match(m.key()))
            .map(|m| m.key().clone())
            .collect();
        versions.sort_by(|a, b| b.cmp(a));
        versions
    }

    /// Returns the versions whose model contains a process group, highest first.
    pub fn find_versions_by_group(&self, group: &str) -> Vec<String> {
        let graphs: Vec<Arc<ModelGraph>> =
            self.models.iter().map(|m| Arc::clone(m.value())).collect();
        let mut versions: Vec<String> = graphs
            .iter()
            .filter(|g| {
                self.find_all_process_groups(g)
                    .map(|groups| groups.contains(group))
                    .unwrap_or(false)
            })
            .map(|g| g.version().to_string())
            .collect();
        versions.sort_by(|a, b| b.cmp(a));
        versions
    }

    /// Resolves the model for a document.
    ///
    /// Resolution order is exact version, then the version interpreted as a
    /// regular expression, then the newest model containing the document's
    /// process group. The latter two update the document's model version.
    pub fn find_model_for_document(&self, doc: &mut Document) -> Result<Arc<ModelGraph>, CoreError> {
        let version = doc.model_version();

        if !version.is_empty() {
            if let Ok(graph) = self.get_model(&version) {
                return Ok(graph);
            }

            if let Some(matched) = self.find_versions_by_regex(&version).into_iter().next() {
                info!(pattern = %version, version = %matched, "model version resolved by regex");
                doc.set_model_version(matched.clone());
                return self.get_model(&matched);
            }
        }

        let group = doc.workflow_group();
        if !group.is_empty() {
            if let Some(matched) = self.find_versions_by_group(&group).into_iter().next() {
                warn!(
                    "Deprecated model version '{}' no longer supported, migrating to '{}' (group '{}')",
                    version, matched, group
                );
                if let Some(observer) = &self.observer {
                    observer.on_model_migrated(&version, &matched, &group);
                }
                doc.set_model_version(matched.clone());
                return self.get_model(&matched);
            }
        }

        Err(CoreError::UndefinedModelVersion { version })
    }

    // =========================================================================
    // Entity lookups
    // =========================================================================

    /// Changes the registry and starts a fresh cache set under one write lock.
    ///
    /// Readers check registration under the read lock, so a cache set is only
    /// ever handed out together with the registry state it was created for.
    fn publish<T>(&self, change: impl FnOnce(&DashMap<String, Arc<ModelGraph>>) -> T) -> T {
        let mut caches = self.caches.write();
        let result = change(&self.models);
        *caches = Arc::new(Caches::default());
        result
    }

    /// Returns the cache set if `graph` is the registered model for its version.
    fn caches_for(&self, graph: &ModelGraph) -> Option<Arc<Caches>> {
        let caches = self.caches.read();
        let registered = self
            .models
            .get(graph.version())
            .map(|m| m.checksum == graph.checksum)
            .unwrap_or(false);
        registered.then(|| Arc::clone(&caches))
    }

    /// Finds a task by id.
    pub fn find_task_by_id(&self, graph: &ModelGraph, task_id: i64) -> Option<Task> {
        let key = TaskKey {
            version: graph.version().to_string(),
            task: task_id,
        };
        let caches = self.caches_for(graph);
        if let Some(task) = caches.as_ref().and_then(|c| c.tasks.get(&key).map(|t| t.clone())) {
            return Some(task);
        }

        let task = graph
            .task_element(task_id)
            .and_then(|el| graph.task_entity(el))?;
        if let Some(caches) = caches {
            caches.tasks.entry(key).or_insert_with(|| task.clone());
        }
        Some(task)
    }

    /// Finds all events callable on a task.
    ///
    /// These are the events reachable by the task's outgoing flows plus the
    /// init events leading into the task.
    pub fn find_events_by_task(
        &self,
        graph: &ModelGraph,
        task_id: i64,
    ) -> Result<Vec<Event>, CoreError> {
        let key = TaskKey {
            version: graph.version().to_string(),
            task: task_id,
        };
        let caches = self.caches_for(graph);
        if let Some(events) = caches
            .as_ref()
            .and_then(|c| c.task_events.get(&key).map(|e| e.clone()))
        {
            return Ok(events);
        }

        let Some(task) = graph.task_element(task_id) else {
            return Ok(Vec::new());
        };

        let mut seen = HashSet::new();
        let mut events = Vec::new();
        let outgoing = navigation::outgoing_events(graph, task);
        let init = navigation::init_events(graph, task)?;
        for el in outgoing.into_iter().chain(init) {
            if seen.insert(el.id.as_str()) {
                if let Some(event) = graph.event_entity(el, task_id) {
                    events.push(event);
                }
            }
        }

        if let Some(caches) = caches {
            caches.task_events.entry(key).or_insert_with(|| events.clone());
        }
        Ok(events)
    }

    /// Finds an event callable on a task.
    pub fn find_event_by_id(
        &self,
        graph: &ModelGraph,
        task_id: i64,
        event_id: i64,
    ) -> Result<Option<Event>, CoreError> {
        let key = EventKey {
            version: graph.version().to_string(),
            task: task_id,
            event: event_id,
        };
        let caches = self.caches_for(graph);
        if let Some(event) = caches.as_ref().and_then(|c| c.events.get(&key).map(|e| e.clone())) {
            return Ok(Some(event));
        }

        let event = self
            .find_events_by_task(graph, task_id)?
            .into_iter()
            .find(|e| e.id == event_id);
        if let (Some(caches), Some(event)) = (caches, &event) {
            caches.events.entry(key).or_insert_with(|| event.clone());
        }
        Ok(event)
    }

    /// Returns the process groups of a model.
    ///
    /// For a collaboration diagram these are the names of its pools (private
    /// processes); otherwise the name of the public process.
    pub fn find_all_process_groups(&self, graph: &ModelGraph) -> Result<BTreeSet<String>, CoreError> {
        let caches = self.caches_for(graph);
        if let Some(groups) = caches
            .as_ref()
            .and_then(|c| c.groups.get(graph.version()).map(|g| g.clone()))
        {
            return Ok(groups);
        }

        if graph.processes().is_empty() {
            return Err(CoreError::invalid_model(graph.version(), "no process defined"));
        }

        let kind = if graph.is_collaboration() {
            ProcessKind::Private
        } else {
            ProcessKind::Public
        };
        let groups: BTreeSet<String> = graph
            .processes()
            .iter()
            .filter(|p| p.kind == kind && !p.name.is_empty())
            .map(|p| p.name.clone())
            .collect();

        if let Some(caches) = caches {
            caches
                .groups
                .entry(graph.version().to_string())
                .or_insert_with(|| groups.clone());
        }
        Ok(groups)
    }

    /// Returns the tasks directly reachable from the start events of a process
    /// group, in declaration order.
    pub fn find_start_tasks(&self, graph: &ModelGraph, group: &str) -> Vec<Task> {
        let mut visited = HashSet::new();
        let mut stack: Vec<&str> = graph
            .elements()
            .iter()
            .filter(|el| el.kind == ElementKind::StartEvent && graph.group_of(el) == group)
            .map(|el| el.id.as_str())
            .collect();
        let mut task_ids = HashSet::new();

        while let Some(node) = stack.pop() {
            if !visited.insert(node) {
                continue;
            }
            for flow in graph.outgoing(node) {
                let Some(target) = graph.element(&flow.target) else {
                    continue;
                };
                match target.kind {
                    ElementKind::Task => {
                        task_ids.insert(target.id.as_str());
                    }
                    ElementKind::EndEvent => {}
                    _ => stack.push(target.id.as_str()),
                }
            }
        }

        graph
            .elements()
            .iter()
            .filter(|el| task_ids.contains(el.id.as_str()))
            .filter_map(|el| graph.task_entity(el))
            .collect()
    }

    /// Resolves the element following an event. See [`navigation::find_next_element`].
    pub fn find_next_element(
        &self,
        graph: &ModelGraph,
        event: &Event,
        doc: &Document,
    ) -> Result<Option<ModelElement>, CoreError> {
        navigation::find_next_element(graph, event, doc, self.evaluator.as_ref())
    }

    // =========================================================================
    // Document-driven lookups
    // =========================================================================

    /// Loads the current task of a document.
    pub fn load_task(&self, doc: &mut Document) -> Result<Task, CoreError> {
        let graph = self.find_model_for_document(doc)?;
        let task_id = doc.task_id();
        self.find_task_by_id(&graph, task_id)
            .ok_or_else(|| CoreError::UndefinedModelEntry {
                version: graph.version().to_string(),
                entry: format!("task {}", task_id),
            })
    }

    /// Loads the current event of a document.
    pub fn load_event(&self, doc: &mut Document) -> Result<Event, CoreError> {
        let graph = self.find_model_for_document(doc)?;
        let (task_id, event_id) = (doc.task_id(), doc.event_id());
        self.find_event_by_id(&graph, task_id, event_id)?
            .ok_or_else(|| CoreError::UndefinedModelEntry {
                version: graph.version().to_string(),
                entry: format!("{}.{}", task_id, event_id),
            })
    }

    /// Loads the process owning the document's current task.
    pub fn load_process(&self, doc: &mut Document) -> Result<ProcessRaw, CoreError> {
        let graph = self.find_model_for_document(doc)?;
        let task_id = doc.task_id();
        let element = graph
            .task_element(task_id)
            .ok_or_else(|| CoreError::UndefinedModelEntry {
                version: graph.version().to_string(),
                entry: format!("task {}", task_id),
            })?;
        let group = graph.group_of(element);
        graph
            .processes()
            .iter()
            .find(|p| p.name == group)
            .cloned()
            .ok_or_else(|| CoreError::UndefinedModelEntry {
                version: graph.version().to_string(),
                entry: format!("process of task {}", task_id),
            })
    }

    /// Loads the model-level definition items for a document.
    pub fn load_definition(&self, doc: &mut Document) -> Result<Document, CoreError> {
        let graph = self.find_model_for_document(doc)?;
        Ok(graph.definition().clone())
    }
}

//! Process model types.
//!
//! Models are already-parsed BPMN graphs described in a JSON DSL:
//!
//! ```json
//! {
//!   "version": "invoice-1.0.0",
//!   "definition": {"environment": "prod"},
//!   "processes": [{"id": "p1", "name": "Invoice", "kind": "public"}],
//!   "elements": [
//!     {"id": "start", "kind": "startEvent", "process": "p1"},
//!     {"id": "t1", "kind": "task", "name": "Draft", "process": "p1", "task": {"id": 100}},
//!     {"id": "e1", "kind": "event", "name": "submit", "process": "p1", "event": {"id": 10}},
//!     {"id": "t2", "kind": "task", "name": "Review", "process": "p1", "task": {"id": 200}}
//!   ],
//!   "flows": [
//!     {"source": "start", "target": "t1"},
//!     {"source": "t1", "target": "e1"},
//!     {"source": "e1", "target": "t2", "condition": "amount > 100"}
//!   ]
//! }
//! ```
//!
//! [`ModelGraphRaw`] is the serialized form; [`ModelGraph`] is the validated,
//! indexed form registered with the resolver. Graphs are immutable once built.

use crate::document::Document;
use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::warn;

/// BPMN node kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ElementKind {
    /// A task: a stable state a document can rest in.
    Task,
    /// A catch event carrying a transition definition.
    Event,
    StartEvent,
    EndEvent,
    /// Intermediate throw event, transparent during navigation.
    ThrowEvent,
    /// Link throw event; navigation continues at the matching link catch.
    LinkThrow,
    LinkCatch,
    Gateway,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum GatewayKind {
    Parallel,
    Exclusive,
    Inclusive,
    EventBased,
}

/// Process kind. Pools of a collaboration diagram are private processes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ProcessKind {
    #[default]
    Public,
    Private,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRaw {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub kind: ProcessKind,
}

/// Task payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRaw {
    pub id: i64,

    /// Document type assigned when a document reaches this task.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub doc_type: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub items: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TimerUnit {
    #[default]
    Minutes,
    Hours,
    Days,
    Workdays,
}

/// Timer metadata attached to an event. Scheduling happens outside the kernel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerDefinition {
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub delay: i64,
    #[serde(default)]
    pub unit: TimerUnit,
    /// Item holding the reference timestamp; the last processing time if absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
}

/// Moves a document into another model version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelSwitch {
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<i64>,
    pub event: i64,
}

/// Event payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRaw {
    pub id: i64,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub result: String,

    #[serde(default)]
    pub follow_up: bool,

    #[serde(default)]
    pub next_event: i64,

    /// Id of the signal adapter bound to this event.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signal: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timer: Option<TimerDefinition>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model_switch: Option<ModelSwitch>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub items: BTreeMap<String, Value>,
}

/// A graph node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementRaw {
    pub id: String,
    pub kind: ElementKind,

    #[serde(default)]
    pub name: String,

    /// Owning process id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<GatewayKind>,

    /// Link name of link throw/catch events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskRaw>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event: Option<EventRaw>,
}

/// A sequence flow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlowRaw {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
}

impl FlowRaw {
    /// Returns the condition if it is non-blank.
    pub fn condition(&self) -> Option<&str> {
        self.condition
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }
}

/// Raw model graph as stored/transmitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelGraphRaw {
    pub version: String,

    /// Model-level items such as environment profile data.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub definition: BTreeMap<String, Value>,

    #[serde(default)]
    pub processes: Vec<ProcessRaw>,

    pub elements: Vec<ElementRaw>,

    #[serde(default)]
    pub flows: Vec<FlowRaw>,
}

/// A task as handed out to callers. Always an owned copy.
#[derive(Debug, Clone, PartialEq)]
pub struct Task {
    pub id: i64,
    pub element_id: String,
    pub name: String,
    /// Name of the owning process.
    pub group: String,
    pub doc_type: Option<String>,
    pub items: Document,
}

/// An event as handed out to callers. Always an owned copy.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub id: i64,
    /// Task the event was resolved for.
    pub task_id: i64,
    pub element_id: String,
    pub name: String,
    pub workflow_result: String,
    pub follow_up: bool,
    pub next_event: i64,
    pub signal_adapter: Option<String>,
    pub timer: Option<TimerDefinition>,
    pub model_switch: Option<ModelSwitch>,
    pub items: Document,
}

impl Event {
    /// Returns the follow-up event id, if one is configured.
    pub fn follow_up_event(&self) -> Option<i64> {
        (self.follow_up && self.next_event > 0).then_some(self.next_event)
    }
}

/// Next element resolved by navigation.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelElement {
    Task(Task),
    Event(Event),
}

fn items_document(items: &BTreeMap<String, Value>) -> Document {
    let json = Value::Object(items.clone().into_iter().collect());
    Document::from_json(&json).unwrap_or_default()
}

/// Validated and indexed model graph.
#[derive(Debug, Clone)]
pub struct ModelGraph {
    /// Element index by element id.
    index: HashMap<String, usize>,

    /// Outgoing flow indices per element, in declaration order.
    outgoing: Vec<Vec<usize>>,

    /// Incoming flow indices per element, in declaration order.
    incoming: Vec<Vec<usize>>,

    /// Task id -> element index.
    tasks: HashMap<i64, usize>,

    /// Link name -> link catch element index.
    link_catches: HashMap<String, usize>,

    definition: Document,

    /// Original raw definition.
    pub raw: ModelGraphRaw,

    /// Hash of the definition, identifies identical registrations.
    pub checksum: String,
}

impl ModelGraph {
    /// Parses and validates a model graph from JSON.
    pub fn from_json(json: &Value) -> Result<Self, CoreError> {
        let raw: ModelGraphRaw = serde_json::from_value(json.clone())?;
        Self::from_raw(raw)
    }

    /// Validates a raw model graph and builds its indexes.
    pub fn from_raw(raw: ModelGraphRaw) -> Result<Self, CoreError> {
        if raw.version.trim().is_empty() {
            return Err(CoreError::invalid_definition("model version must not be empty"));
        }
        let version = raw.version.as_str();

        let mut process_ids = HashSet::new();
        for p in &raw.processes {
            if !process_ids.insert(p.id.as_str()) {
                return Err(CoreError::invalid_definition(format!(
                    "duplicate process id '{}'",
                    p.id
                )));
            }
        }

        let mut index = HashMap::new();
        let mut tasks = HashMap::new();
        let mut link_catches = HashMap::new();
        for (i, el) in raw.elements.iter().enumerate() {
            if index.insert(el.id.clone(), i).is_some() {
                return Err(CoreError::invalid_definition(format!(
                    "duplicate element id '{}'",
                    el.id
                )));
            }

            if let Some(process) = &el.process {
                if !process_ids.contains(process.as_str()) {
                    return Err(CoreError::invalid_definition(format!(
                        "element '{}' references unknown process '{}'",
                        el.id, process
                    )));
                }
            }

            match el.kind {
                ElementKind::Task => {
                    let id = el.task.as_ref().map(|t| t.id).unwrap_or(0);
                    if id <= 0 {
                        warn!(version, element = %el.id, id, "invalid task id");
                        return Err(CoreError::invalid_definition(format!(
                            "task '{}' has no positive task id",
                            el.id
                        )));
                    }
                    if tasks.insert(id, i).is_some() {
                        return Err(CoreError::invalid_definition(format!(
                            "duplicate task id {}",
                            id
                        )));
                    }
                }
                ElementKind::Event => {
                    let id = el.event.as_ref().map(|e| e.id).unwrap_or(0);
                    if id <= 0 {
                        warn!(version, element = %el.id, id, "invalid event id");
                        return Err(CoreError::invalid_definition(format!(
                            "event '{}' has no positive event id",
                            el.id
                        )));
                    }
                    let switch = el.event.as_ref().and_then(|e| e.model_switch.as_ref());
                    if let Some(switch) = switch {
                        if switch.version.trim().is_empty() || switch.event <= 0 {
                            return Err(CoreError::invalid_model(
                                version,
                                format!(
                                    "event '{}' switches model without a target version and event",
                                    el.id
                                ),
                            ));
                        }
                    }
                }
                ElementKind::Gateway if el.gateway.is_none() => {
                    return Err(CoreError::invalid_definition(format!(
                        "gateway '{}' has no gateway kind",
                        el.id
                    )));
                }
                ElementKind::LinkThrow | ElementKind::LinkCatch => {
                    let Some(link) = el.link.as_deref().filter(|l| !l.trim().is_empty()) else {
                        return Err(CoreError::invalid_definition(format!(
                            "link event '{}' has no link name",
                            el.id
                        )));
                    };
                    if el.kind == ElementKind::LinkCatch
                        && link_catches.insert(link.to_string(), i).is_some()
                    {
                        return Err(CoreError::invalid_definition(format!(
                            "duplicate link catch event for link '{}'",
                            link
                        )));
                    }
                }
                _ => {}
            }
        }

        let mut outgoing = vec![Vec::new(); raw.elements.len()];
        let mut incoming = vec![Vec::new(); raw.elements.len()];
        for (f, flow) in raw.flows.iter().enumerate() {
            let (Some(&source), Some(&target)) = (index.get(&flow.source), index.get(&flow.target))
            else {
                return Err(CoreError::invalid_definition(format!(
                    "sequence flow '{}' references unknown element ({} -> {})",
                    flow.id, flow.source, flow.target
                )));
            };
            outgoing[source].push(f);
            incoming[target].push(f);
        }

        let definition = items_document(&raw.definition);

        let json_bytes = serde_json::to_vec(&raw)?;
        let checksum = format!("{:08x}", crc32c::crc32c(&json_bytes));

        Ok(Self {
            index,
            outgoing,
            incoming,
            tasks,
            link_catches,
            definition,
            raw,
            checksum,
        })
    }

    pub fn version(&self) -> &str {
        &self.raw.version
    }

    /// Model-level definition items.
    pub fn definition(&self) -> &Document {
        &self.definition
    }

    pub fn processes(&self) -> &[ProcessRaw] {
        &self.raw.processes
    }

    /// Returns an element by id.
    pub fn element(&self, id: &str) -> Option<&ElementRaw> {
        self.index.get(id).map(|&i| &self.raw.elements[i])
    }

    /// Returns all elements in declaration order.
    pub fn elements(&self) -> &[ElementRaw] {
        &self.raw.elements
    }

    /// Outgoing flows of an element, in declaration order.
    pub fn outgoing(&self, element_id: &str) -> Vec<&FlowRaw> {
        self.flows_of(&self.outgoing, element_id)
    }

    /// Incoming flows of an element, in declaration order.
    pub fn incoming(&self, element_id: &str) -> Vec<&FlowRaw> {
        self.flows_of(&self.incoming, element_id)
    }

    fn flows_of(&self, table: &[Vec<usize>], element_id: &str) -> Vec<&FlowRaw> {
        self.index
            .get(element_id)
            .map(|&i| table[i].iter().map(|&f| &self.raw.flows[f]).collect())
            .unwrap_or_default()
    }

    /// Returns the task element with the given task id.
    pub fn task_element(&self, task_id: i64) -> Option<&ElementRaw> {
        self.tasks.get(&task_id).map(|&i| &self.raw.elements[i])
    }

    /// Returns the link catch event for a link name.
    pub fn link_catch(&self, link: &str) -> Option<&ElementRaw> {
        self.link_catches.get(link).map(|&i| &self.raw.elements[i])
    }

    /// Returns true if the model is a collaboration diagram (has pools).
    pub fn is_collaboration(&self) -> bool {
        self.raw
            .processes
            .iter()
            .any(|p| p.kind == ProcessKind::Private)
    }

    /// Returns the process group (owning process name) of an element.
    ///
    /// An element without a process reference belongs to the sole process of
    /// a single-process model.
    pub fn group_of(&self, element: &ElementRaw) -> String {
        let process = match &element.process {
            Some(id) => self.raw.processes.iter().find(|p| &p.id == id),
            None if self.raw.processes.len() == 1 => self.raw.processes.first(),
            None => None,
        };
        process.map(|p| p.name.clone()).unwrap_or_default()
    }

    /// Builds an owned task entity from a task element.
    pub fn task_entity(&self, element: &ElementRaw) -> Option<Task> {
        let task = element.task.as_ref()?;
        Some(Task {
            id: task.id,
            element_id: element.id.clone(),
            name: element.name.clone(),
            group: self.group_of(element),
            doc_type: task.doc_type.clone(),
            items: items_document(&task.items),
        })
    }

    /// Builds an owned event entity from an event element.
    pub fn event_entity(&self, element: &ElementRaw, task_id: i64) -> Option<Event> {
        let event = element.event.as_ref()?;
        Some(Event {
            id: event.id,
            task_id,
            element_id: element.id.clone(),
            name: element.name.clone(),
            workflow_result: event.result.clone(),
            follow_up: event.follow_up,
            next_event: event.next_event,
            signal_adapter: event.signal.clone().filter(|s| !s.trim().is_empty()),
            timer: event.timer.clone(),
            model_switch: event.model_switch.clone(),
            items: items_document(&event.items),
        })
    }

    /// Returns all tasks in declaration order.
    pub fn tasks(&self) -> Vec<Task> {
        self.raw
            .elements
            .iter()
            .filter_map(|el| self.task_entity(el))
            .collect()
    }

    /// Returns the raw definition as JSON.
    pub fn to_json(&self) -> Result<Value, CoreError> {
        Ok(serde_json::to_value(&self.raw)?)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use serde_json::json;

    pub(crate) fn sample_model(version: &str) -> Value {
        json!({
            "version": version,
            "definition": {"environment": "test"},
            "processes": [{"id": "p1", "name": "Invoice"}],
            "elements": [
                {"id": "start", "kind": "startEvent", "process": "p1"},
                {"id": "t100", "kind": "task", "name": "Draft", "process": "p1",
                 "task": {"id": 100, "type": "invoice"}},
                {"id": "e10", "kind": "event", "name": "submit", "process": "p1",
                 "event": {"id": 10, "result": "<item name=\"comment\">submitted</item>"}},
                {"id": "t200", "kind": "task", "name": "Review", "process": "p1",
                 "task": {"id": 200}},
                {"id": "e20", "kind": "event", "name": "approve", "process": "p1",
                 "event": {"id": 20}},
                {"id": "end", "kind": "endEvent", "process": "p1"}
            ],
            "flows": [
                {"id": "f1", "source": "start", "target": "t100"},
                {"id": "f2", "source": "t100", "target": "e10"},
                {"id": "f3", "source": "e10", "target": "t200"},
                {"id": "f4", "source": "t200", "target": "e20"},
                {"id": "f5", "source": "e20", "target": "end"}
            ]
        })
    }

    #[test]
    fn test_parse_model() {
        let graph = ModelGraph::from_json(&sample_model("1.0.0")).unwrap();

        assert_eq!(graph.version(), "1.0.0");
        assert_eq!(graph.elements().len(), 6);
        assert_eq!(graph.outgoing("t100").len(), 1);
        assert_eq!(graph.incoming("t100")[0].source, "start");
        assert_eq!(graph.definition().get_string("environment"), "test");
        assert!(!graph.is_collaboration());
        assert_eq!(graph.checksum.len(), 8);
    }

    #[test]
    fn test_task_and_event_entities() {
        let graph = ModelGraph::from_json(&sample_model("1.0.0")).unwrap();

        let el = graph.task_element(100).unwrap();
        let task = graph.task_entity(el).unwrap();
        assert_eq!(task.name, "Draft");
        assert_eq!(task.group, "Invoice");
        assert_eq!(task.doc_type.as_deref(), Some("invoice"));

        let event = graph
            .event_entity(graph.element("e10").unwrap(), 100)
            .unwrap();
        assert_eq!(event.id, 10);
        assert_eq!(event.task_id, 100);
        assert!(event.follow_up_event().is_none());

        assert_eq!(graph.tasks().len(), 2);
        assert!(graph.task_element(999).is_none());
    }

    #[test]
    fn test_checksum_is_stable() {
        let a = ModelGraph::from_json(&sample_model("1.0.0")).unwrap();
        let b = ModelGraph::from_json(&sample_model("1.0.0")).unwrap();
        let c = ModelGraph::from_json(&sample_model("1.0.1")).unwrap();
        assert_eq!(a.checksum, b.checksum);
        assert_ne!(a.checksum, c.checksum);
    }

    #[test]
    fn test_empty_version() {
        let result = ModelGraph::from_json(&sample_model(" "));
        assert!(matches!(result, Err(CoreError::InvalidDefinition { .. })));
    }

    #[test]
    fn test_invalid_definitions() {
        let cases = [
            json!({"version": "1", "elements": [
                {"id": "a", "kind": "startEvent"}, {"id": "a", "kind": "endEvent"}]}),
            json!({"version": "1", "elements": [{"id": "t", "kind": "task"}]}),
            json!({"version": "1", "elements": [{"id": "t", "kind": "task", "task": {"id": 0}}]}),
            json!({"version": "1", "elements": [{"id": "e", "kind": "event", "event": {"id": -1}}]}),
            json!({"version": "1", "elements": [
                {"id": "t1", "kind": "task", "task": {"id": 1}},
                {"id": "t2", "kind": "task", "task": {"id": 1}}]}),
            json!({"version": "1", "elements": [{"id": "g", "kind": "gateway"}]}),
            json!({"version": "1", "elements": [{"id": "l", "kind": "linkThrow"}]}),
            json!({"version": "1", "elements": [{"id": "s", "kind": "startEvent"}],
                   "flows": [{"source": "s", "target": "missing"}]}),
            json!({"version": "1", "elements": [{"id": "s", "kind": "startEvent", "process": "nope"}]}),
        ];

        for json in cases {
            let result = ModelGraph::from_json(&json);
            assert!(
                matches!(result, Err(CoreError::InvalidDefinition { .. })),
                "accepted {}",
                json
            );
        }
    }

    #[test]
    fn test_link_catch_lookup() {
        let graph = ModelGraph::from_json(&json!({
            "version": "1",
            "elements": [
                {"id": "lt", "kind": "linkThrow", "link": "A"},
                {"id": "lc", "kind": "linkCatch", "link": "A"}
            ]
        }))
        .unwrap();
        assert_eq!(graph.link_catch("A").unwrap().id, "lc");
        assert!(graph.link_catch("B").is_none());
    }

    #[test]
    fn test_group_of_collaboration() {
        let graph = ModelGraph::from_json(&json!({
            "version": "1",
            "processes": [
                {"id": "collab", "name": "Collaboration"},
                {"id": "p1", "name": "Sales", "kind": "private"},
                {"id": "p2", "name": "Billing", "kind": "private"}
            ],
            "elements": [
                {"id": "t1", "kind": "task", "process": "p2", "task": {"id": 1}},
                {"id": "t2", "kind": "task", "task": {"id": 2}}
            ]
        }))
        .unwrap();
        assert!(graph.is_collaboration());
        assert_eq!(graph.group_of(graph.element("t1").unwrap()), "Billing");
        assert_eq!(graph.group_of(graph.element("t2").unwrap()), "");
    }
}

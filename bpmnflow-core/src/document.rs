//! The generic business document ("workitem") advanced through a process.
//!
//! A document maps case-insensitive item names to ordered lists of values.
//! An item with no values is absent: storing an empty list removes the item.
//!
//! Documents serialize to a JSON object where every item is an array:
//!
//! ```json
//! {
//!   "$modelversion": ["1.0.0"],
//!   "$taskid": [1000],
//!   "$eventid": [10],
//!   "amount": [150.5]
//! }
//! ```
//!
//! Deserialization also accepts single values in place of arrays.

use crate::error::CoreError;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

/// Reserved item names used by the engine.
pub mod items {
    pub const UNIQUE_ID: &str = "$uniqueid";
    pub const WORKITEM_ID: &str = "$workitemid";
    pub const MODEL_VERSION: &str = "$modelversion";
    pub const TASK_ID: &str = "$taskid";
    pub const EVENT_ID: &str = "$eventid";
    pub const PENDING_EVENTS: &str = "$pendingevents";
    pub const TYPE: &str = "type";
    pub const TRANSACTION_ID: &str = "$transactionid";
    pub const TRANSITION_LOG: &str = "$eventlog";
    pub const TRANSITION_LOG_COMMENT: &str = "$eventlogcomment";
    pub const WORKFLOW_GROUP: &str = "$workflowgroup";
    pub const WORKFLOW_STATUS: &str = "$workflowstatus";
    pub const LAST_TASK: &str = "$lasttask";
    pub const LAST_EVENT: &str = "$lastevent";
    pub const LAST_EVENT_DATE: &str = "$lasteventdate";

    pub const ADAPTER_ERROR_CONTEXT: &str = "adapter.error_context";
    pub const ADAPTER_ERROR_CODE: &str = "adapter.error_code";
    pub const ADAPTER_ERROR_PARAMS: &str = "adapter.error_params";
    pub const ADAPTER_ERROR_MESSAGE: &str = "adapter.error_message";
}

/// A single item value.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
    List(Vec<ItemValue>),
    Map(BTreeMap<String, ItemValue>),
}

impl ItemValue {
    /// Returns the value as an integer if it has a numeric interpretation.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ItemValue::Integer(i) => Some(*i),
            ItemValue::Float(f) if f.is_finite() => Some(f.trunc() as i64),
            ItemValue::Text(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().map(|f| f.trunc() as i64))
            }
            _ => None,
        }
    }

    /// Returns the value as a float if it has a numeric interpretation.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            ItemValue::Integer(i) => Some(*i as f64),
            ItemValue::Float(f) => Some(*f),
            ItemValue::Text(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }
    }

    /// Returns the value as a boolean. Text is true only for "true" (any case).
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ItemValue::Bool(b) => Some(*b),
            ItemValue::Text(s) => Some(s.trim().eq_ignore_ascii_case("true")),
            ItemValue::Integer(i) => Some(*i != 0),
            _ => None,
        }
    }

    /// Converts a JSON value. `null` has no item representation.
    pub fn from_json(value: &Value) -> Option<Self> {
        match value {
            Value::Null => None,
            Value::Bool(b) => Some(ItemValue::Bool(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(ItemValue::Integer(i)),
                None => n.as_f64().map(ItemValue::Float),
            },
            Value::String(s) => Some(ItemValue::Text(s.clone())),
            Value::Array(a) => Some(ItemValue::List(
                a.iter().filter_map(ItemValue::from_json).collect(),
            )),
            Value::Object(o) => Some(ItemValue::Map(
                o.iter()
                    .filter_map(|(k, v)| ItemValue::from_json(v).map(|v| (k.clone(), v)))
                    .collect(),
            )),
        }
    }

    /// Converts to a JSON value. Timestamps become RFC 3339 strings.
    pub fn to_json(&self) -> Value {
        match self {
            ItemValue::Text(s) => Value::String(s.clone()),
            ItemValue::Integer(i) => Value::from(*i),
            ItemValue::Float(f) => serde_json::Number::from_f64(*f)
                .map(Value::Number)
                .unwrap_or(Value::Null),
            ItemValue::Bool(b) => Value::Bool(*b),
            ItemValue::Timestamp(ts) => {
                Value::String(ts.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            ItemValue::List(l) => Value::Array(l.iter().map(ItemValue::to_json).collect()),
            ItemValue::Map(m) => Value::Object(
                m.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }
}

impl fmt::Display for ItemValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ItemValue::Text(s) => f.write_str(s),
            ItemValue::Integer(i) => write!(f, "{}", i),
            ItemValue::Float(v) => write!(f, "{}", v),
            ItemValue::Bool(b) => write!(f, "{}", b),
            ItemValue::Timestamp(ts) => {
                f.write_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
            }
            ItemValue::List(_) | ItemValue::Map(_) => write!(f, "{}", self.to_json()),
        }
    }
}

impl From<&str> for ItemValue {
    fn from(s: &str) -> Self {
        ItemValue::Text(s.to_string())
    }
}

impl From<String> for ItemValue {
    fn from(s: String) -> Self {
        ItemValue::Text(s)
    }
}

impl From<i64> for ItemValue {
    fn from(i: i64) -> Self {
        ItemValue::Integer(i)
    }
}

impl From<i32> for ItemValue {
    fn from(i: i32) -> Self {
        ItemValue::Integer(i as i64)
    }
}

impl From<f64> for ItemValue {
    fn from(f: f64) -> Self {
        ItemValue::Float(f)
    }
}

impl From<bool> for ItemValue {
    fn from(b: bool) -> Self {
        ItemValue::Bool(b)
    }
}

impl From<DateTime<Utc>> for ItemValue {
    fn from(ts: DateTime<Utc>) -> Self {
        ItemValue::Timestamp(ts)
    }
}

impl From<Vec<ItemValue>> for ItemValue {
    fn from(l: Vec<ItemValue>) -> Self {
        ItemValue::List(l)
    }
}

/// A business document: case-insensitive item names mapped to value lists.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Document {
    items: BTreeMap<String, Vec<ItemValue>>,
}

fn normalize(name: &str) -> String {
    name.trim().to_lowercase()
}

impl Document {
    /// Creates an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the document holds no items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Returns the number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Returns true if the item exists.
    pub fn has_item(&self, name: &str) -> bool {
        self.items.contains_key(&normalize(name))
    }

    /// Returns all item names (lowercase, sorted).
    pub fn item_names(&self) -> impl Iterator<Item = &str> {
        self.items.keys().map(|k| k.as_str())
    }

    /// Returns the values of an item, or an empty slice if absent.
    pub fn get_item(&self, name: &str) -> &[ItemValue] {
        self.items
            .get(&normalize(name))
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Returns the first value of an item.
    pub fn get_first(&self, name: &str) -> Option<&ItemValue> {
        self.get_item(name).first()
    }

    /// Returns the first value as text, or an empty string.
    pub fn get_string(&self, name: &str) -> String {
        self.get_first(name)
            .map(|v| v.to_string())
            .unwrap_or_default()
    }

    /// Returns the first value as integer, or 0.
    pub fn get_i64(&self, name: &str) -> i64 {
        self.get_first(name).and_then(ItemValue::as_i64).unwrap_or(0)
    }

    /// Returns the first value as float, or 0.0.
    pub fn get_f64(&self, name: &str) -> f64 {
        self.get_first(name)
            .and_then(ItemValue::as_f64)
            .unwrap_or(0.0)
    }

    /// Returns the first value as boolean, or false.
    pub fn get_bool(&self, name: &str) -> bool {
        self.get_first(name)
            .and_then(ItemValue::as_bool)
            .unwrap_or(false)
    }

    /// Returns the first value as timestamp.
    pub fn get_timestamp(&self, name: &str) -> Option<DateTime<Utc>> {
        match self.get_first(name)? {
            ItemValue::Timestamp(ts) => Some(*ts),
            ItemValue::Text(s) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|ts| ts.with_timezone(&Utc)),
            _ => None,
        }
    }

    /// Replaces an item with a single value.
    pub fn set_item(&mut self, name: &str, value: impl Into<ItemValue>) {
        self.items.insert(normalize(name), vec![value.into()]);
    }

    /// Replaces an item with a list of values. An empty list removes the item.
    pub fn set_items(&mut self, name: &str, values: Vec<ItemValue>) {
        if values.is_empty() {
            self.items.remove(&normalize(name));
        } else {
            self.items.insert(normalize(name), values);
        }
    }

    /// Appends a value to an item, creating it if necessary.
    pub fn append_item(&mut self, name: &str, value: impl Into<ItemValue>) {
        self.items
            .entry(normalize(name))
            .or_default()
            .push(value.into());
    }

    /// Removes an item, returning its values.
    pub fn remove_item(&mut self, name: &str) -> Option<Vec<ItemValue>> {
        self.items.remove(&normalize(name))
    }

    // =========================================================================
    // Reserved items
    // =========================================================================

    pub fn task_id(&self) -> i64 {
        self.get_i64(items::TASK_ID)
    }

    pub fn set_task_id(&mut self, task_id: i64) {
        self.set_item(items::TASK_ID, task_id);
    }

    pub fn event_id(&self) -> i64 {
        self.get_i64(items::EVENT_ID)
    }

    pub fn set_event_id(&mut self, event_id: i64) {
        self.set_item(items::EVENT_ID, event_id);
    }

    pub fn model_version(&self) -> String {
        self.get_string(items::MODEL_VERSION)
    }

    pub fn set_model_version(&mut self, version: impl Into<String>) {
        self.set_item(items::MODEL_VERSION, version.into());
    }

    pub fn workflow_group(&self) -> String {
        self.get_string(items::WORKFLOW_GROUP)
    }

    pub fn unique_id(&self) -> String {
        self.get_string(items::UNIQUE_ID)
    }

    /// Builder: sets the model version.
    pub fn model(mut self, version: impl Into<String>) -> Self {
        self.set_model_version(version);
        self
    }

    /// Builder: sets the task id.
    pub fn task(mut self, task_id: i64) -> Self {
        self.set_task_id(task_id);
        self
    }

    /// Builder: sets the event id.
    pub fn event(mut self, event_id: i64) -> Self {
        self.set_event_id(event_id);
        self
    }

    /// Builder: sets an arbitrary item.
    pub fn with(mut self, name: &str, value: impl Into<ItemValue>) -> Self {
        self.set_item(name, value);
        self
    }

    /// Returns the queued follow-up event ids, skipping non-positive and non-numeric entries.
    pub fn pending_events(&self) -> Vec<i64> {
        self.get_item(items::PENDING_EVENTS)
            .iter()
            .filter_map(ItemValue::as_i64)
            .filter(|id| *id > 0)
            .collect()
    }

    /// Queues a follow-up event id. Non-positive ids are ignored.
    pub fn append_pending_event(&mut self, event_id: i64) {
        let mut pending = self.pending_events();
        if event_id > 0 {
            pending.push(event_id);
        }
        self.set_items(
            items::PENDING_EVENTS,
            pending.into_iter().map(ItemValue::Integer).collect(),
        );
    }

    /// Removes and returns the next queued event id.
    pub fn pop_pending_event(&mut self) -> Option<i64> {
        let mut pending = self.pending_events();
        if pending.is_empty() {
            self.remove_item(items::PENDING_EVENTS);
            return None;
        }
        let next = pending.remove(0);
        self.set_items(
            items::PENDING_EVENTS,
            pending.into_iter().map(ItemValue::Integer).collect(),
        );
        Some(next)
    }

    // =========================================================================
    // JSON
    // =========================================================================

    /// Converts the document to a JSON object of item arrays.
    pub fn to_json(&self) -> Value {
        Value::Object(
            self.items
                .iter()
                .map(|(k, v)| (k.clone(), Value::Array(v.iter().map(ItemValue::to_json).collect())))
                .collect(),
        )
    }

    /// Builds a document from a JSON object.
    pub fn from_json(json: &Value) -> Result<Self, CoreError> {
        let Value::Object(map) = json else {
            return Err(CoreError::InvalidDefinition {
                reason: "document must be a JSON object".to_string(),
            });
        };

        let mut doc = Document::new();
        for (name, value) in map {
            let values = match value {
                Value::Array(a) => a.iter().filter_map(ItemValue::from_json).collect(),
                other => ItemValue::from_json(other).into_iter().collect(),
            };
            doc.set_items(name, values);
        }
        Ok(doc)
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_json().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Document {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Document::from_json(&value).map_err(serde::de::Error::custom)
    }
}

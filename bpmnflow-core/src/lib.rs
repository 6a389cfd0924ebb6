//! # bpmnflow-core
//!
//! Process model engine for bpmnflow.
//!
//! This crate provides:
//! - The business document ("workitem") advanced through a process
//! - Model graph parsing and validation
//! - Condition expression evaluation
//! - The model resolver: versioned registry, cached lookups, model resolution
//! - Flow navigation to the next task or event

pub mod document;
pub mod error;
pub mod expression;
pub mod model;
pub mod navigation;
pub mod resolver;

pub use document::{items, Document, ItemValue};
pub use error::CoreError;
pub use expression::{Condition, ConditionEvaluator, ExpressionEvaluator};
pub use model::{
    ElementKind, Event, GatewayKind, ModelElement, ModelGraph, ModelGraphRaw, ModelSwitch,
    ProcessKind, ProcessRaw, Task, TimerDefinition, TimerUnit,
};
pub use resolver::{ModelResolver, ResolutionObserver};

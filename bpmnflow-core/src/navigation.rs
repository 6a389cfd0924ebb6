//! Flow-graph traversal.
//!
//! Navigation walks sequence flows from a node and stops only on tasks,
//! events and parallel gateways. Other gateways, start/end events, throw
//! events and link events are traversed transparently; a link throw event
//! continues at the link catch event with the same link name.
//!
//! At every node, conditioned outgoing flows are evaluated in declaration
//! order and the first one that holds is taken. If none holds, all
//! unconditioned flows are taken.

use crate::document::Document;
use crate::error::CoreError;
use crate::expression::ExpressionEvaluator;
use crate::model::{
    ElementKind, ElementRaw, Event, FlowRaw, GatewayKind, ModelElement, ModelGraph,
};
use std::collections::HashSet;
use tracing::debug;

/// Returns true if traversal stops at this node.
pub(crate) fn is_stop_node(el: &ElementRaw) -> bool {
    match el.kind {
        ElementKind::Task | ElementKind::Event => true,
        ElementKind::Gateway => el.gateway == Some(GatewayKind::Parallel),
        _ => false,
    }
}

fn is_parallel_gateway(el: &ElementRaw) -> bool {
    el.kind == ElementKind::Gateway && el.gateway == Some(GatewayKind::Parallel)
}

struct Navigator<'a> {
    graph: &'a ModelGraph,
    doc: &'a Document,
    evaluator: &'a dyn ExpressionEvaluator,
}

impl<'a> Navigator<'a> {
    fn condition_holds(&self, flow: &FlowRaw, condition: &str) -> Result<bool, CoreError> {
        self.evaluator
            .evaluate_boolean(condition, self.doc)
            .map_err(|e| {
                CoreError::invalid_model(
                    self.graph.version(),
                    format!("invalid condition on sequence flow '{}': {}", flow.id, e),
                )
            })
    }

    /// Selects the flows taken from a node.
    fn taken_flows(&self, node_id: &str) -> Result<Vec<&'a FlowRaw>, CoreError> {
        let flows = self.graph.outgoing(node_id);

        for flow in &flows {
            if let Some(condition) = flow.condition() {
                if self.condition_holds(flow, condition)? {
                    return Ok(vec![*flow]);
                }
            }
        }

        Ok(flows.into_iter().filter(|f| f.condition().is_none()).collect())
    }

    /// Collects all stop nodes reachable from `node_id`.
    fn collect(
        &self,
        node_id: &str,
        found: &mut Vec<&'a ElementRaw>,
        visited: &mut HashSet<String>,
    ) -> Result<(), CoreError> {
        for flow in self.taken_flows(node_id)? {
            let Some(target) = self.graph.element(&flow.target) else {
                continue;
            };
            if !visited.insert(target.id.clone()) {
                continue;
            }

            if is_stop_node(target) {
                if !found.iter().any(|f| f.id == target.id) {
                    found.push(target);
                }
            } else if target.kind == ElementKind::LinkThrow {
                let catch = target
                    .link
                    .as_deref()
                    .and_then(|link| self.graph.link_catch(link));
                match catch {
                    Some(catch) if visited.insert(catch.id.clone()) => {
                        self.collect(&catch.id, found, visited)?;
                    }
                    Some(_) => {}
                    None => debug!(
                        version = self.graph.version(),
                        element = %target.id,
                        "link throw event without matching catch event"
                    ),
                }
            } else {
                self.collect(&target.id, found, visited)?;
            }
        }
        Ok(())
    }

    /// Resolves the main flow continuation of a parallel gateway.
    ///
    /// A branch qualifies if its target is a task, or its flow has no
    /// condition, or its condition holds. Task targets win over other
    /// qualifying branches; ties go to declaration order.
    fn main_flow(&self, gateway: &ElementRaw) -> Result<Option<&'a ElementRaw>, CoreError> {
        let mut first = None;
        for flow in self.graph.outgoing(&gateway.id) {
            let Some(target) = self.graph.element(&flow.target) else {
                continue;
            };
            if target.kind == ElementKind::Task {
                return Ok(Some(target));
            }
            if first.is_some() {
                continue;
            }
            let qualifies = match flow.condition() {
                None => true,
                Some(condition) => self.condition_holds(flow, condition)?,
            };
            if qualifies {
                first = Some(target);
            }
        }
        Ok(first)
    }

    fn resolve_from(&self, start_id: &str) -> Result<Option<&'a ElementRaw>, CoreError> {
        let mut visited = HashSet::new();
        visited.insert(start_id.to_string());
        let mut current = start_id.to_string();

        loop {
            let mut found = Vec::new();
            self.collect(&current, &mut found, &mut visited)?;

            let mut next = match found.as_slice() {
                [] => return Ok(None),
                [single] => *single,
                many => {
                    let ids: Vec<&str> = many.iter().map(|e| e.id.as_str()).collect();
                    return Err(CoreError::invalid_model(
                        self.graph.version(),
                        format!(
                            "ambiguous sequence flow from '{}': {} reachable elements ({})",
                            start_id,
                            ids.len(),
                            ids.join(", ")
                        ),
                    ));
                }
            };

            loop {
                if !is_parallel_gateway(next) {
                    return Ok(Some(next));
                }
                let Some(target) = self.main_flow(next)? else {
                    return Ok(None);
                };
                if !visited.insert(target.id.clone()) {
                    return Ok(None);
                }
                if is_stop_node(target) {
                    next = target;
                } else {
                    current = target.id.clone();
                    break;
                }
            }
        }
    }
}

/// Finds the next task or event following an event element.
///
/// Returns `None` if no element is reachable, e.g. the event leads to an end
/// event. More than one reachable element is an ambiguous sequence flow and
/// fails with `InvalidModel`, as does a condition that cannot be evaluated.
pub fn find_next_element(
    graph: &ModelGraph,
    event: &Event,
    doc: &Document,
    evaluator: &dyn ExpressionEvaluator,
) -> Result<Option<ModelElement>, CoreError> {
    if graph.element(&event.element_id).is_none() {
        return Err(CoreError::UndefinedModelEntry {
            version: graph.version().to_string(),
            entry: format!("{}.{}", event.task_id, event.id),
        });
    }

    let navigator = Navigator {
        graph,
        doc,
        evaluator,
    };

    let Some(next) = navigator.resolve_from(&event.element_id)? else {
        return Ok(None);
    };

    let element = match next.kind {
        ElementKind::Task => graph.task_entity(next).map(ModelElement::Task),
        ElementKind::Event => graph
            .event_entity(next, event.task_id)
            .map(ModelElement::Event),
        _ => None,
    };
    Ok(element)
}

/// Collects the event elements directly reachable from a task element.
///
/// Flows are followed regardless of their conditions through transparent
/// nodes and parallel gateways; traversal stops at events and tasks.
pub(crate) fn outgoing_events<'a>(graph: &'a ModelGraph, task: &ElementRaw) -> Vec<&'a ElementRaw> {
    let mut found: Vec<&ElementRaw> = Vec::new();
    let mut visited = HashSet::new();
    visited.insert(task.id.clone());
    let mut stack: Vec<String> = vec![task.id.clone()];

    while let Some(node_id) = stack.pop() {
        for flow in graph.outgoing(&node_id) {
            let Some(target) = graph.element(&flow.target) else {
                continue;
            };
            if !visited.insert(target.id.clone()) {
                continue;
            }
            match target.kind {
                ElementKind::Event => found.push(target),
                ElementKind::Task => {}
                ElementKind::LinkThrow => {
                    if let Some(catch) = target.link.as_deref().and_then(|l| graph.link_catch(l)) {
                        if visited.insert(catch.id.clone()) {
                            stack.push(catch.id.clone());
                        }
                    }
                }
                _ => stack.push(target.id.clone()),
            }
        }
    }

    let order = |el: &ElementRaw| {
        graph
            .elements()
            .iter()
            .position(|e| e.id == el.id)
            .unwrap_or(usize::MAX)
    };
    found.sort_by_key(|el| order(*el));
    found
}

/// Returns true if the event qualifies as an init event: it has no incoming
/// flows, or exactly one that comes from a start event.
pub(crate) fn is_init_event(graph: &ModelGraph, el: &ElementRaw) -> bool {
    if el.kind != ElementKind::Event {
        return false;
    }
    let incoming = graph.incoming(&el.id);
    match incoming.as_slice() {
        [] => true,
        [single] => graph
            .element(&single.source)
            .map(|s| s.kind == ElementKind::StartEvent)
            .unwrap_or(false),
        _ => false,
    }
}

/// Collects init events leading into a node by walking incoming flows backwards.
///
/// A source that is an init event is collected; any other event source is
/// searched recursively. An event revisited on the current path is a cycle
/// and fails with `InvalidModel`.
pub(crate) fn init_events<'a>(
    graph: &'a ModelGraph,
    node: &ElementRaw,
) -> Result<Vec<&'a ElementRaw>, CoreError> {
    let mut found = Vec::new();
    let mut path = HashSet::new();
    path.insert(node.id.clone());
    collect_init_events(graph, &node.id, &mut path, &mut found)?;
    Ok(found)
}

fn collect_init_events<'a>(
    graph: &'a ModelGraph,
    node_id: &str,
    path: &mut HashSet<String>,
    found: &mut Vec<&'a ElementRaw>,
) -> Result<(), CoreError> {
    for flow in graph.incoming(node_id) {
        let Some(source) = graph.element(&flow.source) else {
            continue;
        };
        if is_init_event(graph, source) {
            if !found.iter().any(|f| f.id == source.id) {
                found.push(source);
            }
        } else if source.kind == ElementKind::Event {
            if !path.insert(source.id.clone()) {
                return Err(CoreError::invalid_model(
                    graph.version(),
                    format!("cyclic event chain at '{}'", source.id),
                ));
            }
            collect_init_events(graph, &source.id, path, found)?;
            path.remove(&source.id);
        }
    }
    Ok(())
}

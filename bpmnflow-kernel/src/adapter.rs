//! Adapters: integrations executed before the plugin chain.
//!
//! Generic adapters run on every transition, signal adapters only for events
//! that name them, and static adapters run unconditionally after both.

use crate::error::{AdapterError, KernelError};
use bpmnflow_core::{items, CoreError, Document, Event, ItemValue};
use std::sync::Arc;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdapterKind {
    /// Runs on every transition.
    Generic,
    /// Runs only when the processed event names the adapter id.
    Signal,
    /// Runs on every transition after generic and signal adapters.
    Static,
}

/// An integration invoked with the document and the processed event.
pub trait Adapter: Send + Sync {
    /// Id matched against the signal adapter named by an event.
    fn id(&self) -> &str;

    fn kind(&self) -> AdapterKind {
        AdapterKind::Signal
    }

    fn execute(&self, doc: &mut Document, event: &Event) -> Result<(), AdapterError>;
}

/// Registered adapters in registration order.
#[derive(Default, Clone)]
pub(crate) struct AdapterSet {
    adapters: Vec<Arc<dyn Adapter>>,
}

impl AdapterSet {
    pub(crate) fn register(&mut self, adapter: Arc<dyn Adapter>) {
        match self.adapters.iter().position(|a| a.id() == adapter.id()) {
            Some(index) => self.adapters[index] = adapter,
            None => self.adapters.push(adapter),
        }
    }

    pub(crate) fn ids(&self) -> Vec<&str> {
        self.adapters.iter().map(|a| a.id()).collect()
    }

    fn of_kind(&self, kind: AdapterKind) -> impl Iterator<Item = &Arc<dyn Adapter>> {
        self.adapters.iter().filter(move |a| a.kind() == kind)
    }

    /// Executes generic, then the bound signal, then static adapters.
    pub(crate) fn execute(
        &self,
        version: &str,
        doc: &mut Document,
        event: &Event,
    ) -> Result<(), KernelError> {
        for adapter in self.of_kind(AdapterKind::Generic) {
            run_adapter(adapter.as_ref(), doc, event)?;
        }

        if let Some(id) = &event.signal_adapter {
            let adapter = self.adapters.iter().find(|a| a.id() == id.as_str()).ok_or_else(|| {
                CoreError::InvalidModel {
                    version: version.to_string(),
                    reason: format!(
                        "event {}.{} names signal adapter '{}' which is not registered",
                        event.task_id, event.id, id
                    ),
                }
            })?;
            match adapter.kind() {
                AdapterKind::Signal => run_adapter(adapter.as_ref(), doc, event)?,
                kind => warn!(
                    adapter = %id,
                    ?kind,
                    "event {}.{} binds a non-signal adapter, not executed as signal adapter",
                    event.task_id,
                    event.id
                ),
            }
        }

        for adapter in self.of_kind(AdapterKind::Static) {
            run_adapter(adapter.as_ref(), doc, event)?;
        }
        Ok(())
    }
}

fn run_adapter(adapter: &dyn Adapter, doc: &mut Document, event: &Event) -> Result<(), KernelError> {
    debug!(adapter = adapter.id(), event = event.id, "executing adapter");
    adapter.execute(doc, event).map_err(|source| {
        warn!(
            adapter = adapter.id(),
            code = %source.code,
            "adapter failed: {}",
            source.message
        );
        doc.set_item(items::ADAPTER_ERROR_CONTEXT, adapter.id());
        doc.set_item(items::ADAPTER_ERROR_CODE, source.code.clone());
        doc.set_items(
            items::ADAPTER_ERROR_PARAMS,
            source.params.iter().cloned().map(ItemValue::Text).collect(),
        );
        doc.set_item(items::ADAPTER_ERROR_MESSAGE, source.message.clone());
        KernelError::Adapter {
            adapter: adapter.id().to_string(),
            source,
        }
    })
}

/// Removes diagnostic items left by a failed adapter in an earlier call.
pub(crate) fn clear_adapter_errors(doc: &mut Document) {
    for name in [
        items::ADAPTER_ERROR_CONTEXT,
        items::ADAPTER_ERROR_CODE,
        items::ADAPTER_ERROR_PARAMS,
        items::ADAPTER_ERROR_MESSAGE,
    ] {
        doc.remove_item(name);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    struct Recorder {
        id: String,
        kind: AdapterKind,
        calls: Arc<Mutex<Vec<String>>>,
        fail: bool,
    }

    impl Adapter for Recorder {
        fn id(&self) -> &str {
            &self.id
        }

        fn kind(&self) -> AdapterKind {
            self.kind
        }

        fn execute(&self, doc: &mut Document, _event: &Event) -> Result<(), AdapterError> {
            self.calls.lock().push(self.id.clone());
            if self.fail {
                return Err(AdapterError::new("TIMEOUT", "remote system timed out")
                    .with_params(vec!["30s".to_string()]));
            }
            doc.append_item("adapters", self.id.as_str());
            Ok(())
        }
    }

    fn recorder(id: &str, kind: AdapterKind, calls: &Arc<Mutex<Vec<String>>>) -> Arc<dyn Adapter> {
        Arc::new(Recorder {
            id: id.to_string(),
            kind,
            calls: Arc::clone(calls),
            fail: false,
        })
    }

    fn event(signal: Option<&str>) -> Event {
        Event {
            id: 10,
            task_id: 100,
            element_id: "e10".to_string(),
            name: "submit".to_string(),
            workflow_result: String::new(),
            follow_up: false,
            next_event: 0,
            signal_adapter: signal.map(str::to_string),
            timer: None,
            model_switch: None,
            items: Document::new(),
        }
    }

    #[test]
    fn test_execution_order() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut set = AdapterSet::default();
        set.register(recorder("static", AdapterKind::Static, &calls));
        set.register(recorder("mail", AdapterKind::Signal, &calls));
        set.register(recorder("archive", AdapterKind::Signal, &calls));
        set.register(recorder("generic", AdapterKind::Generic, &calls));

        let mut doc = Document::new();
        set.execute("1.0", &mut doc, &event(Some("mail"))).unwrap();
        assert_eq!(calls.lock().as_slice(), &["generic", "mail", "static"]);

        calls.lock().clear();
        set.execute("1.0", &mut doc, &event(None)).unwrap();
        assert_eq!(calls.lock().as_slice(), &["generic", "static"]);
    }

    #[test]
    fn test_unregistered_signal_adapter_is_invalid_model() {
        let set = AdapterSet::default();
        let err = set
            .execute("1.0", &mut Document::new(), &event(Some("missing")))
            .unwrap_err();
        assert_eq!(err.error_code(), "INVALID_MODEL");
    }

    #[test]
    fn test_generic_adapter_bound_as_signal_runs_once() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut set = AdapterSet::default();
        set.register(recorder("generic", AdapterKind::Generic, &calls));

        set.execute("1.0", &mut Document::new(), &event(Some("generic")))
            .unwrap();
        assert_eq!(calls.lock().as_slice(), &["generic"]);
    }

    #[test]
    fn test_failure_writes_diagnostics() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut set = AdapterSet::default();
        set.register(Arc::new(Recorder {
            id: "erp".to_string(),
            kind: AdapterKind::Signal,
            calls: Arc::clone(&calls),
            fail: true,
        }));

        let mut doc = Document::new();
        let err = set.execute("1.0", &mut doc, &event(Some("erp"))).unwrap_err();
        assert!(matches!(err, KernelError::Adapter { .. }));
        assert_eq!(doc.get_string(items::ADAPTER_ERROR_CONTEXT), "erp");
        assert_eq!(doc.get_string(items::ADAPTER_ERROR_CODE), "TIMEOUT");
        assert_eq!(doc.get_string(items::ADAPTER_ERROR_PARAMS), "30s");
        assert_eq!(
            doc.get_string(items::ADAPTER_ERROR_MESSAGE),
            "remote system timed out"
        );

        clear_adapter_errors(&mut doc);
        assert!(!doc.has_item(items::ADAPTER_ERROR_CODE));
    }
}

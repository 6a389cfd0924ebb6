//! Plugins: ordered business-logic units run on every transition.

use crate::context::WorkflowContext;
use crate::error::{KernelError, PluginError};
use bpmnflow_core::{Document, Event};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, error, warn};

/// A business-logic unit run on every transition.
///
/// Lifecycle: `init` once at registration, `run` once per transition, and
/// `close` once per transition after all plugins ran, passing whether the
/// transition succeeded.
pub trait Plugin: Send {
    /// Unique plugin name.
    fn name(&self) -> &str;

    fn init(&mut self, _ctx: &WorkflowContext) -> Result<(), PluginError> {
        Ok(())
    }

    fn run(&mut self, doc: &mut Document, event: &Event) -> Result<(), PluginError>;

    fn close(&mut self, _success: bool) -> Result<(), PluginError> {
        Ok(())
    }

    /// Names of plugins that must be registered before this one.
    fn depends_on(&self) -> Vec<String> {
        Vec::new()
    }
}

type PluginFactory = Box<dyn Fn() -> Result<Box<dyn Plugin>, PluginError> + Send + Sync>;

/// Named plugin constructors, resolved at startup.
#[derive(Default)]
pub struct PluginFactoryRegistry {
    factories: BTreeMap<String, PluginFactory>,
}

impl PluginFactoryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor under a name. A later registration replaces an earlier one.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F)
    where
        F: Fn() -> Result<Box<dyn Plugin>, PluginError> + Send + Sync + 'static,
    {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.factories.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(|k| k.as_str()).collect()
    }

    /// Creates a plugin instance by name.
    pub fn create(&self, name: &str) -> Result<Box<dyn Plugin>, KernelError> {
        let factory = self
            .factories
            .get(name)
            .ok_or_else(|| KernelError::PluginNotCreatable {
                name: name.to_string(),
                reason: "no factory registered".to_string(),
            })?;
        factory().map_err(|e| KernelError::PluginNotCreatable {
            name: name.to_string(),
            reason: e.to_string(),
        })
    }
}

/// Ordered list of registered plugins.
#[derive(Default)]
pub(crate) struct PluginChain {
    plugins: Vec<Box<dyn Plugin>>,
}

impl PluginChain {
    pub(crate) fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub(crate) fn len(&self) -> usize {
        self.plugins.len()
    }

    /// Initializes and appends a plugin. A plugin with the same name is replaced in place.
    pub(crate) fn register(
        &mut self,
        mut plugin: Box<dyn Plugin>,
        ctx: &WorkflowContext,
    ) -> Result<(), KernelError> {
        let name = plugin.name().to_string();
        plugin.init(ctx).map_err(|source| KernelError::Plugin {
            plugin: name.clone(),
            source,
        })?;

        for dependency in plugin.depends_on() {
            if dependency != name && !self.plugins.iter().any(|p| p.name() == dependency) {
                warn!(
                    plugin = %name,
                    dependency = %dependency,
                    "plugin depends on a plugin that is not registered"
                );
            }
        }

        match self.plugins.iter().position(|p| p.name() == name) {
            Some(index) => {
                debug!(plugin = %name, "replacing registered plugin");
                self.plugins[index] = plugin;
            }
            None => {
                debug!(plugin = %name, "plugin registered");
                self.plugins.push(plugin);
            }
        }
        Ok(())
    }

    pub(crate) fn unregister(&mut self, name: &str) -> Result<(), KernelError> {
        let index = self
            .plugins
            .iter()
            .position(|p| p.name() == name)
            .ok_or_else(|| KernelError::PluginNotRegistered {
                name: name.to_string(),
            })?;
        self.plugins.remove(index);
        debug!(plugin = name, "plugin unregistered");
        Ok(())
    }

    pub(crate) fn clear(&mut self) {
        self.plugins.clear();
    }

    /// Runs all plugins in order, then closes them with the outcome.
    ///
    /// The first failure stops the chain. Close failures are reported only
    /// when the run itself succeeded.
    pub(crate) fn run(&mut self, doc: &mut Document, event: &Event) -> Result<(), KernelError> {
        let mut outcome = Ok(());
        for plugin in self.plugins.iter_mut() {
            let started = Instant::now();
            let result = plugin.run(doc, event);
            debug!(
                plugin = plugin.name(),
                elapsed_us = started.elapsed().as_micros() as u64,
                "plugin finished"
            );
            if let Err(source) = result {
                error!(
                    plugin = plugin.name(),
                    code = %source.code,
                    "plugin failed: {}",
                    source.message
                );
                outcome = Err(KernelError::Plugin {
                    plugin: plugin.name().to_string(),
                    source,
                });
                break;
            }
        }

        let success = outcome.is_ok();
        for plugin in self.plugins.iter_mut() {
            if let Err(source) = plugin.close(success) {
                if outcome.is_ok() {
                    outcome = Err(KernelError::Plugin {
                        plugin: plugin.name().to_string(),
                        source,
                    });
                } else {
                    warn!(plugin = plugin.name(), "plugin close failed: {}", source);
                }
            }
        }
        outcome
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use bpmnflow_core::ModelResolver;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Records its lifecycle calls into a shared journal.
    pub(crate) struct JournalPlugin {
        pub name: String,
        pub journal: Arc<Mutex<Vec<String>>>,
        pub fail_on: Option<i64>,
        pub deps: Vec<String>,
    }

    impl JournalPlugin {
        pub(crate) fn new(name: &str, journal: &Arc<Mutex<Vec<String>>>) -> Self {
            Self {
                name: name.to_string(),
                journal: Arc::clone(journal),
                fail_on: None,
                deps: Vec::new(),
            }
        }
    }

    impl Plugin for JournalPlugin {
        fn name(&self) -> &str {
            &self.name
        }

        fn init(&mut self, _ctx: &WorkflowContext) -> Result<(), PluginError> {
            self.journal.lock().push(format!("{}:init", self.name));
            Ok(())
        }

        fn run(&mut self, doc: &mut Document, event: &Event) -> Result<(), PluginError> {
            self.journal
                .lock()
                .push(format!("{}:run:{}.{}", self.name, doc.task_id(), event.id));
            if self.fail_on == Some(event.id) {
                return Err(PluginError::new("REJECTED", "event rejected"));
            }
            Ok(())
        }

        fn close(&mut self, success: bool) -> Result<(), PluginError> {
            self.journal
                .lock()
                .push(format!("{}:close:{}", self.name, success));
            Ok(())
        }

        fn depends_on(&self) -> Vec<String> {
            self.deps.clone()
        }
    }

    fn ctx() -> WorkflowContext {
        WorkflowContext::new(Arc::new(ModelResolver::new()), Default::default())
    }

    fn event(id: i64) -> Event {
        Event {
            id,
            task_id: 100,
            element_id: format!("e{}", id),
            name: String::new(),
            workflow_result: String::new(),
            follow_up: false,
            next_event: 0,
            signal_adapter: None,
            timer: None,
            model_switch: None,
            items: Document::new(),
        }
    }

    #[test]
    fn test_run_and_close_order() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut chain = PluginChain::default();
        chain
            .register(Box::new(JournalPlugin::new("a", &journal)), &ctx())
            .unwrap();
        chain
            .register(Box::new(JournalPlugin::new("b", &journal)), &ctx())
            .unwrap();

        let mut doc = Document::new().task(100);
        chain.run(&mut doc, &event(10)).unwrap();

        assert_eq!(
            journal.lock().as_slice(),
            &[
                "a:init",
                "b:init",
                "a:run:100.10",
                "b:run:100.10",
                "a:close:true",
                "b:close:true"
            ]
        );
    }

    #[test]
    fn test_failure_stops_chain_and_closes_with_failure() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut chain = PluginChain::default();
        let mut failing = JournalPlugin::new("a", &journal);
        failing.fail_on = Some(10);
        chain.register(Box::new(failing), &ctx()).unwrap();
        chain
            .register(Box::new(JournalPlugin::new("b", &journal)), &ctx())
            .unwrap();
        journal.lock().clear();

        let err = chain.run(&mut Document::new().task(100), &event(10)).unwrap_err();
        assert_eq!(err.error_code(), "PLUGIN_ERROR");
        assert_eq!(
            journal.lock().as_slice(),
            &["a:run:100.10", "a:close:false", "b:close:false"]
        );
    }

    #[test]
    fn test_register_replaces_and_unregister() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut chain = PluginChain::default();
        chain
            .register(Box::new(JournalPlugin::new("a", &journal)), &ctx())
            .unwrap();
        chain
            .register(Box::new(JournalPlugin::new("b", &journal)), &ctx())
            .unwrap();
        chain
            .register(Box::new(JournalPlugin::new("a", &journal)), &ctx())
            .unwrap();
        assert_eq!(chain.names(), vec!["a", "b"]);

        chain.unregister("a").unwrap();
        assert_eq!(chain.names(), vec!["b"]);
        let err = chain.unregister("a").unwrap_err();
        assert!(matches!(err, KernelError::PluginNotRegistered { .. }));

        chain.clear();
        assert_eq!(chain.len(), 0);
    }

    #[test]
    fn test_factory_registry() {
        let journal = Arc::new(Mutex::new(Vec::new()));
        let mut factories = PluginFactoryRegistry::new();
        let shared = Arc::clone(&journal);
        factories.register("journal", move || {
            Ok(Box::new(JournalPlugin::new("journal", &shared)) as Box<dyn Plugin>)
        });
        factories.register("broken", || Err(PluginError::new("CONFIG", "missing setting")));

        assert!(factories.contains("journal"));
        assert_eq!(factories.names(), vec!["broken", "journal"]);
        assert_eq!(factories.create("journal").unwrap().name(), "journal");

        let err = factories.create("broken").err().unwrap();
        assert_eq!(err.error_code(), "PLUGIN_NOT_CREATABLE");
        let err = factories.create("unknown").err().unwrap();
        assert!(matches!(err, KernelError::PluginNotCreatable { .. }));
    }
}

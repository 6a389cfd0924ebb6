//! Shared context handed to plugins.

use crate::config::KernelConfig;
use bpmnflow_core::ModelResolver;
use std::sync::Arc;

/// Environment of a workflow kernel: the model resolver and kernel settings.
#[derive(Clone)]
pub struct WorkflowContext {
    resolver: Arc<ModelResolver>,
    config: KernelConfig,
}

impl WorkflowContext {
    pub fn new(resolver: Arc<ModelResolver>, config: KernelConfig) -> Self {
        Self { resolver, config }
    }

    pub fn resolver(&self) -> &Arc<ModelResolver> {
        &self.resolver
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }
}

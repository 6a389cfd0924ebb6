//! Kernel error types.

use bpmnflow_core::CoreError;
use std::path::PathBuf;
use thiserror::Error;

/// Failure raised by an adapter.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct AdapterError {
    pub code: String,
    pub message: String,
    pub params: Vec<String>,
}

impl AdapterError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(mut self, params: Vec<String>) -> Self {
        self.params = params;
        self
    }
}

/// Failure raised by a plugin.
#[derive(Debug, Clone, Error)]
#[error("{code}: {message}")]
pub struct PluginError {
    pub code: String,
    pub message: String,
}

impl PluginError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Errors from the processing kernel.
#[derive(Debug, Error)]
pub enum KernelError {
    #[error("document undefined: no items")]
    UndefinedDocument,

    #[error("$taskid undefined: {task}")]
    UndefinedTask { task: i64 },

    #[error("$eventid undefined: {event}")]
    UndefinedEvent { event: i64 },

    #[error("loop detected: {transition} already processed ({})", .history.join(", "))]
    LoopDetected {
        transition: String,
        history: Vec<String>,
    },

    #[error("adapter '{adapter}' failed: {source}")]
    Adapter {
        adapter: String,
        #[source]
        source: AdapterError,
    },

    #[error("plugin '{plugin}' failed: {source}")]
    Plugin {
        plugin: String,
        #[source]
        source: PluginError,
    },

    #[error("plugin not registered: {name}")]
    PluginNotRegistered { name: String },

    #[error("plugin '{name}' cannot be created: {reason}")]
    PluginNotCreatable { name: String, reason: String },

    #[error("model file '{}': {reason}", .path.display())]
    ModelFile { path: PathBuf, reason: String },

    #[error(transparent)]
    Model(#[from] CoreError),
}

impl KernelError {
    /// Returns whether this error indicates the operation can be retried.
    ///
    /// Processing is never retried inside the kernel; every failure is fatal
    /// for the call.
    pub fn is_retryable(&self) -> bool {
        match self {
            KernelError::Model(e) => e.is_retryable(),
            _ => false,
        }
    }

    /// Returns whether this error points at a model authoring defect.
    pub fn is_model_defect(&self) -> bool {
        match self {
            KernelError::LoopDetected { .. } => true,
            KernelError::Model(e) => e.is_model_defect(),
            _ => false,
        }
    }

    /// Returns a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            KernelError::UndefinedDocument => "UNDEFINED_DOCUMENT",
            KernelError::UndefinedTask { .. } => "UNDEFINED_TASK",
            KernelError::UndefinedEvent { .. } => "UNDEFINED_EVENT",
            KernelError::LoopDetected { .. } => "LOOP_DETECTED",
            KernelError::Adapter { .. } => "ADAPTER_ERROR",
            KernelError::Plugin { .. } => "PLUGIN_ERROR",
            KernelError::PluginNotRegistered { .. } => "PLUGIN_NOT_REGISTERED",
            KernelError::PluginNotCreatable { .. } => "PLUGIN_NOT_CREATABLE",
            KernelError::ModelFile { .. } => "MODEL_FILE_ERROR",
            KernelError::Model(e) => e.error_code(),
        }
    }
}

//! # bpmnflow-kernel
//!
//! Processing kernel for bpmnflow.
//!
//! This crate provides:
//! - The workflow kernel that advances documents through their model
//! - Adapter and plugin extension points
//! - Configuration loading
//! - Model directory loading

pub mod adapter;
pub mod config;
pub mod context;
pub mod error;
pub mod kernel;
pub mod loader;
pub mod plugin;

pub use adapter::{Adapter, AdapterKind};
pub use config::{Config, ConfigError, KernelConfig, ModelsConfig};
pub use context::WorkflowContext;
pub use error::{AdapterError, KernelError, PluginError};
pub use kernel::{ProcessResult, WorkflowKernel};
pub use loader::{load_models, LoadReport};
pub use plugin::{Plugin, PluginFactoryRegistry};

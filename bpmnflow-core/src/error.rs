//! Core error types.

use thiserror::Error;

/// Errors from model registration, model resolution and flow navigation.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("model version not found: '{version}'")]
    UndefinedModelVersion { version: String },

    #[error("model entry {entry} not defined in model '{version}'")]
    UndefinedModelEntry { version: String, entry: String },

    #[error("invalid model '{version}': {reason}")]
    InvalidModel { version: String, reason: String },

    #[error("invalid model definition: {reason}")]
    InvalidDefinition { reason: String },

    #[error("invalid expression '{expression}': {reason}")]
    InvalidExpression { expression: String, reason: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    pub(crate) fn invalid_model(version: &str, reason: impl Into<String>) -> Self {
        CoreError::InvalidModel {
            version: version.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_definition(reason: impl Into<String>) -> Self {
        CoreError::InvalidDefinition {
            reason: reason.into(),
        }
    }

    /// Returns whether this error indicates the operation can be retried.
    ///
    /// Model errors describe authoring or configuration defects, so none of them are.
    pub fn is_retryable(&self) -> bool {
        false
    }

    /// Returns whether this error points at a defect in a registered model.
    pub fn is_model_defect(&self) -> bool {
        matches!(
            self,
            CoreError::UndefinedModelEntry { .. }
                | CoreError::InvalidModel { .. }
                | CoreError::InvalidDefinition { .. }
        )
    }

    /// Returns a stable error code.
    pub fn error_code(&self) -> &'static str {
        match self {
            CoreError::UndefinedModelVersion { .. } => "UNDEFINED_MODEL_VERSION",
            CoreError::UndefinedModelEntry { .. } => "UNDEFINED_MODEL_ENTRY",
            CoreError::InvalidModel { .. } => "INVALID_MODEL",
            CoreError::InvalidDefinition { .. } => "INVALID_MODEL",
            CoreError::InvalidExpression { .. } => "INVALID_EXPRESSION",
            CoreError::Json(_) => "BAD_REQUEST",
        }
    }
}

//! Error taxonomy for uipilot.
//!
//! Two families: `ConfigError` covers DSL parsing/validation and I/O before a
//! run starts; `ActionError` covers everything that can go wrong while a step
//! executes. Only configuration errors are fatal to a run -- every other
//! per-step error is caught at the phase loop and converted into a structured
//! record, so `execute_workflow` always returns a complete report.

use thiserror::Error;

/// Errors raised while loading or validating a workflow document.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// YAML/JSON parse failure.
    #[error("parse error: {0}")]
    Parse(String),

    /// Structural validation failure.
    #[error("validation error: {0}")]
    Validation(String),

    /// Filesystem I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while executing a single step.
#[derive(Debug, Error)]
pub enum ActionError {
    /// Bad DSL or unresolved placeholder. Fatal: aborts the run immediately
    /// and is never retried, because execution cannot proceed with a
    /// meaningless parameter.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The step exceeded its deadline. Fails that step only.
    #[error("action '{action}' timed out after {timeout_ms}ms")]
    Timeout { action: String, timeout_ms: u64 },

    /// Every selector candidate failed within the allotted budget.
    #[error("no selector matched within {budget_ms}ms (candidates tried: {candidates})")]
    SelectorExhausted { candidates: String, budget_ms: u64 },

    /// The session is known-broken and a credential refresh did not help.
    #[error("authentication expired: {0}")]
    AuthExpired(String),

    /// Unexpected failure from the driver/action layer.
    #[error("system error: {0}")]
    System(String),
}

impl ActionError {
    /// Whether this error aborts the whole run rather than just the step.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ActionError::Configuration(_))
    }

    /// Stable short tag for logs and records.
    pub fn kind(&self) -> &'static str {
        match self {
            ActionError::Configuration(_) => "configuration",
            ActionError::Timeout { .. } => "timeout",
            ActionError::SelectorExhausted { .. } => "selector_exhausted",
            ActionError::AuthExpired(_) => "auth_expired",
            ActionError::System(_) => "system",
        }
    }
}

//! Static action registry and parameter extraction.
//!
//! Action dispatch is a compile-time map from action-type string to a
//! handler, populated by explicit registration calls -- never by runtime
//! introspection. Atomic handlers drive the backend directly; composite
//! ("semantic") handlers expand into a sub-sequence of atomic steps at
//! execution time and are the open extension point for embedders.

use std::collections::HashMap;

use serde_json::{Map, Value};

use uipilot_types::error::ActionError;
use uipilot_types::workflow::Step;

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

/// Built-in atomic actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AtomicAction {
    /// Navigate to a URL.
    Open,
    /// Click an element.
    Click,
    /// Fill a form field.
    Fill,
    /// Wait for an element (optionally with an attribute condition).
    WaitFor,
    /// Unconditional pause.
    Wait,
    /// Capture a screenshot.
    Screenshot,
}

/// Expansion function for a composite action: receives the step's resolved
/// parameters and returns the atomic sub-sequence to run in its place.
pub type CompositeFn =
    Box<dyn Fn(&Map<String, Value>) -> Result<Vec<Step>, ActionError> + Send + Sync>;

/// A registered handler for one action-type string.
pub enum ActionHandler {
    Atomic(AtomicAction),
    Composite(CompositeFn),
}

// ---------------------------------------------------------------------------
// ActionRegistry
// ---------------------------------------------------------------------------

/// Compile-time action dispatch table.
pub struct ActionRegistry {
    handlers: HashMap<String, ActionHandler>,
}

impl ActionRegistry {
    /// Registry pre-populated with the built-in atomic actions and their
    /// conventional aliases.
    pub fn builtin() -> Self {
        let mut registry = Self {
            handlers: HashMap::new(),
        };
        registry.register_atomic("open", AtomicAction::Open);
        registry.register_atomic("navigate", AtomicAction::Open);
        registry.register_atomic("click", AtomicAction::Click);
        registry.register_atomic("fill", AtomicAction::Fill);
        registry.register_atomic("input", AtomicAction::Fill);
        registry.register_atomic("wait_for", AtomicAction::WaitFor);
        registry.register_atomic("wait", AtomicAction::Wait);
        registry.register_atomic("sleep", AtomicAction::Wait);
        registry.register_atomic("screenshot", AtomicAction::Screenshot);
        registry
    }

    /// Register (or override) an atomic action name.
    pub fn register_atomic(&mut self, name: &str, action: AtomicAction) {
        self.handlers
            .insert(name.to_string(), ActionHandler::Atomic(action));
    }

    /// Register (or override) a composite action.
    pub fn register_composite<F>(&mut self, name: &str, expand: F)
    where
        F: Fn(&Map<String, Value>) -> Result<Vec<Step>, ActionError> + Send + Sync + 'static,
    {
        self.handlers
            .insert(name.to_string(), ActionHandler::Composite(Box::new(expand)));
    }

    pub fn get(&self, action: &str) -> Option<&ActionHandler> {
        self.handlers.get(action)
    }

    pub fn contains(&self, action: &str) -> bool {
        self.handlers.contains_key(action)
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

// ---------------------------------------------------------------------------
// Parameter extraction
// ---------------------------------------------------------------------------

/// A required string parameter. Absence or a wrong type is a configuration
/// error -- the DSL is broken, not the page under test.
pub fn required_str<'a>(
    params: &'a Map<String, Value>,
    key: &str,
    action: &str,
) -> Result<&'a str, ActionError> {
    match params.get(key) {
        Some(Value::String(s)) => Ok(s),
        Some(_) => Err(ActionError::Configuration(format!(
            "action '{action}': parameter '{key}' must be a string"
        ))),
        None => Err(ActionError::Configuration(format!(
            "action '{action}' requires parameter '{key}'"
        ))),
    }
}

/// An optional string parameter; wrong types read as absent-with-error.
pub fn optional_str<'a>(
    params: &'a Map<String, Value>,
    key: &str,
    action: &str,
) -> Result<Option<&'a str>, ActionError> {
    match params.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s)),
        Some(_) => Err(ActionError::Configuration(format!(
            "action '{action}': parameter '{key}' must be a string"
        ))),
    }
}

/// An optional unsigned integer parameter.
pub fn optional_u64(
    params: &Map<String, Value>,
    key: &str,
    action: &str,
) -> Result<Option<u64>, ActionError> {
    match params.get(key) {
        None => Ok(None),
        Some(value) => value.as_u64().map(Some).ok_or_else(|| {
            ActionError::Configuration(format!(
                "action '{action}': parameter '{key}' must be a non-negative integer"
            ))
        }),
    }
}

/// An optional boolean parameter.
pub fn optional_bool(
    params: &Map<String, Value>,
    key: &str,
    action: &str,
) -> Result<Option<bool>, ActionError> {
    match params.get(key) {
        None => Ok(None),
        Some(Value::Bool(b)) => Ok(Some(*b)),
        Some(_) => Err(ActionError::Configuration(format!(
            "action '{action}': parameter '{key}' must be a boolean"
        ))),
    }
}

/// A scalar parameter coerced to text (form fill values may resolve to
/// numbers or booleans through whole-string placeholders).
pub fn text_param(
    params: &Map<String, Value>,
    key: &str,
    action: &str,
) -> Result<Option<String>, ActionError> {
    match params.get(key) {
        None => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.clone())),
        Some(Value::Number(n)) => Ok(Some(n.to_string())),
        Some(Value::Bool(b)) => Ok(Some(b.to_string())),
        Some(_) => Err(ActionError::Configuration(format!(
            "action '{action}': parameter '{key}' must be a scalar"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap_or_default()
    }

    // -----------------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------------

    #[test]
    fn test_builtin_actions_and_aliases() {
        let registry = ActionRegistry::builtin();
        for name in ["open", "navigate", "click", "fill", "input", "wait_for", "wait", "sleep", "screenshot"] {
            assert!(registry.contains(name), "missing builtin '{name}'");
        }
        assert!(matches!(
            registry.get("navigate"),
            Some(ActionHandler::Atomic(AtomicAction::Open))
        ));
        assert!(matches!(
            registry.get("input"),
            Some(ActionHandler::Atomic(AtomicAction::Fill))
        ));
        assert!(registry.get("transmogrify").is_none());
    }

    #[test]
    fn test_register_composite_and_expand() {
        let mut registry = ActionRegistry::builtin();
        registry.register_composite("dismiss_banner", |p| {
            let selector = required_str(p, "selector", "dismiss_banner")?;
            Ok(vec![
                Step::new("wait_for", params(json!({ "selector": selector }))),
                Step::new("click", params(json!({ "selector": selector }))),
            ])
        });

        let Some(ActionHandler::Composite(expand)) = registry.get("dismiss_banner") else {
            panic!("composite not registered");
        };
        let steps = expand(&params(json!({ "selector": "#cookie-ok" }))).unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].action, "wait_for");
        assert_eq!(steps[1].action, "click");
    }

    #[test]
    fn test_composite_can_shadow_builtin() {
        let mut registry = ActionRegistry::builtin();
        registry.register_composite("click", |_| Ok(vec![]));
        assert!(matches!(
            registry.get("click"),
            Some(ActionHandler::Composite(_))
        ));
    }

    // -----------------------------------------------------------------------
    // Parameter extraction
    // -----------------------------------------------------------------------

    #[test]
    fn test_required_str() {
        let p = params(json!({ "selector": "#x" }));
        assert_eq!(required_str(&p, "selector", "click").unwrap(), "#x");

        let err = required_str(&p, "url", "open").unwrap_err();
        assert!(matches!(err, ActionError::Configuration(_)));
        assert!(err.to_string().contains("requires parameter 'url'"));

        let p = params(json!({ "selector": 7 }));
        let err = required_str(&p, "selector", "click").unwrap_err();
        assert!(err.to_string().contains("must be a string"));
    }

    #[test]
    fn test_optional_u64_rejects_wrong_type() {
        let p = params(json!({ "timeout": "soon" }));
        assert!(optional_u64(&p, "timeout", "wait").is_err());

        let p = params(json!({ "timeout": 250 }));
        assert_eq!(optional_u64(&p, "timeout", "wait").unwrap(), Some(250));
        assert_eq!(optional_u64(&p, "absent", "wait").unwrap(), None);
    }

    #[test]
    fn test_optional_bool() {
        let p = params(json!({ "full_page": true }));
        assert_eq!(optional_bool(&p, "full_page", "screenshot").unwrap(), Some(true));
        let p = params(json!({ "full_page": "yes" }));
        assert!(optional_bool(&p, "full_page", "screenshot").is_err());
    }

    #[test]
    fn test_text_param_coerces_scalars() {
        let p = params(json!({ "value": 42 }));
        assert_eq!(text_param(&p, "value", "fill").unwrap(), Some("42".to_string()));
        let p = params(json!({ "value": true }));
        assert_eq!(text_param(&p, "value", "fill").unwrap(), Some("true".to_string()));
        let p = params(json!({ "value": ["no"] }));
        assert!(text_param(&p, "value", "fill").is_err());
    }
}

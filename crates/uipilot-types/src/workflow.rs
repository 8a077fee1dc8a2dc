//! Workflow DSL data model for uipilot.
//!
//! Defines the hierarchical test specification interpreted by the engine:
//! Workflow -> Phase -> Step. A workflow document is authored in YAML under a
//! root `workflow:` key; once parsed, the structure is immutable and owned by
//! the caller for the lifetime of a run.

use serde::de::Error as DeError;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Workflow
// ---------------------------------------------------------------------------

/// Top-level workflow: ordered phases plus setup/recovery hooks.
///
/// `suite_setup` and `error_recovery` are flat step lists that run outside the
/// phase loop. `success_criteria` is an opaque list of human-readable claims,
/// echoed into the execution report but never evaluated by the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    /// Human-readable workflow name.
    pub name: String,
    /// Ordered list of phases. Phase order is a total order; no reordering
    /// or parallelism is permitted.
    #[serde(default)]
    pub phases: Vec<Phase>,
    /// Steps run once before any phase.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub suite_setup: Vec<Step>,
    /// Steps run best-effort after a setup or phase failure.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub error_recovery: Vec<Step>,
    /// Reported (not evaluated) success criteria.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub success_criteria: Vec<String>,
}

/// A named, ordered sequence of steps representing one logical stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    /// Phase name, used in reports and log records.
    pub name: String,
    /// Optional longer description.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Ordered list of steps. Executed strictly in order.
    #[serde(default)]
    pub steps: Vec<Step>,
}

/// Root document shape: `workflow: { ... }`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowDocument {
    pub workflow: Workflow,
}

// ---------------------------------------------------------------------------
// Step
// ---------------------------------------------------------------------------

/// Reserved parameter key marking a step as non-blocking.
pub const PARAM_OPTIONAL: &str = "optional";

/// Reserved parameter key overriding the action's operation budget (ms).
pub const PARAM_TIMEOUT: &str = "timeout";

/// Reserved parameter key giving a step a display name.
pub const PARAM_NAME: &str = "name";

/// A single typed operation with parameters.
///
/// Two step shapes are accepted on input:
///
/// ```yaml
/// # legacy: single-key mapping, the key is the action name
/// - click: { selector: "#submit" }
/// # explicit: action key plus inline parameters
/// - action: click
///   selector: "#submit"
/// ```
///
/// Serialization always emits the explicit shape. Parameter values may
/// contain nested `${dotted.path}` placeholders; they are resolved at
/// execution time, never at parse time.
#[derive(Debug, Clone, PartialEq)]
pub struct Step {
    /// Action type identifier (e.g. `open`, `click`, `wait_for`).
    pub action: String,
    /// Action parameters, including the reserved `optional`/`timeout`/`name`
    /// keys.
    pub params: Map<String, Value>,
}

impl Step {
    /// Build a step programmatically (used by composite action expansion).
    pub fn new(action: impl Into<String>, params: Map<String, Value>) -> Self {
        Self {
            action: action.into(),
            params,
        }
    }

    /// Whether this step is non-blocking (`optional: true` in params).
    pub fn optional(&self) -> bool {
        matches!(self.params.get(PARAM_OPTIONAL), Some(Value::Bool(true)))
    }

    /// Per-step operation budget override in milliseconds, if present.
    pub fn timeout_ms(&self) -> Option<u64> {
        self.params.get(PARAM_TIMEOUT).and_then(Value::as_u64)
    }

    /// Display name: the `name` param when present, the action otherwise.
    pub fn label(&self) -> &str {
        self.params
            .get(PARAM_NAME)
            .and_then(Value::as_str)
            .unwrap_or(&self.action)
    }

    /// Look up a parameter by key.
    pub fn param(&self, key: &str) -> Option<&Value> {
        self.params.get(key)
    }

    fn from_raw(mut raw: Map<String, Value>) -> Result<Self, String> {
        if let Some(action) = raw.remove("action") {
            let action = action
                .as_str()
                .ok_or("step 'action' must be a string")?
                .to_string();
            if action.is_empty() {
                return Err("step 'action' must not be empty".to_string());
            }
            return Ok(Step {
                action,
                params: raw,
            });
        }

        let mut entries = raw.into_iter();
        match (entries.next(), entries.next()) {
            (Some((action, value)), None) => {
                let params = match value {
                    Value::Object(map) => map,
                    Value::Null => Map::new(),
                    other => {
                        return Err(format!(
                            "parameters of step '{}' must be a mapping, got {}",
                            action,
                            value_kind(&other)
                        ));
                    }
                };
                Ok(Step { action, params })
            }
            _ => Err(
                "step must be either '{action: <name>, ...params}' or a single-key \
                 '{<name>: {...params}}' mapping"
                    .to_string(),
            ),
        }
    }
}

impl<'de> Deserialize<'de> for Step {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = Map::<String, Value>::deserialize(deserializer)?;
        Step::from_raw(raw).map_err(D::Error::custom)
    }
}

impl Serialize for Step {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let mut map = serializer.serialize_map(Some(self.params.len() + 1))?;
        map.serialize_entry("action", &self.action)?;
        for (key, value) in &self.params {
            map.serialize_entry(key, value)?;
        }
        map.end()
    }
}

/// Short type tag for error messages.
fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a sequence",
        Value::Object(_) => "a mapping",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

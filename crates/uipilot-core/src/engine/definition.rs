//! Workflow document parsing, validation, and filesystem operations.
//!
//! Converts between YAML files and the in-memory `Workflow` model and
//! validates structural constraints before execution, so a run never starts
//! on a malformed document.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde_json::Value;

use uipilot_types::error::ConfigError;
use uipilot_types::workflow::{
    PARAM_OPTIONAL, PARAM_TIMEOUT, Step, Workflow, WorkflowDocument,
};

// ---------------------------------------------------------------------------
// Parsing
// ---------------------------------------------------------------------------

/// Parse a YAML string (root key `workflow:`) into a validated `Workflow`.
pub fn parse_workflow_yaml(yaml: &str) -> Result<Workflow, ConfigError> {
    let doc: WorkflowDocument =
        serde_yaml_ng::from_str(yaml).map_err(|e| ConfigError::Parse(e.to_string()))?;
    validate_workflow(&doc.workflow)?;
    Ok(doc.workflow)
}

/// Serialize a `Workflow` back to its YAML document form.
pub fn serialize_workflow_yaml(workflow: &Workflow) -> Result<String, ConfigError> {
    serde_yaml_ng::to_string(&WorkflowDocument {
        workflow: workflow.clone(),
    })
    .map_err(|e| ConfigError::Parse(e.to_string()))
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate structural constraints on a `Workflow`.
///
/// Checks:
/// - Name is non-empty
/// - At least one phase exists; phase names are non-empty and unique
/// - Every phase has at least one step
/// - Reserved step params are well-typed (`optional` boolean, `timeout`
///   positive integer) in phases and in the setup/recovery lists
pub fn validate_workflow(workflow: &Workflow) -> Result<(), ConfigError> {
    if workflow.name.trim().is_empty() {
        return Err(ConfigError::Validation(
            "workflow name must not be empty".to_string(),
        ));
    }

    if workflow.phases.is_empty() {
        return Err(ConfigError::Validation(
            "workflow must have at least one phase".to_string(),
        ));
    }

    let mut seen_phases = HashSet::new();
    for phase in &workflow.phases {
        if phase.name.trim().is_empty() {
            return Err(ConfigError::Validation(
                "phase name must not be empty".to_string(),
            ));
        }
        if !seen_phases.insert(phase.name.as_str()) {
            return Err(ConfigError::Validation(format!(
                "duplicate phase name: '{}'",
                phase.name
            )));
        }
        if phase.steps.is_empty() {
            return Err(ConfigError::Validation(format!(
                "phase '{}' must have at least one step",
                phase.name
            )));
        }
        for step in &phase.steps {
            validate_step(step, &phase.name)?;
        }
    }

    for step in &workflow.suite_setup {
        validate_step(step, "suite_setup")?;
    }
    for step in &workflow.error_recovery {
        validate_step(step, "error_recovery")?;
    }

    Ok(())
}

fn validate_step(step: &Step, where_: &str) -> Result<(), ConfigError> {
    if let Some(optional) = step.params.get(PARAM_OPTIONAL) {
        if !optional.is_boolean() {
            return Err(ConfigError::Validation(format!(
                "step '{}' in '{}': 'optional' must be a boolean",
                step.label(),
                where_
            )));
        }
    }
    if let Some(timeout) = step.params.get(PARAM_TIMEOUT) {
        match timeout {
            Value::Number(n) if n.as_u64().is_some_and(|ms| ms > 0) => {}
            // A placeholder is fine here; it resolves at execution time
            Value::String(s) if s.contains("${") => {}
            _ => {
                return Err(ConfigError::Validation(format!(
                    "step '{}' in '{}': 'timeout' must be a positive integer (milliseconds)",
                    step.label(),
                    where_
                )));
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Filesystem operations
// ---------------------------------------------------------------------------

/// Load a workflow from a YAML file.
pub fn load_workflow_file(path: &Path) -> Result<Workflow, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow_yaml(&content)
}

/// Save a workflow to a YAML file, creating parent directories if needed.
pub fn save_workflow_file(path: &Path, workflow: &Workflow) -> Result<(), ConfigError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let yaml = serialize_workflow_yaml(workflow)?;
    std::fs::write(path, yaml)?;
    Ok(())
}

/// Discover workflow YAML files under `base_dir`, recursively.
///
/// Files that fail to parse are skipped with a warning; they may be other
/// YAML living alongside a suite.
pub fn discover_workflows(base_dir: &Path) -> Result<Vec<(PathBuf, Workflow)>, ConfigError> {
    let mut results = Vec::new();
    if !base_dir.exists() {
        return Ok(results);
    }
    discover_recursive(base_dir, &mut results)?;
    Ok(results)
}

fn discover_recursive(
    dir: &Path,
    results: &mut Vec<(PathBuf, Workflow)>,
) -> Result<(), ConfigError> {
    for entry in std::fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            discover_recursive(&path, results)?;
        } else if let Some(ext) = path.extension() {
            if ext == "yaml" || ext == "yml" {
                match load_workflow_file(&path) {
                    Ok(workflow) => results.push((path, workflow)),
                    Err(_) => {
                        tracing::warn!(?path, "skipping unparseable workflow file");
                    }
                }
            }
        }
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

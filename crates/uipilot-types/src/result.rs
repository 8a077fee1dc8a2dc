//! Execution result records for uipilot.
//!
//! `ExecutionResult` is the structured report returned by every workflow run.
//! It is created at workflow start, mutated only by the execution engine, and
//! returned frozen at finalize. External report rendering consumes these
//! types; the engine never reads them back.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Step status
// ---------------------------------------------------------------------------

/// Outcome of a single attempted step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    /// An optional step failed; the failure does not count against the phase.
    Skipped,
}

// ---------------------------------------------------------------------------
// Records
// ---------------------------------------------------------------------------

/// One record per attempted step, appended in execution order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepRecord {
    /// Phase the step ran in (`suite_setup`, `error_recovery`, `system`, or a
    /// phase name).
    pub phase: String,
    /// Step display name.
    pub step: String,
    /// Action type identifier.
    pub action: String,
    /// Outcome of the attempt.
    pub status: StepStatus,
    /// Parameters used, after template resolution.
    pub params: Value,
    /// Error message for failed/skipped attempts.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// When the attempt started.
    pub started_at: DateTime<Utc>,
    /// When the attempt finished.
    pub finished_at: DateTime<Utc>,
    /// Wall-clock duration of the attempt.
    pub duration_ms: u64,
}

/// A required-step failure. Optional-step failures never appear here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub phase: String,
    pub step: String,
    pub error: String,
    pub at: DateTime<Utc>,
}

/// Per-phase outcome summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhaseResult {
    pub name: String,
    pub success: bool,
    pub duration_ms: u64,
    /// Names of the steps that were attempted, in order.
    pub executed_steps: Vec<String>,
}

// ---------------------------------------------------------------------------
// Context snapshot
// ---------------------------------------------------------------------------

/// Point-in-time copy of the run context, safe to hand across component
/// boundaries (reports, debugging history).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextSnapshot {
    pub workflow_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_phase: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    /// Generic key/value run state.
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub state: Map<String, Value>,
    pub captured_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// ExecutionResult
// ---------------------------------------------------------------------------

/// The frozen report of one workflow run.
///
/// Invariant: `execution_history` holds at least one record per attempted
/// step (including skipped ones) and is never reordered after append.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// UUIDv7 run ID.
    pub run_id: Uuid,
    pub workflow_name: String,
    /// Logical AND over all recorded phase results, false when suite setup
    /// failed or the run aborted on a configuration error.
    pub overall_success: bool,
    pub execution_history: Vec<StepRecord>,
    pub error_history: Vec<ErrorRecord>,
    pub phase_results: Vec<PhaseResult>,
    /// Echo of the workflow's declared success criteria (not evaluated).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub success_criteria: Vec<String>,
    pub final_context: ContextSnapshot,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration_ms: u64,
}

impl ExecutionResult {
    /// Count of attempted steps with the given status.
    pub fn count(&self, status: StepStatus) -> usize {
        self.execution_history
            .iter()
            .filter(|r| r.status == status)
            .count()
    }
}

/// Result of an isolated single-action invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SingleActionResult {
    pub success: bool,
    pub context: ContextSnapshot,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

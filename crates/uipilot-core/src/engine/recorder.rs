//! Result aggregation for workflow runs.
//!
//! `RunRecorder` is a passive observer: the execution state machine reports
//! transitions, the recorder appends records in order and, on finalize,
//! freezes the `ExecutionResult`. It never alters control flow.

use chrono::{DateTime, Utc};
use serde_json::Value;
use uuid::Uuid;

use uipilot_types::result::{
    ContextSnapshot, ErrorRecord, ExecutionResult, PhaseResult, StepRecord, StepStatus,
};
use uipilot_types::workflow::Workflow;

// ---------------------------------------------------------------------------
// Synthetic phase names
// ---------------------------------------------------------------------------

/// Phase label for suite-setup step records.
pub const PHASE_SUITE_SETUP: &str = "suite_setup";

/// Phase label for error-recovery step records.
pub const PHASE_ERROR_RECOVERY: &str = "error_recovery";

/// Phase label for catastrophic failures outside any declared phase.
pub const PHASE_SYSTEM: &str = "system";

// ---------------------------------------------------------------------------
// RunRecorder
// ---------------------------------------------------------------------------

/// Accumulates execution records for one run.
pub struct RunRecorder {
    run_id: Uuid,
    workflow_name: String,
    success_criteria: Vec<String>,
    started_at: DateTime<Utc>,
    execution_history: Vec<StepRecord>,
    error_history: Vec<ErrorRecord>,
    phase_results: Vec<PhaseResult>,
}

impl RunRecorder {
    pub fn new(run_id: Uuid, workflow: &Workflow) -> Self {
        Self {
            run_id,
            workflow_name: workflow.name.clone(),
            success_criteria: workflow.success_criteria.clone(),
            started_at: Utc::now(),
            execution_history: Vec::new(),
            error_history: Vec::new(),
            phase_results: Vec::new(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Append one record for an attempted step. Records are never reordered
    /// after append.
    #[allow(clippy::too_many_arguments)]
    pub fn record_step(
        &mut self,
        phase: &str,
        step: &str,
        action: &str,
        status: StepStatus,
        params: Value,
        error: Option<String>,
        started_at: DateTime<Utc>,
        duration_ms: u64,
    ) {
        self.execution_history.push(StepRecord {
            phase: phase.to_string(),
            step: step.to_string(),
            action: action.to_string(),
            status,
            params,
            error,
            started_at,
            finished_at: Utc::now(),
            duration_ms,
        });
    }

    /// Append a required-step failure to the error history.
    pub fn record_error(&mut self, phase: &str, step: &str, error: &str) {
        self.error_history.push(ErrorRecord {
            phase: phase.to_string(),
            step: step.to_string(),
            error: error.to_string(),
            at: Utc::now(),
        });
    }

    /// Append a finished phase's summary.
    pub fn record_phase(
        &mut self,
        name: &str,
        success: bool,
        duration_ms: u64,
        executed_steps: Vec<String>,
    ) {
        self.phase_results.push(PhaseResult {
            name: name.to_string(),
            success,
            duration_ms,
            executed_steps,
        });
    }

    /// Whether any recorded phase failed.
    pub fn any_phase_failed(&self) -> bool {
        self.phase_results.iter().any(|p| !p.success)
    }

    /// Logical AND over all recorded phase results.
    pub fn all_phases_succeeded(&self) -> bool {
        self.phase_results.iter().all(|p| p.success)
    }

    /// Number of step records appended so far.
    pub fn attempted_steps(&self) -> usize {
        self.execution_history.len()
    }

    /// Freeze the report. `overall_success` is computed by the caller once,
    /// after any post-phase recovery pass.
    pub fn finalize(self, overall_success: bool, final_context: ContextSnapshot) -> ExecutionResult {
        let finished_at = Utc::now();
        let duration_ms = (finished_at - self.started_at).num_milliseconds().max(0) as u64;
        ExecutionResult {
            run_id: self.run_id,
            workflow_name: self.workflow_name,
            overall_success,
            execution_history: self.execution_history,
            error_history: self.error_history,
            phase_results: self.phase_results,
            success_criteria: self.success_criteria,
            final_context,
            started_at: self.started_at,
            finished_at,
            duration_ms,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

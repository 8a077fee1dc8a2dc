//! The workflow/phase/step execution state machine.
//!
//! A run moves through suite setup, the ordered phases, and a conditional
//! error-recovery pass, applying retry/optional/strict-vs-recover policy per
//! step. Each run is one cooperative task: suspension points occur only at
//! backend I/O and poller sleeps, and a stop request is observed between
//! steps. Business-logic failures never escape `execute_workflow` -- the
//! caller always receives a complete `ExecutionResult`.

use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde_json::{Map, Value, json};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use uipilot_types::config::{EngineConfig, PhaseSuccessMode};
use uipilot_types::error::ActionError;
use uipilot_types::result::{ExecutionResult, SingleActionResult, StepStatus};
use uipilot_types::workflow::{PARAM_TIMEOUT, Phase, Step, Workflow};

use crate::driver::{DriverError, ElementState, UiDriver};

use super::actions::{
    ActionHandler, ActionRegistry, AtomicAction, optional_bool, optional_str, optional_u64,
    required_str, text_param,
};
use super::context::RunContext;
use super::guard::InterruptGuard;
use super::recorder::{PHASE_ERROR_RECOVERY, PHASE_SUITE_SETUP, PHASE_SYSTEM, RunRecorder};
use super::selector::{self, AttributeCondition, LocateError, SelectorOp};
use super::template::{self, TemplateScope};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Bound on nested composite-action expansion.
pub const MAX_COMPOSITE_DEPTH: u32 = 5;

/// Budget for a best-effort failure screenshot.
const FAILURE_SCREENSHOT_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Internal step error
// ---------------------------------------------------------------------------

/// Per-step failure, distinguishing a lost backend session (which makes every
/// later step pointless) from ordinary action errors.
#[derive(Debug)]
enum StepError {
    Action(ActionError),
    SessionGone(String),
}

impl StepError {
    fn message(&self) -> String {
        match self {
            StepError::Action(e) => e.to_string(),
            StepError::SessionGone(m) => format!("backend session lost: {m}"),
        }
    }

    /// Whether this failure aborts the whole run.
    fn aborts_run(&self) -> bool {
        match self {
            StepError::Action(e) => e.is_fatal(),
            StepError::SessionGone(_) => true,
        }
    }
}

impl From<ActionError> for StepError {
    fn from(e: ActionError) -> Self {
        StepError::Action(e)
    }
}

fn driver_err(e: DriverError) -> StepError {
    match e {
        DriverError::SessionLost(m) => StepError::SessionGone(m),
        DriverError::Operation(m) => StepError::Action(ActionError::System(m)),
    }
}

fn locate_err(e: LocateError) -> StepError {
    match e {
        LocateError::Exhausted {
            candidates,
            budget_ms,
        } => StepError::Action(ActionError::SelectorExhausted {
            candidates,
            budget_ms,
        }),
        LocateError::EmptyExpression => {
            StepError::Action(ActionError::Configuration(e.to_string()))
        }
        LocateError::SessionLost(m) => StepError::SessionGone(m),
    }
}

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

enum StepOutcome {
    Success { required: bool },
    /// Optional step failed; no effect on phase or workflow success.
    Skipped,
    Failed { abort: bool },
}

struct ListOutcome {
    success: bool,
    abort: bool,
}

struct PhaseOutcome {
    success: bool,
    abort: bool,
}

// ---------------------------------------------------------------------------
// WorkflowEngine
// ---------------------------------------------------------------------------

/// Drives workflows against one exclusively-owned driver session.
///
/// Concurrent runs belong in separate engine instances; within one instance
/// steps execute strictly in order so step N's side effects are visible to
/// step N+1.
pub struct WorkflowEngine {
    driver: Arc<dyn UiDriver>,
    config: EngineConfig,
    registry: ActionRegistry,
    template_layers: Vec<Value>,
    /// Stop-request tokens for in-flight runs, keyed by run ID.
    cancellations: DashMap<Uuid, CancellationToken>,
}

impl WorkflowEngine {
    pub fn new(driver: Arc<dyn UiDriver>, config: EngineConfig) -> Self {
        Self {
            driver,
            config,
            registry: ActionRegistry::builtin(),
            template_layers: Vec::new(),
            cancellations: DashMap::new(),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Mutable access to the action registry, for registering composite
    /// ("semantic") actions before any run starts.
    pub fn registry_mut(&mut self) -> &mut ActionRegistry {
        &mut self.registry
    }

    /// Append a template lookup layer (run configuration, locator aliases).
    /// Layers are searched in insertion order; run-time values come last.
    pub fn add_template_layer(&mut self, layer: Value) {
        self.template_layers.push(layer);
    }

    /// Run IDs currently executing on this engine.
    pub fn active_runs(&self) -> Vec<Uuid> {
        self.cancellations.iter().map(|e| *e.key()).collect()
    }

    /// Request a cooperative stop of an in-flight run. The flag is observed
    /// between steps; an in-flight backend call runs to its own step-level
    /// timeout rather than being forcibly interrupted.
    pub fn cancel(&self, run_id: Uuid) -> bool {
        match self.cancellations.get(&run_id) {
            Some(entry) => {
                entry.cancel();
                tracing::info!(run_id = %run_id, "stop requested");
                true
            }
            None => false,
        }
    }

    // -----------------------------------------------------------------------
    // Public execution API
    // -----------------------------------------------------------------------

    /// Execute a workflow to completion and return its frozen report.
    pub async fn execute_workflow(&self, workflow: &Workflow) -> ExecutionResult {
        let run_id = Uuid::now_v7();
        let cancel = CancellationToken::new();
        self.cancellations.insert(run_id, cancel.clone());
        let result = self.execute_run(workflow, run_id, &cancel).await;
        self.cancellations.remove(&run_id);
        result
    }

    /// Execute one action in isolation, outside any workflow.
    pub async fn execute_single_action(
        &self,
        action: &str,
        params: Map<String, Value>,
    ) -> SingleActionResult {
        let ctx = RunContext::new("single-action");
        ctx.enter_step(action);

        let scope = self.scope(&ctx);
        let result = match template::resolve_map(&params, &scope) {
            Err(e) => Err(StepError::Action(ActionError::Configuration(e.to_string()))),
            Ok(resolved) => self.run_with_deadline(action, resolved, &ctx).await,
        };

        match result {
            Ok(()) => SingleActionResult {
                success: true,
                context: ctx.snapshot(),
                error: None,
            },
            Err(e) => {
                let message = e.message();
                ctx.record_error(message.as_str());
                SingleActionResult {
                    success: false,
                    context: ctx.snapshot(),
                    error: Some(message),
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Run state machine
    // -----------------------------------------------------------------------

    async fn execute_run(
        &self,
        workflow: &Workflow,
        run_id: Uuid,
        cancel: &CancellationToken,
    ) -> ExecutionResult {
        let ctx = RunContext::new(&workflow.name);
        let mut recorder = RunRecorder::new(run_id, workflow);

        tracing::info!(
            run_id = %run_id,
            workflow = workflow.name.as_str(),
            phases = workflow.phases.len(),
            "starting workflow run"
        );

        // SUITE_SETUP
        if !workflow.suite_setup.is_empty() {
            ctx.enter_phase(PHASE_SUITE_SETUP);
            let setup = self
                .run_step_list(
                    PHASE_SUITE_SETUP,
                    &workflow.suite_setup,
                    &ctx,
                    &mut recorder,
                    cancel,
                    false,
                )
                .await;
            if !setup.success {
                tracing::warn!(run_id = %run_id, "suite setup failed; finalizing with zero phases");
                if !setup.abort {
                    self.run_recovery(workflow, &ctx, &mut recorder, cancel).await;
                }
                return recorder.finalize(false, ctx.snapshot());
            }
        }

        // PHASES
        let mut aborted = false;
        for phase in &workflow.phases {
            if cancel.is_cancelled() {
                ctx.record_error("stop requested");
                tracing::warn!(run_id = %run_id, "stop requested; skipping remaining phases");
                break;
            }
            let outcome = self.run_phase(phase, &ctx, &mut recorder, cancel).await;
            if outcome.abort {
                aborted = true;
                break;
            }
            if !outcome.success && self.config.stop_on_phase_failure {
                tracing::warn!(
                    phase = phase.name.as_str(),
                    "phase failed and stop_on_phase_failure is set"
                );
                break;
            }
        }

        // ERROR_RECOVERY: best-effort, does not retry the phases and never
        // overwrites existing error entries.
        if !aborted && recorder.any_phase_failed() {
            self.run_recovery(workflow, &ctx, &mut recorder, cancel).await;
        }

        let overall_success = !aborted && recorder.all_phases_succeeded();
        tracing::info!(
            run_id = %run_id,
            overall_success,
            steps = recorder.attempted_steps(),
            "workflow run finalized"
        );
        recorder.finalize(overall_success, ctx.snapshot())
    }

    async fn run_recovery(
        &self,
        workflow: &Workflow,
        ctx: &RunContext,
        recorder: &mut RunRecorder,
        cancel: &CancellationToken,
    ) {
        if workflow.error_recovery.is_empty() {
            return;
        }
        ctx.enter_phase(PHASE_ERROR_RECOVERY);
        tracing::info!(steps = workflow.error_recovery.len(), "running error recovery");
        let _ = self
            .run_step_list(
                PHASE_ERROR_RECOVERY,
                &workflow.error_recovery,
                ctx,
                recorder,
                cancel,
                true,
            )
            .await;
    }

    /// Run a flat step list (suite setup or error recovery). The list
    /// succeeds when no required step failed.
    async fn run_step_list(
        &self,
        list_name: &str,
        steps: &[Step],
        ctx: &RunContext,
        recorder: &mut RunRecorder,
        cancel: &CancellationToken,
        swallow_failures: bool,
    ) -> ListOutcome {
        let mut success = true;
        let mut abort = false;
        for step in steps {
            if cancel.is_cancelled() {
                tracing::warn!(list = list_name, "stop requested; leaving step list");
                break;
            }
            match self
                .run_step(list_name, step, ctx, recorder, swallow_failures)
                .await
            {
                StepOutcome::Success { .. } | StepOutcome::Skipped => {}
                StepOutcome::Failed { abort: a } => {
                    success = false;
                    if a && !swallow_failures {
                        abort = true;
                        break;
                    }
                    if self.config.fail_fast && !swallow_failures {
                        break;
                    }
                }
            }
        }
        ListOutcome { success, abort }
    }

    async fn run_phase(
        &self,
        phase: &Phase,
        ctx: &RunContext,
        recorder: &mut RunRecorder,
        cancel: &CancellationToken,
    ) -> PhaseOutcome {
        ctx.enter_phase(&phase.name);
        tracing::info!(
            phase = phase.name.as_str(),
            steps = phase.steps.len(),
            "phase running"
        );

        let phase_start = Instant::now();
        let mut executed = Vec::new();
        let mut any_required_failure = false;
        let mut last_required_success: Option<bool> = None;
        let mut abort = false;

        for step in &phase.steps {
            if cancel.is_cancelled() {
                ctx.record_error("stop requested");
                tracing::warn!(phase = phase.name.as_str(), "stop requested; leaving phase");
                break;
            }

            let outcome = self.run_step(&phase.name, step, ctx, recorder, false).await;
            executed.push(step.label().to_string());

            match outcome {
                StepOutcome::Success { required: true } => last_required_success = Some(true),
                StepOutcome::Success { required: false } | StepOutcome::Skipped => {}
                StepOutcome::Failed { abort: a } => {
                    any_required_failure = true;
                    last_required_success = Some(false);
                    if a {
                        abort = true;
                        break;
                    }
                    if self.config.fail_fast {
                        tracing::warn!(
                            phase = phase.name.as_str(),
                            "fail_fast set; breaking phase loop"
                        );
                        break;
                    }
                    // Otherwise continue: a later step may recover the phase.
                }
            }
        }

        let success = match self.config.phase_success_mode {
            PhaseSuccessMode::Strict => !any_required_failure,
            PhaseSuccessMode::Recover => last_required_success.unwrap_or(true),
        };

        recorder.record_phase(
            &phase.name,
            success,
            phase_start.elapsed().as_millis() as u64,
            executed,
        );
        tracing::info!(phase = phase.name.as_str(), success, "phase finished");
        PhaseOutcome { success, abort }
    }

    async fn run_step(
        &self,
        phase: &str,
        step: &Step,
        ctx: &RunContext,
        recorder: &mut RunRecorder,
        swallow_failures: bool,
    ) -> StepOutcome {
        let label = step.label().to_string();
        ctx.enter_step(&label);
        let required = !step.optional();
        let started_at = Utc::now();
        let step_start = Instant::now();

        let scope = self.scope(ctx);
        let (params_value, result) = match template::resolve_map(&step.params, &scope) {
            Err(e) => (
                Value::Object(step.params.clone()),
                Err(StepError::Action(ActionError::Configuration(e.to_string()))),
            ),
            Ok(resolved) => {
                let params_value = Value::Object(resolved.clone());
                let result = self.run_with_deadline(&step.action, resolved, ctx).await;
                (params_value, result)
            }
        };

        let duration_ms = step_start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => {
                tracing::info!(phase, step = label.as_str(), duration_ms, "step succeeded");
                recorder.record_step(
                    phase,
                    &label,
                    &step.action,
                    StepStatus::Success,
                    params_value,
                    None,
                    started_at,
                    duration_ms,
                );
                ctx.push_history();
                StepOutcome::Success { required }
            }
            Err(err) => {
                let message = err.message();
                ctx.record_error(message.as_str());

                if self.config.screenshot_on_error && !swallow_failures {
                    self.capture_failure_screenshot(&label).await;
                }

                let abort = err.aborts_run();
                if required || abort {
                    tracing::warn!(
                        phase,
                        step = label.as_str(),
                        error = message.as_str(),
                        "step failed"
                    );
                    recorder.record_step(
                        phase,
                        &label,
                        &step.action,
                        StepStatus::Failed,
                        params_value,
                        Some(message.clone()),
                        started_at,
                        duration_ms,
                    );
                    if !swallow_failures {
                        // A lost session is recorded as a synthetic
                        // system-level entry; ordinary failures belong to
                        // their phase.
                        if matches!(err, StepError::SessionGone(_)) {
                            recorder.record_error(PHASE_SYSTEM, &label, &message);
                        } else {
                            recorder.record_error(phase, &label, &message);
                        }
                    }
                    ctx.push_history();
                    StepOutcome::Failed { abort }
                } else {
                    tracing::info!(
                        phase,
                        step = label.as_str(),
                        error = message.as_str(),
                        "optional step failed; skipping"
                    );
                    recorder.record_step(
                        phase,
                        &label,
                        &step.action,
                        StepStatus::Skipped,
                        params_value,
                        Some(message),
                        started_at,
                        duration_ms,
                    );
                    ctx.push_history();
                    StepOutcome::Skipped
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Action dispatch
    // -----------------------------------------------------------------------

    /// Run an action under the per-step deadline. Exceeding the deadline
    /// cancels the pending operation and fails this step only.
    async fn run_with_deadline(
        &self,
        action: &str,
        params: Map<String, Value>,
        ctx: &RunContext,
    ) -> Result<(), StepError> {
        let deadline = Duration::from_millis(self.config.max_step_duration_ms);
        match tokio::time::timeout(deadline, self.dispatch(action.to_string(), params, ctx, 0))
            .await
        {
            Ok(result) => result,
            Err(_) => Err(StepError::Action(ActionError::Timeout {
                action: action.to_string(),
                timeout_ms: self.config.max_step_duration_ms,
            })),
        }
    }

    /// Dispatch one action through the registry. Composite handlers expand
    /// into sub-steps executed inline under the parent step's accounting.
    fn dispatch<'a>(
        &'a self,
        action: String,
        params: Map<String, Value>,
        ctx: &'a RunContext,
        depth: u32,
    ) -> Pin<Box<dyn Future<Output = Result<(), StepError>> + Send + 'a>> {
        Box::pin(async move {
            if depth > MAX_COMPOSITE_DEPTH {
                return Err(StepError::Action(ActionError::Configuration(format!(
                    "composite action '{action}' exceeds nesting depth {MAX_COMPOSITE_DEPTH}"
                ))));
            }

            match self.registry.get(&action) {
                None => Err(StepError::Action(ActionError::Configuration(format!(
                    "unknown action type '{action}'"
                )))),
                Some(ActionHandler::Atomic(atomic)) => {
                    InterruptGuard::check(self.driver.as_ref()).await?;
                    self.run_atomic(*atomic, &action, &params, ctx).await
                }
                Some(ActionHandler::Composite(expand)) => {
                    let sub_steps = expand(&params).map_err(StepError::Action)?;
                    tracing::debug!(
                        action = action.as_str(),
                        sub_steps = sub_steps.len(),
                        "expanding composite action"
                    );
                    for sub in sub_steps {
                        let scope = self.scope(ctx);
                        let resolved = template::resolve_map(&sub.params, &scope)
                            .map_err(|e| ActionError::Configuration(e.to_string()))?;
                        self.dispatch(sub.action, resolved, ctx, depth + 1).await?;
                    }
                    Ok(())
                }
            }
        })
    }

    async fn run_atomic(
        &self,
        atomic: AtomicAction,
        action: &str,
        params: &Map<String, Value>,
        ctx: &RunContext,
    ) -> Result<(), StepError> {
        match atomic {
            AtomicAction::Open => {
                let url = required_str(params, "url", action)?;
                let timeout = optional_u64(params, PARAM_TIMEOUT, action)?
                    .unwrap_or(self.config.max_step_duration_ms);
                match self
                    .driver
                    .navigate(url, Duration::from_millis(timeout))
                    .await
                {
                    Ok(true) => {
                        let current = self
                            .driver
                            .current_url()
                            .await
                            .unwrap_or_else(|_| url.to_string());
                        ctx.set_current_url(current);
                        Ok(())
                    }
                    Ok(false) => Err(StepError::Action(ActionError::System(format!(
                        "navigation to '{url}' did not complete"
                    )))),
                    Err(e) => Err(driver_err(e)),
                }
            }

            AtomicAction::Click => {
                let selector = required_str(params, "selector", action)?;
                let budget = optional_u64(params, PARAM_TIMEOUT, action)?
                    .unwrap_or(self.config.max_wait_for_timeout_ms);
                let matched = selector::locate(
                    self.driver.as_ref(),
                    selector,
                    SelectorOp::Click,
                    Duration::from_millis(budget),
                    Duration::from_millis(self.config.click_poll_interval_ms),
                )
                .await
                .map_err(locate_err)?;
                tracing::debug!(selector = matched.as_str(), "clicked");
                Ok(())
            }

            AtomicAction::Fill => {
                let selector = required_str(params, "selector", action)?;
                let text = match text_param(params, "value", action)? {
                    Some(text) => text,
                    None => text_param(params, "text", action)?.ok_or_else(|| {
                        ActionError::Configuration(format!(
                            "action '{action}' requires parameter 'value'"
                        ))
                    })?,
                };
                let budget = optional_u64(params, PARAM_TIMEOUT, action)?
                    .unwrap_or(self.config.max_wait_for_timeout_ms);
                let matched = selector::locate(
                    self.driver.as_ref(),
                    selector,
                    SelectorOp::Fill { text: &text },
                    Duration::from_millis(budget),
                    Duration::from_millis(self.config.click_poll_interval_ms),
                )
                .await
                .map_err(locate_err)?;
                tracing::debug!(selector = matched.as_str(), chars = text.len(), "filled");
                Ok(())
            }

            AtomicAction::WaitFor => {
                let selector = required_str(params, "selector", action)?;
                let state = match optional_str(params, "state", action)? {
                    None => ElementState::default(),
                    Some(name) => ElementState::parse(name).ok_or_else(|| {
                        ActionError::Configuration(format!(
                            "action '{action}': unknown element state '{name}'"
                        ))
                    })?,
                };
                let attribute = parse_attribute_condition(params, action)?;
                let requested = optional_u64(params, PARAM_TIMEOUT, action)?
                    .unwrap_or(self.config.max_wait_for_timeout_ms);
                let budget = requested.min(self.config.max_wait_for_timeout_ms);
                selector::locate(
                    self.driver.as_ref(),
                    selector,
                    SelectorOp::Wait {
                        state,
                        attribute: attribute.as_ref().map(|(name, value)| AttributeCondition {
                            name: name.as_str(),
                            value: value.as_str(),
                        }),
                    },
                    Duration::from_millis(budget),
                    Duration::from_millis(self.config.wait_poll_interval_ms),
                )
                .await
                .map_err(locate_err)?;
                Ok(())
            }

            AtomicAction::Wait => {
                let ms = match optional_u64(params, "ms", action)? {
                    Some(ms) => ms,
                    None => match optional_u64(params, "seconds", action)? {
                        Some(secs) => secs.saturating_mul(1_000),
                        None => optional_u64(params, PARAM_TIMEOUT, action)?.ok_or_else(|| {
                            ActionError::Configuration(format!(
                                "action '{action}' requires 'ms' or 'seconds'"
                            ))
                        })?,
                    },
                };
                tokio::time::sleep(Duration::from_millis(ms)).await;
                Ok(())
            }

            AtomicAction::Screenshot => {
                let full_page = optional_bool(params, "full_page", action)?.unwrap_or(false);
                let timeout = optional_u64(params, PARAM_TIMEOUT, action)?.unwrap_or(10_000);
                let path = match optional_str(params, "path", action)? {
                    Some(p) => PathBuf::from(p),
                    None => self.config.screenshot_dir.join(format!(
                        "shot-{}.png",
                        Utc::now().format("%Y%m%dT%H%M%S%3f")
                    )),
                };
                match self
                    .driver
                    .screenshot(&path, Duration::from_millis(timeout), full_page)
                    .await
                {
                    Ok(true) => {
                        ctx.set_state("last_screenshot", json!(path.display().to_string()));
                        Ok(())
                    }
                    Ok(false) => Err(StepError::Action(ActionError::System(
                        "screenshot capture did not complete".to_string(),
                    ))),
                    Err(e) => Err(driver_err(e)),
                }
            }
        }
    }

    /// Best-effort failure screenshot; a capture problem is never fatal.
    async fn capture_failure_screenshot(&self, label: &str) {
        let sanitized: String = label
            .chars()
            .map(|c| if c.is_alphanumeric() { c } else { '-' })
            .collect();
        let path = self.config.screenshot_dir.join(format!(
            "failure-{sanitized}-{}.png",
            Utc::now().format("%Y%m%dT%H%M%S%3f")
        ));
        let capture = self
            .driver
            .screenshot(&path, FAILURE_SCREENSHOT_TIMEOUT, true);
        match tokio::time::timeout(FAILURE_SCREENSHOT_TIMEOUT, capture).await {
            Ok(Ok(true)) => {
                tracing::info!(path = %path.display(), "captured failure screenshot");
            }
            _ => {
                tracing::warn!(path = %path.display(), "failure screenshot capture failed");
            }
        }
    }

    /// Layered template scope for one resolution: caller-provided layers
    /// first (run config, locator aliases), run-time values last.
    fn scope(&self, ctx: &RunContext) -> TemplateScope {
        let mut scope = TemplateScope::new();
        for layer in &self.template_layers {
            scope.push_layer(layer.clone());
        }
        let snap = ctx.snapshot();
        scope.push_layer(json!({
            "run": {
                "workflow": snap.workflow_name,
                "timestamp": Utc::now().format("%Y%m%dT%H%M%SZ").to_string(),
                "url": snap.current_url,
            },
            "state": ctx.state_value(),
        }));
        scope
    }
}

fn parse_attribute_condition(
    params: &Map<String, Value>,
    action: &str,
) -> Result<Option<(String, String)>, ActionError> {
    match params.get("attribute") {
        None => Ok(None),
        Some(Value::Object(obj)) => {
            let name = obj.get("name").and_then(Value::as_str).ok_or_else(|| {
                ActionError::Configuration(format!(
                    "action '{action}': attribute condition requires a string 'name'"
                ))
            })?;
            let value = obj.get("value").and_then(Value::as_str).ok_or_else(|| {
                ActionError::Configuration(format!(
                    "action '{action}': attribute condition requires a string 'value'"
                ))
            })?;
            Ok(Some((name.to_string(), value.to_string())))
        }
        Some(_) => Err(ActionError::Configuration(format!(
            "action '{action}': 'attribute' must be a mapping with 'name' and 'value'"
        ))),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::AuthIssue;
    use crate::engine::definition::parse_workflow_yaml;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::HashSet;
    use std::path::Path;
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Scripted driver: selectors listed in `missing` block for the full
    /// timeout and miss; everything else matches immediately. Every
    /// operation is appended to `ops`.
    #[derive(Default)]
    struct ScriptedDriver {
        missing: HashSet<String>,
        session_lost: AtomicBool,
        ops: Mutex<Vec<String>>,
        url: Mutex<String>,
    }

    impl ScriptedDriver {
        fn with_missing(selectors: &[&str]) -> Self {
            Self {
                missing: selectors.iter().map(|s| s.to_string()).collect(),
                ..Self::default()
            }
        }

        fn ops(&self) -> Vec<String> {
            self.ops.lock().clone()
        }

        fn log(&self, entry: String) {
            self.ops.lock().push(entry);
        }

        async fn probe(
            &self,
            op: &str,
            selector: &str,
            timeout: Duration,
        ) -> Result<bool, DriverError> {
            self.log(format!("{op} {selector}"));
            if self.session_lost.load(Ordering::SeqCst) {
                return Err(DriverError::SessionLost("browser gone".to_string()));
            }
            if self.missing.contains(selector) {
                tokio::time::sleep(timeout).await;
                Ok(false)
            } else {
                Ok(true)
            }
        }
    }

    #[async_trait]
    impl UiDriver for ScriptedDriver {
        async fn navigate(&self, url: &str, _: Duration) -> Result<bool, DriverError> {
            self.log(format!("open {url}"));
            if self.session_lost.load(Ordering::SeqCst) {
                return Err(DriverError::SessionLost("browser gone".to_string()));
            }
            *self.url.lock() = url.to_string();
            Ok(true)
        }
        async fn wait_for_selector(
            &self,
            selector: &str,
            _: ElementState,
            timeout: Duration,
        ) -> Result<bool, DriverError> {
            self.probe("wait_for", selector, timeout).await
        }
        async fn click(&self, selector: &str, timeout: Duration) -> Result<bool, DriverError> {
            self.probe("click", selector, timeout).await
        }
        async fn fill(
            &self,
            selector: &str,
            _: &str,
            timeout: Duration,
        ) -> Result<bool, DriverError> {
            self.probe("fill", selector, timeout).await
        }
        async fn screenshot(
            &self,
            path: &Path,
            _: Duration,
            _: bool,
        ) -> Result<bool, DriverError> {
            self.log(format!("screenshot {}", path.display()));
            Ok(true)
        }
        async fn attribute_value(
            &self,
            _: &str,
            _: &str,
            _: Duration,
        ) -> Result<Option<String>, DriverError> {
            Ok(None)
        }
        async fn current_url(&self) -> Result<String, DriverError> {
            Ok(self.url.lock().clone())
        }
        fn auth_issue(&self) -> Option<AuthIssue> {
            None
        }
        async fn refresh_auth_if_changed(&self) -> Result<bool, DriverError> {
            Ok(false)
        }
    }

    /// Short budgets so missing selectors fail quickly under paused time.
    fn quick_config() -> EngineConfig {
        EngineConfig {
            max_wait_for_timeout_ms: 400,
            max_step_duration_ms: 2_000,
            screenshot_on_error: false,
            ..EngineConfig::default()
        }
    }

    fn engine_with(driver: Arc<ScriptedDriver>, config: EngineConfig) -> WorkflowEngine {
        WorkflowEngine::new(driver, config)
    }

    fn wf(yaml: &str) -> Workflow {
        parse_workflow_yaml(yaml).expect("test workflow should parse")
    }

    // -----------------------------------------------------------------------
    // Phase success policy
    // -----------------------------------------------------------------------

    const FLAKY_PHASE: &str = r##"
workflow:
  name: flaky
  phases:
    - name: checkout
      steps:
        - click: { selector: "#dead" }
        - click: { selector: "#ok" }
"##;

    #[tokio::test(start_paused = true)]
    async fn test_recover_mode_later_success_overrides_failure() {
        let driver = Arc::new(ScriptedDriver::with_missing(&["#dead"]));
        let engine = engine_with(Arc::clone(&driver), quick_config());

        let result = engine.execute_workflow(&wf(FLAKY_PHASE)).await;

        assert!(result.overall_success);
        assert_eq!(result.phase_results.len(), 1);
        assert!(result.phase_results[0].success);
        assert_eq!(result.execution_history.len(), 2);
        assert_eq!(result.execution_history[0].status, StepStatus::Failed);
        assert_eq!(result.execution_history[1].status, StepStatus::Success);
        // The required failure is still in the error history
        assert_eq!(result.error_history.len(), 1);
        assert_eq!(result.error_history[0].phase, "checkout");
    }

    #[tokio::test(start_paused = true)]
    async fn test_strict_mode_any_required_failure_fails_phase() {
        let driver = Arc::new(ScriptedDriver::with_missing(&["#dead"]));
        let config = EngineConfig {
            phase_success_mode: PhaseSuccessMode::Strict,
            ..quick_config()
        };
        let engine = engine_with(driver, config);

        let result = engine.execute_workflow(&wf(FLAKY_PHASE)).await;

        assert!(!result.overall_success);
        assert!(!result.phase_results[0].success);
        // Both steps were still attempted
        assert_eq!(result.execution_history.len(), 2);
    }

    // -----------------------------------------------------------------------
    // Optional steps
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_optional_failure_is_skipped_and_neutral() {
        let driver = Arc::new(ScriptedDriver::with_missing(&["#banner"]));
        let engine = engine_with(driver, quick_config());

        let result = engine
            .execute_workflow(&wf(r##"
workflow:
  name: optional-demo
  phases:
    - name: landing
      steps:
        - wait_for: { selector: "#banner", optional: true }
        - click: { selector: "#ok" }
"##))
            .await;

        assert!(result.overall_success);
        assert!(result.phase_results[0].success);
        assert_eq!(result.execution_history[0].status, StepStatus::Skipped);
        assert!(result.execution_history[0].error.is_some());
        assert_eq!(result.execution_history[1].status, StepStatus::Success);
        assert!(result.error_history.is_empty());
    }

    // -----------------------------------------------------------------------
    // Suite setup and error recovery
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_suite_setup_failure_runs_recovery_and_skips_phases() {
        let driver = Arc::new(ScriptedDriver::with_missing(&["#login"]));
        let engine = engine_with(Arc::clone(&driver), quick_config());

        let result = engine
            .execute_workflow(&wf(r##"
workflow:
  name: setup-fails
  suite_setup:
    - click: { selector: "#login" }
  error_recovery:
    - screenshot: { path: "/tmp/recovery.png" }
  phases:
    - name: never-runs
      steps:
        - click: { selector: "#ok" }
"##))
            .await;

        assert!(!result.overall_success);
        assert!(result.phase_results.is_empty(), "zero phases executed");
        assert_eq!(result.error_history.len(), 1);
        assert_eq!(result.error_history[0].phase, PHASE_SUITE_SETUP);

        // Recovery ran exactly once, and the phase step never did
        let ops = driver.ops();
        assert!(ops.contains(&"screenshot /tmp/recovery.png".to_string()));
        assert!(!ops.contains(&"click #ok".to_string()));

        // Setup and recovery attempts are both in the history
        let phases: Vec<_> = result
            .execution_history
            .iter()
            .map(|r| r.phase.as_str())
            .collect();
        assert_eq!(phases, vec![PHASE_SUITE_SETUP, PHASE_ERROR_RECOVERY]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovery_failures_are_swallowed_and_unrecorded() {
        let driver = Arc::new(ScriptedDriver::with_missing(&["#dead", "#recover"]));
        let engine = engine_with(driver, quick_config());

        let result = engine
            .execute_workflow(&wf(r##"
workflow:
  name: recovery-fails-too
  error_recovery:
    - click: { selector: "#recover" }
  phases:
    - name: broken
      steps:
        - click: { selector: "#dead" }
"##))
            .await;

        assert!(!result.overall_success);
        // Only the original phase failure is in the error history; the
        // recovery step's own failure is swallowed.
        assert_eq!(result.error_history.len(), 1);
        assert_eq!(result.error_history[0].phase, "broken");
        // But the recovery attempt is still visible in the history
        assert!(
            result
                .execution_history
                .iter()
                .any(|r| r.phase == PHASE_ERROR_RECOVERY && r.status == StepStatus::Failed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_all_phases_green_skips_recovery() {
        let driver = Arc::new(ScriptedDriver::default());
        let engine = engine_with(Arc::clone(&driver), quick_config());

        let result = engine
            .execute_workflow(&wf(r##"
workflow:
  name: green
  error_recovery:
    - screenshot: { path: "/tmp/never.png" }
  phases:
    - name: fine
      steps:
        - click: { selector: "#ok" }
"##))
            .await;

        assert!(result.overall_success);
        assert!(!driver.ops().contains(&"screenshot /tmp/never.png".to_string()));
    }

    // -----------------------------------------------------------------------
    // Fail-fast and phase isolation
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_breaks_phase_loop() {
        let driver = Arc::new(ScriptedDriver::with_missing(&["#dead"]));
        let config = EngineConfig {
            fail_fast: true,
            ..quick_config()
        };
        let engine = engine_with(driver, config);

        let result = engine.execute_workflow(&wf(FLAKY_PHASE)).await;

        // Second step never attempted, so recover mode cannot save the phase
        assert_eq!(result.execution_history.len(), 1);
        assert!(!result.phase_results[0].success);
        assert!(!result.overall_success);
    }

    const TWO_PHASES: &str = r##"
workflow:
  name: two-phases
  phases:
    - name: first
      steps:
        - click: { selector: "#dead" }
    - name: second
      steps:
        - click: { selector: "#ok" }
"##;

    #[tokio::test(start_paused = true)]
    async fn test_phase_failure_does_not_stop_later_phases_by_default() {
        let driver = Arc::new(ScriptedDriver::with_missing(&["#dead"]));
        let engine = engine_with(driver, quick_config());

        let result = engine.execute_workflow(&wf(TWO_PHASES)).await;

        assert_eq!(result.phase_results.len(), 2);
        assert!(!result.phase_results[0].success);
        assert!(result.phase_results[1].success);
        assert!(!result.overall_success, "one failed phase fails the run");
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_on_phase_failure_halts_the_run() {
        let driver = Arc::new(ScriptedDriver::with_missing(&["#dead"]));
        let config = EngineConfig {
            stop_on_phase_failure: true,
            ..quick_config()
        };
        let engine = engine_with(driver, config);

        let result = engine.execute_workflow(&wf(TWO_PHASES)).await;

        assert_eq!(result.phase_results.len(), 1);
        assert!(!result.overall_success);
    }

    // -----------------------------------------------------------------------
    // Deadlines
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_step_deadline_fails_that_step_only() {
        let driver = Arc::new(ScriptedDriver::default());
        let engine = engine_with(driver, quick_config());

        let result = engine
            .execute_workflow(&wf(r##"
workflow:
  name: slow-step
  phases:
    - name: p
      steps:
        - wait: { ms: 60000 }
        - click: { selector: "#ok" }
"##))
            .await;

        let timed_out = &result.execution_history[0];
        assert_eq!(timed_out.status, StepStatus::Failed);
        assert!(timed_out.error.as_deref().unwrap_or("").contains("timed out"));
        assert!(timed_out.duration_ms >= 2_000);
        // The phase carried on and recovered
        assert_eq!(result.execution_history[1].status, StepStatus::Success);
        assert!(result.phase_results[0].success);
        assert!(result.overall_success);
    }

    // -----------------------------------------------------------------------
    // Configuration errors abort the run
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_unknown_action_aborts_remaining_phases() {
        let driver = Arc::new(ScriptedDriver::default());
        let engine = engine_with(Arc::clone(&driver), quick_config());

        let result = engine
            .execute_workflow(&wf(r##"
workflow:
  name: bad-action
  phases:
    - name: broken
      steps:
        - transmogrify: { target: "#x" }
    - name: never-runs
      steps:
        - click: { selector: "#ok" }
"##))
            .await;

        assert!(!result.overall_success);
        assert_eq!(result.phase_results.len(), 1);
        assert!(
            result.error_history[0]
                .error
                .contains("unknown action type 'transmogrify'")
        );
        assert!(!driver.ops().contains(&"click #ok".to_string()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresolved_placeholder_aborts_the_run() {
        let driver = Arc::new(ScriptedDriver::default());
        let engine = engine_with(driver, quick_config());

        let result = engine
            .execute_workflow(&wf(r##"
workflow:
  name: missing-var
  phases:
    - name: broken
      steps:
        - click: { selector: "${selectors.nope}" }
    - name: never-runs
      steps:
        - click: { selector: "#ok" }
"##))
            .await;

        assert!(!result.overall_success);
        assert_eq!(result.phase_results.len(), 1);
        assert!(
            result.error_history[0]
                .error
                .contains("unresolved template variable")
        );
        assert_eq!(
            result.final_context.last_error.as_deref().map(|e| e.contains("selectors.nope")),
            Some(true)
        );
    }

    // -----------------------------------------------------------------------
    // Template layers
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_template_layers_resolve_selectors_and_numbers() {
        let driver = Arc::new(ScriptedDriver::default());
        let mut engine = engine_with(Arc::clone(&driver), quick_config());
        engine.add_template_layer(json!({
            "config": { "base_url": "https://shop.example", "wait_ms": 300 },
            "selectors": { "go": "#go-button" },
        }));

        let result = engine
            .execute_workflow(&wf(r##"
workflow:
  name: templated
  phases:
    - name: p
      steps:
        - open: { url: "${config.base_url}/cart" }
        - click: { selector: "${selectors.go}", timeout: "${config.wait_ms}" }
"##))
            .await;

        assert!(result.overall_success);
        let ops = driver.ops();
        assert!(ops.contains(&"open https://shop.example/cart".to_string()));
        assert!(ops.contains(&"click #go-button".to_string()));
        // Recorded params carry the resolved values, numeric type preserved
        assert_eq!(result.execution_history[1].params["timeout"], json!(300));
        assert_eq!(
            result.final_context.current_url.as_deref(),
            Some("https://shop.example/cart")
        );
    }

    // -----------------------------------------------------------------------
    // Composite actions
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_composite_action_expands_inline() {
        let driver = Arc::new(ScriptedDriver::default());
        let mut engine = engine_with(Arc::clone(&driver), quick_config());
        engine.registry_mut().register_composite("login", |params| {
            let url = required_str(params, "url", "login")?.to_string();
            let user = required_str(params, "user", "login")?.to_string();
            let obj = |v: Value| v.as_object().cloned().unwrap_or_default();
            Ok(vec![
                Step::new("open", obj(json!({ "url": url }))),
                Step::new("fill", obj(json!({ "selector": "#user", "value": user }))),
                Step::new("click", obj(json!({ "selector": "#submit" }))),
            ])
        });

        let result = engine
            .execute_workflow(&wf(r##"
workflow:
  name: composite
  phases:
    - name: auth
      steps:
        - login: { url: "https://shop.example/login", user: admin }
"##))
            .await;

        assert!(result.overall_success);
        assert_eq!(
            driver.ops(),
            vec![
                "open https://shop.example/login",
                "fill #user",
                "click #submit",
            ]
        );
        // One parent record, sub-steps run under its accounting
        assert_eq!(result.execution_history.len(), 1);
        assert_eq!(result.execution_history[0].action, "login");
    }

    // -----------------------------------------------------------------------
    // Session loss
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_session_loss_records_system_error_and_aborts() {
        let driver = Arc::new(ScriptedDriver::default());
        driver.session_lost.store(true, Ordering::SeqCst);
        let engine = engine_with(driver, quick_config());

        let result = engine.execute_workflow(&wf(TWO_PHASES)).await;

        assert!(!result.overall_success);
        assert_eq!(result.phase_results.len(), 1, "run aborted after first phase");
        assert_eq!(result.error_history.len(), 1);
        assert_eq!(result.error_history[0].phase, PHASE_SYSTEM);
        assert!(result.error_history[0].error.contains("session lost"));
    }

    // -----------------------------------------------------------------------
    // Failure screenshots
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_failure_screenshot_is_captured_when_enabled() {
        let driver = Arc::new(ScriptedDriver::with_missing(&["#dead"]));
        let config = EngineConfig {
            screenshot_on_error: true,
            screenshot_dir: PathBuf::from("/tmp/shots"),
            ..quick_config()
        };
        let engine = engine_with(Arc::clone(&driver), config);

        let result = engine
            .execute_workflow(&wf(r##"
workflow:
  name: shot-on-fail
  phases:
    - name: p
      steps:
        - click: { selector: "#dead" }
"##))
            .await;

        assert!(!result.overall_success);
        assert!(
            driver
                .ops()
                .iter()
                .any(|op| op.starts_with("screenshot /tmp/shots/failure-click-")),
            "expected a failure screenshot, ops: {:?}",
            driver.ops()
        );
    }

    // -----------------------------------------------------------------------
    // History invariants
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_history_covers_every_attempt_in_order() {
        let driver = Arc::new(ScriptedDriver::with_missing(&["#dead", "#banner"]));
        let engine = engine_with(driver, quick_config());

        let result = engine
            .execute_workflow(&wf(r##"
workflow:
  name: history
  suite_setup:
    - open: { url: "https://shop.example" }
  phases:
    - name: p
      steps:
        - wait_for: { selector: "#banner", optional: true }
        - click: { selector: "#dead" }
        - click: { selector: "#ok" }
"##))
            .await;

        // 1 setup + 3 phase steps, every attempt recorded
        assert_eq!(result.execution_history.len(), 4);
        let attempted: usize = result
            .phase_results
            .iter()
            .map(|p| p.executed_steps.len())
            .sum::<usize>()
            + 1; // suite setup step
        assert!(result.execution_history.len() >= attempted);
        for pair in result.execution_history.windows(2) {
            assert!(pair[0].started_at <= pair[1].started_at, "history reordered");
        }
        assert_eq!(
            result.phase_results[0].executed_steps,
            vec!["wait_for", "click", "click"]
        );
    }

    // -----------------------------------------------------------------------
    // Single actions
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_execute_single_action_success() {
        let driver = Arc::new(ScriptedDriver::default());
        let engine = engine_with(driver, quick_config());

        let params = json!({ "selector": "#ok" }).as_object().cloned().unwrap();
        let result = engine.execute_single_action("click", params).await;

        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.context.current_step.as_deref(), Some("click"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_execute_single_action_failure_carries_error() {
        let driver = Arc::new(ScriptedDriver::with_missing(&["#dead"]));
        let engine = engine_with(driver, quick_config());

        let params = json!({ "selector": "#dead" }).as_object().cloned().unwrap();
        let result = engine.execute_single_action("click", params).await;

        assert!(!result.success);
        assert!(result.error.as_deref().unwrap_or("").contains("no selector matched"));
        assert_eq!(result.context.last_error, result.error);
    }

    // -----------------------------------------------------------------------
    // Cancellation
    // -----------------------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn test_cancel_is_observed_between_steps() {
        let driver = Arc::new(ScriptedDriver::default());
        let engine = Arc::new(engine_with(driver, quick_config()));

        let workflow = wf(r##"
workflow:
  name: cancellable
  phases:
    - name: p
      steps:
        - wait: { ms: 1000 }
        - click: { selector: "#after" }
    - name: q
      steps:
        - click: { selector: "#later" }
"##);

        let task_engine = Arc::clone(&engine);
        let handle =
            tokio::spawn(async move { task_engine.execute_workflow(&workflow).await });

        // Wait for the run to register, then request a stop while the first
        // step is still sleeping.
        loop {
            let runs = engine.active_runs();
            if let Some(run_id) = runs.first() {
                assert!(engine.cancel(*run_id));
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        let result = handle.await.expect("run task panicked");
        // The in-flight step ran to completion; everything after was skipped.
        assert_eq!(result.execution_history.len(), 1);
        assert_eq!(result.phase_results.len(), 1);
        assert_eq!(result.final_context.last_error.as_deref(), Some("stop requested"));
        assert!(engine.active_runs().is_empty());
    }

    #[tokio::test]
    async fn test_cancel_unknown_run_is_a_noop() {
        let driver = Arc::new(ScriptedDriver::default());
        let engine = engine_with(driver, quick_config());
        assert!(!engine.cancel(Uuid::now_v7()));
    }
}

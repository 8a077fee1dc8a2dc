//! Engine configuration for uipilot.
//!
//! `EngineConfig` controls timing budgets and failure policy for workflow
//! execution. Loaded from a TOML file or constructed programmatically; all
//! fields have sensible defaults.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Phase success policy
// ---------------------------------------------------------------------------

/// Policy governing how required-step failures determine a phase's outcome.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseSuccessMode {
    /// The phase fails if any required step failed, regardless of later
    /// successes.
    Strict,
    /// The outcome of the last required step that was attempted wins; a later
    /// success can override an earlier failure.
    #[default]
    Recover,
}

// ---------------------------------------------------------------------------
// EngineConfig
// ---------------------------------------------------------------------------

/// Timing budgets and failure policy for the execution engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Cap on any single element-wait budget.
    #[serde(default = "default_max_wait_for_timeout_ms")]
    pub max_wait_for_timeout_ms: u64,

    /// Per-step deadline; exceeding it fails that step only, not the run.
    #[serde(default = "default_max_step_duration_ms")]
    pub max_step_duration_ms: u64,

    /// Break the phase loop on the first required-step failure.
    #[serde(default)]
    pub fail_fast: bool,

    /// Phase success policy (`strict` or `recover`).
    #[serde(default)]
    pub phase_success_mode: PhaseSuccessMode,

    /// Stop executing further phases once one phase has failed.
    #[serde(default)]
    pub stop_on_phase_failure: bool,

    /// Poll quantum for element waits; the budget one polling round may
    /// spend across all selector candidates.
    #[serde(default = "default_poll_interval_ms")]
    pub wait_poll_interval_ms: u64,

    /// Poll quantum for click and fill attempts.
    #[serde(default = "default_poll_interval_ms")]
    pub click_poll_interval_ms: u64,

    /// Capture a best-effort screenshot when a step fails.
    #[serde(default = "default_screenshot_on_error")]
    pub screenshot_on_error: bool,

    /// Directory for failure screenshots.
    #[serde(default = "default_screenshot_dir")]
    pub screenshot_dir: PathBuf,
}

fn default_max_wait_for_timeout_ms() -> u64 {
    10_000
}

fn default_max_step_duration_ms() -> u64 {
    30_000
}

fn default_poll_interval_ms() -> u64 {
    2_000
}

fn default_screenshot_on_error() -> bool {
    true
}

fn default_screenshot_dir() -> PathBuf {
    PathBuf::from("screenshots")
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_wait_for_timeout_ms: default_max_wait_for_timeout_ms(),
            max_step_duration_ms: default_max_step_duration_ms(),
            fail_fast: false,
            phase_success_mode: PhaseSuccessMode::default(),
            stop_on_phase_failure: false,
            wait_poll_interval_ms: default_poll_interval_ms(),
            click_poll_interval_ms: default_poll_interval_ms(),
            screenshot_on_error: default_screenshot_on_error(),
            screenshot_dir: default_screenshot_dir(),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Fairness-preserving timeout-budget allocation across selector candidates.
//!
//! A selector expression may encode several comma-separated alternative
//! locators for the same logical target. Trying each candidate sequentially
//! with the full timeout would let the first failing candidate exhaust the
//! entire budget and starve the rest; instead the budget is chunked into
//! round-robin slices so every candidate is attempted in every round while
//! budget remains.

use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;

use crate::driver::{DriverError, ElementState, UiDriver};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Floor for one candidate's attempt slice.
pub const MIN_SLICE: Duration = Duration::from_millis(250);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Why a locate call failed.
///
/// Ordinary backend hiccups are treated as candidate misses; only a lost
/// session aborts the polling loop, since no candidate can ever match on a
/// dead session.
#[derive(Debug, Error)]
pub enum LocateError {
    /// Every candidate failed within the allotted budget.
    #[error("no selector matched within {budget_ms}ms (candidates tried: {candidates})")]
    Exhausted { candidates: String, budget_ms: u64 },

    /// The selector expression held no usable candidate.
    #[error("selector expression is empty")]
    EmptyExpression,

    /// The backend session is gone.
    #[error("backend session lost: {0}")]
    SessionLost(String),
}

// ---------------------------------------------------------------------------
// Operations
// ---------------------------------------------------------------------------

/// Attribute condition checked once a structural match is found.
#[derive(Debug, Clone, Copy)]
pub struct AttributeCondition<'a> {
    pub name: &'a str,
    pub value: &'a str,
}

/// The backend operation a `locate` call performs per candidate.
#[derive(Debug, Clone, Copy)]
pub enum SelectorOp<'a> {
    /// Wait for the element to reach `state`; optionally require an
    /// attribute value afterwards, with its own timeout slice.
    Wait {
        state: ElementState,
        attribute: Option<AttributeCondition<'a>>,
    },
    Click,
    Fill { text: &'a str },
}

impl SelectorOp<'_> {
    fn describe(&self) -> &'static str {
        match self {
            SelectorOp::Wait { .. } => "wait",
            SelectorOp::Click => "click",
            SelectorOp::Fill { .. } => "fill",
        }
    }
}

// ---------------------------------------------------------------------------
// locate
// ---------------------------------------------------------------------------

/// Resolve a selector expression against the driver, returning the candidate
/// that matched.
///
/// With a single candidate, or a budget no larger than one poll quantum, each
/// candidate gets one attempt with the remaining budget. Otherwise candidates
/// are polled round-robin with `max(250ms, quantum / N)` slices until the
/// budget is exhausted. Failing fast does not shorten a slice: the unused
/// remainder is slept out so rounds pace predictably instead of busy-looping.
pub async fn locate(
    driver: &dyn UiDriver,
    selector_expr: &str,
    op: SelectorOp<'_>,
    total_budget: Duration,
    poll_quantum: Duration,
) -> Result<String, LocateError> {
    let candidates: Vec<&str> = selector_expr
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if candidates.is_empty() {
        return Err(LocateError::EmptyExpression);
    }

    let deadline = Instant::now() + total_budget;
    let n = candidates.len();

    tracing::debug!(
        op = op.describe(),
        candidates = n,
        budget_ms = total_budget.as_millis() as u64,
        "locating element"
    );

    if n == 1 || total_budget <= poll_quantum {
        // Single shot per candidate with whatever budget remains.
        for candidate in &candidates {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            if attempt(driver, candidate, &op, remaining, deadline).await? {
                return Ok((*candidate).to_string());
            }
        }
    } else {
        let per_slice = std::cmp::max(MIN_SLICE, poll_quantum / n as u32);
        'rounds: loop {
            for candidate in &candidates {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    break 'rounds;
                }
                let slice = remaining.min(per_slice);
                let attempt_start = Instant::now();
                if attempt(driver, candidate, &op, slice, deadline).await? {
                    return Ok((*candidate).to_string());
                }
                let spent = attempt_start.elapsed();
                if spent < slice {
                    tokio::time::sleep(slice - spent).await;
                }
            }
        }
    }

    Err(LocateError::Exhausted {
        candidates: candidates.join(", "),
        budget_ms: total_budget.as_millis() as u64,
    })
}

/// One attempt of `op` against one candidate. Ordinary driver errors count
/// as a non-match; a lost session propagates.
async fn attempt(
    driver: &dyn UiDriver,
    selector: &str,
    op: &SelectorOp<'_>,
    slice: Duration,
    deadline: Instant,
) -> Result<bool, LocateError> {
    let outcome = match op {
        SelectorOp::Wait { state, attribute } => {
            match driver.wait_for_selector(selector, *state, slice).await {
                Ok(true) => match attribute {
                    None => Ok(true),
                    Some(cond) => check_attribute(driver, selector, cond, slice, deadline).await,
                },
                other => other,
            }
        }
        SelectorOp::Click => driver.click(selector, slice).await,
        SelectorOp::Fill { text } => driver.fill(selector, text, slice).await,
    };

    match outcome {
        Ok(matched) => Ok(matched),
        Err(DriverError::SessionLost(m)) => Err(LocateError::SessionLost(m)),
        Err(e) => {
            tracing::debug!(selector, error = %e, "candidate attempt failed");
            Ok(false)
        }
    }
}

/// Attribute check after a structural match, on its own slice capped by the
/// overall deadline.
async fn check_attribute(
    driver: &dyn UiDriver,
    selector: &str,
    cond: &AttributeCondition<'_>,
    slice: Duration,
    deadline: Instant,
) -> Result<bool, DriverError> {
    let remaining = deadline.saturating_duration_since(Instant::now());
    if remaining.is_zero() {
        return Ok(false);
    }
    let attr_slice = remaining.min(slice);
    let actual = driver
        .attribute_value(selector, cond.name, attr_slice)
        .await?;
    Ok(actual.as_deref() == Some(cond.value))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! Mutable run context with bounded snapshot history.
//!
//! One execution loop exclusively owns the writer side of a `RunContext`;
//! snapshots cross component boundaries (reports, debugging), so reads are
//! guarded even in the single-writer design. The lock is never held across
//! an await point.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{Map, Value};

use uipilot_types::result::ContextSnapshot;

/// Bound on the debugging history; the oldest snapshot is evicted past it.
pub const HISTORY_CAP: usize = 100;

#[derive(Debug)]
struct ContextInner {
    workflow_name: String,
    current_phase: Option<String>,
    current_step: Option<String>,
    current_url: Option<String>,
    last_error: Option<String>,
    state: Map<String, Value>,
    history: VecDeque<ContextSnapshot>,
}

impl ContextInner {
    fn snapshot(&self) -> ContextSnapshot {
        ContextSnapshot {
            workflow_name: self.workflow_name.clone(),
            current_phase: self.current_phase.clone(),
            current_step: self.current_step.clone(),
            current_url: self.current_url.clone(),
            last_error: self.last_error.clone(),
            state: self.state.clone(),
            captured_at: Utc::now(),
        }
    }
}

/// Run-time state for one workflow execution.
///
/// Cloning shares the underlying state; report consumers holding a clone see
/// consistent snapshots while the owning run keeps writing.
#[derive(Debug, Clone)]
pub struct RunContext {
    inner: Arc<RwLock<ContextInner>>,
}

impl RunContext {
    pub fn new(workflow_name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(ContextInner {
                workflow_name: workflow_name.into(),
                current_phase: None,
                current_step: None,
                current_url: None,
                last_error: None,
                state: Map::new(),
                history: VecDeque::new(),
            })),
        }
    }

    /// Mark a phase as current; clears the current step.
    pub fn enter_phase(&self, name: &str) {
        let mut inner = self.inner.write();
        inner.current_phase = Some(name.to_string());
        inner.current_step = None;
    }

    /// Mark a step as current.
    pub fn enter_step(&self, name: &str) {
        self.inner.write().current_step = Some(name.to_string());
    }

    pub fn set_current_url(&self, url: impl Into<String>) {
        self.inner.write().current_url = Some(url.into());
    }

    pub fn record_error(&self, message: impl Into<String>) {
        self.inner.write().last_error = Some(message.into());
    }

    /// Store a generic state value (exposed to templates as `${state.<key>}`).
    pub fn set_state(&self, key: impl Into<String>, value: Value) {
        self.inner.write().state.insert(key.into(), value);
    }

    pub fn get_state(&self, key: &str) -> Option<Value> {
        self.inner.read().state.get(key).cloned()
    }

    /// The full state map as a JSON object, for template scope layering.
    pub fn state_value(&self) -> Value {
        Value::Object(self.inner.read().state.clone())
    }

    /// Atomic point-in-time copy of the context.
    pub fn snapshot(&self) -> ContextSnapshot {
        self.inner.read().snapshot()
    }

    /// Append the current state to the bounded debugging history.
    pub fn push_history(&self) {
        let mut inner = self.inner.write();
        let snap = inner.snapshot();
        inner.history.push_back(snap);
        while inner.history.len() > HISTORY_CAP {
            inner.history.pop_front();
        }
    }

    pub fn history(&self) -> Vec<ContextSnapshot> {
        self.inner.read().history.iter().cloned().collect()
    }

    /// Overwrite the live fields from an earlier snapshot. The history is
    /// left untouched so the restore itself remains traceable.
    pub fn restore(&self, snap: &ContextSnapshot) {
        let mut inner = self.inner.write();
        inner.current_phase = snap.current_phase.clone();
        inner.current_step = snap.current_step.clone();
        inner.current_url = snap.current_url.clone();
        inner.last_error = snap.last_error.clone();
        inner.state = snap.state.clone();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

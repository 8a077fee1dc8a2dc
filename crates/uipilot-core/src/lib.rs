//! Execution engine for uipilot.
//!
//! Interprets a hierarchical workflow specification (Workflow -> Phase ->
//! Step) against a remote UI-automation backend, enforcing timeouts,
//! retry/recovery policy, and multi-candidate element resolution. The
//! concrete browser binding implements the `driver::UiDriver` trait; this
//! crate decides what to run, for how long, and what counts as success.

pub mod driver;
pub mod engine;

pub use driver::{DryRunDriver, UiDriver};
pub use engine::executor::WorkflowEngine;

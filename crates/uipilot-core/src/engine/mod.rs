//! Workflow engine core: DSL parsing, templating, element resolution, and
//! the execution state machine.
//!
//! - `definition` -- YAML parsing, validation, filesystem load/save
//! - `template` -- `${dotted.path}` resolution over the generic value tree
//! - `selector` -- fairness-preserving candidate polling
//! - `context` -- mutable run context with bounded snapshot history
//! - `actions` -- static action registry and parameter extraction
//! - `guard` -- pre-action auth/interrupt check
//! - `recorder` -- result aggregation into `ExecutionResult`
//! - `executor` -- the workflow/phase/step state machine

pub mod actions;
pub mod context;
pub mod definition;
pub mod executor;
pub mod guard;
pub mod recorder;
pub mod selector;
pub mod template;

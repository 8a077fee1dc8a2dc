//! Shared domain types for uipilot.
//!
//! This crate contains the core domain types used across the uipilot
//! workspace: the workflow DSL data model, execution result records, engine
//! configuration, and their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod config;
pub mod error;
pub mod result;
pub mod workflow;

// Workflow subsystem: state-machine engine over a persisted store

//! # Workflow Subsystem
//!
//! - [`store`] defines the [`store::WorkflowStore`] contract (optimistic
//!   locking, tenant scoping, append-only events) and ships the in-memory
//!   implementation used by tests and development
//! - [`postgres`] is the durable store
//! - [`condition`] is the two-operator condition DSL used on transitions
//! - [`engine`] executes definitions: start, advance, auto-chains, cancel,
//!   timeouts

pub mod condition;
pub mod engine;
pub mod postgres;
pub mod store;

// Workflow definitions - declarative state machines over business entities

//! # Workflow Definitions
//!
//! A [`WorkflowDefinition`] is a complete state machine description:
//!
//! - **Steps**: the states an instance can occupy. `task` steps wait for an
//!   external event; `system` and `notification` steps execute their bound
//!   operation automatically; a `terminal` step ends the run.
//! - **Transitions**: `(from, event)` edges with optional string conditions
//!   evaluated against instance state and optional capability guards.
//! - **Initial step / timeout**: where instances start and how long they may
//!   live before the timeout sweep picks them up.
//!
//! The engine in [`crate::workflow::engine`] executes these definitions; the
//! validator in [`crate::definitions::validator`] guarantees referential
//! integrity (declared endpoints, reachable terminal step) before any
//! definition reaches the registry.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::definition::OperationBinding;

/// Step behavior classes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    /// Waits for an external `Advance` event
    Task,
    /// Executes its operation automatically; failure suspends unless an
    /// `error` transition exists
    System,
    /// Executes its operation automatically with best-effort semantics;
    /// failure is recorded and the chain proceeds
    Notification,
    /// Entering this step completes the instance
    Terminal,
}

impl StepType {
    /// Auto-steps are executed by the engine without an external event.
    pub fn is_auto(&self) -> bool {
        matches!(self, StepType::System | StepType::Notification)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StepType::Terminal)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StepType::Task => "task",
            StepType::System => "system",
            StepType::Notification => "notification",
            StepType::Terminal => "terminal",
        }
    }
}

/// One state in a workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepDefinition {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    #[serde(rename = "type")]
    pub step_type: StepType,

    /// Capabilities required to act on this step
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Operation executed when the step is an auto-step
    #[serde(default)]
    pub operation: Option<OperationBinding>,

    /// Invocation body field <- state key
    #[serde(default)]
    pub input_mapping: HashMap<String, String>,

    /// State key <- response body field. Empty mapping merges an object
    /// body into state wholesale.
    #[serde(default)]
    pub output_mapping: HashMap<String, String>,

    /// Step the instance moves to when it times out on this step
    #[serde(default)]
    pub on_timeout: Option<String>,
}

/// One `(from, event)` edge of the state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransitionDefinition {
    pub from: String,
    pub to: String,

    /// Event name that fires this transition ("approved", "completed",
    /// "error", ...)
    pub event: String,

    /// Optional condition over instance state: `field == 'value'` or
    /// `field != 'value'`. Unparseable conditions are permissive.
    #[serde(default)]
    pub condition: Option<String>,

    /// Capability the caller must hold for this specific edge
    #[serde(default)]
    pub guard: Option<String>,
}

/// A complete workflow state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub id: String,

    #[serde(default)]
    pub name: Option<String>,

    /// Capabilities required to start an instance
    #[serde(default)]
    pub capabilities: Vec<String>,

    pub initial_step: String,

    #[serde(default)]
    pub steps: Vec<StepDefinition>,

    #[serde(default)]
    pub transitions: Vec<TransitionDefinition>,

    /// Instance lifetime as a humantime string; expired instances are picked
    /// up by the timeout sweep
    #[serde(default)]
    pub timeout: Option<String>,

    /// Workflow-level timeout target when the current step declares none
    #[serde(default)]
    pub on_timeout: Option<String>,
}

impl WorkflowDefinition {
    pub fn step(&self, id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Transitions from `from` for `event`, in declaration order. Condition
    /// evaluation is the engine's concern, so all candidates are returned.
    pub fn transitions_for<'a>(
        &'a self,
        from: &'a str,
        event: &'a str,
    ) -> impl Iterator<Item = &'a TransitionDefinition> + 'a {
        self.transitions
            .iter()
            .filter(move |t| t.from == from && t.event == event)
    }
}

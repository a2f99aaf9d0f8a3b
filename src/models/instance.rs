// Workflow instances and their append-only event trail

//! # Workflow Instances
//!
//! A [`WorkflowInstance`] is one persisted run of a workflow definition. The
//! store contract (see [`crate::workflow::store`]) guarantees:
//!
//! - exactly one instance per `id`, with lookups scoped by `(tenant_id, id)` -
//!   a cross-tenant read behaves as not-found
//! - `version` increments by exactly one on every successful update; a stale
//!   writer observes a conflict
//! - terminal status values never revert
//!
//! [`WorkflowEvent`]s form the append-only audit log: who did what to which
//! step, ordered by timestamp on read.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

/// State key reserved for the engine's last recorded step failure.
pub const LAST_ERROR_KEY: &str = "_last_error";

/// Instance lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowStatus {
    Active,
    Suspended,
    Completed,
    Cancelled,
    Failed,
}

impl WorkflowStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowStatus::Active => "active",
            WorkflowStatus::Suspended => "suspended",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Cancelled => "cancelled",
            WorkflowStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(WorkflowStatus::Active),
            "suspended" => Some(WorkflowStatus::Suspended),
            "completed" => Some(WorkflowStatus::Completed),
            "cancelled" => Some(WorkflowStatus::Cancelled),
            "failed" => Some(WorkflowStatus::Failed),
            _ => None,
        }
    }

    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Cancelled | WorkflowStatus::Failed
        )
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One persisted run of a workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInstance {
    pub id: Uuid,
    pub workflow_id: String,
    pub tenant_id: String,
    pub partition_id: String,
    pub subject_id: String,

    pub current_step: String,
    pub status: WorkflowStatus,

    /// Free-form state map; `_last_error` is reserved for the engine
    #[serde(default)]
    pub state: HashMap<String, Value>,

    /// Optimistic-lock version, starts at 1
    pub version: i64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    /// When set, the timeout sweep fails or reroutes the instance past this
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl WorkflowInstance {
    /// Fresh active instance positioned on `initial_step` at version 1.
    pub fn new(
        workflow_id: impl Into<String>,
        tenant_id: impl Into<String>,
        partition_id: impl Into<String>,
        subject_id: impl Into<String>,
        initial_step: impl Into<String>,
        state: HashMap<String, Value>,
    ) -> Self {
        let now = Utc::now();
        WorkflowInstance {
            id: Uuid::new_v4(),
            workflow_id: workflow_id.into(),
            tenant_id: tenant_id.into(),
            partition_id: partition_id.into(),
            subject_id: subject_id.into(),
            current_step: initial_step.into(),
            status: WorkflowStatus::Active,
            state,
            version: 1,
            created_at: now,
            updated_at: now,
            expires_at: None,
            idempotency_key: None,
        }
    }

    /// Record a step failure in the reserved state slot.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.state
            .insert(LAST_ERROR_KEY.to_string(), Value::String(message.into()));
    }
}

/// Append-only audit record for one instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowEvent {
    pub id: Uuid,
    pub workflow_instance_id: Uuid,
    pub step_id: String,

    /// Event name: `step_entered`, `step_completed`, `step_failed`,
    /// `workflow_completed`, `workflow_failed`, `workflow_suspended`,
    /// `cancelled`, `timeout`, or a transition's own event
    pub event: String,

    /// Subject that caused the event, or `system`
    pub actor_id: String,

    #[serde(default)]
    pub data: Option<Value>,

    #[serde(default)]
    pub comment: Option<String>,

    pub timestamp: DateTime<Utc>,
}

impl WorkflowEvent {
    pub fn new(
        instance_id: Uuid,
        step_id: impl Into<String>,
        event: impl Into<String>,
        actor_id: impl Into<String>,
    ) -> Self {
        WorkflowEvent {
            id: Uuid::new_v4(),
            workflow_instance_id: instance_id,
            step_id: step_id.into(),
            event: event.into(),
            actor_id: actor_id.into(),
            data: None,
            comment: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_instance_is_active_v1() {
        let inst = WorkflowInstance::new("wf", "t1", "p1", "alice", "draft", HashMap::new());
        assert_eq!(inst.version, 1);
        assert_eq!(inst.status, WorkflowStatus::Active);
        assert_eq!(inst.current_step, "draft");
        assert!(inst.expires_at.is_none());
    }

    #[test]
    fn test_status_terminality() {
        assert!(!WorkflowStatus::Active.is_terminal());
        assert!(!WorkflowStatus::Suspended.is_terminal());
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
    }

    #[test]
    fn test_status_round_trip() {
        for s in [
            WorkflowStatus::Active,
            WorkflowStatus::Suspended,
            WorkflowStatus::Completed,
            WorkflowStatus::Cancelled,
            WorkflowStatus::Failed,
        ] {
            assert_eq!(WorkflowStatus::parse(s.as_str()), Some(s));
        }
        assert_eq!(WorkflowStatus::parse("bogus"), None);
    }

    #[test]
    fn test_record_error_uses_reserved_key() {
        let mut inst = WorkflowInstance::new("wf", "t1", "p1", "alice", "draft", HashMap::new());
        inst.record_error("backend exploded");
        assert_eq!(
            inst.state.get(LAST_ERROR_KEY),
            Some(&Value::String("backend exploded".into()))
        );
    }
}

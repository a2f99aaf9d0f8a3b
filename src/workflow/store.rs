// Workflow store contract and the in-memory implementation

//! # Workflow Store
//!
//! The engine persists through this trait and nothing else. The contract
//! every implementation must honor:
//!
//! | Operation | Guarantee |
//! |---|---|
//! | `create` | exclusive on instance ID, `CONFLICT` on duplicate |
//! | `get` | `NOT_FOUND` when missing **or** when the tenant mismatches |
//! | `update` | applies only when the stored version equals the caller's; bumps the version by one and stamps `updated_at`; `CONFLICT` otherwise |
//! | `append_event` | append-only |
//! | `get_events` | tenant-scoped, timestamp ascending |
//! | `find_active` | active + tenant-scoped, newest first, paged |
//! | `find_expired` | active with `expires_at` before the cutoff, oldest expiry first |
//! | `delete` | tenant-scoped, events first then the instance |
//!
//! [`InMemoryWorkflowStore`] is the reference implementation: a pair of
//! `RwLock`ed maps, good enough for tests and single-node development.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{WorkflowEvent, WorkflowInstance, WorkflowStatus};
use crate::{Result, SwitchboardError};

/// Paging and filtering for `find_active`.
#[derive(Debug, Clone, Default)]
pub struct InstanceFilters {
    pub workflow_id: Option<String>,
    pub limit: usize,
    pub offset: usize,
}

#[async_trait]
pub trait WorkflowStore: Send + Sync {
    /// Persist a new instance; the ID must be unused.
    async fn create(&self, instance: &WorkflowInstance) -> Result<()>;

    /// Tenant-scoped fetch. A mismatching tenant reads as not-found.
    async fn get(&self, tenant_id: &str, id: Uuid) -> Result<WorkflowInstance>;

    /// Optimistic update keyed on `instance.version`; returns the stored
    /// instance with its bumped version.
    async fn update(&self, instance: &WorkflowInstance) -> Result<WorkflowInstance>;

    async fn append_event(&self, event: &WorkflowEvent) -> Result<()>;

    /// Events for one instance, timestamp ascending.
    async fn get_events(&self, tenant_id: &str, id: Uuid) -> Result<Vec<WorkflowEvent>>;

    /// Active instances for a tenant, newest first; returns the page and
    /// the unpaged total.
    async fn find_active(
        &self,
        tenant_id: &str,
        filters: &InstanceFilters,
    ) -> Result<(Vec<WorkflowInstance>, usize)>;

    /// Active instances whose `expires_at` lies before the cutoff, oldest
    /// expiry first.
    async fn find_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<WorkflowInstance>>;

    /// Remove an instance and its events.
    async fn delete(&self, tenant_id: &str, id: Uuid) -> Result<()>;
}

/// Reference store used by tests and development.
#[derive(Default)]
pub struct InMemoryWorkflowStore {
    instances: RwLock<HashMap<Uuid, WorkflowInstance>>,
    events: RwLock<Vec<WorkflowEvent>>,
}

impl InMemoryWorkflowStore {
    pub fn new() -> Self {
        InMemoryWorkflowStore::default()
    }
}

fn not_found(id: Uuid) -> SwitchboardError {
    SwitchboardError::NotFound {
        kind: "workflow instance",
        id: id.to_string(),
    }
}

#[async_trait]
impl WorkflowStore for InMemoryWorkflowStore {
    async fn create(&self, instance: &WorkflowInstance) -> Result<()> {
        let mut instances = self.instances.write().await;
        if instances.contains_key(&instance.id) {
            return Err(SwitchboardError::Conflict {
                message: format!("instance {} already exists", instance.id),
            });
        }
        instances.insert(instance.id, instance.clone());
        Ok(())
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> Result<WorkflowInstance> {
        let instances = self.instances.read().await;
        instances
            .get(&id)
            .filter(|inst| inst.tenant_id == tenant_id)
            .cloned()
            .ok_or_else(|| not_found(id))
    }

    async fn update(&self, instance: &WorkflowInstance) -> Result<WorkflowInstance> {
        let mut instances = self.instances.write().await;
        let stored = instances
            .get_mut(&instance.id)
            .filter(|inst| inst.tenant_id == instance.tenant_id)
            .ok_or_else(|| not_found(instance.id))?;

        if stored.version != instance.version {
            return Err(SwitchboardError::Conflict {
                message: format!(
                    "instance {} is at version {}, caller had {}",
                    instance.id, stored.version, instance.version
                ),
            });
        }

        let mut updated = instance.clone();
        updated.version += 1;
        updated.updated_at = Utc::now();
        *stored = updated.clone();
        Ok(updated)
    }

    async fn append_event(&self, event: &WorkflowEvent) -> Result<()> {
        self.events.write().await.push(event.clone());
        Ok(())
    }

    async fn get_events(&self, tenant_id: &str, id: Uuid) -> Result<Vec<WorkflowEvent>> {
        // tenant scoping goes through the instance
        self.get(tenant_id, id).await?;

        let events = self.events.read().await;
        let mut out: Vec<WorkflowEvent> = events
            .iter()
            .filter(|e| e.workflow_instance_id == id)
            .cloned()
            .collect();
        out.sort_by_key(|e| e.timestamp);
        Ok(out)
    }

    async fn find_active(
        &self,
        tenant_id: &str,
        filters: &InstanceFilters,
    ) -> Result<(Vec<WorkflowInstance>, usize)> {
        let instances = self.instances.read().await;
        let mut matching: Vec<WorkflowInstance> = instances
            .values()
            .filter(|inst| inst.tenant_id == tenant_id && inst.status == WorkflowStatus::Active)
            .filter(|inst| {
                filters
                    .workflow_id
                    .as_deref()
                    .map(|w| inst.workflow_id == w)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));

        let total = matching.len();
        let limit = if filters.limit == 0 { total } else { filters.limit };
        let page = matching
            .into_iter()
            .skip(filters.offset)
            .take(limit)
            .collect();
        Ok((page, total))
    }

    async fn find_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<WorkflowInstance>> {
        let instances = self.instances.read().await;
        let mut expired: Vec<WorkflowInstance> = instances
            .values()
            .filter(|inst| inst.status == WorkflowStatus::Active)
            .filter(|inst| inst.expires_at.map(|at| at < cutoff).unwrap_or(false))
            .cloned()
            .collect();
        expired.sort_by_key(|inst| inst.expires_at);
        Ok(expired)
    }

    async fn delete(&self, tenant_id: &str, id: Uuid) -> Result<()> {
        let mut instances = self.instances.write().await;
        match instances.get(&id) {
            Some(inst) if inst.tenant_id == tenant_id => {}
            _ => return Err(not_found(id)),
        }
        self.events
            .write()
            .await
            .retain(|e| e.workflow_instance_id != id);
        instances.remove(&id);
        Ok(())
    }
}

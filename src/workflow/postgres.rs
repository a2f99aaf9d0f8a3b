// Durable workflow store on PostgreSQL

//! # Postgres Workflow Store
//!
//! The durable implementation of [`super::store::WorkflowStore`]. Optimistic
//! locking rides on a `version` column: updates are conditional on the
//! version the caller read and bump it in the same statement, so two
//! concurrent advancers can never both land.
//!
//! The schema is created on demand via [`PostgresWorkflowStore::ensure_schema`];
//! production deployments manage migrations externally and skip that call.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use std::collections::HashMap;
use uuid::Uuid;

use super::store::{InstanceFilters, WorkflowStore};
use crate::models::{WorkflowEvent, WorkflowInstance, WorkflowStatus};
use crate::{Result, SwitchboardError};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS workflow_instances (
    id              UUID PRIMARY KEY,
    workflow_id     TEXT NOT NULL,
    tenant_id       TEXT NOT NULL,
    partition_id    TEXT NOT NULL DEFAULT '',
    subject_id      TEXT NOT NULL,
    current_step    TEXT NOT NULL,
    status          TEXT NOT NULL,
    state           JSONB NOT NULL DEFAULT '{}'::jsonb,
    version         BIGINT NOT NULL,
    created_at      TIMESTAMPTZ NOT NULL,
    updated_at      TIMESTAMPTZ NOT NULL,
    expires_at      TIMESTAMPTZ,
    idempotency_key TEXT
);
CREATE INDEX IF NOT EXISTS idx_wf_instances_tenant_status
    ON workflow_instances (tenant_id, status, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_wf_instances_expiry
    ON workflow_instances (expires_at) WHERE status = 'active' AND expires_at IS NOT NULL;

CREATE TABLE IF NOT EXISTS workflow_events (
    id                   UUID PRIMARY KEY,
    workflow_instance_id UUID NOT NULL,
    step_id              TEXT NOT NULL,
    event                TEXT NOT NULL,
    actor_id             TEXT NOT NULL,
    data                 JSONB,
    comment              TEXT,
    occurred_at          TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_wf_events_instance
    ON workflow_events (workflow_instance_id, occurred_at);
"#;

pub struct PostgresWorkflowStore {
    pool: PgPool,
}

impl PostgresWorkflowStore {
    pub fn new(pool: PgPool) -> Self {
        PostgresWorkflowStore { pool }
    }

    /// Create tables and indexes when they do not exist yet.
    pub async fn ensure_schema(&self) -> Result<()> {
        for statement in SCHEMA.split(';').map(str::trim).filter(|s| !s.is_empty()) {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(db_error)?;
        }
        Ok(())
    }
}

fn db_error(err: sqlx::Error) -> SwitchboardError {
    SwitchboardError::Internal(format!("workflow store: {err}"))
}

fn not_found(id: Uuid) -> SwitchboardError {
    SwitchboardError::NotFound {
        kind: "workflow instance",
        id: id.to_string(),
    }
}

fn row_to_instance(row: &PgRow) -> Result<WorkflowInstance> {
    let status_raw: String = row.try_get("status").map_err(db_error)?;
    let status = WorkflowStatus::parse(&status_raw)
        .ok_or_else(|| SwitchboardError::Internal(format!("unknown status '{status_raw}'")))?;
    let state_raw: Value = row.try_get("state").map_err(db_error)?;
    let state: HashMap<String, Value> = match state_raw {
        Value::Object(map) => map.into_iter().collect(),
        _ => HashMap::new(),
    };

    Ok(WorkflowInstance {
        id: row.try_get("id").map_err(db_error)?,
        workflow_id: row.try_get("workflow_id").map_err(db_error)?,
        tenant_id: row.try_get("tenant_id").map_err(db_error)?,
        partition_id: row.try_get("partition_id").map_err(db_error)?,
        subject_id: row.try_get("subject_id").map_err(db_error)?,
        current_step: row.try_get("current_step").map_err(db_error)?,
        status,
        state,
        version: row.try_get("version").map_err(db_error)?,
        created_at: row.try_get("created_at").map_err(db_error)?,
        updated_at: row.try_get("updated_at").map_err(db_error)?,
        expires_at: row.try_get("expires_at").map_err(db_error)?,
        idempotency_key: row.try_get("idempotency_key").map_err(db_error)?,
    })
}

fn row_to_event(row: &PgRow) -> Result<WorkflowEvent> {
    Ok(WorkflowEvent {
        id: row.try_get("id").map_err(db_error)?,
        workflow_instance_id: row.try_get("workflow_instance_id").map_err(db_error)?,
        step_id: row.try_get("step_id").map_err(db_error)?,
        event: row.try_get("event").map_err(db_error)?,
        actor_id: row.try_get("actor_id").map_err(db_error)?,
        data: row.try_get("data").map_err(db_error)?,
        comment: row.try_get("comment").map_err(db_error)?,
        timestamp: row.try_get("occurred_at").map_err(db_error)?,
    })
}

fn state_json(instance: &WorkflowInstance) -> Value {
    Value::Object(
        instance
            .state
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect(),
    )
}

#[async_trait]
impl WorkflowStore for PostgresWorkflowStore {
    async fn create(&self, instance: &WorkflowInstance) -> Result<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO workflow_instances (
                id, workflow_id, tenant_id, partition_id, subject_id,
                current_step, status, state, version,
                created_at, updated_at, expires_at, idempotency_key
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(instance.id)
        .bind(&instance.workflow_id)
        .bind(&instance.tenant_id)
        .bind(&instance.partition_id)
        .bind(&instance.subject_id)
        .bind(&instance.current_step)
        .bind(instance.status.as_str())
        .bind(state_json(instance))
        .bind(instance.version)
        .bind(instance.created_at)
        .bind(instance.updated_at)
        .bind(instance.expires_at)
        .bind(&instance.idempotency_key)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.code().as_deref() == Some("23505") => {
                Err(SwitchboardError::Conflict {
                    message: format!("instance {} already exists", instance.id),
                })
            }
            Err(err) => Err(db_error(err)),
        }
    }

    async fn get(&self, tenant_id: &str, id: Uuid) -> Result<WorkflowInstance> {
        let row = sqlx::query(
            "SELECT * FROM workflow_instances WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match row {
            Some(row) => row_to_instance(&row),
            None => Err(not_found(id)),
        }
    }

    async fn update(&self, instance: &WorkflowInstance) -> Result<WorkflowInstance> {
        let row = sqlx::query(
            r#"
            UPDATE workflow_instances
               SET current_step = $4,
                   status       = $5,
                   state        = $6,
                   expires_at   = $7,
                   version      = version + 1,
                   updated_at   = now()
             WHERE id = $1 AND tenant_id = $2 AND version = $3
            RETURNING *
            "#,
        )
        .bind(instance.id)
        .bind(&instance.tenant_id)
        .bind(instance.version)
        .bind(&instance.current_step)
        .bind(instance.status.as_str())
        .bind(state_json(instance))
        .bind(instance.expires_at)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        if let Some(row) = row {
            return row_to_instance(&row);
        }

        // distinguish a stale version from a missing instance
        let exists = sqlx::query(
            "SELECT 1 FROM workflow_instances WHERE id = $1 AND tenant_id = $2",
        )
        .bind(instance.id)
        .bind(&instance.tenant_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        match exists {
            Some(_) => Err(SwitchboardError::Conflict {
                message: format!(
                    "instance {} changed since version {}",
                    instance.id, instance.version
                ),
            }),
            None => Err(not_found(instance.id)),
        }
    }

    async fn append_event(&self, event: &WorkflowEvent) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO workflow_events (
                id, workflow_instance_id, step_id, event, actor_id,
                data, comment, occurred_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(event.id)
        .bind(event.workflow_instance_id)
        .bind(&event.step_id)
        .bind(&event.event)
        .bind(&event.actor_id)
        .bind(&event.data)
        .bind(&event.comment)
        .bind(event.timestamp)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;
        Ok(())
    }

    async fn get_events(&self, tenant_id: &str, id: Uuid) -> Result<Vec<WorkflowEvent>> {
        // tenant scoping rides on the instance row
        self.get(tenant_id, id).await?;

        let rows = sqlx::query(
            r#"
            SELECT * FROM workflow_events
             WHERE workflow_instance_id = $1
             ORDER BY occurred_at ASC
            "#,
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(row_to_event).collect()
    }

    async fn find_active(
        &self,
        tenant_id: &str,
        filters: &InstanceFilters,
    ) -> Result<(Vec<WorkflowInstance>, usize)> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*) FROM workflow_instances
             WHERE tenant_id = $1 AND status = 'active'
               AND ($2::text IS NULL OR workflow_id = $2)
            "#,
        )
        .bind(tenant_id)
        .bind(&filters.workflow_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        let limit = if filters.limit == 0 { i64::MAX } else { filters.limit as i64 };
        let rows = sqlx::query(
            r#"
            SELECT * FROM workflow_instances
             WHERE tenant_id = $1 AND status = 'active'
               AND ($2::text IS NULL OR workflow_id = $2)
             ORDER BY created_at DESC
             LIMIT $3 OFFSET $4
            "#,
        )
        .bind(tenant_id)
        .bind(&filters.workflow_id)
        .bind(limit)
        .bind(filters.offset as i64)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let instances: Result<Vec<_>> = rows.iter().map(row_to_instance).collect();
        Ok((instances?, total as usize))
    }

    async fn find_expired(&self, cutoff: DateTime<Utc>) -> Result<Vec<WorkflowInstance>> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM workflow_instances
             WHERE status = 'active' AND expires_at IS NOT NULL AND expires_at < $1
             ORDER BY expires_at ASC
            "#,
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        rows.iter().map(row_to_instance).collect()
    }

    async fn delete(&self, tenant_id: &str, id: Uuid) -> Result<()> {
        // events first, then the instance, one transaction
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let owner = sqlx::query(
            "SELECT 1 FROM workflow_instances WHERE id = $1 AND tenant_id = $2",
        )
        .bind(id)
        .bind(tenant_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?;
        if owner.is_none() {
            return Err(not_found(id));
        }

        sqlx::query("DELETE FROM workflow_events WHERE workflow_instance_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        sqlx::query("DELETE FROM workflow_instances WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        tx.commit().await.map_err(db_error)
    }
}

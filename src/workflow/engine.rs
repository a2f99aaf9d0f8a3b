// Workflow engine - executes definitions over the persisted store

//! # Workflow Engine
//!
//! Drives [`crate::models::WorkflowDefinition`]s over the
//! [`super::store::WorkflowStore`] contract:
//!
//! - **start**: capability check, instance construction, initial
//!   `step_entered` event, auto-chain when the initial step is automatic
//! - **advance**: the externally-driven transition - find the matching edge,
//!   check guards, merge input, emit events, persist under the optimistic
//!   lock, then chain any automatic follow-up steps
//! - **auto-chain**: `system` and `notification` steps execute their bound
//!   operation without waiting; the chain is a loop with an explicit depth
//!   counter, suspending the instance when it hits the chain limit
//! - **timeout sweep**: expired active instances are rerouted through their
//!   step- or workflow-level timeout target, or failed outright
//!
//! Every mutation appends its audit events before the optimistic `update`
//! lands, so a conflicting writer never observes state ahead of its events.

use chrono::Utc;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::condition;
use super::store::{InstanceFilters, WorkflowStore};
use crate::definitions::registry::DefinitionRegistry;
use crate::invoker::{InvocationInput, InvokerRegistry};
use crate::models::{
    CapabilitySet, RequestContext, StepDefinition, TransitionDefinition, WorkflowDefinition,
    WorkflowEvent, WorkflowInstance, WorkflowStatus,
};
use crate::{Result, SwitchboardError};

const DEFAULT_CHAIN_LIMIT: usize = 10;
const SYSTEM_ACTOR: &str = "system";

/// Step summary for instance descriptors.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StepSummary {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub step_type: crate::models::StepType,
    pub terminal: bool,
}

#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub step_id: String,
    pub event: String,
    pub actor_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub comment: Option<String>,
    pub timestamp: chrono::DateTime<Utc>,
}

/// Full picture of one instance for the UI.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InstanceDescriptor {
    pub instance: WorkflowInstance,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_step: Option<StepSummary>,
    pub steps: Vec<StepSummary>,
    pub history: Vec<HistoryEntry>,
}

/// Paging for [`WorkflowEngine::list`].
#[derive(Debug, Clone, Default)]
pub struct ListQuery {
    pub workflow_id: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

pub struct WorkflowEngine {
    registry: Arc<DefinitionRegistry>,
    store: Arc<dyn WorkflowStore>,
    invokers: Arc<InvokerRegistry>,
    chain_limit: usize,
}

impl WorkflowEngine {
    pub fn new(
        registry: Arc<DefinitionRegistry>,
        store: Arc<dyn WorkflowStore>,
        invokers: Arc<InvokerRegistry>,
    ) -> Self {
        WorkflowEngine {
            registry,
            store,
            invokers,
            chain_limit: DEFAULT_CHAIN_LIMIT,
        }
    }

    /// Override the auto-step chain limit (default 10).
    pub fn with_chain_limit(mut self, limit: usize) -> Self {
        self.chain_limit = limit;
        self
    }

    /// Start a new instance of `workflow_id` with the caller's input as the
    /// initial state.
    pub async fn start(
        &self,
        cancel: &CancellationToken,
        rctx: &RequestContext,
        caps: &CapabilitySet,
        workflow_id: &str,
        input: HashMap<String, Value>,
    ) -> Result<WorkflowInstance> {
        let snapshot = self.registry.snapshot();
        let entry = snapshot
            .workflow(workflow_id)
            .ok_or_else(|| SwitchboardError::NotFound {
                kind: "workflow",
                id: workflow_id.to_string(),
            })?;
        let definition = Arc::clone(&entry.item);

        if !caps.has_all(definition.capabilities.iter().map(String::as_str)) {
            return Err(SwitchboardError::Forbidden {
                reason: format!("missing capability to start workflow '{workflow_id}'"),
            });
        }

        let mut instance = WorkflowInstance::new(
            workflow_id,
            &rctx.tenant_id,
            &rctx.partition_id,
            &rctx.subject_id,
            &definition.initial_step,
            input,
        );
        instance.expires_at = definition
            .timeout
            .as_deref()
            .and_then(|raw| humantime::parse_duration(raw).ok())
            .and_then(|d| chrono::Duration::from_std(d).ok())
            .map(|d| Utc::now() + d);

        self.store.create(&instance).await?;
        self.store
            .append_event(&WorkflowEvent::new(
                instance.id,
                &instance.current_step,
                "step_entered",
                &rctx.subject_id,
            ))
            .await?;
        info!(
            workflow = workflow_id,
            instance = %instance.id,
            tenant = %rctx.tenant_id,
            "workflow instance started"
        );

        let initial = definition
            .step(&definition.initial_step)
            .ok_or_else(|| internal_step_error(&definition.initial_step))?;
        if initial.step_type.is_auto() {
            instance = self
                .execute_step_chain(cancel, rctx, &definition, instance)
                .await?;
        }
        Ok(instance)
    }

    /// Drive an instance forward with an external event.
    pub async fn advance(
        &self,
        cancel: &CancellationToken,
        rctx: &RequestContext,
        caps: &CapabilitySet,
        instance_id: Uuid,
        event: &str,
        input: HashMap<String, Value>,
    ) -> Result<WorkflowInstance> {
        let mut instance = self.store.get(&rctx.tenant_id, instance_id).await?;
        if instance.status != WorkflowStatus::Active {
            return Err(SwitchboardError::WorkflowNotActive {
                id: instance_id.to_string(),
                status: instance.status.to_string(),
            });
        }

        let snapshot = self.registry.snapshot();
        let definition = snapshot
            .workflow(&instance.workflow_id)
            .map(|e| Arc::clone(&e.item))
            .ok_or_else(|| SwitchboardError::NotFound {
                kind: "workflow",
                id: instance.workflow_id.clone(),
            })?;
        let step = definition
            .step(&instance.current_step)
            .ok_or_else(|| internal_step_error(&instance.current_step))?;

        if !caps.has_all(step.capabilities.iter().map(String::as_str)) {
            return Err(SwitchboardError::Forbidden {
                reason: format!("missing capability for step '{}'", step.id),
            });
        }

        // conditions run against the persisted state; the caller's input
        // only lands after the transition is chosen and guarded
        let transition = find_transition(&definition, &instance.current_step, event, &instance.state)
            .ok_or_else(|| SwitchboardError::InvalidTransition {
                step: instance.current_step.clone(),
                event: event.to_string(),
            })?
            .clone();

        if let Some(guard) = &transition.guard {
            if !caps.has(guard) {
                return Err(SwitchboardError::Forbidden {
                    reason: format!("missing guard capability '{guard}'"),
                });
            }
        }

        for (key, value) in input {
            instance.state.insert(key, value);
        }

        self.store
            .append_event(&WorkflowEvent::new(
                instance.id,
                &instance.current_step,
                "step_completed",
                &rctx.subject_id,
            ))
            .await?;
        self.store
            .append_event(&WorkflowEvent::new(
                instance.id,
                &instance.current_step,
                event,
                &rctx.subject_id,
            ))
            .await?;

        instance.current_step = transition.to.clone();
        instance.updated_at = Utc::now();
        self.store
            .append_event(&WorkflowEvent::new(
                instance.id,
                &instance.current_step,
                "step_entered",
                SYSTEM_ACTOR,
            ))
            .await?;

        let target = definition
            .step(&transition.to)
            .ok_or_else(|| internal_step_error(&transition.to))?;
        if target.step_type.is_terminal() {
            instance.status = WorkflowStatus::Completed;
            self.store
                .append_event(&WorkflowEvent::new(
                    instance.id,
                    &instance.current_step,
                    "workflow_completed",
                    SYSTEM_ACTOR,
                ))
                .await?;
        }

        // optimistic lock: a concurrent advancer loses with CONFLICT
        let mut instance = self.store.update(&instance).await?;
        debug!(
            instance = %instance.id,
            step = %instance.current_step,
            event,
            "workflow advanced"
        );

        if target.step_type.is_auto() && instance.status == WorkflowStatus::Active {
            // reload to pick up the post-update version before chaining
            instance = self.store.get(&rctx.tenant_id, instance.id).await?;
            instance = self
                .execute_step_chain(cancel, rctx, &definition, instance)
                .await?;
        }
        Ok(instance)
    }

    /// Execute consecutive auto-steps until a non-auto step, a terminal
    /// state, or the chain limit. Flattened to a loop; `depth` counts
    /// executed auto-steps.
    async fn execute_step_chain(
        &self,
        cancel: &CancellationToken,
        rctx: &RequestContext,
        definition: &WorkflowDefinition,
        mut instance: WorkflowInstance,
    ) -> Result<WorkflowInstance> {
        let mut depth = 0usize;
        loop {
            if depth >= self.chain_limit {
                warn!(
                    instance = %instance.id,
                    limit = self.chain_limit,
                    "auto-step chain limit reached, suspending"
                );
                instance.status = WorkflowStatus::Suspended;
                self.store
                    .append_event(
                        &WorkflowEvent::new(
                            instance.id,
                            &instance.current_step,
                            "workflow_suspended",
                            SYSTEM_ACTOR,
                        )
                        .with_comment("chain limit reached"),
                    )
                    .await?;
                self.store.update(&instance).await?;
                return Err(SwitchboardError::ChainLimit {
                    id: instance.id.to_string(),
                    limit: self.chain_limit,
                });
            }

            let step = definition
                .step(&instance.current_step)
                .ok_or_else(|| internal_step_error(&instance.current_step))?
                .clone();

            let follow_event = match self
                .run_step_operation(cancel, rctx, &step, &instance.state)
                .await
            {
                Ok(output) => {
                    merge_output(&step, output, &mut instance.state);
                    self.store
                        .append_event(&WorkflowEvent::new(
                            instance.id,
                            &step.id,
                            "step_completed",
                            SYSTEM_ACTOR,
                        ))
                        .await?;
                    "completed"
                }
                Err(err) => {
                    warn!(instance = %instance.id, step = %step.id, error = %err, "auto-step failed");
                    instance.record_error(err.to_string());
                    self.store
                        .append_event(
                            &WorkflowEvent::new(instance.id, &step.id, "step_failed", SYSTEM_ACTOR)
                                .with_comment(err.to_string()),
                        )
                        .await?;

                    if step.step_type == crate::models::StepType::Notification {
                        // best-effort semantics: the failure is recorded and
                        // the chain proceeds as if the step had succeeded
                        self.store
                            .append_event(&WorkflowEvent::new(
                                instance.id,
                                &step.id,
                                "step_completed",
                                SYSTEM_ACTOR,
                            ))
                            .await?;
                        "completed"
                    } else if find_transition(definition, &step.id, "error", &instance.state)
                        .is_some()
                    {
                        "error"
                    } else {
                        instance.status = WorkflowStatus::Suspended;
                        self.store
                            .append_event(&WorkflowEvent::new(
                                instance.id,
                                &step.id,
                                "workflow_suspended",
                                SYSTEM_ACTOR,
                            ))
                            .await?;
                        return self.store.update(&instance).await;
                    }
                }
            };

            let transition =
                match find_transition(definition, &step.id, follow_event, &instance.state) {
                    Some(transition) => transition.clone(),
                    None => {
                        // an auto-step with nowhere to go is a dead end
                        instance.status = WorkflowStatus::Failed;
                        self.store
                            .append_event(&WorkflowEvent::new(
                                instance.id,
                                &step.id,
                                "workflow_failed",
                                SYSTEM_ACTOR,
                            ))
                            .await?;
                        return self.store.update(&instance).await;
                    }
                };

            instance.current_step = transition.to.clone();
            instance.updated_at = Utc::now();
            self.store
                .append_event(&WorkflowEvent::new(
                    instance.id,
                    &instance.current_step,
                    "step_entered",
                    SYSTEM_ACTOR,
                ))
                .await?;

            let target = definition
                .step(&transition.to)
                .ok_or_else(|| internal_step_error(&transition.to))?;
            if target.step_type.is_terminal() {
                instance.status = WorkflowStatus::Completed;
                self.store
                    .append_event(&WorkflowEvent::new(
                        instance.id,
                        &instance.current_step,
                        "workflow_completed",
                        SYSTEM_ACTOR,
                    ))
                    .await?;
            }

            instance = self.store.update(&instance).await?;

            if instance.status == WorkflowStatus::Active && target.step_type.is_auto() {
                depth += 1;
                continue;
            }
            return Ok(instance);
        }
    }

    /// Invoke an auto-step's operation. Input mapping selects state fields
    /// into the body (whole state when unmapped); the returned body feeds
    /// the output mapping.
    async fn run_step_operation(
        &self,
        cancel: &CancellationToken,
        rctx: &RequestContext,
        step: &StepDefinition,
        state: &HashMap<String, Value>,
    ) -> Result<Option<Value>> {
        let binding = step
            .operation
            .as_ref()
            .ok_or_else(|| SwitchboardError::Internal(format!("step '{}' has no operation", step.id)))?;

        let body = if step.input_mapping.is_empty() {
            Value::Object(state.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        } else {
            Value::Object(
                step.input_mapping
                    .iter()
                    .map(|(body_field, state_key)| {
                        (
                            body_field.clone(),
                            state.get(state_key).cloned().unwrap_or(Value::Null),
                        )
                    })
                    .collect(),
            )
        };

        let result = self
            .invokers
            .invoke(cancel, rctx, binding, InvocationInput::with_body(body))
            .await?;
        if !result.is_success() {
            return Err(SwitchboardError::Internal(format!(
                "step operation returned status {}",
                result.status_code
            )));
        }
        Ok(result.body)
    }

    /// Cancel an active or suspended instance.
    pub async fn cancel(
        &self,
        rctx: &RequestContext,
        instance_id: Uuid,
        reason: &str,
    ) -> Result<WorkflowInstance> {
        let mut instance = self.store.get(&rctx.tenant_id, instance_id).await?;
        if !matches!(
            instance.status,
            WorkflowStatus::Active | WorkflowStatus::Suspended
        ) {
            return Err(SwitchboardError::WorkflowNotActive {
                id: instance_id.to_string(),
                status: instance.status.to_string(),
            });
        }

        instance.status = WorkflowStatus::Cancelled;
        self.store
            .append_event(
                &WorkflowEvent::new(
                    instance.id,
                    &instance.current_step,
                    "cancelled",
                    &rctx.subject_id,
                )
                .with_comment(reason),
            )
            .await?;
        info!(instance = %instance.id, reason, "workflow instance cancelled");
        self.store.update(&instance).await
    }

    /// Page through the tenant's active instances.
    pub async fn list(
        &self,
        rctx: &RequestContext,
        query: ListQuery,
    ) -> Result<(Vec<WorkflowInstance>, usize)> {
        let page = query.page.unwrap_or(1).max(1);
        let page_size = query.page_size.unwrap_or(20).max(1);
        self.store
            .find_active(
                &rctx.tenant_id,
                &InstanceFilters {
                    workflow_id: query.workflow_id,
                    limit: page_size,
                    offset: (page - 1) * page_size,
                },
            )
            .await
    }

    /// Full descriptor: instance, capability-filtered step summaries, and
    /// the event history.
    pub async fn get(
        &self,
        rctx: &RequestContext,
        caps: &CapabilitySet,
        instance_id: Uuid,
    ) -> Result<InstanceDescriptor> {
        let instance = self.store.get(&rctx.tenant_id, instance_id).await?;
        let snapshot = self.registry.snapshot();
        let definition = snapshot
            .workflow(&instance.workflow_id)
            .map(|e| Arc::clone(&e.item));

        let steps: Vec<StepSummary> = definition
            .as_deref()
            .map(|def| {
                def.steps
                    .iter()
                    .filter(|s| caps.has_all(s.capabilities.iter().map(String::as_str)))
                    .map(step_summary)
                    .collect()
            })
            .unwrap_or_default();
        let current_step = definition
            .as_deref()
            .and_then(|def| def.step(&instance.current_step))
            .map(step_summary);

        let history = self
            .store
            .get_events(&rctx.tenant_id, instance_id)
            .await?
            .into_iter()
            .map(|e| HistoryEntry {
                step_id: e.step_id,
                event: e.event,
                actor_id: e.actor_id,
                comment: e.comment,
                timestamp: e.timestamp,
            })
            .collect();

        Ok(InstanceDescriptor {
            instance,
            current_step,
            steps,
            history,
        })
    }

    /// Remove an instance and its events.
    pub async fn delete(&self, rctx: &RequestContext, instance_id: Uuid) -> Result<()> {
        self.store.delete(&rctx.tenant_id, instance_id).await
    }

    /// Sweep expired active instances. One instance's failure never aborts
    /// the sweep; the count of processed instances is returned.
    pub async fn process_timeouts(&self, cancel: &CancellationToken) -> Result<usize> {
        let expired = self.store.find_expired(Utc::now()).await?;
        let mut processed = 0usize;
        for instance in expired {
            let id = instance.id;
            if let Err(err) = self.process_timeout(cancel, instance).await {
                error!(instance = %id, error = %err, "timeout handling failed");
            } else {
                processed += 1;
            }
        }
        Ok(processed)
    }

    async fn process_timeout(
        &self,
        cancel: &CancellationToken,
        mut instance: WorkflowInstance,
    ) -> Result<()> {
        let snapshot = self.registry.snapshot();
        let definition = snapshot
            .workflow(&instance.workflow_id)
            .map(|e| Arc::clone(&e.item))
            .ok_or_else(|| SwitchboardError::NotFound {
                kind: "workflow",
                id: instance.workflow_id.clone(),
            })?;

        self.store
            .append_event(&WorkflowEvent::new(
                instance.id,
                &instance.current_step,
                "timeout",
                SYSTEM_ACTOR,
            ))
            .await?;

        let step_target = definition
            .step(&instance.current_step)
            .and_then(|s| s.on_timeout.clone());
        let target = step_target.or_else(|| definition.on_timeout.clone());

        match target {
            Some(target_id) => {
                instance.current_step = target_id.clone();
                // handled: the expiry must not fire again
                instance.expires_at = None;
                instance.updated_at = Utc::now();
                self.store
                    .append_event(&WorkflowEvent::new(
                        instance.id,
                        &target_id,
                        "step_entered",
                        SYSTEM_ACTOR,
                    ))
                    .await?;

                let target = definition
                    .step(&target_id)
                    .ok_or_else(|| internal_step_error(&target_id))?;
                if target.step_type.is_terminal() {
                    instance.status = WorkflowStatus::Completed;
                    self.store
                        .append_event(&WorkflowEvent::new(
                            instance.id,
                            &target_id,
                            "workflow_completed",
                            SYSTEM_ACTOR,
                        ))
                        .await?;
                }
                let instance = self.store.update(&instance).await?;

                if instance.status == WorkflowStatus::Active && target.step_type.is_auto() {
                    let system_rctx = RequestContext::new(
                        SYSTEM_ACTOR,
                        &instance.tenant_id,
                        &instance.partition_id,
                    );
                    // the chain limit error is the chain's own outcome, not
                    // a sweep failure
                    if let Err(err) = self
                        .execute_step_chain(cancel, &system_rctx, &definition, instance)
                        .await
                    {
                        if !matches!(err, SwitchboardError::ChainLimit { .. }) {
                            return Err(err);
                        }
                    }
                }
                Ok(())
            }
            None => {
                instance.status = WorkflowStatus::Failed;
                self.store
                    .append_event(
                        &WorkflowEvent::new(
                            instance.id,
                            &instance.current_step,
                            "workflow_failed",
                            SYSTEM_ACTOR,
                        )
                        .with_comment("timeout with no handler"),
                    )
                    .await?;
                self.store.update(&instance).await?;
                Ok(())
            }
        }
    }
}

fn step_summary(step: &StepDefinition) -> StepSummary {
    StepSummary {
        id: step.id.clone(),
        name: step.name.clone(),
        step_type: step.step_type,
        terminal: step.step_type.is_terminal(),
    }
}

fn internal_step_error(step_id: &str) -> SwitchboardError {
    SwitchboardError::Internal(format!("instance references undeclared step '{step_id}'"))
}

/// First declared transition matching `(from, event)` whose condition holds.
fn find_transition<'a>(
    definition: &'a WorkflowDefinition,
    from: &'a str,
    event: &'a str,
    state: &HashMap<String, Value>,
) -> Option<&'a TransitionDefinition> {
    definition
        .transitions_for(from, event)
        .find(|t| {
            t.condition
                .as_deref()
                .map(|c| condition::evaluate(c, state))
                .unwrap_or(true)
        })
}

/// Apply the output mapping, or merge an object body wholesale when the
/// step declares none.
fn merge_output(step: &StepDefinition, body: Option<Value>, state: &mut HashMap<String, Value>) {
    let Some(body) = body else { return };
    if step.output_mapping.is_empty() {
        if let Value::Object(map) = body {
            for (key, value) in map {
                state.insert(key, value);
            }
        }
        return;
    }
    for (state_key, body_field) in &step.output_mapping {
        if let Some(value) = body.get(body_field) {
            state.insert(state_key.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_merge_output_wholesale() {
        let step: StepDefinition = serde_yaml::from_str(
            "id: s\ntype: system\noperation: {type: sdk, handler: h}\n",
        )
        .unwrap();
        let mut state = HashMap::new();
        merge_output(&step, Some(json!({"a": 1, "b": "x"})), &mut state);
        assert_eq!(state["a"], json!(1));
        assert_eq!(state["b"], json!("x"));

        // non-object bodies are dropped
        merge_output(&step, Some(json!([1, 2])), &mut state);
        assert_eq!(state.len(), 2);
    }

    #[test]
    fn test_merge_output_mapped() {
        let step: StepDefinition = serde_yaml::from_str(
            r#"
id: s
type: system
operation: {type: sdk, handler: h}
outputMapping:
  approval_state: status
"#,
        )
        .unwrap();
        let mut state = HashMap::new();
        merge_output(&step, Some(json!({"status": "ok", "noise": true})), &mut state);
        assert_eq!(state["approval_state"], json!("ok"));
        assert!(!state.contains_key("noise"));
    }

    #[test]
    fn test_find_transition_respects_conditions_and_order() {
        let definition: WorkflowDefinition = serde_yaml::from_str(
            r#"
id: wf
initialStep: a
steps:
  - {id: a, type: task}
  - {id: b, type: terminal}
  - {id: c, type: terminal}
transitions:
  - {from: a, to: b, event: go, condition: "mode == 'fast'"}
  - {from: a, to: c, event: go}
"#,
        )
        .unwrap();

        let fast = HashMap::from([("mode".to_string(), json!("fast"))]);
        let slow = HashMap::from([("mode".to_string(), json!("slow"))]);

        assert_eq!(find_transition(&definition, "a", "go", &fast).unwrap().to, "b");
        assert_eq!(find_transition(&definition, "a", "go", &slow).unwrap().to, "c");
        assert!(find_transition(&definition, "a", "other", &fast).is_none());
    }
}

//! End-to-end workflow engine scenarios over the in-memory store: the happy
//! path through an auto-step, chain limits, failure recovery, tenant
//! isolation, cancellation, and the timeout sweep.

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use switchboard::definitions::registry::DefinitionRegistry;
use switchboard::invoker::sdk::{SdkHandler, SdkInvoker};
use switchboard::invoker::{InvocationInput, InvocationResult, InvokerRegistry};
use switchboard::models::{
    CapabilitySet, DomainDefinition, RequestContext, WorkflowStatus, LAST_ERROR_KEY,
};
use switchboard::workflow::engine::WorkflowEngine;
use switchboard::workflow::store::{InMemoryWorkflowStore, WorkflowStore};
use switchboard::{Result, SwitchboardError};

struct OkHandler {
    calls: Arc<AtomicUsize>,
    body: Value,
}

#[async_trait]
impl SdkHandler for OkHandler {
    async fn handle(&self, _rctx: &RequestContext, _input: InvocationInput) -> Result<InvocationResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(InvocationResult {
            status_code: 200,
            headers: HashMap::new(),
            body: Some(self.body.clone()),
        })
    }
}

struct FailHandler;

#[async_trait]
impl SdkHandler for FailHandler {
    async fn handle(&self, _rctx: &RequestContext, _input: InvocationInput) -> Result<InvocationResult> {
        Err(SwitchboardError::BackendUnavailable {
            service: "billing".into(),
            message: "connection refused".into(),
        })
    }
}

struct Fixture {
    engine: WorkflowEngine,
    store: Arc<InMemoryWorkflowStore>,
    calls: Arc<AtomicUsize>,
}

fn fixture(workflow_yaml: &str, chain_limit: usize, failing: bool) -> Fixture {
    let def: DomainDefinition = serde_yaml::from_str(&format!(
        "domain: invoices\nversion: 1.0.0\nworkflows:\n{workflow_yaml}"
    ))
    .unwrap();
    let registry = Arc::new(DefinitionRegistry::with_definitions(vec![def]));

    let calls = Arc::new(AtomicUsize::new(0));
    let sdk = SdkInvoker::new();
    if failing {
        sdk.register("auto-op", Arc::new(FailHandler));
    } else {
        sdk.register(
            "auto-op",
            Arc::new(OkHandler {
                calls: Arc::clone(&calls),
                body: json!({"processed": true}),
            }),
        );
    }
    let mut invokers = InvokerRegistry::new();
    invokers.register(Arc::new(sdk));

    let store = Arc::new(InMemoryWorkflowStore::new());
    let engine = WorkflowEngine::new(
        registry,
        Arc::clone(&store) as Arc<dyn WorkflowStore>,
        Arc::new(invokers),
    )
    .with_chain_limit(chain_limit);

    Fixture { engine, store, calls }
}

fn rctx(tenant: &str) -> RequestContext {
    RequestContext::new("alice", tenant, "p1")
}

fn caps() -> CapabilitySet {
    CapabilitySet::wildcard()
}

const HAPPY_PATH: &str = r#"
  - id: approval
    initialStep: a
    capabilities: [invoices.approve]
    steps:
      - {id: a, type: task}
      - id: b
        type: system
        operation: {type: sdk, handler: auto-op}
      - {id: c, type: terminal}
    transitions:
      - {from: a, to: b, event: approved}
      - {from: b, to: c, event: completed}
"#;

#[tokio::test]
async fn happy_path_through_system_step() {
    let fx = fixture(HAPPY_PATH, 10, false);
    let cancel = CancellationToken::new();
    let rctx = rctx("t1");

    let instance = fx
        .engine
        .start(&cancel, &rctx, &caps(), "approval", HashMap::new())
        .await
        .unwrap();
    assert_eq!(instance.status, WorkflowStatus::Active);
    assert_eq!(instance.current_step, "a");
    assert_eq!(instance.version, 1);

    let advanced = fx
        .engine
        .advance(&cancel, &rctx, &caps(), instance.id, "approved", HashMap::new())
        .await
        .unwrap();

    assert_eq!(advanced.status, WorkflowStatus::Completed);
    assert_eq!(advanced.current_step, "c");
    // exactly one invocation, for step b
    assert_eq!(fx.calls.load(Ordering::SeqCst), 1);
    // state picked up the operation's output
    assert_eq!(advanced.state.get("processed"), Some(&json!(true)));

    let events = fx.store.get_events("t1", instance.id).await.unwrap();
    let names: Vec<&str> = events.iter().map(|e| e.event.as_str()).collect();
    assert!(names.contains(&"step_entered"));
    assert!(names.contains(&"approved"));
    assert!(names.contains(&"workflow_completed"));
}

#[tokio::test]
async fn start_requires_workflow_capability() {
    let fx = fixture(HAPPY_PATH, 10, false);
    let err = fx
        .engine
        .start(
            &CancellationToken::new(),
            &rctx("t1"),
            &CapabilitySet::from_iter(["invoices.read"]),
            "approval",
            HashMap::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");
}

#[tokio::test]
async fn unknown_event_is_invalid_transition() {
    let fx = fixture(HAPPY_PATH, 10, false);
    let cancel = CancellationToken::new();
    let rctx = rctx("t1");

    let instance = fx
        .engine
        .start(&cancel, &rctx, &caps(), "approval", HashMap::new())
        .await
        .unwrap();
    let err = fx
        .engine
        .advance(&cancel, &rctx, &caps(), instance.id, "rejected", HashMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "INVALID_TRANSITION");
}

#[tokio::test]
async fn tenant_isolation_hides_instances() {
    let fx = fixture(HAPPY_PATH, 10, false);
    let cancel = CancellationToken::new();

    let instance = fx
        .engine
        .start(&cancel, &rctx("t1"), &caps(), "approval", HashMap::new())
        .await
        .unwrap();

    let err = fx
        .engine
        .advance(&cancel, &rctx("t2"), &caps(), instance.id, "approved", HashMap::new())
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");

    let err = fx
        .engine
        .get(&rctx("t2"), &caps(), instance.id)
        .await
        .unwrap_err();
    assert_eq!(err.code(), "NOT_FOUND");
}

const CHAIN_LOOP: &str = r#"
  - id: ping-pong
    initialStep: a
    steps:
      - id: a
        type: system
        operation: {type: sdk, handler: auto-op}
      - id: b
        type: system
        operation: {type: sdk, handler: auto-op}
      - {id: z, type: terminal}
    transitions:
      - {from: a, to: b, event: completed}
      - {from: b, to: a, event: completed}
      - {from: a, to: z, event: never}
"#;

#[tokio::test]
async fn chain_limit_suspends_the_instance() {
    let fx = fixture(CHAIN_LOOP, 5, false);
    let err = fx
        .engine
        .start(&CancellationToken::new(), &rctx("t1"), &caps(), "ping-pong", HashMap::new())
        .await
        .unwrap_err();

    let id = match &err {
        SwitchboardError::ChainLimit { id, limit } => {
            assert_eq!(*limit, 5);
            Uuid::parse_str(id).unwrap()
        }
        other => panic!("expected ChainLimit, got {other:?}"),
    };

    let instance = fx.store.get("t1", id).await.unwrap();
    assert_eq!(instance.status, WorkflowStatus::Suspended);
    assert_eq!(fx.calls.load(Ordering::SeqCst), 5);

    let events = fx.store.get_events("t1", id).await.unwrap();
    let suspended = events.iter().find(|e| e.event == "workflow_suspended").unwrap();
    assert_eq!(suspended.comment.as_deref(), Some("chain limit reached"));
}

const ERROR_RECOVERY: &str = r#"
  - id: resilient
    initialStep: a
    steps:
      - {id: a, type: task}
      - id: b
        type: system
        operation: {type: sdk, handler: auto-op}
      - {id: fix, type: task}
      - {id: done, type: terminal}
    transitions:
      - {from: a, to: b, event: go}
      - {from: b, to: done, event: completed}
      - {from: b, to: fix, event: error}
      - {from: fix, to: done, event: fixed}
"#;

#[tokio::test]
async fn system_failure_takes_the_error_transition() {
    let fx = fixture(ERROR_RECOVERY, 10, true);
    let cancel = CancellationToken::new();
    let rctx = rctx("t1");

    let instance = fx
        .engine
        .start(&cancel, &rctx, &caps(), "resilient", HashMap::new())
        .await
        .unwrap();
    let advanced = fx
        .engine
        .advance(&cancel, &rctx, &caps(), instance.id, "go", HashMap::new())
        .await
        .unwrap();

    assert_eq!(advanced.status, WorkflowStatus::Active);
    assert_eq!(advanced.current_step, "fix");
    assert!(advanced.state.contains_key(LAST_ERROR_KEY));

    let events = fx.store.get_events("t1", instance.id).await.unwrap();
    assert!(events.iter().any(|e| e.event == "step_failed"));
}

const NO_ERROR_HANDLER: &str = r#"
  - id: fragile
    initialStep: a
    steps:
      - {id: a, type: task}
      - id: b
        type: system
        operation: {type: sdk, handler: auto-op}
      - {id: done, type: terminal}
    transitions:
      - {from: a, to: b, event: go}
      - {from: b, to: done, event: completed}
"#;

#[tokio::test]
async fn system_failure_without_handler_suspends() {
    let fx = fixture(NO_ERROR_HANDLER, 10, true);
    let cancel = CancellationToken::new();
    let rctx = rctx("t1");

    let instance = fx
        .engine
        .start(&cancel, &rctx, &caps(), "fragile", HashMap::new())
        .await
        .unwrap();
    let advanced = fx
        .engine
        .advance(&cancel, &rctx, &caps(), instance.id, "go", HashMap::new())
        .await
        .unwrap();

    assert_eq!(advanced.status, WorkflowStatus::Suspended);
    let events = fx.store.get_events("t1", instance.id).await.unwrap();
    assert!(events.iter().any(|e| e.event == "workflow_suspended"));
}

const NOTIFICATION_FLOW: &str = r#"
  - id: notify
    initialStep: a
    steps:
      - {id: a, type: task}
      - id: n
        type: notification
        operation: {type: sdk, handler: auto-op}
      - {id: done, type: terminal}
    transitions:
      - {from: a, to: n, event: go}
      - {from: n, to: done, event: completed}
"#;

#[tokio::test]
async fn notification_failure_is_best_effort() {
    let fx = fixture(NOTIFICATION_FLOW, 10, true);
    let cancel = CancellationToken::new();
    let rctx = rctx("t1");

    let instance = fx
        .engine
        .start(&cancel, &rctx, &caps(), "notify", HashMap::new())
        .await
        .unwrap();
    let advanced = fx
        .engine
        .advance(&cancel, &rctx, &caps(), instance.id, "go", HashMap::new())
        .await
        .unwrap();

    // the notification failed but the workflow still completed
    assert_eq!(advanced.status, WorkflowStatus::Completed);
    assert!(advanced.state.contains_key(LAST_ERROR_KEY));

    let events = fx.store.get_events("t1", instance.id).await.unwrap();
    assert!(events.iter().any(|e| e.event == "step_failed"));
    assert!(events.iter().any(|e| e.event == "workflow_completed"));
}

const GUARDED: &str = r#"
  - id: guarded
    initialStep: a
    steps:
      - {id: a, type: task}
      - {id: done, type: terminal}
    transitions:
      - {from: a, to: done, event: approve, guard: invoices.approve}
"#;

#[tokio::test]
async fn transition_guard_is_enforced() {
    let fx = fixture(GUARDED, 10, false);
    let cancel = CancellationToken::new();
    let rctx = rctx("t1");

    let instance = fx
        .engine
        .start(&cancel, &rctx, &caps(), "guarded", HashMap::new())
        .await
        .unwrap();

    let err = fx
        .engine
        .advance(
            &cancel,
            &rctx,
            &CapabilitySet::from_iter(["invoices.read"]),
            instance.id,
            "approve",
            HashMap::new(),
        )
        .await
        .unwrap_err();
    assert_eq!(err.code(), "FORBIDDEN");

    let advanced = fx
        .engine
        .advance(
            &cancel,
            &rctx,
            &CapabilitySet::from_iter(["invoices.approve"]),
            instance.id,
            "approve",
            HashMap::new(),
        )
        .await
        .unwrap();
    assert_eq!(advanced.status, WorkflowStatus::Completed);
}

const CONDITIONAL: &str = r#"
  - id: routed
    initialStep: a
    steps:
      - {id: a, type: task}
      - {id: express, type: terminal}
      - {id: standard, type: terminal}
    transitions:
      - {from: a, to: express, event: submit, condition: "priority == 'high'"}
      - {from: a, to: standard, event: submit}
"#;

#[tokio::test]
async fn conditions_route_against_persisted_state() {
    let fx = fixture(CONDITIONAL, 10, false);
    let cancel = CancellationToken::new();
    let rctx = rctx("t1");

    // priority persisted at start steers the routing
    let high = fx
        .engine
        .start(
            &cancel,
            &rctx,
            &caps(),
            "routed",
            HashMap::from([("priority".to_string(), json!("high"))]),
        )
        .await
        .unwrap();
    let advanced = fx
        .engine
        .advance(&cancel, &rctx, &caps(), high.id, "submit", HashMap::new())
        .await
        .unwrap();
    assert_eq!(advanced.current_step, "express");

    let low = fx
        .engine
        .start(&cancel, &rctx, &caps(), "routed", HashMap::new())
        .await
        .unwrap();
    let advanced = fx
        .engine
        .advance(&cancel, &rctx, &caps(), low.id, "submit", HashMap::new())
        .await
        .unwrap();
    assert_eq!(advanced.current_step, "standard");
}

#[tokio::test]
async fn advance_input_does_not_steer_the_same_call() {
    let fx = fixture(CONDITIONAL, 10, false);
    let cancel = CancellationToken::new();
    let rctx = rctx("t1");

    // the condition is evaluated before the caller's input is merged, so
    // submitting priority=high in the same call still takes the fallback
    let instance = fx
        .engine
        .start(&cancel, &rctx, &caps(), "routed", HashMap::new())
        .await
        .unwrap();
    let advanced = fx
        .engine
        .advance(
            &cancel,
            &rctx,
            &caps(),
            instance.id,
            "submit",
            HashMap::from([("priority".to_string(), json!("high"))]),
        )
        .await
        .unwrap();
    assert_eq!(advanced.current_step, "standard");
    // the input still lands in state after the routing decision
    assert_eq!(advanced.state.get("priority"), Some(&json!("high")));
}

#[tokio::test]
async fn cancel_only_from_active_or_suspended() {
    let fx = fixture(HAPPY_PATH, 10, false);
    let cancel = CancellationToken::new();
    let rctx = rctx("t1");

    let instance = fx
        .engine
        .start(&cancel, &rctx, &caps(), "approval", HashMap::new())
        .await
        .unwrap();

    let cancelled = fx
        .engine
        .cancel(&rctx, instance.id, "changed my mind")
        .await
        .unwrap();
    assert_eq!(cancelled.status, WorkflowStatus::Cancelled);

    let err = fx
        .engine
        .cancel(&rctx, instance.id, "again")
        .await
        .unwrap_err();
    assert_eq!(err.code(), "WORKFLOW_NOT_ACTIVE");

    let events = fx.store.get_events("t1", instance.id).await.unwrap();
    let event = events.iter().find(|e| e.event == "cancelled").unwrap();
    assert_eq!(event.comment.as_deref(), Some("changed my mind"));
}

const TIMEOUTED: &str = r#"
  - id: expiring
    initialStep: a
    timeout: 1ms
    onTimeout: expired
    steps:
      - {id: a, type: task}
      - {id: expired, type: task}
      - {id: done, type: terminal}
    transitions:
      - {from: a, to: done, event: finish}
      - {from: expired, to: done, event: finish}
"#;

#[tokio::test]
async fn timeout_sweep_reroutes_to_handler() {
    let fx = fixture(TIMEOUTED, 10, false);
    let cancel = CancellationToken::new();
    let rctx = rctx("t1");

    let instance = fx
        .engine
        .start(&cancel, &rctx, &caps(), "expiring", HashMap::new())
        .await
        .unwrap();
    assert!(instance.expires_at.is_some());

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let processed = fx.engine.process_timeouts(&cancel).await.unwrap();
    assert_eq!(processed, 1);

    let updated = fx.store.get("t1", instance.id).await.unwrap();
    assert_eq!(updated.current_step, "expired");
    assert_eq!(updated.status, WorkflowStatus::Active);
    // handled: the sweep must not pick it up again
    assert!(updated.expires_at.is_none());

    let events = fx.store.get_events("t1", instance.id).await.unwrap();
    assert!(events.iter().any(|e| e.event == "timeout"));
}

const TIMEOUT_NO_HANDLER: &str = r#"
  - id: doomed
    initialStep: a
    timeout: 1ms
    steps:
      - {id: a, type: task}
      - {id: done, type: terminal}
    transitions:
      - {from: a, to: done, event: finish}
"#;

#[tokio::test]
async fn timeout_without_handler_fails_the_instance() {
    let fx = fixture(TIMEOUT_NO_HANDLER, 10, false);
    let cancel = CancellationToken::new();
    let rctx = rctx("t1");

    let instance = fx
        .engine
        .start(&cancel, &rctx, &caps(), "doomed", HashMap::new())
        .await
        .unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    fx.engine.process_timeouts(&cancel).await.unwrap();

    let updated = fx.store.get("t1", instance.id).await.unwrap();
    assert_eq!(updated.status, WorkflowStatus::Failed);

    let events = fx.store.get_events("t1", instance.id).await.unwrap();
    let failed = events.iter().find(|e| e.event == "workflow_failed").unwrap();
    assert_eq!(failed.comment.as_deref(), Some("timeout with no handler"));
}

#[tokio::test]
async fn list_pages_active_instances() {
    let fx = fixture(HAPPY_PATH, 10, false);
    let cancel = CancellationToken::new();
    let rctx = rctx("t1");

    for _ in 0..3 {
        fx.engine
            .start(&cancel, &rctx, &caps(), "approval", HashMap::new())
            .await
            .unwrap();
    }

    let (page, total) = fx
        .engine
        .list(
            &rctx,
            switchboard::workflow::engine::ListQuery {
                workflow_id: Some("approval".into()),
                page: Some(1),
                page_size: Some(2),
            },
        )
        .await
        .unwrap();
    assert_eq!(total, 3);
    assert_eq!(page.len(), 2);
}

#[tokio::test]
async fn descriptor_includes_history_and_steps() {
    let fx = fixture(HAPPY_PATH, 10, false);
    let cancel = CancellationToken::new();
    let rctx = rctx("t1");

    let instance = fx
        .engine
        .start(&cancel, &rctx, &caps(), "approval", HashMap::new())
        .await
        .unwrap();
    let descriptor = fx.engine.get(&rctx, &caps(), instance.id).await.unwrap();

    assert_eq!(descriptor.instance.id, instance.id);
    assert_eq!(descriptor.current_step.as_ref().unwrap().id, "a");
    assert_eq!(descriptor.steps.len(), 3);
    assert!(!descriptor.history.is_empty());
}

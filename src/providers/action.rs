// Action provider - command execution against backend operations

use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::definitions::registry::DefinitionRegistry;
use crate::invoker::{InvocationInput, InvocationResult, InvokerRegistry};
use crate::models::{CapabilitySet, CommandDefinition, RequestContext};
use crate::{Result, SwitchboardError};

/// Executes commands: capability check, then straight to the bound
/// operation. The raw invocation result flows back so the HTTP layer can
/// mirror the backend's status code.
pub struct ActionProvider {
    registry: Arc<DefinitionRegistry>,
    invokers: Arc<InvokerRegistry>,
}

impl ActionProvider {
    pub fn new(registry: Arc<DefinitionRegistry>, invokers: Arc<InvokerRegistry>) -> Self {
        ActionProvider { registry, invokers }
    }

    /// Execute `command_id` with the caller-supplied input body.
    /// `idempotency_key` (from `X-Idempotency-Key`) is forwarded verbatim.
    pub async fn execute(
        &self,
        cancel: &CancellationToken,
        rctx: &RequestContext,
        caps: &CapabilitySet,
        command_id: &str,
        input: Option<Value>,
        idempotency_key: Option<String>,
    ) -> Result<InvocationResult> {
        let snapshot = self.registry.snapshot();
        let entry = snapshot
            .command(command_id)
            .ok_or_else(|| SwitchboardError::NotFound {
                kind: "command",
                id: command_id.to_string(),
            })?;

        run_command(
            self.invokers.as_ref(),
            cancel,
            rctx,
            caps,
            &entry.item,
            input,
            idempotency_key,
        )
        .await
    }
}

/// Shared command execution path, also used by form submission.
pub(crate) async fn run_command(
    invokers: &InvokerRegistry,
    cancel: &CancellationToken,
    rctx: &RequestContext,
    caps: &CapabilitySet,
    command: &CommandDefinition,
    input: Option<Value>,
    idempotency_key: Option<String>,
) -> Result<InvocationResult> {
    if !caps.has_all(command.capabilities.iter().map(String::as_str)) {
        return Err(SwitchboardError::Forbidden {
            reason: format!("missing capability for command '{}'", command.id),
        });
    }

    let mut invocation = InvocationInput {
        body: input,
        ..InvocationInput::default()
    };
    if let Some(key) = idempotency_key {
        invocation
            .headers
            .insert("X-Idempotency-Key".to_string(), key);
    }

    info!(
        command = %command.id,
        subject = %rctx.subject_id,
        tenant = %rctx.tenant_id,
        "executing command"
    );
    invokers.invoke(cancel, rctx, &command.operation, invocation).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::sdk::{SdkHandler, SdkInvoker};
    use crate::models::DomainDefinition;
    use async_trait::async_trait;
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct RecordingHandler {
        inputs: Arc<Mutex<Vec<InvocationInput>>>,
    }

    #[async_trait]
    impl SdkHandler for RecordingHandler {
        async fn handle(
            &self,
            _rctx: &RequestContext,
            input: InvocationInput,
        ) -> Result<InvocationResult> {
            self.inputs.lock().unwrap().push(input);
            Ok(InvocationResult {
                status_code: 202,
                headers: HashMap::new(),
                body: Some(json!({"accepted": true})),
            })
        }
    }

    fn fixture() -> (ActionProvider, Arc<Mutex<Vec<InvocationInput>>>) {
        let def: DomainDefinition = serde_yaml::from_str(
            r#"
domain: invoices
version: 1.0.0
commands:
  - id: approve
    capabilities: [invoices.approve]
    operation: {type: sdk, handler: approve-invoice}
"#,
        )
        .unwrap();
        let registry = Arc::new(DefinitionRegistry::with_definitions(vec![def]));

        let inputs = Arc::new(Mutex::new(Vec::new()));
        let sdk = SdkInvoker::new();
        sdk.register(
            "approve-invoice",
            Arc::new(RecordingHandler { inputs: Arc::clone(&inputs) }),
        );
        let mut invokers = InvokerRegistry::new();
        invokers.register(Arc::new(sdk));

        (ActionProvider::new(registry, Arc::new(invokers)), inputs)
    }

    #[tokio::test]
    async fn test_execute_passes_body_and_idempotency_key() {
        let (provider, inputs) = fixture();
        let rctx = RequestContext::new("alice", "t1", "p1");
        let caps = CapabilitySet::from_iter(["invoices.approve"]);

        let result = provider
            .execute(
                &CancellationToken::new(),
                &rctx,
                &caps,
                "approve",
                Some(json!({"invoiceId": "INV-1"})),
                Some("key-123".into()),
            )
            .await
            .unwrap();
        assert_eq!(result.status_code, 202);

        let seen = inputs.lock().unwrap();
        assert_eq!(seen[0].body, Some(json!({"invoiceId": "INV-1"})));
        assert_eq!(seen[0].headers["X-Idempotency-Key"], "key-123");
    }

    #[tokio::test]
    async fn test_capability_and_existence_checks() {
        let (provider, _) = fixture();
        let rctx = RequestContext::new("alice", "t1", "p1");

        let err = provider
            .execute(
                &CancellationToken::new(),
                &rctx,
                &CapabilitySet::new(),
                "approve",
                None,
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");

        let err = provider
            .execute(
                &CancellationToken::new(),
                &rctx,
                &CapabilitySet::wildcard(),
                "reject",
                None,
                None,
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }
}

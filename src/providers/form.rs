// Form provider - descriptors, pre-population, and submission

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::action::run_command;
use super::require_success;
use crate::definitions::registry::DefinitionRegistry;
use crate::invoker::{InvocationInput, InvocationResult, InvokerRegistry};
use crate::models::{CapabilitySet, FormDefinition, RequestContext};
use crate::{Result, SwitchboardError};

/// What the client renders for a form.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormDescriptor {
    pub id: String,
    pub domain: String,
    pub title: String,
    pub fields: Vec<FormFieldDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submit_command: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormFieldDescriptor {
    pub id: String,
    pub label: String,
    #[serde(rename = "type")]
    pub field_type: String,
    pub required: bool,
    pub read_only: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lookup: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FormDataResponse {
    pub data: Value,
}

pub struct FormProvider {
    registry: Arc<DefinitionRegistry>,
    invokers: Arc<InvokerRegistry>,
}

impl FormProvider {
    pub fn new(registry: Arc<DefinitionRegistry>, invokers: Arc<InvokerRegistry>) -> Self {
        FormProvider { registry, invokers }
    }

    /// Capability-checked form descriptor with `read_only` folded to a
    /// boolean (`"true"` and `"always"` both mean read-only).
    pub fn get_form(&self, caps: &CapabilitySet, form_id: &str) -> Result<FormDescriptor> {
        let snapshot = self.registry.snapshot();
        let entry = snapshot.form(form_id).ok_or_else(|| SwitchboardError::NotFound {
            kind: "form",
            id: form_id.to_string(),
        })?;
        require_form_access(caps, &entry.item, form_id)?;

        let form = &entry.item;
        Ok(FormDescriptor {
            id: form.id.clone(),
            domain: entry.domain.clone(),
            title: form.title.clone(),
            fields: form
                .fields
                .iter()
                .map(|f| FormFieldDescriptor {
                    id: f.id.clone(),
                    label: f.label.clone(),
                    field_type: f.field_type.clone(),
                    required: f.required,
                    read_only: f.is_read_only(),
                    lookup: f.lookup.clone(),
                })
                .collect(),
            submit_command: form.submit_command.clone(),
        })
    }

    /// Pre-populate the form from its data operation. `params` addresses the
    /// backing entity and substitutes into the operation's path template.
    pub async fn get_form_data(
        &self,
        cancel: &CancellationToken,
        rctx: &RequestContext,
        caps: &CapabilitySet,
        form_id: &str,
        params: HashMap<String, String>,
    ) -> Result<FormDataResponse> {
        let snapshot = self.registry.snapshot();
        let entry = snapshot.form(form_id).ok_or_else(|| SwitchboardError::NotFound {
            kind: "form",
            id: form_id.to_string(),
        })?;
        require_form_access(caps, &entry.item, form_id)?;

        let operation = entry.item.data.as_ref().ok_or_else(|| SwitchboardError::BadRequest {
            message: format!("form '{form_id}' has no data source"),
        })?;

        let input = InvocationInput {
            path_params: params,
            ..InvocationInput::default()
        };
        let result = self.invokers.invoke(cancel, rctx, operation, input).await?;
        let result = require_success("form data", result)?;

        Ok(FormDataResponse {
            data: result.body.unwrap_or(Value::Null),
        })
    }

    /// Submit the form through its submit command.
    pub async fn submit(
        &self,
        cancel: &CancellationToken,
        rctx: &RequestContext,
        caps: &CapabilitySet,
        form_id: &str,
        input: Option<Value>,
        idempotency_key: Option<String>,
    ) -> Result<InvocationResult> {
        let snapshot = self.registry.snapshot();
        let entry = snapshot.form(form_id).ok_or_else(|| SwitchboardError::NotFound {
            kind: "form",
            id: form_id.to_string(),
        })?;
        require_form_access(caps, &entry.item, form_id)?;

        let command_id = entry.item.submit_command.as_ref().ok_or_else(|| {
            SwitchboardError::BadRequest {
                message: format!("form '{form_id}' has no submit command"),
            }
        })?;
        let command = snapshot
            .command(command_id)
            .ok_or_else(|| SwitchboardError::NotFound {
                kind: "command",
                id: command_id.clone(),
            })?;

        run_command(
            self.invokers.as_ref(),
            cancel,
            rctx,
            caps,
            &command.item,
            input,
            idempotency_key,
        )
        .await
    }
}

fn require_form_access(caps: &CapabilitySet, form: &FormDefinition, form_id: &str) -> Result<()> {
    if !caps.has_all(form.capabilities.iter().map(String::as_str)) {
        return Err(SwitchboardError::Forbidden {
            reason: format!("missing capability for form '{form_id}'"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::sdk::{SdkHandler, SdkInvoker};
    use crate::models::DomainDefinition;
    use async_trait::async_trait;
    use serde_json::json;

    struct EntityHandler;

    #[async_trait]
    impl SdkHandler for EntityHandler {
        async fn handle(
            &self,
            _rctx: &RequestContext,
            input: InvocationInput,
        ) -> Result<InvocationResult> {
            Ok(InvocationResult {
                status_code: 200,
                headers: HashMap::new(),
                body: Some(json!({"id": input.path_params.get("id"), "amount": 42})),
            })
        }
    }

    struct SubmitHandler;

    #[async_trait]
    impl SdkHandler for SubmitHandler {
        async fn handle(
            &self,
            _rctx: &RequestContext,
            input: InvocationInput,
        ) -> Result<InvocationResult> {
            Ok(InvocationResult {
                status_code: 201,
                headers: HashMap::new(),
                body: input.body,
            })
        }
    }

    fn fixture() -> FormProvider {
        let def: DomainDefinition = serde_yaml::from_str(
            r#"
domain: invoices
version: 1.0.0
commands:
  - id: save-invoice
    capabilities: [invoices.write]
    operation: {type: sdk, handler: save-invoice}
forms:
  - id: invoice-form
    title: Edit Invoice
    capabilities: [invoices.write]
    submitCommand: save-invoice
    data: {type: sdk, handler: load-invoice}
    fields:
      - {id: number, label: Number, type: text, required: true, read_only: always}
      - {id: amount, label: Amount, type: number, required: true}
      - {id: currency, label: Currency, type: select, lookup: currencies}
lookups:
  - id: currencies
    operation: {type: sdk, handler: currencies}
    labelField: name
    valueField: code
"#,
        )
        .unwrap();
        let registry = Arc::new(DefinitionRegistry::with_definitions(vec![def]));

        let sdk = SdkInvoker::new();
        sdk.register("load-invoice", Arc::new(EntityHandler));
        sdk.register("save-invoice", Arc::new(SubmitHandler));
        let mut invokers = InvokerRegistry::new();
        invokers.register(Arc::new(sdk));

        FormProvider::new(registry, Arc::new(invokers))
    }

    #[test]
    fn test_descriptor_folds_read_only() {
        let provider = fixture();
        let caps = CapabilitySet::from_iter(["invoices.write"]);
        let descriptor = provider.get_form(&caps, "invoice-form").unwrap();

        assert_eq!(descriptor.fields.len(), 3);
        assert!(descriptor.fields[0].read_only);
        assert!(!descriptor.fields[1].read_only);
        assert_eq!(descriptor.fields[2].lookup.as_deref(), Some("currencies"));
        assert_eq!(descriptor.submit_command.as_deref(), Some("save-invoice"));
    }

    #[tokio::test]
    async fn test_form_data_addresses_entity() {
        let provider = fixture();
        let caps = CapabilitySet::from_iter(["invoices.write"]);
        let rctx = RequestContext::new("alice", "t1", "p1");

        let mut params = HashMap::new();
        params.insert("id".to_string(), "INV-1".to_string());
        let response = provider
            .get_form_data(&CancellationToken::new(), &rctx, &caps, "invoice-form", params)
            .await
            .unwrap();
        assert_eq!(response.data["id"], json!("INV-1"));
    }

    #[tokio::test]
    async fn test_submit_runs_the_submit_command() {
        let provider = fixture();
        let caps = CapabilitySet::from_iter(["invoices.write"]);
        let rctx = RequestContext::new("alice", "t1", "p1");

        let result = provider
            .submit(
                &CancellationToken::new(),
                &rctx,
                &caps,
                "invoice-form",
                Some(json!({"amount": 99})),
                None,
            )
            .await
            .unwrap();
        assert_eq!(result.status_code, 201);
        assert_eq!(result.body, Some(json!({"amount": 99})));
    }

    #[test]
    fn test_form_capability_enforced() {
        let provider = fixture();
        let err = provider
            .get_form(&CapabilitySet::new(), "invoice-form")
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");
    }
}

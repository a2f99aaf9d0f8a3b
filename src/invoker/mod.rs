// Invoker framework - pluggable dispatch of operation bindings

//! # Invoker Framework
//!
//! An [`OperationInvoker`] knows how to execute some class of
//! [`OperationBinding`]s. Two implementations ship here:
//!
//! - [`http::OpenApiInvoker`] builds HTTP requests from the OpenAPI index and
//!   executes them with per-service circuit breaking and idempotent retries
//! - [`sdk::SdkInvoker`] dispatches to named in-process handlers
//!
//! The [`InvokerRegistry`] tries invokers in registration order and delegates
//! to the first that supports the binding. New transports are added by
//! implementing the trait and registering; the registry never changes.

pub mod breaker;
pub mod http;
pub mod sdk;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::models::{OperationBinding, RequestContext};
use crate::{Result, SwitchboardError};

/// Everything an invocation may carry toward the backend.
#[derive(Debug, Clone, Default)]
pub struct InvocationInput {
    /// Substituted into `{name}` placeholders of the path template
    pub path_params: HashMap<String, String>,

    /// Appended to the URL; ordered for deterministic encoding
    pub query_params: BTreeMap<String, String>,

    /// Custom headers, applied last so they may override the standard set
    pub headers: HashMap<String, String>,

    /// JSON request body
    pub body: Option<Value>,
}

impl InvocationInput {
    pub fn with_body(body: Value) -> Self {
        InvocationInput {
            body: Some(body),
            ..InvocationInput::default()
        }
    }

    pub fn query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query_params.insert(key.into(), value.into());
        self
    }

    pub fn path_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.path_params.insert(key.into(), value.into());
        self
    }
}

/// What came back from the backend.
#[derive(Debug, Clone)]
pub struct InvocationResult {
    pub status_code: u16,

    /// Allow-listed response headers, lower-cased names
    pub headers: HashMap<String, String>,

    /// Parsed JSON body; `None` for empty or non-JSON responses
    pub body: Option<Value>,
}

impl InvocationResult {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Capability implemented by every dispatch backend.
#[async_trait]
pub trait OperationInvoker: Send + Sync {
    /// Whether this invoker can execute the binding.
    fn supports(&self, binding: &OperationBinding) -> bool;

    /// Execute the binding. `cancel` propagates caller cancellation into
    /// retries, backoff waits, and the wire call itself.
    async fn invoke(
        &self,
        cancel: &CancellationToken,
        rctx: &RequestContext,
        binding: &OperationBinding,
        input: InvocationInput,
    ) -> Result<InvocationResult>;
}

/// Ordered collection of invokers; first match wins.
#[derive(Default)]
pub struct InvokerRegistry {
    invokers: Vec<Arc<dyn OperationInvoker>>,
}

impl InvokerRegistry {
    pub fn new() -> Self {
        InvokerRegistry::default()
    }

    /// Append an invoker. Registration order is dispatch order.
    pub fn register(&mut self, invoker: Arc<dyn OperationInvoker>) {
        self.invokers.push(invoker);
    }

    /// Dispatch to the first invoker that supports the binding.
    pub async fn invoke(
        &self,
        cancel: &CancellationToken,
        rctx: &RequestContext,
        binding: &OperationBinding,
        input: InvocationInput,
    ) -> Result<InvocationResult> {
        for invoker in &self.invokers {
            if invoker.supports(binding) {
                return invoker.invoke(cancel, rctx, binding, input).await;
            }
        }
        Err(SwitchboardError::NoInvoker {
            binding_type: binding.binding_type.as_str().to_string(),
        })
    }
}

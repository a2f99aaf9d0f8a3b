// SDK invoker - in-process handlers addressed by name

//! # SDK Invoker
//!
//! Some operations never leave the process: report generation, composite
//! aggregations, dev fixtures. They register as named [`SdkHandler`]s and are
//! addressed by `sdk` bindings via `binding.handler`.
//!
//! Registration happens during startup and is exclusive: registering the
//! same name twice is a wiring bug, and the invoker panics rather than
//! letting one handler silently shadow another. The registry is effectively
//! immutable once the server starts serving.

use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{InvocationInput, InvocationResult, OperationInvoker};
use crate::models::{BindingType, OperationBinding, RequestContext};
use crate::{Result, SwitchboardError};

/// An in-process operation implementation.
#[async_trait]
pub trait SdkHandler: Send + Sync {
    async fn handle(
        &self,
        rctx: &RequestContext,
        input: InvocationInput,
    ) -> Result<InvocationResult>;
}

/// Dispatches `sdk` bindings to registered handlers.
#[derive(Default)]
pub struct SdkInvoker {
    handlers: DashMap<String, Arc<dyn SdkHandler>>,
}

impl SdkInvoker {
    pub fn new() -> Self {
        SdkInvoker::default()
    }

    /// Register a handler under an exclusive name.
    ///
    /// # Panics
    /// Panics when the name is already taken - a startup wiring error.
    pub fn register(&self, name: impl Into<String>, handler: Arc<dyn SdkHandler>) {
        let name = name.into();
        debug!(handler = %name, "registering sdk handler");
        if self.handlers.insert(name.clone(), handler).is_some() {
            panic!("sdk handler '{name}' registered twice");
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

#[async_trait]
impl OperationInvoker for SdkInvoker {
    fn supports(&self, binding: &OperationBinding) -> bool {
        binding.binding_type == BindingType::Sdk
    }

    async fn invoke(
        &self,
        _cancel: &CancellationToken,
        rctx: &RequestContext,
        binding: &OperationBinding,
        input: InvocationInput,
    ) -> Result<InvocationResult> {
        let handler = self
            .handlers
            .get(&binding.handler)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| SwitchboardError::HandlerNotFound {
                handler: binding.handler.clone(),
            })?;
        handler.handle(rctx, input).await
    }
}

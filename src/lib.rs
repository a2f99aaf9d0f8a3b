// Switchboard - metadata-driven backend-for-frontend
// Declarative domain definitions in, capability-filtered UI descriptors out

//! # Switchboard Library
//!
//! Switchboard loads declarative domain definitions (navigation, pages, forms,
//! commands, workflows, searches, lookups) from YAML, validates them against the
//! OpenAPI contracts of downstream services, and serves them to UI clients as
//! capability-filtered descriptors. Requests that need backend data are dispatched
//! through a pluggable invoker framework; long-running business processes run on a
//! persisted workflow state machine.
//!
//! ## Core Components
//!
//! ### Domain Models
//! - [`DomainDefinition`]: one loaded definition file - the unit of configuration
//! - [`RequestContext`]: immutable per-request identity (subject, tenant, partition)
//! - [`CapabilitySet`]: string permission tokens with `*` wildcard support
//! - [`WorkflowInstance`]: a persisted, optimistically-versioned state machine run
//!
//! ### Subsystems
//! - [`openapi::OpenApiIndex`]: `(service, operation)` -> method/path/base-url index
//! - [`definitions`]: loader, validator, and the atomically swappable registry
//! - [`invoker`]: the `OperationInvoker` trait, the OpenAPI HTTP invoker with
//!   per-service circuit breakers and idempotent retries, and the SDK invoker
//! - [`providers`]: menu/page/form/action projection plus lookup caching and
//!   concurrent search fan-out
//! - [`workflow`]: the state-machine engine and its store contract
//! - [`server`]: the axum HTTP surface consumed by UI clients
//!
//! ## Snapshot Discipline
//!
//! The definition registry never mutates in place. A reload builds a complete new
//! snapshot and swaps a single pointer; readers follow the pointer with one atomic
//! load and never observe a torn or partial snapshot.

// Core domain models (language-agnostic)
pub mod models;

// OpenAPI operation index
pub mod openapi;

// Definition loading, validation, and the registry snapshot
pub mod definitions;

// Backend invocation: invoker trait, HTTP invoker, SDK invoker, circuit breaker
pub mod invoker;

// Scope-keyed TTL cache shared by lookups and capability resolution
pub mod cache;

// Capability resolution against the external policy evaluator
pub mod capability;

// Metadata providers: menu, page, form, action, lookup, search
pub mod providers;

// Workflow engine and store implementations
pub mod workflow;

// HTTP surface
pub mod server;

// Layered configuration
pub mod config;

// Re-export core domain types for easy access
pub use models::{
    CacheScope, CapabilitySet, CommandDefinition, DomainDefinition, FormDefinition,
    LookupDefinition, NavigationItem, OperationBinding, PageDefinition, RequestContext,
    SearchDefinition, StepDefinition, StepType, TransitionDefinition, WorkflowDefinition,
    WorkflowEvent, WorkflowInstance, WorkflowStatus,
};

pub use definitions::{
    loader::DefinitionLoader,
    registry::{DefinitionRegistry, Snapshot},
    validator::{validate_definitions, ValidationError},
};

pub use invoker::{
    breaker::{BreakerState, CircuitBreaker, CircuitBreakerConfig},
    http::{OpenApiInvoker, ServiceClientConfig},
    sdk::{SdkHandler, SdkInvoker},
    InvocationInput, InvocationResult, InvokerRegistry, OperationInvoker,
};

pub use capability::{CapabilityResolver, PolicyEvaluator};
pub use openapi::{IndexedOperation, OpenApiIndex, ServiceSpecSource};
pub use workflow::{
    engine::WorkflowEngine,
    store::{InMemoryWorkflowStore, InstanceFilters, WorkflowStore},
};

// Core error types
use thiserror::Error;

/// Crate-wide error type.
///
/// Every failure the core can originate maps onto a stable wire code via
/// [`SwitchboardError::code`]; the HTTP layer renders that code inside the
/// error envelope so UI clients can switch on it without parsing messages.
#[derive(Error, Debug)]
pub enum SwitchboardError {
    /// An entity (definition, instance, page, ...) does not exist - or is
    /// hidden by tenant scoping, which is indistinguishable on purpose
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// Caller lacks a required capability
    #[error("forbidden: {reason}")]
    Forbidden { reason: String },

    /// Malformed or out-of-contract request input
    #[error("bad request: {message}")]
    BadRequest { message: String },

    /// Optimistic-lock or uniqueness violation
    #[error("conflict: {message}")]
    Conflict { message: String },

    /// Definition file could not be read or parsed
    #[error("failed to load {path}: {message}")]
    LoadError { path: String, message: String },

    /// Definition validation produced one or more errors; the registry
    /// snapshot is not replaced while this list is non-empty
    #[error("definition validation failed with {} error(s)", .0.len())]
    Validation(Vec<definitions::validator::ValidationError>),

    /// The service circuit breaker is open; the request never hit the wire
    #[error("circuit open for service {service}")]
    CircuitOpen { service: String },

    /// DNS or connection-level failure reaching a backend
    #[error("backend {service} unavailable: {message}")]
    BackendUnavailable { service: String, message: String },

    /// The backend did not answer within the per-service timeout
    #[error("backend {service} timed out: {message}")]
    BackendTimeout { service: String, message: String },

    /// The caller cancelled the request while it was in flight or backing off
    #[error("request cancelled: {0}")]
    Cancelled(String),

    /// Transport failure that is neither connect-level nor a timeout
    #[error("transport error calling {service}: {message}")]
    Transport { service: String, message: String },

    /// Workflow operation attempted on a non-active instance
    #[error("workflow instance {id} is not active (status: {status})")]
    WorkflowNotActive { id: String, status: String },

    /// No transition matches the requested event from the current step
    #[error("no transition for event '{event}' from step '{step}'")]
    InvalidTransition { step: String, event: String },

    /// The auto-chain exceeded the configured depth; the instance was suspended
    #[error("workflow {id} exceeded the auto-step chain limit of {limit}")]
    ChainLimit { id: String, limit: usize },

    /// A referenced operation is absent from the OpenAPI index
    #[error("operation {operation_id} not found on service {service_id}")]
    OperationNotFound {
        service_id: String,
        operation_id: String,
    },

    /// No client bundle was configured for the referenced service
    #[error("service not configured: {service_id}")]
    ServiceNotConfigured { service_id: String },

    /// The SDK binding names a handler that was never registered
    #[error("sdk handler not found: {handler}")]
    HandlerNotFound { handler: String },

    /// No registered invoker supports the binding
    #[error("no invoker supports binding type '{binding_type}'")]
    NoInvoker { binding_type: String },

    /// JSON (de)serialization failure
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Anything that should never surface to a client verbatim
    #[error("internal error: {0}")]
    Internal(String),
}

impl SwitchboardError {
    /// Stable wire code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            SwitchboardError::NotFound { .. } => "NOT_FOUND",
            SwitchboardError::Forbidden { .. } => "FORBIDDEN",
            SwitchboardError::BadRequest { .. } => "BAD_REQUEST",
            SwitchboardError::Conflict { .. } => "CONFLICT",
            SwitchboardError::LoadError { .. } => "LOAD_ERROR",
            SwitchboardError::Validation(_) => "BAD_REQUEST",
            SwitchboardError::CircuitOpen { .. } => "BACKEND_UNAVAILABLE",
            SwitchboardError::BackendUnavailable { .. } => "BACKEND_UNAVAILABLE",
            SwitchboardError::BackendTimeout { .. } => "BACKEND_TIMEOUT",
            SwitchboardError::Cancelled(_) => "BACKEND_TIMEOUT",
            SwitchboardError::Transport { .. } => "BACKEND_UNAVAILABLE",
            SwitchboardError::WorkflowNotActive { .. } => "WORKFLOW_NOT_ACTIVE",
            SwitchboardError::InvalidTransition { .. } => "INVALID_TRANSITION",
            SwitchboardError::ChainLimit { .. } => "WORKFLOW_CHAIN_LIMIT",
            SwitchboardError::OperationNotFound { .. } => "OPERATION_NOT_FOUND",
            SwitchboardError::ServiceNotConfigured { .. } => "SERVICE_NOT_CONFIGURED",
            SwitchboardError::HandlerNotFound { .. } => "HANDLER_NOT_FOUND",
            SwitchboardError::NoInvoker { .. } => "NO_INVOKER",
            SwitchboardError::Serialization(_) => "INTERNAL",
            SwitchboardError::Internal(_) => "INTERNAL",
        }
    }

    /// Whether a retrying invoker may attempt the request again.
    ///
    /// Breaker rejections and caller cancellation are terminal; connect-level
    /// failures and backend timeouts are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SwitchboardError::BackendUnavailable { .. }
                | SwitchboardError::BackendTimeout { .. }
                | SwitchboardError::Transport { .. }
        )
    }
}

impl From<serde_json::Error> for SwitchboardError {
    fn from(err: serde_json::Error) -> Self {
        SwitchboardError::Serialization(err.to_string())
    }
}

/// Convenience Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SwitchboardError>;

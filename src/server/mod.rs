// HTTP surface - the axum router consumed by UI clients

//! # HTTP Server
//!
//! Wires the providers and the workflow engine into the `/ui/*` route table,
//! plus `/health` and `/admin/reload`. Identity arrives in headers
//! (`Authorization`, `X-Tenant-Id`, `X-Partition-Id`, `X-Request-Subject`,
//! `X-Correlation-Id`, `X-User-Email`); a missing correlation ID is generated
//! here so every response and backend call can be traced.
//!
//! Every error leaves as the same envelope: `{code, message, details?,
//! correlationId}` with the status mapped from the stable error code.

pub mod handlers;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::info;
use uuid::Uuid;

use crate::capability::CapabilityResolver;
use crate::definitions::loader::DefinitionLoader;
use crate::definitions::registry::DefinitionRegistry;
use crate::invoker::http::OpenApiInvoker;
use crate::models::RequestContext;
use crate::openapi::ServiceSpecSource;
use crate::providers::{
    ActionProvider, FormProvider, LookupProvider, MenuProvider, PageProvider, SearchProvider,
};
use crate::workflow::engine::WorkflowEngine;
use crate::SwitchboardError;

/// Everything the handlers need, cheaply cloneable.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<DefinitionRegistry>,
    pub menu: Arc<MenuProvider>,
    pub pages: Arc<PageProvider>,
    pub forms: Arc<FormProvider>,
    pub actions: Arc<ActionProvider>,
    pub lookups: Arc<LookupProvider>,
    pub search: Arc<SearchProvider>,
    pub engine: Arc<WorkflowEngine>,
    pub capabilities: Arc<CapabilityResolver>,
    pub loader: Arc<DefinitionLoader>,
    pub spec_sources: Arc<Vec<ServiceSpecSource>>,
    pub openapi_invoker: Arc<OpenApiInvoker>,
}

/// The uniform error body of every endpoint.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorEnvelope {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Value>,
    pub correlation_id: String,
}

/// A crate error paired with the request's correlation ID, renderable as a
/// response.
#[derive(Debug)]
pub struct ApiError {
    pub error: SwitchboardError,
    pub correlation_id: String,
}

impl ApiError {
    pub fn new(error: SwitchboardError, correlation_id: impl Into<String>) -> Self {
        ApiError {
            error,
            correlation_id: correlation_id.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.error);
        let details = match &self.error {
            SwitchboardError::Validation(errors) => serde_json::to_value(errors).ok(),
            _ => None,
        };
        let envelope = ErrorEnvelope {
            code: self.error.code().to_string(),
            message: self.error.to_string(),
            details,
            correlation_id: self.correlation_id,
        };
        (status, Json(envelope)).into_response()
    }
}

/// Map the stable error codes onto HTTP statuses.
fn status_for(error: &SwitchboardError) -> StatusCode {
    match error {
        SwitchboardError::NotFound { .. } => StatusCode::NOT_FOUND,
        SwitchboardError::Forbidden { .. } => StatusCode::FORBIDDEN,
        SwitchboardError::BadRequest { .. }
        | SwitchboardError::Validation(_)
        | SwitchboardError::LoadError { .. } => StatusCode::BAD_REQUEST,
        SwitchboardError::Conflict { .. }
        | SwitchboardError::WorkflowNotActive { .. }
        | SwitchboardError::InvalidTransition { .. }
        | SwitchboardError::ChainLimit { .. } => StatusCode::CONFLICT,
        SwitchboardError::CircuitOpen { .. }
        | SwitchboardError::BackendUnavailable { .. }
        | SwitchboardError::Transport { .. } => StatusCode::BAD_GATEWAY,
        SwitchboardError::BackendTimeout { .. } | SwitchboardError::Cancelled(_) => {
            StatusCode::GATEWAY_TIMEOUT
        }
        SwitchboardError::OperationNotFound { .. }
        | SwitchboardError::ServiceNotConfigured { .. }
        | SwitchboardError::HandlerNotFound { .. }
        | SwitchboardError::NoInvoker { .. }
        | SwitchboardError::Serialization(_)
        | SwitchboardError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn header_string(parts: &Parts, name: &str) -> Option<String> {
    parts
        .headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[async_trait::async_trait]
impl<S> FromRequestParts<S> for RequestContext
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let correlation_id = header_string(parts, "x-correlation-id")
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        let tenant_id = header_string(parts, "x-tenant-id").unwrap_or_default();
        let subject_id = header_string(parts, "x-request-subject").unwrap_or_default();
        if tenant_id.is_empty() || subject_id.is_empty() {
            // identity is established upstream; requests without it are
            // unauthenticated as far as this service is concerned
            return Err(ApiError::new(
                SwitchboardError::Forbidden {
                    reason: "missing identity headers".to_string(),
                },
                correlation_id,
            ));
        }

        let token = header_string(parts, "authorization")
            .and_then(|auth| auth.strip_prefix("Bearer ").map(str::to_string))
            .unwrap_or_default();

        Ok(RequestContext {
            subject_id,
            tenant_id,
            partition_id: header_string(parts, "x-partition-id").unwrap_or_default(),
            correlation_id,
            token,
            email: header_string(parts, "x-user-email").unwrap_or_default(),
        })
    }
}

/// Build the full route table over the given state.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/ui/navigation", get(handlers::get_navigation))
        .route("/ui/pages/:id", get(handlers::get_page))
        .route("/ui/pages/:id/data", get(handlers::get_page_data))
        .route("/ui/forms/:id", get(handlers::get_form))
        .route("/ui/forms/:id/data", get(handlers::get_form_data))
        .route("/ui/forms/:id/submit", post(handlers::submit_form))
        .route("/ui/commands/:id", post(handlers::execute_command))
        .route("/ui/workflows", get(handlers::list_workflows))
        .route("/ui/workflows/:id", get(handlers::get_workflow))
        .route("/ui/workflows/:id/start", post(handlers::start_workflow))
        .route("/ui/workflows/:id/advance", post(handlers::advance_workflow))
        .route("/ui/workflows/:id/cancel", post(handlers::cancel_workflow))
        .route("/ui/search", get(handlers::search))
        .route("/ui/lookups/:id", get(handlers::get_lookup))
        .route("/admin/reload", post(handlers::reload_definitions))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind and serve until the process is stopped.
pub async fn serve(state: AppState, addr: SocketAddr) -> crate::Result<()> {
    let router = build_router(state);
    info!(%addr, "switchboard listening");
    axum::Server::bind(&addr)
        .serve(router.into_make_service())
        .await
        .map_err(|e| SwitchboardError::Internal(format!("server error: {e}")))
}

// Route handlers for the /ui surface

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{ApiError, AppState};
use crate::definitions::validator::validate_definitions;
use crate::invoker::InvocationResult;
use crate::models::{CapabilitySet, RequestContext};
use crate::openapi::OpenApiIndex;
use crate::providers::page::PageDataQuery;
use crate::providers::search::SearchPagination;
use crate::workflow::engine::ListQuery;
use crate::{Result, SwitchboardError};

type HandlerResult<T> = std::result::Result<T, ApiError>;

fn fail(rctx: &RequestContext) -> impl Fn(SwitchboardError) -> ApiError + '_ {
    move |error| ApiError::new(error, rctx.correlation_id.clone())
}

async fn resolve_caps(state: &AppState, rctx: &RequestContext) -> Result<CapabilitySet> {
    state.capabilities.resolve(rctx).await
}

/// Render a backend invocation result with the backend's own status code;
/// an empty body becomes 204.
fn proxy_response(result: InvocationResult) -> Response {
    let status =
        StatusCode::from_u16(result.status_code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    match result.body {
        Some(body) => (status, Json(body)).into_response(),
        None if status.is_success() => StatusCode::NO_CONTENT.into_response(),
        None => status.into_response(),
    }
}

pub async fn health() -> impl IntoResponse {
    Json(json!({"status": "ok"}))
}

pub async fn get_navigation(
    State(state): State<AppState>,
    rctx: RequestContext,
) -> HandlerResult<Response> {
    let caps = resolve_caps(&state, &rctx).await.map_err(fail(&rctx))?;
    let items = state.menu.navigation(&caps);
    Ok(Json(json!({"data": {"items": items}})).into_response())
}

pub async fn get_page(
    State(state): State<AppState>,
    Path(id): Path<String>,
    rctx: RequestContext,
) -> HandlerResult<Response> {
    let caps = resolve_caps(&state, &rctx).await.map_err(fail(&rctx))?;
    let descriptor = state.pages.get_page(&caps, &id).map_err(fail(&rctx))?;
    Ok(Json(json!({"data": descriptor})).into_response())
}

pub async fn get_page_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    rctx: RequestContext,
) -> HandlerResult<Response> {
    let caps = resolve_caps(&state, &rctx).await.map_err(fail(&rctx))?;
    let query = page_data_query(&params).map_err(fail(&rctx))?;
    let response = state
        .pages
        .get_page_data(&CancellationToken::new(), &rctx, &caps, &id, query)
        .await
        .map_err(fail(&rctx))?;
    Ok(Json(response).into_response())
}

fn page_data_query(params: &HashMap<String, String>) -> Result<PageDataQuery> {
    let mut query = PageDataQuery {
        page: parse_number(params, "page")?,
        page_size: parse_number(params, "page_size")?,
        sort: params.get("sort").cloned(),
        sort_dir: params.get("sort_dir").cloned(),
        q: params.get("q").cloned(),
        filters: HashMap::new(),
    };
    for (key, value) in params {
        if let Some(field) = key.strip_prefix("filter[").and_then(|k| k.strip_suffix(']')) {
            query.filters.insert(field.to_string(), value.clone());
        }
    }
    Ok(query)
}

fn parse_number<T: std::str::FromStr>(
    params: &HashMap<String, String>,
    key: &str,
) -> Result<Option<T>> {
    match params.get(key) {
        None => Ok(None),
        Some(raw) => raw.parse().map(Some).map_err(|_| SwitchboardError::BadRequest {
            message: format!("'{raw}' is not a valid value for {key}"),
        }),
    }
}

pub async fn get_form(
    State(state): State<AppState>,
    Path(id): Path<String>,
    rctx: RequestContext,
) -> HandlerResult<Response> {
    let caps = resolve_caps(&state, &rctx).await.map_err(fail(&rctx))?;
    let descriptor = state.forms.get_form(&caps, &id).map_err(fail(&rctx))?;
    Ok(Json(json!({"data": descriptor})).into_response())
}

pub async fn get_form_data(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(params): Query<HashMap<String, String>>,
    rctx: RequestContext,
) -> HandlerResult<Response> {
    let caps = resolve_caps(&state, &rctx).await.map_err(fail(&rctx))?;
    let response = state
        .forms
        .get_form_data(&CancellationToken::new(), &rctx, &caps, &id, params)
        .await
        .map_err(fail(&rctx))?;
    Ok(Json(response).into_response())
}

#[derive(Debug, Deserialize, Default)]
pub struct CommandRequest {
    #[serde(default)]
    pub input: Option<Value>,
}

pub async fn submit_form(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    rctx: RequestContext,
    body: Option<Json<CommandRequest>>,
) -> HandlerResult<Response> {
    let caps = resolve_caps(&state, &rctx).await.map_err(fail(&rctx))?;
    let input = body.and_then(|Json(b)| b.input);
    let result = state
        .forms
        .submit(
            &CancellationToken::new(),
            &rctx,
            &caps,
            &id,
            input,
            idempotency_key(&headers),
        )
        .await
        .map_err(fail(&rctx))?;
    Ok(proxy_response(result))
}

pub async fn execute_command(
    State(state): State<AppState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    rctx: RequestContext,
    body: Option<Json<CommandRequest>>,
) -> HandlerResult<Response> {
    let caps = resolve_caps(&state, &rctx).await.map_err(fail(&rctx))?;
    let input = body.and_then(|Json(b)| b.input);
    let result = state
        .actions
        .execute(
            &CancellationToken::new(),
            &rctx,
            &caps,
            &id,
            input,
            idempotency_key(&headers),
        )
        .await
        .map_err(fail(&rctx))?;
    Ok(proxy_response(result))
}

fn idempotency_key(headers: &HeaderMap) -> Option<String> {
    headers
        .get("x-idempotency-key")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

#[derive(Debug, Deserialize, Default)]
pub struct StartWorkflowRequest {
    #[serde(default)]
    pub input: HashMap<String, Value>,
}

pub async fn start_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    rctx: RequestContext,
    body: Option<Json<StartWorkflowRequest>>,
) -> HandlerResult<Response> {
    let caps = resolve_caps(&state, &rctx).await.map_err(fail(&rctx))?;
    let input = body.map(|Json(b)| b.input).unwrap_or_default();
    let instance = state
        .engine
        .start(&CancellationToken::new(), &rctx, &caps, &id, input)
        .await
        .map_err(fail(&rctx))?;
    Ok((StatusCode::CREATED, Json(json!({"data": instance}))).into_response())
}

#[derive(Debug, Deserialize)]
pub struct AdvanceRequest {
    pub event: String,
    #[serde(default)]
    pub input: HashMap<String, Value>,
}

pub async fn advance_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    rctx: RequestContext,
    Json(body): Json<AdvanceRequest>,
) -> HandlerResult<Response> {
    let caps = resolve_caps(&state, &rctx).await.map_err(fail(&rctx))?;
    let instance_id = parse_instance_id(&id).map_err(fail(&rctx))?;
    let instance = state
        .engine
        .advance(
            &CancellationToken::new(),
            &rctx,
            &caps,
            instance_id,
            &body.event,
            body.input,
        )
        .await
        .map_err(fail(&rctx))?;
    Ok(Json(json!({"data": instance})).into_response())
}

pub async fn get_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    rctx: RequestContext,
) -> HandlerResult<Response> {
    let caps = resolve_caps(&state, &rctx).await.map_err(fail(&rctx))?;
    let instance_id = parse_instance_id(&id).map_err(fail(&rctx))?;
    let descriptor = state
        .engine
        .get(&rctx, &caps, instance_id)
        .await
        .map_err(fail(&rctx))?;
    Ok(Json(json!({"data": descriptor})).into_response())
}

#[derive(Debug, Deserialize, Default)]
pub struct CancelRequest {
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn cancel_workflow(
    State(state): State<AppState>,
    Path(id): Path<String>,
    rctx: RequestContext,
    body: Option<Json<CancelRequest>>,
) -> HandlerResult<Response> {
    resolve_caps(&state, &rctx).await.map_err(fail(&rctx))?;
    let instance_id = parse_instance_id(&id).map_err(fail(&rctx))?;
    let reason = body
        .and_then(|Json(b)| b.reason)
        .unwrap_or_else(|| "cancelled by user".to_string());
    let instance = state
        .engine
        .cancel(&rctx, instance_id, &reason)
        .await
        .map_err(fail(&rctx))?;
    Ok(Json(json!({"data": instance})).into_response())
}

#[derive(Debug, Deserialize, Default)]
pub struct ListWorkflowsQuery {
    pub workflow_id: Option<String>,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListMeta {
    page: usize,
    page_size: usize,
    total_count: usize,
}

pub async fn list_workflows(
    State(state): State<AppState>,
    Query(query): Query<ListWorkflowsQuery>,
    rctx: RequestContext,
) -> HandlerResult<Response> {
    resolve_caps(&state, &rctx).await.map_err(fail(&rctx))?;
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(20).max(1);
    let (instances, total) = state
        .engine
        .list(
            &rctx,
            ListQuery {
                workflow_id: query.workflow_id,
                page: Some(page),
                page_size: Some(page_size),
            },
        )
        .await
        .map_err(fail(&rctx))?;
    Ok(Json(json!({
        "data": instances,
        "meta": ListMeta { page, page_size, total_count: total },
    }))
    .into_response())
}

fn parse_instance_id(raw: &str) -> Result<Uuid> {
    Uuid::parse_str(raw).map_err(|_| SwitchboardError::BadRequest {
        message: format!("'{raw}' is not a valid instance id"),
    })
}

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    pub q: String,
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    pub domain: Option<String>,
}

pub async fn search(
    State(state): State<AppState>,
    Query(query): Query<SearchQuery>,
    rctx: RequestContext,
) -> HandlerResult<Response> {
    let caps = resolve_caps(&state, &rctx).await.map_err(fail(&rctx))?;
    let response = state
        .search
        .search(
            &CancellationToken::new(),
            &rctx,
            &caps,
            &query.q,
            SearchPagination {
                page: query.page,
                page_size: query.page_size,
                domain: query.domain,
            },
        )
        .await
        .map_err(fail(&rctx))?;
    Ok(Json(response).into_response())
}

#[derive(Debug, Deserialize, Default)]
pub struct LookupQuery {
    pub q: Option<String>,
}

pub async fn get_lookup(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<LookupQuery>,
    rctx: RequestContext,
) -> HandlerResult<Response> {
    resolve_caps(&state, &rctx).await.map_err(fail(&rctx))?;
    let response = state
        .lookups
        .get_lookup(
            &CancellationToken::new(),
            &rctx,
            &id,
            query.q.as_deref(),
        )
        .await
        .map_err(fail(&rctx))?;
    Ok(Json(response).into_response())
}

/// Re-run load + validate and swap the registry snapshot atomically.
/// Validation failures leave the serving snapshot untouched.
pub async fn reload_definitions(
    State(state): State<AppState>,
    rctx: RequestContext,
) -> HandlerResult<Response> {
    let definitions = state.loader.load_all().map_err(fail(&rctx))?;
    let index = OpenApiIndex::load(&state.spec_sources).map_err(fail(&rctx))?;

    let errors = validate_definitions(&definitions, &index);
    if !errors.is_empty() {
        return Err(fail(&rctx)(SwitchboardError::Validation(errors)));
    }

    state.registry.replace(definitions);
    state.openapi_invoker.replace_index(index);
    Ok(Json(json!({"data": {"checksum": state.registry.checksum()}})).into_response())
}

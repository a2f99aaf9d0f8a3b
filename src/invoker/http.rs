// OpenAPI HTTP invoker - indexed operations over reqwest with breaker + retry

//! # OpenAPI HTTP Invoker
//!
//! Executes `openapi` bindings against downstream services:
//!
//! 1. resolve the operation in the [`OpenApiIndex`]
//! 2. look up the per-service client bundle (pooled `reqwest::Client`,
//!    circuit breaker, retry policy)
//! 3. build the URL from the path template and query parameters
//! 4. build sanitized headers (context propagation + custom overrides)
//! 5. execute with retries: only idempotent methods retry unless the service
//!    opts out, transport errors and {500, 502, 503, 504} statuses are
//!    retryable, backoff grows exponentially and honors cancellation
//!
//! The breaker sees 5xx responses and transport errors as failures, 2xx/3xx
//! as successes, and 4xx as neutral - a client error says nothing about the
//! service's health.

use arc_swap::ArcSwap;
use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Client, Method, Response};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::breaker::{CircuitBreaker, CircuitBreakerConfig};
use super::{InvocationInput, InvocationResult, OperationInvoker};
use crate::models::{BindingType, OperationBinding, RequestContext};
use crate::openapi::{IndexedOperation, OpenApiIndex};
use crate::{Result, SwitchboardError};

/// Response bodies larger than this are truncated on read.
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Statuses worth another attempt.
const RETRYABLE_STATUSES: [u16; 4] = [500, 502, 503, 504];

/// Response headers surfaced to callers, lower-case.
const RESPONSE_HEADER_ALLOW_LIST: [&str; 5] = [
    "content-type",
    "x-correlation-id",
    "x-trace-id",
    "x-request-id",
    "retry-after",
];

/// Methods safe to retry regardless of `idempotent_only`.
fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::PUT | Method::DELETE | Method::HEAD | Method::OPTIONS
    )
}

/// Retry policy for one service.
#[derive(Debug, Clone, Copy)]
pub struct RetryConfig {
    /// Total attempt budget, including the first call
    pub max_attempts: u32,
    pub backoff_initial: Duration,
    pub backoff_max: Duration,
    pub multiplier: f64,
    /// When true (the default), non-idempotent methods never retry
    pub idempotent_only: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            max_attempts: 3,
            backoff_initial: Duration::from_millis(100),
            backoff_max: Duration::from_secs(5),
            multiplier: 2.0,
            idempotent_only: true,
        }
    }
}

/// Startup configuration for one downstream service.
#[derive(Debug, Clone)]
pub struct ServiceClientConfig {
    pub service_id: String,
    /// Per-request timeout applied to the pooled client
    pub timeout: Duration,
    pub retry: RetryConfig,
    pub breaker: CircuitBreakerConfig,
}

impl ServiceClientConfig {
    pub fn new(service_id: impl Into<String>) -> Self {
        ServiceClientConfig {
            service_id: service_id.into(),
            timeout: Duration::from_secs(30),
            retry: RetryConfig::default(),
            breaker: CircuitBreakerConfig::default(),
        }
    }
}

/// Pooled client + breaker + retry policy for one service.
struct ServiceClient {
    client: Client,
    breaker: CircuitBreaker,
    retry: RetryConfig,
}

/// The HTTP transport of the invoker framework.
pub struct OpenApiInvoker {
    index: ArcSwap<OpenApiIndex>,
    services: HashMap<String, Arc<ServiceClient>>,
}

impl OpenApiInvoker {
    pub fn new(index: OpenApiIndex, services: Vec<ServiceClientConfig>) -> Result<Self> {
        let mut table = HashMap::new();
        for config in services {
            let client = Client::builder()
                .timeout(config.timeout)
                .pool_max_idle_per_host(8)
                .build()
                .map_err(|e| SwitchboardError::Internal(format!("building http client: {e}")))?;
            table.insert(
                config.service_id.clone(),
                Arc::new(ServiceClient {
                    client,
                    breaker: CircuitBreaker::new(config.service_id.clone(), config.breaker),
                    retry: config.retry,
                }),
            );
        }
        Ok(OpenApiInvoker {
            index: ArcSwap::from_pointee(index),
            services: table,
        })
    }

    /// Publish a freshly built index; in-flight invocations keep the one
    /// they resolved against.
    pub fn replace_index(&self, index: OpenApiIndex) {
        self.index.store(Arc::new(index));
    }

    /// Breaker state for observability endpoints.
    pub fn breaker_state(&self, service_id: &str) -> Option<super::breaker::BreakerState> {
        self.services.get(service_id).map(|s| s.breaker.state())
    }

    async fn execute_with_retry(
        &self,
        svc: &ServiceClient,
        cancel: &CancellationToken,
        service_id: &str,
        method: Method,
        url: Url,
        headers: HeaderMap,
        body: Option<String>,
    ) -> Result<InvocationResult> {
        let retry_eligible =
            svc.retry.max_attempts > 1 && (is_idempotent(&method) || !svc.retry.idempotent_only);
        let budget = if retry_eligible { svc.retry.max_attempts } else { 1 };

        let mut attempt = 1u32;
        loop {
            let outcome = self
                .execute_once(svc, cancel, service_id, &method, &url, &headers, &body)
                .await;

            let last_attempt = attempt >= budget;
            match outcome {
                Ok(result) => {
                    let status_retryable = RETRYABLE_STATUSES.contains(&result.status_code);
                    if !status_retryable || last_attempt {
                        return Ok(result);
                    }
                    debug!(
                        service = service_id,
                        status = result.status_code,
                        attempt,
                        "retryable status, scheduling another attempt"
                    );
                }
                Err(err) => {
                    if !err.is_retryable() || last_attempt {
                        return Err(err);
                    }
                    debug!(service = service_id, attempt, error = %err, "retryable transport error");
                }
            }

            self.backoff(svc, cancel, attempt).await?;
            attempt += 1;
        }
    }

    /// Sleep the exponential backoff for the just-finished attempt,
    /// returning the cancellation cause instead if the caller gives up.
    async fn backoff(
        &self,
        svc: &ServiceClient,
        cancel: &CancellationToken,
        finished_attempt: u32,
    ) -> Result<()> {
        let exp = finished_attempt.saturating_sub(1);
        let factor = svc.retry.multiplier.max(1.0).powi(exp as i32);
        let raw = svc.retry.backoff_initial.mul_f64(factor);
        let delay = raw.min(svc.retry.backoff_max);

        tokio::select! {
            _ = cancel.cancelled() => Err(SwitchboardError::Cancelled(
                "cancelled during retry backoff".to_string(),
            )),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn execute_once(
        &self,
        svc: &ServiceClient,
        cancel: &CancellationToken,
        service_id: &str,
        method: &Method,
        url: &Url,
        headers: &HeaderMap,
        body: &Option<String>,
    ) -> Result<InvocationResult> {
        // breaker rejection is terminal for this invocation, never retried
        svc.breaker.allow()?;

        let mut request = svc
            .client
            .request(method.clone(), url.clone())
            .headers(headers.clone());
        if let Some(body) = body {
            request = request.body(body.clone());
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(SwitchboardError::Cancelled(
                    "cancelled during backend call".to_string(),
                ));
            }
            result = request.send() => result,
        };

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                svc.breaker.record_failure();
                return Err(classify_transport_error(service_id, &err));
            }
        };

        let status = response.status().as_u16();
        let response_headers = extract_headers(&response);

        let raw_body = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(SwitchboardError::Cancelled(
                    "cancelled while reading response body".to_string(),
                ));
            }
            result = read_body_limited(response) => result,
        };
        let raw_body = match raw_body {
            Ok(bytes) => bytes,
            Err(err) => {
                svc.breaker.record_failure();
                return Err(SwitchboardError::Transport {
                    service: service_id.to_string(),
                    message: err.to_string(),
                });
            }
        };

        // 5xx counts against the service, 4xx is the caller's problem
        if status >= 500 {
            svc.breaker.record_failure();
        } else if status < 400 {
            svc.breaker.record_success();
        }

        // non-JSON bodies surface as None, never as an error
        let body = if raw_body.is_empty() {
            None
        } else {
            serde_json::from_slice(&raw_body).ok()
        };

        Ok(InvocationResult {
            status_code: status,
            headers: response_headers,
            body,
        })
    }
}

#[async_trait]
impl OperationInvoker for OpenApiInvoker {
    fn supports(&self, binding: &OperationBinding) -> bool {
        binding.binding_type == BindingType::Openapi
    }

    async fn invoke(
        &self,
        cancel: &CancellationToken,
        rctx: &RequestContext,
        binding: &OperationBinding,
        input: InvocationInput,
    ) -> Result<InvocationResult> {
        // pin the current index for the whole invocation; a concurrent
        // reload does not affect requests already in flight
        let index = self.index.load_full();
        let operation = index
            .get_operation(&binding.service_id, &binding.operation_id)
            .ok_or_else(|| SwitchboardError::OperationNotFound {
                service_id: binding.service_id.clone(),
                operation_id: binding.operation_id.clone(),
            })?;

        let svc = self
            .services
            .get(&binding.service_id)
            .ok_or_else(|| SwitchboardError::ServiceNotConfigured {
                service_id: binding.service_id.clone(),
            })?;

        let method = Method::from_bytes(operation.method.as_bytes())
            .map_err(|_| SwitchboardError::Internal(format!("bad method {}", operation.method)))?;
        let url = build_url(operation, &input)?;
        let headers = build_header_map(rctx, &method, &input.headers)?;
        let body = match &input.body {
            Some(value) => Some(serde_json::to_string(value)?),
            None => None,
        };

        debug!(
            service = %binding.service_id,
            operation = %binding.operation_id,
            method = %method,
            url = %url,
            "invoking backend operation"
        );

        self.execute_with_retry(
            svc,
            cancel,
            &binding.service_id,
            method,
            url,
            headers,
            body,
        )
        .await
    }
}

fn classify_transport_error(service_id: &str, err: &reqwest::Error) -> SwitchboardError {
    if err.is_timeout() {
        SwitchboardError::BackendTimeout {
            service: service_id.to_string(),
            message: err.to_string(),
        }
    } else if err.is_connect() {
        SwitchboardError::BackendUnavailable {
            service: service_id.to_string(),
            message: err.to_string(),
        }
    } else {
        SwitchboardError::Transport {
            service: service_id.to_string(),
            message: err.to_string(),
        }
    }
}

/// Substitute `{name}` placeholders and append the query string.
fn build_url(operation: &IndexedOperation, input: &InvocationInput) -> Result<Url> {
    let mut path = String::with_capacity(operation.path_template.len());
    let mut rest = operation.path_template.as_str();

    while let Some(open) = rest.find('{') {
        path.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let close = after.find('}').ok_or_else(|| SwitchboardError::Internal(
            format!("unclosed placeholder in path template {}", operation.path_template),
        ))?;
        let name = &after[..close];
        let value = input
            .path_params
            .get(name)
            .ok_or_else(|| SwitchboardError::BadRequest {
                message: format!("missing path parameter '{name}'"),
            })?;
        path.push_str(&urlencoding::encode(value));
        rest = &after[close + 1..];
    }
    path.push_str(rest);

    let mut url = Url::parse(&format!("{}{}", operation.base_url, path))
        .map_err(|e| SwitchboardError::Internal(format!("building url: {e}")))?;
    if !input.query_params.is_empty() {
        url.query_pairs_mut().extend_pairs(input.query_params.iter());
    }
    Ok(url)
}

/// Strip CR and LF from header names and values (header-injection defense).
fn sanitize_header(value: &str) -> String {
    value.chars().filter(|c| *c != '\r' && *c != '\n').collect()
}

/// Standard outbound headers from the request context, then custom headers
/// last so they may override. Every name and value is sanitized.
fn build_outbound_headers(
    rctx: &RequestContext,
    method: &Method,
    custom: &HashMap<String, String>,
) -> BTreeMap<String, String> {
    let mut headers: BTreeMap<String, String> = BTreeMap::new();
    headers.insert("accept".to_string(), "application/json".to_string());
    if matches!(*method, Method::POST | Method::PUT | Method::PATCH) {
        headers.insert("content-type".to_string(), "application/json".to_string());
    }
    if !rctx.token.is_empty() {
        headers.insert(
            "authorization".to_string(),
            format!("Bearer {}", sanitize_header(&rctx.token)),
        );
    }
    if !rctx.tenant_id.is_empty() {
        headers.insert("x-tenant-id".to_string(), sanitize_header(&rctx.tenant_id));
    }
    if !rctx.partition_id.is_empty() {
        headers.insert(
            "x-partition-id".to_string(),
            sanitize_header(&rctx.partition_id),
        );
    }
    if !rctx.correlation_id.is_empty() {
        headers.insert(
            "x-correlation-id".to_string(),
            sanitize_header(&rctx.correlation_id),
        );
    }
    if !rctx.subject_id.is_empty() {
        headers.insert(
            "x-request-subject".to_string(),
            sanitize_header(&rctx.subject_id),
        );
    }
    for (name, value) in custom {
        let name = sanitize_header(name).to_lowercase();
        if name.is_empty() {
            continue;
        }
        headers.insert(name, sanitize_header(value));
    }
    headers
}

fn build_header_map(
    rctx: &RequestContext,
    method: &Method,
    custom: &HashMap<String, String>,
) -> Result<HeaderMap> {
    let mut map = HeaderMap::new();
    for (name, value) in build_outbound_headers(rctx, method, custom) {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| SwitchboardError::Internal(format!("header name '{name}': {e}")))?;
        let value = HeaderValue::from_str(&value)
            .map_err(|e| SwitchboardError::Internal(format!("header value: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn extract_headers(response: &Response) -> HashMap<String, String> {
    let mut out = HashMap::new();
    for name in RESPONSE_HEADER_ALLOW_LIST {
        if let Some(value) = response.headers().get(name) {
            if let Ok(value) = value.to_str() {
                out.insert(name.to_string(), value.to_string());
            }
        }
    }
    out
}

/// Accumulate the body up to [`MAX_BODY_BYTES`]; anything beyond the cap is
/// discarded rather than buffered.
async fn read_body_limited(mut response: Response) -> reqwest::Result<Vec<u8>> {
    let mut buf = Vec::new();
    while let Some(chunk) = response.chunk().await? {
        if buf.len() >= MAX_BODY_BYTES {
            warn!("response body exceeded {} bytes, truncating", MAX_BODY_BYTES);
            break;
        }
        let remaining = MAX_BODY_BYTES - buf.len();
        if chunk.len() > remaining {
            buf.extend_from_slice(&chunk[..remaining]);
        } else {
            buf.extend_from_slice(&chunk);
        }
    }
    Ok(buf)
}

// Search provider - concurrent capability-scoped fan-out across domains

//! # Search Provider
//!
//! One query fans out to every search definition the caller's capabilities
//! admit, concurrently, each under a tight per-provider timeout. A slow or
//! failing provider costs its own results and nothing else - its status is
//! recorded in `meta.providers` and the aggregate proceeds.
//!
//! Scoring is deliberately simple: the backend's own ordering is trusted
//! (`1 - position/count`) and scaled by the provider's configured weight, so
//! heavyweight domains float to the top of the merged list without any
//! cross-provider relevance model.

use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::{extract_items, require_success};
use crate::definitions::registry::DefinitionRegistry;
use crate::invoker::{InvocationInput, InvokerRegistry};
use crate::models::{CapabilitySet, RequestContext, SearchDefinition};
use crate::{Result, SwitchboardError};

const MIN_QUERY_LEN: usize = 2;
const DEFAULT_PAGE_SIZE: usize = 20;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResult {
    pub id: String,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subtitle: Option<String>,
    /// The contributing domain
    pub category: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct SearchPagination {
    pub page: Option<usize>,
    pub page_size: Option<usize>,
    /// Restrict the fan-out to one domain
    pub domain: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchResponse {
    pub data: SearchData,
    pub meta: SearchMeta,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchData {
    pub results: Vec<SearchResult>,
    pub total_count: usize,
    pub query: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchMeta {
    /// Per-provider outcome: "ok" or "error"
    pub providers: HashMap<String, String>,
    pub query_time_ms: u64,
}

pub struct SearchProvider {
    registry: Arc<DefinitionRegistry>,
    invokers: Arc<InvokerRegistry>,
    provider_timeout: Duration,
}

impl SearchProvider {
    pub fn new(
        registry: Arc<DefinitionRegistry>,
        invokers: Arc<InvokerRegistry>,
        provider_timeout: Duration,
    ) -> Self {
        SearchProvider {
            registry,
            invokers,
            provider_timeout,
        }
    }

    pub async fn search(
        &self,
        cancel: &CancellationToken,
        rctx: &RequestContext,
        caps: &CapabilitySet,
        query: &str,
        pagination: SearchPagination,
    ) -> Result<SearchResponse> {
        if query.chars().count() < MIN_QUERY_LEN {
            return Err(SwitchboardError::BadRequest {
                message: format!("query must be at least {MIN_QUERY_LEN} characters"),
            });
        }
        let started = Instant::now();

        let snapshot = self.registry.snapshot();
        let selected: Vec<_> = snapshot
            .searches()
            .iter()
            .filter(|entry| {
                entry
                    .item
                    .capability
                    .as_deref()
                    .map(|c| caps.has(c))
                    .unwrap_or(true)
            })
            .filter(|entry| {
                pagination
                    .domain
                    .as_deref()
                    .map(|d| entry.domain == d)
                    .unwrap_or(true)
            })
            .cloned()
            .collect();

        // one task per provider; the join below is the only barrier
        let mut tasks = Vec::with_capacity(selected.len());
        for entry in &selected {
            let invokers = Arc::clone(&self.invokers);
            let definition = Arc::clone(&entry.item);
            let domain = entry.domain.clone();
            let rctx = rctx.clone();
            let cancel = cancel.child_token();
            let query = query.to_string();
            let timeout = self.provider_timeout;

            tasks.push(tokio::spawn(async move {
                let outcome = tokio::time::timeout(
                    timeout,
                    query_provider(&invokers, &cancel, &rctx, &definition, &domain, &query),
                )
                .await;
                match outcome {
                    Ok(Ok(results)) => (definition.id.clone(), Ok(results)),
                    Ok(Err(err)) => (definition.id.clone(), Err(err)),
                    Err(_) => (
                        definition.id.clone(),
                        Err(SwitchboardError::BackendTimeout {
                            service: definition.id.clone(),
                            message: "search provider timed out".to_string(),
                        }),
                    ),
                }
            }));
        }

        let mut providers = HashMap::new();
        let mut merged: Vec<SearchResult> = Vec::new();
        for joined in join_all(tasks).await {
            match joined {
                Ok((id, Ok(results))) => {
                    providers.insert(id, "ok".to_string());
                    merged.extend(results);
                }
                Ok((id, Err(err))) => {
                    warn!(provider = %id, error = %err, "search provider failed");
                    providers.insert(id, "error".to_string());
                }
                Err(join_err) => {
                    warn!(error = %join_err, "search task panicked");
                }
            }
        }

        // dedupe by (id, route), keeping the higher score
        let mut best: HashMap<(String, Option<String>), usize> = HashMap::new();
        let mut deduped: Vec<SearchResult> = Vec::new();
        for result in merged {
            let key = (result.id.clone(), result.route.clone());
            match best.get(&key) {
                Some(&index) => {
                    if result.score > deduped[index].score {
                        deduped[index] = result;
                    }
                }
                None => {
                    best.insert(key, deduped.len());
                    deduped.push(result);
                }
            }
        }

        // stable sort keeps accumulator order on score ties
        deduped.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));

        let total_count = deduped.len();
        let page = pagination.page.unwrap_or(1).max(1);
        let page_size = pagination.page_size.unwrap_or(DEFAULT_PAGE_SIZE).max(1);
        let results: Vec<SearchResult> = deduped
            .into_iter()
            .skip((page - 1) * page_size)
            .take(page_size)
            .collect();

        Ok(SearchResponse {
            data: SearchData {
                results,
                total_count,
                query: query.to_string(),
            },
            meta: SearchMeta {
                providers,
                query_time_ms: started.elapsed().as_millis() as u64,
            },
        })
    }
}

/// Query one provider and map its items into scored results.
async fn query_provider(
    invokers: &InvokerRegistry,
    cancel: &CancellationToken,
    rctx: &RequestContext,
    definition: &SearchDefinition,
    domain: &str,
    query: &str,
) -> Result<Vec<SearchResult>> {
    let input = InvocationInput::default().query("q", query.to_string());
    let result = invokers.invoke(cancel, rctx, &definition.operation, input).await?;
    let result = require_success("search", result)?;

    let items = extract_items(result.body.as_ref());
    let count = items.len();
    debug!(provider = %definition.id, count, "search provider answered");

    let mapped = items.iter().enumerate().filter_map(|(position, item)| {
        let mapping = &definition.result_mapping;
        let id = field_string(item, &mapping.id_field)?;
        let title = field_string(item, &mapping.title_field)?;
        let subtitle = mapping
            .subtitle_field
            .as_deref()
            .and_then(|f| field_string(item, f));
        let route = mapping
            .route_template
            .as_deref()
            .map(|template| render_route(template, item));

        // trust the backend's ordering, boost by provider weight
        let score = definition.weight * (1.0 - position as f64 / count as f64);
        Some(SearchResult {
            id,
            title,
            subtitle,
            category: domain.to_string(),
            route,
            score,
        })
    });

    Ok(mapped.take(definition.max_results).collect())
}

fn field_string(item: &Value, field: &str) -> Option<String> {
    match item.get(field)? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

/// Substitute `{field}` placeholders in a route template from item fields.
fn render_route(template: &str, item: &Value) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                let field = &after[..close];
                if let Some(value) = field_string(item, field) {
                    out.push_str(&value);
                }
                rest = &after[close + 1..];
            }
            None => {
                out.push('{');
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::sdk::{SdkHandler, SdkInvoker};
    use crate::invoker::InvocationResult;
    use crate::models::DomainDefinition;
    use async_trait::async_trait;
    use serde_json::json;

    struct ItemsHandler {
        items: Value,
    }

    #[async_trait]
    impl SdkHandler for ItemsHandler {
        async fn handle(
            &self,
            _rctx: &RequestContext,
            _input: InvocationInput,
        ) -> Result<InvocationResult> {
            Ok(InvocationResult {
                status_code: 200,
                headers: HashMap::new(),
                body: Some(self.items.clone()),
            })
        }
    }

    struct FailingHandler;

    #[async_trait]
    impl SdkHandler for FailingHandler {
        async fn handle(
            &self,
            _rctx: &RequestContext,
            _input: InvocationInput,
        ) -> Result<InvocationResult> {
            Err(SwitchboardError::BackendUnavailable {
                service: "orders".to_string(),
                message: "connection refused".to_string(),
            })
        }
    }

    fn definitions() -> Vec<DomainDefinition> {
        let invoices: DomainDefinition = serde_yaml::from_str(
            r#"
domain: invoices
version: 1.0.0
searches:
  - id: invoice-search
    capability: invoices.read
    operation: {type: sdk, handler: search-invoices}
    weight: 2.0
    maxResults: 10
    resultMapping:
      idField: id
      titleField: number
      routeTemplate: "/invoices/{id}"
"#,
        )
        .unwrap();
        let orders: DomainDefinition = serde_yaml::from_str(
            r#"
domain: orders
version: 1.0.0
searches:
  - id: order-search
    capability: orders.read
    operation: {type: sdk, handler: search-orders}
    weight: 1.0
    resultMapping:
      idField: id
      titleField: ref
"#,
        )
        .unwrap();
        vec![invoices, orders]
    }

    fn provider_with(orders_handler: Arc<dyn SdkHandler>) -> SearchProvider {
        let registry = Arc::new(DefinitionRegistry::with_definitions(definitions()));

        let sdk = SdkInvoker::new();
        sdk.register(
            "search-invoices",
            Arc::new(ItemsHandler {
                items: json!({"data": [
                    {"id": "i1", "number": "INV-1"},
                    {"id": "i2", "number": "INV-2"}
                ]}),
            }),
        );
        sdk.register("search-orders", orders_handler);
        let mut invokers = InvokerRegistry::new();
        invokers.register(Arc::new(sdk));

        SearchProvider::new(registry, Arc::new(invokers), Duration::from_secs(2))
    }

    fn all_caps() -> CapabilitySet {
        CapabilitySet::from_iter(["invoices.read", "orders.read"])
    }

    #[tokio::test]
    async fn test_short_query_rejected() {
        let provider = provider_with(Arc::new(FailingHandler));
        let rctx = RequestContext::new("alice", "t1", "p1");
        let err = provider
            .search(&CancellationToken::new(), &rctx, &all_caps(), "a", SearchPagination::default())
            .await
            .unwrap_err();
        assert_eq!(err.code(), "BAD_REQUEST");
    }

    #[tokio::test]
    async fn test_merge_scores_and_ordering() {
        let provider = provider_with(Arc::new(ItemsHandler {
            items: json!([{"id": "o1", "ref": "ORD-1"}]),
        }));
        let rctx = RequestContext::new("alice", "t1", "p1");

        let response = provider
            .search(&CancellationToken::new(), &rctx, &all_caps(), "acme", SearchPagination::default())
            .await
            .unwrap();

        assert_eq!(response.data.total_count, 3);
        // invoices weight 2.0: first item scores 2.0, beats orders' 1.0
        assert_eq!(response.data.results[0].id, "i1");
        assert_eq!(response.data.results[0].score, 2.0);
        assert_eq!(response.data.results[0].category, "invoices");
        assert_eq!(response.data.results[0].route.as_deref(), Some("/invoices/i1"));
        assert_eq!(response.meta.providers["invoice-search"], "ok");
        assert_eq!(response.meta.providers["order-search"], "ok");
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_other_providers() {
        let provider = provider_with(Arc::new(FailingHandler));
        let rctx = RequestContext::new("alice", "t1", "p1");

        let response = provider
            .search(&CancellationToken::new(), &rctx, &all_caps(), "acme", SearchPagination::default())
            .await
            .unwrap();

        assert_eq!(response.data.total_count, 2);
        assert_eq!(response.meta.providers["invoice-search"], "ok");
        assert_eq!(response.meta.providers["order-search"], "error");
    }

    #[tokio::test]
    async fn test_capability_scoping_skips_providers() {
        let provider = provider_with(Arc::new(ItemsHandler {
            items: json!([{"id": "o1", "ref": "ORD-1"}]),
        }));
        let rctx = RequestContext::new("alice", "t1", "p1");
        let caps = CapabilitySet::from_iter(["invoices.read"]);

        let response = provider
            .search(&CancellationToken::new(), &rctx, &caps, "acme", SearchPagination::default())
            .await
            .unwrap();

        assert_eq!(response.data.total_count, 2);
        assert!(!response.meta.providers.contains_key("order-search"));
    }

    #[tokio::test]
    async fn test_domain_restriction() {
        let provider = provider_with(Arc::new(ItemsHandler {
            items: json!([{"id": "o1", "ref": "ORD-1"}]),
        }));
        let rctx = RequestContext::new("alice", "t1", "p1");

        let response = provider
            .search(
                &CancellationToken::new(),
                &rctx,
                &all_caps(),
                "acme",
                SearchPagination {
                    domain: Some("orders".to_string()),
                    ..SearchPagination::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(response.data.total_count, 1);
        assert_eq!(response.data.results[0].category, "orders");
    }

    #[tokio::test]
    async fn test_pagination() {
        let provider = provider_with(Arc::new(ItemsHandler {
            items: json!([{"id": "o1", "ref": "ORD-1"}]),
        }));
        let rctx = RequestContext::new("alice", "t1", "p1");

        let response = provider
            .search(
                &CancellationToken::new(),
                &rctx,
                &all_caps(),
                "acme",
                SearchPagination {
                    page: Some(2),
                    page_size: Some(2),
                    domain: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(response.data.total_count, 3);
        assert_eq!(response.data.results.len(), 1);
    }

    #[test]
    fn test_render_route() {
        let item = json!({"id": "42", "kind": "invoice"});
        assert_eq!(render_route("/x/{id}/{kind}", &item), "/x/42/invoice");
        assert_eq!(render_route("/x/{missing}", &item), "/x/");
        assert_eq!(render_route("/plain", &item), "/plain");
    }
}

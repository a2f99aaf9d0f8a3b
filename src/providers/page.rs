// Page provider - descriptors plus paged, sorted, filtered table data

use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::require_success;
use crate::definitions::registry::DefinitionRegistry;
use crate::invoker::{InvocationInput, InvokerRegistry};
use crate::models::{CapabilitySet, PageDefinition, PageLayout, RequestContext};
use crate::{Result, SwitchboardError};

const DEFAULT_PAGE_SIZE: u32 = 20;
const MAX_PAGE_SIZE: u32 = 200;

/// What the client renders for a page.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDescriptor {
    pub id: String,
    pub domain: String,
    pub title: String,
    pub layout: PageLayout,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<ColumnDescriptor>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub actions: Vec<ActionDescriptor>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDescriptor {
    pub field: String,
    pub label: String,
    pub sortable: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// Page action the caller may actually invoke.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDescriptor {
    pub id: String,
    pub label: String,
    pub command: String,
}

/// Incoming list query, straight off the URL.
#[derive(Debug, Clone, Default)]
pub struct PageDataQuery {
    pub page: Option<u32>,
    pub page_size: Option<u32>,
    pub sort: Option<String>,
    pub sort_dir: Option<String>,
    pub q: Option<String>,
    /// `filter[field]` entries, keyed by field
    pub filters: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDataResponse {
    pub data: Value,
    pub meta: PageDataMeta,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDataMeta {
    pub page: u32,
    pub page_size: u32,
}

pub struct PageProvider {
    registry: Arc<DefinitionRegistry>,
    invokers: Arc<InvokerRegistry>,
}

impl PageProvider {
    pub fn new(registry: Arc<DefinitionRegistry>, invokers: Arc<InvokerRegistry>) -> Self {
        PageProvider { registry, invokers }
    }

    /// Capability-checked page descriptor. Actions the caller cannot invoke
    /// are omitted rather than rendered dead.
    pub fn get_page(&self, caps: &CapabilitySet, page_id: &str) -> Result<PageDescriptor> {
        let snapshot = self.registry.snapshot();
        let entry = snapshot.page(page_id).ok_or_else(|| SwitchboardError::NotFound {
            kind: "page",
            id: page_id.to_string(),
        })?;
        require_page_access(caps, &entry.item, page_id)?;

        let page = &entry.item;
        Ok(PageDescriptor {
            id: page.id.clone(),
            domain: entry.domain.clone(),
            title: page.title.clone(),
            layout: page.layout,
            columns: page
                .table
                .iter()
                .flat_map(|t| t.columns.iter())
                .map(|c| ColumnDescriptor {
                    field: c.field.clone(),
                    label: c.label.clone(),
                    sortable: c.sortable,
                    format: c.format.clone(),
                })
                .collect(),
            actions: page
                .actions
                .iter()
                .filter(|a| a.capability.as_deref().map(|c| caps.has(c)).unwrap_or(true))
                .map(|a| ActionDescriptor {
                    id: a.id.clone(),
                    label: a.label.clone(),
                    command: a.command.clone(),
                })
                .collect(),
            page_size: page.data.as_ref().and_then(|d| d.page_size),
        })
    }

    /// Fetch the page's backing data with pagination, sorting, and filters
    /// translated into backend query parameters.
    pub async fn get_page_data(
        &self,
        cancel: &CancellationToken,
        rctx: &RequestContext,
        caps: &CapabilitySet,
        page_id: &str,
        query: PageDataQuery,
    ) -> Result<PageDataResponse> {
        let snapshot = self.registry.snapshot();
        let entry = snapshot.page(page_id).ok_or_else(|| SwitchboardError::NotFound {
            kind: "page",
            id: page_id.to_string(),
        })?;
        require_page_access(caps, &entry.item, page_id)?;

        let data = entry.item.data.as_ref().ok_or_else(|| SwitchboardError::BadRequest {
            message: format!("page '{page_id}' has no data source"),
        })?;

        let page = query.page.unwrap_or(1).max(1);
        let page_size = query
            .page_size
            .or(data.page_size)
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE);

        let mut input = InvocationInput::default()
            .query("page", page.to_string())
            .query("page_size", page_size.to_string());
        if let Some(sort) = &query.sort {
            input = input.query("sort", sort.clone());
            let dir = match query.sort_dir.as_deref() {
                None => "asc".to_string(),
                Some(d) if d.eq_ignore_ascii_case("asc") || d.eq_ignore_ascii_case("desc") => {
                    d.to_lowercase()
                }
                Some(other) => {
                    return Err(SwitchboardError::BadRequest {
                        message: format!("sort_dir '{other}' must be asc or desc"),
                    })
                }
            };
            input = input.query("sort_dir", dir);
        }
        if let Some(q) = &query.q {
            input = input.query("q", q.clone());
        }
        for (field, value) in &query.filters {
            input = input.query(format!("filter[{field}]"), value.clone());
        }

        let result = self
            .invokers
            .invoke(cancel, rctx, &data.operation, input)
            .await?;
        let result = require_success("page data", result)?;

        Ok(PageDataResponse {
            data: result.body.unwrap_or(Value::Null),
            meta: PageDataMeta { page, page_size },
        })
    }
}

fn require_page_access(caps: &CapabilitySet, page: &PageDefinition, page_id: &str) -> Result<()> {
    if !caps.has_all(page.capabilities.iter().map(String::as_str)) {
        return Err(SwitchboardError::Forbidden {
            reason: format!("missing capability for page '{page_id}'"),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::invoker::sdk::{SdkHandler, SdkInvoker};
    use crate::invoker::InvocationResult;
    use crate::models::DomainDefinition;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex;

    struct CapturingHandler {
        seen: Arc<Mutex<Vec<InvocationInput>>>,
    }

    #[async_trait]
    impl SdkHandler for CapturingHandler {
        async fn handle(
            &self,
            _rctx: &RequestContext,
            input: InvocationInput,
        ) -> Result<InvocationResult> {
            self.seen.lock().unwrap().push(input);
            Ok(InvocationResult {
                status_code: 200,
                headers: HashMap::new(),
                body: Some(json!({"data": [{"number": "INV-1"}], "totalCount": 1})),
            })
        }
    }

    fn fixture() -> (PageProvider, Arc<Mutex<Vec<InvocationInput>>>) {
        let def: DomainDefinition = serde_yaml::from_str(
            r#"
domain: invoices
version: 1.0.0
commands:
  - id: approve
    capabilities: [invoices.approve]
    operation: {type: sdk, handler: approve}
pages:
  - id: invoice-list
    title: Invoices
    layout: list
    capabilities: [invoices.read]
    data:
      operation: {type: sdk, handler: list-invoices}
      pageSize: 50
    table:
      columns:
        - {field: number, label: Number, sortable: true}
    actions:
      - {id: approve, label: Approve, command: approve, capability: invoices.approve}
      - {id: export, label: Export, command: approve}
"#,
        )
        .unwrap();
        let registry = Arc::new(DefinitionRegistry::with_definitions(vec![def]));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let sdk = SdkInvoker::new();
        sdk.register(
            "list-invoices",
            Arc::new(CapturingHandler { seen: Arc::clone(&seen) }),
        );
        let mut invokers = InvokerRegistry::new();
        invokers.register(Arc::new(sdk));

        (PageProvider::new(registry, Arc::new(invokers)), seen)
    }

    #[test]
    fn test_descriptor_filters_actions() {
        let (provider, _) = fixture();
        let caps = CapabilitySet::from_iter(["invoices.read"]);
        let descriptor = provider.get_page(&caps, "invoice-list").unwrap();

        assert_eq!(descriptor.layout, PageLayout::List);
        assert_eq!(descriptor.columns.len(), 1);
        // the guarded action is gone, the unguarded one stays
        assert_eq!(descriptor.actions.len(), 1);
        assert_eq!(descriptor.actions[0].id, "export");
        assert_eq!(descriptor.page_size, Some(50));
    }

    #[test]
    fn test_page_capability_enforced() {
        let (provider, _) = fixture();
        let err = provider
            .get_page(&CapabilitySet::new(), "invoice-list")
            .unwrap_err();
        assert_eq!(err.code(), "FORBIDDEN");

        let err = provider
            .get_page(&CapabilitySet::wildcard(), "missing")
            .unwrap_err();
        assert_eq!(err.code(), "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_data_query_translation() {
        let (provider, seen) = fixture();
        let caps = CapabilitySet::from_iter(["invoices.read"]);
        let rctx = RequestContext::new("alice", "t1", "p1");

        let mut filters = HashMap::new();
        filters.insert("status".to_string(), "open".to_string());
        let response = provider
            .get_page_data(
                &CancellationToken::new(),
                &rctx,
                &caps,
                "invoice-list",
                PageDataQuery {
                    page: Some(2),
                    page_size: None,
                    sort: Some("number".into()),
                    sort_dir: Some("DESC".into()),
                    q: Some("acme".into()),
                    filters,
                },
            )
            .await
            .unwrap();

        assert_eq!(response.meta.page, 2);
        assert_eq!(response.meta.page_size, 50); // definition default

        let inputs = seen.lock().unwrap();
        let params = &inputs[0].query_params;
        assert_eq!(params["page"], "2");
        assert_eq!(params["page_size"], "50");
        assert_eq!(params["sort"], "number");
        assert_eq!(params["sort_dir"], "desc");
        assert_eq!(params["q"], "acme");
        assert_eq!(params["filter[status]"], "open");
    }

    #[tokio::test]
    async fn test_bad_sort_dir_rejected() {
        let (provider, _) = fixture();
        let caps = CapabilitySet::from_iter(["invoices.read"]);
        let rctx = RequestContext::new("alice", "t1", "p1");

        let err = provider
            .get_page_data(
                &CancellationToken::new(),
                &rctx,
                &caps,
                "invoice-list",
                PageDataQuery {
                    sort: Some("number".into()),
                    sort_dir: Some("sideways".into()),
                    ..PageDataQuery::default()
                },
            )
            .await
            .unwrap_err();
        assert_eq!(err.code(), "BAD_REQUEST");
    }
}

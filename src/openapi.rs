// OpenAPI operation index - (service, operation) -> method/path/base-url

//! # OpenAPI Index
//!
//! Parses the OpenAPI documents of every configured downstream service and
//! indexes each operation by `(service_id, operation_id)`. The index is built
//! once at startup (or reload) and is immutable afterwards, so lookups are
//! plain map reads with no locking.
//!
//! Only the fields the invoker needs survive parsing: HTTP method, path
//! template, and the service base URL. Operations without an `operationId`
//! are skipped - they cannot be referenced from definitions.

use serde_json::Value;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, warn};

use crate::{Result, SwitchboardError};

/// HTTP methods recognized in OpenAPI path items.
const METHODS: [&str; 7] = ["get", "put", "post", "delete", "patch", "head", "options"];

/// Where one service's contract comes from.
#[derive(Debug, Clone)]
pub struct ServiceSpecSource {
    pub service_id: String,
    pub spec_path: String,
    pub base_url: String,
}

/// One indexed operation, uniquely identified by `(service_id, operation_id)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedOperation {
    pub service_id: String,
    pub operation_id: String,
    /// Uppercase HTTP method
    pub method: String,
    /// Path template with `{name}` placeholders, e.g. `/invoices/{id}`
    pub path_template: String,
    pub base_url: String,
}

/// Immutable `(service, operation)` index over all configured services.
#[derive(Debug, Default)]
pub struct OpenApiIndex {
    operations: HashMap<(String, String), IndexedOperation>,
}

impl OpenApiIndex {
    /// Parse every source document and build the index.
    ///
    /// Fails with `LOAD_ERROR` semantics on unreadable or unparseable specs;
    /// a reload constructs a whole new index rather than patching this one.
    pub fn load(sources: &[ServiceSpecSource]) -> Result<Self> {
        let mut index = OpenApiIndex::default();
        for source in sources {
            let raw = std::fs::read_to_string(&source.spec_path).map_err(|e| {
                SwitchboardError::LoadError {
                    path: source.spec_path.clone(),
                    message: e.to_string(),
                }
            })?;
            let doc = parse_spec(&source.spec_path, &raw)?;
            index.index_document(source, &doc);
        }
        Ok(index)
    }

    /// Build an index directly from already-parsed documents. Used by tests
    /// and by callers that fetch specs remotely.
    pub fn from_documents(docs: &[(ServiceSpecSource, Value)]) -> Self {
        let mut index = OpenApiIndex::default();
        for (source, doc) in docs {
            index.index_document(source, doc);
        }
        index
    }

    fn index_document(&mut self, source: &ServiceSpecSource, doc: &Value) {
        let paths = match doc.get("paths").and_then(Value::as_object) {
            Some(paths) => paths,
            None => {
                warn!(service = %source.service_id, "spec has no paths object");
                return;
            }
        };

        for (path_template, item) in paths {
            let item = match item.as_object() {
                Some(item) => item,
                None => continue,
            };
            for method in METHODS {
                let op = match item.get(method) {
                    Some(op) => op,
                    None => continue,
                };
                let operation_id = match op.get("operationId").and_then(Value::as_str) {
                    Some(id) => id.to_string(),
                    None => {
                        debug!(
                            service = %source.service_id,
                            path = %path_template,
                            method,
                            "skipping operation without operationId"
                        );
                        continue;
                    }
                };
                self.operations.insert(
                    (source.service_id.clone(), operation_id.clone()),
                    IndexedOperation {
                        service_id: source.service_id.clone(),
                        operation_id,
                        method: method.to_uppercase(),
                        path_template: path_template.clone(),
                        base_url: source.base_url.trim_end_matches('/').to_string(),
                    },
                );
            }
        }
    }

    /// Lock-free lookup; the index never changes after construction.
    pub fn get_operation(&self, service_id: &str, operation_id: &str) -> Option<&IndexedOperation> {
        self.operations
            .get(&(service_id.to_string(), operation_id.to_string()))
    }

    pub fn contains(&self, service_id: &str, operation_id: &str) -> bool {
        self.get_operation(service_id, operation_id).is_some()
    }

    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// Parse a spec document as JSON or YAML depending on the file extension.
fn parse_spec(path: &str, raw: &str) -> Result<Value> {
    let is_json = Path::new(path)
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if is_json {
        serde_json::from_str(raw).map_err(|e| SwitchboardError::LoadError {
            path: path.to_string(),
            message: e.to_string(),
        })
    } else {
        serde_yaml::from_str(raw).map_err(|e| SwitchboardError::LoadError {
            path: path.to_string(),
            message: e.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn billing_source() -> ServiceSpecSource {
        ServiceSpecSource {
            service_id: "billing".into(),
            spec_path: "billing.yaml".into(),
            base_url: "http://billing.internal/".into(),
        }
    }

    fn billing_doc() -> Value {
        json!({
            "openapi": "3.0.0",
            "paths": {
                "/invoices": {
                    "get": {"operationId": "listInvoices"},
                    "post": {"operationId": "createInvoice"}
                },
                "/invoices/{id}": {
                    "get": {"operationId": "getInvoice"},
                    "delete": {}
                }
            }
        })
    }

    #[test]
    fn test_index_builds_and_resolves() {
        let index = OpenApiIndex::from_documents(&[(billing_source(), billing_doc())]);
        assert_eq!(index.len(), 3);

        let op = index.get_operation("billing", "getInvoice").unwrap();
        assert_eq!(op.method, "GET");
        assert_eq!(op.path_template, "/invoices/{id}");
        assert_eq!(op.base_url, "http://billing.internal");

        let post = index.get_operation("billing", "createInvoice").unwrap();
        assert_eq!(post.method, "POST");
    }

    #[test]
    fn test_operations_without_id_are_skipped() {
        let index = OpenApiIndex::from_documents(&[(billing_source(), billing_doc())]);
        // the delete on /invoices/{id} has no operationId
        assert!(!index.contains("billing", ""));
    }

    #[test]
    fn test_unknown_service_or_operation() {
        let index = OpenApiIndex::from_documents(&[(billing_source(), billing_doc())]);
        assert!(index.get_operation("billing", "nope").is_none());
        assert!(index.get_operation("ordering", "listInvoices").is_none());
    }

    #[test]
    fn test_yaml_spec_parses() {
        let raw = r#"
openapi: 3.0.0
paths:
  /things:
    get:
      operationId: listThings
"#;
        let doc = parse_spec("svc.yaml", raw).unwrap();
        let index = OpenApiIndex::from_documents(&[(billing_source(), doc)]);
        assert!(index.contains("billing", "listThings"));
    }
}

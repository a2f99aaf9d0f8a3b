// Lookup provider - cached option lists resolved from backend operations

//! # Lookup Provider
//!
//! Lookups are small option lists (currencies, countries, statuses) that
//! change rarely and are requested constantly. Each lookup definition names
//! a backend operation, the label/value fields, and a cache policy.
//!
//! Cache keys widen with the definition's scope - `lookup:<id>`,
//! `lookup:<id>:<tenant>`, `lookup:<id>:<tenant>:<partition>` - so a
//! tenant-scoped lookup can never leak across tenants. The query filter is
//! applied to a copy after the cache, so filtered requests still share one
//! cached fetch.

use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{extract_items, require_success};
use crate::cache::{scoped_key, TtlCache};
use crate::definitions::registry::DefinitionRegistry;
use crate::invoker::{InvocationInput, InvokerRegistry};
use crate::models::{LookupDefinition, RequestContext};
use crate::{Result, SwitchboardError};

const DEFAULT_TTL: Duration = Duration::from_secs(300);

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupOption {
    pub label: String,
    pub value: Value,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupResponse {
    pub data: Vec<LookupOption>,
    pub meta: LookupMeta,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupMeta {
    pub cached: bool,
}

pub struct LookupProvider {
    registry: Arc<DefinitionRegistry>,
    invokers: Arc<InvokerRegistry>,
    cache: TtlCache<Vec<LookupOption>>,
}

impl LookupProvider {
    pub fn new(
        registry: Arc<DefinitionRegistry>,
        invokers: Arc<InvokerRegistry>,
        cache_capacity: usize,
    ) -> Self {
        LookupProvider {
            registry,
            invokers,
            cache: TtlCache::new(cache_capacity),
        }
    }

    /// Resolve a lookup to its option list, consulting the scope-keyed cache
    /// first and filtering by `query` (case-insensitive substring on the
    /// label) on the way out.
    pub async fn get_lookup(
        &self,
        cancel: &CancellationToken,
        rctx: &RequestContext,
        lookup_id: &str,
        query: Option<&str>,
    ) -> Result<LookupResponse> {
        let snapshot = self.registry.snapshot();
        let entry = snapshot.lookup(lookup_id).ok_or_else(|| SwitchboardError::NotFound {
            kind: "lookup",
            id: lookup_id.to_string(),
        })?;
        let definition = &entry.item;

        let key = scoped_key(&format!("lookup:{lookup_id}"), definition.cache.scope, rctx);

        if let Some(options) = self.cache.get(&key) {
            return Ok(LookupResponse {
                data: filter_options(options, query),
                meta: LookupMeta { cached: true },
            });
        }

        debug!(lookup = lookup_id, key = %key, "lookup cache miss");
        let result = self
            .invokers
            .invoke(cancel, rctx, &definition.operation, InvocationInput::default())
            .await?;
        let result = require_success("lookup", result)?;

        let options = map_options(definition, result.body.as_ref());
        self.cache.insert(key, options.clone(), ttl_of(definition));

        Ok(LookupResponse {
            data: filter_options(options, query),
            meta: LookupMeta { cached: false },
        })
    }

    /// Drop cached entries for a lookup, optionally restricted to keys
    /// containing the given tenant.
    pub fn invalidate(&self, lookup_id: &str, tenant_id: Option<&str>) {
        self.cache.invalidate(&format!("lookup:{lookup_id}"), tenant_id);
    }
}

fn ttl_of(definition: &LookupDefinition) -> Duration {
    definition
        .cache
        .ttl
        .as_deref()
        .and_then(|raw| humantime::parse_duration(raw).ok())
        .unwrap_or(DEFAULT_TTL)
}

/// Map backend items to options via the definition's label/value fields.
/// Items missing both fields are skipped; a missing label falls back to the
/// stringified value.
fn map_options(definition: &LookupDefinition, body: Option<&Value>) -> Vec<LookupOption> {
    let items = extract_items(body);
    let mut options = Vec::with_capacity(items.len());
    for item in items {
        let label = item.get(&definition.label_field).and_then(Value::as_str);
        let value = item.get(&definition.value_field).cloned();
        match (label, value) {
            (None, None) | (None, Some(Value::Null)) => continue,
            (Some(label), value) => options.push(LookupOption {
                label: label.to_string(),
                value: value.unwrap_or(Value::Null),
            }),
            (None, Some(value)) => options.push(LookupOption {
                label: stringify(&value),
                value,
            }),
        }
    }
    options
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn filter_options(options: Vec<LookupOption>, query: Option<&str>) -> Vec<LookupOption> {
    match query {
        None => options,
        Some(q) => {
            let needle = q.to_lowercase();
            options
                .into_iter()
                .filter(|o| o.label.to_lowercase().contains(&needle))
                .collect()
        }
    }
}

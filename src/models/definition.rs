// Domain definitions - the declarative configuration unit loaded from YAML

//! # Domain Definitions
//!
//! A [`DomainDefinition`] is one YAML file on disk: the complete declarative
//! description of a business domain as the UI sees it. It bundles
//! navigation, pages, forms, commands, workflows, searches, and lookups
//! under a single `domain` identifier.
//!
//! ## Identity and Integrity
//!
//! - `domain` is the unique identifier; every capability string referenced
//!   anywhere in the file must live in the `<domain>.` namespace
//! - `version` is a semver string maintained by the definition author
//! - `checksum` is the SHA-256 of the raw file bytes, attached by the loader
//!   and never serialized back out
//!
//! ## Operation Bindings
//!
//! Anywhere a definition needs backend data it carries an
//! [`OperationBinding`]: either an `openapi` binding (`serviceId` +
//! `operationId`, resolved against the OpenAPI index) or an `sdk` binding
//! (a named in-process handler).

use serde::{Deserialize, Serialize};

use super::workflow::WorkflowDefinition;

/// One loaded definition file; the unit of registry replacement.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainDefinition {
    /// Domain identifier, e.g. "invoices". Non-empty; namespaces capabilities.
    pub domain: String,

    /// Author-maintained semver string, e.g. "1.4.0"
    pub version: String,

    /// SHA-256 of the raw source bytes, attached by the loader
    #[serde(skip)]
    pub checksum: String,

    /// Path the definition was loaded from, attached by the loader
    #[serde(skip)]
    pub source_file: String,

    /// Navigation contributed by this domain
    #[serde(default)]
    pub navigation: Option<NavigationDefinition>,

    #[serde(default)]
    pub pages: Vec<PageDefinition>,

    #[serde(default)]
    pub forms: Vec<FormDefinition>,

    #[serde(default)]
    pub commands: Vec<CommandDefinition>,

    #[serde(default)]
    pub workflows: Vec<WorkflowDefinition>,

    #[serde(default)]
    pub searches: Vec<SearchDefinition>,

    #[serde(default)]
    pub lookups: Vec<LookupDefinition>,
}

/// Navigation block of a domain: an ordered tree of menu items.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationDefinition {
    #[serde(default)]
    pub items: Vec<NavigationItem>,
}

/// One menu entry; nests arbitrarily deep.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NavigationItem {
    pub id: String,
    pub label: String,

    #[serde(default)]
    pub icon: Option<String>,

    /// Client-side route the item links to; absent for pure group nodes
    #[serde(default)]
    pub route: Option<String>,

    /// Capability required to see this item (and its subtree)
    #[serde(default)]
    pub capability: Option<String>,

    #[serde(default)]
    pub items: Vec<NavigationItem>,
}

/// How a page is rendered by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PageLayout {
    /// Tabular listing; requires `table` with at least one column
    List,
    /// Single-entity detail view
    Detail,
    /// Free-form widget board
    Dashboard,
}

/// A UI page: layout, data source, table shape, and page-level actions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDefinition {
    pub id: String,
    pub title: String,
    pub layout: PageLayout,

    /// Capabilities required to see the page; empty means public
    #[serde(default)]
    pub capabilities: Vec<String>,

    /// Backend data source powering `/pages/{id}/data`
    #[serde(default)]
    pub data: Option<PageDataSource>,

    /// Table shape; mandatory for `layout: list`
    #[serde(default)]
    pub table: Option<TableDefinition>,

    /// Commands surfaced as page-level actions
    #[serde(default)]
    pub actions: Vec<PageAction>,
}

/// Backend operation feeding a page, with its default page size.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageDataSource {
    pub operation: OperationBinding,

    /// Rows per page; must sit in [1, 200] when present
    #[serde(default)]
    pub page_size: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinition {
    #[serde(default)]
    pub columns: Vec<ColumnDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnDefinition {
    /// Field path into each row object
    pub field: String,
    pub label: String,

    #[serde(default)]
    pub sortable: bool,

    /// Client-side format hint (date, currency, ...)
    #[serde(default)]
    pub format: Option<String>,
}

/// Action rendered on a page, delegating to a command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageAction {
    pub id: String,
    pub label: String,

    /// Command (within the same domain) the action executes
    pub command: String,

    #[serde(default)]
    pub capability: Option<String>,
}

/// A form: fields, optional pre-population source, and its submit command.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormDefinition {
    pub id: String,
    pub title: String,

    #[serde(default)]
    pub capabilities: Vec<String>,

    #[serde(default)]
    pub fields: Vec<FormField>,

    /// Command executed on submit; must exist within the domain
    #[serde(default)]
    pub submit_command: Option<String>,

    /// Backend operation pre-populating `/forms/{id}/data`
    #[serde(default)]
    pub data: Option<OperationBinding>,
}

/// One form field.
///
/// `read_only` is a raw string in source: `"true"` and `"always"` both fold
/// to a read-only descriptor field, anything else is writable.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FormField {
    pub id: String,
    pub label: String,

    /// Field widget: text, textarea, number, date, select, checkbox
    #[serde(rename = "type")]
    pub field_type: String,

    #[serde(default)]
    pub required: bool,

    #[serde(rename = "read_only", default)]
    pub read_only: Option<String>,

    /// Lookup feeding the options of a select field
    #[serde(default)]
    pub lookup: Option<String>,
}

impl FormField {
    /// Fold the raw `read_only` string into the descriptor boolean.
    /// `"true"` and `"always"` are read-only; every other value is not.
    pub fn is_read_only(&self) -> bool {
        matches!(self.read_only.as_deref(), Some("true") | Some("always"))
    }
}

/// A command: a named backend mutation the UI can trigger.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandDefinition {
    pub id: String,

    #[serde(default)]
    pub label: Option<String>,

    #[serde(default)]
    pub capabilities: Vec<String>,

    pub operation: OperationBinding,
}

/// A search contribution: how this domain answers global search queries.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchDefinition {
    pub id: String,

    #[serde(default)]
    pub capability: Option<String>,

    pub operation: OperationBinding,

    /// Provider weight applied to every result's score
    #[serde(default = "default_weight")]
    pub weight: f64,

    /// Cap on this provider's contribution to the merged result set
    #[serde(default = "default_max_results")]
    pub max_results: usize,

    pub result_mapping: ResultMapping,
}

fn default_weight() -> f64 {
    1.0
}

fn default_max_results() -> usize {
    20
}

/// Field paths projecting a backend item into a `SearchResult`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResultMapping {
    pub id_field: String,
    pub title_field: String,

    #[serde(default)]
    pub subtitle_field: Option<String>,

    /// Route template; `{field}` placeholders substitute item fields
    #[serde(default)]
    pub route_template: Option<String>,
}

/// A lookup: a small option list resolved from a backend and cached.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LookupDefinition {
    pub id: String,

    pub operation: OperationBinding,

    /// Item field used as the option label
    pub label_field: String,

    /// Item field used as the option value
    pub value_field: String,

    #[serde(default)]
    pub cache: CacheConfig,
}

/// Cache scope selects how lookup keys widen: a `global` entry is shared by
/// all tenants, `tenant` adds the tenant ID, `partition` adds both.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheScope {
    Global,
    #[default]
    Tenant,
    Partition,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheConfig {
    #[serde(default)]
    pub scope: CacheScope,

    /// Time-to-live as a humantime string ("5m", "90s"); 5 minutes when
    /// absent or unparseable
    #[serde(default)]
    pub ttl: Option<String>,
}

/// Dispatch target carried by definitions and requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingType {
    Openapi,
    Sdk,
}

impl BindingType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BindingType::Openapi => "openapi",
            BindingType::Sdk => "sdk",
        }
    }
}

/// Where an operation executes: a remote OpenAPI operation or an in-process
/// SDK handler. `service_id`/`operation_id` are meaningful for `openapi`,
/// `handler` for `sdk`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationBinding {
    #[serde(rename = "type")]
    pub binding_type: BindingType,

    #[serde(default)]
    pub service_id: String,

    #[serde(default)]
    pub operation_id: String,

    #[serde(default)]
    pub handler: String,
}

impl OperationBinding {
    pub fn openapi(service_id: impl Into<String>, operation_id: impl Into<String>) -> Self {
        OperationBinding {
            binding_type: BindingType::Openapi,
            service_id: service_id.into(),
            operation_id: operation_id.into(),
            handler: String::new(),
        }
    }

    pub fn sdk(handler: impl Into<String>) -> Self {
        OperationBinding {
            binding_type: BindingType::Sdk,
            service_id: String::new(),
            operation_id: String::new(),
            handler: handler.into(),
        }
    }
}

impl DomainDefinition {
    /// Iterate every operation binding the definition references, paired with
    /// a human-readable location for validation messages.
    pub fn bindings(&self) -> Vec<(String, &OperationBinding)> {
        let mut out = Vec::new();
        for page in &self.pages {
            if let Some(data) = &page.data {
                out.push((format!("pages[{}].data.operation", page.id), &data.operation));
            }
        }
        for form in &self.forms {
            if let Some(op) = &form.data {
                out.push((format!("forms[{}].data", form.id), op));
            }
        }
        for command in &self.commands {
            out.push((format!("commands[{}].operation", command.id), &command.operation));
        }
        for search in &self.searches {
            out.push((format!("searches[{}].operation", search.id), &search.operation));
        }
        for lookup in &self.lookups {
            out.push((format!("lookups[{}].operation", lookup.id), &lookup.operation));
        }
        for workflow in &self.workflows {
            for step in &workflow.steps {
                if let Some(op) = &step.operation {
                    out.push((
                        format!("workflows[{}].steps[{}].operation", workflow.id, step.id),
                        op,
                    ));
                }
            }
        }
        out
    }

    pub fn page(&self, id: &str) -> Option<&PageDefinition> {
        self.pages.iter().find(|p| p.id == id)
    }

    pub fn form(&self, id: &str) -> Option<&FormDefinition> {
        self.forms.iter().find(|f| f.id == id)
    }

    pub fn command(&self, id: &str) -> Option<&CommandDefinition> {
        self.commands.iter().find(|c| c.id == id)
    }
}

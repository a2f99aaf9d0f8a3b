// Definition validator - cross-checks definitions against service contracts

//! # Definition Validator
//!
//! Validates a loaded batch of domain definitions before it may replace the
//! registry snapshot. All errors are collected and returned together - a
//! definition author gets the complete picture in one pass, and a non-empty
//! result blocks the swap.
//!
//! ## Checks
//!
//! - required fields present (`REQUIRED`)
//! - string-typed enum fields take allowed values (`INVALID_ENUM`)
//! - numeric ranges, e.g. page size in [1, 200] (`RANGE`)
//! - layout-conditional shape: `list` pages need a table with columns
//!   (`REQUIRED`)
//! - every `openapi` binding resolves in the index (`OPERATION_NOT_FOUND`)
//! - intra-definition references exist: submit commands, page actions,
//!   field lookups, workflow steps and transition endpoints (`REF_NOT_FOUND`)
//! - every workflow can reach a terminal step from its initial step
//!   (`REF_NOT_FOUND`)
//! - capability strings live in the owning domain's namespace
//!   (`NAMESPACE_MISMATCH`)

use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::models::{
    BindingType, DomainDefinition, NavigationItem, StepType, WorkflowDefinition,
};
use crate::openapi::OpenApiIndex;

/// Allowed form field widgets.
const FIELD_TYPES: [&str; 6] = ["text", "textarea", "number", "date", "select", "checkbox"];

/// Stable validation error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    Required,
    InvalidEnum,
    Range,
    OperationNotFound,
    RefNotFound,
    NamespaceMismatch,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCode::Required => "REQUIRED",
            ValidationCode::InvalidEnum => "INVALID_ENUM",
            ValidationCode::Range => "RANGE",
            ValidationCode::OperationNotFound => "OPERATION_NOT_FOUND",
            ValidationCode::RefNotFound => "REF_NOT_FOUND",
            ValidationCode::NamespaceMismatch => "NAMESPACE_MISMATCH",
        }
    }
}

/// One validation finding, locatable within its definition.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub code: ValidationCode,
    pub domain: String,
    pub location: String,
    pub message: String,
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{}] {} {}: {}",
            self.code.as_str(),
            self.domain,
            self.location,
            self.message
        )
    }
}

/// Validate a batch of definitions against the OpenAPI index.
///
/// Returns every error found; an empty vector means the batch may be
/// promoted to the registry.
pub fn validate_definitions(
    definitions: &[DomainDefinition],
    index: &OpenApiIndex,
) -> Vec<ValidationError> {
    let mut ctx = Context::default();
    for definition in definitions {
        ctx.validate_definition(definition, index);
    }
    ctx.errors
}

#[derive(Default)]
struct Context {
    errors: Vec<ValidationError>,
}

impl Context {
    fn push(&mut self, code: ValidationCode, domain: &str, location: impl Into<String>, message: impl Into<String>) {
        self.errors.push(ValidationError {
            code,
            domain: domain.to_string(),
            location: location.into(),
            message: message.into(),
        });
    }

    fn validate_definition(&mut self, def: &DomainDefinition, index: &OpenApiIndex) {
        let domain = def.domain.as_str();

        if domain.is_empty() {
            self.push(
                ValidationCode::Required,
                "",
                def.source_file.clone(),
                "domain must not be empty",
            );
            // nothing else can be namespace-checked without a domain
            return;
        }
        if !is_semver(&def.version) {
            self.push(
                ValidationCode::Required,
                domain,
                "version",
                format!("'{}' is not a semver string", def.version),
            );
        }

        if let Some(nav) = &def.navigation {
            for (i, item) in nav.items.iter().enumerate() {
                self.validate_nav_item(domain, &format!("navigation.items[{i}]"), item);
            }
        }

        self.validate_pages(def);
        self.validate_forms(def);
        self.validate_commands(def);
        self.validate_searches(def);
        self.validate_lookups(def);
        for workflow in &def.workflows {
            self.validate_workflow(domain, workflow);
        }
        self.validate_bindings(def, index);
    }

    fn validate_nav_item(&mut self, domain: &str, location: &str, item: &NavigationItem) {
        if item.id.is_empty() {
            self.push(ValidationCode::Required, domain, location, "id must not be empty");
        }
        if item.label.is_empty() {
            self.push(
                ValidationCode::Required,
                domain,
                format!("{location}.label"),
                "label must not be empty",
            );
        }
        if let Some(cap) = &item.capability {
            self.check_namespace(domain, format!("{location}.capability"), cap);
        }
        for (i, child) in item.items.iter().enumerate() {
            self.validate_nav_item(domain, &format!("{location}.items[{i}]"), child);
        }
    }

    fn validate_pages(&mut self, def: &DomainDefinition) {
        let domain = def.domain.as_str();
        for page in &def.pages {
            let loc = format!("pages[{}]", page.id);
            if page.id.is_empty() {
                self.push(ValidationCode::Required, domain, "pages[]", "id must not be empty");
            }
            if page.title.is_empty() {
                self.push(
                    ValidationCode::Required,
                    domain,
                    format!("{loc}.title"),
                    "title must not be empty",
                );
            }
            for cap in &page.capabilities {
                self.check_namespace(domain, format!("{loc}.capabilities"), cap);
            }

            if let Some(data) = &page.data {
                if let Some(size) = data.page_size {
                    if !(1..=200).contains(&size) {
                        self.push(
                            ValidationCode::Range,
                            domain,
                            format!("{loc}.data.pageSize"),
                            format!("page size {size} outside [1, 200]"),
                        );
                    }
                }
            }

            // list layout needs something to render rows with
            if page.layout == crate::models::PageLayout::List {
                let has_columns = page
                    .table
                    .as_ref()
                    .map(|t| !t.columns.is_empty())
                    .unwrap_or(false);
                if !has_columns {
                    self.push(
                        ValidationCode::Required,
                        domain,
                        format!("{loc}.table"),
                        "list layout requires a table with at least one column",
                    );
                }
            }

            for action in &page.actions {
                if def.command(&action.command).is_none() {
                    self.push(
                        ValidationCode::RefNotFound,
                        domain,
                        format!("{loc}.actions[{}].command", action.id),
                        format!("command '{}' is not defined in this domain", action.command),
                    );
                }
                if let Some(cap) = &action.capability {
                    self.check_namespace(domain, format!("{loc}.actions[{}].capability", action.id), cap);
                }
            }
        }
    }

    fn validate_forms(&mut self, def: &DomainDefinition) {
        let domain = def.domain.as_str();
        for form in &def.forms {
            let loc = format!("forms[{}]", form.id);
            if form.id.is_empty() {
                self.push(ValidationCode::Required, domain, "forms[]", "id must not be empty");
            }
            if form.title.is_empty() {
                self.push(
                    ValidationCode::Required,
                    domain,
                    format!("{loc}.title"),
                    "title must not be empty",
                );
            }
            for cap in &form.capabilities {
                self.check_namespace(domain, format!("{loc}.capabilities"), cap);
            }

            for field in &form.fields {
                let floc = format!("{loc}.fields[{}]", field.id);
                if field.id.is_empty() {
                    self.push(
                        ValidationCode::Required,
                        domain,
                        format!("{loc}.fields[]"),
                        "field id must not be empty",
                    );
                }
                if !FIELD_TYPES.contains(&field.field_type.as_str()) {
                    self.push(
                        ValidationCode::InvalidEnum,
                        domain,
                        format!("{floc}.type"),
                        format!(
                            "'{}' is not one of {}",
                            field.field_type,
                            FIELD_TYPES.join(", ")
                        ),
                    );
                }
                if let Some(lookup) = &field.lookup {
                    if !def.lookups.iter().any(|l| &l.id == lookup) {
                        self.push(
                            ValidationCode::RefNotFound,
                            domain,
                            format!("{floc}.lookup"),
                            format!("lookup '{lookup}' is not defined in this domain"),
                        );
                    }
                }
            }

            if let Some(command) = &form.submit_command {
                if def.command(command).is_none() {
                    self.push(
                        ValidationCode::RefNotFound,
                        domain,
                        format!("{loc}.submitCommand"),
                        format!("command '{command}' is not defined in this domain"),
                    );
                }
            }
        }
    }

    fn validate_commands(&mut self, def: &DomainDefinition) {
        let domain = def.domain.as_str();
        for command in &def.commands {
            if command.id.is_empty() {
                self.push(
                    ValidationCode::Required,
                    domain,
                    "commands[]",
                    "id must not be empty",
                );
            }
            for cap in &command.capabilities {
                self.check_namespace(domain, format!("commands[{}].capabilities", command.id), cap);
            }
        }
    }

    fn validate_searches(&mut self, def: &DomainDefinition) {
        let domain = def.domain.as_str();
        for search in &def.searches {
            let loc = format!("searches[{}]", search.id);
            if search.id.is_empty() {
                self.push(
                    ValidationCode::Required,
                    domain,
                    "searches[]",
                    "id must not be empty",
                );
            }
            if search.weight <= 0.0 {
                self.push(
                    ValidationCode::Range,
                    domain,
                    format!("{loc}.weight"),
                    format!("weight {} must be positive", search.weight),
                );
            }
            if search.max_results == 0 {
                self.push(
                    ValidationCode::Range,
                    domain,
                    format!("{loc}.maxResults"),
                    "maxResults must be at least 1",
                );
            }
            if search.result_mapping.id_field.is_empty() {
                self.push(
                    ValidationCode::Required,
                    domain,
                    format!("{loc}.resultMapping.idField"),
                    "idField must not be empty",
                );
            }
            if search.result_mapping.title_field.is_empty() {
                self.push(
                    ValidationCode::Required,
                    domain,
                    format!("{loc}.resultMapping.titleField"),
                    "titleField must not be empty",
                );
            }
            if let Some(cap) = &search.capability {
                self.check_namespace(domain, format!("{loc}.capability"), cap);
            }
        }
    }

    fn validate_lookups(&mut self, def: &DomainDefinition) {
        let domain = def.domain.as_str();
        for lookup in &def.lookups {
            let loc = format!("lookups[{}]", lookup.id);
            if lookup.id.is_empty() {
                self.push(
                    ValidationCode::Required,
                    domain,
                    "lookups[]",
                    "id must not be empty",
                );
            }
            if lookup.label_field.is_empty() {
                self.push(
                    ValidationCode::Required,
                    domain,
                    format!("{loc}.labelField"),
                    "labelField must not be empty",
                );
            }
            if lookup.value_field.is_empty() {
                self.push(
                    ValidationCode::Required,
                    domain,
                    format!("{loc}.valueField"),
                    "valueField must not be empty",
                );
            }
        }
    }

    fn validate_workflow(&mut self, domain: &str, workflow: &WorkflowDefinition) {
        let loc = format!("workflows[{}]", workflow.id);
        if workflow.id.is_empty() {
            self.push(
                ValidationCode::Required,
                domain,
                "workflows[]",
                "id must not be empty",
            );
        }
        for cap in &workflow.capabilities {
            self.check_namespace(domain, format!("{loc}.capabilities"), cap);
        }

        let step_ids: HashSet<&str> = workflow.steps.iter().map(|s| s.id.as_str()).collect();

        if !step_ids.contains(workflow.initial_step.as_str()) {
            self.push(
                ValidationCode::RefNotFound,
                domain,
                format!("{loc}.initialStep"),
                format!("initial step '{}' is not declared", workflow.initial_step),
            );
        }

        for step in &workflow.steps {
            let sloc = format!("{loc}.steps[{}]", step.id);
            for cap in &step.capabilities {
                self.check_namespace(domain, format!("{sloc}.capabilities"), cap);
            }
            if step.step_type.is_auto() && step.operation.is_none() {
                self.push(
                    ValidationCode::Required,
                    domain,
                    format!("{sloc}.operation"),
                    format!("{} steps require an operation", step.step_type.as_str()),
                );
            }
            if let Some(target) = &step.on_timeout {
                if !step_ids.contains(target.as_str()) {
                    self.push(
                        ValidationCode::RefNotFound,
                        domain,
                        format!("{sloc}.onTimeout"),
                        format!("timeout target '{target}' is not declared"),
                    );
                }
            }
        }

        if let Some(target) = &workflow.on_timeout {
            if !step_ids.contains(target.as_str()) {
                self.push(
                    ValidationCode::RefNotFound,
                    domain,
                    format!("{loc}.onTimeout"),
                    format!("timeout target '{target}' is not declared"),
                );
            }
        }

        for (i, transition) in workflow.transitions.iter().enumerate() {
            let tloc = format!("{loc}.transitions[{i}]");
            for endpoint in [&transition.from, &transition.to] {
                if !step_ids.contains(endpoint.as_str()) {
                    self.push(
                        ValidationCode::RefNotFound,
                        domain,
                        tloc.clone(),
                        format!("step '{endpoint}' is not declared"),
                    );
                }
            }
            if let Some(guard) = &transition.guard {
                self.check_namespace(domain, format!("{tloc}.guard"), guard);
            }
        }

        if !terminal_reachable(workflow) {
            self.push(
                ValidationCode::RefNotFound,
                domain,
                loc,
                "no terminal step is reachable from the initial step",
            );
        }
    }

    fn validate_bindings(&mut self, def: &DomainDefinition, index: &OpenApiIndex) {
        let domain = def.domain.as_str();
        for (location, binding) in def.bindings() {
            match binding.binding_type {
                BindingType::Openapi => {
                    if binding.service_id.is_empty() || binding.operation_id.is_empty() {
                        self.push(
                            ValidationCode::Required,
                            domain,
                            location,
                            "openapi bindings require serviceId and operationId",
                        );
                    } else if !index.contains(&binding.service_id, &binding.operation_id) {
                        self.push(
                            ValidationCode::OperationNotFound,
                            domain,
                            location,
                            format!(
                                "operation {}/{} does not exist",
                                binding.service_id, binding.operation_id
                            ),
                        );
                    }
                }
                BindingType::Sdk => {
                    if binding.handler.is_empty() {
                        self.push(
                            ValidationCode::Required,
                            domain,
                            location,
                            "sdk bindings require a handler name",
                        );
                    }
                }
            }
        }
    }

    fn check_namespace(&mut self, domain: &str, location: impl Into<String>, capability: &str) {
        let prefix = format!("{domain}.");
        if !capability.starts_with(&prefix) {
            self.push(
                ValidationCode::NamespaceMismatch,
                domain,
                location,
                format!("capability '{capability}' is outside the '{prefix}' namespace"),
            );
        }
    }
}

/// True when some terminal step is reachable from the initial step by
/// following transitions.
fn terminal_reachable(workflow: &WorkflowDefinition) -> bool {
    let terminal: HashSet<&str> = workflow
        .steps
        .iter()
        .filter(|s| s.step_type == StepType::Terminal)
        .map(|s| s.id.as_str())
        .collect();
    if terminal.is_empty() {
        return false;
    }

    let mut edges: HashMap<&str, Vec<&str>> = HashMap::new();
    for t in &workflow.transitions {
        edges.entry(t.from.as_str()).or_default().push(t.to.as_str());
    }

    let mut seen = HashSet::new();
    let mut stack = vec![workflow.initial_step.as_str()];
    while let Some(step) = stack.pop() {
        if !seen.insert(step) {
            continue;
        }
        if terminal.contains(step) {
            return true;
        }
        if let Some(next) = edges.get(step) {
            stack.extend(next.iter().copied());
        }
    }
    false
}

fn is_semver(version: &str) -> bool {
    let parts: Vec<&str> = version.split('.').collect();
    parts.len() == 3 && parts.iter().all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::openapi::{OpenApiIndex, ServiceSpecSource};
    use serde_json::json;

    fn index_with_billing() -> OpenApiIndex {
        OpenApiIndex::from_documents(&[(
            ServiceSpecSource {
                service_id: "billing".into(),
                spec_path: "billing.yaml".into(),
                base_url: "http://billing".into(),
            },
            json!({"paths": {"/invoices": {"get": {"operationId": "listInvoices"}}}}),
        )])
    }

    fn parse(yaml: &str) -> DomainDefinition {
        serde_yaml::from_str(yaml).unwrap()
    }

    fn codes(errors: &[ValidationError]) -> Vec<&'static str> {
        errors.iter().map(|e| e.code.as_str()).collect()
    }

    #[test]
    fn test_valid_definition_passes() {
        let def = parse(
            r#"
domain: invoices
version: 1.0.0
pages:
  - id: invoice-list
    title: Invoices
    layout: list
    capabilities: [invoices.read]
    data:
      operation: {type: openapi, serviceId: billing, operationId: listInvoices}
      pageSize: 25
    table:
      columns: [{field: number, label: Number}]
"#,
        );
        let errors = validate_definitions(&[def], &index_with_billing());
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn test_unresolved_operation() {
        let def = parse(
            r#"
domain: invoices
version: 1.0.0
commands:
  - id: approve
    operation: {type: openapi, serviceId: billing, operationId: approveInvoice}
"#,
        );
        let errors = validate_definitions(&[def], &index_with_billing());
        assert_eq!(codes(&errors), vec!["OPERATION_NOT_FOUND"]);
    }

    #[test]
    fn test_list_layout_requires_columns() {
        let def = parse(
            r#"
domain: invoices
version: 1.0.0
pages:
  - id: p1
    title: P1
    layout: list
"#,
        );
        let errors = validate_definitions(&[def], &index_with_billing());
        assert_eq!(codes(&errors), vec!["REQUIRED"]);
    }

    #[test]
    fn test_page_size_range() {
        let def = parse(
            r#"
domain: invoices
version: 1.0.0
pages:
  - id: p1
    title: P1
    layout: detail
    data:
      operation: {type: openapi, serviceId: billing, operationId: listInvoices}
      pageSize: 500
"#,
        );
        let errors = validate_definitions(&[def], &index_with_billing());
        assert_eq!(codes(&errors), vec!["RANGE"]);
    }

    #[test]
    fn test_namespace_mismatch() {
        let def = parse(
            r#"
domain: invoices
version: 1.0.0
commands:
  - id: approve
    capabilities: [orders.approve]
    operation: {type: openapi, serviceId: billing, operationId: listInvoices}
"#,
        );
        let errors = validate_definitions(&[def], &index_with_billing());
        assert_eq!(codes(&errors), vec!["NAMESPACE_MISMATCH"]);
    }

    #[test]
    fn test_invalid_field_type() {
        let def = parse(
            r#"
domain: invoices
version: 1.0.0
forms:
  - id: f1
    title: F1
    fields:
      - id: a
        label: A
        type: slider
"#,
        );
        let errors = validate_definitions(&[def], &index_with_billing());
        assert_eq!(codes(&errors), vec!["INVALID_ENUM"]);
    }

    #[test]
    fn test_workflow_reference_checks() {
        let def = parse(
            r#"
domain: invoices
version: 1.0.0
workflows:
  - id: approval
    initialStep: missing
    steps:
      - id: draft
        type: task
    transitions:
      - {from: draft, to: nowhere, event: go}
"#,
        );
        let errors = validate_definitions(&[def], &index_with_billing());
        let cs = codes(&errors);
        // missing initial step, missing transition endpoint, no reachable terminal
        assert_eq!(cs.iter().filter(|c| **c == "REF_NOT_FOUND").count(), 3);
    }

    #[test]
    fn test_terminal_reachability() {
        let def = parse(
            r#"
domain: invoices
version: 1.0.0
workflows:
  - id: approval
    initialStep: draft
    steps:
      - id: draft
        type: task
      - id: done
        type: terminal
    transitions:
      - {from: draft, to: done, event: approve}
"#,
        );
        let errors = validate_definitions(&[def], &index_with_billing());
        assert!(errors.is_empty(), "unexpected errors: {errors:?}");
    }

    #[test]
    fn test_errors_are_collected_not_short_circuited() {
        let def = parse(
            r#"
domain: invoices
version: not-semver
pages:
  - id: p1
    title: ""
    layout: list
"#,
        );
        let errors = validate_definitions(&[def], &index_with_billing());
        assert!(errors.len() >= 3, "expected all errors, got {errors:?}");
    }
}

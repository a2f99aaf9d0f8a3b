// Metadata providers - definitions in, capability-filtered descriptors out

//! # Providers
//!
//! Each provider projects one kind of definition into what the UI actually
//! renders, filtered through the caller's capabilities and (where the
//! definition says so) hydrated with backend data through the invoker
//! registry:
//!
//! - [`menu::MenuProvider`] - navigation tree
//! - [`page::PageProvider`] - page descriptors and paged table data
//! - [`form::FormProvider`] - form descriptors, pre-population, submission
//! - [`action::ActionProvider`] - command execution
//! - [`lookup::LookupProvider`] - cached option lists
//! - [`search::SearchProvider`] - concurrent cross-domain search

pub mod action;
pub mod form;
pub mod lookup;
pub mod menu;
pub mod page;
pub mod search;

pub use action::ActionProvider;
pub use form::FormProvider;
pub use lookup::LookupProvider;
pub use menu::MenuProvider;
pub use page::PageProvider;
pub use search::SearchProvider;

use crate::invoker::InvocationResult;
use crate::{Result, SwitchboardError};

/// Map a non-2xx backend response onto the crate error taxonomy.
///
/// Providers that need the body of a successful response call this first;
/// the status buckets deliberately mirror what the UI should see.
pub(crate) fn require_success(
    context: &'static str,
    result: InvocationResult,
) -> Result<InvocationResult> {
    match result.status_code {
        200..=299 => Ok(result),
        404 => Err(SwitchboardError::NotFound {
            kind: context,
            id: "backend entity".to_string(),
        }),
        401 | 403 => Err(SwitchboardError::Forbidden {
            reason: format!("backend rejected {context} request"),
        }),
        400..=499 => Err(SwitchboardError::BadRequest {
            message: format!("backend rejected {context} request ({})", result.status_code),
        }),
        status => Err(SwitchboardError::BackendUnavailable {
            service: context.to_string(),
            message: format!("backend returned {status}"),
        }),
    }
}

/// Pull the item array out of the recognized backend body shapes:
/// a bare array, `{"data": [...]}`, or `{"items": [...]}`.
pub(crate) fn extract_items(body: Option<&serde_json::Value>) -> Vec<serde_json::Value> {
    let Some(body) = body else {
        return Vec::new();
    };
    if let Some(array) = body.as_array() {
        return array.clone();
    }
    for key in ["data", "items"] {
        if let Some(array) = body.get(key).and_then(|v| v.as_array()) {
            return array.clone();
        }
    }
    Vec::new()
}

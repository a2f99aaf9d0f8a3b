// Per-request identity carried through every subsystem

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Immutable identity of one UI request.
///
/// Built once at the HTTP boundary and passed by reference everywhere else.
/// All tenant-scoped lookups key on `tenant_id`; `correlation_id` is forwarded
/// to backends and echoed in error envelopes so a request can be traced across
/// service boundaries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestContext {
    /// Authenticated subject (user or service account) identifier
    pub subject_id: String,

    /// Tenant the request operates in; scopes caches, workflows, lookups
    pub tenant_id: String,

    /// Optional finer-grained partition within the tenant
    pub partition_id: String,

    /// Correlation identifier, generated when the client supplies none
    pub correlation_id: String,

    /// Bearer token forwarded verbatim to backend services
    #[serde(skip_serializing)]
    pub token: String,

    /// Subject email, informational only
    pub email: String,
}

impl RequestContext {
    /// Context for a named subject with a fresh correlation ID.
    pub fn new(
        subject_id: impl Into<String>,
        tenant_id: impl Into<String>,
        partition_id: impl Into<String>,
    ) -> Self {
        RequestContext {
            subject_id: subject_id.into(),
            tenant_id: tenant_id.into(),
            partition_id: partition_id.into(),
            correlation_id: Uuid::new_v4().to_string(),
            token: String::new(),
            email: String::new(),
        }
    }

    /// Cache key discriminating capability resolutions per subject.
    pub fn capability_cache_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.subject_id, self.tenant_id, self.partition_id
        )
    }
}

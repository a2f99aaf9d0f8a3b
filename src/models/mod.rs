// Domain models for the metadata-driven BFF
// These types are pure data: no I/O, no framework dependencies

//! # Domain Models
//!
//! Everything the rest of the crate operates on lives here:
//!
//! - [`DomainDefinition`] and its children - the declarative configuration
//!   loaded from YAML (navigation, pages, forms, commands, workflows,
//!   searches, lookups)
//! - [`RequestContext`] - immutable per-request identity
//! - [`CapabilitySet`] - permission tokens with wildcard support
//! - [`WorkflowInstance`] / [`WorkflowEvent`] - persisted state-machine runs
//!   and their append-only audit trail
//!
//! The definition types derive `Deserialize` for the YAML loader and
//! `Serialize` so the admin tooling can echo them back; none of them carry
//! behavior beyond small predicate helpers.

pub mod capability;
pub mod context;
pub mod definition;
pub mod instance;
pub mod workflow;

pub use capability::CapabilitySet;
pub use context::RequestContext;
pub use definition::{
    BindingType, CacheConfig, CacheScope, ColumnDefinition, CommandDefinition, DomainDefinition,
    FormDefinition, FormField, LookupDefinition, NavigationDefinition, NavigationItem, PageAction,
    PageDataSource, PageDefinition, PageLayout, ResultMapping, SearchDefinition, TableDefinition,
};
pub use instance::{WorkflowEvent, WorkflowInstance, WorkflowStatus, LAST_ERROR_KEY};
pub use workflow::{StepDefinition, StepType, TransitionDefinition, WorkflowDefinition};

// Re-export the binding type where most callers expect it
pub use definition::OperationBinding;

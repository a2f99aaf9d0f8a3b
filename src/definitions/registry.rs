// Definition registry - one immutable snapshot behind an atomic pointer

//! # Definition Registry
//!
//! The registry owns exactly one [`Snapshot`] at a time. `replace` builds a
//! complete new snapshot off to the side and publishes it with a single
//! atomic pointer store; readers take a single atomic load and then walk
//! plain `HashMap`s. No reader ever blocks, sees a torn snapshot, or
//! observes a partial update - a reader that loaded the old snapshot keeps
//! using the old snapshot until it asks again.

use arc_swap::ArcSwap;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Arc;

use crate::models::{
    CommandDefinition, DomainDefinition, FormDefinition, LookupDefinition, PageDefinition,
    SearchDefinition, WorkflowDefinition,
};

/// An entity paired with the domain that owns it.
#[derive(Debug, Clone)]
pub struct Entry<T> {
    pub domain: String,
    pub item: Arc<T>,
}

/// Immutable view over one validated batch of definitions, indexed by kind
/// and ID. Built once, never mutated.
#[derive(Debug, Default)]
pub struct Snapshot {
    domains: HashMap<String, Arc<DomainDefinition>>,
    pages: HashMap<String, Entry<PageDefinition>>,
    forms: HashMap<String, Entry<FormDefinition>>,
    commands: HashMap<String, Entry<CommandDefinition>>,
    workflows: HashMap<String, Entry<WorkflowDefinition>>,
    searches: Vec<Entry<SearchDefinition>>,
    lookups: HashMap<String, Entry<LookupDefinition>>,
    checksum: String,
}

impl Snapshot {
    /// Index a batch of definitions. IDs are global across domains; on a
    /// collision the later file (load order is path-sorted) wins.
    pub fn build(definitions: Vec<DomainDefinition>) -> Self {
        let mut snapshot = Snapshot {
            checksum: aggregate_checksum(&definitions),
            ..Snapshot::default()
        };

        for definition in definitions {
            let domain = definition.domain.clone();
            for page in &definition.pages {
                snapshot.pages.insert(
                    page.id.clone(),
                    Entry {
                        domain: domain.clone(),
                        item: Arc::new(page.clone()),
                    },
                );
            }
            for form in &definition.forms {
                snapshot.forms.insert(
                    form.id.clone(),
                    Entry {
                        domain: domain.clone(),
                        item: Arc::new(form.clone()),
                    },
                );
            }
            for command in &definition.commands {
                snapshot.commands.insert(
                    command.id.clone(),
                    Entry {
                        domain: domain.clone(),
                        item: Arc::new(command.clone()),
                    },
                );
            }
            for workflow in &definition.workflows {
                snapshot.workflows.insert(
                    workflow.id.clone(),
                    Entry {
                        domain: domain.clone(),
                        item: Arc::new(workflow.clone()),
                    },
                );
            }
            for search in &definition.searches {
                snapshot.searches.push(Entry {
                    domain: domain.clone(),
                    item: Arc::new(search.clone()),
                });
            }
            for lookup in &definition.lookups {
                snapshot.lookups.insert(
                    lookup.id.clone(),
                    Entry {
                        domain: domain.clone(),
                        item: Arc::new(lookup.clone()),
                    },
                );
            }
            snapshot.domains.insert(domain, Arc::new(definition));
        }
        snapshot
    }

    pub fn domain(&self, id: &str) -> Option<&Arc<DomainDefinition>> {
        self.domains.get(id)
    }

    pub fn domains(&self) -> impl Iterator<Item = &Arc<DomainDefinition>> {
        self.domains.values()
    }

    pub fn page(&self, id: &str) -> Option<&Entry<PageDefinition>> {
        self.pages.get(id)
    }

    pub fn form(&self, id: &str) -> Option<&Entry<FormDefinition>> {
        self.forms.get(id)
    }

    pub fn command(&self, id: &str) -> Option<&Entry<CommandDefinition>> {
        self.commands.get(id)
    }

    pub fn workflow(&self, id: &str) -> Option<&Entry<WorkflowDefinition>> {
        self.workflows.get(id)
    }

    pub fn searches(&self) -> &[Entry<SearchDefinition>] {
        &self.searches
    }

    pub fn lookup(&self, id: &str) -> Option<&Entry<LookupDefinition>> {
        self.lookups.get(id)
    }

    /// SHA-256 over the lexicographically sorted per-definition checksums.
    /// Stable across runs for identical input files.
    pub fn checksum(&self) -> &str {
        &self.checksum
    }
}

fn aggregate_checksum(definitions: &[DomainDefinition]) -> String {
    let mut checksums: Vec<&str> = definitions.iter().map(|d| d.checksum.as_str()).collect();
    checksums.sort_unstable();

    let mut hasher = Sha256::new();
    for checksum in checksums {
        hasher.update(checksum.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

/// Atomically swappable holder of the current [`Snapshot`].
#[derive(Debug)]
pub struct DefinitionRegistry {
    current: ArcSwap<Snapshot>,
}

impl DefinitionRegistry {
    /// Registry starting from an empty snapshot.
    pub fn new() -> Self {
        DefinitionRegistry {
            current: ArcSwap::from_pointee(Snapshot::default()),
        }
    }

    /// Registry pre-populated with a validated batch.
    pub fn with_definitions(definitions: Vec<DomainDefinition>) -> Self {
        DefinitionRegistry {
            current: ArcSwap::from_pointee(Snapshot::build(definitions)),
        }
    }

    /// Build a new snapshot and publish it in one atomic store.
    pub fn replace(&self, definitions: Vec<DomainDefinition>) {
        self.current.store(Arc::new(Snapshot::build(definitions)));
    }

    /// Load the current snapshot. The returned `Arc` pins that snapshot for
    /// as long as the caller holds it, regardless of concurrent replaces.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Aggregate checksum of the currently published snapshot.
    pub fn checksum(&self) -> String {
        self.current.load().checksum().to_string()
    }
}

impl Default for DefinitionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

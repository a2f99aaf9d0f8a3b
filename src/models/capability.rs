// Capability sets - string permission tokens with wildcard support

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// The universal capability token. A set containing it satisfies every query.
pub const WILDCARD: &str = "*";

/// A resolved set of capability strings for one subject.
///
/// Capabilities are opaque dotted tokens (`invoices.read`,
/// `invoices.approve`). Definitions name the capabilities they require;
/// providers filter their output through [`CapabilitySet::has`] and friends.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CapabilitySet {
    entries: HashSet<String>,
}

impl CapabilitySet {
    pub fn new() -> Self {
        CapabilitySet {
            entries: HashSet::new(),
        }
    }

    /// Build a set from any iterator of capability strings.
    pub fn from_iter<I, S>(iter: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        CapabilitySet {
            entries: iter.into_iter().map(Into::into).collect(),
        }
    }

    /// A set holding only the wildcard token.
    pub fn wildcard() -> Self {
        Self::from_iter([WILDCARD])
    }

    pub fn insert(&mut self, capability: impl Into<String>) {
        self.entries.insert(capability.into());
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Membership query. The wildcard entry satisfies every capability.
    pub fn has(&self, capability: &str) -> bool {
        self.entries.contains(WILDCARD) || self.entries.contains(capability)
    }

    /// True when every listed capability is held. An empty list is satisfied.
    pub fn has_all<'a, I: IntoIterator<Item = &'a str>>(&self, capabilities: I) -> bool {
        capabilities.into_iter().all(|c| self.has(c))
    }

    /// True when at least one listed capability is held. An empty list is satisfied.
    pub fn has_any<'a, I: IntoIterator<Item = &'a str>>(&self, capabilities: I) -> bool {
        let mut any = false;
        for c in capabilities {
            any = true;
            if self.has(c) {
                return true;
            }
        }
        !any
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }
}

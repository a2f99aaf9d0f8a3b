// Menu provider - capability-filtered navigation trees

use serde::Serialize;
use std::sync::Arc;

use crate::definitions::registry::DefinitionRegistry;
use crate::models::{CapabilitySet, NavigationItem};

/// What the client renders for one navigation node.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MenuItemDescriptor {
    pub id: String,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub route: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub items: Vec<MenuItemDescriptor>,
}

/// Projects every domain's navigation block into one merged, filtered tree.
pub struct MenuProvider {
    registry: Arc<DefinitionRegistry>,
}

impl MenuProvider {
    pub fn new(registry: Arc<DefinitionRegistry>) -> Self {
        MenuProvider { registry }
    }

    /// The navigation tree the caller is allowed to see.
    ///
    /// An item survives when its capability (if any) is held; a group node
    /// without a route is dropped once all of its children are filtered
    /// away. Domains contribute in lexicographic order so the merged tree
    /// is stable across reloads.
    pub fn navigation(&self, caps: &CapabilitySet) -> Vec<MenuItemDescriptor> {
        let snapshot = self.registry.snapshot();
        let mut domains: Vec<_> = snapshot.domains().collect();
        domains.sort_by(|a, b| a.domain.cmp(&b.domain));

        let mut tree = Vec::new();
        for definition in domains {
            if let Some(nav) = &definition.navigation {
                for item in &nav.items {
                    if let Some(descriptor) = project_item(item, caps) {
                        tree.push(descriptor);
                    }
                }
            }
        }
        tree
    }
}

fn project_item(item: &NavigationItem, caps: &CapabilitySet) -> Option<MenuItemDescriptor> {
    if let Some(capability) = &item.capability {
        if !caps.has(capability) {
            return None;
        }
    }

    let children: Vec<MenuItemDescriptor> = item
        .items
        .iter()
        .filter_map(|child| project_item(child, caps))
        .collect();

    // a pure group node with nothing left under it disappears
    if item.route.is_none() && children.is_empty() && !item.items.is_empty() {
        return None;
    }

    Some(MenuItemDescriptor {
        id: item.id.clone(),
        label: item.label.clone(),
        icon: item.icon.clone(),
        route: item.route.clone(),
        items: children,
    })
}

//! Component filters and entity search over committed state.

use std::collections::BTreeSet;

use super::entity_store::ReadOnlyStore;
use super::error::WorldError;
use super::types::EntityId;

/// Predicate over an entity's component set. Produced by the external query
/// front-end or built directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ComponentFilter {
    /// Matches every entity.
    All,
    /// Matches entities whose component set is exactly the given names.
    Exact(Vec<String>),
    /// Matches entities carrying at least the given names.
    Contains(Vec<String>),
}

impl ComponentFilter {
    pub fn all() -> Self {
        ComponentFilter::All
    }

    pub fn exact<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ComponentFilter::Exact(names.into_iter().map(Into::into).collect())
    }

    pub fn contains<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ComponentFilter::Contains(names.into_iter().map(Into::into).collect())
    }

    pub fn matches(&self, components: &[String]) -> bool {
        match self {
            ComponentFilter::All => true,
            ComponentFilter::Exact(names) => {
                let want: BTreeSet<&str> = names.iter().map(String::as_str).collect();
                let have: BTreeSet<&str> = components.iter().map(String::as_str).collect();
                want == have
            }
            ComponentFilter::Contains(names) => names
                .iter()
                .all(|name| components.iter().any(|have| have == name)),
        }
    }
}

/// Entity search over a read-only store view. The callback returns `false`
/// to stop iterating.
pub struct Search {
    store: ReadOnlyStore,
    filter: ComponentFilter,
}

impl Search {
    pub(crate) fn new(store: ReadOnlyStore, filter: ComponentFilter) -> Self {
        Self { store, filter }
    }

    pub fn each(&self, mut callback: impl FnMut(EntityId) -> bool) -> Result<(), WorldError> {
        for entity in self.store.entity_ids()? {
            let components = self.store.component_names_for_entity(entity)?;
            if self.filter.matches(&components) && !callback(entity) {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(raw: &[&str]) -> Vec<String> {
        raw.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn all_matches_everything() {
        assert!(ComponentFilter::all().matches(&[]));
        assert!(ComponentFilter::all().matches(&names(&["health"])));
    }

    #[test]
    fn exact_requires_the_full_set() {
        let filter = ComponentFilter::exact(["health", "position"]);
        assert!(filter.matches(&names(&["position", "health"])));
        assert!(!filter.matches(&names(&["health"])));
        assert!(!filter.matches(&names(&["health", "position", "mana"])));
    }

    #[test]
    fn contains_requires_a_subset() {
        let filter = ComponentFilter::contains(["health"]);
        assert!(filter.matches(&names(&["health", "position"])));
        assert!(!filter.matches(&names(&["position"])));
    }
}

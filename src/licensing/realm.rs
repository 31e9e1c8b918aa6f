//! Realm scoping for listing queries

use std::collections::BTreeSet;

use super::types::EntityId;

/// Set of realms a listing is restricted to. Empty means unrestricted.
#[derive(Debug, Clone, Default)]
pub struct RealmScope {
    realms: BTreeSet<EntityId>,
}

impl RealmScope {
    pub fn new(realms: impl IntoIterator<Item = EntityId>) -> Self {
        Self {
            realms: realms.into_iter().collect(),
        }
    }

    pub fn is_unscoped(&self) -> bool {
        self.realms.is_empty()
    }

    /// Whether an entity with the given memberships is visible.
    pub fn admits(&self, memberships: &[EntityId]) -> bool {
        self.is_unscoped() || memberships.iter().any(|r| self.realms.contains(r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(n: u32) -> EntityId {
        EntityId::from_number(n)
    }

    #[test]
    fn test_empty_scope_admits_everything() {
        let scope = RealmScope::default();
        assert!(scope.is_unscoped());
        assert!(scope.admits(&[]));
        assert!(scope.admits(&[id(70_000_001)]));
    }

    #[test]
    fn test_scope_requires_intersection() {
        let scope = RealmScope::new([id(70_000_001), id(70_000_002)]);
        assert!(scope.admits(&[id(70_000_002), id(70_000_009)]));
        assert!(!scope.admits(&[id(70_000_009)]));
        assert!(!scope.admits(&[]));
    }
}

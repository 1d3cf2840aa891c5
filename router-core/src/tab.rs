//! Process-wide tab ownership: the single authoritative mapping
//! `TabId → SessionId`. Every `SessionRecord::owned_tabs` set is a
//! denormalized view of this map, kept in lockstep by the router task —
//! never modelled as object back-references, only as two views updated
//! in one synchronous step.

use std::collections::HashMap;

use astra_router_types::{SessionId, TabId};

#[derive(Debug, Default)]
pub struct TabOwnership {
    owners: HashMap<TabId, SessionId>,
}

impl TabOwnership {
    pub fn owner_of(&self, tab: TabId) -> Option<SessionId> {
        self.owners.get(&tab).copied()
    }

    pub fn is_owned(&self, tab: TabId) -> bool {
        self.owners.contains_key(&tab)
    }

    /// Record that `session` now owns `tab`. Callers are responsible for
    /// also inserting into the owning `SessionRecord::owned_tabs` in the
    /// same synchronous step — see `SessionRouter::assign_tab`.
    pub fn insert(&mut self, tab: TabId, session: SessionId) {
        self.owners.insert(tab, session);
    }

    /// Remove `tab` from the registry entirely (tab closed, session
    /// ended, or reassigned elsewhere).
    pub fn remove(&mut self, tab: TabId) -> Option<SessionId> {
        self.owners.remove(&tab)
    }

    /// All tabs currently owned by `session`, for bulk teardown.
    pub fn tabs_owned_by(&self, session: SessionId) -> Vec<TabId> {
        self.owners
            .iter()
            .filter(|(_, owner)| **owner == session)
            .map(|(tab, _)| *tab)
            .collect()
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.owners.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_remove_round_trip() {
        let mut reg = TabOwnership::default();
        let s = SessionId::new();
        let t = TabId(101);
        reg.insert(t, s);
        assert_eq!(reg.owner_of(t), Some(s));
        assert_eq!(reg.remove(t), Some(s));
        assert_eq!(reg.owner_of(t), None);
    }

    #[test]
    fn tabs_owned_by_filters_correctly() {
        let mut reg = TabOwnership::default();
        let a = SessionId::new();
        let b = SessionId::new();
        reg.insert(TabId(1), a);
        reg.insert(TabId(2), a);
        reg.insert(TabId(3), b);
        let mut owned = reg.tabs_owned_by(a);
        owned.sort_by_key(|t| t.0);
        assert_eq!(owned, vec![TabId(1), TabId(2)]);
        assert_eq!(reg.len(), 3);
    }
}

//! OwnershipTable (§3): which client sessions receive a given terminal's
//! output. A terminal's bytes fan out only to the sessions listed here,
//! never to every open connection.

use std::collections::HashSet;

use dashmap::DashMap;
use tt_core::TerminalId;
use uuid::Uuid;

#[derive(Default)]
pub struct OwnershipTable {
    owners: DashMap<TerminalId, HashSet<Uuid>>,
}

impl OwnershipTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, terminal_id: TerminalId, client_id: Uuid) {
        self.owners.entry(terminal_id).or_default().insert(client_id);
    }

    pub fn owners_of(&self, terminal_id: TerminalId) -> Vec<Uuid> {
        self.owners
            .get(&terminal_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn remove(&self, terminal_id: TerminalId, client_id: Uuid) {
        if let Some(mut set) = self.owners.get_mut(&terminal_id) {
            set.remove(&client_id);
        }
    }

    /// Drop the terminal's entry entirely; called once it closes.
    pub fn remove_terminal(&self, terminal_id: TerminalId) {
        self.owners.remove(&terminal_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owners_of_unknown_terminal_is_empty() {
        let table = OwnershipTable::new();
        assert!(table.owners_of(TerminalId::new()).is_empty());
    }

    #[test]
    fn add_and_remove_round_trip() {
        let table = OwnershipTable::new();
        let id = TerminalId::new();
        let client = Uuid::new_v4();
        table.add(id, client);
        assert_eq!(table.owners_of(id), vec![client]);
        table.remove(id, client);
        assert!(table.owners_of(id).is_empty());
    }

    #[test]
    fn remove_terminal_drops_all_owners() {
        let table = OwnershipTable::new();
        let id = TerminalId::new();
        table.add(id, Uuid::new_v4());
        table.add(id, Uuid::new_v4());
        table.remove_terminal(id);
        assert!(table.owners_of(id).is_empty());
    }
}

use std::collections::{BTreeMap, BTreeSet};

/// Session-local construction subscriptions: draft id to subscribed contracts.
///
/// Never persisted. Cleared and rebuilt whenever a session is entered.
#[derive(Debug, Clone, Default)]
pub struct ListenerTable {
    by_draft: BTreeMap<String, BTreeSet<String>>,
}

impl ListenerTable {
    pub fn subscribe(&mut self, draft_id: &str, contract_id: &str) {
        self.by_draft
            .entry(draft_id.to_string())
            .or_default()
            .insert(contract_id.to_string());
    }

    /// Drops every subscription held by a contract.
    pub fn release(&mut self, contract_id: &str) {
        self.by_draft.retain(|_, subscribers| {
            subscribers.remove(contract_id);
            !subscribers.is_empty()
        });
    }

    pub fn subscribers(&self, draft_id: &str) -> impl Iterator<Item = &str> {
        self.by_draft
            .get(draft_id)
            .into_iter()
            .flat_map(|subscribers| subscribers.iter().map(String::as_str))
    }

    pub fn clear(&mut self) {
        self.by_draft.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.by_draft.is_empty()
    }

    pub fn subscription_count(&self) -> usize {
        self.by_draft.values().map(BTreeSet::len).sum()
    }
}

//! EP-008: Storage diffs between two named snapshots of chain state.

use crate::chain::State;
use serde::{Deserialize, Serialize};
use std::fmt;

/// One changed slot. `before` is `None` for newly written slots.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotChange {
    pub slot: String,
    pub before: Option<String>,
    pub after: String,
}

/// Changes to one account's storage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountDiff {
    pub address: String,
    pub changes: Vec<SlotChange>,
}

/// Storage differences for snapshot `name`, in account order of the later state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageDiff {
    pub name: String,
    pub accounts: Vec<AccountDiff>,
}

impl StorageDiff {
    pub fn is_empty(&self) -> bool {
        self.accounts.is_empty()
    }
}

/// Slots that are new or changed in `after` relative to `before`.
pub fn storage_diff(name: &str, before: &State, after: &State) -> StorageDiff {
    let mut accounts = Vec::new();
    for (addr, storage) in &after.storage {
        let prior = before.storage.get(addr);
        let changes: Vec<SlotChange> = storage
            .slots
            .iter()
            .filter_map(|(slot, value)| {
                let old = prior.and_then(|p| p.slots.get(slot));
                if old == Some(value) {
                    return None;
                }
                Some(SlotChange {
                    slot: slot.clone(),
                    before: old.cloned(),
                    after: value.clone(),
                })
            })
            .collect();
        if !changes.is_empty() {
            accounts.push(AccountDiff {
                address: addr.clone(),
                changes,
            });
        }
    }
    StorageDiff {
        name: name.to_string(),
        accounts,
    }
}

impl fmt::Display for StorageDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "storage diff '{}':", self.name)?;
        if self.accounts.is_empty() {
            return writeln!(f, "  (no changes)");
        }
        for acct in &self.accounts {
            writeln!(f, "  {}", acct.address)?;
            for c in &acct.changes {
                match &c.before {
                    Some(old) => writeln!(f, "    {}: {} -> {}", c.slot, old, c.after)?,
                    None => writeln!(f, "    {}: {} (new)", c.slot, c.after)?,
                }
            }
        }
        Ok(())
    }
}

//! Concurrent map from ActionID to a one-shot completion slot (spec.md §4.4).

use std::collections::HashMap;
use std::sync::Mutex;

use tokio::sync::oneshot;

use crate::error::AmiError;
use crate::message::Message;

/// The result delivered to a pending [`crate::client::Client::publish`]
/// caller's one-shot slot.
#[derive(Clone, Debug)]
pub enum PendingOutcome {
    /// The matching `Response:` frame arrived.
    Response(Message),
    /// The client stopped voluntarily while this call was in flight.
    Cancelled,
    /// The client faulted while this call was in flight.
    Failed(AmiError),
}

/// A concurrent mapping from `ActionID` (case-insensitive) to the one-shot
/// sender that fulfils a pending [`crate::client::Client::publish`] call.
pub struct PendingTable {
    inner: Mutex<HashMap<String, oneshot::Sender<PendingOutcome>>>,
}

impl PendingTable {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(HashMap::new()),
        }
    }

    fn normalize(action_id: &str) -> String {
        action_id.to_ascii_lowercase()
    }

    /// Inserts `slot` under `action_id` iff no entry already exists for it.
    /// Returns `false` (without inserting) if `action_id` is already pending.
    pub fn try_insert(&self, action_id: &str, slot: oneshot::Sender<PendingOutcome>) -> bool {
        let mut map = self.inner.lock().unwrap();
        match map.entry(Self::normalize(action_id)) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(e) => {
                e.insert(slot);
                true
            },
        }
    }

    /// Removes and returns the slot for `action_id`, if pending.
    pub fn try_take(&self, action_id: &str) -> Option<oneshot::Sender<PendingOutcome>> {
        self.inner.lock().unwrap().remove(&Self::normalize(action_id))
    }

    /// Removes every entry and delivers `outcome()` to each slot. `outcome`
    /// is a closure rather than a single value because `PendingOutcome` isn't
    /// `Copy` and every pending slot needs its own instance.
    pub fn drain_with(&self, outcome: impl Fn() -> PendingOutcome) {
        let drained: Vec<_> = self.inner.lock().unwrap().drain().map(|(_, slot)| slot).collect();
        for slot in drained {
            let _ = slot.send(outcome());
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

impl Default for PendingTable {
    fn default() -> Self {
        Self::new()
    }
}

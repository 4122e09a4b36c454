use std::time::Duration;

use dashmap::DashMap;
use ulid::Ulid;

use crate::limits::MAX_OPEN_FLOWS;
use crate::model::{Ms, UserChoice};

struct OpenFlow {
    choice: UserChoice,
    expires_at: Ms,
}

/// Server-side store of in-progress booking selections, keyed by flow id.
///
/// Every read or update pushes the deadline forward by the TTL. Expired flows
/// are invisible to readers and dropped by [`ChoiceStore::purge_expired`].
pub struct ChoiceStore {
    flows: DashMap<Ulid, OpenFlow>,
    ttl_ms: Ms,
}

impl ChoiceStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            flows: DashMap::new(),
            ttl_ms: ttl.as_millis() as Ms,
        }
    }

    /// Start a flow. `None` when too many flows are open.
    pub fn open(&self, choice: UserChoice, now: Ms) -> Option<Ulid> {
        if self.flows.len() >= MAX_OPEN_FLOWS {
            return None;
        }
        let id = Ulid::new();
        self.flows.insert(
            id,
            OpenFlow {
                choice,
                expires_at: now + self.ttl_ms,
            },
        );
        Some(id)
    }

    pub fn get(&self, id: &Ulid, now: Ms) -> Option<UserChoice> {
        self.update(id, now, |_| {})
    }

    /// Apply `f` to a live flow and return the updated choice.
    pub fn update(&self, id: &Ulid, now: Ms, f: impl FnOnce(&mut UserChoice)) -> Option<UserChoice> {
        let mut flow = self.flows.get_mut(id)?;
        if flow.expires_at <= now {
            return None;
        }
        f(&mut flow.choice);
        flow.expires_at = now + self.ttl_ms;
        Some(flow.choice.clone())
    }

    pub fn close(&self, id: &Ulid) -> Option<UserChoice> {
        self.flows.remove(id).map(|(_, flow)| flow.choice)
    }

    /// Drop every flow whose deadline has passed. Returns how many went.
    pub fn purge_expired(&self, now: Ms) -> usize {
        let before = self.flows.len();
        self.flows.retain(|_, flow| flow.expires_at > now);
        before.saturating_sub(self.flows.len())
    }

    pub fn len(&self) -> usize {
        self.flows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flows.is_empty()
    }
}

use std::cell::RefCell;
use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use super::events::{Listeners, SubscriptionId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    Wood,
    Stone,
    Fiber,
    Food,
    Gold,
}

impl ResourceKind {
    pub const ALL: [Self; 5] = [Self::Wood, Self::Stone, Self::Fiber, Self::Food, Self::Gold];

    pub fn as_id(self) -> &'static str {
        match self {
            Self::Wood => "wood",
            Self::Stone => "stone",
            Self::Fiber => "fiber",
            Self::Food => "food",
            Self::Gold => "gold",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.as_id() == id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResourceChanged {
    pub kind: ResourceKind,
    pub previous: i32,
    pub current: i32,
}

impl ResourceChanged {
    pub fn delta(&self) -> i32 {
        self.current - self.previous
    }

    pub fn is_gain(&self) -> bool {
        self.delta() > 0
    }

    pub fn is_spend(&self) -> bool {
        self.delta() < 0
    }
}

/// Resource kind to quantity mapping. Quantities never go below zero.
#[derive(Debug, Default)]
pub struct InventoryLedger {
    quantities: RefCell<BTreeMap<ResourceKind, i32>>,
    listeners: Listeners<ResourceChanged>,
}

impl InventoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_quantities(entries: impl IntoIterator<Item = (ResourceKind, i32)>) -> Self {
        let quantities = entries
            .into_iter()
            .map(|(kind, quantity)| (kind, quantity.max(0)))
            .collect();
        Self {
            quantities: RefCell::new(quantities),
            listeners: Listeners::default(),
        }
    }

    pub fn get(&self, kind: ResourceKind) -> i32 {
        self.quantities.borrow().get(&kind).copied().unwrap_or(0)
    }

    pub fn set(&self, kind: ResourceKind, amount: i32) {
        let amount = amount.max(0);
        let previous = self.get(kind);
        if previous == amount {
            return;
        }

        self.quantities.borrow_mut().insert(kind, amount);
        self.listeners.emit(&ResourceChanged {
            kind,
            previous,
            current: amount,
        });
    }

    pub fn add(&self, kind: ResourceKind, delta: i32) {
        let target = self.get(kind).saturating_add(delta).max(0);
        self.set(kind, target);
    }

    /// Removes `amount` only when the whole amount is available.
    pub fn try_spend(&self, kind: ResourceKind, amount: i32) -> bool {
        if amount <= 0 {
            return true;
        }
        let current = self.get(kind);
        if current < amount {
            return false;
        }
        self.set(kind, current - amount);
        true
    }

    pub fn capture(&self) -> Vec<(ResourceKind, i32)> {
        self.quantities
            .borrow()
            .iter()
            .map(|(kind, quantity)| (*kind, *quantity))
            .collect()
    }

    /// Replaces the whole ledger. Unless suppressed, one change event is
    /// emitted for every kind whose quantity differs from before the call.
    pub fn restore(&self, entries: &[(ResourceKind, i32)], suppress_events: bool) {
        let previous = self.quantities.replace(
            entries
                .iter()
                .map(|(kind, quantity)| (*kind, (*quantity).max(0)))
                .collect(),
        );
        if suppress_events {
            return;
        }

        let mut touched: BTreeSet<ResourceKind> = previous.keys().copied().collect();
        touched.extend(self.quantities.borrow().keys().copied());
        for kind in touched {
            let before = previous.get(&kind).copied().unwrap_or(0);
            let after = self.get(kind);
            if before != after {
                self.listeners.emit(&ResourceChanged {
                    kind,
                    previous: before,
                    current: after,
                });
            }
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&ResourceChanged) + 'static) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }
}

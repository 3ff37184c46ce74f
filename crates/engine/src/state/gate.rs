use std::cell::Cell;

use super::events::{Listeners, SubscriptionId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GateChanged {
    pub gate_id: String,
    pub unlocked: bool,
}

/// Boolean unlock flag tied to a stable id. An empty id means the gate is
/// not persisted.
#[derive(Debug)]
pub struct GateState {
    id: String,
    unlocked: Cell<bool>,
    listeners: Listeners<GateChanged>,
}

impl GateState {
    pub fn new(id: impl Into<String>, unlocked: bool) -> Self {
        Self {
            id: id.into(),
            unlocked: Cell::new(unlocked),
            listeners: Listeners::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_tracked(&self) -> bool {
        !self.id.is_empty()
    }

    pub fn is_unlocked(&self) -> bool {
        self.unlocked.get()
    }

    pub fn unlock(&self) {
        self.set_unlocked(true, false);
    }

    pub fn lock(&self) {
        self.set_unlocked(false, false);
    }

    /// Notifies on every non-silent call, including when the flag already
    /// holds `value`.
    pub fn set_unlocked(&self, value: bool, silent: bool) {
        self.unlocked.set(value);
        if !silent {
            self.notify();
        }
    }

    /// Notifies only when the flag actually changes.
    pub fn apply_snapshot(&self, unlocked: bool, silent: bool) -> bool {
        if self.unlocked.get() == unlocked {
            return false;
        }
        self.unlocked.set(unlocked);
        if !silent {
            self.notify();
        }
        true
    }

    pub fn subscribe(&self, listener: impl Fn(&GateChanged) + 'static) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    fn notify(&self) {
        self.listeners.emit(&GateChanged {
            gate_id: self.id.clone(),
            unlocked: self.unlocked.get(),
        });
    }
}

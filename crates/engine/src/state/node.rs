use std::cell::Cell;

use serde::{Deserialize, Serialize};

use super::events::{Listeners, SubscriptionId};
use super::snapshot::NodeRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeRunState {
    #[default]
    Inactive,
    Active,
    CoolingDown,
    Completed,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NodeChanged {
    pub node_id: String,
    pub state: NodeRunState,
    pub remaining_seconds: f32,
}

/// Persisted run state and countdown of one resource node.
#[derive(Debug)]
pub struct ResourceNodeState {
    id: String,
    state: Cell<NodeRunState>,
    remaining_seconds: Cell<f32>,
    listeners: Listeners<NodeChanged>,
}

impl ResourceNodeState {
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_state(id, NodeRunState::Inactive, 0.0)
    }

    pub fn with_state(id: impl Into<String>, state: NodeRunState, remaining_seconds: f32) -> Self {
        Self {
            id: id.into(),
            state: Cell::new(state),
            remaining_seconds: Cell::new(sanitize_seconds(remaining_seconds)),
            listeners: Listeners::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_tracked(&self) -> bool {
        !self.id.is_empty()
    }

    pub fn state(&self) -> NodeRunState {
        self.state.get()
    }

    pub fn remaining_seconds(&self) -> f32 {
        self.remaining_seconds.get()
    }

    /// Notifies on every non-silent call, even when `state` is unchanged.
    pub fn set_state(&self, state: NodeRunState, silent: bool) {
        self.state.set(state);
        if !silent {
            self.notify();
        }
    }

    /// Negative and non-finite values clamp to zero. Notifies on every
    /// non-silent call.
    pub fn set_remaining_seconds(&self, seconds: f32, silent: bool) {
        self.remaining_seconds.set(sanitize_seconds(seconds));
        if !silent {
            self.notify();
        }
    }

    /// Applies state and countdown together; notifies once, and only when at
    /// least one field changed.
    pub fn apply_snapshot(&self, record: &NodeRecord, silent: bool) -> bool {
        let mut changed = false;
        if self.state.get() != record.state {
            self.state.set(record.state);
            changed = true;
        }

        let seconds = sanitize_seconds(record.remaining_seconds);
        if !approximately(self.remaining_seconds.get(), seconds) {
            self.remaining_seconds.set(seconds);
            changed = true;
        }

        if changed && !silent {
            self.notify();
        }
        changed
    }

    pub fn to_record(&self) -> NodeRecord {
        NodeRecord {
            node_id: self.id.clone(),
            state: self.state.get(),
            remaining_seconds: self.remaining_seconds.get(),
        }
    }

    pub fn subscribe(&self, listener: impl Fn(&NodeChanged) + 'static) -> SubscriptionId {
        self.listeners.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.unsubscribe(id)
    }

    fn notify(&self) {
        self.listeners.emit(&NodeChanged {
            node_id: self.id.clone(),
            state: self.state.get(),
            remaining_seconds: self.remaining_seconds.get(),
        });
    }
}

fn sanitize_seconds(seconds: f32) -> f32 {
    if seconds.is_finite() {
        seconds.max(0.0)
    } else {
        0.0
    }
}

fn approximately(a: f32, b: f32) -> bool {
    let tolerance = (1e-6 * a.abs().max(b.abs())).max(f32::EPSILON * 8.0);
    (a - b).abs() < tolerance
}

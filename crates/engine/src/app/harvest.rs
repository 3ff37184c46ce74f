use std::fmt;
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::state::{
    InventoryLedger, Listeners, NodeRunState, ResourceKind, ResourceNodeState, SubscriptionId,
};

pub const MIN_HARVEST_SECONDS: f32 = 0.01;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceYield {
    pub kind: ResourceKind,
    pub amount: i32,
}

impl ResourceYield {
    pub fn new(kind: ResourceKind, amount: i32) -> Self {
        Self { kind, amount }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestConfig {
    #[serde(default = "default_display_name")]
    pub display_name: String,
    #[serde(default = "default_harvest_seconds")]
    pub harvest_seconds: f32,
    #[serde(default = "default_respawn_seconds")]
    pub respawn_seconds: f32,
    #[serde(default)]
    pub yields: Vec<ResourceYield>,
    #[serde(default)]
    pub max_harvests: Option<u32>,
}

impl Default for HarvestConfig {
    fn default() -> Self {
        Self {
            display_name: default_display_name(),
            harvest_seconds: default_harvest_seconds(),
            respawn_seconds: default_respawn_seconds(),
            yields: Vec::new(),
            max_harvests: None,
        }
    }
}

impl HarvestConfig {
    pub fn harvest_duration(&self) -> f32 {
        if self.harvest_seconds.is_finite() {
            self.harvest_seconds.max(MIN_HARVEST_SECONDS)
        } else {
            MIN_HARVEST_SECONDS
        }
    }

    pub fn respawn_delay(&self) -> f32 {
        if self.respawn_seconds.is_finite() {
            self.respawn_seconds.max(0.0)
        } else {
            0.0
        }
    }
}

fn default_display_name() -> String {
    "Resource".to_string()
}

fn default_harvest_seconds() -> f32 {
    3.0
}

fn default_respawn_seconds() -> f32 {
    10.0
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum HarvestPhase {
    #[default]
    Available,
    Harvesting,
    CoolingDown,
    Depleted,
}

impl HarvestPhase {
    pub fn run_state(self) -> NodeRunState {
        match self {
            Self::Available => NodeRunState::Inactive,
            Self::Harvesting => NodeRunState::Active,
            Self::CoolingDown => NodeRunState::CoolingDown,
            Self::Depleted => NodeRunState::Completed,
        }
    }

    pub fn from_run_state(state: NodeRunState) -> Self {
        match state {
            NodeRunState::Inactive => Self::Available,
            NodeRunState::Active => Self::Harvesting,
            NodeRunState::CoolingDown => Self::CoolingDown,
            NodeRunState::Completed => Self::Depleted,
        }
    }
}

/// Receives the yields of a finished harvest.
pub trait HarvestAgent {
    fn receive_resources(&self, yields: &[ResourceYield]);
}

impl HarvestAgent for InventoryLedger {
    fn receive_resources(&self, yields: &[ResourceYield]) {
        for item in yields {
            if item.amount > 0 {
                self.add(item.kind, item.amount);
            }
        }
    }
}

/// Harvest timer bound to a persisted [`ResourceNodeState`].
///
/// Phase changes are mirrored onto the bound state with a notifying set so
/// observers persist them. Remaining seconds are written silently every
/// tick and ride along with the next notifying change or forced save.
pub struct HarvestNode {
    config: HarvestConfig,
    state: Rc<ResourceNodeState>,
    phase: HarvestPhase,
    elapsed: f32,
    cooldown_remaining: f32,
    progress: f32,
    harvest_count: u32,
    active_agent: Option<Rc<dyn HarvestAgent>>,
    occupant: Option<Rc<dyn HarvestAgent>>,
    auto_start: bool,
    cancel_when_agent_leaves: bool,
    progress_listeners: Listeners<f32>,
    phase_listeners: Listeners<HarvestPhase>,
}

impl fmt::Debug for HarvestNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HarvestNode")
            .field("node_id", &self.state.id())
            .field("phase", &self.phase)
            .field("progress", &self.progress)
            .field("cooldown_remaining", &self.cooldown_remaining)
            .field("harvest_count", &self.harvest_count)
            .field("has_active_agent", &self.active_agent.is_some())
            .field("has_occupant", &self.occupant.is_some())
            .finish()
    }
}

impl HarvestNode {
    pub fn new(state: Rc<ResourceNodeState>, config: HarvestConfig) -> Self {
        Self {
            config,
            state,
            phase: HarvestPhase::Available,
            elapsed: 0.0,
            cooldown_remaining: 0.0,
            progress: 0.0,
            harvest_count: 0,
            active_agent: None,
            occupant: None,
            auto_start: true,
            cancel_when_agent_leaves: true,
            progress_listeners: Listeners::default(),
            phase_listeners: Listeners::default(),
        }
    }

    pub fn with_auto_start(mut self, auto_start: bool) -> Self {
        self.auto_start = auto_start;
        self
    }

    pub fn with_cancel_when_agent_leaves(mut self, cancel: bool) -> Self {
        self.cancel_when_agent_leaves = cancel;
        self
    }

    pub fn id(&self) -> &str {
        self.state.id()
    }

    pub fn config(&self) -> &HarvestConfig {
        &self.config
    }

    pub fn state(&self) -> &Rc<ResourceNodeState> {
        &self.state
    }

    pub fn phase(&self) -> HarvestPhase {
        self.phase
    }

    pub fn progress(&self) -> f32 {
        self.progress
    }

    pub fn harvest_count(&self) -> u32 {
        self.harvest_count
    }

    pub fn is_available(&self) -> bool {
        self.phase == HarvestPhase::Available
    }

    pub fn subscribe_progress(&self, listener: impl Fn(&f32) + 'static) -> SubscriptionId {
        self.progress_listeners.subscribe(listener)
    }

    pub fn subscribe_phase(&self, listener: impl Fn(&HarvestPhase) + 'static) -> SubscriptionId {
        self.phase_listeners.subscribe(listener)
    }

    pub fn unsubscribe_progress(&self, id: SubscriptionId) -> bool {
        self.progress_listeners.unsubscribe(id)
    }

    pub fn unsubscribe_phase(&self, id: SubscriptionId) -> bool {
        self.phase_listeners.unsubscribe(id)
    }

    pub fn try_begin_harvest(&mut self, agent: Rc<dyn HarvestAgent>) -> bool {
        if self.phase != HarvestPhase::Available {
            return false;
        }

        self.active_agent = Some(agent);
        self.elapsed = 0.0;
        self.set_phase(HarvestPhase::Harvesting);
        self.set_progress(0.0);
        debug!(node_id = self.id(), "harvest_started");
        true
    }

    /// Aborts a running harvest. The node is available again immediately.
    pub fn cancel_harvest(&mut self) -> bool {
        if self.phase != HarvestPhase::Harvesting {
            return false;
        }

        self.active_agent = None;
        self.elapsed = 0.0;
        self.set_phase(HarvestPhase::Available);
        self.set_progress(0.0);
        debug!(node_id = self.id(), "harvest_cancelled");
        true
    }

    pub fn agent_entered(&mut self, agent: Rc<dyn HarvestAgent>) {
        self.occupant = Some(Rc::clone(&agent));
        if self.auto_start {
            self.try_begin_harvest(agent);
        }
    }

    pub fn agent_left(&mut self, agent: &Rc<dyn HarvestAgent>) {
        if self
            .occupant
            .as_ref()
            .is_some_and(|occupant| Rc::ptr_eq(occupant, agent))
        {
            self.occupant = None;
        }

        let is_active = self
            .active_agent
            .as_ref()
            .is_some_and(|active| Rc::ptr_eq(active, agent));
        if self.cancel_when_agent_leaves && is_active {
            self.cancel_harvest();
        }
    }

    pub fn tick(&mut self, dt_seconds: f32) {
        let dt_seconds = if dt_seconds.is_finite() {
            dt_seconds.max(0.0)
        } else {
            0.0
        };

        match self.phase {
            HarvestPhase::Harvesting => {
                let duration = self.config.harvest_duration();
                self.elapsed += dt_seconds;
                if self.elapsed >= duration {
                    self.set_progress(1.0);
                    self.complete_harvest();
                } else {
                    self.set_progress((self.elapsed / duration).clamp(0.0, 1.0));
                    self.state.set_remaining_seconds(duration - self.elapsed, true);
                }
            }
            HarvestPhase::CoolingDown => {
                self.cooldown_remaining -= dt_seconds;
                if self.cooldown_remaining <= 0.0 {
                    self.reset();
                } else {
                    self.state
                        .set_remaining_seconds(self.cooldown_remaining, true);
                }
            }
            HarvestPhase::Available | HarvestPhase::Depleted => {}
        }
    }

    /// Rebuilds the timer from the bound state, typically right after a
    /// save file was applied. A resumed harvest has no agent until one
    /// enters; yields then go to the occupant.
    pub fn resume_from_state(&mut self) {
        let phase = HarvestPhase::from_run_state(self.state.state());
        let remaining = self.state.remaining_seconds();
        self.phase = phase;
        match phase {
            HarvestPhase::Harvesting => {
                let duration = self.config.harvest_duration();
                self.elapsed = (duration - remaining).clamp(0.0, duration);
                self.progress = (self.elapsed / duration).clamp(0.0, 1.0);
            }
            HarvestPhase::CoolingDown => {
                self.cooldown_remaining = remaining.min(self.config.respawn_delay());
                self.progress = 0.0;
            }
            HarvestPhase::Available | HarvestPhase::Depleted => {
                self.elapsed = 0.0;
                self.cooldown_remaining = 0.0;
                self.progress = 0.0;
            }
        }
        debug!(
            node_id = self.id(),
            phase = ?phase,
            remaining_seconds = remaining,
            "harvest_resumed"
        );
    }

    fn complete_harvest(&mut self) {
        let recipient = self.active_agent.take().or_else(|| self.occupant.clone());
        if let Some(agent) = recipient {
            agent.receive_resources(&self.config.yields);
        }
        self.harvest_count = self.harvest_count.saturating_add(1);
        self.elapsed = 0.0;
        debug!(
            node_id = self.id(),
            harvest_count = self.harvest_count,
            "harvest_completed"
        );

        if self
            .config
            .max_harvests
            .is_some_and(|max| self.harvest_count >= max)
        {
            self.set_phase(HarvestPhase::Depleted);
            return;
        }

        self.cooldown_remaining = self.config.respawn_delay();
        self.set_phase(HarvestPhase::CoolingDown);
        if self.cooldown_remaining <= 0.0 {
            self.reset();
        }
    }

    fn reset(&mut self) {
        self.active_agent = None;
        self.cooldown_remaining = 0.0;
        self.set_phase(HarvestPhase::Available);
        self.set_progress(0.0);

        if self.auto_start {
            if let Some(occupant) = self.occupant.clone() {
                self.try_begin_harvest(occupant);
            }
        }
    }

    fn set_phase(&mut self, phase: HarvestPhase) {
        if self.phase == phase {
            return;
        }
        self.phase = phase;
        self.state
            .set_remaining_seconds(self.remaining_for_phase(), true);
        self.state.set_state(phase.run_state(), false);
        self.phase_listeners.emit(&phase);
    }

    fn remaining_for_phase(&self) -> f32 {
        match self.phase {
            HarvestPhase::Harvesting => (self.config.harvest_duration() - self.elapsed).max(0.0),
            HarvestPhase::CoolingDown => self.cooldown_remaining.max(0.0),
            HarvestPhase::Available | HarvestPhase::Depleted => 0.0,
        }
    }

    fn set_progress(&mut self, progress: f32) {
        self.progress = progress;
        self.progress_listeners.emit(&progress);
    }
}

#[cfg(test)]
mod tests {
    use std::cell::{Cell, RefCell};

    use super::*;

    fn wood_config(harvest_seconds: f32, respawn_seconds: f32) -> HarvestConfig {
        HarvestConfig {
            display_name: "Tree".to_string(),
            harvest_seconds,
            respawn_seconds,
            yields: vec![ResourceYield::new(ResourceKind::Wood, 2)],
            max_harvests: None,
        }
    }

    fn node_with(config: HarvestConfig) -> HarvestNode {
        HarvestNode::new(Rc::new(ResourceNodeState::new("tree_1")), config)
    }

    fn as_agent(ledger: &Rc<InventoryLedger>) -> Rc<dyn HarvestAgent> {
        let agent: Rc<dyn HarvestAgent> = ledger.clone();
        agent
    }

    #[test]
    fn config_durations_are_floored() {
        let config = wood_config(0.0, -5.0);
        assert_eq!(config.harvest_duration(), MIN_HARVEST_SECONDS);
        assert_eq!(config.respawn_delay(), 0.0);
    }

    #[test]
    fn completed_harvest_awards_yields_once() {
        let ledger = Rc::new(InventoryLedger::new());
        let mut node = node_with(wood_config(1.0, 5.0));

        assert!(node.try_begin_harvest(as_agent(&ledger)));
        assert!(!node.try_begin_harvest(as_agent(&ledger)));
        node.tick(0.6);
        assert_eq!(ledger.get(ResourceKind::Wood), 0);
        assert!((node.progress() - 0.6).abs() < 1e-5);

        node.tick(0.6);
        node.tick(0.6);

        assert_eq!(ledger.get(ResourceKind::Wood), 2);
        assert_eq!(node.phase(), HarvestPhase::CoolingDown);
        assert_eq!(node.harvest_count(), 1);
    }

    #[test]
    fn phases_are_mirrored_onto_the_bound_state() {
        let ledger = Rc::new(InventoryLedger::new());
        let mut node = node_with(wood_config(1.0, 2.0));
        let notifications = Rc::new(Cell::new(0u32));
        let counter = Rc::clone(&notifications);
        node.state()
            .subscribe(move |_| counter.set(counter.get() + 1));

        node.try_begin_harvest(as_agent(&ledger));
        assert_eq!(node.state().state(), NodeRunState::Active);
        assert!((node.state().remaining_seconds() - 1.0).abs() < 1e-5);

        node.tick(0.25);
        assert!((node.state().remaining_seconds() - 0.75).abs() < 1e-5);
        assert_eq!(notifications.get(), 1);

        node.tick(1.0);
        assert_eq!(node.state().state(), NodeRunState::CoolingDown);
        assert!((node.state().remaining_seconds() - 2.0).abs() < 1e-5);
        assert_eq!(notifications.get(), 2);

        node.tick(2.5);
        assert_eq!(node.state().state(), NodeRunState::Inactive);
        assert_eq!(node.phase(), HarvestPhase::Available);
    }

    #[test]
    fn cancel_resets_progress_without_respawn_delay() {
        let ledger = Rc::new(InventoryLedger::new());
        let mut node = node_with(wood_config(2.0, 30.0));
        let progress = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&progress);
        node.subscribe_progress(move |value| sink.borrow_mut().push(*value));

        node.try_begin_harvest(as_agent(&ledger));
        node.tick(1.0);
        assert!(node.cancel_harvest());
        assert!(!node.cancel_harvest());

        assert_eq!(node.phase(), HarvestPhase::Available);
        assert_eq!(node.progress(), 0.0);
        assert_eq!(progress.borrow().last().copied(), Some(0.0));
        assert_eq!(ledger.get(ResourceKind::Wood), 0);
        assert!(node.try_begin_harvest(as_agent(&ledger)));
    }

    #[test]
    fn leaving_agent_cancels_and_occupant_restarts_after_respawn() {
        let ledger = Rc::new(InventoryLedger::new());
        let agent = as_agent(&ledger);
        let mut node = node_with(wood_config(1.0, 1.0));

        node.agent_entered(Rc::clone(&agent));
        assert_eq!(node.phase(), HarvestPhase::Harvesting);
        node.agent_left(&agent);
        assert_eq!(node.phase(), HarvestPhase::Available);

        node.agent_entered(Rc::clone(&agent));
        node.tick(1.0);
        assert_eq!(node.phase(), HarvestPhase::CoolingDown);
        node.tick(1.0);

        assert_eq!(node.phase(), HarvestPhase::Harvesting);
        assert_eq!(ledger.get(ResourceKind::Wood), 2);
    }

    #[test]
    fn harvest_continues_after_leaving_when_cancel_is_disabled() {
        let ledger = Rc::new(InventoryLedger::new());
        let agent = as_agent(&ledger);
        let mut node = node_with(wood_config(1.0, 5.0)).with_cancel_when_agent_leaves(false);

        node.agent_entered(Rc::clone(&agent));
        node.tick(0.5);
        node.agent_left(&agent);
        assert_eq!(node.phase(), HarvestPhase::Harvesting);

        node.tick(0.5);

        assert_eq!(ledger.get(ResourceKind::Wood), 2);
        assert_eq!(node.phase(), HarvestPhase::CoolingDown);
        node.tick(5.0);
        assert_eq!(node.phase(), HarvestPhase::Available);
    }

    #[test]
    fn zero_respawn_returns_to_available_immediately() {
        let ledger = Rc::new(InventoryLedger::new());
        let mut node = node_with(wood_config(0.5, 0.0)).with_auto_start(false);

        node.try_begin_harvest(as_agent(&ledger));
        node.tick(0.5);

        assert_eq!(node.phase(), HarvestPhase::Available);
        assert_eq!(node.state().state(), NodeRunState::Inactive);
    }

    #[test]
    fn max_harvests_depletes_the_node() {
        let ledger = Rc::new(InventoryLedger::new());
        let mut config = wood_config(0.5, 0.0);
        config.max_harvests = Some(1);
        let mut node = node_with(config);

        node.try_begin_harvest(as_agent(&ledger));
        node.tick(1.0);

        assert_eq!(node.phase(), HarvestPhase::Depleted);
        assert_eq!(node.state().state(), NodeRunState::Completed);
        assert!(!node.try_begin_harvest(as_agent(&ledger)));
        node.tick(10.0);
        assert_eq!(ledger.get(ResourceKind::Wood), 2);
    }

    #[test]
    fn resume_restarts_timers_from_loaded_state() {
        let state = Rc::new(ResourceNodeState::with_state(
            "rock_1",
            NodeRunState::CoolingDown,
            1.5,
        ));
        let mut node = HarvestNode::new(Rc::clone(&state), wood_config(1.0, 4.0));

        node.resume_from_state();
        assert_eq!(node.phase(), HarvestPhase::CoolingDown);
        node.tick(1.0);
        assert_eq!(node.phase(), HarvestPhase::CoolingDown);
        node.tick(0.6);
        assert_eq!(node.phase(), HarvestPhase::Available);
    }

    #[test]
    fn resumed_harvest_pays_the_occupant() {
        let ledger = Rc::new(InventoryLedger::new());
        let state = Rc::new(ResourceNodeState::with_state(
            "tree_2",
            NodeRunState::Active,
            0.25,
        ));
        let mut node = HarvestNode::new(state, wood_config(1.0, 3.0));

        node.resume_from_state();
        assert!((node.progress() - 0.75).abs() < 1e-5);
        node.agent_entered(as_agent(&ledger));
        node.tick(0.3);

        assert_eq!(ledger.get(ResourceKind::Wood), 2);
        assert_eq!(node.phase(), HarvestPhase::CoolingDown);
    }

    #[test]
    fn phase_listener_sees_every_transition() {
        let ledger = Rc::new(InventoryLedger::new());
        let mut node = node_with(wood_config(0.5, 0.5)).with_auto_start(false);
        let phases = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&phases);
        let id = node.subscribe_phase(move |phase| sink.borrow_mut().push(*phase));

        node.try_begin_harvest(as_agent(&ledger));
        node.tick(0.5);
        node.tick(0.5);
        assert!(node.unsubscribe_phase(id));

        assert_eq!(
            *phases.borrow(),
            vec![
                HarvestPhase::Harvesting,
                HarvestPhase::CoolingDown,
                HarvestPhase::Available
            ]
        );
    }
}

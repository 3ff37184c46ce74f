use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::rc::{Rc, Weak};

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::AppPaths;

use super::events::SubscriptionId;
use super::gate::{GateChanged, GateState};
use super::ledger::{InventoryLedger, ResourceChanged};
use super::node::{NodeChanged, ResourceNodeState};
use super::player::PlayerTransform;
use super::snapshot::{GameStateSnapshot, SavedVec3, SnapshotParseError, SAVE_FILE_NAME};
use super::storage::{read_bytes_if_exists, remove_if_exists, write_text_atomic};

thread_local! {
    static ACTIVE_MANAGER: RefCell<Weak<RefCell<ManagerState>>> = RefCell::new(Weak::new());
}

#[derive(Debug, Clone)]
pub struct SaveConfig {
    pub save_path: PathBuf,
    pub auto_discover: bool,
}

impl SaveConfig {
    pub fn new(save_path: impl Into<PathBuf>) -> Self {
        Self {
            save_path: save_path.into(),
            auto_discover: true,
        }
    }

    pub fn from_app_paths(app_paths: &AppPaths) -> Self {
        Self::new(app_paths.cache_dir.join("saves").join(SAVE_FILE_NAME))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManagerPhase {
    Uninitialized,
    Initializing,
    Ready,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Written,
    Suppressed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Missing,
    Applied,
    RecoveredFromCorruption,
    ReadFailed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SaveStats {
    pub writes: u32,
    pub failed_writes: u32,
    pub loads_applied: u32,
    pub corruption_recoveries: u32,
}

#[derive(Debug, Error)]
pub enum SaveError {
    #[error("a save manager is already active on this thread")]
    AlreadyActive,
    #[error("failed to encode game state: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to write save file {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to read save file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to delete save file {path}: {source}")]
    Delete {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Source of participants the manager may adopt on startup when
/// `SaveConfig::auto_discover` is set.
pub trait ParticipantDirectory {
    fn inventory(&self) -> Option<Rc<InventoryLedger>>;
    fn player(&self) -> Option<Rc<PlayerTransform>>;
    fn gates(&self) -> Vec<Rc<GateState>>;
    fn resource_nodes(&self) -> Vec<Rc<ResourceNodeState>>;
}

/// Participants handed to the manager before it starts. Entries that were
/// dropped in the meantime are pruned and duplicates collapse.
#[derive(Debug, Default, Clone)]
pub struct Participants {
    pub inventory: Option<Weak<InventoryLedger>>,
    pub player: Option<Weak<PlayerTransform>>,
    pub gates: Vec<Weak<GateState>>,
    pub resource_nodes: Vec<Weak<ResourceNodeState>>,
}

impl Participants {
    pub fn with_inventory(mut self, inventory: &Rc<InventoryLedger>) -> Self {
        self.inventory = Some(Rc::downgrade(inventory));
        self
    }

    pub fn with_player(mut self, player: &Rc<PlayerTransform>) -> Self {
        self.player = Some(Rc::downgrade(player));
        self
    }

    pub fn with_gate(mut self, gate: &Rc<GateState>) -> Self {
        self.gates.push(Rc::downgrade(gate));
        self
    }

    pub fn with_resource_node(mut self, node: &Rc<ResourceNodeState>) -> Self {
        self.resource_nodes.push(Rc::downgrade(node));
        self
    }
}

/// Holds auto-saves off until dropped. Guards nest.
#[derive(Debug)]
pub struct AutoSaveSuppression {
    depth: Rc<Cell<u32>>,
}

impl Drop for AutoSaveSuppression {
    fn drop(&mut self) {
        self.depth.set(self.depth.get().saturating_sub(1));
    }
}

/// Handle to the save orchestrator. Clones share one manager; at most one
/// manager is live per thread.
#[derive(Debug, Clone)]
pub struct SaveManager {
    state: Rc<RefCell<ManagerState>>,
}

impl SaveManager {
    pub fn start(
        config: SaveConfig,
        participants: Participants,
        directory: Option<&dyn ParticipantDirectory>,
    ) -> Result<Self, SaveError> {
        if Self::active().is_some() {
            warn!(path = %config.save_path.display(), "manager_already_active");
            return Err(SaveError::AlreadyActive);
        }

        let state =
            Rc::new_cyclic(|self_ref| RefCell::new(ManagerState::new(config, self_ref.clone())));
        ACTIVE_MANAGER.with(|slot| *slot.borrow_mut() = Rc::downgrade(&state));
        let manager = Self { state };
        manager.state.borrow_mut().initialize(participants, directory);
        Ok(manager)
    }

    pub fn active() -> Option<Self> {
        ACTIVE_MANAGER
            .with(|slot| slot.borrow().upgrade())
            .map(|state| Self { state })
    }

    /// Detaches every subscription and frees the per-thread slot. Other
    /// handles to this manager stay valid but track nothing.
    pub fn shutdown(self) {
        ACTIVE_MANAGER.with(|slot| {
            let mut slot = slot.borrow_mut();
            if std::ptr::eq(slot.as_ptr(), Rc::as_ptr(&self.state)) {
                *slot = Weak::new();
            }
        });
        let mut state = self.state.borrow_mut();
        state.detach_all();
        state.phase = ManagerPhase::Uninitialized;
        info!(path = %state.config.save_path.display(), "save_manager_shutdown");
    }

    pub fn register_inventory(&self, inventory: &Rc<InventoryLedger>) -> bool {
        self.state.borrow_mut().register_inventory(inventory)
    }

    pub fn unregister_inventory(&self, inventory: &Rc<InventoryLedger>) -> bool {
        self.state.borrow_mut().unregister_inventory(inventory)
    }

    pub fn register_player(&self, player: &Rc<PlayerTransform>) -> bool {
        self.state.borrow_mut().register_player(player)
    }

    pub fn unregister_player(&self, player: &Rc<PlayerTransform>) -> bool {
        self.state.borrow_mut().unregister_player(player)
    }

    pub fn register_gate(&self, gate: &Rc<GateState>) -> bool {
        self.state.borrow_mut().register_gate(gate)
    }

    pub fn unregister_gate(&self, gate: &Rc<GateState>) -> bool {
        self.state.borrow_mut().unregister_gate(gate)
    }

    pub fn register_resource_node(&self, node: &Rc<ResourceNodeState>) -> bool {
        self.state.borrow_mut().register_resource_node(node)
    }

    pub fn unregister_resource_node(&self, node: &Rc<ResourceNodeState>) -> bool {
        self.state.borrow_mut().unregister_resource_node(node)
    }

    pub fn save_game(&self, force: bool) -> SaveOutcome {
        self.state.borrow_mut().save_game(force)
    }

    pub fn load_game(&self) -> LoadOutcome {
        self.state.borrow_mut().load_game()
    }

    pub fn delete_save_data(&self) -> bool {
        self.state.borrow().delete_save_data()
    }

    pub fn on_application_pause(&self, paused: bool) {
        if paused {
            self.save_game(true);
        }
    }

    pub fn on_application_quit(&self) {
        self.save_game(true);
    }

    pub fn suppress_auto_saves(&self) -> AutoSaveSuppression {
        self.state.borrow().suppress()
    }

    pub fn is_auto_save_suppressed(&self) -> bool {
        self.state.borrow().is_suppressed()
    }

    pub fn phase(&self) -> ManagerPhase {
        self.state.borrow().phase
    }

    pub fn save_path(&self) -> PathBuf {
        self.state.borrow().config.save_path.clone()
    }

    pub fn cached_snapshot(&self) -> GameStateSnapshot {
        self.state.borrow().cached.clone()
    }

    /// Fresh aggregate of the registered participants; does not touch the
    /// cache or the file.
    pub fn current_state(&self) -> GameStateSnapshot {
        self.state.borrow().build_current_state()
    }

    pub fn stats(&self) -> SaveStats {
        self.state.borrow().stats
    }

    pub fn gate_count(&self) -> usize {
        self.state.borrow().gates.len()
    }

    pub fn resource_node_count(&self) -> usize {
        self.state.borrow().nodes.len()
    }
}

struct Tracked<T> {
    entity: Weak<T>,
    subscription: SubscriptionId,
}

impl<T> Tracked<T> {
    fn is(&self, other: &Rc<T>) -> bool {
        std::ptr::eq(self.entity.as_ptr(), Rc::as_ptr(other))
    }
}

enum SaveFileRead {
    Missing,
    Corrupt(SnapshotParseError),
    Present(GameStateSnapshot),
}

struct ManagerState {
    config: SaveConfig,
    phase: ManagerPhase,
    suppression: Rc<Cell<u32>>,
    cached: GameStateSnapshot,
    inventory: Option<Tracked<InventoryLedger>>,
    player: Option<Weak<PlayerTransform>>,
    gates: Vec<Tracked<GateState>>,
    nodes: Vec<Tracked<ResourceNodeState>>,
    stats: SaveStats,
    self_ref: Weak<RefCell<ManagerState>>,
}

impl std::fmt::Debug for ManagerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManagerState")
            .field("save_path", &self.config.save_path)
            .field("phase", &self.phase)
            .field("suppression", &self.suppression.get())
            .field("gates", &self.gates.len())
            .field("nodes", &self.nodes.len())
            .field("stats", &self.stats)
            .finish()
    }
}

impl ManagerState {
    fn new(config: SaveConfig, self_ref: Weak<RefCell<ManagerState>>) -> Self {
        Self {
            config,
            phase: ManagerPhase::Uninitialized,
            suppression: Rc::new(Cell::new(0)),
            cached: GameStateSnapshot::default(),
            inventory: None,
            player: None,
            gates: Vec::new(),
            nodes: Vec::new(),
            stats: SaveStats::default(),
            self_ref,
        }
    }

    fn initialize(
        &mut self,
        participants: Participants,
        directory: Option<&dyn ParticipantDirectory>,
    ) {
        self.phase = ManagerPhase::Initializing;
        info!(
            path = %self.config.save_path.display(),
            auto_discover = self.config.auto_discover,
            "save_manager_initializing"
        );

        self.adopt(participants);
        if self.config.auto_discover {
            if let Some(directory) = directory {
                self.discover(directory);
            }
        }

        self.cached = self.build_current_state();
        let outcome = self.load_game();
        self.phase = ManagerPhase::Ready;
        info!(
            gates = self.gates.len(),
            nodes = self.nodes.len(),
            has_inventory = self.live_inventory().is_some(),
            has_player = self.live_player().is_some(),
            load = ?outcome,
            "save_manager_ready"
        );
    }

    fn adopt(&mut self, participants: Participants) {
        let listed = participants.gates.len() + participants.resource_nodes.len();
        let mut adopted = 0usize;

        if let Some(inventory) = participants.inventory.and_then(|weak| weak.upgrade()) {
            self.register_inventory(&inventory);
        }
        if let Some(player) = participants.player.and_then(|weak| weak.upgrade()) {
            self.register_player(&player);
        }
        for gate in participants.gates.iter().filter_map(Weak::upgrade) {
            if self.register_gate(&gate) {
                adopted += 1;
            }
        }
        for node in participants.resource_nodes.iter().filter_map(Weak::upgrade) {
            if self.register_resource_node(&node) {
                adopted += 1;
            }
        }

        if adopted != listed {
            debug!(listed, adopted, "participants_normalized");
        }
    }

    fn discover(&mut self, directory: &dyn ParticipantDirectory) {
        if self.live_inventory().is_none() {
            if let Some(inventory) = directory.inventory() {
                self.register_inventory(&inventory);
            }
        }
        if self.live_player().is_none() {
            if let Some(player) = directory.player() {
                self.register_player(&player);
            }
        }
        for gate in directory.gates() {
            self.register_gate(&gate);
        }
        for node in directory.resource_nodes() {
            self.register_resource_node(&node);
        }
    }

    fn auto_save_listener<E: 'static>(&self) -> impl Fn(&E) + 'static {
        let manager = self.self_ref.clone();
        move |_: &E| {
            let Some(manager) = manager.upgrade() else {
                return;
            };
            let Ok(mut state) = manager.try_borrow_mut() else {
                debug!("auto_save_skipped_reentrant");
                return;
            };
            state.request_auto_save();
        }
    }

    fn register_inventory(&mut self, inventory: &Rc<InventoryLedger>) -> bool {
        if self
            .inventory
            .as_ref()
            .is_some_and(|tracked| tracked.is(inventory))
        {
            return false;
        }

        if let Some(previous) = self.inventory.take() {
            if let Some(ledger) = previous.entity.upgrade() {
                ledger.unsubscribe(previous.subscription);
            }
        }

        if self.phase == ManagerPhase::Ready {
            inventory.restore(&self.cached.inventory_quantities(), true);
        }
        let subscription = inventory.subscribe(self.auto_save_listener::<ResourceChanged>());
        self.inventory = Some(Tracked {
            entity: Rc::downgrade(inventory),
            subscription,
        });
        true
    }

    fn unregister_inventory(&mut self, inventory: &Rc<InventoryLedger>) -> bool {
        match self.inventory.take() {
            Some(tracked) if tracked.is(inventory) => {
                inventory.unsubscribe(tracked.subscription);
                true
            }
            other => {
                self.inventory = other;
                false
            }
        }
    }

    fn register_player(&mut self, player: &Rc<PlayerTransform>) -> bool {
        if self
            .player
            .as_ref()
            .is_some_and(|current| std::ptr::eq(current.as_ptr(), Rc::as_ptr(player)))
        {
            return false;
        }

        self.player = Some(Rc::downgrade(player));
        if self.phase == ManagerPhase::Ready {
            self.apply_cached_player_position();
        }
        true
    }

    fn unregister_player(&mut self, player: &Rc<PlayerTransform>) -> bool {
        let matches = self
            .player
            .as_ref()
            .is_some_and(|current| std::ptr::eq(current.as_ptr(), Rc::as_ptr(player)));
        if matches {
            self.player = None;
        }
        matches
    }

    fn register_gate(&mut self, gate: &Rc<GateState>) -> bool {
        if self.gates.iter().any(|tracked| tracked.is(gate)) {
            return false;
        }

        if self.phase == ManagerPhase::Ready {
            self.apply_cached_state_to_gate(gate);
        }
        let subscription = gate.subscribe(self.auto_save_listener::<GateChanged>());
        self.gates.push(Tracked {
            entity: Rc::downgrade(gate),
            subscription,
        });
        true
    }

    fn unregister_gate(&mut self, gate: &Rc<GateState>) -> bool {
        let Some(index) = self.gates.iter().position(|tracked| tracked.is(gate)) else {
            return false;
        };
        let tracked = self.gates.remove(index);
        gate.unsubscribe(tracked.subscription);
        true
    }

    fn register_resource_node(&mut self, node: &Rc<ResourceNodeState>) -> bool {
        if self.nodes.iter().any(|tracked| tracked.is(node)) {
            return false;
        }

        if self.phase == ManagerPhase::Ready {
            self.apply_cached_state_to_node(node);
        }
        let subscription = node.subscribe(self.auto_save_listener::<NodeChanged>());
        self.nodes.push(Tracked {
            entity: Rc::downgrade(node),
            subscription,
        });
        true
    }

    fn unregister_resource_node(&mut self, node: &Rc<ResourceNodeState>) -> bool {
        let Some(index) = self.nodes.iter().position(|tracked| tracked.is(node)) else {
            return false;
        };
        let tracked = self.nodes.remove(index);
        node.unsubscribe(tracked.subscription);
        true
    }

    fn detach_all(&mut self) {
        if let Some(tracked) = self.inventory.take() {
            if let Some(ledger) = tracked.entity.upgrade() {
                ledger.unsubscribe(tracked.subscription);
            }
        }
        for tracked in self.gates.drain(..) {
            if let Some(gate) = tracked.entity.upgrade() {
                gate.unsubscribe(tracked.subscription);
            }
        }
        for tracked in self.nodes.drain(..) {
            if let Some(node) = tracked.entity.upgrade() {
                node.unsubscribe(tracked.subscription);
            }
        }
        self.player = None;
    }

    fn live_inventory(&self) -> Option<Rc<InventoryLedger>> {
        self.inventory
            .as_ref()
            .and_then(|tracked| tracked.entity.upgrade())
    }

    fn live_player(&self) -> Option<Rc<PlayerTransform>> {
        self.player.as_ref().and_then(Weak::upgrade)
    }

    fn live_gates(&self) -> impl Iterator<Item = Rc<GateState>> + '_ {
        self.gates
            .iter()
            .filter_map(|tracked| tracked.entity.upgrade())
    }

    fn live_nodes(&self) -> impl Iterator<Item = Rc<ResourceNodeState>> + '_ {
        self.nodes
            .iter()
            .filter_map(|tracked| tracked.entity.upgrade())
    }

    fn suppress(&self) -> AutoSaveSuppression {
        let depth = Rc::clone(&self.suppression);
        depth.set(depth.get().saturating_add(1));
        AutoSaveSuppression { depth }
    }

    fn is_suppressed(&self) -> bool {
        self.suppression.get() > 0
    }

    fn build_current_state(&self) -> GameStateSnapshot {
        let inventory = self
            .live_inventory()
            .map(|ledger| GameStateSnapshot::inventory_from_capture(&ledger.capture()))
            .unwrap_or_default();

        let mut seen_gate_ids = HashSet::new();
        let mut unlocked_gate_ids = Vec::new();
        for gate in self.live_gates() {
            if !gate.is_tracked() || !gate.is_unlocked() {
                continue;
            }
            if seen_gate_ids.insert(gate.id().to_string()) {
                unlocked_gate_ids.push(gate.id().to_string());
            }
        }

        let mut seen_node_ids = HashSet::new();
        let mut nodes = Vec::new();
        for node in self.live_nodes() {
            if !node.is_tracked() || !seen_node_ids.insert(node.id().to_string()) {
                continue;
            }
            nodes.push(node.to_record());
        }

        let player_position = self
            .live_player()
            .map(|player| SavedVec3::from_vec3(player.position()))
            .unwrap_or_default();

        GameStateSnapshot {
            inventory,
            unlocked_gate_ids,
            nodes,
            player_position,
        }
    }

    fn request_auto_save(&mut self) {
        if !self.is_suppressed() {
            self.save_game(false);
        }
    }

    fn save_game(&mut self, force: bool) -> SaveOutcome {
        if !force && self.is_suppressed() {
            debug!("auto_save_suppressed");
            return SaveOutcome::Suppressed;
        }

        let snapshot = self.build_current_state();
        self.cached = snapshot.clone();

        match write_snapshot(&self.config.save_path, &snapshot) {
            Ok(()) => {
                self.stats.writes += 1;
                debug!(
                    path = %self.config.save_path.display(),
                    force,
                    gates = snapshot.unlocked_gate_ids.len(),
                    nodes = snapshot.nodes.len(),
                    "save_written"
                );
                SaveOutcome::Written
            }
            Err(error) => {
                self.stats.failed_writes += 1;
                error!(error = %error, "save_failed");
                SaveOutcome::Failed
            }
        }
    }

    fn load_game(&mut self) -> LoadOutcome {
        match read_save_file(&self.config.save_path) {
            Ok(SaveFileRead::Missing) => {
                debug!(path = %self.config.save_path.display(), "save_missing");
                LoadOutcome::Missing
            }
            Ok(SaveFileRead::Corrupt(reason)) => {
                warn!(
                    path = %self.config.save_path.display(),
                    error = %reason,
                    "save_corrupt"
                );
                self.stats.corruption_recoveries += 1;
                let outcome = self.save_game(true);
                info!(rewrite = ?outcome, "save_corrupt_recovered");
                LoadOutcome::RecoveredFromCorruption
            }
            Ok(SaveFileRead::Present(snapshot)) => {
                self.apply_state(snapshot);
                self.stats.loads_applied += 1;
                info!(
                    path = %self.config.save_path.display(),
                    gates = self.cached.unlocked_gate_ids.len(),
                    nodes = self.cached.nodes.len(),
                    "load_applied"
                );
                LoadOutcome::Applied
            }
            Err(error) => {
                warn!(error = %error, "load_failed");
                LoadOutcome::ReadFailed
            }
        }
    }

    fn apply_state(&mut self, snapshot: GameStateSnapshot) {
        self.cached = snapshot;
        let _suppressed = self.suppress();

        if let Some(ledger) = self.live_inventory() {
            ledger.restore(&self.cached.inventory_quantities(), true);
        }

        let unlocked = self.cached.unlocked_gate_set();
        for gate in self.live_gates() {
            if gate.is_tracked() {
                gate.set_unlocked(unlocked.contains(gate.id()), true);
            }
        }

        for node in self.live_nodes() {
            if let Some(record) = self.cached.find_node(node.id()) {
                node.apply_snapshot(record, true);
            }
        }

        self.apply_cached_player_position();
    }

    fn apply_cached_state_to_gate(&self, gate: &GateState) {
        if !gate.is_tracked() {
            return;
        }
        gate.set_unlocked(self.cached.is_gate_unlocked(gate.id()), true);
    }

    fn apply_cached_state_to_node(&self, node: &ResourceNodeState) {
        if let Some(record) = self.cached.find_node(node.id()) {
            node.apply_snapshot(record, true);
        }
    }

    fn apply_cached_player_position(&self) {
        if let Some(player) = self.live_player() {
            player.teleport_to(self.cached.player_position.to_vec3());
        }
    }

    fn delete_save_data(&self) -> bool {
        let path = &self.config.save_path;
        match remove_if_exists(path) {
            Ok(removed) => {
                if removed {
                    info!(path = %path.display(), "save_deleted");
                }
                removed
            }
            Err(source) => {
                let error = SaveError::Delete {
                    path: path.clone(),
                    source,
                };
                warn!(error = %error, "save_delete_failed");
                false
            }
        }
    }
}

impl Drop for ManagerState {
    fn drop(&mut self) {
        self.detach_all();
    }
}

fn write_snapshot(path: &Path, snapshot: &GameStateSnapshot) -> Result<(), SaveError> {
    let json = snapshot.to_json_pretty().map_err(SaveError::Encode)?;
    write_text_atomic(path, &json).map_err(|source| SaveError::Write {
        path: path.to_path_buf(),
        source,
    })
}

fn read_save_file(path: &Path) -> Result<SaveFileRead, SaveError> {
    let raw = read_bytes_if_exists(path).map_err(|source| SaveError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let Some(raw) = raw else {
        return Ok(SaveFileRead::Missing);
    };
    match GameStateSnapshot::parse_bytes(&raw) {
        Ok(snapshot) => Ok(SaveFileRead::Present(snapshot)),
        Err(reason) => Ok(SaveFileRead::Corrupt(reason)),
    }
}

use std::rc::Rc;

use tracing::debug;

use crate::state::{
    GateState, InventoryLedger, ParticipantDirectory, PlayerTransform, ResourceNodeState,
    SaveManager, Vec3,
};

use super::harvest::{HarvestConfig, HarvestNode};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SceneCommand {
    None,
    Quit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

#[derive(Debug, Default)]
struct EntityIdAllocator {
    next: u64,
}

impl EntityIdAllocator {
    fn allocate(&mut self) -> EntityId {
        let id = EntityId(self.next);
        self.next = self.next.saturating_add(1);
        id
    }
}

/// A spawned entity and where it sits in the scene.
#[derive(Debug)]
pub struct Placed<T> {
    pub id: EntityId,
    pub position: Vec3,
    pub entity: T,
}

/// Owns the live participants of a scene. Spawning and despawning keep an
/// attached [`SaveManager`] registration in step.
#[derive(Debug, Default)]
pub struct SceneWorld {
    allocator: EntityIdAllocator,
    inventory: Option<Rc<InventoryLedger>>,
    player: Option<Rc<PlayerTransform>>,
    gates: Vec<Placed<Rc<GateState>>>,
    resource_nodes: Vec<Placed<Rc<ResourceNodeState>>>,
    harvest_nodes: Vec<Placed<HarvestNode>>,
    save_manager: Option<SaveManager>,
}

impl SceneWorld {
    pub fn spawn_inventory(&mut self, ledger: InventoryLedger) -> Rc<InventoryLedger> {
        let ledger = Rc::new(ledger);
        if let Some(previous) = self.inventory.replace(Rc::clone(&ledger)) {
            if let Some(manager) = &self.save_manager {
                manager.unregister_inventory(&previous);
            }
        }
        if let Some(manager) = &self.save_manager {
            manager.register_inventory(&ledger);
        }
        ledger
    }

    pub fn spawn_player(&mut self, player: PlayerTransform) -> Rc<PlayerTransform> {
        let player = Rc::new(player);
        if let Some(previous) = self.player.replace(Rc::clone(&player)) {
            if let Some(manager) = &self.save_manager {
                manager.unregister_player(&previous);
            }
        }
        if let Some(manager) = &self.save_manager {
            manager.register_player(&player);
        }
        player
    }

    pub fn spawn_gate(&mut self, gate: GateState, position: Vec3) -> EntityId {
        let id = self.allocator.allocate();
        let gate = Rc::new(gate);
        if let Some(manager) = &self.save_manager {
            manager.register_gate(&gate);
        }
        self.gates.push(Placed {
            id,
            position,
            entity: gate,
        });
        id
    }

    pub fn spawn_resource_node(&mut self, node: ResourceNodeState, position: Vec3) -> EntityId {
        let id = self.allocator.allocate();
        let node = Rc::new(node);
        if let Some(manager) = &self.save_manager {
            manager.register_resource_node(&node);
        }
        self.resource_nodes.push(Placed {
            id,
            position,
            entity: node,
        });
        id
    }

    /// Spawns a harvest timer together with the persisted state it drives.
    pub fn spawn_harvest_node(
        &mut self,
        node_id: impl Into<String>,
        config: HarvestConfig,
        position: Vec3,
    ) -> EntityId {
        let id = self.allocator.allocate();
        let state = Rc::new(ResourceNodeState::new(node_id));
        if let Some(manager) = &self.save_manager {
            manager.register_resource_node(&state);
        }
        self.harvest_nodes.push(Placed {
            id,
            position,
            entity: HarvestNode::new(state, config),
        });
        id
    }

    pub fn despawn(&mut self, id: EntityId) -> bool {
        if let Some(index) = self.gates.iter().position(|placed| placed.id == id) {
            let placed = self.gates.remove(index);
            if let Some(manager) = &self.save_manager {
                manager.unregister_gate(&placed.entity);
            }
            debug!(entity_id = id.0, gate_id = placed.entity.id(), "gate_despawned");
            return true;
        }
        if let Some(index) = self.resource_nodes.iter().position(|placed| placed.id == id) {
            let placed = self.resource_nodes.remove(index);
            if let Some(manager) = &self.save_manager {
                manager.unregister_resource_node(&placed.entity);
            }
            return true;
        }
        if let Some(index) = self.harvest_nodes.iter().position(|placed| placed.id == id) {
            let placed = self.harvest_nodes.remove(index);
            if let Some(manager) = &self.save_manager {
                manager.unregister_resource_node(placed.entity.state());
            }
            return true;
        }
        false
    }

    /// Registers every current participant with `manager`; later spawns and
    /// despawns follow automatically.
    pub fn attach_save_manager(&mut self, manager: SaveManager) {
        if let Some(inventory) = &self.inventory {
            manager.register_inventory(inventory);
        }
        if let Some(player) = &self.player {
            manager.register_player(player);
        }
        for placed in &self.gates {
            manager.register_gate(&placed.entity);
        }
        for placed in &self.resource_nodes {
            manager.register_resource_node(&placed.entity);
        }
        for placed in &self.harvest_nodes {
            manager.register_resource_node(placed.entity.state());
        }
        self.save_manager = Some(manager);
    }

    pub fn detach_save_manager(&mut self) -> Option<SaveManager> {
        self.save_manager.take()
    }

    pub fn save_manager(&self) -> Option<&SaveManager> {
        self.save_manager.as_ref()
    }

    pub fn tick(&mut self, fixed_dt_seconds: f32) {
        for placed in &mut self.harvest_nodes {
            placed.entity.tick(fixed_dt_seconds);
        }
    }

    pub fn resume_harvest_nodes(&mut self) {
        for placed in &mut self.harvest_nodes {
            placed.entity.resume_from_state();
        }
    }

    pub fn clear(&mut self) {
        let ids: Vec<EntityId> = self
            .gates
            .iter()
            .map(|placed| placed.id)
            .chain(self.resource_nodes.iter().map(|placed| placed.id))
            .chain(self.harvest_nodes.iter().map(|placed| placed.id))
            .collect();
        for id in ids {
            self.despawn(id);
        }
        if let Some(manager) = &self.save_manager {
            if let Some(inventory) = &self.inventory {
                manager.unregister_inventory(inventory);
            }
            if let Some(player) = &self.player {
                manager.unregister_player(player);
            }
        }
        self.inventory = None;
        self.player = None;
    }

    pub fn inventory(&self) -> Option<&Rc<InventoryLedger>> {
        self.inventory.as_ref()
    }

    pub fn player(&self) -> Option<&Rc<PlayerTransform>> {
        self.player.as_ref()
    }

    pub fn gates(&self) -> &[Placed<Rc<GateState>>] {
        &self.gates
    }

    pub fn gate(&self, id: EntityId) -> Option<&Rc<GateState>> {
        self.gates
            .iter()
            .find(|placed| placed.id == id)
            .map(|placed| &placed.entity)
    }

    pub fn resource_nodes(&self) -> &[Placed<Rc<ResourceNodeState>>] {
        &self.resource_nodes
    }

    pub fn harvest_nodes(&self) -> &[Placed<HarvestNode>] {
        &self.harvest_nodes
    }

    pub fn harvest_node(&self, id: EntityId) -> Option<&HarvestNode> {
        self.harvest_nodes
            .iter()
            .find(|placed| placed.id == id)
            .map(|placed| &placed.entity)
    }

    pub fn harvest_node_mut(&mut self, id: EntityId) -> Option<&mut HarvestNode> {
        self.harvest_nodes
            .iter_mut()
            .find(|placed| placed.id == id)
            .map(|placed| &mut placed.entity)
    }

    pub fn position_of(&self, id: EntityId) -> Option<Vec3> {
        self.gates
            .iter()
            .find(|placed| placed.id == id)
            .map(|placed| placed.position)
            .or_else(|| {
                self.resource_nodes
                    .iter()
                    .find(|placed| placed.id == id)
                    .map(|placed| placed.position)
            })
            .or_else(|| {
                self.harvest_nodes
                    .iter()
                    .find(|placed| placed.id == id)
                    .map(|placed| placed.position)
            })
    }

    pub fn entity_count(&self) -> usize {
        self.gates.len() + self.resource_nodes.len() + self.harvest_nodes.len()
    }
}

impl ParticipantDirectory for SceneWorld {
    fn inventory(&self) -> Option<Rc<InventoryLedger>> {
        self.inventory.clone()
    }

    fn player(&self) -> Option<Rc<PlayerTransform>> {
        self.player.clone()
    }

    fn gates(&self) -> Vec<Rc<GateState>> {
        self.gates
            .iter()
            .map(|placed| Rc::clone(&placed.entity))
            .collect()
    }

    fn resource_nodes(&self) -> Vec<Rc<ResourceNodeState>> {
        self.resource_nodes
            .iter()
            .map(|placed| Rc::clone(&placed.entity))
            .chain(
                self.harvest_nodes
                    .iter()
                    .map(|placed| Rc::clone(placed.entity.state())),
            )
            .collect()
    }
}

pub trait Scene {
    fn load(&mut self, world: &mut SceneWorld);
    fn update(&mut self, fixed_dt_seconds: f32, world: &mut SceneWorld) -> SceneCommand;
    fn unload(&mut self, _world: &mut SceneWorld) {}
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::app::harvest::{HarvestAgent, HarvestPhase, ResourceYield};
    use crate::state::{Participants, ResourceKind, SaveConfig, SAVE_FILE_NAME};

    fn start_manager(temp: &TempDir, world: &SceneWorld) -> SaveManager {
        let config = SaveConfig::new(temp.path().join(SAVE_FILE_NAME));
        SaveManager::start(config, Participants::default(), Some(world)).expect("start manager")
    }

    fn quick_config() -> HarvestConfig {
        HarvestConfig {
            harvest_seconds: 0.5,
            respawn_seconds: 1.0,
            yields: vec![ResourceYield::new(ResourceKind::Stone, 1)],
            ..HarvestConfig::default()
        }
    }

    #[test]
    fn entity_ids_are_unique_and_despawn_removes_once() {
        let mut world = SceneWorld::default();
        let gate = world.spawn_gate(GateState::new("G1", false), Vec3::ZERO);
        let node = world.spawn_harvest_node("N1", quick_config(), Vec3::new(1.0, 0.0, 0.0));

        assert_ne!(gate, node);
        assert_eq!(world.entity_count(), 2);
        assert_eq!(world.position_of(node), Some(Vec3::new(1.0, 0.0, 0.0)));
        assert!(world.despawn(gate));
        assert!(!world.despawn(gate));
        assert_eq!(world.entity_count(), 1);
    }

    #[test]
    fn directory_lists_plain_and_harvest_node_states() {
        let mut world = SceneWorld::default();
        world.spawn_inventory(InventoryLedger::new());
        world.spawn_resource_node(ResourceNodeState::new("plain"), Vec3::ZERO);
        world.spawn_harvest_node("timed", quick_config(), Vec3::ZERO);

        let ids: Vec<String> = ParticipantDirectory::resource_nodes(&world)
            .iter()
            .map(|node| node.id().to_string())
            .collect();

        assert_eq!(ids, vec!["plain".to_string(), "timed".to_string()]);
        assert!(ParticipantDirectory::inventory(&world).is_some());
        assert!(ParticipantDirectory::player(&world).is_none());
    }

    #[test]
    fn spawns_after_attach_follow_the_manager() {
        let temp = TempDir::new().expect("tempdir");
        let mut world = SceneWorld::default();
        world.spawn_gate(GateState::new("G1", false), Vec3::ZERO);
        let manager = start_manager(&temp, &world);
        world.attach_save_manager(manager.clone());
        assert_eq!(manager.gate_count(), 1);

        let late = world.spawn_gate(GateState::new("G2", false), Vec3::ZERO);
        let node = world.spawn_harvest_node("N1", quick_config(), Vec3::ZERO);
        assert_eq!(manager.gate_count(), 2);
        assert_eq!(manager.resource_node_count(), 1);

        world.despawn(late);
        world.despawn(node);
        assert_eq!(manager.gate_count(), 1);
        assert_eq!(manager.resource_node_count(), 0);

        world.clear();
        assert_eq!(manager.gate_count(), 0);
        assert_eq!(world.entity_count(), 0);
    }

    #[test]
    fn replacing_inventory_moves_the_registration() {
        let temp = TempDir::new().expect("tempdir");
        let mut world = SceneWorld::default();
        let first = world.spawn_inventory(InventoryLedger::new());
        let manager = start_manager(&temp, &world);
        world.attach_save_manager(manager.clone());

        let second = world.spawn_inventory(InventoryLedger::new());
        first.add(ResourceKind::Wood, 1);
        assert_eq!(manager.stats().writes, 0);
        second.add(ResourceKind::Wood, 1);
        assert_eq!(manager.stats().writes, 1);
    }

    #[test]
    fn tick_drives_harvest_nodes() {
        let mut world = SceneWorld::default();
        let ledger = world.spawn_inventory(InventoryLedger::new());
        let node = world.spawn_harvest_node("N1", quick_config(), Vec3::ZERO);
        let agent: Rc<dyn HarvestAgent> = ledger.clone();

        let harvest = world.harvest_node_mut(node).expect("harvest node");
        assert!(harvest.try_begin_harvest(agent));
        world.tick(0.25);
        world.tick(0.25);

        assert_eq!(ledger.get(ResourceKind::Stone), 1);
        let harvest = world.harvest_node(node).expect("harvest node");
        assert_eq!(harvest.phase(), HarvestPhase::CoolingDown);
    }
}

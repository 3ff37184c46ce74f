use std::collections::BTreeMap;
use std::rc::Rc;

use engine::{
    EntityId, GateState, HarvestAgent, HarvestPhase, InventoryLedger, PlayerTransform,
    ResourceKind, ResourceYield, SaveManager, Scene, SceneCommand, SceneWorld,
};
use tracing::{debug, info};

mod layout;

pub(crate) use layout::{load_layout, IslandLayout, LayoutError, LAYOUT_FILE_NAME};

struct GateSlot {
    gate: Rc<GateState>,
    cost: BTreeMap<ResourceKind, i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Intent {
    Idle,
    WalkingTo(EntityId),
    Harvesting {
        node: EntityId,
        harvests_before: u32,
    },
}

/// Autopilot over the island: walk to the closest node that yields
/// something a locked gate still needs, harvest it once, and unlock gates as
/// soon as the ledger covers their cost.
pub(crate) struct IslandScene {
    layout: IslandLayout,
    ledger: Option<Rc<InventoryLedger>>,
    player: Option<Rc<PlayerTransform>>,
    agent: Option<Rc<dyn HarvestAgent>>,
    gates: Vec<GateSlot>,
    nodes: Vec<EntityId>,
    intent: Intent,
    harvests_collected: u32,
}

impl IslandScene {
    pub(crate) fn new(layout: IslandLayout) -> Self {
        Self {
            layout,
            ledger: None,
            player: None,
            agent: None,
            gates: Vec::new(),
            nodes: Vec::new(),
            intent: Intent::Idle,
            harvests_collected: 0,
        }
    }

    fn try_unlock_gates(&self, world: &SceneWorld) {
        let Some(ledger) = &self.ledger else {
            return;
        };

        for slot in &self.gates {
            if slot.gate.is_unlocked() || !can_afford(ledger, &slot.cost) {
                continue;
            }

            let suppression = world.save_manager().map(SaveManager::suppress_auto_saves);
            for (kind, amount) in &slot.cost {
                ledger.try_spend(*kind, *amount);
            }
            slot.gate.unlock();
            drop(suppression);

            if let Some(manager) = world.save_manager() {
                manager.save_game(false);
            }
            info!(gate_id = slot.gate.id(), "gate_unlocked");
        }
    }

    fn advance(&mut self, fixed_dt_seconds: f32, world: &mut SceneWorld) {
        match self.intent {
            Intent::Idle => {
                if let Some(node) = self.pick_target(world) {
                    debug!(entity_id = node.0, "walking_to_node");
                    self.intent = Intent::WalkingTo(node);
                }
            }
            Intent::WalkingTo(node) => self.walk_towards(node, fixed_dt_seconds, world),
            Intent::Harvesting {
                node,
                harvests_before,
            } => self.watch_harvest(node, harvests_before, world),
        }
    }

    fn walk_towards(&mut self, node: EntityId, fixed_dt_seconds: f32, world: &mut SceneWorld) {
        let (Some(player), Some(target)) = (&self.player, world.position_of(node)) else {
            self.intent = Intent::Idle;
            return;
        };

        let step = self.layout.player.move_speed.max(0.0) * fixed_dt_seconds;
        let next = player.position().move_towards(target, step);
        player.teleport_to(next);
        if next.distance(target) > self.layout.player.interaction_radius {
            return;
        }

        let (Some(agent), Some(harvest)) = (self.agent.clone(), world.harvest_node_mut(node))
        else {
            self.intent = Intent::Idle;
            return;
        };
        let harvests_before = harvest.harvest_count();
        harvest.agent_entered(agent);
        debug!(node_id = harvest.id(), phase = ?harvest.phase(), "arrived_at_node");
        self.intent = Intent::Harvesting {
            node,
            harvests_before,
        };
    }

    fn watch_harvest(&mut self, node: EntityId, harvests_before: u32, world: &mut SceneWorld) {
        let Some(harvest) = world.harvest_node_mut(node) else {
            self.intent = Intent::Idle;
            return;
        };

        let finished = harvest.harvest_count() > harvests_before;
        let unavailable = matches!(
            harvest.phase(),
            HarvestPhase::CoolingDown | HarvestPhase::Depleted
        );
        if !finished && !unavailable {
            return;
        }

        if let Some(agent) = &self.agent {
            harvest.agent_left(agent);
        }
        if finished {
            self.harvests_collected += 1;
            debug!(
                node_id = harvest.id(),
                harvests_collected = self.harvests_collected,
                "harvest_collected"
            );
        }
        self.intent = Intent::Idle;
    }

    fn pick_target(&self, world: &SceneWorld) -> Option<EntityId> {
        let ledger = self.ledger.as_ref()?;
        let player = self.player.as_ref()?;
        let needed = self.needed_kinds(ledger);
        if needed.is_empty() {
            return None;
        }

        let origin = player.position();
        world
            .harvest_nodes()
            .iter()
            .filter(|placed| self.nodes.contains(&placed.id))
            .filter(|placed| {
                matches!(
                    placed.entity.phase(),
                    HarvestPhase::Available | HarvestPhase::Harvesting
                )
            })
            .filter(|placed| {
                placed
                    .entity
                    .config()
                    .yields
                    .iter()
                    .any(|item| item.amount > 0 && needed.contains(&item.kind))
            })
            .min_by(|a, b| {
                origin
                    .distance(a.position)
                    .total_cmp(&origin.distance(b.position))
            })
            .map(|placed| placed.id)
    }

    /// Resource kinds still short for the first locked gate.
    fn needed_kinds(&self, ledger: &InventoryLedger) -> Vec<ResourceKind> {
        self.gates
            .iter()
            .find(|slot| !slot.gate.is_unlocked())
            .map(|slot| {
                slot.cost
                    .iter()
                    .filter(|(kind, amount)| ledger.get(**kind) < **amount)
                    .map(|(kind, _)| *kind)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn harvests_collected(&self) -> u32 {
        self.harvests_collected
    }
}

impl Scene for IslandScene {
    fn load(&mut self, world: &mut SceneWorld) {
        let ledger = world.spawn_inventory(InventoryLedger::with_quantities(
            self.layout
                .starting_inventory
                .iter()
                .map(|item| (item.kind, item.amount)),
        ));
        let player = world.spawn_player(PlayerTransform::new(
            self.layout.player.spawn.to_vec3(),
        ));

        self.gates.clear();
        for gate in &self.layout.gates {
            let entity = world.spawn_gate(
                GateState::new(gate.id.clone(), false),
                gate.position.to_vec3(),
            );
            if let Some(state) = world.gate(entity) {
                self.gates.push(GateSlot {
                    gate: Rc::clone(state),
                    cost: total_cost(&gate.unlock_cost),
                });
            }
        }

        self.nodes = self
            .layout
            .resource_nodes
            .iter()
            .map(|node| {
                world.spawn_harvest_node(
                    node.id.clone(),
                    node.harvest.clone(),
                    node.position.to_vec3(),
                )
            })
            .collect();

        let agent: Rc<dyn HarvestAgent> = ledger.clone();
        self.agent = Some(agent);
        self.ledger = Some(ledger);
        self.player = Some(player);
        self.intent = Intent::Idle;
        info!(
            gates = self.gates.len(),
            resource_nodes = self.nodes.len(),
            "island_loaded"
        );
    }

    fn update(&mut self, fixed_dt_seconds: f32, world: &mut SceneWorld) -> SceneCommand {
        self.advance(fixed_dt_seconds, world);
        self.try_unlock_gates(world);
        if self.gates.iter().all(|slot| slot.gate.is_unlocked()) {
            info!(
                gates = self.gates.len(),
                harvests_collected = self.harvests_collected,
                "all_gates_unlocked"
            );
            return SceneCommand::Quit;
        }
        SceneCommand::None
    }
}

fn total_cost(items: &[ResourceYield]) -> BTreeMap<ResourceKind, i32> {
    let mut cost = BTreeMap::new();
    for item in items.iter().filter(|item| item.amount > 0) {
        let entry = cost.entry(item.kind).or_insert(0i32);
        *entry = entry.saturating_add(item.amount);
    }
    cost
}

fn can_afford(ledger: &InventoryLedger, cost: &BTreeMap<ResourceKind, i32>) -> bool {
    cost.iter().all(|(kind, amount)| ledger.get(*kind) >= *amount)
}

#[cfg(test)]
mod tests;

use std::path::Path;

use engine::{run_session, LoopConfig, SaveConfig, SessionEnd, SAVE_FILE_NAME};
use tempfile::TempDir;

use super::layout::{default_layout, parse_layout};
use super::*;

fn session_config(max_ticks: u64) -> LoopConfig {
    LoopConfig {
        target_tps: 30,
        max_ticks: Some(max_ticks),
        ..LoopConfig::default()
    }
}

fn tiny_layout() -> IslandLayout {
    parse_layout(
        Path::new("tiny.json"),
        r#"{
            "player": {"spawn": {"x": 0.0, "y": 0.0, "z": 0.0}, "move_speed": 5.0},
            "gates": [{"id": "gate_a", "unlock_cost": [{"kind": "wood", "amount": 2}]}],
            "resource_nodes": [
                {"id": "far_tree", "position": {"x": 9.0, "y": 0.0, "z": 0.0},
                 "harvest": {"harvest_seconds": 1.0, "respawn_seconds": 2.0,
                             "yields": [{"kind": "wood", "amount": 2}]}},
                {"id": "near_tree", "position": {"x": 3.0, "y": 0.0, "z": 0.0},
                 "harvest": {"harvest_seconds": 1.0, "respawn_seconds": 2.0,
                             "yields": [{"kind": "wood", "amount": 2}]}},
                {"id": "rock", "position": {"x": 1.0, "y": 0.0, "z": 0.0},
                 "harvest": {"harvest_seconds": 1.0, "respawn_seconds": 2.0,
                             "yields": [{"kind": "stone", "amount": 1}]}}
            ]
        }"#,
    )
    .expect("tiny layout")
}

#[test]
fn load_spawns_every_layout_entry() {
    let mut scene = IslandScene::new(default_layout());
    let mut world = SceneWorld::default();

    scene.load(&mut world);

    assert_eq!(world.gates().len(), 2);
    assert_eq!(world.harvest_nodes().len(), 4);
    assert!(world.inventory().is_some());
    assert!(world.player().is_some());
    assert!(world.gates().iter().all(|placed| !placed.entity.is_unlocked()));
}

#[test]
fn affordable_gate_is_unlocked_and_paid_for() {
    let mut scene = IslandScene::new(tiny_layout());
    let mut world = SceneWorld::default();
    scene.load(&mut world);
    let ledger = world.inventory().cloned().expect("ledger");
    ledger.add(ResourceKind::Wood, 3);

    let command = scene.update(1.0 / 30.0, &mut world);

    assert_eq!(command, SceneCommand::Quit);
    assert!(world.gates()[0].entity.is_unlocked());
    assert_eq!(ledger.get(ResourceKind::Wood), 1);
}

#[test]
fn autopilot_walks_to_the_nearest_useful_node() {
    let mut scene = IslandScene::new(tiny_layout());
    let mut world = SceneWorld::default();
    scene.load(&mut world);

    scene.update(1.0 / 30.0, &mut world);

    let near_tree = world.harvest_nodes()[1].id;
    assert_eq!(scene.intent, Intent::WalkingTo(near_tree));
}

#[test]
fn no_target_once_the_gate_is_covered() {
    let mut scene = IslandScene::new(tiny_layout());
    let mut world = SceneWorld::default();
    scene.load(&mut world);
    let ledger = world.inventory().cloned().expect("ledger");
    ledger.add(ResourceKind::Wood, 2);

    assert_eq!(scene.needed_kinds(&ledger), Vec::<ResourceKind>::new());
    assert_eq!(scene.pick_target(&world), None);
}

#[test]
fn unlock_writes_a_single_save() {
    let temp = TempDir::new().expect("tempdir");
    let mut scene = IslandScene::new(tiny_layout());
    let mut world = SceneWorld::default();
    scene.load(&mut world);
    let manager = SaveManager::start(
        SaveConfig::new(temp.path().join(SAVE_FILE_NAME)),
        engine::Participants::default(),
        Some(&world),
    )
    .expect("start");
    world.attach_save_manager(manager.clone());
    let ledger = world.inventory().cloned().expect("ledger");
    ledger.add(ResourceKind::Wood, 2);
    let writes_before = manager.stats().writes;

    scene.update(1.0 / 30.0, &mut world);

    assert_eq!(manager.stats().writes, writes_before + 1);
    let cached = manager.cached_snapshot();
    assert_eq!(cached.unlocked_gate_ids, vec!["gate_a".to_string()]);
    assert_eq!(cached.inventory[0].quantity, 0);
}

#[test]
fn tiny_island_session_unlocks_its_gate() {
    let temp = TempDir::new().expect("tempdir");
    let save_config = SaveConfig::new(temp.path().join(SAVE_FILE_NAME));
    let mut scene = IslandScene::new(tiny_layout());

    let summary = run_session(&session_config(600), save_config, &mut scene).expect("session");

    assert_eq!(summary.end, SessionEnd::SceneQuit);
    assert_eq!(summary.final_state.unlocked_gate_ids, vec!["gate_a".to_string()]);
    assert_eq!(scene.harvests_collected(), 1);
}

#[test]
fn default_island_is_completed_within_budget() {
    let temp = TempDir::new().expect("tempdir");
    let save_config = SaveConfig::new(temp.path().join(SAVE_FILE_NAME));
    let mut scene = IslandScene::new(default_layout());

    let summary =
        run_session(&session_config(30 * 180), save_config, &mut scene).expect("session");

    assert_eq!(summary.end, SessionEnd::SceneQuit);
    assert_eq!(
        summary.final_state.unlocked_gate_ids,
        vec!["bridge_gate".to_string(), "cave_gate".to_string()]
    );
}

#[test]
fn finished_island_quits_on_the_first_tick_after_restart() {
    let temp = TempDir::new().expect("tempdir");
    let save_config = SaveConfig::new(temp.path().join(SAVE_FILE_NAME));
    let mut first = IslandScene::new(tiny_layout());
    run_session(&session_config(600), save_config.clone(), &mut first).expect("first session");

    let mut second = IslandScene::new(tiny_layout());
    let summary =
        run_session(&session_config(600), save_config, &mut second).expect("second session");

    assert_eq!(summary.end, SessionEnd::SceneQuit);
    assert_eq!(summary.ticks, 1);
    assert_eq!(summary.save_stats.loads_applied, 1);
    assert_eq!(second.harvests_collected(), 0);
}

#[test]
fn interrupted_session_keeps_harvested_resources() {
    let temp = TempDir::new().expect("tempdir");
    let save_config = SaveConfig::new(temp.path().join(SAVE_FILE_NAME));
    let layout = parse_layout(
        Path::new("slow.json"),
        r#"{
            "gates": [{"id": "gate_a", "unlock_cost": [{"kind": "wood", "amount": 10}]}],
            "resource_nodes": [
                {"id": "tree", "position": {"x": 0.5, "y": 0.0, "z": 0.0},
                 "harvest": {"harvest_seconds": 1.0, "respawn_seconds": 100.0,
                             "yields": [{"kind": "wood", "amount": 3}]}}
            ]
        }"#,
    )
    .expect("layout");

    let mut first = IslandScene::new(layout.clone());
    let summary =
        run_session(&session_config(90), save_config.clone(), &mut first).expect("first session");
    assert_eq!(summary.end, SessionEnd::TickBudgetExhausted);

    let mut second = IslandScene::new(layout);
    let summary = run_session(&session_config(1), save_config, &mut second).expect("second");

    assert_eq!(summary.final_state.inventory.len(), 1);
    assert_eq!(summary.final_state.inventory[0].item_id, "wood");
    assert_eq!(summary.final_state.inventory[0].quantity, 3);
    assert_eq!(summary.final_state.nodes[0].state, engine::NodeRunState::CoolingDown);
}

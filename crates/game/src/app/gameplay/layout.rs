use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use engine::{HarvestConfig, ResourceKind, ResourceYield, SavedVec3};
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

pub(crate) const LAYOUT_FILE_NAME: &str = "island_layout.json";

#[derive(Debug, Error)]
pub(crate) enum LayoutError {
    #[error("failed to read layout file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse layout file {path} at {json_path}: {source}")]
    Parse {
        path: PathBuf,
        json_path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("layout file {path} has an entry with an empty id in {section}")]
    EmptyId { path: PathBuf, section: &'static str },
    #[error("layout file {path} declares {section} id {id:?} more than once")]
    DuplicateId {
        path: PathBuf,
        section: &'static str,
        id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct IslandLayout {
    #[serde(default)]
    pub(crate) starting_inventory: Vec<ResourceYield>,
    #[serde(default)]
    pub(crate) player: PlayerLayout,
    #[serde(default)]
    pub(crate) gates: Vec<GateLayout>,
    #[serde(default)]
    pub(crate) resource_nodes: Vec<NodeLayout>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct PlayerLayout {
    #[serde(default)]
    pub(crate) spawn: SavedVec3,
    #[serde(default = "default_move_speed")]
    pub(crate) move_speed: f32,
    #[serde(default = "default_interaction_radius")]
    pub(crate) interaction_radius: f32,
}

impl Default for PlayerLayout {
    fn default() -> Self {
        Self {
            spawn: SavedVec3::default(),
            move_speed: default_move_speed(),
            interaction_radius: default_interaction_radius(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct GateLayout {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) position: SavedVec3,
    #[serde(default)]
    pub(crate) unlock_cost: Vec<ResourceYield>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub(crate) struct NodeLayout {
    pub(crate) id: String,
    #[serde(default)]
    pub(crate) position: SavedVec3,
    #[serde(default)]
    pub(crate) harvest: HarvestConfig,
}

fn default_move_speed() -> f32 {
    4.0
}

fn default_interaction_radius() -> f32 {
    1.0
}

/// Reads the island layout. A missing file yields the built-in layout; an
/// unreadable or invalid file is an error.
pub(crate) fn load_layout(path: &Path) -> Result<IslandLayout, LayoutError> {
    let raw = match fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(source) if source.kind() == io::ErrorKind::NotFound => {
            info!(path = %path.display(), "layout_missing_using_default");
            return Ok(default_layout());
        }
        Err(source) => {
            return Err(LayoutError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };

    let layout = parse_layout(path, &raw)?;
    info!(
        path = %path.display(),
        gates = layout.gates.len(),
        resource_nodes = layout.resource_nodes.len(),
        "layout_loaded"
    );
    Ok(layout)
}

pub(crate) fn parse_layout(path: &Path, raw: &str) -> Result<IslandLayout, LayoutError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    let layout: IslandLayout =
        serde_path_to_error::deserialize(&mut deserializer).map_err(|error| {
            let json_path = error.path().to_string();
            LayoutError::Parse {
                path: path.to_path_buf(),
                json_path,
                source: error.into_inner(),
            }
        })?;
    deserializer.end().map_err(|source| LayoutError::Parse {
        path: path.to_path_buf(),
        json_path: ".".to_string(),
        source,
    })?;

    validate_unique_ids(path, "gates", layout.gates.iter().map(|gate| gate.id.as_str()))?;
    validate_unique_ids(
        path,
        "resource_nodes",
        layout.resource_nodes.iter().map(|node| node.id.as_str()),
    )?;
    Ok(layout)
}

fn validate_unique_ids<'a>(
    path: &Path,
    section: &'static str,
    ids: impl Iterator<Item = &'a str>,
) -> Result<(), LayoutError> {
    let mut seen = HashSet::new();
    for id in ids {
        if id.trim().is_empty() {
            return Err(LayoutError::EmptyId {
                path: path.to_path_buf(),
                section,
            });
        }
        if !seen.insert(id) {
            return Err(LayoutError::DuplicateId {
                path: path.to_path_buf(),
                section,
                id: id.to_string(),
            });
        }
    }
    Ok(())
}

pub(crate) fn default_layout() -> IslandLayout {
    IslandLayout {
        starting_inventory: Vec::new(),
        player: PlayerLayout::default(),
        gates: vec![
            GateLayout {
                id: "bridge_gate".to_string(),
                position: saved(10.0, 0.0, 0.0),
                unlock_cost: vec![ResourceYield::new(ResourceKind::Wood, 4)],
            },
            GateLayout {
                id: "cave_gate".to_string(),
                position: saved(-8.0, 0.0, 6.0),
                unlock_cost: vec![
                    ResourceYield::new(ResourceKind::Stone, 3),
                    ResourceYield::new(ResourceKind::Wood, 2),
                ],
            },
        ],
        resource_nodes: vec![
            NodeLayout {
                id: "tree_north".to_string(),
                position: saved(4.0, 0.0, 3.0),
                harvest: harvest("Tree", 2.0, 6.0, ResourceKind::Wood, 2),
            },
            NodeLayout {
                id: "tree_south".to_string(),
                position: saved(3.0, 0.0, -4.0),
                harvest: harvest("Tree", 2.0, 6.0, ResourceKind::Wood, 2),
            },
            NodeLayout {
                id: "rock_east".to_string(),
                position: saved(-5.0, 0.0, 2.0),
                harvest: harvest("Rock", 3.0, 8.0, ResourceKind::Stone, 1),
            },
            NodeLayout {
                id: "bush_west".to_string(),
                position: saved(-2.0, 0.0, -3.0),
                harvest: harvest("Bush", 1.0, 4.0, ResourceKind::Fiber, 1),
            },
        ],
    }
}

fn saved(x: f32, y: f32, z: f32) -> SavedVec3 {
    SavedVec3 { x, y, z }
}

fn harvest(
    display_name: &str,
    harvest_seconds: f32,
    respawn_seconds: f32,
    kind: ResourceKind,
    amount: i32,
) -> HarvestConfig {
    HarvestConfig {
        display_name: display_name.to_string(),
        harvest_seconds,
        respawn_seconds,
        yields: vec![ResourceYield::new(kind, amount)],
        max_harvests: None,
    }
}

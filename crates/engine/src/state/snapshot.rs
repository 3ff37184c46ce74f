use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use super::ledger::ResourceKind;
use super::node::NodeRunState;
use super::player::Vec3;

pub const SAVE_FILE_NAME: &str = "game_state.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryEntry {
    #[serde(default)]
    pub item_id: String,
    #[serde(default)]
    pub quantity: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeRecord {
    #[serde(default)]
    pub node_id: String,
    #[serde(default)]
    pub state: NodeRunState,
    #[serde(default)]
    pub remaining_seconds: f32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SavedVec3 {
    #[serde(default)]
    pub x: f32,
    #[serde(default)]
    pub y: f32,
    #[serde(default)]
    pub z: f32,
}

impl SavedVec3 {
    pub fn from_vec3(value: Vec3) -> Self {
        Self {
            x: value.x,
            y: value.y,
            z: value.z,
        }
    }

    pub fn to_vec3(self) -> Vec3 {
        Vec3 {
            x: self.x,
            y: self.y,
            z: self.z,
        }
    }
}

/// Aggregate persisted state. Missing collections decode as empty and
/// missing record fields take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GameStateSnapshot {
    #[serde(default)]
    pub inventory: Vec<InventoryEntry>,
    #[serde(default)]
    pub unlocked_gate_ids: Vec<String>,
    #[serde(default)]
    pub nodes: Vec<NodeRecord>,
    #[serde(default)]
    pub player_position: SavedVec3,
}

#[derive(Debug, Error)]
pub enum SnapshotParseError {
    #[error("save file is empty")]
    Empty,
    #[error("save file is not valid utf-8: {source}")]
    Utf8 {
        #[source]
        source: std::str::Utf8Error,
    },
    #[error("parse save json: {source}")]
    Json {
        #[source]
        source: serde_json::Error,
    },
    #[error("parse save json at {path}: {source}")]
    JsonAt {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl GameStateSnapshot {
    pub fn parse_bytes(raw: &[u8]) -> Result<Self, SnapshotParseError> {
        let text =
            std::str::from_utf8(raw).map_err(|source| SnapshotParseError::Utf8 { source })?;
        Self::parse_json(text)
    }

    pub fn parse_json(raw: &str) -> Result<Self, SnapshotParseError> {
        if raw.trim().is_empty() {
            return Err(SnapshotParseError::Empty);
        }

        let mut deserializer = serde_json::Deserializer::from_str(raw);
        match serde_path_to_error::deserialize::<_, Self>(&mut deserializer) {
            Ok(snapshot) => {
                deserializer
                    .end()
                    .map_err(|source| SnapshotParseError::Json { source })?;
                Ok(snapshot)
            }
            Err(error) => {
                let path = error.path().to_string();
                let source = error.into_inner();
                if path.is_empty() || path == "." {
                    Err(SnapshotParseError::Json { source })
                } else {
                    Err(SnapshotParseError::JsonAt { path, source })
                }
            }
        }
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn inventory_from_capture(captured: &[(ResourceKind, i32)]) -> Vec<InventoryEntry> {
        captured
            .iter()
            .map(|(kind, quantity)| InventoryEntry {
                item_id: kind.as_id().to_string(),
                quantity: *quantity,
            })
            .collect()
    }

    /// Ledger entries with known resource ids. Unknown or empty ids are
    /// skipped.
    pub fn inventory_quantities(&self) -> Vec<(ResourceKind, i32)> {
        self.inventory
            .iter()
            .filter_map(|entry| match ResourceKind::from_id(&entry.item_id) {
                Some(kind) => Some((kind, entry.quantity.max(0))),
                None => {
                    if !entry.item_id.is_empty() {
                        warn!(item_id = %entry.item_id, "save_unknown_item_skipped");
                    }
                    None
                }
            })
            .collect()
    }

    pub fn unlocked_gate_set(&self) -> HashSet<&str> {
        self.unlocked_gate_ids
            .iter()
            .map(String::as_str)
            .filter(|id| !id.is_empty())
            .collect()
    }

    pub fn is_gate_unlocked(&self, gate_id: &str) -> bool {
        !gate_id.is_empty() && self.unlocked_gate_ids.iter().any(|id| id == gate_id)
    }

    /// Last record with a matching id wins.
    pub fn find_node(&self, node_id: &str) -> Option<&NodeRecord> {
        if node_id.is_empty() {
            return None;
        }
        self.nodes.iter().rev().find(|record| record.node_id == node_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_collections_decode_as_empty() {
        let snapshot = GameStateSnapshot::parse_json("{}").expect("parse");
        assert_eq!(snapshot, GameStateSnapshot::default());

        let snapshot =
            GameStateSnapshot::parse_json(r#"{"unlocked_gate_ids":["G1"]}"#).expect("parse");
        assert!(snapshot.inventory.is_empty());
        assert!(snapshot.nodes.is_empty());
        assert!(snapshot.is_gate_unlocked("G1"));
    }

    #[test]
    fn whitespace_only_is_empty_error() {
        assert!(matches!(
            GameStateSnapshot::parse_json("  \n"),
            Err(SnapshotParseError::Empty)
        ));
    }

    #[test]
    fn parse_error_reports_field_path() {
        let raw = r#"{"nodes":[{"node_id":"N1","state":"sleeping","remaining_seconds":1.0}]}"#;
        let error = GameStateSnapshot::parse_json(raw).expect_err("bad state");
        let message = error.to_string();
        assert!(message.contains("nodes[0].state"), "{message}");
    }

    #[test]
    fn incomplete_records_take_defaults() {
        let raw = r#"{"nodes":[{"node_id":"N1","remaining_seconds":3.0},{}],"inventory":[{"item_id":"wood"},{"quantity":4}]}"#;
        let snapshot = GameStateSnapshot::parse_json(raw).expect("parse");

        assert_eq!(snapshot.nodes[0].state, NodeRunState::Inactive);
        assert_eq!(snapshot.nodes[1].node_id, "");
        assert_eq!(
            snapshot.find_node("N1").map(|record| record.remaining_seconds),
            Some(3.0)
        );
        assert_eq!(snapshot.inventory_quantities(), vec![(ResourceKind::Wood, 0)]);
    }

    #[test]
    fn non_utf8_bytes_are_a_parse_error() {
        assert!(matches!(
            GameStateSnapshot::parse_bytes(&[0xff, 0xfe, b'{', b'}']),
            Err(SnapshotParseError::Utf8 { .. })
        ));
        assert_eq!(
            GameStateSnapshot::parse_bytes(b"{}").expect("parse"),
            GameStateSnapshot::default()
        );
    }

    #[test]
    fn trailing_garbage_is_rejected() {
        assert!(GameStateSnapshot::parse_json("{} {").is_err());
        assert!(GameStateSnapshot::parse_json("null").is_err());
    }

    #[test]
    fn json_layout_uses_snake_case_fields() {
        let snapshot = GameStateSnapshot {
            inventory: vec![InventoryEntry {
                item_id: "wood".to_string(),
                quantity: 3,
            }],
            unlocked_gate_ids: vec!["G1".to_string()],
            nodes: vec![NodeRecord {
                node_id: "N1".to_string(),
                state: NodeRunState::CoolingDown,
                remaining_seconds: 2.0,
            }],
            player_position: SavedVec3 {
                x: 1.0,
                y: 0.0,
                z: -2.0,
            },
        };

        let value: serde_json::Value =
            serde_json::from_str(&snapshot.to_json_pretty().expect("encode")).expect("json");

        assert_eq!(value["inventory"][0]["item_id"], "wood");
        assert_eq!(value["nodes"][0]["state"], "cooling_down");
        assert_eq!(value["player_position"]["z"], -2.0);
    }

    #[test]
    fn unknown_inventory_ids_are_skipped() {
        let snapshot = GameStateSnapshot {
            inventory: vec![
                InventoryEntry {
                    item_id: "gold".to_string(),
                    quantity: 2,
                },
                InventoryEntry {
                    item_id: "mithril".to_string(),
                    quantity: 9,
                },
                InventoryEntry {
                    item_id: "stone".to_string(),
                    quantity: -1,
                },
            ],
            ..GameStateSnapshot::default()
        };

        assert_eq!(
            snapshot.inventory_quantities(),
            vec![(ResourceKind::Gold, 2), (ResourceKind::Stone, 0)]
        );
    }

    #[test]
    fn find_node_prefers_last_record() {
        let snapshot = GameStateSnapshot {
            nodes: vec![
                NodeRecord {
                    node_id: "N1".to_string(),
                    state: NodeRunState::Active,
                    remaining_seconds: 1.0,
                },
                NodeRecord {
                    node_id: "N1".to_string(),
                    state: NodeRunState::Completed,
                    remaining_seconds: 0.0,
                },
            ],
            ..GameStateSnapshot::default()
        };

        let record = snapshot.find_node("N1").expect("node");
        assert_eq!(record.state, NodeRunState::Completed);
        assert!(snapshot.find_node("").is_none());
    }
}

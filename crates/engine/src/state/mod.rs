mod events;
mod gate;
mod ledger;
mod node;
mod player;
mod save_manager;
mod snapshot;
mod storage;

pub use events::{Listeners, SubscriptionId};
pub use gate::{GateChanged, GateState};
pub use ledger::{InventoryLedger, ResourceChanged, ResourceKind};
pub use node::{NodeChanged, NodeRunState, ResourceNodeState};
pub use player::{PlayerTransform, Vec3};
pub use save_manager::{
    AutoSaveSuppression, LoadOutcome, ManagerPhase, ParticipantDirectory, Participants,
    SaveConfig, SaveError, SaveManager, SaveOutcome, SaveStats,
};
pub use snapshot::{
    GameStateSnapshot, InventoryEntry, NodeRecord, SavedVec3, SnapshotParseError, SAVE_FILE_NAME,
};

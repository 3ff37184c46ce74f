pub mod app;
mod paths;
pub mod state;

pub use app::{
    run_session, AppError, EntityId, HarvestAgent, HarvestConfig, HarvestNode, HarvestPhase,
    LoopConfig, Placed, ResourceYield, Scene, SceneCommand, SceneWorld, SessionEnd,
    SessionSummary, MIN_HARVEST_SECONDS,
};
pub use paths::{resolve_app_paths, AppPaths, StartupError, ROOT_ENV_VAR};
pub use state::{
    AutoSaveSuppression, GameStateSnapshot, GateChanged, GateState, InventoryEntry,
    InventoryLedger, Listeners, LoadOutcome, ManagerPhase, NodeChanged, NodeRecord, NodeRunState,
    ParticipantDirectory, Participants, PlayerTransform, ResourceChanged, ResourceKind,
    ResourceNodeState, SaveConfig, SaveError, SaveManager, SaveOutcome, SaveStats, SavedVec3,
    SnapshotParseError, SubscriptionId, Vec3, SAVE_FILE_NAME,
};

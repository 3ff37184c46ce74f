mod harvest;
mod loop_runner;
mod scene;

pub use harvest::{
    HarvestAgent, HarvestConfig, HarvestNode, HarvestPhase, ResourceYield, MIN_HARVEST_SECONDS,
};
pub use loop_runner::{run_session, AppError, LoopConfig, SessionEnd, SessionSummary};
pub use scene::{EntityId, Placed, Scene, SceneCommand, SceneWorld};

use std::process::ExitCode;

use engine::{run_session, Participants, SaveConfig, SaveManager};
use tracing::{error, info, warn};

use super::bootstrap::AppWiring;

pub(crate) fn run(app: AppWiring) -> ExitCode {
    let AppWiring {
        config,
        save_config,
        reset_save,
        mut scene,
    } = app;

    if reset_save {
        reset_save_file(&save_config);
    }

    match run_session(&config, save_config, &mut scene) {
        Ok(summary) => {
            info!(
                ticks = summary.ticks,
                simulated_seconds = summary.simulated_seconds,
                end = ?summary.end,
                unlocked_gates = summary.final_state.unlocked_gate_ids.len(),
                harvests_collected = scene.harvests_collected(),
                writes = summary.save_stats.writes,
                failed_writes = summary.save_stats.failed_writes,
                "session_finished"
            );
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!(error = %err, "session_failed");
            ExitCode::FAILURE
        }
    }
}

fn reset_save_file(save_config: &SaveConfig) {
    let config = SaveConfig {
        auto_discover: false,
        ..save_config.clone()
    };
    match SaveManager::start(config, Participants::default(), None) {
        Ok(manager) => {
            let removed = manager.delete_save_data();
            info!(removed, path = %save_config.save_path.display(), "save_reset");
            manager.shutdown();
        }
        Err(err) => warn!(error = %err, "save_reset_failed"),
    }
}

use std::thread;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{info, warn};

use crate::state::{
    GameStateSnapshot, Participants, SaveConfig, SaveError, SaveManager, SaveStats,
};
use crate::StartupError;

use super::scene::{Scene, SceneCommand, SceneWorld};

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub target_tps: u32,
    /// Hard stop for the session. `None` runs until the scene quits.
    pub max_ticks: Option<u64>,
    /// Pace ticks against the wall clock instead of running flat out.
    pub realtime: bool,
    pub max_frame_delta: Duration,
    pub max_ticks_per_frame: u32,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            target_tps: 60,
            max_ticks: Some(60 * 60 * 10),
            realtime: false,
            max_frame_delta: Duration::from_millis(250),
            max_ticks_per_frame: 5,
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error("failed to start save manager: {0}")]
    Save(#[from] SaveError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    SceneQuit,
    TickBudgetExhausted,
}

#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub ticks: u64,
    pub simulated_seconds: f64,
    pub end: SessionEnd,
    pub save_stats: SaveStats,
    pub final_state: GameStateSnapshot,
}

/// Runs one headless session: load the scene, start persistence with
/// discovery over the scene world, tick until the scene quits or the budget
/// runs out, then force a final save.
pub fn run_session(
    config: &LoopConfig,
    save_config: SaveConfig,
    scene: &mut dyn Scene,
) -> Result<SessionSummary, AppError> {
    let mut world = SceneWorld::default();
    scene.load(&mut world);
    info!(entity_count = world.entity_count(), "scene_loaded");

    let manager = SaveManager::start(save_config, Participants::default(), Some(&world))?;
    world.attach_save_manager(manager.clone());
    world.resume_harvest_nodes();

    let target_tps = config.target_tps.max(1);
    let max_frame_delta =
        normalize_non_zero_duration(config.max_frame_delta, Duration::from_millis(250));
    let max_ticks_per_frame = config.max_ticks_per_frame.max(1);
    let fixed_dt = Duration::from_secs_f64(1.0 / target_tps as f64);
    let fixed_dt_seconds = fixed_dt.as_secs_f32();
    info!(
        target_tps,
        max_ticks = ?config.max_ticks,
        realtime = config.realtime,
        max_frame_delta_ms = max_frame_delta.as_millis() as u64,
        max_ticks_per_frame,
        "loop_config"
    );

    let mut accumulator = Duration::ZERO;
    let mut last_frame_instant = Instant::now();
    let mut ticks = 0u64;
    let end = 'frames: loop {
        let frame_started = Instant::now();
        let frame_dt = if config.realtime {
            let raw = frame_started.saturating_duration_since(last_frame_instant);
            last_frame_instant = frame_started;
            clamp_frame_delta(raw, max_frame_delta)
        } else {
            fixed_dt
        };
        accumulator = accumulator.saturating_add(frame_dt);

        let step_plan = plan_sim_steps(accumulator, fixed_dt, max_ticks_per_frame);
        for _ in 0..step_plan.ticks_to_run {
            if config.max_ticks.is_some_and(|max| ticks >= max) {
                break 'frames SessionEnd::TickBudgetExhausted;
            }
            let command = scene.update(fixed_dt_seconds, &mut world);
            world.tick(fixed_dt_seconds);
            ticks += 1;
            if command == SceneCommand::Quit {
                info!(ticks, "shutdown_requested");
                break 'frames SessionEnd::SceneQuit;
            }
        }
        accumulator = step_plan.remaining_accumulator;

        if step_plan.dropped_backlog > Duration::ZERO {
            warn!(
                dropped_backlog_ms = step_plan.dropped_backlog.as_millis() as u64,
                max_ticks_per_frame, "sim_clamp_triggered"
            );
        }

        if config.realtime {
            let elapsed = Instant::now().saturating_duration_since(frame_started);
            let cap_sleep = compute_cap_sleep(elapsed, Some(fixed_dt));
            if cap_sleep > Duration::ZERO {
                thread::sleep(cap_sleep);
            }
        }
    };

    manager.on_application_quit();
    let summary = SessionSummary {
        ticks,
        simulated_seconds: ticks as f64 * fixed_dt.as_secs_f64(),
        end,
        save_stats: manager.stats(),
        final_state: manager.current_state(),
    };

    scene.unload(&mut world);
    world.detach_save_manager();
    manager.shutdown();
    info!(
        ticks = summary.ticks,
        end = ?summary.end,
        writes = summary.save_stats.writes,
        "shutdown"
    );
    Ok(summary)
}

#[derive(Debug, Clone, Copy)]
struct StepPlan {
    ticks_to_run: u32,
    remaining_accumulator: Duration,
    dropped_backlog: Duration,
}

fn plan_sim_steps(
    mut accumulator: Duration,
    fixed_dt: Duration,
    max_ticks_per_frame: u32,
) -> StepPlan {
    let mut ticks_to_run = 0u32;

    while accumulator >= fixed_dt && ticks_to_run < max_ticks_per_frame {
        accumulator = accumulator.saturating_sub(fixed_dt);
        ticks_to_run = ticks_to_run.saturating_add(1);
    }

    if accumulator >= fixed_dt {
        StepPlan {
            ticks_to_run,
            remaining_accumulator: Duration::ZERO,
            dropped_backlog: accumulator,
        }
    } else {
        StepPlan {
            ticks_to_run,
            remaining_accumulator: accumulator,
            dropped_backlog: Duration::ZERO,
        }
    }
}

fn clamp_frame_delta(frame_dt: Duration, max_frame_delta: Duration) -> Duration {
    frame_dt.min(max_frame_delta)
}

fn normalize_non_zero_duration(value: Duration, fallback: Duration) -> Duration {
    if value.is_zero() {
        fallback
    } else {
        value
    }
}

fn compute_cap_sleep(elapsed: Duration, target: Option<Duration>) -> Duration {
    match target {
        Some(frame_target) if elapsed < frame_target => frame_target - elapsed,
        _ => Duration::ZERO,
    }
}

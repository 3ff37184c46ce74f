use std::env;
use std::path::PathBuf;

use engine::{resolve_app_paths, AppPaths, LoopConfig, SaveConfig, StartupError};
use thiserror::Error;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use super::gameplay::{load_layout, IslandScene, LayoutError, LAYOUT_FILE_NAME};

const SAVE_PATH_ENV_VAR: &str = "ISLAND_SAVE_PATH";
const MAX_TICKS_ENV_VAR: &str = "ISLAND_MAX_TICKS";
const REALTIME_ENV_VAR: &str = "ISLAND_REALTIME";
const RESET_SAVE_ENV_VAR: &str = "ISLAND_RESET_SAVE";

pub(crate) struct AppWiring {
    pub(crate) config: LoopConfig,
    pub(crate) save_config: SaveConfig,
    pub(crate) reset_save: bool,
    pub(crate) scene: IslandScene,
}

#[derive(Debug, Error)]
pub(crate) enum BootstrapError {
    #[error(transparent)]
    Startup(#[from] StartupError),
    #[error(transparent)]
    Layout(#[from] LayoutError),
}

pub(crate) fn build_app() -> Result<AppWiring, BootstrapError> {
    init_tracing();
    info!("=== Island Startup ===");

    let app_paths = resolve_app_paths()?;
    info!(
        root = %app_paths.root.display(),
        base_content_dir = %app_paths.base_content_dir.display(),
        cache_dir = %app_paths.cache_dir.display(),
        "startup"
    );

    let layout = load_layout(&app_paths.base_content_dir.join(LAYOUT_FILE_NAME))?;
    let save_config = save_config_from(&app_paths, env_value(SAVE_PATH_ENV_VAR));
    let defaults = LoopConfig::default();
    let config = LoopConfig {
        max_ticks: parse_max_ticks(env_value(MAX_TICKS_ENV_VAR).as_deref(), defaults.max_ticks),
        realtime: parse_flag(env_value(REALTIME_ENV_VAR).as_deref()),
        ..defaults
    };
    let reset_save = parse_flag(env_value(RESET_SAVE_ENV_VAR).as_deref());
    info!(
        save_path = %save_config.save_path.display(),
        reset_save,
        "save_config"
    );

    Ok(AppWiring {
        config,
        save_config,
        reset_save,
        scene: IslandScene::new(layout),
    })
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .compact()
        .init();
}

fn env_value(var: &'static str) -> Option<String> {
    match env::var(var) {
        Ok(value) => Some(value),
        Err(env::VarError::NotPresent) => None,
        Err(error) => {
            warn!(env_var = var, error = %error, "env_var_unreadable");
            None
        }
    }
}

fn save_config_from(app_paths: &AppPaths, override_path: Option<String>) -> SaveConfig {
    match override_path
        .as_deref()
        .map(str::trim)
        .filter(|path| !path.is_empty())
    {
        Some(path) => SaveConfig::new(PathBuf::from(path)),
        None => SaveConfig::from_app_paths(app_paths),
    }
}

/// `0`, `none` and `unlimited` lift the budget; anything unparsable keeps
/// the fallback.
fn parse_max_ticks(raw: Option<&str>, fallback: Option<u64>) -> Option<u64> {
    let Some(raw) = raw.map(str::trim).filter(|raw| !raw.is_empty()) else {
        return fallback;
    };
    if raw.eq_ignore_ascii_case("none") || raw.eq_ignore_ascii_case("unlimited") {
        return None;
    }
    match raw.parse::<u64>() {
        Ok(0) => None,
        Ok(value) => Some(value),
        Err(_) => {
            warn!(
                env_var = MAX_TICKS_ENV_VAR,
                value = raw,
                "invalid tick budget; falling back to default"
            );
            fallback
        }
    }
}

fn parse_flag(raw: Option<&str>) -> bool {
    raw.map(str::trim).is_some_and(|raw| {
        raw == "1"
            || raw.eq_ignore_ascii_case("true")
            || raw.eq_ignore_ascii_case("yes")
            || raw.eq_ignore_ascii_case("on")
    })
}

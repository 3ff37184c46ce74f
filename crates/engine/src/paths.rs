use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::debug;

pub const ROOT_ENV_VAR: &str = "ISLAND_ROOT";

/// Directories the island reads content from and writes saves under.
#[derive(Debug, Clone)]
pub struct AppPaths {
    pub root: PathBuf,
    pub base_content_dir: PathBuf,
    pub cache_dir: PathBuf,
}

impl AppPaths {
    pub fn under_root(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            base_content_dir: root.join("assets").join("base"),
            cache_dir: root.join("cache"),
            root,
        }
    }
}

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("{var} could not be read: {source}")]
    EnvVar {
        var: &'static str,
        #[source]
        source: env::VarError,
    },
    #[error("could not locate the running executable: {0}")]
    CurrentExe(#[source] io::Error),
    #[error("ISLAND_ROOT={path} is not an island checkout (needs Cargo.toml plus crates/ or assets/)")]
    InvalidEnvRoot { path: PathBuf },
    #[error("no island checkout above {start_dir}; set ISLAND_ROOT to the directory holding Cargo.toml")]
    RootNotFound { start_dir: PathBuf },
    #[error("cache directory {path} could not be created: {source}")]
    CreateCacheDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Resolves the checkout root from `ISLAND_ROOT`, falling back to the
/// nearest ancestor of the executable that looks like one, and makes sure
/// the cache directory exists.
pub fn resolve_app_paths() -> Result<AppPaths, StartupError> {
    let paths = AppPaths::under_root(locate_root()?);
    fs::create_dir_all(&paths.cache_dir).map_err(|source| StartupError::CreateCacheDir {
        path: paths.cache_dir.clone(),
        source,
    })?;
    debug!(root = %paths.root.display(), "app_paths_resolved");
    Ok(paths)
}

fn locate_root() -> Result<PathBuf, StartupError> {
    let configured = match env::var(ROOT_ENV_VAR) {
        Ok(value) => Some(PathBuf::from(value)),
        Err(env::VarError::NotPresent) => None,
        Err(source) => {
            return Err(StartupError::EnvVar {
                var: ROOT_ENV_VAR,
                source,
            })
        }
    };

    if let Some(path) = configured {
        let path = canonical_or_raw(&path);
        return if looks_like_checkout(&path) {
            Ok(path)
        } else {
            Err(StartupError::InvalidEnvRoot { path })
        };
    }

    let exe = env::current_exe().map_err(StartupError::CurrentExe)?;
    let start_dir = exe.parent().unwrap_or(exe.as_path());
    find_checkout_above(start_dir).ok_or_else(|| StartupError::RootNotFound {
        start_dir: canonical_or_raw(start_dir),
    })
}

fn find_checkout_above(start_dir: &Path) -> Option<PathBuf> {
    start_dir
        .ancestors()
        .find(|candidate| looks_like_checkout(candidate))
        .map(canonical_or_raw)
}

fn looks_like_checkout(dir: &Path) -> bool {
    dir.join("Cargo.toml").is_file()
        && ["crates", "assets"]
            .iter()
            .any(|child| dir.join(child).is_dir())
}

fn canonical_or_raw(path: &Path) -> PathBuf {
    fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

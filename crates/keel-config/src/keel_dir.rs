//! Discovery and creation of the `.keel/` project directory.

use std::path::{Path, PathBuf};

use crate::ConfigError;

/// The name of the keel metadata directory.
const KEEL_DIR_NAME: &str = ".keel";

/// Environment variable that overrides directory discovery.
const KEEL_DIR_ENV: &str = "KEEL_DIR";

/// Database filename inside the keel directory.
pub const DB_FILE_NAME: &str = "keel.db";

/// Summary filename inside the keel directory.
pub const SUMMARY_FILE_NAME: &str = "context.md";

/// Installed pack directory inside the keel directory.
pub const PACKS_DIR_NAME: &str = "packs";

/// Project-local template override directory inside the keel directory.
pub const TEMPLATES_DIR_NAME: &str = "templates";

/// Walk up the directory tree from `start` looking for a `.keel/` directory.
///
/// The `KEEL_DIR` environment variable is checked first and wins when it
/// points at an existing directory. Returns `None` when the filesystem root
/// is reached without a match.
pub fn find_keel_dir(start: &Path) -> Option<PathBuf> {
    if let Ok(env_dir) = std::env::var(KEEL_DIR_ENV) {
        let env_path = PathBuf::from(&env_dir);
        if env_path.is_dir() {
            return Some(env_path);
        }
    }

    let start = start.canonicalize().ok()?;
    let mut current = start.as_path();
    loop {
        let candidate = current.join(KEEL_DIR_NAME);
        if candidate.is_dir() {
            return Some(candidate);
        }
        match current.parent() {
            Some(parent) if parent != current => current = parent,
            _ => break,
        }
    }

    None
}

/// Like [`find_keel_dir`], but converts `None` into
/// [`ConfigError::KeelDirNotFound`].
pub fn find_keel_dir_or_error(start: &Path) -> Result<PathBuf, ConfigError> {
    find_keel_dir(start).ok_or(ConfigError::KeelDirNotFound)
}

/// Ensure a `.keel/` directory (with its `packs/` and `templates/`
/// subdirectories) exists under `path`, creating it if needed.
///
/// Returns the path to the `.keel/` directory.
pub fn ensure_keel_dir(path: &Path) -> Result<PathBuf, ConfigError> {
    let keel_dir = if path.ends_with(KEEL_DIR_NAME) {
        path.to_path_buf()
    } else {
        path.join(KEEL_DIR_NAME)
    };

    std::fs::create_dir_all(keel_dir.join(PACKS_DIR_NAME))?;
    std::fs::create_dir_all(keel_dir.join(TEMPLATES_DIR_NAME))?;
    Ok(keel_dir)
}

/// Path of the database file inside a keel directory.
pub fn db_path(keel_dir: &Path) -> PathBuf {
    keel_dir.join(DB_FILE_NAME)
}

/// Conventional path of the generated summary inside a keel directory.
pub fn summary_path(keel_dir: &Path) -> PathBuf {
    keel_dir.join(SUMMARY_FILE_NAME)
}

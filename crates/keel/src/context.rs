//! Runtime context: project discovery, config, store handle, summary
//! refresh.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use tracing::warn;

use keel_config::keel_dir::{find_keel_dir_or_error, summary_path};
use keel_config::{ProjectConfig, load_config};
use keel_storage::Store;

use crate::cli::GlobalArgs;

/// Everything a command handler needs besides its own arguments.
pub struct RuntimeContext {
    pub json: bool,
    pub actor: String,
    pub verbose: bool,
}

impl RuntimeContext {
    pub fn from_global_args(global: &GlobalArgs) -> Self {
        Self {
            json: global.json,
            actor: global.actor.clone(),
            verbose: global.verbose,
        }
    }

    /// Locates `.keel/` from the working directory.
    pub fn keel_dir(&self) -> Result<PathBuf> {
        let cwd = std::env::current_dir().context("cannot determine working directory")?;
        Ok(find_keel_dir_or_error(&cwd)?)
    }

    /// Loads the project config.
    pub fn config(&self) -> Result<(PathBuf, ProjectConfig)> {
        let keel_dir = self.keel_dir()?;
        let config = load_config(&keel_dir)
            .with_context(|| format!("loading {}/config.json", keel_dir.display()))?;
        Ok((keel_dir, config))
    }

    /// Opens the project store.
    pub fn open_store(&self) -> Result<Store> {
        let (keel_dir, config) = self.config()?;
        let db = keel_config::keel_dir::db_path(&keel_dir);
        Ok(Store::open(db, config, Some(&keel_dir))?)
    }

    /// Regenerates the summary after a mutation. Failure is logged, never
    /// fatal: the mutation already committed.
    pub fn refresh_summary(&self, store: &Store) {
        let Ok(keel_dir) = self.keel_dir() else {
            return;
        };
        let target = summary_path(&keel_dir);
        if let Err(e) = keel_summary::write_summary_to(store, &target) {
            warn!(error = %e, "summary refresh failed");
        }
    }
}

//! [`Store`] -- the engine instance that owns the database handle.

use std::path::Path;
use std::sync::{Mutex, MutexGuard, RwLock, RwLockReadGuard};

use rusqlite::Connection;
use tracing::{debug, info};

use keel_config::ProjectConfig;
use keel_templates::TemplateRegistry;

use crate::error::{EngineError, Result};
use crate::schema::{self, Migration, MigrationKind};

/// One engine instance: exactly one write-capable connection to one store
/// file, plus the project's template registry and resolved config.
///
/// The connection sits behind a `Mutex`; the registry behind an `RwLock` so
/// reads don't contend and `reload_templates` can swap it in place.
pub struct Store {
    pub(crate) conn: Mutex<Connection>,
    pub(crate) registry: RwLock<TemplateRegistry>,
    pub(crate) config: ProjectConfig,
}

impl Store {
    /// Opens (or creates) a store at the given path and brings it to the
    /// current schema version.
    ///
    /// `keel_dir` is the project `.keel/` directory used for template
    /// discovery; pass `None` to load built-in packs only.
    pub fn open(
        path: impl AsRef<Path>,
        config: ProjectConfig,
        keel_dir: Option<&Path>,
    ) -> Result<Self> {
        let path = path.as_ref();
        info!(?path, "opening store");
        let conn = Connection::open(path)
            .map_err(|e| EngineError::Unknown(format!("failed to open {}: {e}", path.display())))?;
        Self::from_connection(conn, config, keel_dir)
    }

    /// Opens an in-memory store (tests and tooling).
    pub fn open_in_memory(config: ProjectConfig) -> Result<Self> {
        debug!("opening in-memory store");
        let conn = Connection::open_in_memory()
            .map_err(|e| EngineError::Unknown(format!("failed to open in-memory store: {e}")))?;
        Self::from_connection(conn, config, None)
    }

    fn from_connection(
        conn: Connection,
        config: ProjectConfig,
        keel_dir: Option<&Path>,
    ) -> Result<Self> {
        configure_connection(&conn)?;
        run_migrations(&conn)?;
        let registry = TemplateRegistry::load(&config, keel_dir)?;
        Ok(Self {
            conn: Mutex::new(conn),
            registry: RwLock::new(registry),
            config,
        })
    }

    /// The resolved project config this instance was opened with.
    pub fn config(&self) -> &ProjectConfig {
        &self.config
    }

    /// Read access to the template registry.
    pub fn registry(&self) -> RwLockReadGuard<'_, TemplateRegistry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    /// Re-scans all template layers without reopening the store.
    pub fn reload_templates(&self) -> Result<()> {
        let mut registry = self.registry.write().unwrap_or_else(|e| e.into_inner());
        registry.reload()?;
        Ok(())
    }

    /// Acquires the connection lock. Helper used by all operation modules.
    pub(crate) fn lock_conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Runs `f` inside a deferred write transaction, committing on `Ok` and
    /// rolling back on `Err`.
    pub(crate) fn with_tx<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T>,
    ) -> Result<T> {
        let conn = self.lock_conn();
        let tx = conn.unchecked_transaction()?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    // -- Meta key/value ------------------------------------------------------

    /// Reads an engine bookkeeping key.
    pub fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock_conn();
        get_meta_on_conn(&conn, key)
    }

    /// Writes an engine bookkeeping key.
    pub fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute(
            "INSERT OR REPLACE INTO meta (key, value) VALUES (?1, ?2)",
            rusqlite::params![key, value],
        )?;
        Ok(())
    }

    /// Returns `true` if the file carries a usable full-text index.
    pub(crate) fn fts_enabled(&self, conn: &Connection) -> bool {
        get_meta_on_conn(conn, schema::META_FTS_DISABLED)
            .ok()
            .flatten()
            .is_none()
    }

    // -- Maintenance ---------------------------------------------------------

    /// Rebuilds the database file, reclaiming space from deleted rows.
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute_batch("VACUUM")?;
        Ok(())
    }

    /// Refreshes the query planner's statistics.
    pub fn analyze(&self) -> Result<()> {
        let conn = self.lock_conn();
        conn.execute_batch("ANALYZE")?;
        Ok(())
    }

    /// The schema version of the open file.
    pub fn schema_version(&self) -> Result<i64> {
        let conn = self.lock_conn();
        Ok(read_user_version(&conn)?)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("prefix", &self.config.prefix)
            .finish_non_exhaustive()
    }
}

/// Sets connection pragmas: WAL for concurrent readers with serialized
/// writes, referential integrity on, 5-second busy wait.
fn configure_connection(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;",
    )?;
    Ok(())
}

fn read_user_version(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("PRAGMA user_version", [], |row| row.get(0))
}

fn get_meta_on_conn(conn: &Connection, key: &str) -> Result<Option<String>> {
    use rusqlite::OptionalExtension;
    Ok(conn
        .query_row(
            "SELECT value FROM meta WHERE key = ?1",
            [key],
            |row| row.get::<_, String>(0),
        )
        .optional()?)
}

/// Applies pending migrations in order, each in its own transaction.
///
/// Fails with an integrity error when the file was written by a newer build
/// (its version exceeds the migration list).
fn run_migrations(conn: &Connection) -> Result<()> {
    let current = read_user_version(conn)?;
    if current > schema::CURRENT_SCHEMA_VERSION {
        return Err(EngineError::Integrity(format!(
            "store schema version {current} is newer than supported version {}",
            schema::CURRENT_SCHEMA_VERSION
        )));
    }

    for migration in schema::MIGRATIONS {
        if migration.version <= current {
            continue;
        }
        apply_migration(conn, migration)?;
    }

    Ok(())
}

fn apply_migration(conn: &Connection, migration: &Migration) -> Result<()> {
    debug!(name = migration.name, version = migration.version, "applying migration");

    // The foreign-key pragma is a no-op inside a transaction, so rebuild
    // migrations toggle it around theirs.
    if migration.disable_foreign_keys {
        conn.execute_batch("PRAGMA foreign_keys = OFF")?;
    }

    let result = (|| -> Result<()> {
        let tx = conn.unchecked_transaction()?;
        match &migration.kind {
            MigrationKind::Sql(sql) => tx.execute_batch(sql).map_err(|e| {
                EngineError::Integrity(format!("migration {} failed: {e}", migration.name))
            })?,
            MigrationKind::Rust(f) => f(&tx)?,
        }
        tx.execute_batch(&format!("PRAGMA user_version = {}", migration.version))?;
        tx.commit()?;
        Ok(())
    })();

    if migration.disable_foreign_keys {
        conn.execute_batch("PRAGMA foreign_keys = ON")?;
    }

    result
}

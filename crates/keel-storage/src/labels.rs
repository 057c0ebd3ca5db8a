//! Labels: idempotent add/remove with composite identity (issue, name).

use chrono::Utc;
use rusqlite::params;

use keel_core::enums::EventType;
use keel_core::validation::validate_label;

use crate::error::{EngineError, Result};
use crate::events::emit_event;
use crate::issues::issue_exists;
use crate::store::Store;

impl Store {
    /// Adds a label. Re-adding is a no-op and journals nothing.
    pub fn add_label(&self, issue_id: &str, name: &str, actor: &str) -> Result<()> {
        validate_label(name)?;
        self.with_tx(|conn| {
            if !issue_exists(conn, issue_id)? {
                return Err(EngineError::not_found("issue", issue_id));
            }
            let affected = conn.execute(
                "INSERT OR IGNORE INTO labels (issue_id, name) VALUES (?1, ?2)",
                params![issue_id, name],
            )?;
            if affected > 0 {
                emit_event(
                    conn,
                    issue_id,
                    &EventType::LabelAdded,
                    actor,
                    None,
                    Some(name),
                    None,
                    Utc::now(),
                )?;
            }
            Ok(())
        })
    }

    /// Removes a label. Removing a missing label is a no-op.
    pub fn remove_label(&self, issue_id: &str, name: &str, actor: &str) -> Result<()> {
        self.with_tx(|conn| {
            if !issue_exists(conn, issue_id)? {
                return Err(EngineError::not_found("issue", issue_id));
            }
            let affected = conn.execute(
                "DELETE FROM labels WHERE issue_id = ?1 AND name = ?2",
                params![issue_id, name],
            )?;
            if affected > 0 {
                emit_event(
                    conn,
                    issue_id,
                    &EventType::LabelRemoved,
                    actor,
                    Some(name),
                    None,
                    None,
                    Utc::now(),
                )?;
            }
            Ok(())
        })
    }
}

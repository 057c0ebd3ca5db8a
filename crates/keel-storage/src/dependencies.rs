//! Dependency edges: add/remove with per-link-type cycle detection.

use std::collections::{HashSet, VecDeque};

use chrono::Utc;
use rusqlite::{Connection, params};

use keel_core::dependency::Dependency;
use keel_core::enums::{EventType, LinkType};

use crate::error::{EngineError, Result};
use crate::events::emit_event;
use crate::issues::{format_datetime, issue_exists, parse_datetime};
use crate::store::Store;

/// Inserts an edge on the given connection, rejecting self-edges and cycles.
///
/// The BFS and the insert run inside the caller's transaction so a
/// concurrent writer cannot slip a cycle in between them. Re-adding an
/// existing edge is a no-op (no event).
pub(crate) fn insert_dependency_on_conn(
    conn: &Connection,
    issue_id: &str,
    depends_on_id: &str,
    link_type: &LinkType,
    actor: &str,
) -> Result<()> {
    if issue_id == depends_on_id {
        return Err(EngineError::invalid("issue cannot depend on itself"));
    }
    detect_cycle(conn, issue_id, depends_on_id, link_type)?;

    let now = Utc::now();
    let affected = conn.execute(
        "INSERT OR IGNORE INTO dependencies (issue_id, depends_on_id, type, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![
            issue_id,
            depends_on_id,
            link_type.as_str(),
            format_datetime(&now)
        ],
    )?;

    if affected > 0 {
        emit_event(
            conn,
            issue_id,
            &EventType::DependencyAdded,
            actor,
            None,
            Some(depends_on_id),
            Some(link_type.as_str()),
            now,
        )?;
    }
    Ok(())
}

/// Detects whether adding `issue_id -> depends_on_id` would create a cycle
/// among edges of the same link type: BFS from `depends_on_id`, rejecting
/// if `issue_id` is reachable.
fn detect_cycle(
    conn: &Connection,
    issue_id: &str,
    depends_on_id: &str,
    link_type: &LinkType,
) -> Result<()> {
    let mut visited: HashSet<String> = HashSet::new();
    let mut queue: VecDeque<String> = VecDeque::new();
    queue.push_back(depends_on_id.to_owned());

    while let Some(current) = queue.pop_front() {
        if current == issue_id {
            return Err(EngineError::conflict(format!(
                "adding {issue_id} -> {depends_on_id} would create a {} cycle",
                link_type.as_str()
            )));
        }
        if !visited.insert(current.clone()) {
            continue;
        }
        let mut stmt = conn.prepare_cached(
            "SELECT depends_on_id FROM dependencies WHERE issue_id = ?1 AND type = ?2",
        )?;
        let rows = stmt.query_map(params![current, link_type.as_str()], |row| {
            row.get::<_, String>(0)
        })?;
        for row in rows {
            let next = row?;
            if !visited.contains(&next) {
                queue.push_back(next);
            }
        }
    }

    Ok(())
}

impl Store {
    /// Adds a dependency edge (`issue_id` depends on `depends_on_id`).
    /// `link_type` defaults to `blocks`.
    pub fn add_dependency(
        &self,
        issue_id: &str,
        depends_on_id: &str,
        link_type: Option<LinkType>,
        actor: &str,
    ) -> Result<()> {
        let link_type = link_type.unwrap_or_default();
        self.with_tx(|conn| {
            for id in [issue_id, depends_on_id] {
                if !issue_exists(conn, id)? {
                    return Err(EngineError::not_found("issue", id));
                }
            }
            insert_dependency_on_conn(conn, issue_id, depends_on_id, &link_type, actor)
        })
    }

    /// Removes a dependency edge. Idempotent: removing a missing edge
    /// succeeds quietly and journals nothing.
    pub fn remove_dependency(
        &self,
        issue_id: &str,
        depends_on_id: &str,
        link_type: Option<LinkType>,
        actor: &str,
    ) -> Result<()> {
        let link_type = link_type.unwrap_or_default();
        self.with_tx(|conn| {
            let affected = conn.execute(
                "DELETE FROM dependencies
                 WHERE issue_id = ?1 AND depends_on_id = ?2 AND type = ?3",
                params![issue_id, depends_on_id, link_type.as_str()],
            )?;
            if affected > 0 {
                emit_event(
                    conn,
                    issue_id,
                    &EventType::DependencyRemoved,
                    actor,
                    Some(depends_on_id),
                    None,
                    Some(link_type.as_str()),
                    Utc::now(),
                )?;
            }
            Ok(())
        })
    }

    /// Every edge in the store.
    pub fn get_all_dependencies(&self) -> Result<Vec<Dependency>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(
            "SELECT issue_id, depends_on_id, type, created_at
             FROM dependencies ORDER BY issue_id, depends_on_id, type",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok(Dependency {
                issue_id: row.get(0)?,
                depends_on_id: row.get(1)?,
                link_type: LinkType::from(row.get::<_, String>(2)?),
                created_at: parse_datetime(&row.get::<_, String>(3)?),
            })
        })?;
        let mut deps = Vec::new();
        for row in rows {
            deps.push(row?);
        }
        Ok(deps)
    }
}

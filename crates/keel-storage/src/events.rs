//! Append-only event journal: recording, history queries, and undo.

use chrono::{DateTime, Utc};
use rusqlite::{Connection, Row, params};

use keel_core::comment::Event;
use keel_core::enums::{Category, EventType};
use keel_core::fields::FieldMap;

use crate::error::{EngineError, Result};
use crate::issues::{apply_status_change, format_datetime, get_issue_row, parse_datetime};
use crate::store::Store;
use crate::types::UndoOutcome;

/// Appends one journal entry. Always called inside the transaction of the
/// mutation it records.
#[allow(clippy::too_many_arguments)]
pub(crate) fn emit_event(
    conn: &Connection,
    issue_id: &str,
    event_type: &EventType,
    actor: &str,
    old_value: Option<&str>,
    new_value: Option<&str>,
    comment: Option<&str>,
    created_at: DateTime<Utc>,
) -> Result<()> {
    conn.execute(
        "INSERT INTO events (issue_id, event_type, actor, old_value, new_value, comment, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            issue_id,
            event_type.as_str(),
            actor,
            old_value,
            new_value,
            comment,
            format_datetime(&created_at),
        ],
    )?;
    Ok(())
}

fn scan_event(row: &Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        event_type: EventType::from(row.get::<_, String>(2)?),
        actor: row.get(3)?,
        old_value: row.get(4)?,
        new_value: row.get(5)?,
        comment: row.get(6)?,
        created_at: parse_datetime(&row.get::<_, String>(7)?),
    })
}

const EVENT_COLUMNS: &str =
    "id, issue_id, event_type, actor, old_value, new_value, comment, created_at";

impl Store {
    /// Most recent events across all issues, newest first.
    pub fn get_recent_events(&self, limit: i64) -> Result<Vec<Event>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events ORDER BY id DESC LIMIT ?1"
        ))?;
        collect_events(stmt.query_map([limit], scan_event)?)
    }

    /// Events with id strictly greater than `since_id`, oldest first.
    /// Event ids are a dense total order per file, so this is the polling
    /// cursor for followers.
    pub fn get_events_since(&self, since_id: i64) -> Result<Vec<Event>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events WHERE id > ?1 ORDER BY id ASC"
        ))?;
        collect_events(stmt.query_map([since_id], scan_event)?)
    }

    /// One issue's journal, newest first.
    pub fn get_issue_events(&self, issue_id: &str, limit: i64) -> Result<Vec<Event>> {
        let conn = self.lock_conn();
        let mut stmt = conn.prepare(&format!(
            "SELECT {EVENT_COLUMNS} FROM events
             WHERE issue_id = ?1 ORDER BY id DESC LIMIT ?2"
        ))?;
        collect_events(stmt.query_map(params![issue_id, limit], scan_event)?)
    }

    /// Reverses the most recent reversible event for an issue.
    ///
    /// Only scalar `*_changed` events qualify; structural events are
    /// skipped. The reversal itself is journalled as a new event of the
    /// same type with old/new swapped, so history stays append-only.
    pub fn undo_last(&self, issue_id: &str, actor: &str) -> Result<UndoOutcome> {
        let registry = self.registry();
        let now = Utc::now();

        self.with_tx(|conn| {
            let mut issue = get_issue_row(conn, issue_id)?;

            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM events WHERE issue_id = ?1 ORDER BY id DESC"
            ))?;
            let events = collect_events(stmt.query_map([issue_id], scan_event)?)?;
            let Some(event) = events.into_iter().find(|e| e.event_type.is_reversible())
            else {
                return Ok(UndoOutcome {
                    undone: false,
                    event_type: None,
                    old_value: None,
                });
            };

            let restored = event.old_value.clone();
            match &event.event_type {
                EventType::TitleChanged => {
                    issue.title = restored.clone().unwrap_or_default();
                }
                EventType::PriorityChanged => {
                    issue.priority = restored
                        .as_deref()
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(issue.priority);
                }
                EventType::AssigneeChanged => {
                    issue.assignee = restored.clone().unwrap_or_default();
                }
                EventType::ParentChanged => {
                    issue.parent_id = restored.clone();
                }
                EventType::FieldsChanged => {
                    issue.fields = restored
                        .as_deref()
                        .map(|json| serde_json::from_str::<FieldMap>(json))
                        .transpose()?
                        .unwrap_or_default();
                }
                EventType::StatusChanged => {
                    // Status reversal goes through the shared path so
                    // closed_at tracks the category boundary; the extra
                    // status_changed event it writes doubles as the swapped
                    // journal entry.
                    let target = restored.clone().unwrap_or_else(|| {
                        registry.initial_state(&issue.issue_type)
                    });
                    apply_status_change(
                        conn, &registry, &mut issue, &target, None, actor, now,
                    )?;
                    return Ok(UndoOutcome {
                        undone: true,
                        event_type: Some(event.event_type),
                        old_value: restored,
                    });
                }
                _ => unreachable!("non-reversible event filtered above"),
            }

            issue.updated_at = now;
            write_issue_for_undo(conn, &issue)?;
            emit_event(
                conn,
                issue_id,
                &event.event_type,
                actor,
                event.new_value.as_deref(),
                event.old_value.as_deref(),
                None,
                now,
            )?;

            Ok(UndoOutcome {
                undone: true,
                event_type: Some(event.event_type),
                old_value: restored,
            })
        })
    }

}

fn write_issue_for_undo(conn: &Connection, issue: &keel_core::issue::Issue) -> Result<()> {
    conn.execute(
        "UPDATE issues SET title = ?2, priority = ?3, assignee = ?4, parent_id = ?5,
             fields = ?6, updated_at = ?7
         WHERE id = ?1",
        params![
            issue.id,
            issue.title,
            issue.priority,
            issue.assignee,
            issue.parent_id,
            serde_json::to_string(&issue.fields)?,
            format_datetime(&issue.updated_at),
        ],
    )?;
    Ok(())
}

fn collect_events(
    rows: impl Iterator<Item = rusqlite::Result<Event>>,
) -> Result<Vec<Event>> {
    let mut events = Vec::new();
    for row in rows {
        events.push(row.map_err(EngineError::from)?);
    }
    Ok(events)
}

/// Returns `true` if the event moves an issue into a wip-category state for
/// its type; flow metrics use this to find the start of cycle time.
pub(crate) fn enters_wip(
    registry: &keel_templates::TemplateRegistry,
    issue_type: &str,
    event: &Event,
) -> bool {
    event.event_type == EventType::StatusChanged
        && event
            .new_value
            .as_deref()
            .is_some_and(|s| registry.category(issue_type, s) == Category::Wip)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IssueUpdates, NewIssue};
    use keel_config::ProjectConfig;
    use keel_core::fields::FieldValue;

    fn test_store() -> Store {
        Store::open_in_memory(ProjectConfig::default()).unwrap()
    }

    #[test]
    fn event_ids_are_dense_and_ordered() {
        let store = test_store();
        let a = store.create_issue(NewIssue::new("a"), "t").unwrap();
        store.close_issue(&a.id, None, "t").unwrap();

        let events = store.get_events_since(0).unwrap();
        assert_eq!(events.len(), 2);
        assert!(events[0].id < events[1].id);
        assert_eq!(events[0].event_type, EventType::Created);
        assert_eq!(events[1].event_type, EventType::StatusChanged);

        let newer = store.get_events_since(events[0].id).unwrap();
        assert_eq!(newer.len(), 1);
    }

    #[test]
    fn recent_events_newest_first() {
        let store = test_store();
        let a = store.create_issue(NewIssue::new("a"), "t").unwrap();
        store
            .update_issue(
                &a.id,
                &IssueUpdates {
                    title: Some("b".into()),
                    ..IssueUpdates::default()
                },
                false,
                "t",
            )
            .unwrap();
        let events = store.get_recent_events(10).unwrap();
        assert_eq!(events[0].event_type, EventType::TitleChanged);
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn undo_title_roundtrip() {
        let store = test_store();
        let issue = store.create_issue(NewIssue::new("orig"), "t").unwrap();
        store
            .update_issue(
                &issue.id,
                &IssueUpdates {
                    title: Some("new".into()),
                    ..IssueUpdates::default()
                },
                false,
                "t",
            )
            .unwrap();

        let outcome = store.undo_last(&issue.id, "t").unwrap();
        assert!(outcome.undone);
        assert_eq!(outcome.event_type, Some(EventType::TitleChanged));
        assert_eq!(outcome.old_value.as_deref(), Some("orig"));
        assert_eq!(store.get_issue(&issue.id).unwrap().title, "orig");
    }

    #[test]
    fn undo_with_no_reversible_event() {
        let store = test_store();
        let issue = store.create_issue(NewIssue::new("only created"), "t").unwrap();
        store.add_label(&issue.id, "x", "t").unwrap();

        let outcome = store.undo_last(&issue.id, "t").unwrap();
        assert!(!outcome.undone);
        assert!(outcome.event_type.is_none());
        // Labels and creation are never reversed.
        assert_eq!(store.get_issue(&issue.id).unwrap().labels, vec!["x"]);
    }

    #[test]
    fn undo_status_restores_closed_at_semantics() {
        let store = test_store();
        let issue = store.create_issue(NewIssue::new("a"), "t").unwrap();
        store.close_issue(&issue.id, None, "t").unwrap();

        let outcome = store.undo_last(&issue.id, "t").unwrap();
        assert!(outcome.undone);
        assert_eq!(outcome.event_type, Some(EventType::StatusChanged));
        let back = store.get_issue(&issue.id).unwrap();
        assert_eq!(back.status, "open");
        assert!(back.closed_at.is_none());
    }

    #[test]
    fn undo_fields_restores_whole_bag() {
        let store = test_store();
        let mut new = NewIssue::new("bagged");
        new.fields.insert("a".into(), FieldValue::Text("1".into()));
        let issue = store.create_issue(new, "t").unwrap();

        let mut patch = FieldMap::new();
        patch.insert("a".into(), FieldValue::Text("2".into()));
        store
            .update_issue(
                &issue.id,
                &IssueUpdates {
                    fields: Some(patch),
                    ..IssueUpdates::default()
                },
                false,
                "t",
            )
            .unwrap();

        store.undo_last(&issue.id, "t").unwrap();
        let back = store.get_issue(&issue.id).unwrap();
        assert_eq!(back.fields.get("a"), Some(&FieldValue::Text("1".into())));
    }
}

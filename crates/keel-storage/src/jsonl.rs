//! JSONL export and import.
//!
//! One JSON object per line, each carrying a `_type` discriminator, in the
//! order issues, dependencies, labels, comments, events -- issues always
//! precede the records that reference them. Import shares one transaction
//! for the whole stream.

use std::io::{BufRead, Write};

use rusqlite::params;
use serde::{Deserialize, Serialize};
use tracing::info;

use keel_core::comment::{Comment, Event, Label};
use keel_core::dependency::Dependency;
use keel_core::issue::Issue;

use crate::error::{EngineError, Result};
use crate::events::emit_event;
use crate::issues::{ISSUE_COLUMNS, format_datetime, insert_issue_row, issue_exists, scan_issue};
use crate::store::Store;
use crate::types::{ImportMode, ImportReport};

/// One line of a keel JSONL stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "_type", rename_all = "snake_case")]
pub enum Record {
    Issue(Issue),
    Dependency(Dependency),
    Label(Label),
    Comment(Comment),
    Event(Event),
}

impl Store {
    /// Writes the full store content as JSONL.
    ///
    /// Issues are exported as bare rows; labels, edges, comments, and
    /// events follow as their own records.
    pub fn export_jsonl<W: Write>(&self, writer: &mut W) -> Result<u64> {
        let conn = self.lock_conn();
        let mut written = 0u64;

        let mut emit = |record: &Record, out: &mut W| -> Result<()> {
            serde_json::to_writer(&mut *out, record)?;
            out.write_all(b"\n")
                .map_err(|e| EngineError::Unknown(format!("export write failed: {e}")))?;
            written += 1;
            Ok(())
        };

        {
            let mut stmt = conn.prepare(&format!(
                "SELECT {ISSUE_COLUMNS} FROM issues ORDER BY created_at, id"
            ))?;
            let rows = stmt.query_map([], scan_issue)?;
            for row in rows {
                emit(&Record::Issue(row?), writer)?;
            }
        }
        {
            let mut stmt = conn.prepare(
                "SELECT issue_id, depends_on_id, type, created_at
                 FROM dependencies ORDER BY issue_id, depends_on_id, type",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(Dependency {
                    issue_id: row.get(0)?,
                    depends_on_id: row.get(1)?,
                    link_type: row.get::<_, String>(2)?.into(),
                    created_at: crate::issues::parse_datetime(&row.get::<_, String>(3)?),
                })
            })?;
            for row in rows {
                emit(&Record::Dependency(row?), writer)?;
            }
        }
        {
            let mut stmt =
                conn.prepare("SELECT issue_id, name FROM labels ORDER BY issue_id, name")?;
            let rows = stmt.query_map([], |row| {
                Ok(Label {
                    issue_id: row.get(0)?,
                    name: row.get(1)?,
                })
            })?;
            for row in rows {
                emit(&Record::Label(row?), writer)?;
            }
        }
        {
            let mut stmt = conn.prepare(
                "SELECT id, issue_id, author, text, created_at FROM comments ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(Comment {
                    id: row.get(0)?,
                    issue_id: row.get(1)?,
                    author: row.get(2)?,
                    text: row.get(3)?,
                    created_at: crate::issues::parse_datetime(&row.get::<_, String>(4)?),
                })
            })?;
            for row in rows {
                emit(&Record::Comment(row?), writer)?;
            }
        }
        {
            let mut stmt = conn.prepare(
                "SELECT id, issue_id, event_type, actor, old_value, new_value, comment, created_at
                 FROM events ORDER BY id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok(Event {
                    id: row.get(0)?,
                    issue_id: row.get(1)?,
                    event_type: row.get::<_, String>(2)?.into(),
                    actor: row.get(3)?,
                    old_value: row.get(4)?,
                    new_value: row.get(5)?,
                    comment: row.get(6)?,
                    created_at: crate::issues::parse_datetime(&row.get::<_, String>(7)?),
                })
            })?;
            for row in rows {
                emit(&Record::Event(row?), writer)?;
            }
        }

        writer
            .flush()
            .map_err(|e| EngineError::Unknown(format!("export flush failed: {e}")))?;
        info!(records = written, "exported JSONL");
        Ok(written)
    }

    /// Reads a JSONL stream into the store inside a single transaction.
    ///
    /// `merge` skips issues whose id already exists (and every record that
    /// references a skipped or pre-existing issue); `abort` fails the whole
    /// import on the first collision. Event and comment ids are reassigned.
    pub fn import_jsonl<R: BufRead>(&self, reader: R, mode: ImportMode) -> Result<ImportReport> {
        let mut report = ImportReport::default();
        let mut skipped_issues: std::collections::HashSet<String> =
            std::collections::HashSet::new();

        self.with_tx(|conn| {
            for (line_no, line) in reader.lines().enumerate() {
                let line = line
                    .map_err(|e| EngineError::Unknown(format!("import read failed: {e}")))?;
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                let record: Record = serde_json::from_str(trimmed).map_err(|e| {
                    EngineError::invalid(format!("bad record on line {}: {e}", line_no + 1))
                })?;

                match record {
                    Record::Issue(issue) => {
                        if issue.id.is_empty() {
                            return Err(EngineError::invalid(format!(
                                "issue record on line {} has no id",
                                line_no + 1
                            )));
                        }
                        if issue_exists(conn, &issue.id)? {
                            match mode {
                                ImportMode::Merge => {
                                    skipped_issues.insert(issue.id);
                                    report.skipped += 1;
                                }
                                ImportMode::Abort => {
                                    return Err(EngineError::conflict(format!(
                                        "issue {} already exists",
                                        issue.id
                                    )));
                                }
                            }
                        } else {
                            insert_issue_row(conn, &issue)?;
                            report.issues += 1;
                        }
                    }
                    Record::Dependency(dep) => {
                        if skipped_issues.contains(&dep.issue_id) {
                            continue;
                        }
                        require_issue(conn, &dep.issue_id, line_no)?;
                        require_issue(conn, &dep.depends_on_id, line_no)?;
                        conn.execute(
                            "INSERT OR IGNORE INTO dependencies
                                 (issue_id, depends_on_id, type, created_at)
                             VALUES (?1, ?2, ?3, ?4)",
                            params![
                                dep.issue_id,
                                dep.depends_on_id,
                                dep.link_type.as_str(),
                                format_datetime(&dep.created_at),
                            ],
                        )?;
                        report.dependencies += 1;
                    }
                    Record::Label(label) => {
                        if skipped_issues.contains(&label.issue_id) {
                            continue;
                        }
                        require_issue(conn, &label.issue_id, line_no)?;
                        conn.execute(
                            "INSERT OR IGNORE INTO labels (issue_id, name) VALUES (?1, ?2)",
                            params![label.issue_id, label.name],
                        )?;
                        report.labels += 1;
                    }
                    Record::Comment(comment) => {
                        if skipped_issues.contains(&comment.issue_id) {
                            continue;
                        }
                        require_issue(conn, &comment.issue_id, line_no)?;
                        conn.execute(
                            "INSERT INTO comments (issue_id, author, text, created_at)
                             VALUES (?1, ?2, ?3, ?4)",
                            params![
                                comment.issue_id,
                                comment.author,
                                comment.text,
                                format_datetime(&comment.created_at),
                            ],
                        )?;
                        report.comments += 1;
                    }
                    Record::Event(event) => {
                        if skipped_issues.contains(&event.issue_id) {
                            continue;
                        }
                        require_issue(conn, &event.issue_id, line_no)?;
                        emit_event(
                            conn,
                            &event.issue_id,
                            &event.event_type,
                            &event.actor,
                            event.old_value.as_deref(),
                            event.new_value.as_deref(),
                            event.comment.as_deref(),
                            event.created_at,
                        )?;
                        report.events += 1;
                    }
                }
            }
            Ok(())
        })?;

        info!(
            issues = report.issues,
            skipped = report.skipped,
            "imported JSONL"
        );
        Ok(report)
    }
}

fn require_issue(conn: &rusqlite::Connection, id: &str, line_no: usize) -> Result<()> {
    if !issue_exists(conn, id)? {
        return Err(EngineError::invalid(format!(
            "record on line {} references unknown issue {id}",
            line_no + 1
        )));
    }
    Ok(())
}

//! Comments on issues.

use chrono::Utc;
use rusqlite::params;

use keel_core::comment::Comment;
use keel_core::enums::EventType;

use crate::error::{EngineError, Result};
use crate::events::emit_event;
use crate::issues::{format_datetime, issue_exists, parse_datetime};
use crate::store::Store;

impl Store {
    /// Adds a comment and journals a `comment_added` event.
    pub fn add_comment(&self, issue_id: &str, author: &str, text: &str) -> Result<Comment> {
        if text.trim().is_empty() {
            return Err(EngineError::invalid("comment text must not be empty"));
        }
        let now = Utc::now();
        self.with_tx(|conn| {
            if !issue_exists(conn, issue_id)? {
                return Err(EngineError::not_found("issue", issue_id));
            }
            conn.execute(
                "INSERT INTO comments (issue_id, author, text, created_at)
                 VALUES (?1, ?2, ?3, ?4)",
                params![issue_id, author, text, format_datetime(&now)],
            )?;
            let id = conn.last_insert_rowid();
            emit_event(
                conn,
                issue_id,
                &EventType::CommentAdded,
                author,
                None,
                None,
                Some(text),
                now,
            )?;
            Ok(Comment {
                id,
                issue_id: issue_id.to_owned(),
                author: author.to_owned(),
                text: text.to_owned(),
                created_at: now,
            })
        })
    }

    /// All comments on an issue, oldest first.
    pub fn get_comments(&self, issue_id: &str) -> Result<Vec<Comment>> {
        let conn = self.lock_conn();
        if !issue_exists(&conn, issue_id)? {
            return Err(EngineError::not_found("issue", issue_id));
        }
        let mut stmt = conn.prepare(
            "SELECT id, issue_id, author, text, created_at
             FROM comments WHERE issue_id = ?1 ORDER BY created_at, id",
        )?;
        let rows = stmt.query_map([issue_id], |row| {
            Ok(Comment {
                id: row.get(0)?,
                issue_id: row.get(1)?,
                author: row.get(2)?,
                text: row.get(3)?,
                created_at: parse_datetime(&row.get::<_, String>(4)?),
            })
        })?;
        let mut comments = Vec::new();
        for row in rows {
            comments.push(row?);
        }
        Ok(comments)
    }
}

//! Issue engine: create/read/update/close/reopen/claim/release, batched
//! hydration, list and search, batch operations.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use rusqlite::types::ToSql;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

use keel_core::enums::{Category, EventType, LinkType};
use keel_core::fields::{FieldMap, merge_fields};
use keel_core::filter::{ClaimFilter, IssueFilter, escape_like};
use keel_core::idgen;
use keel_core::issue::Issue;
use keel_core::validation::{validate_label, validate_priority, validate_title};
use keel_core::dependency::DependencyRef;
use keel_templates::TemplateRegistry;

use crate::categories::CategorySql;
use crate::dependencies::insert_dependency_on_conn;
use crate::error::{EngineError, Result};
use crate::events::emit_event;
use crate::store::Store;
use crate::types::{BatchFailure, BatchOutcome, CloseOutcome, IssueUpdates, NewIssue};

// ---------------------------------------------------------------------------
// Column list and row scanning
// ---------------------------------------------------------------------------

/// All issue columns in a deterministic order for SELECT queries.
pub(crate) const ISSUE_COLUMNS: &str = "id, title, description, notes, status, priority, \
     issue_type, parent_id, assignee, created_at, updated_at, closed_at, close_reason, fields";

/// Same list prefixed with an alias for JOIN queries.
pub(crate) fn issue_columns(alias: &str) -> String {
    ISSUE_COLUMNS
        .split(", ")
        .map(|c| format!("{alias}.{c}"))
        .collect::<Vec<_>>()
        .join(", ")
}

/// Deserializes a row into an [`Issue`]. Column order must match
/// [`ISSUE_COLUMNS`]; relational fields are left for hydration.
pub(crate) fn scan_issue(row: &Row<'_>) -> rusqlite::Result<Issue> {
    let fields_json: String = row.get(13)?;
    let fields: FieldMap = serde_json::from_str(&fields_json).unwrap_or_default();
    Ok(Issue {
        id: row.get(0)?,
        title: row.get(1)?,
        description: row.get(2)?,
        notes: row.get(3)?,
        status: row.get(4)?,
        priority: row.get(5)?,
        issue_type: row.get(6)?,
        parent_id: row.get(7)?,
        assignee: row.get(8)?,
        created_at: parse_datetime(&row.get::<_, String>(9)?),
        updated_at: parse_datetime(&row.get::<_, String>(10)?),
        closed_at: row.get::<_, Option<String>>(11)?.as_deref().map(parse_datetime),
        close_reason: row.get(12)?,
        fields,
        labels: Vec::new(),
        dependencies: Vec::new(),
        dependents: Vec::new(),
        children: Vec::new(),
        open_blockers: 0,
        is_ready: false,
    })
}

// ---------------------------------------------------------------------------
// Time helpers
// ---------------------------------------------------------------------------

/// Formats a `DateTime<Utc>` as ISO 8601 TEXT for the store.
pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

/// Parses an ISO 8601 TEXT string from the store.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    s.parse::<DateTime<Utc>>().unwrap_or_else(|_| {
        chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.fZ")
            .or_else(|_| chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S"))
            .map(|ndt| ndt.and_utc())
            .unwrap_or_else(|_| Utc::now())
    })
}

// ---------------------------------------------------------------------------
// Connection-level helpers shared across modules
// ---------------------------------------------------------------------------

pub(crate) fn issue_exists(conn: &Connection, id: &str) -> Result<bool> {
    let found: Option<i64> = conn
        .query_row("SELECT 1 FROM issues WHERE id = ?1", [id], |row| row.get(0))
        .optional()?;
    Ok(found.is_some())
}

/// Loads the raw issue row, without hydration.
pub(crate) fn get_issue_row(conn: &Connection, id: &str) -> Result<Issue> {
    conn.query_row(
        &format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE id = ?1"),
        [id],
        scan_issue,
    )
    .optional()?
    .ok_or_else(|| EngineError::not_found("issue", id))
}

/// Inserts a full issue row. Caller owns event emission.
pub(crate) fn insert_issue_row(conn: &Connection, issue: &Issue) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO issues ({ISSUE_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)"
        ),
        params![
            issue.id,
            issue.title,
            issue.description,
            issue.notes,
            issue.status,
            issue.priority,
            issue.issue_type,
            issue.parent_id,
            issue.assignee,
            format_datetime(&issue.created_at),
            format_datetime(&issue.updated_at),
            issue.closed_at.as_ref().map(format_datetime),
            issue.close_reason,
            serde_json::to_string(&issue.fields)?,
        ],
    )?;
    Ok(())
}

/// Rewrites the mutable columns of an existing issue row.
fn write_issue_row(conn: &Connection, issue: &Issue) -> Result<()> {
    conn.execute(
        "UPDATE issues SET title = ?2, description = ?3, notes = ?4, status = ?5,
             priority = ?6, parent_id = ?7, assignee = ?8, updated_at = ?9,
             closed_at = ?10, close_reason = ?11, fields = ?12
         WHERE id = ?1",
        params![
            issue.id,
            issue.title,
            issue.description,
            issue.notes,
            issue.status,
            issue.priority,
            issue.parent_id,
            issue.assignee,
            format_datetime(&issue.updated_at),
            issue.closed_at.as_ref().map(format_datetime),
            issue.close_reason,
            serde_json::to_string(&issue.fields)?,
        ],
    )?;
    Ok(())
}

/// Allocates a fresh id with a per-attempt existence check: up to
/// [`idgen::MAX_ATTEMPTS`] tries at the default width, then one attempt at
/// the fallback width, then a conflict.
pub(crate) fn allocate_id(
    conn: &Connection,
    prefix: &str,
    title: &str,
    created_at: DateTime<Utc>,
) -> Result<String> {
    for nonce in 0..idgen::MAX_ATTEMPTS {
        let id = idgen::generate_id(prefix, title, created_at, nonce, idgen::DEFAULT_HEX_LEN);
        if !issue_exists(conn, &id)? {
            return Ok(id);
        }
    }
    let id = idgen::generate_id(
        prefix,
        title,
        created_at,
        idgen::MAX_ATTEMPTS,
        idgen::FALLBACK_HEX_LEN,
    );
    if issue_exists(conn, &id)? {
        return Err(EngineError::conflict(format!(
            "could not allocate a unique id for prefix {prefix:?} after retry exhaustion"
        )));
    }
    Ok(id)
}

/// Walks the parent chain from `start`, returning `true` if it reaches
/// `target`. The chain is finite by invariant; a visited set guards against
/// corrupt data.
fn parent_chain_reaches(conn: &Connection, start: &str, target: &str) -> Result<bool> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut current = Some(start.to_owned());
    while let Some(id) = current {
        if id == target {
            return Ok(true);
        }
        if !seen.insert(id.clone()) {
            return Ok(false);
        }
        current = conn
            .query_row("SELECT parent_id FROM issues WHERE id = ?1", [&id], |row| {
                row.get::<_, Option<String>>(0)
            })
            .optional()?
            .flatten();
    }
    Ok(false)
}

fn sql_placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

// ---------------------------------------------------------------------------
// Batched hydration
// ---------------------------------------------------------------------------

/// Fills the relational fields of a batch of issues in O(1) queries:
/// labels, edges in both directions (with titles), children, and open
/// blocker counts. Never issues per-issue follow-up queries.
pub(crate) fn hydrate_issues(
    conn: &Connection,
    registry: &TemplateRegistry,
    mut issues: Vec<Issue>,
) -> Result<Vec<Issue>> {
    if issues.is_empty() {
        return Ok(issues);
    }
    let ids: Vec<String> = issues.iter().map(|i| i.id.clone()).collect();
    let marks = sql_placeholders(ids.len());
    let id_params: Vec<&dyn ToSql> = ids.iter().map(|id| id as &dyn ToSql).collect();

    let mut labels: HashMap<String, Vec<String>> = HashMap::new();
    {
        let mut stmt = conn.prepare(&format!(
            "SELECT issue_id, name FROM labels WHERE issue_id IN ({marks}) ORDER BY name"
        ))?;
        let rows = stmt.query_map(id_params.as_slice(), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (id, name) = row?;
            labels.entry(id).or_default().push(name);
        }
    }

    let mut deps_out: HashMap<String, Vec<DependencyRef>> = HashMap::new();
    {
        let mut stmt = conn.prepare(&format!(
            "SELECT d.issue_id, d.depends_on_id, d.type, i.title
             FROM dependencies d JOIN issues i ON i.id = d.depends_on_id
             WHERE d.issue_id IN ({marks}) ORDER BY d.created_at"
        ))?;
        let rows = stmt.query_map(id_params.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                DependencyRef {
                    id: row.get(1)?,
                    link_type: LinkType::from(row.get::<_, String>(2)?),
                    title: row.get(3)?,
                },
            ))
        })?;
        for row in rows {
            let (id, dep) = row?;
            deps_out.entry(id).or_default().push(dep);
        }
    }

    let mut deps_in: HashMap<String, Vec<DependencyRef>> = HashMap::new();
    {
        let mut stmt = conn.prepare(&format!(
            "SELECT d.depends_on_id, d.issue_id, d.type, i.title
             FROM dependencies d JOIN issues i ON i.id = d.issue_id
             WHERE d.depends_on_id IN ({marks}) ORDER BY d.created_at"
        ))?;
        let rows = stmt.query_map(id_params.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                DependencyRef {
                    id: row.get(1)?,
                    link_type: LinkType::from(row.get::<_, String>(2)?),
                    title: row.get(3)?,
                },
            ))
        })?;
        for row in rows {
            let (id, dep) = row?;
            deps_in.entry(id).or_default().push(dep);
        }
    }

    let mut children: HashMap<String, Vec<String>> = HashMap::new();
    {
        let mut stmt = conn.prepare(&format!(
            "SELECT parent_id, id FROM issues
             WHERE parent_id IN ({marks}) ORDER BY created_at"
        ))?;
        let rows = stmt.query_map(id_params.as_slice(), |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for row in rows {
            let (parent, child) = row?;
            children.entry(parent).or_default().push(child);
        }
    }

    // Blocker rows are classified in memory against the registry so the
    // category logic lives in exactly one place.
    let mut open_blockers: HashMap<String, i64> = HashMap::new();
    {
        let mut stmt = conn.prepare(&format!(
            "SELECT d.issue_id, b.issue_type, b.status
             FROM dependencies d JOIN issues b ON b.id = d.depends_on_id
             WHERE d.issue_id IN ({marks}) AND d.type = 'blocks'"
        ))?;
        let rows = stmt.query_map(id_params.as_slice(), |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
            ))
        })?;
        for row in rows {
            let (id, blocker_type, blocker_status) = row?;
            if registry.category(&blocker_type, &blocker_status) != Category::Done {
                *open_blockers.entry(id).or_default() += 1;
            }
        }
    }

    for issue in &mut issues {
        issue.labels = labels.remove(&issue.id).unwrap_or_default();
        issue.dependencies = deps_out.remove(&issue.id).unwrap_or_default();
        issue.dependents = deps_in.remove(&issue.id).unwrap_or_default();
        issue.children = children.remove(&issue.id).unwrap_or_default();
        issue.open_blockers = open_blockers.remove(&issue.id).unwrap_or_default();
        issue.is_ready = registry.category(&issue.issue_type, &issue.status) == Category::Open
            && issue.open_blockers == 0;
    }

    Ok(issues)
}

pub(crate) fn hydrate_one(
    conn: &Connection,
    registry: &TemplateRegistry,
    id: &str,
) -> Result<Issue> {
    let issue = get_issue_row(conn, id)?;
    let mut hydrated = hydrate_issues(conn, registry, vec![issue])?;
    Ok(hydrated.remove(0))
}

// ---------------------------------------------------------------------------
// Internal update plumbing (shared by update/close/reopen/undo)
// ---------------------------------------------------------------------------

/// Applies a status change to a loaded row: flips closed_at/close_reason on
/// category boundaries, stamps updated_at, writes the row, and journals a
/// `status_changed` event.
pub(crate) fn apply_status_change(
    conn: &Connection,
    registry: &TemplateRegistry,
    issue: &mut Issue,
    new_status: &str,
    close_reason: Option<&str>,
    actor: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    let old_status = issue.status.clone();
    let new_category = registry.category(&issue.issue_type, new_status);

    issue.status = new_status.to_owned();
    if new_category == Category::Done {
        if issue.closed_at.is_none() {
            issue.closed_at = Some(now);
        }
        if let Some(reason) = close_reason {
            issue.close_reason = reason.to_owned();
        }
    } else {
        issue.closed_at = None;
        issue.close_reason.clear();
    }
    issue.updated_at = now;

    write_issue_row(conn, issue)?;
    emit_event(
        conn,
        &issue.id,
        &EventType::StatusChanged,
        actor,
        Some(&old_status),
        Some(new_status),
        close_reason,
        now,
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Store methods
// ---------------------------------------------------------------------------

impl Store {
    /// Creates an issue: generates an id, resolves the initial state from
    /// the type template, and atomically writes the issue, its labels, its
    /// blocker edges, and the `created` event.
    pub fn create_issue(&self, new: NewIssue, actor: &str) -> Result<Issue> {
        validate_title(&new.title)?;
        let priority = new.priority.unwrap_or(2);
        validate_priority(priority)?;
        for label in &new.labels {
            validate_label(label)?;
        }

        let issue_type = new.issue_type.unwrap_or_else(|| "task".to_owned());
        let registry = self.registry();
        let status = registry.initial_state(&issue_type);

        // Fill schema defaults, then gate on the initial state's required
        // fields (hard enforcement at creation).
        let mut fields = new.fields;
        if let Some(template) = registry.get_type(&issue_type) {
            for schema in &template.fields {
                if let Some(default) = &schema.default {
                    fields.entry(schema.name.clone()).or_insert(default.clone());
                }
            }
        }
        let missing = registry.missing_required_at(&issue_type, &status, &fields);
        if !missing.is_empty() {
            return Err(EngineError::invalid(format!(
                "fields required at creation for type {issue_type:?}: {}",
                missing.join(", ")
            )));
        }

        let now = Utc::now();
        self.with_tx(|conn| {
            if let Some(parent) = &new.parent_id {
                if !issue_exists(conn, parent)? {
                    return Err(EngineError::invalid(format!(
                        "parent issue not found: {parent}"
                    )));
                }
            }
            for target in &new.deps {
                if !issue_exists(conn, target)? {
                    return Err(EngineError::not_found("issue", target));
                }
            }

            let id = allocate_id(conn, &self.config.prefix, &new.title, now)?;
            let issue = Issue {
                id: id.clone(),
                title: new.title.clone(),
                description: new.description.clone(),
                notes: new.notes.clone(),
                status: status.clone(),
                priority,
                issue_type: issue_type.clone(),
                parent_id: new.parent_id.clone(),
                assignee: new.assignee.clone().unwrap_or_default(),
                created_at: now,
                updated_at: now,
                closed_at: None,
                close_reason: String::new(),
                fields: fields.clone(),
                ..Issue::default()
            };
            insert_issue_row(conn, &issue)?;

            for label in &new.labels {
                conn.execute(
                    "INSERT OR IGNORE INTO labels (issue_id, name) VALUES (?1, ?2)",
                    params![id, label],
                )?;
            }
            for target in &new.deps {
                insert_dependency_on_conn(conn, &id, target, &LinkType::Blocks, actor)?;
            }

            emit_event(conn, &id, &EventType::Created, actor, None, None, None, now)?;
            debug!(id = %id, issue_type = %issue_type, "issue created");
            hydrate_one(conn, &registry, &id)
        })
    }

    /// Loads one fully hydrated issue.
    pub fn get_issue(&self, id: &str) -> Result<Issue> {
        let registry = self.registry();
        let conn = self.lock_conn();
        hydrate_one(&conn, &registry, id)
    }

    /// Child issues of `id`, ordered by creation time.
    pub fn get_children(&self, id: &str) -> Result<Vec<Issue>> {
        let registry = self.registry();
        let conn = self.lock_conn();
        if !issue_exists(&conn, id)? {
            return Err(EngineError::not_found("issue", id));
        }
        let mut stmt = conn.prepare(&format!(
            "SELECT {ISSUE_COLUMNS} FROM issues WHERE parent_id = ?1 ORDER BY created_at"
        ))?;
        let rows = stmt.query_map([id], scan_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        hydrate_issues(&conn, &registry, issues)
    }

    /// Applies a typed partial update.
    ///
    /// Status changes are validated against the type's template unless
    /// `skip_transition_check` is set (reserved for admin paths like
    /// close/reopen that police the category boundary instead). Soft gate
    /// misses journal `transition_warning` events and proceed.
    pub fn update_issue(
        &self,
        id: &str,
        updates: &IssueUpdates,
        skip_transition_check: bool,
        actor: &str,
    ) -> Result<Issue> {
        let registry = self.registry();
        let now = Utc::now();

        self.with_tx(|conn| {
            let before = get_issue_row(conn, id)?;
            let mut after = before.clone();
            let mut changed = false;

            // Fields merge first so transition gates see the patched bag.
            if let Some(patch) = &updates.fields {
                merge_fields(&mut after.fields, patch);
            }

            if let Some(title) = &updates.title {
                validate_title(title)?;
                after.title = title.clone();
            }
            if let Some(description) = &updates.description {
                after.description = description.clone();
            }
            if let Some(notes) = &updates.notes {
                after.notes = notes.clone();
            }
            if let Some(priority) = updates.priority {
                validate_priority(priority)?;
                after.priority = priority;
            }
            if let Some(assignee) = &updates.assignee {
                after.assignee = assignee.clone();
            }
            if let Some(parent) = &updates.parent_id {
                match parent {
                    None => after.parent_id = None,
                    Some(new_parent) => {
                        if new_parent == id {
                            return Err(EngineError::invalid(
                                "issue cannot be its own parent",
                            ));
                        }
                        if !issue_exists(conn, new_parent)? {
                            return Err(EngineError::invalid(format!(
                                "parent issue not found: {new_parent}"
                            )));
                        }
                        if parent_chain_reaches(conn, new_parent, id)? {
                            return Err(EngineError::conflict(format!(
                                "reparenting under {new_parent} would create a parent cycle"
                            )));
                        }
                        after.parent_id = Some(new_parent.clone());
                    }
                }
            }

            // Status last: validated against the patched fields.
            let mut status_change: Option<String> = None;
            if let Some(status) = &updates.status {
                if *status != before.status {
                    if !registry.is_known_state(&before.issue_type, status) {
                        return Err(EngineError::invalid(format!(
                            "unknown state {status:?} for type {:?}",
                            before.issue_type
                        )));
                    }
                    if !skip_transition_check {
                        let check = registry.validate_transition(
                            &before.issue_type,
                            &before.status,
                            status,
                            &after.fields,
                        );
                        if !check.allowed {
                            let valid = registry
                                .valid_transitions(&before.issue_type, &before.status, &after.fields)
                                .into_iter()
                                .map(|t| t.to)
                                .collect();
                            return Err(EngineError::InvalidTransition {
                                issue_type: before.issue_type.clone(),
                                from: before.status.clone(),
                                to: status.clone(),
                                missing_fields: check.missing_fields,
                                valid_transitions: valid,
                            });
                        }
                        for warning in &check.warnings {
                            emit_event(
                                conn,
                                id,
                                &EventType::TransitionWarning,
                                actor,
                                Some(&before.status),
                                Some(status),
                                Some(warning),
                                now,
                            )?;
                        }
                    }
                    status_change = Some(status.clone());
                }
            }

            // Journal scalar changes; description and notes are
            // intentionally unjournalled.
            if after.title != before.title {
                emit_event(
                    conn,
                    id,
                    &EventType::TitleChanged,
                    actor,
                    Some(&before.title),
                    Some(&after.title),
                    None,
                    now,
                )?;
                changed = true;
            }
            if after.priority != before.priority {
                emit_event(
                    conn,
                    id,
                    &EventType::PriorityChanged,
                    actor,
                    Some(&before.priority.to_string()),
                    Some(&after.priority.to_string()),
                    None,
                    now,
                )?;
                changed = true;
            }
            if after.assignee != before.assignee {
                emit_event(
                    conn,
                    id,
                    &EventType::AssigneeChanged,
                    actor,
                    Some(&before.assignee),
                    Some(&after.assignee),
                    None,
                    now,
                )?;
                changed = true;
            }
            if after.parent_id != before.parent_id {
                emit_event(
                    conn,
                    id,
                    &EventType::ParentChanged,
                    actor,
                    before.parent_id.as_deref(),
                    after.parent_id.as_deref(),
                    None,
                    now,
                )?;
                changed = true;
            }
            if after.fields != before.fields {
                emit_event(
                    conn,
                    id,
                    &EventType::FieldsChanged,
                    actor,
                    Some(&serde_json::to_string(&before.fields)?),
                    Some(&serde_json::to_string(&after.fields)?),
                    None,
                    now,
                )?;
                changed = true;
            }
            changed |= after.description != before.description || after.notes != before.notes;

            if let Some(status) = status_change {
                // Writes the row and journals status_changed.
                after.status = before.status.clone();
                apply_status_change(conn, &registry, &mut after, &status, None, actor, now)?;
            } else if changed {
                after.updated_at = now;
                write_issue_row(conn, &after)?;
            }

            hydrate_one(conn, &registry, id)
        })
    }

    /// Closes an issue to the type's first `done` state and reports the
    /// issues this close unblocked.
    pub fn close_issue(
        &self,
        id: &str,
        reason: Option<&str>,
        actor: &str,
    ) -> Result<CloseOutcome> {
        let registry = self.registry();
        let now = Utc::now();

        self.with_tx(|conn| {
            let mut issue = get_issue_row(conn, id)?;
            if registry.category(&issue.issue_type, &issue.status) == Category::Done {
                return Err(EngineError::conflict(format!(
                    "issue {id} is already closed"
                )));
            }

            // Blocked -> ready delta: dependents that are category-open and
            // whose only remaining open blocker is this issue.
            let mut blockers_of: HashMap<String, Vec<String>> = HashMap::new();
            let mut dependent_open: HashMap<String, bool> = HashMap::new();
            {
                let mut stmt = conn.prepare(
                    "SELECT d1.issue_id, y.issue_type, y.status,
                            b.id, b.issue_type, b.status
                     FROM dependencies d1
                     JOIN issues y ON y.id = d1.issue_id
                     JOIN dependencies d2 ON d2.issue_id = d1.issue_id AND d2.type = 'blocks'
                     JOIN issues b ON b.id = d2.depends_on_id
                     WHERE d1.depends_on_id = ?1 AND d1.type = 'blocks'",
                )?;
                let rows = stmt.query_map([id], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                    ))
                })?;
                for row in rows {
                    let (y, y_type, y_status, b, b_type, b_status) = row?;
                    dependent_open.insert(
                        y.clone(),
                        registry.category(&y_type, &y_status) == Category::Open,
                    );
                    if registry.category(&b_type, &b_status) != Category::Done {
                        blockers_of.entry(y).or_default().push(b);
                    }
                }
            }

            let target = registry.first_done_state(&issue.issue_type);
            apply_status_change(conn, &registry, &mut issue, &target, reason, actor, now)?;

            let mut unblocked_ids: Vec<String> = blockers_of
                .into_iter()
                .filter(|(y, blockers)| {
                    dependent_open.get(y).copied().unwrap_or(false)
                        && blockers.iter().all(|b| b == id)
                })
                .map(|(y, _)| y)
                .collect();
            unblocked_ids.sort();

            let issue = hydrate_one(conn, &registry, id)?;
            let mut rows = Vec::with_capacity(unblocked_ids.len());
            for y in &unblocked_ids {
                rows.push(get_issue_row(conn, y)?);
            }
            let mut newly_unblocked = hydrate_issues(conn, &registry, rows)?;
            newly_unblocked.sort_by(|a, b| {
                a.priority
                    .cmp(&b.priority)
                    .then_with(|| a.created_at.cmp(&b.created_at))
            });

            debug!(id = %id, unblocked = newly_unblocked.len(), "issue closed");
            Ok(CloseOutcome {
                issue,
                newly_unblocked,
            })
        })
    }

    /// Restores a closed issue to its type's initial state.
    pub fn reopen_issue(&self, id: &str, actor: &str) -> Result<Issue> {
        let registry = self.registry();
        let now = Utc::now();
        self.with_tx(|conn| {
            let mut issue = get_issue_row(conn, id)?;
            if registry.category(&issue.issue_type, &issue.status) != Category::Done {
                return Err(EngineError::conflict(format!("issue {id} is not closed")));
            }
            let target = registry.initial_state(&issue.issue_type);
            apply_status_change(conn, &registry, &mut issue, &target, None, actor, now)?;
            hydrate_one(conn, &registry, id)
        })
    }

    /// Optimistic single-assignee lock: a conditional update gated on the
    /// assignee being unset, with a rowcount check. Assignment only; the
    /// status does not change.
    pub fn claim_issue(&self, id: &str, assignee: &str, actor: &str) -> Result<Issue> {
        if assignee.is_empty() {
            return Err(EngineError::invalid("assignee must not be empty"));
        }
        let registry = self.registry();
        let now = Utc::now();
        self.with_tx(|conn| {
            let affected = conn.execute(
                "UPDATE issues SET assignee = ?1, updated_at = ?2
                 WHERE id = ?3 AND assignee = ''",
                params![assignee, format_datetime(&now), id],
            )?;
            if affected == 0 {
                let current = get_issue_row(conn, id)?;
                return Err(EngineError::conflict(format!(
                    "issue {id} already claimed by {}",
                    current.assignee
                )));
            }
            emit_event(
                conn,
                id,
                &EventType::Claimed,
                actor,
                None,
                Some(assignee),
                None,
                now,
            )?;
            hydrate_one(conn, &registry, id)
        })
    }

    /// Mirror of claim: clears the assignee gated on it being present.
    pub fn release_claim(&self, id: &str, actor: &str) -> Result<Issue> {
        let registry = self.registry();
        let now = Utc::now();
        self.with_tx(|conn| {
            let current = get_issue_row(conn, id)?;
            if current.assignee.is_empty() {
                return Err(EngineError::conflict(format!("issue {id} is not claimed")));
            }
            let affected = conn.execute(
                "UPDATE issues SET assignee = '', updated_at = ?1
                 WHERE id = ?2 AND assignee = ?3",
                params![format_datetime(&now), id, current.assignee],
            )?;
            if affected == 0 {
                return Err(EngineError::conflict(format!(
                    "claim on {id} changed concurrently"
                )));
            }
            emit_event(
                conn,
                id,
                &EventType::Released,
                actor,
                Some(&current.assignee),
                None,
                None,
                now,
            )?;
            hydrate_one(conn, &registry, id)
        })
    }

    /// Claims the highest-priority ready, unclaimed issue matching the
    /// filter. Returns `None` when no ready work matches.
    pub fn claim_next(
        &self,
        assignee: &str,
        filter: &ClaimFilter,
        actor: &str,
    ) -> Result<Option<Issue>> {
        if assignee.is_empty() {
            return Err(EngineError::invalid("assignee must not be empty"));
        }
        let registry = self.registry();
        let cat = CategorySql::new(&registry);
        let now = Utc::now();

        self.with_tx(|conn| {
            let mut params: Vec<Box<dyn ToSql>> = Vec::new();
            cat.push_params(&mut params);

            let mut where_clauses = vec![cat.ready_condition("i"), "i.assignee = ''".to_owned()];
            if let Some(issue_type) = &filter.issue_type {
                where_clauses.push("i.issue_type = ?".to_owned());
                params.push(Box::new(issue_type.clone()));
            }
            if let Some(min) = filter.priority_min {
                where_clauses.push("i.priority >= ?".to_owned());
                params.push(Box::new(min));
            }
            if let Some(max) = filter.priority_max {
                where_clauses.push("i.priority <= ?".to_owned());
                params.push(Box::new(max));
            }

            let sql = format!(
                "{}SELECT i.id FROM issues i WHERE {} \
                 ORDER BY i.priority ASC, i.created_at ASC LIMIT 1",
                cat.with_clause(),
                where_clauses.join(" AND ")
            );
            let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
            let picked: Option<String> = conn
                .query_row(&sql, param_refs.as_slice(), |row| row.get(0))
                .optional()?;

            let Some(id) = picked else {
                return Ok(None);
            };

            let affected = conn.execute(
                "UPDATE issues SET assignee = ?1, updated_at = ?2
                 WHERE id = ?3 AND assignee = ''",
                params![assignee, format_datetime(&now), &id],
            )?;
            if affected == 0 {
                return Err(EngineError::conflict(format!(
                    "issue {id} was claimed concurrently"
                )));
            }
            emit_event(
                conn,
                &id,
                &EventType::Claimed,
                actor,
                None,
                Some(assignee),
                None,
                now,
            )?;
            Ok(Some(hydrate_one(conn, &registry, &id)?))
        })
    }

    /// Paginated filtered listing. Every result carries `is_ready`,
    /// computed in the hydration pass.
    pub fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>> {
        let registry = self.registry();
        let conn = self.lock_conn();

        let mut where_clauses: Vec<String> = Vec::new();
        let mut params: Vec<Box<dyn ToSql>> = Vec::new();

        if let Some(status) = &filter.status {
            where_clauses.push("status = ?".to_owned());
            params.push(Box::new(status.clone()));
        } else if !filter.include_archived {
            where_clauses.push("status != 'archived'".to_owned());
        }
        if let Some(issue_type) = &filter.issue_type {
            where_clauses.push("issue_type = ?".to_owned());
            params.push(Box::new(issue_type.clone()));
        }
        if let Some(priority) = filter.priority {
            where_clauses.push("priority = ?".to_owned());
            params.push(Box::new(priority));
        }
        if let Some(assignee) = &filter.assignee {
            if assignee.is_empty() {
                where_clauses.push("assignee = ''".to_owned());
            } else {
                where_clauses.push("assignee = ?".to_owned());
                params.push(Box::new(assignee.clone()));
            }
        }
        if let Some(label) = &filter.label {
            where_clauses.push(
                "EXISTS (SELECT 1 FROM labels l WHERE l.issue_id = issues.id AND l.name = ?)"
                    .to_owned(),
            );
            params.push(Box::new(label.clone()));
        }
        if let Some(parent) = &filter.parent_id {
            where_clauses.push("parent_id = ?".to_owned());
            params.push(Box::new(parent.clone()));
        }

        let where_sql = if where_clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", where_clauses.join(" AND "))
        };
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        let sql = format!(
            "SELECT {ISSUE_COLUMNS} FROM issues {where_sql}
             ORDER BY priority ASC, created_at ASC LIMIT ? OFFSET ?"
        );
        let param_refs: Vec<&dyn ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(param_refs.as_slice(), scan_issue)?;
        let mut issues = Vec::new();
        for row in rows {
            issues.push(row?);
        }
        hydrate_issues(&conn, &registry, issues)
    }

    /// Text search over title and description: the full-text index when the
    /// file carries one, otherwise an escaped LIKE scan.
    pub fn search_issues(&self, query: &str, limit: i64, offset: i64) -> Result<Vec<Issue>> {
        let registry = self.registry();
        let conn = self.lock_conn();

        let issues = if self.fts_enabled(&conn) {
            match search_fts(&conn, query, limit, offset) {
                Ok(issues) => issues,
                // Operator-heavy input the FTS grammar rejects; degrade.
                Err(EngineError::Unknown(_)) => search_like(&conn, query, limit, offset)?,
                Err(e) => return Err(e),
            }
        } else {
            search_like(&conn, query, limit, offset)?
        };
        hydrate_issues(&conn, &registry, issues)
    }

    /// Closes each id separately, never aborting the batch for one bad
    /// item. Not transactional across items.
    pub fn batch_close(&self, ids: &[String], reason: Option<&str>, actor: &str) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for id in ids {
            match self.close_issue(id, reason, actor) {
                Ok(_) => outcome.succeeded.push(id.clone()),
                Err(e) => outcome.failures.push(BatchFailure {
                    id: id.clone(),
                    code: e.code().to_owned(),
                    message: e.to_string(),
                }),
            }
        }
        outcome
    }

    /// Applies the same partial update to each id separately. Not
    /// transactional across items.
    pub fn batch_update(
        &self,
        ids: &[String],
        updates: &IssueUpdates,
        actor: &str,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for id in ids {
            match self.update_issue(id, updates, false, actor) {
                Ok(_) => outcome.succeeded.push(id.clone()),
                Err(e) => outcome.failures.push(BatchFailure {
                    id: id.clone(),
                    code: e.code().to_owned(),
                    message: e.to_string(),
                }),
            }
        }
        outcome
    }

    /// Checks one stored issue against its type template: legal status,
    /// required fields for the current state, enum fields within their
    /// options, and closed_at tracking the category boundary.
    pub fn validate_issue(&self, id: &str) -> Result<crate::types::ValidationReport> {
        let registry = self.registry();
        let conn = self.lock_conn();
        let issue = get_issue_row(&conn, id)?;
        drop(conn);

        let mut problems = Vec::new();
        if !registry.is_known_state(&issue.issue_type, &issue.status) {
            problems.push(format!(
                "status {:?} is not a state of type {:?}",
                issue.status, issue.issue_type
            ));
        }
        for field in registry.missing_required_at(&issue.issue_type, &issue.status, &issue.fields)
        {
            problems.push(format!(
                "field {field:?} is required in state {:?} but empty",
                issue.status
            ));
        }
        if let Some(template) = registry.get_type(&issue.issue_type) {
            for schema in &template.fields {
                if schema.options.is_empty() {
                    continue;
                }
                if let Some(value) = issue.fields.get(&schema.name) {
                    if let Some(text) = value.as_text() {
                        if !text.is_empty() && !schema.options.iter().any(|o| o == text) {
                            problems.push(format!(
                                "field {:?} has value {text:?} outside its options",
                                schema.name
                            ));
                        }
                    }
                }
            }
        }
        let done = registry.category(&issue.issue_type, &issue.status) == Category::Done;
        if done && issue.closed_at.is_none() {
            problems.push("issue is done but has no closed_at timestamp".to_owned());
        }
        if !done && issue.closed_at.is_some() {
            problems.push("issue is not done but carries a closed_at timestamp".to_owned());
        }

        Ok(crate::types::ValidationReport {
            id: issue.id,
            valid: problems.is_empty(),
            problems,
        })
    }

    /// Permanently deletes an issue and everything it owns: labels,
    /// comments, events, and edges in both directions. Maintenance only;
    /// normal workflows archive instead.
    pub fn delete_issue(&self, id: &str) -> Result<()> {
        self.with_tx(|conn| {
            let affected = conn.execute("DELETE FROM issues WHERE id = ?1", [id])?;
            if affected == 0 {
                return Err(EngineError::not_found("issue", id));
            }
            debug!(id = %id, "issue deleted");
            Ok(())
        })
    }
}

fn search_fts(conn: &Connection, query: &str, limit: i64, offset: i64) -> Result<Vec<Issue>> {
    // Quote each term so user input never hits the MATCH grammar.
    let match_query: String = query
        .split_whitespace()
        .map(|term| format!("\"{}\"", term.replace('"', "\"\"")))
        .collect::<Vec<_>>()
        .join(" ");
    if match_query.is_empty() {
        return Ok(Vec::new());
    }

    let sql = format!(
        "SELECT {} FROM issues i JOIN issues_fts ON issues_fts.id = i.id
         WHERE issues_fts MATCH ?1
         ORDER BY i.priority ASC, i.created_at ASC LIMIT ?2 OFFSET ?3",
        issue_columns("i")
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![match_query, limit, offset], scan_issue)?;
    let mut issues = Vec::new();
    for row in rows {
        issues.push(row?);
    }
    Ok(issues)
}

fn search_like(conn: &Connection, query: &str, limit: i64, offset: i64) -> Result<Vec<Issue>> {
    let pattern = format!("%{}%", escape_like(query));
    let sql = format!(
        "SELECT {ISSUE_COLUMNS} FROM issues
         WHERE title LIKE ?1 ESCAPE '\\' OR description LIKE ?1 ESCAPE '\\'
         ORDER BY priority ASC, created_at ASC LIMIT ?2 OFFSET ?3"
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![pattern, limit, offset], scan_issue)?;
    let mut issues = Vec::new();
    for row in rows {
        issues.push(row?);
    }
    Ok(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_config::ProjectConfig;
    use keel_core::fields::FieldValue;
    use pretty_assertions::assert_eq;

    fn test_store() -> Store {
        Store::open_in_memory(ProjectConfig::default()).unwrap()
    }

    fn quick(store: &Store, title: &str) -> Issue {
        store.create_issue(NewIssue::new(title), "test").unwrap()
    }

    #[test]
    fn create_and_get() {
        let store = test_store();
        let issue = store
            .create_issue(
                NewIssue {
                    title: "Wire up the scanner".into(),
                    issue_type: Some("task".into()),
                    priority: Some(1),
                    labels: vec!["backend".into()],
                    ..NewIssue::default()
                },
                "agent-1",
            )
            .unwrap();

        assert!(issue.id.starts_with("kl-"));
        assert_eq!(issue.id.len(), "kl-".len() + 6);
        assert_eq!(issue.status, "open");
        assert_eq!(issue.labels, vec!["backend"]);
        assert!(issue.is_ready);

        let fetched = store.get_issue(&issue.id).unwrap();
        assert_eq!(fetched.title, "Wire up the scanner");
    }

    #[test]
    fn get_missing_fails_not_found() {
        let store = test_store();
        let err = store.get_issue("kl-ffffff").unwrap_err();
        assert_eq!(err.code(), "not_found");
    }

    #[test]
    fn priority_bounds_rejected() {
        let store = test_store();
        let mut new = NewIssue::new("Bad");
        new.priority = Some(5);
        assert_eq!(store.create_issue(new, "t").unwrap_err().code(), "invalid");
        let mut new = NewIssue::new("Bad");
        new.priority = Some(-1);
        assert_eq!(store.create_issue(new, "t").unwrap_err().code(), "invalid");
        // Boundaries accepted.
        for p in [0, 4] {
            let mut new = NewIssue::new(format!("p{p}"));
            new.priority = Some(p);
            assert_eq!(store.create_issue(new, "t").unwrap().priority, p);
        }
    }

    #[test]
    fn empty_title_rejected() {
        let store = test_store();
        assert_eq!(
            store
                .create_issue(NewIssue::new("  "), "t")
                .unwrap_err()
                .code(),
            "invalid"
        );
    }

    #[test]
    fn template_defaults_applied() {
        let store = test_store();
        let mut new = NewIssue::new("A crash");
        new.issue_type = Some("bug".into());
        let issue = store.create_issue(new, "t").unwrap();
        assert_eq!(
            issue.fields.get("severity"),
            Some(&FieldValue::Text("medium".into()))
        );
    }

    #[test]
    fn update_journals_scalar_changes_only() {
        let store = test_store();
        let issue = quick(&store, "orig");

        let updates = IssueUpdates {
            title: Some("renamed".into()),
            description: Some("new description".into()),
            notes: Some("scratch".into()),
            priority: Some(0),
            ..IssueUpdates::default()
        };
        let updated = store.update_issue(&issue.id, &updates, false, "t").unwrap();
        assert_eq!(updated.title, "renamed");
        assert_eq!(updated.priority, 0);

        let events = store.get_issue_events(&issue.id, 50).unwrap();
        let kinds: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert!(kinds.contains(&"title_changed"));
        assert!(kinds.contains(&"priority_changed"));
        // Description and notes changes are unjournalled.
        assert_eq!(
            events
                .iter()
                .filter(|e| !e.event_type.is_builtin())
                .count(),
            0
        );
        assert_eq!(kinds.iter().filter(|k| **k == "created").count(), 1);
        assert_eq!(events.len(), 3);
    }

    #[test]
    fn fields_shallow_merge_on_update() {
        let store = test_store();
        let mut new = NewIssue::new("with fields");
        new.fields
            .insert("keep".into(), FieldValue::Text("yes".into()));
        new.fields
            .insert("drop".into(), FieldValue::Text("x".into()));
        let issue = store.create_issue(new, "t").unwrap();

        let mut patch = FieldMap::new();
        patch.insert("drop".into(), FieldValue::Text(String::new()));
        patch.insert("add".into(), FieldValue::Number(7.0));
        let updates = IssueUpdates {
            fields: Some(patch),
            ..IssueUpdates::default()
        };
        let updated = store.update_issue(&issue.id, &updates, false, "t").unwrap();
        assert_eq!(updated.fields.get("keep"), Some(&FieldValue::Text("yes".into())));
        assert_eq!(updated.fields.get("add"), Some(&FieldValue::Number(7.0)));
        assert!(!updated.fields.contains_key("drop"));
    }

    #[test]
    fn reparent_cycle_rejected() {
        let store = test_store();
        let a = quick(&store, "a");
        let b = store
            .create_issue(
                NewIssue {
                    title: "b".into(),
                    parent_id: Some(a.id.clone()),
                    ..NewIssue::default()
                },
                "t",
            )
            .unwrap();
        let c = store
            .create_issue(
                NewIssue {
                    title: "c".into(),
                    parent_id: Some(b.id.clone()),
                    ..NewIssue::default()
                },
                "t",
            )
            .unwrap();

        // a -> c would close the loop a > b > c.
        let updates = IssueUpdates {
            parent_id: Some(Some(c.id.clone())),
            ..IssueUpdates::default()
        };
        let err = store.update_issue(&a.id, &updates, false, "t").unwrap_err();
        assert_eq!(err.code(), "conflict");

        // Self-parent is invalid, not conflict.
        let updates = IssueUpdates {
            parent_id: Some(Some(a.id.clone())),
            ..IssueUpdates::default()
        };
        assert_eq!(
            store.update_issue(&a.id, &updates, false, "t").unwrap_err().code(),
            "invalid"
        );
    }

    #[test]
    fn hard_transition_gate() {
        let store = test_store();
        let mut new = NewIssue::new("crash on save");
        new.issue_type = Some("bug".into());
        let bug = store.create_issue(new, "t").unwrap();

        for status in ["in_progress", "verifying"] {
            let updates = IssueUpdates {
                status: Some(status.into()),
                ..IssueUpdates::default()
            };
            store.update_issue(&bug.id, &updates, false, "t").unwrap();
        }

        let updates = IssueUpdates {
            status: Some("closed".into()),
            ..IssueUpdates::default()
        };
        let err = store.update_issue(&bug.id, &updates, false, "t").unwrap_err();
        match &err {
            EngineError::InvalidTransition { missing_fields, .. } => {
                assert_eq!(missing_fields, &vec!["fix_verification".to_owned()]);
            }
            other => panic!("expected InvalidTransition, got {other:?}"),
        }
        assert_eq!(err.code(), "invalid_transition");

        // Setting the field in the same update satisfies the gate.
        let mut fields = FieldMap::new();
        fields.insert(
            "fix_verification".into(),
            FieldValue::Text("covered by regression test".into()),
        );
        let updates = IssueUpdates {
            status: Some("closed".into()),
            fields: Some(fields),
            ..IssueUpdates::default()
        };
        let closed = store.update_issue(&bug.id, &updates, false, "t").unwrap();
        assert_eq!(closed.status, "closed");
        assert!(closed.closed_at.is_some());
    }

    #[test]
    fn undeclared_transition_rejected() {
        let store = test_store();
        let mut new = NewIssue::new("bug");
        new.issue_type = Some("bug".into());
        let bug = store.create_issue(new, "t").unwrap();
        let updates = IssueUpdates {
            status: Some("verifying".into()),
            ..IssueUpdates::default()
        };
        let err = store.update_issue(&bug.id, &updates, false, "t").unwrap_err();
        assert_eq!(err.code(), "invalid_transition");
        match err {
            EngineError::InvalidTransition { valid_transitions, .. } => {
                assert!(valid_transitions.contains(&"in_progress".to_owned()));
            }
            _ => unreachable!(),
        }
    }

    #[test]
    fn soft_gate_warns_and_proceeds() {
        let store = test_store();
        let mut new = NewIssue::new("new thing");
        new.issue_type = Some("feature".into());
        let feature = store.create_issue(new, "t").unwrap();

        let updates = IssueUpdates {
            status: Some("in_progress".into()),
            ..IssueUpdates::default()
        };
        store.update_issue(&feature.id, &updates, false, "t").unwrap();

        let updates = IssueUpdates {
            status: Some("review".into()),
            ..IssueUpdates::default()
        };
        let moved = store.update_issue(&feature.id, &updates, false, "t").unwrap();
        assert_eq!(moved.status, "review");

        let events = store.get_issue_events(&feature.id, 50).unwrap();
        assert!(events
            .iter()
            .any(|e| e.event_type == EventType::TransitionWarning));
    }

    #[test]
    fn claim_and_release() {
        let store = test_store();
        let issue = quick(&store, "to claim");

        let claimed = store.claim_issue(&issue.id, "agent-a", "agent-a").unwrap();
        assert_eq!(claimed.assignee, "agent-a");
        // Claim is assignment-only.
        assert_eq!(claimed.status, "open");

        let err = store.claim_issue(&issue.id, "agent-b", "agent-b").unwrap_err();
        assert_eq!(err.code(), "conflict");

        store.release_claim(&issue.id, "agent-a").unwrap();
        let err = store.release_claim(&issue.id, "agent-a").unwrap_err();
        assert_eq!(err.code(), "conflict");

        // Claim again after release works.
        store.claim_issue(&issue.id, "agent-b", "agent-b").unwrap();
    }

    #[test]
    fn claim_next_prefers_priority_then_age() {
        let store = test_store();
        let mut low = NewIssue::new("low");
        low.priority = Some(3);
        store.create_issue(low, "t").unwrap();
        let mut high = NewIssue::new("high");
        high.priority = Some(0);
        let high = store.create_issue(high, "t").unwrap();

        let picked = store
            .claim_next("agent-a", &ClaimFilter::default(), "agent-a")
            .unwrap()
            .unwrap();
        assert_eq!(picked.id, high.id);

        // Blocked issues are never picked.
        let mut blocked = NewIssue::new("blocked");
        blocked.priority = Some(0);
        blocked.deps = vec![picked.id.clone()];
        store.create_issue(blocked, "t").unwrap();
        let second = store
            .claim_next("agent-b", &ClaimFilter::default(), "agent-b")
            .unwrap()
            .unwrap();
        assert_eq!(second.title, "low");

        // Nothing ready and unclaimed remains.
        assert!(store
            .claim_next("agent-c", &ClaimFilter::default(), "agent-c")
            .unwrap()
            .is_none());
    }

    #[test]
    fn close_is_idempotent_checked() {
        let store = test_store();
        let issue = quick(&store, "one shot");
        store.close_issue(&issue.id, Some("done"), "t").unwrap();
        let err = store.close_issue(&issue.id, None, "t").unwrap_err();
        assert_eq!(err.code(), "conflict");
    }

    #[test]
    fn close_reports_newly_unblocked() {
        let store = test_store();
        let a = quick(&store, "a");
        let b = quick(&store, "b");
        let c = quick(&store, "c");
        store.add_dependency(&a.id, &b.id, None, "t").unwrap();
        store.add_dependency(&a.id, &c.id, None, "t").unwrap();

        let out = store.close_issue(&b.id, None, "t").unwrap();
        assert!(out.newly_unblocked.is_empty());

        let out = store.close_issue(&c.id, None, "t").unwrap();
        let ids: Vec<&str> = out.newly_unblocked.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec![a.id.as_str()]);
        assert!(out.newly_unblocked[0].is_ready);
    }

    #[test]
    fn reopen_restores_initial_state() {
        let store = test_store();
        let issue = quick(&store, "cycle");
        store.close_issue(&issue.id, None, "t").unwrap();
        let reopened = store.reopen_issue(&issue.id, "t").unwrap();
        assert_eq!(reopened.status, "open");
        assert!(reopened.closed_at.is_none());

        let err = store.reopen_issue(&issue.id, "t").unwrap_err();
        assert_eq!(err.code(), "conflict");
    }

    #[test]
    fn list_filters_and_paginates() {
        let store = test_store();
        for i in 0..5 {
            let mut new = NewIssue::new(format!("task {i}"));
            new.priority = Some(2);
            store.create_issue(new, "t").unwrap();
        }
        let mut bug = NewIssue::new("a bug");
        bug.issue_type = Some("bug".into());
        store.create_issue(bug, "t").unwrap();

        let mut filter = IssueFilter::default();
        filter.issue_type = Some("task".into());
        assert_eq!(store.list_issues(&filter).unwrap().len(), 5);

        filter.limit = 2;
        filter.offset = 4;
        assert_eq!(store.list_issues(&filter).unwrap().len(), 1);

        let all = store.list_issues(&IssueFilter::default()).unwrap();
        assert!(all.iter().all(|i| i.is_ready));
    }

    #[test]
    fn search_finds_title_and_description() {
        let store = test_store();
        let mut new = NewIssue::new("Implement retry logic");
        new.description = "exponential backoff with jitter".into();
        let a = store.create_issue(new, "t").unwrap();
        quick(&store, "unrelated");

        let hits = store.search_issues("backoff", 10, 0).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, a.id);

        let hits = store.search_issues("retry", 10, 0).unwrap();
        assert_eq!(hits.len(), 1);

        // LIKE metacharacters in the query are literal, not wildcards.
        assert!(store.search_issues("100%", 10, 0).unwrap().is_empty());
    }

    #[test]
    fn batch_collects_per_item_failures() {
        let store = test_store();
        let a = quick(&store, "a");
        let ids = vec![a.id.clone(), "kl-doesnt".to_owned()];
        let outcome = store.batch_close(&ids, None, "t");
        assert_eq!(outcome.succeeded, vec![a.id.clone()]);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].code, "not_found");

        // Closing again via batch reports the conflict per-item.
        let outcome = store.batch_close(&[a.id.clone()], None, "t");
        assert_eq!(outcome.failures[0].code, "conflict");
    }

    #[test]
    fn delete_cascades() {
        let store = test_store();
        let a = quick(&store, "a");
        let b = quick(&store, "b");
        store.add_dependency(&a.id, &b.id, None, "t").unwrap();
        store.add_label(&a.id, "x", "t").unwrap();
        store.add_comment(&a.id, "t", "note").unwrap();

        store.delete_issue(&a.id).unwrap();
        assert_eq!(store.get_issue(&a.id).unwrap_err().code(), "not_found");
        // The edge from a is gone; b has no dependents.
        let b = store.get_issue(&b.id).unwrap();
        assert!(b.dependents.is_empty());

        assert_eq!(store.delete_issue(&a.id).unwrap_err().code(), "not_found");
    }

    #[test]
    fn validate_issue_reports_template_drift() {
        let store = test_store();
        let mut new = NewIssue::new("clean bug");
        new.issue_type = Some("bug".into());
        let bug = store.create_issue(new, "t").unwrap();
        let report = store.validate_issue(&bug.id).unwrap();
        assert!(report.valid, "fresh issue conforms: {:?}", report.problems);

        // Drive the row out of conformance behind the template's back.
        {
            let conn = store.lock_conn();
            conn.execute(
                "UPDATE issues SET status = 'limbo',
                     fields = '{\"severity\": \"catastrophic\"}'
                 WHERE id = ?1",
                params![bug.id],
            )
            .unwrap();
        }
        let report = store.validate_issue(&bug.id).unwrap();
        assert!(!report.valid);
        assert!(report.problems.iter().any(|p| p.contains("limbo")));
        assert!(report.problems.iter().any(|p| p.contains("catastrophic")));
    }

    #[test]
    fn id_collision_fallback_widens() {
        let store = test_store();
        let conn = store.lock_conn();
        let ts = DateTime::parse_from_rfc3339("2026-01-01T00:00:00Z")
            .unwrap()
            .with_timezone(&Utc);
        // Occupy every id the default-width generator would try.
        for nonce in 0..keel_core::idgen::MAX_ATTEMPTS {
            let id = keel_core::idgen::generate_id(
                "kl",
                "colliding title",
                ts,
                nonce,
                keel_core::idgen::DEFAULT_HEX_LEN,
            );
            conn.execute(
                "INSERT INTO issues (id, title, created_at, updated_at)
                 VALUES (?1, 'occupied', ?2, ?2)",
                params![id, format_datetime(&ts)],
            )
            .unwrap();
        }

        let id = allocate_id(&conn, "kl", "colliding title", ts).unwrap();
        assert_eq!(id.len(), "kl-".len() + keel_core::idgen::FALLBACK_HEX_LEN);
        assert!(keel_core::idgen::is_well_formed(&id, "kl"));
    }

    #[test]
    fn children_listed() {
        let store = test_store();
        let parent = quick(&store, "parent");
        let child = store
            .create_issue(
                NewIssue {
                    title: "child".into(),
                    parent_id: Some(parent.id.clone()),
                    ..NewIssue::default()
                },
                "t",
            )
            .unwrap();
        let children = store.get_children(&parent.id).unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].id, child.id);

        let fetched = store.get_issue(&parent.id).unwrap();
        assert_eq!(fetched.children, vec![child.id]);
    }
}

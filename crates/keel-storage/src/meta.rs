//! Derived analytics and lifecycle maintenance: stats, flow metrics,
//! archiving, and event compaction.

use std::collections::HashMap;

use chrono::{Duration, Utc};
use rusqlite::params;
use tracing::{debug, info};

use keel_core::enums::{Category, EventType};

use crate::error::Result;
use crate::events::{emit_event, enters_wip};
use crate::issues::{format_datetime, parse_datetime};
use crate::store::Store;
use crate::types::{FlowMetrics, Stats, TypeFlow};

impl Store {
    /// Aggregate counts by category, type, and priority. Derived on read,
    /// never stored.
    pub fn get_stats(&self) -> Result<Stats> {
        let registry = self.registry();
        let conn = self.lock_conn();

        let mut stats = Stats {
            prefix: self.config.prefix.clone(),
            ..Stats::default()
        };

        let mut by_category: HashMap<Category, i64> = HashMap::new();
        let mut by_type: HashMap<String, i64> = HashMap::new();
        let mut by_priority: HashMap<i64, i64> = HashMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT issue_type, status, priority, COUNT(*)
                 FROM issues GROUP BY issue_type, status, priority",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?;
            for row in rows {
                let (issue_type, status, priority, count) = row?;
                stats.total += count;
                *by_category
                    .entry(registry.category(&issue_type, &status))
                    .or_default() += count;
                *by_type.entry(issue_type).or_default() += count;
                *by_priority.entry(priority).or_default() += count;
            }
        }

        for category in [Category::Open, Category::Wip, Category::Done] {
            stats.by_category.push((
                category.as_str().to_owned(),
                by_category.get(&category).copied().unwrap_or(0),
            ));
        }
        stats.by_type = by_type.into_iter().collect();
        stats.by_type.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        stats.by_priority = by_priority.into_iter().collect();
        stats.by_priority.sort();

        Ok(stats)
    }

    /// Cycle time, lead time, and throughput for issues closed inside the
    /// trailing window, with per-type breakdowns. Read-only, derived from
    /// the journal and issue timestamps.
    pub fn get_flow_metrics(&self, window_days: i64) -> Result<FlowMetrics> {
        let registry = self.registry();
        let conn = self.lock_conn();
        let cutoff = Utc::now() - Duration::days(window_days.max(0));

        struct ClosedRow {
            id: String,
            issue_type: String,
            closed_at: chrono::DateTime<Utc>,
            lead_hours: f64,
            cycle_hours: Option<f64>,
        }

        let mut closed: Vec<ClosedRow> = Vec::new();
        {
            let mut stmt = conn.prepare(
                "SELECT id, issue_type, created_at, closed_at FROM issues
                 WHERE closed_at IS NOT NULL AND closed_at >= ?1",
            )?;
            let rows = stmt.query_map([format_datetime(&cutoff)], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                ))
            })?;
            for row in rows {
                let (id, issue_type, created_at, closed_at) = row?;
                let created = parse_datetime(&created_at);
                let closed_ts = parse_datetime(&closed_at);
                closed.push(ClosedRow {
                    id,
                    issue_type,
                    closed_at: closed_ts,
                    lead_hours: hours_between(created, closed_ts),
                    cycle_hours: None,
                });
            }
        }

        // First wip entry per closed issue, from the journal.
        if !closed.is_empty() {
            let marks = vec!["?"; closed.len()].join(", ");
            let mut stmt = conn.prepare(&format!(
                "SELECT issue_id, new_value, created_at FROM events
                 WHERE event_type = 'status_changed' AND issue_id IN ({marks})
                 ORDER BY id ASC"
            ))?;
            let ids: Vec<&str> = closed.iter().map(|c| c.id.as_str()).collect();
            let rows = stmt.query_map(rusqlite::params_from_iter(ids.iter()), |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, Option<String>>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            let mut first_wip: HashMap<String, chrono::DateTime<Utc>> = HashMap::new();
            let type_of: HashMap<&str, &str> = closed
                .iter()
                .map(|c| (c.id.as_str(), c.issue_type.as_str()))
                .collect();
            for row in rows {
                let (issue_id, new_value, created_at) = row?;
                if first_wip.contains_key(&issue_id) {
                    continue;
                }
                let Some(issue_type) = type_of.get(issue_id.as_str()) else {
                    continue;
                };
                let event = keel_core::comment::Event {
                    id: 0,
                    issue_id: issue_id.clone(),
                    event_type: EventType::StatusChanged,
                    actor: String::new(),
                    old_value: None,
                    new_value,
                    comment: None,
                    created_at: parse_datetime(&created_at),
                };
                if enters_wip(&registry, issue_type, &event) {
                    first_wip.insert(issue_id, event.created_at);
                }
            }
            for row in &mut closed {
                if let Some(started) = first_wip.get(&row.id) {
                    row.cycle_hours = Some(hours_between(*started, row.closed_at));
                }
            }
        }

        let mut by_type: HashMap<String, (i64, Vec<f64>, Vec<f64>)> = HashMap::new();
        for row in &closed {
            let entry = by_type.entry(row.issue_type.clone()).or_default();
            entry.0 += 1;
            entry.1.push(row.lead_hours);
            if let Some(cycle) = row.cycle_hours {
                entry.2.push(cycle);
            }
        }
        let mut type_flows: Vec<TypeFlow> = by_type
            .into_iter()
            .map(|(issue_type, (throughput, leads, cycles))| TypeFlow {
                issue_type,
                throughput,
                avg_lead_hours: mean(&leads),
                avg_cycle_hours: mean(&cycles),
            })
            .collect();
        type_flows.sort_by(|a, b| a.issue_type.cmp(&b.issue_type));

        let leads: Vec<f64> = closed.iter().map(|c| c.lead_hours).collect();
        let cycles: Vec<f64> = closed.iter().filter_map(|c| c.cycle_hours).collect();

        Ok(FlowMetrics {
            window_days,
            throughput: closed.len() as i64,
            avg_cycle_hours: mean(&cycles),
            avg_lead_hours: mean(&leads),
            by_type: type_flows,
        })
    }

    /// Moves done-category issues whose `closed_at` is older than the
    /// threshold into the reserved terminal `archived` status. Returns the
    /// archived ids.
    pub fn archive_closed(&self, days_old: i64, actor: &str) -> Result<Vec<String>> {
        let registry = self.registry();
        let cutoff = Utc::now() - Duration::days(days_old.max(0));
        let now = Utc::now();

        self.with_tx(|conn| {
            let mut candidates: Vec<(String, String)> = Vec::new();
            {
                let mut stmt = conn.prepare(
                    "SELECT id, issue_type, status FROM issues
                     WHERE closed_at IS NOT NULL AND closed_at < ?1 AND status != 'archived'",
                )?;
                let rows = stmt.query_map([format_datetime(&cutoff)], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?;
                for row in rows {
                    let (id, issue_type, status) = row?;
                    if registry.category(&issue_type, &status) == Category::Done {
                        candidates.push((id, status));
                    }
                }
            }

            let mut archived = Vec::with_capacity(candidates.len());
            for (id, old_status) in candidates {
                conn.execute(
                    "UPDATE issues SET status = 'archived', updated_at = ?1 WHERE id = ?2",
                    params![format_datetime(&now), id],
                )?;
                emit_event(
                    conn,
                    &id,
                    &EventType::Archived,
                    actor,
                    Some(&old_status),
                    Some("archived"),
                    None,
                    now,
                )?;
                archived.push(id);
            }
            if !archived.is_empty() {
                info!(count = archived.len(), "archived closed issues");
            }
            Ok(archived)
        })
    }

    /// For archived issues only, deletes journal entries beyond the most
    /// recent `keep_recent` per issue. Entries are deleted, never modified.
    pub fn compact_events(&self, keep_recent: i64) -> Result<u64> {
        self.with_tx(|conn| {
            let deleted = conn.execute(
                "DELETE FROM events
                 WHERE issue_id IN (SELECT id FROM issues WHERE status = 'archived')
                   AND id NOT IN (
                       SELECT e2.id FROM events e2
                       WHERE e2.issue_id = events.issue_id
                       ORDER BY e2.id DESC LIMIT ?1
                   )",
                [keep_recent.max(0)],
            )?;
            debug!(deleted, keep_recent, "compacted events");
            Ok(deleted as u64)
        })
    }
}

fn hours_between(start: chrono::DateTime<Utc>, end: chrono::DateTime<Utc>) -> f64 {
    (end - start).num_seconds() as f64 / 3600.0
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IssueUpdates, NewIssue};
    use keel_config::ProjectConfig;

    fn test_store() -> Store {
        Store::open_in_memory(ProjectConfig::default()).unwrap()
    }

    #[test]
    fn stats_by_category_and_type() {
        let store = test_store();
        let a = store.create_issue(NewIssue::new("a"), "t").unwrap();
        let mut bug = NewIssue::new("b");
        bug.issue_type = Some("bug".into());
        store.create_issue(bug, "t").unwrap();
        store
            .update_issue(
                &a.id,
                &IssueUpdates {
                    status: Some("in_progress".into()),
                    ..IssueUpdates::default()
                },
                false,
                "t",
            )
            .unwrap();

        let stats = store.get_stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.prefix, "kl");
        let cat: HashMap<_, _> = stats.by_category.iter().cloned().collect();
        assert_eq!(cat["open"], 1);
        assert_eq!(cat["wip"], 1);
        assert_eq!(cat["done"], 0);
        assert!(stats.by_type.iter().any(|(t, n)| t == "bug" && *n == 1));
    }

    #[test]
    fn flow_metrics_counts_closures() {
        let store = test_store();
        let a = store.create_issue(NewIssue::new("a"), "t").unwrap();
        store
            .update_issue(
                &a.id,
                &IssueUpdates {
                    status: Some("in_progress".into()),
                    ..IssueUpdates::default()
                },
                false,
                "t",
            )
            .unwrap();
        store.close_issue(&a.id, None, "t").unwrap();
        // Never started, closed directly: lead time only.
        let b = store.create_issue(NewIssue::new("b"), "t").unwrap();
        store.close_issue(&b.id, None, "t").unwrap();
        // Still open: not counted.
        store.create_issue(NewIssue::new("c"), "t").unwrap();

        let flow = store.get_flow_metrics(7).unwrap();
        assert_eq!(flow.throughput, 2);
        assert!(flow.avg_lead_hours.is_some());
        // Only `a` entered a wip state, so one cycle sample exists.
        assert!(flow.avg_cycle_hours.is_some());
        assert_eq!(flow.by_type.len(), 1);
        assert_eq!(flow.by_type[0].throughput, 2);
    }

    #[test]
    fn archive_then_compact() {
        let store = test_store();
        let a = store.create_issue(NewIssue::new("a"), "t").unwrap();
        store.add_label(&a.id, "x", "t").unwrap();
        store.close_issue(&a.id, None, "t").unwrap();

        // Not old enough yet.
        assert!(store.archive_closed(30, "t").unwrap().is_empty());
        // Zero-day threshold archives anything closed strictly before now.
        std::thread::sleep(std::time::Duration::from_millis(5));
        let archived = store.archive_closed(0, "t").unwrap();
        assert_eq!(archived, vec![a.id.clone()]);
        assert_eq!(store.get_issue(&a.id).unwrap().status, "archived");
        assert!(!store.get_issue(&a.id).unwrap().is_ready);

        // Re-archiving is a no-op.
        assert!(store.archive_closed(0, "t").unwrap().is_empty());

        let before = store.get_issue_events(&a.id, 100).unwrap().len();
        assert!(before > 1);
        let deleted = store.compact_events(1).unwrap();
        assert_eq!(deleted as usize, before - 1);
        let after = store.get_issue_events(&a.id, 100).unwrap();
        assert_eq!(after.len(), 1);
        // The newest entry survives.
        assert_eq!(after[0].event_type, EventType::Archived);
    }

    #[test]
    fn compact_never_touches_active_issues() {
        let store = test_store();
        let a = store.create_issue(NewIssue::new("a"), "t").unwrap();
        store.add_label(&a.id, "x", "t").unwrap();
        let before = store.get_issue_events(&a.id, 100).unwrap().len();
        store.compact_events(0).unwrap();
        assert_eq!(store.get_issue_events(&a.id, 100).unwrap().len(), before);
    }
}

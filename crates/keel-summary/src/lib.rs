//! The pre-computed markdown summary.
//!
//! Agents re-read this file at the start of each session instead of paging
//! through list queries; collaborators regenerate it after every mutation.
//! Publication is atomic: the document is written to a same-directory temp
//! file and renamed over the target, so readers only ever observe complete
//! versions.

use std::fmt::Write as _;
use std::path::Path;

use chrono::{Duration, Utc};
use tracing::debug;

use keel_core::enums::Category;
use keel_core::filter::IssueFilter;
use keel_core::issue::Issue;
use keel_storage::{EngineError, Result, Store};

/// Ready-section cap.
const READY_CAP: usize = 15;
/// In-progress-section cap.
const WIP_CAP: usize = 10;
/// Blocked-section cap.
const BLOCKED_CAP: usize = 10;
/// Recent-events cap.
const EVENTS_CAP: usize = 10;
/// A wip issue untouched for this long is surfaced as stale.
const STALE_DAYS: i64 = 3;

/// Renders the full summary document.
pub fn render_summary(store: &Store) -> Result<String> {
    let stats = store.get_stats()?;
    let ready = store.get_ready()?;
    let blocked = store.get_blocked()?;
    let path = store.get_critical_path()?;
    let events = store.get_recent_events(EVENTS_CAP as i64)?;

    // One broad listing feeds the wip, stale, plan, and epic sections.
    let all = store.list_issues(&IssueFilter {
        limit: 10_000,
        ..IssueFilter::default()
    })?;
    let category_of = |issue: &Issue| store.registry().category(&issue.issue_type, &issue.status);

    let wip: Vec<&Issue> = all
        .iter()
        .filter(|i| category_of(i) == Category::Wip)
        .collect();
    let stale_cutoff = Utc::now() - Duration::days(STALE_DAYS);
    let stale: Vec<&&Issue> = wip.iter().filter(|i| i.updated_at < stale_cutoff).collect();

    let mut out = String::with_capacity(8 * 1024);
    writeln!(out, "# Project summary").ok();
    writeln!(out).ok();
    writeln!(
        out,
        "Generated {} · prefix `{}`",
        Utc::now().format("%Y-%m-%d %H:%M UTC"),
        stats.prefix
    )
    .ok();

    // Vitals.
    writeln!(out, "\n## Vitals\n").ok();
    let vital = |name: &str| {
        stats
            .by_category
            .iter()
            .find(|(c, _)| c == name)
            .map_or(0, |(_, n)| *n)
    };
    writeln!(
        out,
        "{} issues: {} open · {} in progress · {} done",
        stats.total,
        vital("open"),
        vital("wip"),
        vital("done")
    )
    .ok();

    // Active plans.
    let milestones: Vec<&Issue> = all
        .iter()
        .filter(|i| i.issue_type == "milestone" && category_of(i) != Category::Done)
        .collect();
    if !milestones.is_empty() {
        writeln!(out, "\n## Active plans\n").ok();
        for milestone in &milestones {
            if let Ok(plan) = store.get_plan(&milestone.id) {
                writeln!(
                    out,
                    "- `{}` {} - {}% ({} of {} phases done)",
                    plan.milestone.id,
                    plan.milestone.title,
                    plan.progress_percent,
                    plan.completed,
                    plan.total
                )
                .ok();
            }
        }
    }

    // Ready.
    writeln!(out, "\n## Ready ({})\n", ready.len()).ok();
    if ready.is_empty() {
        writeln!(out, "Nothing is ready; check the blocked section.").ok();
    }
    for issue in ready.iter().take(READY_CAP) {
        writeln!(out, "- `{}` P{} {}", issue.id, issue.priority, issue.title).ok();
    }
    more_line(&mut out, ready.len(), READY_CAP);

    // In progress.
    writeln!(out, "\n## In progress ({})\n", wip.len()).ok();
    for issue in wip.iter().take(WIP_CAP) {
        let who = if issue.assignee.is_empty() {
            "unassigned".to_owned()
        } else {
            issue.assignee.clone()
        };
        writeln!(out, "- `{}` {} ({})", issue.id, issue.title, who).ok();
    }
    more_line(&mut out, wip.len(), WIP_CAP);

    // Stale wip. Surfaced only; claims are never auto-released.
    if !stale.is_empty() {
        writeln!(out, "\n## Stale (no update in {STALE_DAYS}+ days)\n").ok();
        for issue in &stale {
            writeln!(
                out,
                "- `{}` {} - last touched {}",
                issue.id,
                issue.title,
                issue.updated_at.format("%Y-%m-%d")
            )
            .ok();
        }
    }

    // Blocked.
    writeln!(out, "\n## Blocked ({})\n", blocked.len()).ok();
    for issue in blocked.iter().take(BLOCKED_CAP) {
        writeln!(
            out,
            "- `{}` {} - {} open blocker{}",
            issue.id,
            issue.title,
            issue.open_blockers,
            if issue.open_blockers == 1 { "" } else { "s" }
        )
        .ok();
    }
    more_line(&mut out, blocked.len(), BLOCKED_CAP);

    // Epic progress.
    let epics: Vec<&Issue> = all
        .iter()
        .filter(|i| i.issue_type == "epic" && !i.children.is_empty())
        .collect();
    if !epics.is_empty() {
        writeln!(out, "\n## Epics\n").ok();
        for epic in &epics {
            let children = store.get_children(&epic.id)?;
            let done = children
                .iter()
                .filter(|c| category_of(c) == Category::Done)
                .count();
            writeln!(
                out,
                "- `{}` {} - {}/{} children done",
                epic.id,
                epic.title,
                done,
                children.len()
            )
            .ok();
        }
    }

    // Critical path.
    if path.length > 1 {
        writeln!(out, "\n## Critical path ({} issues)\n", path.length).ok();
        let chain: Vec<String> = path.issues.iter().map(|i| format!("`{}`", i.id)).collect();
        writeln!(out, "{}", chain.join(" -> ")).ok();
    }

    // Recent events.
    writeln!(out, "\n## Recent activity\n").ok();
    if events.is_empty() {
        writeln!(out, "No recorded events yet.").ok();
    }
    for event in &events {
        writeln!(
            out,
            "- {} `{}` {} by {}",
            event.created_at.format("%m-%d %H:%M"),
            event.issue_id,
            event.event_type,
            event.actor
        )
        .ok();
    }

    writeln!(out, "\n---\n_generated by keel_").ok();
    Ok(out)
}

fn more_line(out: &mut String, total: usize, cap: usize) {
    if total > cap {
        writeln!(out, "…and {} more", total - cap).ok();
    }
}

/// Renders the summary and atomically publishes it at `path`:
/// write-to-temp in the same directory, then rename. Readers never observe
/// a partial document.
pub fn write_summary_to(store: &Store, path: &Path) -> Result<()> {
    let content = render_summary(store)?;
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());

    let tmp = match dir {
        Some(dir) => tempfile::NamedTempFile::new_in(dir),
        None => tempfile::NamedTempFile::new_in("."),
    }
    .map_err(|e| EngineError::Unknown(format!("summary temp file: {e}")))?;

    std::fs::write(tmp.path(), &content)
        .map_err(|e| EngineError::Unknown(format!("summary write: {e}")))?;
    tmp.persist(path)
        .map_err(|e| EngineError::Unknown(format!("summary publish: {e}")))?;

    debug!(?path, bytes = content.len(), "summary published");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_config::ProjectConfig;
    use keel_storage::{NewIssue, PhaseSpec, PlanNode, PlanSpec, StepSpec};

    fn test_store() -> Store {
        Store::open_in_memory(ProjectConfig::default()).unwrap()
    }

    fn populated() -> Store {
        let store = test_store();
        let a = store.create_issue(NewIssue::new("build parser"), "t").unwrap();
        let b = store.create_issue(NewIssue::new("wire cli"), "t").unwrap();
        store.add_dependency(&b.id, &a.id, None, "t").unwrap();
        store.claim_issue(&a.id, "agent-1", "agent-1").unwrap();
        store
            .update_issue(
                &a.id,
                &keel_storage::IssueUpdates {
                    status: Some("in_progress".into()),
                    ..keel_storage::IssueUpdates::default()
                },
                false,
                "agent-1",
            )
            .unwrap();
        store
            .create_plan(
                &PlanSpec {
                    milestone: PlanNode {
                        title: "v1".into(),
                        ..PlanNode::default()
                    },
                    phases: vec![PhaseSpec {
                        node: PlanNode {
                            title: "p1".into(),
                            ..PlanNode::default()
                        },
                        steps: vec![step("s1")],
                    }],
                },
                "t",
            )
            .unwrap();
        store
    }

    fn step(title: &str) -> StepSpec {
        StepSpec {
            node: PlanNode {
                title: title.into(),
                ..PlanNode::default()
            },
            deps: vec![],
        }
    }

    #[test]
    fn renders_all_sections() {
        let store = populated();
        let doc = render_summary(&store).unwrap();
        assert!(doc.starts_with("# Project summary"));
        assert!(doc.contains("## Vitals"));
        assert!(doc.contains("## Active plans"));
        assert!(doc.contains("## Ready"));
        assert!(doc.contains("## In progress"));
        assert!(doc.contains("## Blocked"));
        assert!(doc.contains("## Recent activity"));
        assert!(doc.trim_end().ends_with("_generated by keel_"));
        assert!(doc.contains("agent-1"));
    }

    #[test]
    fn caps_append_more_line() {
        let store = test_store();
        for i in 0..20 {
            store
                .create_issue(NewIssue::new(format!("task {i}")), "t")
                .unwrap();
        }
        let doc = render_summary(&store).unwrap();
        assert!(doc.contains("…and 5 more"));
    }

    #[test]
    fn publish_writes_and_replaces() {
        let store = populated();
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("context.md");

        write_summary_to(&store, &target).unwrap();
        let first = std::fs::read_to_string(&target).unwrap();
        assert!(first.starts_with("# Project summary"));

        // Second publish replaces in place; no temp files remain.
        write_summary_to(&store, &target).unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != "context.md")
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn concurrent_reader_never_sees_partial_document() {
        use std::sync::Arc;
        use std::sync::atomic::{AtomicBool, Ordering};

        let store = Arc::new(populated());
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("context.md");
        write_summary_to(&store, &target).unwrap();

        let stop = Arc::new(AtomicBool::new(false));
        let writer = {
            let store = Arc::clone(&store);
            let target = target.clone();
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                while !stop.load(Ordering::Relaxed) {
                    write_summary_to(&store, &target).unwrap();
                }
            })
        };

        for _ in 0..200 {
            let content = std::fs::read_to_string(&target).unwrap();
            assert!(content.starts_with("# Project summary"));
            assert!(
                content.trim_end().ends_with("_generated by keel_"),
                "reader observed a truncated summary"
            );
        }

        stop.store(true, Ordering::Relaxed);
        writer.join().unwrap();
    }
}

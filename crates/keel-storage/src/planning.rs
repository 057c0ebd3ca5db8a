//! Planning engine: ready/blocked queries, critical path, and the
//! three-level milestone > phase > step hierarchy.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::Utc;
use rusqlite::Connection;
use rusqlite::types::ToSql;
use tracing::debug;

use keel_core::enums::{Category, EventType, LinkType};
use keel_core::fields::{FieldMap, FieldValue};
use keel_core::issue::Issue;
use keel_core::validation::{validate_priority, validate_title};
use keel_templates::TemplateRegistry;

use crate::categories::CategorySql;
use crate::dependencies::insert_dependency_on_conn;
use crate::error::{EngineError, Result};
use crate::events::emit_event;
use crate::issues::{
    ISSUE_COLUMNS, allocate_id, get_issue_row, hydrate_issues, insert_issue_row, scan_issue,
};
use crate::store::Store;
use crate::types::{CriticalPath, PhaseView, PlanNode, PlanSpec, PlanView};

impl Store {
    /// Issues whose status category is `open` with zero open blockers,
    /// sorted by (priority, created_at).
    pub fn get_ready(&self) -> Result<Vec<Issue>> {
        self.work_query(|cat, alias| cat.ready_condition(alias))
    }

    /// Issues whose status category is `open` with at least one open
    /// blocker.
    pub fn get_blocked(&self) -> Result<Vec<Issue>> {
        self.work_query(|cat, alias| cat.blocked_condition(alias))
    }

    fn work_query(
        &self,
        condition: impl Fn(&CategorySql, &str) -> String,
    ) -> Result<Vec<Issue>> {
        let registry = self.registry();
        let conn = self.lock_conn();
        let cat = CategorySql::new(&registry);

        let mut params: Vec<Box<dyn ToSql>> = Vec::new();
        cat.push_params(&mut params);
        let sql = format!(
            "{}SELECT {ISSUE_COLUMNS} FROM issues i WHERE {} \
             ORDER BY i.priority ASC, i.created_at ASC",
            cat.with_clause(),
            condition(&cat, "i"),
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

    /// Longest chain (by node count) through the open subgraph over
    /// `blocks` edges, in execution order. Advisory only; empty when the
    /// open subgraph is empty or (by invariant, impossible) cyclic.
    pub fn get_critical_path(&self) -> Result<CriticalPath> {
        let registry = self.registry();
        let conn = self.lock_conn();

        // Open-category vertices.
        let mut open: HashSet<String> = HashSet::new();
        {
            let mut stmt = conn.prepare("SELECT id, issue_type, status FROM issues")?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                ))
            })?;
            for row in rows {
                let (id, issue_type, status) = row?;
                if registry.category(&issue_type, &status) == Category::Open {
                    open.insert(id);
                }
            }
        }

        // Blocks edges inside the open subgraph. `issue -> blocker` means
        // the blocker must complete first.
        let mut blockers: HashMap<String, Vec<String>> = HashMap::new();
        let mut dependents: HashMap<String, Vec<String>> = HashMap::new();
        let mut indegree: HashMap<String, usize> = open.iter().map(|id| (id.clone(), 0)).collect();
        {
            let mut stmt =
                conn.prepare("SELECT issue_id, depends_on_id FROM dependencies WHERE type = 'blocks'")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            for row in rows {
                let (from, to) = row?;
                if open.contains(&from) && open.contains(&to) {
                    blockers.entry(from.clone()).or_default().push(to.clone());
                    dependents.entry(to).or_default().push(from.clone());
                    *indegree.entry(from).or_default() += 1;
                }
            }
        }

        // Kahn topological order, blockers first.
        let mut queue: VecDeque<String> = indegree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(id, _)| id.clone())
            .collect();
        let mut order: Vec<String> = Vec::with_capacity(open.len());
        while let Some(id) = queue.pop_front() {
            order.push(id.clone());
            for dependent in dependents.get(&id).into_iter().flatten() {
                if let Some(d) = indegree.get_mut(dependent) {
                    *d -= 1;
                    if *d == 0 {
                        queue.push_back(dependent.clone());
                    }
                }
            }
        }
        if order.len() != open.len() {
            // Cyclic subgraph; the add_dependency invariant makes this
            // unreachable, but the query degrades instead of looping.
            return Ok(CriticalPath {
                issues: Vec::new(),
                length: 0,
            });
        }

        // Longest path by node count, reconstructed via predecessors.
        let mut best: HashMap<String, (usize, Option<String>)> = HashMap::new();
        for id in &order {
            let mut len = 1;
            let mut pred = None;
            for blocker in blockers.get(id).into_iter().flatten() {
                let blocker_len = best.get(blocker).map_or(0, |(l, _)| *l);
                if blocker_len + 1 > len {
                    len = blocker_len + 1;
                    pred = Some(blocker.clone());
                }
            }
            best.insert(id.clone(), (len, pred));
        }

        let Some((tail, (length, _))) = best.iter().max_by_key(|(_, (l, _))| *l) else {
            return Ok(CriticalPath {
                issues: Vec::new(),
                length: 0,
            });
        };
        let length = *length;
        let mut path_ids = Vec::with_capacity(length);
        let mut cursor = Some(tail.clone());
        while let Some(id) = cursor {
            cursor = best.get(&id).and_then(|(_, pred)| pred.clone());
            path_ids.push(id);
        }
        path_ids.reverse();

        let mut by_id: HashMap<String, Issue> = HashMap::new();
        for id in &path_ids {
            by_id.insert(id.clone(), get_issue_row(&conn, id)?);
        }
        let ordered: Vec<Issue> = path_ids
            .iter()
            .filter_map(|id| by_id.remove(id))
            .collect();
        let issues = hydrate_issues(&conn, &registry, ordered)?;

        Ok(CriticalPath { issues, length })
    }

    /// Assembles the three-level hierarchy below a milestone.
    pub fn get_plan(&self, milestone_id: &str) -> Result<PlanView> {
        let registry = self.registry();
        let conn = self.lock_conn();
        assemble_plan(&conn, &registry, milestone_id)
    }

    /// Creates a whole plan in one transaction: the milestone, its phases
    /// (each blocked on its predecessor), and each phase's steps with their
    /// declared intra-phase blocking edges.
    pub fn create_plan(&self, spec: &PlanSpec, actor: &str) -> Result<PlanView> {
        validate_title(&spec.milestone.title)?;
        for phase in &spec.phases {
            validate_title(&phase.node.title)?;
            for step in &phase.steps {
                validate_title(&step.node.title)?;
                for &dep in &step.deps {
                    if dep >= phase.steps.len() {
                        return Err(EngineError::invalid(format!(
                            "step {:?} references out-of-range step index {dep}",
                            step.node.title
                        )));
                    }
                }
            }
        }

        let registry = self.registry();
        let milestone_id = self.with_tx(|conn| {
            let milestone_id = create_plan_issue(
                conn,
                &registry,
                &self.config.prefix,
                &spec.milestone,
                "milestone",
                None,
                None,
                actor,
            )?;

            let mut prev_phase: Option<String> = None;
            for (i, phase) in spec.phases.iter().enumerate() {
                let phase_id = create_plan_issue(
                    conn,
                    &registry,
                    &self.config.prefix,
                    &phase.node,
                    "phase",
                    Some(&milestone_id),
                    Some(i as i64 + 1),
                    actor,
                )?;
                if let Some(prev) = &prev_phase {
                    insert_dependency_on_conn(conn, &phase_id, prev, &LinkType::Blocks, actor)?;
                }

                let mut step_ids: Vec<String> = Vec::with_capacity(phase.steps.len());
                for (j, step) in phase.steps.iter().enumerate() {
                    let step_id = create_plan_issue(
                        conn,
                        &registry,
                        &self.config.prefix,
                        &step.node,
                        "step",
                        Some(&phase_id),
                        Some(j as i64 + 1),
                        actor,
                    )?;
                    for &dep in &step.deps {
                        if dep >= j {
                            return Err(EngineError::invalid(format!(
                                "step {:?} may only depend on earlier steps",
                                step.node.title
                            )));
                        }
                        insert_dependency_on_conn(
                            conn,
                            &step_id,
                            &step_ids[dep],
                            &LinkType::Blocks,
                            actor,
                        )?;
                    }
                    step_ids.push(step_id);
                }
                prev_phase = Some(phase_id);
            }

            Ok(milestone_id)
        })?;

        debug!(milestone = %milestone_id, phases = spec.phases.len(), "plan created");
        self.get_plan(&milestone_id)
    }
}

/// Creates one plan-hierarchy issue inside the caller's transaction.
#[allow(clippy::too_many_arguments)]
fn create_plan_issue(
    conn: &Connection,
    registry: &TemplateRegistry,
    prefix: &str,
    node: &PlanNode,
    issue_type: &str,
    parent: Option<&str>,
    sequence: Option<i64>,
    actor: &str,
) -> Result<String> {
    let priority = node.priority.unwrap_or(2);
    validate_priority(priority)?;

    let now = Utc::now();
    let id = allocate_id(conn, prefix, &node.title, now)?;
    let mut fields = FieldMap::new();
    if let Some(seq) = sequence {
        fields.insert("sequence".into(), FieldValue::Number(seq as f64));
    }

    let issue = Issue {
        id: id.clone(),
        title: node.title.clone(),
        description: node.description.clone(),
        status: registry.initial_state(issue_type),
        priority,
        issue_type: issue_type.to_owned(),
        parent_id: parent.map(str::to_owned),
        created_at: now,
        updated_at: now,
        fields,
        ..Issue::default()
    };
    insert_issue_row(conn, &issue)?;
    emit_event(conn, &id, &EventType::Created, actor, None, None, None, now)?;
    Ok(id)
}

/// Sequence ordering key: integer `sequence` field, defaulting to 999.
fn sequence_of(issue: &Issue) -> i64 {
    issue
        .fields
        .get("sequence")
        .and_then(FieldValue::as_number)
        .map_or(999, |n| n as i64)
}

fn children_of_type(
    conn: &Connection,
    parent_id: &str,
    issue_type: &str,
) -> Result<Vec<Issue>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {ISSUE_COLUMNS} FROM issues
         WHERE parent_id = ?1 AND issue_type = ?2 ORDER BY created_at"
    ))?;
    let rows = stmt.query_map(rusqlite::params![parent_id, issue_type], scan_issue)?;
    let mut issues = Vec::new();
    for row in rows {
        issues.push(row?);
    }
    issues.sort_by(|a, b| {
        sequence_of(a)
            .cmp(&sequence_of(b))
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
    Ok(issues)
}

fn assemble_plan(
    conn: &Connection,
    registry: &TemplateRegistry,
    milestone_id: &str,
) -> Result<PlanView> {
    let milestone = get_issue_row(conn, milestone_id)?;
    let phases = children_of_type(conn, milestone_id, "phase")?;

    let mut phase_views = Vec::with_capacity(phases.len());
    let mut steps_done_total = (0_i64, 0_i64);
    let mut phases_done = 0_i64;
    for phase in phases {
        let steps = children_of_type(conn, &phase.id, "step")?;
        let total = steps.len() as i64;
        let completed = steps
            .iter()
            .filter(|s| registry.category(&s.issue_type, &s.status) == Category::Done)
            .count() as i64;
        steps_done_total.0 += completed;
        steps_done_total.1 += total;
        if registry.category(&phase.issue_type, &phase.status) == Category::Done {
            phases_done += 1;
        }
        let steps = hydrate_issues(conn, registry, steps)?;
        let phase = hydrate_issues(conn, registry, vec![phase])?.remove(0);
        phase_views.push(PhaseView {
            phase,
            steps,
            completed,
            total,
        });
    }

    let total_phases = phase_views.len() as i64;
    let progress_percent = if steps_done_total.1 > 0 {
        100 * steps_done_total.0 / steps_done_total.1
    } else if total_phases > 0 {
        100 * phases_done / total_phases
    } else {
        0
    };

    let milestone = hydrate_issues(conn, registry, vec![milestone])?.remove(0);
    Ok(PlanView {
        milestone,
        phases: phase_views,
        completed: phases_done,
        total: total_phases,
        progress_percent,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{NewIssue, PhaseSpec, StepSpec};
    use keel_config::ProjectConfig;

    fn test_store() -> Store {
        Store::open_in_memory(ProjectConfig::default()).unwrap()
    }

    fn quick(store: &Store, title: &str) -> String {
        store.create_issue(NewIssue::new(title), "t").unwrap().id
    }

    fn node(title: &str) -> PlanNode {
        PlanNode {
            title: title.into(),
            description: String::new(),
            priority: None,
        }
    }

    #[test]
    fn ready_and_blocked_are_disjoint() {
        let store = test_store();
        let a = quick(&store, "a");
        let b = quick(&store, "b");
        let c = quick(&store, "c");
        store.add_dependency(&a, &b, None, "t").unwrap();
        store.add_dependency(&a, &c, None, "t").unwrap();

        let ready: Vec<String> = store.get_ready().unwrap().iter().map(|i| i.id.clone()).collect();
        let blocked: Vec<String> =
            store.get_blocked().unwrap().iter().map(|i| i.id.clone()).collect();

        assert!(ready.contains(&b) && ready.contains(&c));
        assert_eq!(blocked, vec![a.clone()]);
        assert!(ready.iter().all(|id| !blocked.contains(id)));
    }

    #[test]
    fn blocked_becomes_ready_after_close() {
        let store = test_store();
        let a = quick(&store, "a");
        let b = quick(&store, "b");
        store.add_dependency(&a, &b, None, "t").unwrap();

        store.close_issue(&b, None, "t").unwrap();
        let ready: Vec<String> = store.get_ready().unwrap().iter().map(|i| i.id.clone()).collect();
        assert_eq!(ready, vec![a]);
        assert!(store.get_blocked().unwrap().is_empty());
    }

    #[test]
    fn ready_sorted_by_priority_then_age() {
        let store = test_store();
        let mut n = NewIssue::new("later-high");
        n.priority = Some(0);
        let high = store.create_issue(n, "t").unwrap();
        let mut n = NewIssue::new("mid");
        n.priority = Some(2);
        let mid = store.create_issue(n, "t").unwrap();

        let ready = store.get_ready().unwrap();
        assert_eq!(ready[0].id, high.id);
        assert_eq!(ready[1].id, mid.id);
    }

    #[test]
    fn critical_path_longest_chain() {
        let store = test_store();
        // Chain: d depends on c depends on b depends on a; plus a stray.
        let a = quick(&store, "a");
        let b = quick(&store, "b");
        let c = quick(&store, "c");
        let d = quick(&store, "d");
        quick(&store, "stray");
        store.add_dependency(&b, &a, None, "t").unwrap();
        store.add_dependency(&c, &b, None, "t").unwrap();
        store.add_dependency(&d, &c, None, "t").unwrap();

        let path = store.get_critical_path().unwrap();
        assert_eq!(path.length, 4);
        let ids: Vec<&str> = path.issues.iter().map(|i| i.id.as_str()).collect();
        assert_eq!(ids, vec![a.as_str(), b.as_str(), c.as_str(), d.as_str()]);

        // Closing the head shortens the open chain.
        store.close_issue(&a, None, "t").unwrap();
        let path = store.get_critical_path().unwrap();
        assert_eq!(path.length, 3);
    }

    #[test]
    fn critical_path_empty_store() {
        let store = test_store();
        let path = store.get_critical_path().unwrap();
        assert_eq!(path.length, 0);
        assert!(path.issues.is_empty());
    }

    #[test]
    fn create_plan_shape_and_sequencing() {
        let store = test_store();
        let spec = PlanSpec {
            milestone: node("v1 launch"),
            phases: vec![
                PhaseSpec {
                    node: node("design"),
                    steps: vec![
                        StepSpec {
                            node: node("write rfc"),
                            deps: vec![],
                        },
                        StepSpec {
                            node: node("review rfc"),
                            deps: vec![0],
                        },
                    ],
                },
                PhaseSpec {
                    node: node("build"),
                    steps: vec![StepSpec {
                        node: node("implement"),
                        deps: vec![],
                    }],
                },
            ],
        };

        let plan = store.create_plan(&spec, "t").unwrap();
        assert_eq!(plan.milestone.issue_type, "milestone");
        assert_eq!(plan.phases.len(), 2);
        assert_eq!(plan.total, 2);
        assert_eq!(plan.completed, 0);
        assert_eq!(plan.progress_percent, 0);

        let design = &plan.phases[0];
        assert_eq!(design.phase.title, "design");
        assert_eq!(design.steps.len(), 2);
        // Step 2 blocks on step 1.
        assert_eq!(design.steps[1].dependencies.len(), 1);
        assert_eq!(design.steps[1].dependencies[0].id, design.steps[0].id);

        // Phase 2 blocks on phase 1.
        let build = &plan.phases[1];
        assert_eq!(build.phase.dependencies.len(), 1);
        assert_eq!(build.phase.dependencies[0].id, design.phase.id);

        // Phase 2 is not ready until phase 1 closes.
        assert!(!build.phase.is_ready);
    }

    #[test]
    fn plan_progress_counts_steps() {
        let store = test_store();
        let spec = PlanSpec {
            milestone: node("m"),
            phases: vec![PhaseSpec {
                node: node("p"),
                steps: vec![
                    StepSpec {
                        node: node("s1"),
                        deps: vec![],
                    },
                    StepSpec {
                        node: node("s2"),
                        deps: vec![],
                    },
                ],
            }],
        };
        let plan = store.create_plan(&spec, "t").unwrap();
        let s1 = plan.phases[0].steps[0].id.clone();
        store.close_issue(&s1, None, "t").unwrap();

        let plan = store.get_plan(&plan.milestone.id).unwrap();
        assert_eq!(plan.phases[0].completed, 1);
        assert_eq!(plan.phases[0].total, 2);
        assert_eq!(plan.progress_percent, 50);
    }

    #[test]
    fn plan_step_forward_reference_rejected() {
        let store = test_store();
        let spec = PlanSpec {
            milestone: node("m"),
            phases: vec![PhaseSpec {
                node: node("p"),
                steps: vec![
                    StepSpec {
                        node: node("s1"),
                        deps: vec![1],
                    },
                    StepSpec {
                        node: node("s2"),
                        deps: vec![],
                    },
                ],
            }],
        };
        let err = store.create_plan(&spec, "t").unwrap_err();
        assert_eq!(err.code(), "invalid");
        // Nothing from the failed plan was committed.
        assert!(store.get_ready().unwrap().is_empty());
    }

    #[test]
    fn get_plan_missing_milestone() {
        let store = test_store();
        assert_eq!(store.get_plan("kl-none00").unwrap_err().code(), "not_found");
    }
}

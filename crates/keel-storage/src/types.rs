//! Parameter and view types for engine operations.

use serde::{Deserialize, Serialize};

use keel_core::enums::EventType;
use keel_core::fields::FieldMap;
use keel_core::issue::Issue;

/// Input for `create_issue`. Only `title` is required.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewIssue {
    pub title: String,

    /// Defaults to `task`.
    #[serde(default)]
    pub issue_type: Option<String>,

    /// Defaults to 2.
    #[serde(default)]
    pub priority: Option<i64>,

    #[serde(default)]
    pub parent_id: Option<String>,

    #[serde(default)]
    pub assignee: Option<String>,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub notes: String,

    #[serde(default)]
    pub labels: Vec<String>,

    /// Ids of blockers; a `blocks` edge is created for each.
    #[serde(default)]
    pub deps: Vec<String>,

    #[serde(default)]
    pub fields: FieldMap,
}

impl NewIssue {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }
}

/// Typed partial update for `update_issue`. `None` fields are left
/// unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct IssueUpdates {
    pub title: Option<String>,
    pub description: Option<String>,
    pub notes: Option<String>,
    pub status: Option<String>,
    pub priority: Option<i64>,
    /// Empty string unassigns.
    pub assignee: Option<String>,
    /// `Some(None)` clears the parent; `Some(Some(id))` reparents.
    #[serde(default, with = "double_option")]
    pub parent_id: Option<Option<String>>,
    /// Shallow-merge patch; an empty-string value deletes its key.
    pub fields: Option<FieldMap>,
}

/// Serde helper distinguishing "absent" from "explicit null" for
/// `parent_id`.
mod double_option {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Option<String>>, D::Error> {
        Ok(Some(Option::<String>::deserialize(deserializer)?))
    }
}

/// Result of closing one issue.
#[derive(Debug, Clone, Serialize)]
pub struct CloseOutcome {
    pub issue: Issue,
    /// Issues that were blocked before this close and are ready after it.
    pub newly_unblocked: Vec<Issue>,
}

/// One failed item in a batch operation.
#[derive(Debug, Clone, Serialize)]
pub struct BatchFailure {
    pub id: String,
    pub code: String,
    pub message: String,
}

/// Result of a batch operation. Batches are per-item transactions by
/// design: one bad item never aborts the rest.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchOutcome {
    pub succeeded: Vec<String>,
    pub failures: Vec<BatchFailure>,
}

/// Longest chain through the open `blocks` subgraph. Advisory only.
#[derive(Debug, Clone, Serialize)]
pub struct CriticalPath {
    pub issues: Vec<Issue>,
    pub length: usize,
}

/// Input node shared by the plan spec levels.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PlanNode {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub priority: Option<i64>,
}

/// One step inside a phase.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct StepSpec {
    #[serde(flatten)]
    pub node: PlanNode,
    /// Indices of earlier steps in the same phase this step blocks on.
    #[serde(default)]
    pub deps: Vec<usize>,
}

/// One phase of a plan.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PhaseSpec {
    #[serde(flatten)]
    pub node: PlanNode,
    #[serde(default)]
    pub steps: Vec<StepSpec>,
}

/// Input for `create_plan`: a milestone, its phases in order, each phase's
/// steps in order.
#[derive(Debug, Clone, Deserialize)]
pub struct PlanSpec {
    pub milestone: PlanNode,
    #[serde(default)]
    pub phases: Vec<PhaseSpec>,
}

/// One phase of an assembled plan view.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseView {
    pub phase: Issue,
    pub steps: Vec<Issue>,
    pub completed: i64,
    pub total: i64,
}

/// The assembled three-level plan hierarchy.
#[derive(Debug, Clone, Serialize)]
pub struct PlanView {
    pub milestone: Issue,
    pub phases: Vec<PhaseView>,
    /// Completed/total over phases.
    pub completed: i64,
    pub total: i64,
    /// Percent of steps done (phases when there are no steps).
    pub progress_percent: i64,
}

/// Aggregated project counts. Derived, never stored.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Stats {
    pub prefix: String,
    pub total: i64,
    /// Counts keyed by universal category name.
    pub by_category: Vec<(String, i64)>,
    pub by_type: Vec<(String, i64)>,
    pub by_priority: Vec<(i64, i64)>,
}

/// Per-type flow breakdown.
#[derive(Debug, Clone, Serialize)]
pub struct TypeFlow {
    pub issue_type: String,
    pub throughput: i64,
    pub avg_cycle_hours: Option<f64>,
    pub avg_lead_hours: Option<f64>,
}

/// Cycle time, lead time, and throughput over a trailing window.
#[derive(Debug, Clone, Serialize)]
pub struct FlowMetrics {
    pub window_days: i64,
    /// Issues closed inside the window.
    pub throughput: i64,
    /// First entry into a wip-category state until close.
    pub avg_cycle_hours: Option<f64>,
    /// Creation until close.
    pub avg_lead_hours: Option<f64>,
    pub by_type: Vec<TypeFlow>,
}

/// Result of `validate_issue`: template conformance of one stored issue.
#[derive(Debug, Clone, Serialize)]
pub struct ValidationReport {
    pub id: String,
    pub valid: bool,
    pub problems: Vec<String>,
}

/// Result of `undo_last`.
#[derive(Debug, Clone, Serialize)]
pub struct UndoOutcome {
    pub undone: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_type: Option<EventType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old_value: Option<String>,
}

/// Collision handling for `import_jsonl`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImportMode {
    /// Skip records whose issue id already exists.
    Merge,
    /// Fail the whole import on the first collision.
    Abort,
}

/// Counts of records imported by `import_jsonl`.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ImportReport {
    pub issues: u64,
    pub dependencies: u64,
    pub labels: u64,
    pub comments: u64,
    pub events: u64,
    /// Issues skipped on collision (merge mode), with their sub-records.
    pub skipped: u64,
}

//! Issue struct -- the central domain model of the keel tracker.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::dependency::DependencyRef;
use crate::fields::FieldMap;

fn is_false(b: &bool) -> bool {
    !b
}

fn is_zero(n: &i64) -> bool {
    *n == 0
}

fn is_empty_vec<T>(v: &Vec<T>) -> bool {
    v.is_empty()
}

/// A trackable work item.
///
/// `status` and `issue_type` are free-form strings validated against the
/// workflow template registry at the engine level; the core model does not
/// hard-code any state machine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Issue {
    #[serde(default)]
    pub id: String,

    #[serde(default)]
    pub title: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,

    #[serde(default)]
    pub status: String,

    /// Priority 0-4, 0 = critical. Always serialized: 0 is meaningful.
    #[serde(default)]
    pub priority: i64,

    #[serde(default)]
    pub issue_type: String,

    /// Weak reference into the parent forest; lookup only, no ownership.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,

    /// Empty string means unassigned.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub assignee: String,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub close_reason: String,

    /// Template-declared extension fields, shallow-merged on update.
    #[serde(default, skip_serializing_if = "FieldMap::is_empty")]
    pub fields: FieldMap,

    // ===== Hydrated relational data (not stored on the issues row) =====
    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub labels: Vec<String>,

    /// Outgoing edges: issues this one depends on.
    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub dependencies: Vec<DependencyRef>,

    /// Incoming edges: issues that depend on this one.
    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub dependents: Vec<DependencyRef>,

    /// Ids of issues whose `parent_id` points here.
    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub children: Vec<String>,

    /// Count of `blocks`-edges to issues whose category is not `done`.
    #[serde(default, skip_serializing_if = "is_zero")]
    pub open_blockers: i64,

    /// Category is `open` and no open blockers remain.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_ready: bool,
}

impl Default for Issue {
    fn default() -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            title: String::new(),
            description: String::new(),
            notes: String::new(),
            status: "open".to_owned(),
            priority: 2,
            issue_type: "task".to_owned(),
            parent_id: None,
            assignee: String::new(),
            created_at: now,
            updated_at: now,
            closed_at: None,
            close_reason: String::new(),
            fields: FieldMap::new(),
            labels: Vec::new(),
            dependencies: Vec::new(),
            dependents: Vec::new(),
            children: Vec::new(),
            open_blockers: 0,
            is_ready: false,
        }
    }
}

impl Issue {
    /// Returns `true` if the issue has an assignee.
    pub fn is_claimed(&self) -> bool {
        !self.assignee.is_empty()
    }
}

/// Builder for constructing an [`Issue`] with a fluent API.
pub struct IssueBuilder {
    issue: Issue,
}

impl IssueBuilder {
    /// Creates a new builder with the given title.
    pub fn new(title: impl Into<String>) -> Self {
        let mut issue = Issue::default();
        issue.title = title.into();
        Self { issue }
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.issue.id = id.into();
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.issue.description = description.into();
        self
    }

    pub fn notes(mut self, notes: impl Into<String>) -> Self {
        self.issue.notes = notes.into();
        self
    }

    pub fn status(mut self, status: impl Into<String>) -> Self {
        self.issue.status = status.into();
        self
    }

    pub fn priority(mut self, priority: i64) -> Self {
        self.issue.priority = priority;
        self
    }

    pub fn issue_type(mut self, issue_type: impl Into<String>) -> Self {
        self.issue.issue_type = issue_type.into();
        self
    }

    pub fn parent(mut self, parent_id: impl Into<String>) -> Self {
        self.issue.parent_id = Some(parent_id.into());
        self
    }

    pub fn assignee(mut self, assignee: impl Into<String>) -> Self {
        self.issue.assignee = assignee.into();
        self
    }

    pub fn created_at(mut self, t: DateTime<Utc>) -> Self {
        self.issue.created_at = t;
        self
    }

    pub fn updated_at(mut self, t: DateTime<Utc>) -> Self {
        self.issue.updated_at = t;
        self
    }

    pub fn closed_at(mut self, t: DateTime<Utc>) -> Self {
        self.issue.closed_at = Some(t);
        self
    }

    pub fn close_reason(mut self, reason: impl Into<String>) -> Self {
        self.issue.close_reason = reason.into();
        self
    }

    pub fn fields(mut self, fields: FieldMap) -> Self {
        self.issue.fields = fields;
        self
    }

    pub fn labels(mut self, labels: Vec<String>) -> Self {
        self.issue.labels = labels;
        self
    }

    /// Consumes the builder and returns the constructed [`Issue`].
    pub fn build(self) -> Issue {
        self.issue
    }
}

//! Dependency edges between issues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::LinkType;

/// A directed edge: `issue_id` depends on `depends_on_id`.
///
/// Composite identity is `(issue_id, depends_on_id, link_type)`; the same
/// pair of issues may be connected by edges of different types.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub issue_id: String,

    pub depends_on_id: String,

    #[serde(default, rename = "type")]
    pub link_type: LinkType,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

impl Dependency {
    /// Creates a `blocks` edge.
    pub fn blocks(issue_id: impl Into<String>, depends_on_id: impl Into<String>) -> Self {
        Self {
            issue_id: issue_id.into(),
            depends_on_id: depends_on_id.into(),
            link_type: LinkType::Blocks,
            created_at: Utc::now(),
        }
    }
}

/// A lightweight view of the issue at the far end of an edge, used when
/// hydrating issues for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRef {
    pub id: String,
    pub title: String,
    #[serde(default, rename = "type")]
    pub link_type: LinkType,
}

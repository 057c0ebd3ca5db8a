//! Filter types for paginated issue queries.

use serde::{Deserialize, Serialize};

/// Filter for `list_issues`. All criteria are ANDed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueFilter {
    pub status: Option<String>,
    pub issue_type: Option<String>,
    pub priority: Option<i64>,
    pub assignee: Option<String>,
    /// Issue must carry this label.
    pub label: Option<String>,
    /// Restrict to children of this issue.
    pub parent_id: Option<String>,
    /// Exclude archived issues unless explicitly requested.
    pub include_archived: bool,

    pub limit: i64,
    pub offset: i64,
}

impl Default for IssueFilter {
    fn default() -> Self {
        Self {
            status: None,
            issue_type: None,
            priority: None,
            assignee: None,
            label: None,
            parent_id: None,
            include_archived: false,
            limit: 100,
            offset: 0,
        }
    }
}

/// Filter for `claim_next`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClaimFilter {
    pub issue_type: Option<String>,
    pub priority_min: Option<i64>,
    pub priority_max: Option<i64>,
}

/// Escapes `%`, `_`, and the escape character itself for a `LIKE ... ESCAPE '\'`
/// scan, used when the full-text index is unavailable.
pub fn escape_like(pattern: &str) -> String {
    let mut out = String::with_capacity(pattern.len());
    for c in pattern.chars() {
        if matches!(c, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_defaults() {
        let f = IssueFilter::default();
        assert_eq!(f.limit, 100);
        assert_eq!(f.offset, 0);
        assert!(f.status.is_none());
        assert!(!f.include_archived);
    }

    #[test]
    fn like_escaping() {
        assert_eq!(escape_like("100%_done"), "100\\%\\_done");
        assert_eq!(escape_like("plain"), "plain");
        assert_eq!(escape_like("a\\b"), "a\\\\b");
    }
}

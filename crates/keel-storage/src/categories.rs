//! SQL fragments for category-aware queries.
//!
//! Ready/blocked computations are parameterized by the template registry's
//! state categories, never by literal state strings: the known
//! `(type, state, category)` triples are injected as a VALUES CTE and the
//! well-known-name heuristic covers template-less types. The `archived`
//! status is terminal for every type.

use rusqlite::types::ToSql;

use keel_templates::TemplateRegistry;

/// Builder for the `cat` CTE and the category expression that consults it.
pub(crate) struct CategorySql {
    triples: Vec<(String, String, String)>,
}

impl CategorySql {
    pub fn new(registry: &TemplateRegistry) -> Self {
        let triples = registry
            .category_triples()
            .into_iter()
            .map(|(t, s, c)| (t, s, c.as_str().to_owned()))
            .collect();
        Self { triples }
    }

    /// `WITH cat(...) AS (VALUES ...)` prefix, or empty when no templates
    /// are loaded. Its parameters come first in the statement; chain query
    /// parameters after [`Self::push_params`].
    pub fn with_clause(&self) -> String {
        if self.triples.is_empty() {
            return String::new();
        }
        let rows = vec!["(?, ?, ?)"; self.triples.len()].join(", ");
        format!("WITH cat(issue_type, status, category) AS (VALUES {rows}) ")
    }

    /// Appends the CTE parameters (flattened triples) to `params`.
    pub fn push_params(&self, params: &mut Vec<Box<dyn ToSql>>) {
        for (t, s, c) in &self.triples {
            params.push(Box::new(t.clone()));
            params.push(Box::new(s.clone()));
            params.push(Box::new(c.clone()));
        }
    }

    /// Category expression for the issue row aliased `alias`, evaluating to
    /// 'open' | 'wip' | 'done'.
    pub fn expr(&self, alias: &str) -> String {
        let fallback = format!(
            "CASE WHEN {alias}.status IN ('closed', 'done') THEN 'done' \
                  WHEN {alias}.status IN ('in_progress', 'wip') THEN 'wip' \
                  ELSE 'open' END"
        );
        let resolved = if self.triples.is_empty() {
            fallback
        } else {
            format!(
                "COALESCE((SELECT c.category FROM cat c \
                  WHERE c.issue_type = {alias}.issue_type AND c.status = {alias}.status), \
                 {fallback})"
            )
        };
        format!(
            "(CASE WHEN {alias}.status = 'archived' THEN 'done' ELSE {resolved} END)"
        )
    }

    /// Subquery counting open blockers of the issue row aliased `alias`.
    pub fn open_blockers_expr(&self, alias: &str) -> String {
        format!(
            "(SELECT COUNT(*) FROM dependencies d \
              JOIN issues b ON b.id = d.depends_on_id \
              WHERE d.issue_id = {alias}.id AND d.type = 'blocks' \
                AND {} != 'done')",
            self.expr("b")
        )
    }

    /// Condition: row is ready (open category, zero open blockers).
    pub fn ready_condition(&self, alias: &str) -> String {
        format!(
            "{} = 'open' AND {} = 0",
            self.expr(alias),
            self.open_blockers_expr(alias)
        )
    }

    /// Condition: row is blocked (open category, at least one open blocker).
    pub fn blocked_condition(&self, alias: &str) -> String {
        format!(
            "{} = 'open' AND {} > 0",
            self.expr(alias),
            self.open_blockers_expr(alias)
        )
    }
}

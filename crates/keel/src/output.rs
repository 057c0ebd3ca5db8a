//! Output rendering: compact text for humans, JSON for agents.

use anyhow::Result;
use serde::Serialize;

use keel_core::issue::Issue;

use crate::context::RuntimeContext;

/// Prints a serializable payload as pretty JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One-line issue rendering used by list-like commands.
pub fn issue_line(issue: &Issue) -> String {
    let mut flags = String::new();
    if issue.is_ready {
        flags.push_str(" [ready]");
    } else if issue.open_blockers > 0 {
        flags.push_str(&format!(" [blocked:{}]", issue.open_blockers));
    }
    let who = if issue.assignee.is_empty() {
        String::new()
    } else {
        format!(" @{}", issue.assignee)
    };
    format!(
        "{}  P{} {:<12} {}{}{}",
        issue.id, issue.priority, issue.status, issue.title, who, flags
    )
}

/// Prints a list of issues in either mode.
pub fn print_issues(ctx: &RuntimeContext, issues: &[Issue]) -> Result<()> {
    if ctx.json {
        return print_json(&issues);
    }
    if issues.is_empty() {
        println!("(no issues)");
        return Ok(());
    }
    for issue in issues {
        println!("{}", issue_line(issue));
    }
    Ok(())
}

/// Prints one issue in full detail.
pub fn print_issue_detail(ctx: &RuntimeContext, issue: &Issue) -> Result<()> {
    if ctx.json {
        return print_json(issue);
    }
    println!("{} - {}", issue.id, issue.title);
    println!(
        "  type {} · status {} · P{} · {}",
        issue.issue_type,
        issue.status,
        issue.priority,
        if issue.is_ready {
            "ready".to_owned()
        } else if issue.open_blockers > 0 {
            format!("{} open blockers", issue.open_blockers)
        } else {
            "not ready".to_owned()
        }
    );
    if !issue.assignee.is_empty() {
        println!("  assignee: {}", issue.assignee);
    }
    if let Some(parent) = &issue.parent_id {
        println!("  parent: {parent}");
    }
    if !issue.labels.is_empty() {
        println!("  labels: {}", issue.labels.join(", "));
    }
    if !issue.dependencies.is_empty() {
        println!("  depends on:");
        for dep in &issue.dependencies {
            println!("    {} ({}) {}", dep.id, dep.link_type, dep.title);
        }
    }
    if !issue.dependents.is_empty() {
        println!("  blocks:");
        for dep in &issue.dependents {
            println!("    {} ({}) {}", dep.id, dep.link_type, dep.title);
        }
    }
    if !issue.children.is_empty() {
        println!("  children: {}", issue.children.join(", "));
    }
    if !issue.fields.is_empty() {
        println!("  fields: {}", serde_json::to_string(&issue.fields)?);
    }
    if !issue.description.is_empty() {
        println!("\n{}", issue.description);
    }
    if !issue.notes.is_empty() {
        println!("\nnotes: {}", issue.notes);
    }
    Ok(())
}

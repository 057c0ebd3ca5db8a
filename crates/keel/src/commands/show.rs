//! `keel show`, `keel list`, `keel search`.

use anyhow::Result;

use keel_core::filter::IssueFilter;

use crate::cli::{ListArgs, SearchArgs, ShowArgs};
use crate::context::RuntimeContext;
use crate::output::{print_issue_detail, print_issues};

pub fn run_show(ctx: &RuntimeContext, args: &ShowArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let issue = store.get_issue(&args.id)?;
    print_issue_detail(ctx, &issue)?;

    if args.children && !ctx.json {
        let children = store.get_children(&args.id)?;
        if !children.is_empty() {
            println!("\nchildren:");
            print_issues(ctx, &children)?;
        }
    }
    Ok(())
}

pub fn run_list(ctx: &RuntimeContext, args: &ListArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let filter = IssueFilter {
        status: args.status.clone(),
        issue_type: args.issue_type.clone(),
        priority: args.priority,
        assignee: args.assignee.clone(),
        label: args.label.clone(),
        parent_id: args.parent.clone(),
        include_archived: args.include_archived,
        limit: args.limit,
        offset: args.offset,
    };
    let issues = store.list_issues(&filter)?;
    print_issues(ctx, &issues)
}

pub fn run_search(ctx: &RuntimeContext, args: &SearchArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let issues = store.search_issues(&args.query, args.limit, args.offset)?;
    print_issues(ctx, &issues)
}

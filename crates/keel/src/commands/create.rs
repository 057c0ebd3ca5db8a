//! `keel create`.

use anyhow::Result;

use keel_storage::NewIssue;

use crate::cli::CreateArgs;
use crate::commands::parse_field_args;
use crate::context::RuntimeContext;
use crate::output::print_issue_detail;

pub fn run(ctx: &RuntimeContext, args: &CreateArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let new = NewIssue {
        title: args.title.clone(),
        issue_type: args.issue_type.clone(),
        priority: args.priority,
        parent_id: args.parent.clone(),
        assignee: args.assignee.clone(),
        description: args.description.clone(),
        notes: args.notes.clone(),
        labels: args.labels.clone(),
        deps: args.deps.clone(),
        fields: parse_field_args(&args.fields)?,
    };

    let issue = store.create_issue(new, &ctx.actor)?;
    ctx.refresh_summary(&store);

    if ctx.json {
        print_issue_detail(ctx, &issue)?;
    } else {
        println!("Created {}", issue.id);
        print_issue_detail(ctx, &issue)?;
    }
    Ok(())
}

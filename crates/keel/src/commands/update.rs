//! `keel update`, `keel close`, `keel reopen`, `keel delete`.

use anyhow::{Result, bail};

use keel_storage::IssueUpdates;

use crate::cli::{CloseArgs, DeleteArgs, IdArg, UpdateArgs};
use crate::commands::parse_field_args;
use crate::context::RuntimeContext;
use crate::output::{print_issue_detail, print_issues, print_json};

pub fn run_update(ctx: &RuntimeContext, args: &UpdateArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let fields = if args.fields.is_empty() {
        None
    } else {
        Some(parse_field_args(&args.fields)?)
    };
    let parent_id = if args.no_parent {
        Some(None)
    } else {
        args.parent.clone().map(Some)
    };
    let updates = IssueUpdates {
        title: args.title.clone(),
        description: args.description.clone(),
        notes: args.notes.clone(),
        status: args.status.clone(),
        priority: args.priority,
        assignee: args.assignee.clone(),
        parent_id,
        fields,
    };

    let issue = store.update_issue(&args.id, &updates, false, &ctx.actor)?;
    ctx.refresh_summary(&store);
    print_issue_detail(ctx, &issue)
}

pub fn run_close(ctx: &RuntimeContext, args: &CloseArgs) -> Result<()> {
    let store = ctx.open_store()?;

    if args.ids.len() == 1 {
        let outcome = store.close_issue(&args.ids[0], args.reason.as_deref(), &ctx.actor)?;
        ctx.refresh_summary(&store);
        if ctx.json {
            return print_json(&outcome);
        }
        println!("Closed {}", outcome.issue.id);
        if !outcome.newly_unblocked.is_empty() {
            println!("Now unblocked:");
            print_issues(ctx, &outcome.newly_unblocked)?;
        }
        return Ok(());
    }

    let outcome = store.batch_close(&args.ids, args.reason.as_deref(), &ctx.actor);
    ctx.refresh_summary(&store);
    if ctx.json {
        return print_json(&outcome);
    }
    println!(
        "Closed {} of {} issues",
        outcome.succeeded.len(),
        args.ids.len()
    );
    for failure in &outcome.failures {
        println!("  {}: {} ({})", failure.id, failure.message, failure.code);
    }
    Ok(())
}

pub fn run_reopen(ctx: &RuntimeContext, args: &IdArg) -> Result<()> {
    let store = ctx.open_store()?;
    let issue = store.reopen_issue(&args.id, &ctx.actor)?;
    ctx.refresh_summary(&store);
    print_issue_detail(ctx, &issue)
}

pub fn run_delete(ctx: &RuntimeContext, args: &DeleteArgs) -> Result<()> {
    if !args.yes {
        bail!("deletion is permanent; pass --yes to confirm");
    }
    let store = ctx.open_store()?;
    store.delete_issue(&args.id)?;
    ctx.refresh_summary(&store);
    if ctx.json {
        print_json(&serde_json::json!({"deleted": args.id}))?;
    } else {
        println!("Deleted {}", args.id);
    }
    Ok(())
}

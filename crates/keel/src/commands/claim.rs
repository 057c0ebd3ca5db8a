//! `keel claim`, `keel release`, `keel next`.

use anyhow::Result;

use keel_core::filter::ClaimFilter;

use crate::cli::{ClaimArgs, IdArg, NextArgs};
use crate::context::RuntimeContext;
use crate::output::{print_issue_detail, print_json};

pub fn run_claim(ctx: &RuntimeContext, args: &ClaimArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let assignee = args.assignee.as_deref().unwrap_or(&ctx.actor);
    let issue = store.claim_issue(&args.id, assignee, &ctx.actor)?;
    ctx.refresh_summary(&store);
    if !ctx.json {
        println!("{} claimed by {assignee}", issue.id);
    }
    print_issue_detail(ctx, &issue)
}

pub fn run_release(ctx: &RuntimeContext, args: &IdArg) -> Result<()> {
    let store = ctx.open_store()?;
    let issue = store.release_claim(&args.id, &ctx.actor)?;
    ctx.refresh_summary(&store);
    if !ctx.json {
        println!("{} released", issue.id);
    }
    print_issue_detail(ctx, &issue)
}

pub fn run_next(ctx: &RuntimeContext, args: &NextArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let assignee = args.assignee.as_deref().unwrap_or(&ctx.actor);
    let filter = ClaimFilter {
        issue_type: args.issue_type.clone(),
        priority_min: args.min_priority,
        priority_max: args.max_priority,
    };

    match store.claim_next(assignee, &filter, &ctx.actor)? {
        Some(issue) => {
            ctx.refresh_summary(&store);
            if !ctx.json {
                println!("{} claimed by {assignee}", issue.id);
            }
            print_issue_detail(ctx, &issue)
        }
        None => {
            if ctx.json {
                print_json(&serde_json::json!({"claimed": null}))
            } else {
                println!("No ready work matches the filter.");
                Ok(())
            }
        }
    }
}

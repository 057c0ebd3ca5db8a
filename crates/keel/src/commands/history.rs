//! `keel events`, `keel undo`.

use anyhow::Result;

use crate::cli::{EventsArgs, IdArg};
use crate::context::RuntimeContext;
use crate::output::print_json;

pub fn run_events(ctx: &RuntimeContext, args: &EventsArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let events = if let Some(issue) = &args.issue {
        store.get_issue_events(issue, args.limit)?
    } else if let Some(since) = args.since {
        store.get_events_since(since)?
    } else {
        store.get_recent_events(args.limit)?
    };

    if ctx.json {
        return print_json(&events);
    }
    if events.is_empty() {
        println!("(no events)");
    }
    for event in events {
        let detail = match (&event.old_value, &event.new_value) {
            (Some(old), Some(new)) => format!(" {old:?} -> {new:?}"),
            (None, Some(new)) => format!(" -> {new:?}"),
            (Some(old), None) => format!(" {old:?} ->"),
            (None, None) => String::new(),
        };
        println!(
            "#{} [{}] {} {} by {}{}",
            event.id,
            event.created_at.format("%Y-%m-%d %H:%M"),
            event.issue_id,
            event.event_type,
            event.actor,
            detail
        );
    }
    Ok(())
}

pub fn run_undo(ctx: &RuntimeContext, args: &IdArg) -> Result<()> {
    let store = ctx.open_store()?;
    let outcome = store.undo_last(&args.id, &ctx.actor)?;
    if outcome.undone {
        ctx.refresh_summary(&store);
    }
    if ctx.json {
        return print_json(&outcome);
    }
    match &outcome.event_type {
        Some(event_type) => println!(
            "Reversed {} on {} (restored {:?})",
            event_type,
            args.id,
            outcome.old_value.as_deref().unwrap_or("")
        ),
        None => println!("Nothing reversible in {}'s history", args.id),
    }
    Ok(())
}

//! `keel comment`, `keel comments`, `keel label`.

use anyhow::Result;

use crate::cli::{CommentArgs, IdArg, LabelCommands};
use crate::context::RuntimeContext;
use crate::output::print_json;

pub fn run_add(ctx: &RuntimeContext, args: &CommentArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let comment = store.add_comment(&args.id, &ctx.actor, &args.text)?;
    ctx.refresh_summary(&store);
    if ctx.json {
        return print_json(&comment);
    }
    println!("Comment {} added to {}", comment.id, comment.issue_id);
    Ok(())
}

pub fn run_list(ctx: &RuntimeContext, args: &IdArg) -> Result<()> {
    let store = ctx.open_store()?;
    let comments = store.get_comments(&args.id)?;
    if ctx.json {
        return print_json(&comments);
    }
    if comments.is_empty() {
        println!("(no comments)");
    }
    for comment in comments {
        println!(
            "[{}] {}: {}",
            comment.created_at.format("%Y-%m-%d %H:%M"),
            comment.author,
            comment.text
        );
    }
    Ok(())
}

pub fn run_label(ctx: &RuntimeContext, command: &LabelCommands) -> Result<()> {
    let store = ctx.open_store()?;
    match command {
        LabelCommands::Add(args) => {
            store.add_label(&args.id, &args.name, &ctx.actor)?;
            ctx.refresh_summary(&store);
            if !ctx.json {
                println!("Labeled {} with {}", args.id, args.name);
            }
        }
        LabelCommands::Remove(args) => {
            store.remove_label(&args.id, &args.name, &ctx.actor)?;
            ctx.refresh_summary(&store);
            if !ctx.json {
                println!("Removed {} from {}", args.name, args.id);
            }
        }
    }
    Ok(())
}

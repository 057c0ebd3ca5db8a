//! `keel dep`, `keel ready`, `keel blocked`, `keel path`.

use anyhow::Result;

use keel_core::enums::LinkType;

use crate::cli::{DepCommands, DepEdgeArgs};
use crate::context::RuntimeContext;
use crate::output::{print_issues, print_json};

pub fn run_dep(ctx: &RuntimeContext, command: &DepCommands) -> Result<()> {
    let store = ctx.open_store()?;
    match command {
        DepCommands::Add(args) => {
            store.add_dependency(&args.from, &args.to, link_type(args), &ctx.actor)?;
            ctx.refresh_summary(&store);
            if !ctx.json {
                println!("{} now depends on {}", args.from, args.to);
            }
            Ok(())
        }
        DepCommands::Remove(args) => {
            store.remove_dependency(&args.from, &args.to, link_type(args), &ctx.actor)?;
            ctx.refresh_summary(&store);
            if !ctx.json {
                println!("Removed {} -> {}", args.from, args.to);
            }
            Ok(())
        }
        DepCommands::List => {
            let deps = store.get_all_dependencies()?;
            if ctx.json {
                return print_json(&deps);
            }
            if deps.is_empty() {
                println!("(no dependencies)");
            }
            for dep in deps {
                println!(
                    "{} -[{}]-> {}",
                    dep.issue_id, dep.link_type, dep.depends_on_id
                );
            }
            Ok(())
        }
    }
}

fn link_type(args: &DepEdgeArgs) -> Option<LinkType> {
    args.link_type.as_deref().map(LinkType::from)
}

pub fn run_ready(ctx: &RuntimeContext) -> Result<()> {
    let store = ctx.open_store()?;
    let issues = store.get_ready()?;
    print_issues(ctx, &issues)
}

pub fn run_blocked(ctx: &RuntimeContext) -> Result<()> {
    let store = ctx.open_store()?;
    let issues = store.get_blocked()?;
    print_issues(ctx, &issues)
}

pub fn run_path(ctx: &RuntimeContext) -> Result<()> {
    let store = ctx.open_store()?;
    let path = store.get_critical_path()?;
    if ctx.json {
        return print_json(&path);
    }
    if path.issues.is_empty() {
        println!("(no open blocking chain)");
        return Ok(());
    }
    println!("Critical path ({} issues):", path.length);
    print_issues(ctx, &path.issues)
}

//! `keel plan` -- create and view three-level plans.

use anyhow::{Context as _, Result};

use keel_storage::{PlanSpec, PlanView};

use crate::cli::{IdArg, PlanCommands, PlanCreateArgs};
use crate::context::RuntimeContext;
use crate::output::print_json;

pub fn run(ctx: &RuntimeContext, command: &PlanCommands) -> Result<()> {
    match command {
        PlanCommands::Create(args) => run_create(ctx, args),
        PlanCommands::Show(args) => run_show(ctx, args),
    }
}

fn run_create(ctx: &RuntimeContext, args: &PlanCreateArgs) -> Result<()> {
    let data = if args.spec == "-" {
        std::io::read_to_string(std::io::stdin()).context("reading plan spec from stdin")?
    } else {
        std::fs::read_to_string(&args.spec)
            .with_context(|| format!("reading plan spec {}", args.spec))?
    };
    let spec: PlanSpec = serde_json::from_str(&data).context("parsing plan spec")?;

    let store = ctx.open_store()?;
    let plan = store.create_plan(&spec, &ctx.actor)?;
    ctx.refresh_summary(&store);

    if ctx.json {
        return print_json(&plan);
    }
    println!("Created plan {}", plan.milestone.id);
    print_plan(&plan);
    Ok(())
}

fn run_show(ctx: &RuntimeContext, args: &IdArg) -> Result<()> {
    let store = ctx.open_store()?;
    let plan = store.get_plan(&args.id)?;
    if ctx.json {
        return print_json(&plan);
    }
    print_plan(&plan);
    Ok(())
}

fn print_plan(plan: &PlanView) {
    println!(
        "{} {} - {}% done ({}/{} phases)",
        plan.milestone.id, plan.milestone.title, plan.progress_percent, plan.completed, plan.total
    );
    for phase in &plan.phases {
        println!(
            "  {} {} [{}/{}]",
            phase.phase.id, phase.phase.title, phase.completed, phase.total
        );
        for step in &phase.steps {
            let mark = if step.closed_at.is_some() { "x" } else { " " };
            println!("    [{mark}] {} {}", step.id, step.title);
        }
    }
}

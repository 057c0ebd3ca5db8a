//! Analytics and maintenance verbs: stats, flow, archive, compact, vacuum,
//! analyze, export, import, summary.

use std::io::{BufReader, Write as _};

use anyhow::{Context as _, Result};

use keel_storage::ImportMode;

use crate::cli::{
    ArchiveArgs, CompactArgs, ExportArgs, FlowArgs, ImportArgs, ImportModeArg, SummaryArgs,
};
use crate::context::RuntimeContext;
use crate::output::print_json;

pub fn run_stats(ctx: &RuntimeContext) -> Result<()> {
    let store = ctx.open_store()?;
    let stats = store.get_stats()?;
    if ctx.json {
        return print_json(&stats);
    }
    println!("{} issues (prefix {})", stats.total, stats.prefix);
    for (category, count) in &stats.by_category {
        println!("  {category}: {count}");
    }
    println!("by type:");
    for (issue_type, count) in &stats.by_type {
        println!("  {issue_type}: {count}");
    }
    println!("by priority:");
    for (priority, count) in &stats.by_priority {
        println!("  P{priority}: {count}");
    }
    Ok(())
}

pub fn run_flow(ctx: &RuntimeContext, args: &FlowArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let flow = store.get_flow_metrics(args.days)?;
    if ctx.json {
        return print_json(&flow);
    }
    println!(
        "Last {} days: {} closed",
        flow.window_days, flow.throughput
    );
    if let Some(lead) = flow.avg_lead_hours {
        println!("  avg lead time: {lead:.1}h");
    }
    if let Some(cycle) = flow.avg_cycle_hours {
        println!("  avg cycle time: {cycle:.1}h");
    }
    for t in &flow.by_type {
        println!("  {}: {} closed", t.issue_type, t.throughput);
    }
    Ok(())
}

pub fn run_archive(ctx: &RuntimeContext, args: &ArchiveArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let archived = store.archive_closed(args.days, &ctx.actor)?;
    ctx.refresh_summary(&store);
    if ctx.json {
        return print_json(&archived);
    }
    println!("Archived {} issues", archived.len());
    Ok(())
}

pub fn run_compact(ctx: &RuntimeContext, args: &CompactArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let deleted = store.compact_events(args.keep)?;
    if ctx.json {
        return print_json(&serde_json::json!({"deleted_events": deleted}));
    }
    println!("Deleted {deleted} journal entries of archived issues");
    Ok(())
}

pub fn run_vacuum(ctx: &RuntimeContext) -> Result<()> {
    let store = ctx.open_store()?;
    store.vacuum()?;
    if !ctx.json {
        println!("Store compacted.");
    }
    Ok(())
}

pub fn run_analyze(ctx: &RuntimeContext) -> Result<()> {
    let store = ctx.open_store()?;
    store.analyze()?;
    if !ctx.json {
        println!("Planner statistics refreshed.");
    }
    Ok(())
}

pub fn run_export(ctx: &RuntimeContext, args: &ExportArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let records = match &args.output {
        Some(path) => {
            let mut file = std::fs::File::create(path)
                .with_context(|| format!("creating {path}"))?;
            let n = store.export_jsonl(&mut file)?;
            file.flush()?;
            n
        }
        None => {
            let stdout = std::io::stdout();
            let mut lock = stdout.lock();
            store.export_jsonl(&mut lock)?
        }
    };
    if let Some(path) = &args.output {
        if !ctx.json {
            eprintln!("Exported {records} records to {path}");
        }
    }
    Ok(())
}

pub fn run_import(ctx: &RuntimeContext, args: &ImportArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let mode = match args.mode {
        ImportModeArg::Merge => ImportMode::Merge,
        ImportModeArg::Abort => ImportMode::Abort,
    };

    let report = if args.input == "-" {
        let stdin = std::io::stdin();
        store.import_jsonl(stdin.lock(), mode)?
    } else {
        let file = std::fs::File::open(&args.input)
            .with_context(|| format!("opening {}", args.input))?;
        store.import_jsonl(BufReader::new(file), mode)?
    };
    ctx.refresh_summary(&store);

    if ctx.json {
        return print_json(&report);
    }
    println!(
        "Imported {} issues, {} dependencies, {} labels, {} comments, {} events ({} skipped)",
        report.issues,
        report.dependencies,
        report.labels,
        report.comments,
        report.events,
        report.skipped
    );
    Ok(())
}

pub fn run_summary(ctx: &RuntimeContext, args: &SummaryArgs) -> Result<()> {
    let store = ctx.open_store()?;
    if args.stdout {
        print!("{}", keel_summary::render_summary(&store)?);
        return Ok(());
    }
    let target = match &args.output {
        Some(path) => std::path::PathBuf::from(path),
        None => keel_config::keel_dir::summary_path(&ctx.keel_dir()?),
    };
    keel_summary::write_summary_to(&store, &target)?;
    if !ctx.json {
        println!("Summary written to {}", target.display());
    }
    Ok(())
}

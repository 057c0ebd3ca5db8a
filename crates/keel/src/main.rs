//! `keel` -- agent-native issue tracker CLI.
//!
//! Parses arguments with clap, resolves the runtime context, and dispatches
//! to command handlers. Every mutating verb regenerates the project summary
//! after the engine commits.

mod cli;
mod commands;
mod context;
mod output;

use clap::Parser;

use cli::{Cli, Commands};
use context::RuntimeContext;
use keel_storage::EngineError;

fn main() {
    let cli = Cli::parse();
    let ctx = RuntimeContext::from_global_args(&cli.global);

    if ctx.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("keel=debug,keel_storage=debug,keel_templates=debug")
            .with_writer(std::io::stderr)
            .init();
    }

    let result = match &cli.command {
        Some(Commands::Init(args)) => commands::init::run(&ctx, args),
        Some(Commands::Create(args)) => commands::create::run(&ctx, args),
        Some(Commands::Show(args)) => commands::show::run_show(&ctx, args),
        Some(Commands::List(args)) => commands::show::run_list(&ctx, args),
        Some(Commands::Search(args)) => commands::show::run_search(&ctx, args),
        Some(Commands::Update(args)) => commands::update::run_update(&ctx, args),
        Some(Commands::Close(args)) => commands::update::run_close(&ctx, args),
        Some(Commands::Reopen(args)) => commands::update::run_reopen(&ctx, args),
        Some(Commands::Delete(args)) => commands::update::run_delete(&ctx, args),
        Some(Commands::Claim(args)) => commands::claim::run_claim(&ctx, args),
        Some(Commands::Release(args)) => commands::claim::run_release(&ctx, args),
        Some(Commands::Next(args)) => commands::claim::run_next(&ctx, args),
        Some(Commands::Dep(command)) => commands::dep::run_dep(&ctx, command),
        Some(Commands::Ready) => commands::dep::run_ready(&ctx),
        Some(Commands::Blocked) => commands::dep::run_blocked(&ctx),
        Some(Commands::Path) => commands::dep::run_path(&ctx),
        Some(Commands::Plan(command)) => commands::plan::run(&ctx, command),
        Some(Commands::Comment(args)) => commands::comment::run_add(&ctx, args),
        Some(Commands::Comments(args)) => commands::comment::run_list(&ctx, args),
        Some(Commands::Label(command)) => commands::comment::run_label(&ctx, command),
        Some(Commands::Events(args)) => commands::history::run_events(&ctx, args),
        Some(Commands::Undo(args)) => commands::history::run_undo(&ctx, args),
        Some(Commands::Validate(args)) => commands::types_cmd::run_validate(&ctx, args),
        Some(Commands::Stats) => commands::admin::run_stats(&ctx),
        Some(Commands::Flow(args)) => commands::admin::run_flow(&ctx, args),
        Some(Commands::Archive(args)) => commands::admin::run_archive(&ctx, args),
        Some(Commands::Compact(args)) => commands::admin::run_compact(&ctx, args),
        Some(Commands::Vacuum) => commands::admin::run_vacuum(&ctx),
        Some(Commands::Analyze) => commands::admin::run_analyze(&ctx),
        Some(Commands::Export(args)) => commands::admin::run_export(&ctx, args),
        Some(Commands::Import(args)) => commands::admin::run_import(&ctx, args),
        Some(Commands::Summary(args)) => commands::admin::run_summary(&ctx, args),
        Some(Commands::Types(command)) => commands::types_cmd::run_types(&ctx, command),
        Some(Commands::Packs) => commands::types_cmd::run_packs(&ctx),
        Some(Commands::Guide(args)) => commands::types_cmd::run_guide(&ctx, args),
        Some(Commands::Explain(args)) => commands::types_cmd::run_explain(&ctx, args),
        Some(Commands::Reload) => commands::types_cmd::run_reload(&ctx),
        Some(Commands::Completion(args)) => commands::completion::run(&ctx, args),
        None => {
            use clap::CommandFactory;
            Cli::command().print_help().ok();
            println!();
            Ok(())
        }
    };

    if let Err(e) = result {
        if cli.global.json {
            // Engine errors carry a stable machine code for agents.
            let payload = match e.downcast_ref::<EngineError>() {
                Some(engine_err) => serde_json::to_value(engine_err.structured())
                    .unwrap_or_else(|_| serde_json::json!({"error": e.to_string()})),
                None => serde_json::json!({"code": "unknown", "message": format!("{e:#}")}),
            };
            eprintln!("{}", serde_json::to_string_pretty(&payload).unwrap_or_default());
        } else {
            eprintln!("Error: {e:#}");
        }
        std::process::exit(1);
    }
}

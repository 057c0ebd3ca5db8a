//! Template inspection verbs: `keel types`, `keel packs`, `keel guide`,
//! `keel explain`, `keel reload`.

use anyhow::{Result, bail};

use crate::cli::{ExplainArgs, GuideArgs, IdArg, TypeNameArg, TypesCommands};
use crate::context::RuntimeContext;
use crate::output::print_json;

pub fn run_types(ctx: &RuntimeContext, command: &TypesCommands) -> Result<()> {
    let store = ctx.open_store()?;
    match command {
        TypesCommands::List => {
            let registry = store.registry();
            let types = registry.list_types();
            if ctx.json {
                return print_json(&types);
            }
            for t in types {
                println!(
                    "{:<12} {:<16} pack {} · {} states",
                    t.name,
                    t.display_name,
                    t.pack,
                    t.states.len()
                );
            }
            Ok(())
        }
        TypesCommands::Show(TypeNameArg { name }) => {
            let registry = store.registry();
            let Some(template) = registry.get_type(name) else {
                bail!("no template for type {name:?}");
            };
            if ctx.json {
                return print_json(template);
            }
            println!("{} ({}) from pack {}", template.name, template.display_name, template.pack);
            println!("states:");
            for state in &template.states {
                let initial = if state.name == template.initial_state {
                    " (initial)"
                } else {
                    ""
                };
                println!("  {} [{}]{}", state.name, state.category, initial);
            }
            println!("transitions:");
            for t in &template.transitions {
                let gate = if t.requires_fields.is_empty() {
                    String::new()
                } else {
                    format!(" requires {}", t.requires_fields.join(", "))
                };
                println!("  {} -> {} [{}]{}", t.from, t.to, t.enforcement, gate);
            }
            if !template.fields.is_empty() {
                println!("fields:");
                for f in &template.fields {
                    println!("  {} ({})", f.name, f.kind.as_str());
                }
            }
            if !template.suggested_children.is_empty() {
                println!("suggested children: {}", template.suggested_children.join(", "));
            }
            if !template.suggested_labels.is_empty() {
                println!("suggested labels: {}", template.suggested_labels.join(", "));
            }
            Ok(())
        }
        TypesCommands::Transitions(IdArg { id }) => {
            let issue = store.get_issue(id)?;
            let registry = store.registry();
            let options =
                registry.valid_transitions(&issue.issue_type, &issue.status, &issue.fields);
            if ctx.json {
                return print_json(&options);
            }
            if options.is_empty() {
                println!(
                    "No declared transitions from {} for type {}",
                    issue.status, issue.issue_type
                );
            }
            for option in options {
                let gate = if option.missing_fields.is_empty() {
                    String::new()
                } else {
                    format!(" (missing: {})", option.missing_fields.join(", "))
                };
                println!("  -> {} [{}]{}", option.to, option.enforcement, gate);
            }
            Ok(())
        }
    }
}

pub fn run_validate(ctx: &RuntimeContext, args: &IdArg) -> Result<()> {
    let store = ctx.open_store()?;
    let report = store.validate_issue(&args.id)?;
    if ctx.json {
        return print_json(&report);
    }
    if report.valid {
        println!("{} conforms to its template", report.id);
    } else {
        println!("{} has {} problem(s):", report.id, report.problems.len());
        for problem in &report.problems {
            println!("  - {problem}");
        }
    }
    Ok(())
}

pub fn run_packs(ctx: &RuntimeContext) -> Result<()> {
    let store = ctx.open_store()?;
    let registry = store.registry();
    let packs = registry.list_packs();
    if ctx.json {
        return print_json(&packs);
    }
    for pack in packs {
        println!(
            "{:<10} v{:<8} {:<9} [{}] {}",
            pack.name,
            pack.version,
            pack.source,
            if pack.enabled { "enabled" } else { "disabled" },
            pack.types.join(", ")
        );
    }
    Ok(())
}

pub fn run_guide(ctx: &RuntimeContext, args: &GuideArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let registry = store.registry();
    match registry.workflow_guide(args.pack.as_deref()) {
        Some(guide) => {
            println!("{guide}");
            Ok(())
        }
        None => bail!("no guide available"),
    }
}

pub fn run_explain(ctx: &RuntimeContext, args: &ExplainArgs) -> Result<()> {
    let store = ctx.open_store()?;
    let registry = store.registry();
    match registry.explain_state(&args.issue_type, &args.state) {
        Some(text) => {
            println!("{text}");
            Ok(())
        }
        None => bail!(
            "unknown state {:?} for type {:?}",
            args.state,
            args.issue_type
        ),
    }
}

pub fn run_reload(ctx: &RuntimeContext) -> Result<()> {
    let store = ctx.open_store()?;
    store.reload_templates()?;
    if !ctx.json {
        println!("Templates reloaded.");
    }
    Ok(())
}

//! `keel init` -- create the .keel/ directory, config, store, and first
//! summary.

use anyhow::{Result, bail};

use keel_config::keel_dir::{db_path, ensure_keel_dir, summary_path};
use keel_config::{ProjectConfig, save_config};
use keel_storage::Store;

use crate::cli::InitArgs;
use crate::context::RuntimeContext;
use crate::output::print_json;

pub fn run(ctx: &RuntimeContext, args: &InitArgs) -> Result<()> {
    let cwd = std::env::current_dir()?;
    if cwd.join(".keel").is_dir() {
        bail!(".keel already exists here");
    }

    let config = ProjectConfig::with_prefix(args.prefix.clone());
    config.validate()?;

    let keel_dir = ensure_keel_dir(&cwd)?;
    save_config(&keel_dir, &config)?;

    // Opening runs the migrations and stamps the schema version.
    let store = Store::open(db_path(&keel_dir), config.clone(), Some(&keel_dir))?;
    keel_summary::write_summary_to(&store, &summary_path(&keel_dir))?;

    if ctx.json {
        print_json(&serde_json::json!({
            "keel_dir": keel_dir.display().to_string(),
            "prefix": config.prefix,
            "schema_version": store.schema_version()?,
        }))?;
    } else {
        println!("Initialized {} (prefix {})", keel_dir.display(), config.prefix);
        println!("Summary at {}", summary_path(&keel_dir).display());
    }
    Ok(())
}

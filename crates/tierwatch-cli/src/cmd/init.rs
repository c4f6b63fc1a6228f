use std::path::Path;

use tierwatch_core::{config::Config, paths};

pub fn run(root: &Path, json: bool) -> anyhow::Result<()> {
    std::fs::create_dir_all(paths::tierwatch_dir(root))?;
    let created = Config::init(root)?;
    // Opening creates the database and its tables.
    drop(super::open_store(root)?);

    if json {
        crate::output::print_json(&serde_json::json!({
            "root": root,
            "config_created": created,
            "config": paths::config_path(root),
            "database": paths::db_path(root),
        }))?;
        return Ok(());
    }

    if created {
        println!("wrote {}", paths::CONFIG_FILE);
    } else {
        println!("kept existing {}", paths::CONFIG_FILE);
    }
    println!("ticket store at {}", paths::DB_FILE);
    println!();
    println!("Next: edit the owners section, then `tierwatch policy validate`.");
    Ok(())
}

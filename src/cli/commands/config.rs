//! Config Command
//!
//! Usage:
//!   chainsift config show [-f json|toml]
//!   chainsift config path

use crate::config::ConfigLoader;
use crate::types::Result;

/// Print the merged effective configuration
pub fn show(format: &str) -> Result<()> {
    let config = ConfigLoader::load()?;
    println!("{}", ConfigLoader::render(&config, format == "json")?);
    Ok(())
}

/// Print configuration file locations
pub fn path() -> Result<()> {
    match ConfigLoader::global_config_path() {
        Some(global) => println!("Global:  {}{}", global.display(), marker(global.exists())),
        None => println!("Global:  (no config directory)"),
    }

    let project = ConfigLoader::project_config_path();
    println!("Project: {}{}", project.display(), marker(project.exists()));
    println!("Env:     CHAINSIFT_<SECTION>__<KEY>");
    Ok(())
}

fn marker(exists: bool) -> &'static str {
    if exists { "" } else { " (not found)" }
}

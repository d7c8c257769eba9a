//! Locate command handler
//!
//! Prints the store paths and public URLs a run with the given properties
//! would upload to.

use anyhow::Result;
use colored::*;
use kiln_core::router::{self, ArtifactLocation};

use crate::commands::run_properties;
use crate::config::Config;

pub fn locate(config: &Config, params: Vec<(String, String)>) -> Result<()> {
    let props = run_properties(config, params)?;

    let category = props.resolve_category()?;
    println!("{}", format!("Category: {}", category).bold());

    print_location("Tarball", router::tarball_location(&props));
    print_location("Packages", router::repo_location(&props));

    Ok(())
}

fn print_location(label: &str, location: kiln_core::Result<ArtifactLocation>) {
    match location {
        Ok(location) => {
            println!("  {} {}", "▸".cyan(), label.bold());
            println!("    Path: {}", location.path());
            println!("    URL:  {}", location.url().cyan());
        }
        Err(e) => {
            println!("  {} {}", "▸".cyan(), label.bold());
            println!("    {}", e.to_string().yellow());
        }
    }
}

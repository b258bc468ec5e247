//! Configuration command
//!
//! Prints where configuration is read from, a sample file, or the
//! effective settings.

use anyhow::{Context, Result};
use canopy_core::CanopyConfig;
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};

fn resolved_path(explicit: Option<&Path>) -> Option<PathBuf> {
    explicit
        .map(Path::to_path_buf)
        .or_else(canopy_core::config::default_config_path)
}

pub fn run(explicit: Option<&Path>, config: &CanopyConfig, path: bool, example: bool) -> Result<()> {
    if example {
        print!("{}", CanopyConfig::example());
        return Ok(());
    }

    let location = resolved_path(explicit);
    if path {
        let location = location.context("Could not determine config file path")?;
        println!("{}", location.display());
        return Ok(());
    }

    println!("{}", "Effective Configuration".bold());
    match &location {
        Some(location) if location.exists() => {
            println!("{}: {}\n", "Location".dimmed(), location.display().dimmed());
        }
        Some(location) => {
            println!(
                "{}: {} {}\n",
                "Location".dimmed(),
                location.display().dimmed(),
                "(not found, using defaults)".yellow()
            );
        }
        None => println!("{}\n", "No config directory, using defaults".yellow()),
    }

    let rendered = config.to_toml().context("Failed to render configuration")?;
    print!("{}", rendered);
    Ok(())
}

//! Show backend and manager status

use anyhow::{Context, Result};
use canopy_core::{BackendKind, CanopyConfig, WatchOptions};
use canopy_watcher::ManagerStatus;
use owo_colors::OwoColorize;
use std::path::PathBuf;

pub async fn run(config: &CanopyConfig, roots: &[PathBuf], json: bool) -> Result<()> {
    let manager = canopy_watcher::init_default(config);

    let mut watchers = Vec::with_capacity(roots.len());
    for root in roots {
        let watcher = canopy_watcher::watch_path(root, WatchOptions::recursive())
            .await
            .with_context(|| format!("Failed to watch {}", root.display()))?;
        watchers.push(watcher);
    }

    let status = manager.status();
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(&status).context("Failed to serialize status")?
        );
    } else {
        print_status(&status, &canopy_watcher::print_watchers());
    }

    drop(watchers);
    canopy_watcher::shutdown_default().await;
    Ok(())
}

fn print_status(status: &ManagerStatus, tree: &str) {
    println!("{}", "Watcher Status".bold());
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!();

    let backend = match status.backend.kind {
        BackendKind::Native => "native".to_string(),
        BackendKind::Poll => match status.backend.poll_interval_ms {
            Some(ms) => format!("poll ({}ms)", ms),
            None => "poll".to_string(),
        },
    };
    println!("Backend:        {}", backend.cyan());
    println!(
        "Case:           {}",
        if status.case_sensitive { "sensitive" } else { "insensitive" }
    );
    println!("Native watches: {}", status.backend.active_watches);
    println!("Live handles:   {}", status.live_handles);
    println!();

    if status.roots.is_empty() {
        println!("{}", "No watched roots".dimmed());
        return;
    }

    println!("Roots:");
    for root in &status.roots {
        let scope = if root.recursive { "recursive" } else { "non-recursive" };
        print!("  {} {} {}", root.handle.to_string().yellow(), root.path.display(), scope.dimmed());
        if root.adopted > 0 {
            print!(" {}", format!("(+{} adopted)", root.adopted).dimmed());
        }
        println!();
    }
    println!();
    println!("Tree:");
    print!("{}", tree);
}

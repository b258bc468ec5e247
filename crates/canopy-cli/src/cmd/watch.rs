//! Watch roots and print changes until interrupted

use anyhow::{Context, Result};
use canopy_core::{ActionKind, CanopyConfig, ChangeEvent, EntryKind, IncludeFilter, WatchOptions};
use ignore::gitignore::{Gitignore, GitignoreBuilder};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;

pub struct WatchArgs {
    pub roots: Vec<PathBuf>,
    pub recursive: bool,
    pub verbose: bool,
    pub json: bool,
    pub excludes: Vec<String>,
    pub tree: bool,
}

pub async fn run(config: &CanopyConfig, args: WatchArgs) -> Result<()> {
    let manager = canopy_watcher::init_default(config);
    let cwd = std::env::current_dir().context("Failed to read current directory")?;

    let (tx, mut rx) = mpsc::unbounded_channel::<Vec<ChangeEvent>>();
    let mut watchers = Vec::with_capacity(args.roots.len());

    for root in &args.roots {
        let root = cwd.join(root);
        let mut options = if args.recursive {
            WatchOptions::recursive()
        } else {
            WatchOptions::non_recursive()
        };
        if !args.excludes.is_empty() {
            let excludes = build_excludes(&root, &args.excludes)?;
            options = options.with_include(exclude_filter(root.clone(), excludes));
        }

        let (watcher, mut events) = canopy_watcher::watch_path(&root, options)
            .await
            .with_context(|| format!("Failed to watch {}", root.display()))?;
        tracing::info!("Watching {}", watcher);

        let tx = tx.clone();
        tokio::spawn(async move {
            while let Some(batch) = events.recv().await {
                if tx.send(batch).is_err() {
                    break;
                }
            }
        });

        let mut errors = watcher.on_did_error();
        tokio::spawn(async move {
            while let Some(err) = errors.recv().await {
                if err.is_terminal() {
                    eprintln!("{} {}", "stopped:".red(), err);
                } else {
                    eprintln!("{} {}", "warning:".yellow(), err);
                }
            }
        });

        watchers.push(watcher);
    }
    drop(tx);

    if args.tree {
        eprint!("{}", manager.print_watchers());
    }

    loop {
        tokio::select! {
            batch = rx.recv() => match batch {
                Some(batch) => {
                    for event in &batch {
                        print_event(event, args.verbose, args.json)?;
                    }
                }
                None => {
                    tracing::info!("All watched roots have ended");
                    break;
                }
            },
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("Interrupted, stopping watchers");
                break;
            }
        }
    }

    canopy_watcher::stop_all_watchers().await;
    for watcher in &watchers {
        watcher.dispose().await;
    }
    canopy_watcher::shutdown_default().await;
    Ok(())
}

fn build_excludes(root: &Path, patterns: &[String]) -> Result<Gitignore> {
    let mut builder = GitignoreBuilder::new(root);
    for pattern in patterns {
        builder
            .add_line(None, pattern)
            .with_context(|| format!("Invalid exclude pattern {:?}", pattern))?;
    }
    builder.build().context("Failed to build exclude patterns")
}

/// Directory patterns are matched by the event's entry kind, not by the
/// filesystem, so deletions of excluded directories stay excluded
fn exclude_filter(root: PathBuf, excludes: Gitignore) -> IncludeFilter {
    IncludeFilter::new(move |path, kind| {
        if !path.starts_with(&root) || path == root {
            return true;
        }
        !excludes
            .matched_path_or_any_parents(path, kind == EntryKind::Directory)
            .is_ignore()
    })
}

fn print_event(event: &ChangeEvent, verbose: bool, json: bool) -> Result<()> {
    if event.action == ActionKind::Modified && !verbose {
        return Ok(());
    }
    if json {
        println!("{}", serde_json::to_string(event).context("Failed to serialize event")?);
        return Ok(());
    }

    let action = match event.action {
        ActionKind::Created => event.action.green().to_string(),
        ActionKind::Deleted => event.action.red().to_string(),
        ActionKind::Modified => event.action.dimmed().to_string(),
        ActionKind::Renamed => event.action.yellow().to_string(),
    };
    match event.old_path() {
        Some(old) => println!("{} {}: {} → {}", action, event.kind, old.display(), event.path.display()),
        None => println!("{} {}: {}", action, event.kind, event.path.display()),
    }
    Ok(())
}

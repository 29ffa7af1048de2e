//! Demo host for the review activation orchestrator.
//!
//! Usage: `review-activation <settings.json> [workspace folders...]`
//!
//! Every folder containing a `.git` directory is opened as a repository. The
//! first one is selected; type a repository number on stdin to switch.

use anyhow::Result;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use review_activation::{extension, prelude::*, scm::RepositoryId};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("review_activation=debug".parse()?),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let settings_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("settings.json"));
    let mut folders: Vec<PathBuf> = args.map(PathBuf::from).collect();
    if folders.is_empty() {
        folders.push(std::env::current_dir()?);
    }

    let storage = std::env::temp_dir().join("review-activation");
    let context = Arc::new(ExtensionContext::new(Arc::new(LogNotifier)).with_storage_path(&storage));
    let workspace = Arc::new(Workspace::new());
    let telemetry = Arc::new(JsonlTelemetry::new(storage.join("telemetry.jsonl")));

    let orchestrator = Orchestrator::builder(
        context.clone(),
        workspace.clone(),
        Arc::new(FileConfigurationSource::new(&settings_path)),
        telemetry,
    )
    .build();
    let mut changes = orchestrator.subscribe();

    println!("Settings: {}", settings_path.display());

    // Activation waits until a selected repository exists.
    let activation = tokio::spawn(extension::activate(orchestrator));

    for repo in workspace.discover(&folders) {
        println!("  [{}] {}", repo.id().0, repo.root().display());
    }
    if workspace.is_empty() {
        println!("No repositories found yet; waiting for one to open.");
    }

    let orchestrator = activation.await??;
    if let Some(active) = orchestrator.active_repository() {
        println!("Active: {}", active.root().display());
    }

    println!("Type a repository number to select it, Ctrl+C to exit\n");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                println!("\nShutting down...");
                break;
            }
            change = changes.recv() => {
                if let Ok(change) = change {
                    println!("[Active] {} {}", change.repository, change.root.display());
                }
            }
            line = lines.next_line() => {
                match line? {
                    Some(line) => match line.trim().parse::<u64>() {
                        Ok(id) if workspace.select(RepositoryId(id)) => {}
                        _ => println!("Unknown repository: {}", line.trim()),
                    },
                    None => break,
                }
            }
        }
    }

    // Cleanup
    extension::deactivate().await?;
    context.dispose();
    println!("Done!");

    Ok(())
}

//! Librarian indexing engine — standalone driver binary.
//!
//! Per SPEC_FULL §0, the HTTP/templating surface, the operational CLI, and
//! configuration-file I/O are external collaborators (spec §1) this crate
//! does not build. This binary is a minimal stdin-driven smoke-test harness
//! that exercises the same control-interface operations (spec §6) an
//! external HTTP/CLI layer would call, so the crate is runnable and
//! demonstrable standalone. The library (`lib.rs`) is the actual
//! deliverable.
//!
//! Commands (one per line on stdin): `start full|incremental`, `pause`,
//! `resume`, `stop`, `reset`, `status`, `search <mode> <query>`,
//! `bookmark <media_path> <start_ms> <true|false>`, `tag <media_path> <start_ms> <tag>`,
//! `quit`.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use librarian::db::Repository;
use librarian::search::{SearchMode, SearchRequest, SearchService};
use librarian::status::Strategy;
use librarian::{Config, IndexingController};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "librarian=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(e.exit_code());
        }
    };

    tracing::info!("librarian starting");

    let repo = match Repository::open(&PathBuf::from(&config.db_path), config.busy_timeout_ms).await {
        Ok(repo) => repo,
        Err(e) => {
            eprintln!("failed to open database: {e}");
            std::process::exit(e.exit_code());
        }
    };

    if let Err(e) = repo.init_schema().await {
        eprintln!("failed to bootstrap schema: {e}");
        std::process::exit(e.exit_code());
    }
    if let Err(e) = repo.ensure_fts_consistent().await {
        eprintln!("unrecoverable FTS corruption: {e}");
        std::process::exit(e.exit_code());
    }

    let controller = IndexingController::new(repo.clone(), config.clone()).await?;

    eprintln!("librarian ready; type commands on stdin, 'quit' to exit");
    run_command_loop(&controller, &repo).await;
    Ok(())
}

async fn run_command_loop(controller: &IndexingController, repo: &Repository) {
    let stdin = io::stdin();
    for line in stdin.lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "quit" {
            break;
        }

        if let Err(e) = dispatch(controller, repo, line).await {
            println!("{}", serde_json::json!({"error": e.to_string()}));
        }
        let _ = io::stdout().flush();
    }
}

async fn dispatch(controller: &IndexingController, repo: &Repository, line: &str) -> librarian::Result<()> {
    let mut parts = line.split_whitespace();
    let Some(command) = parts.next() else { return Ok(()) };

    match command {
        "start" => {
            let strategy = match parts.next() {
                Some("incremental") => Strategy::Incremental,
                _ => Strategy::Full,
            };
            controller.start(strategy).await?;
            print_json(&controller.status().await);
        }
        "pause" => {
            controller.pause().await?;
            print_json(&controller.status().await);
        }
        "resume" => {
            controller.resume().await?;
            print_json(&controller.status().await);
        }
        "stop" => {
            controller.stop().await?;
            print_json(&controller.status().await);
        }
        "reset" => {
            controller.reset().await?;
            print_json(&controller.status().await);
        }
        "status" => {
            print_json(&controller.status().await);
        }
        "search" => {
            let mode = match parts.next() {
                Some("fts") => SearchMode::Fts,
                _ => SearchMode::Like,
            };
            let query: String = parts.collect::<Vec<_>>().join(" ");
            let service = SearchService::new(repo);
            let request = SearchRequest { query, mode, ..Default::default() };
            let response = service.search(&request).await?;
            println!(
                "{}",
                serde_json::json!({
                    "total": response.total,
                    "warning": response.warning,
                    "results": response.results.iter().map(|hit| serde_json::json!({
                        "media_path": hit.media_path,
                        "media_kind": hit.media_kind,
                        "streaming_hint": hit.streaming_hint,
                        "start_ms": hit.start_ms,
                        "end_ms": hit.end_ms,
                        "content": hit.content,
                        "lang": hit.lang,
                        "is_bookmarked": hit.is_bookmarked,
                        "tags": hit.tags,
                    })).collect::<Vec<_>>(),
                })
            );
        }
        "bookmark" => {
            let (Some(media_path), Some(start_ms), Some(bookmarked)) = (
                parts.next(),
                parts.next().and_then(|s| s.parse::<i64>().ok()),
                parts.next().and_then(|s| s.parse::<bool>().ok()),
            ) else {
                println!(
                    "{}",
                    serde_json::json!({"error": "usage: bookmark <media_path> <start_ms> <true|false>"})
                );
                return Ok(());
            };
            repo.toggle_bookmark(media_path, start_ms, bookmarked).await?;
            println!("{}", serde_json::json!({"bookmarked": bookmarked}));
        }
        "tag" => {
            let (Some(media_path), Some(start_ms), Some(tag)) = (
                parts.next(),
                parts.next().and_then(|s| s.parse::<i64>().ok()),
                parts.next(),
            ) else {
                println!("{}", serde_json::json!({"error": "usage: tag <media_path> <start_ms> <tag>"}));
                return Ok(());
            };
            repo.add_tag(media_path, start_ms, tag).await?;
            println!("{}", serde_json::json!({"tagged": true}));
        }
        other => {
            println!("{}", serde_json::json!({"error": format!("unknown command: {other}")}));
        }
    }
    Ok(())
}

fn print_json<T: serde::Serialize>(value: &T) {
    match serde_json::to_string(value) {
        Ok(json) => println!("{json}"),
        Err(e) => println!("{}", serde_json::json!({"error": e.to_string()})),
    }
}

// SPDX-License-Identifier: GPL-3.0

//! Command-line front end.
//!
//! Thin presentation layer over the search, gemini, config, and history
//! modules: it validates inputs, renders streamed snapshots, and persists
//! results. Page text arrives as a plain file since content extraction is
//! a separate concern.

mod config;
mod gemini;
mod history;
mod search;

use clap::{Parser, Subcommand};
use std::fs;
use std::io::Write as _;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{level_filters::LevelFilter, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[clap(name = "ai-reader", version, about)]
struct CliArgs {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run an AI-grounded web search, streaming the answer as it builds.
    Search {
        /// The search query.
        query: String,
    },
    /// Summarize page text read from a file.
    Summarize {
        /// File holding the extracted page text.
        file: PathBuf,
    },
    /// Ask a question about page text read from a file.
    Ask {
        /// File holding the extracted page text.
        file: PathBuf,
        /// The question to answer from the text.
        question: String,
    },
    /// List saved searches.
    History,
    /// Delete one saved search by id.
    DeleteHistory {
        /// Id shown by the history listing.
        id: String,
    },
    /// Wipe all saved searches.
    ClearHistory,
    /// Show or update settings.
    Config {
        /// Set the Gemini API key.
        #[clap(long)]
        api_key: Option<String>,
        /// Set the model name; an empty value resets to the default.
        #[clap(long)]
        model: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let args = CliArgs::parse();
    match run(args.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(message) => {
            eprintln!("{}", message);
            ExitCode::FAILURE
        }
    }
}

async fn run(command: Command) -> Result<(), String> {
    match command {
        Command::Search { query } => run_search(&query).await,
        Command::Summarize { file } => {
            let settings = require_api_key()?;
            let content = read_page(&file)?;
            let client = gemini::Client::new(settings.api_key, settings.model);
            let summary = client.generate_summary(&content).await?;
            println!("{}", summary);
            Ok(())
        }
        Command::Ask { file, question } => {
            let settings = require_api_key()?;
            let content = read_page(&file)?;
            let client = gemini::Client::new(settings.api_key, settings.model);
            let answer = client.chat(&content, &question).await?;
            println!("{}", answer);
            Ok(())
        }
        Command::History => {
            list_history();
            Ok(())
        }
        Command::DeleteHistory { id } => history::delete_item(&id)
            .map_err(|e| format!("Failed to delete history item: {}", e)),
        Command::ClearHistory => {
            history::clear_history().map_err(|e| format!("Failed to clear history: {}", e))
        }
        Command::Config { api_key, model } => update_settings(api_key, model),
    }
}

/// Load settings, refusing to proceed without a configured API key.
fn require_api_key() -> Result<config::Settings, String> {
    let settings = config::load_settings();
    if settings.api_key.is_empty() {
        return Err(
            "No API key configured. Set one with: ai-reader config --api-key <KEY>".to_string(),
        );
    }
    Ok(settings)
}

fn read_page(path: &PathBuf) -> Result<String, String> {
    fs::read_to_string(path).map_err(|e| format!("Failed to read {}: {}", path.display(), e))
}

/// Drive one streaming search: show a notice until the first snapshot, then
/// render incrementally and record the final result.
async fn run_search(query: &str) -> Result<(), String> {
    let query = query.trim();
    if query.is_empty() {
        return Err("Query must not be empty".to_string());
    }
    let settings = require_api_key()?;
    let client = search::SearchClient::new(settings.api_key, settings.model);

    eprint!("Searching...");
    let mut rx = client.streaming_search(query).await;

    let mut last: Option<search::SearchSnapshot> = None;
    let mut rendered = String::new();
    while let Some(snapshot) = rx.recv().await {
        if last.is_none() {
            eprint!("\r            \r");
        }
        if snapshot.text.starts_with(&rendered) {
            // Append-only growth: print just the new suffix
            print!("{}", &snapshot.text[rendered.len()..]);
        } else {
            // Terminal failure snapshots replace rather than extend
            println!();
            print!("{}", snapshot.text);
        }
        let _ = std::io::stdout().flush();
        rendered = snapshot.text.clone();
        last = Some(snapshot);
    }
    println!();

    let Some(result) = last else {
        return Ok(());
    };

    if !result.references.is_empty() {
        println!("\nReferences:");
        for (index, reference) in result.references.iter().enumerate() {
            if reference.title.is_empty() {
                println!("  [{}] {}", index + 1, reference.url);
            } else {
                println!("  [{}] {} - {}", index + 1, reference.title, reference.url);
            }
        }
    }

    let item = history::SearchHistoryItem::new(query, result.text, result.references);
    if let Err(e) = history::record_search(item) {
        warn!(error = %e, "failed to record search history");
    }

    Ok(())
}

fn list_history() {
    let saved = history::load_history();
    if saved.items.is_empty() {
        println!("No saved searches");
        return;
    }
    for item in &saved.items {
        println!(
            "{}  {}  ({} references)  [{}]",
            item.formatted_time(),
            item.query,
            item.references.len(),
            item.id
        );
    }
}

fn update_settings(api_key: Option<String>, model: Option<String>) -> Result<(), String> {
    let mut settings = config::load_settings();

    if api_key.is_none() && model.is_none() {
        println!("model: {}", settings.model);
        println!(
            "api key: {}",
            if settings.api_key.is_empty() {
                "(not set)"
            } else {
                "(set)"
            }
        );
        return Ok(());
    }

    if let Some(key) = api_key {
        settings.api_key = key.trim().to_string();
    }
    if let Some(model) = model {
        settings.model = model.trim().to_string();
    }

    config::save_settings(&settings).map_err(|e| format!("Failed to save settings: {}", e))?;
    println!("Settings saved");
    Ok(())
}

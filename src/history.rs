// SPDX-License-Identifier: GPL-3.0

//! Search history persistence module.
//!
//! Saves and loads past search results to/from the XDG data directory.
//! History is capped, deduplicated by query, and ordered newest first.

use crate::search::Reference;
use chrono::{Local, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Maximum number of searches to keep in history.
pub const MAX_HISTORY_ITEMS: usize = 10;

/// A single saved search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHistoryItem {
    /// Unique identifier, derived from the creation timestamp.
    pub id: String,
    /// The query that produced this result.
    pub query: String,
    /// Final generated text.
    pub content: String,
    /// Cited web sources.
    pub references: Vec<Reference>,
    /// Creation time, epoch milliseconds.
    pub timestamp: i64,
}

impl SearchHistoryItem {
    /// Create an item stamped with the current time.
    pub fn new(query: impl Into<String>, content: impl Into<String>, references: Vec<Reference>) -> Self {
        let timestamp = Utc::now().timestamp_millis();
        Self {
            id: timestamp.to_string(),
            query: query.into(),
            content: content.into(),
            references,
            timestamp,
        }
    }

    /// Local-time display string, `YYYY/MM/DD HH:MM`.
    pub fn formatted_time(&self) -> String {
        Local
            .timestamp_millis_opt(self.timestamp)
            .single()
            .map(|time| time.format("%Y/%m/%d %H:%M").to_string())
            .unwrap_or_default()
    }
}

/// Search history container.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SearchHistory {
    /// Version for future schema migrations.
    pub version: u32,
    /// Saved searches, newest first.
    pub items: Vec<SearchHistoryItem>,
}

impl SearchHistory {
    /// Current history format version.
    const CURRENT_VERSION: u32 = 1;

    /// Create a new empty history.
    pub fn new() -> Self {
        Self {
            version: Self::CURRENT_VERSION,
            items: Vec::new(),
        }
    }

    /// Record one search.
    ///
    /// Replaces any earlier entry with the same query, inserts at the
    /// front, and drops the oldest entries beyond the cap.
    pub fn record(&mut self, item: SearchHistoryItem) {
        self.items.retain(|existing| existing.query != item.query);
        self.items.insert(0, item);
        self.items.truncate(MAX_HISTORY_ITEMS);
    }

    /// Remove the entry with the given id, if present.
    pub fn remove(&mut self, id: &str) {
        self.items.retain(|item| item.id != id);
    }
}

/// Get the path to the history file.
fn history_file_path() -> Option<PathBuf> {
    // Use XDG_DATA_HOME or ~/.local/share
    let data_dir = std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
            PathBuf::from(home).join(".local/share")
        });

    Some(data_dir.join("ai-reader").join("history.json"))
}

fn load_from(path: &Path) -> SearchHistory {
    if !path.exists() {
        return SearchHistory::new();
    }

    let file = match fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            warn!(error = %e, "failed to open history file");
            return SearchHistory::new();
        }
    };

    match serde_json::from_reader(BufReader::new(file)) {
        Ok(history) => history,
        Err(e) => {
            warn!(error = %e, "failed to parse history file");
            SearchHistory::new()
        }
    }
}

fn save_to(path: &Path, history: &SearchHistory) -> io::Result<()> {
    // Create directory if it doesn't exist
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let file = fs::File::create(path)?;
    let writer = BufWriter::new(file);
    serde_json::to_writer_pretty(writer, history)?;

    Ok(())
}

/// Load search history from disk.
pub fn load_history() -> SearchHistory {
    match history_file_path() {
        Some(path) => load_from(&path),
        None => SearchHistory::new(),
    }
}

/// Record one search result in the saved history.
pub fn record_search(item: SearchHistoryItem) -> io::Result<()> {
    let Some(path) = history_file_path() else {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "Could not determine history path",
        ));
    };

    let mut history = load_from(&path);
    history.record(item);
    save_to(&path, &history)
}

/// Delete one saved search by id.
pub fn delete_item(id: &str) -> io::Result<()> {
    let Some(path) = history_file_path() else {
        return Err(io::Error::new(
            io::ErrorKind::NotFound,
            "Could not determine history path",
        ));
    };

    let mut history = load_from(&path);
    history.remove(id);
    save_to(&path, &history)
}

/// Clear saved history from disk.
pub fn clear_history() -> io::Result<()> {
    let Some(path) = history_file_path() else {
        return Ok(());
    };

    if path.exists() {
        fs::remove_file(&path)?;
    }

    Ok(())
}

//! Persistence layer.
//!
//! Statistics are a single JSON document overwritten after every
//! execution. Writes go to a sibling temp file first and are renamed
//! into place, so a crash mid-write never leaves a truncated document.

use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};

use crate::types::{CascadeError, Statistics};

/// Default statistics file path.
pub const DEFAULT_STATS_FILE: &str = "cascade_stats.json";

/// Where statistics live between runs.
pub trait StatsPersistence: Send + Sync {
    /// `None` on a fresh start.
    fn load(&self) -> Result<Option<Statistics>>;
    fn save(&self, stats: &Statistics) -> Result<()>;
}

// ---------------------------------------------------------------------------
// JSON file
// ---------------------------------------------------------------------------

/// Save statistics to a JSON file.
pub fn save_stats(stats: &Statistics, path: &str) -> Result<()> {
    let json = serde_json::to_string_pretty(stats).context("Failed to serialise statistics")?;

    let tmp = temp_sibling(Path::new(path));
    std::fs::write(&tmp, &json).context(format!("Failed to write statistics to {}", tmp.display()))?;
    std::fs::rename(&tmp, path).context(format!("Failed to move statistics into {path}"))?;

    debug!(path, routes = stats.total_routes, profit = %stats.total_profit_usd, "Statistics saved");
    Ok(())
}

/// Load statistics from a JSON file.
/// Returns None if the file doesn't exist (fresh start).
pub fn load_stats(path: &str) -> Result<Option<Statistics>> {
    if !Path::new(path).exists() {
        info!(path, "No saved statistics found, starting fresh");
        return Ok(None);
    }

    let json = std::fs::read_to_string(path).context(format!("Failed to read statistics from {path}"))?;
    let stats: Statistics = serde_json::from_str(&json)
        .map_err(|e| CascadeError::Storage(format!("unreadable statistics in {path}: {e}")))?;

    info!(
        path,
        routes = stats.total_routes,
        successful = stats.successful_routes,
        profit = %stats.total_profit_usd,
        "Statistics loaded from disk"
    );
    Ok(Some(stats))
}

/// Delete the statistics file (for testing or reset).
pub fn delete_stats(path: &str) -> Result<()> {
    if Path::new(path).exists() {
        std::fs::remove_file(path).context(format!("Failed to delete statistics file {path}"))?;
    }
    Ok(())
}

fn temp_sibling(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

pub struct JsonFileStore {
    path: String,
}

impl JsonFileStore {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl StatsPersistence for JsonFileStore {
    fn load(&self) -> Result<Option<Statistics>> {
        load_stats(&self.path)
    }

    fn save(&self, stats: &Statistics) -> Result<()> {
        save_stats(stats, &self.path)
    }
}

// ---------------------------------------------------------------------------
// In-memory
// ---------------------------------------------------------------------------

/// Keeps the last saved document in memory. Used by tests and embedders
/// that persist elsewhere.
#[derive(Default)]
pub struct MemoryStore {
    saved: Mutex<Option<Statistics>>,
    saves: Mutex<u64>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(stats: Statistics) -> Self {
        Self {
            saved: Mutex::new(Some(stats)),
            saves: Mutex::new(0),
        }
    }

    /// Number of successful saves.
    pub fn saves(&self) -> u64 {
        self.saves.lock().map(|n| *n).unwrap_or(0)
    }

    pub fn last(&self) -> Option<Statistics> {
        self.saved.lock().ok().and_then(|s| s.clone())
    }
}

impl StatsPersistence for MemoryStore {
    fn load(&self) -> Result<Option<Statistics>> {
        Ok(self.last())
    }

    fn save(&self, stats: &Statistics) -> Result<()> {
        let mut saved = self.saved.lock().map_err(|_| anyhow::anyhow!("memory store poisoned"))?;
        *saved = Some(stats.clone());
        if let Ok(mut n) = self.saves.lock() {
            *n += 1;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

//! File-backed weather history: one JSON document holding a capped, date-ordered
//! list of daily summaries per zone.

use log::{info, warn};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::models::weather::{DailySummary, HistoryDocument};
use crate::zones;

pub const MAX_DAYS: usize = 365;

/// Insert or replace `summary` in a date-ordered history.
///
/// An entry with the same date is replaced in place; otherwise the summary is
/// inserted at its date position and the oldest entries are evicted beyond
/// `cap`.
pub fn upsert_summary(history: &mut Vec<DailySummary>, summary: DailySummary, cap: usize) {
    if let Some(last) = history.last_mut()
        && last.date == summary.date
    {
        *last = summary;
        return;
    }
    match history.binary_search_by(|s| s.date.as_str().cmp(summary.date.as_str())) {
        Ok(idx) => history[idx] = summary,
        Err(idx) => history.insert(idx, summary),
    }
    if history.len() > cap {
        let excess = history.len() - cap;
        history.drain(..excess);
    }
}

pub struct HistoryStore {
    path: PathBuf,
    // Serialises read-modify-write cycles within the process.
    lock: Mutex<()>,
}

impl HistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        HistoryStore {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    /// Create the document with an empty list per zone when it is missing or
    /// unreadable.
    pub fn ensure(&self) -> Result<(), String> {
        let _guard = self.lock.lock().map_err(|_| "history lock poisoned".to_string())?;
        if read_document(&self.path).is_ok() {
            return Ok(());
        }
        info!("Initialising weather history at {}", self.path.display());
        write_document(&self.path, &HistoryDocument::with_zones(zones::names()))
    }

    pub fn load(&self) -> Result<HistoryDocument, String> {
        let _guard = self.lock.lock().map_err(|_| "history lock poisoned".to_string())?;
        read_document(&self.path)
    }

    /// Last `days` summaries of a zone, oldest first. Empty when the zone has
    /// no history yet, including before the first collection wrote the file.
    pub fn recent(&self, zone: &str, days: usize) -> Result<Vec<DailySummary>, String> {
        let doc = {
            let _guard = self.lock.lock().map_err(|_| "history lock poisoned".to_string())?;
            if !self.path.exists() {
                return Ok(Vec::new());
            }
            read_document(&self.path)?
        };
        let history = doc.zones.get(zone).map(Vec::as_slice).unwrap_or_default();
        let start = history.len().saturating_sub(days);
        Ok(history[start..].to_vec())
    }

    pub fn append(&self, zone: &str, summary: DailySummary) -> Result<(), String> {
        let _guard = self.lock.lock().map_err(|_| "history lock poisoned".to_string())?;
        let mut doc = match read_document(&self.path) {
            Ok(doc) => doc,
            Err(e) => {
                warn!("Weather history unreadable, starting a new document: {}", e);
                HistoryDocument::with_zones(zones::names())
            }
        };
        upsert_summary(doc.zones.entry(zone.to_string()).or_default(), summary, MAX_DAYS);
        write_document(&self.path, &doc)
    }
}

fn read_document(path: &Path) -> Result<HistoryDocument, String> {
    let text = fs::read_to_string(path).map_err(|e| format!("read {} failed: {}", path.display(), e))?;
    let de = &mut serde_json::Deserializer::from_str(&text);
    serde_path_to_error::deserialize(de)
        .map_err(|e| format!("parse {} failed at {}: {}", path.display(), e.path(), e.inner()))
}

fn write_document(path: &Path, doc: &HistoryDocument) -> Result<(), String> {
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        fs::create_dir_all(dir).map_err(|e| format!("create {} failed: {}", dir.display(), e))?;
    }
    let json = serde_json::to_vec_pretty(doc).map_err(|e| format!("encode history failed: {}", e))?;
    let tmp = path.with_extension("json.tmp");
    let mut file = fs::File::create(&tmp).map_err(|e| format!("create {} failed: {}", tmp.display(), e))?;
    file.write_all(&json)
        .and_then(|_| file.sync_all())
        .map_err(|e| format!("write {} failed: {}", tmp.display(), e))?;
    fs::rename(&tmp, path).map_err(|e| format!("replace {} failed: {}", path.display(), e))
}

//! Operator journal stored as JSON lines.

use anyhow::{Context, Result};
use reconcile::{Journal, LogEntry};
use serde::Serialize;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

#[derive(Serialize)]
struct Line<'a> {
    ts: String,
    #[serde(flatten)]
    entry: &'a LogEntry,
}

/// Append-only journal file.
pub struct FileJournal {
    path: PathBuf,
    writer: Mutex<()>,
}

impl FileJournal {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            writer: Mutex::new(()),
        }
    }

    fn append(&self, entry: &LogEntry) -> Result<()> {
        let line = Line {
            ts: chrono::Local::now().format(TIMESTAMP_FORMAT).to_string(),
            entry,
        };
        let mut text = serde_json::to_string(&line)?;
        text.push('\n');

        let _guard = self.writer.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("Could not open {}", self.path.display()))?;
        file.write_all(text.as_bytes())?;
        Ok(())
    }
}

impl Journal for FileJournal {
    fn record(&self, entry: LogEntry) {
        if let Err(err) = self.append(&entry) {
            log::warn!("Could not write journal entry {:?}: {err:#}", entry.message);
        }
    }
}

/// Last `n` entries of the journal at `path`, oldest first. A missing
/// journal is empty; unparsable lines are skipped.
pub fn tail(path: &Path, n: usize) -> Result<Vec<serde_json::Value>> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err).with_context(|| format!("Could not read {}", path.display())),
    };
    let entries: Vec<serde_json::Value> = content
        .lines()
        .filter_map(|line| serde_json::from_str(line).ok())
        .collect();
    let skip = entries.len().saturating_sub(n);
    Ok(entries.into_iter().skip(skip).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconcile::{Detail, Status};

    #[test]
    fn test_record_and_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log/holdfast.log");
        let journal = FileJournal::new(&path);

        journal.record(LogEntry::new("Added group \"base\"", "group"));
        journal.record(LogEntry {
            status: Some(Status::Failed),
            group_id: "g".into(),
            instruction_id: "i".into(),
            group_name: "base".into(),
            detail: Some(Detail::error("boom")),
            ..LogEntry::new("file content: Could not write", "file")
        });

        let all = tail(&path, 20).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0]["msg"], "Added group \"base\"");
        assert!(all[0].get("st").is_none());

        let last = tail(&path, 1).unwrap();
        assert_eq!(last.len(), 1);
        assert_eq!(last[0]["st"], "failed");
        assert_eq!(last[0]["dtl"]["d"], "boom");
        let ts = last[0]["ts"].as_str().unwrap();
        assert_eq!(ts.len(), 19);
        assert_eq!(&ts[10..11], "T");
    }

    #[test]
    fn test_missing_journal_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        assert!(tail(&dir.path().join("nope"), 5).unwrap().is_empty());
    }
}

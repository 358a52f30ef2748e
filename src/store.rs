//! Tree persistence as a JSON file with debounced writes.

use reconcile::{GroupDescriptor, TreeStore};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

pub struct JsonFileStore {
    path: PathBuf,
    debounce: Duration,
    pending: Arc<Mutex<Option<Vec<GroupDescriptor>>>>,
    scheduled: Arc<AtomicBool>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>, debounce: Duration) -> Self {
        Self {
            path: path.into(),
            debounce,
            pending: Arc::new(Mutex::new(None)),
            scheduled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Write any save still waiting for its debounce.
    pub fn flush(&self) {
        flush(&self.path, &self.pending);
    }
}

impl TreeStore for JsonFileStore {
    fn load(&self) -> reconcile::Result<Vec<GroupDescriptor>> {
        match fs::read_to_string(&self.path) {
            Ok(content) => Ok(serde_json::from_str(&content)?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                log::info!("No tree at {}, starting empty", self.path.display());
                Ok(Vec::new())
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Keep the latest tree and write it once edits went quiet.
    fn save(&self, groups: Vec<GroupDescriptor>) {
        *self.pending.lock().unwrap_or_else(PoisonError::into_inner) = Some(groups);
        if self.scheduled.swap(true, Ordering::SeqCst) {
            return;
        }
        let path = self.path.clone();
        let pending = self.pending.clone();
        let scheduled = self.scheduled.clone();
        let debounce = self.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            scheduled.store(false, Ordering::SeqCst);
            flush(&path, &pending);
        });
    }
}

fn flush(path: &Path, pending: &Mutex<Option<Vec<GroupDescriptor>>>) {
    let Some(groups) = pending.lock().unwrap_or_else(PoisonError::into_inner).take() else {
        return;
    };
    if let Err(err) = write_atomic(path, &groups) {
        log::error!("Could not save tree to {}: {err}", path.display());
    } else {
        log::debug!("Saved {} groups to {}", groups.len(), path.display());
    }
}

fn write_atomic(path: &Path, groups: &[GroupDescriptor]) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let content = serde_json::to_string_pretty(groups).map_err(std::io::Error::other)?;
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)
}

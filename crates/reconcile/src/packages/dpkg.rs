//! Installed-package view built from the dpkg status database.

use crate::error::Result;
use crate::fanout::{FanOut, Feed, Unsubscribe};
use crate::files::{FileStatus, FileWatcher};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

/// What dpkg knows about one package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledPackage {
    /// Status is `install ok installed`
    pub installed: bool,
    pub version: String,
}

/// Snapshot of the dpkg database, keyed by package name.
pub type Installed = Arc<BTreeMap<String, InstalledPackage>>;

/// Split a deb822 stream into records of `(field, value)` pairs.
///
/// Continuation lines (leading whitespace) are ignored, as are lines
/// without a `: ` separator.
pub(crate) fn records(text: &str) -> impl Iterator<Item = Vec<(&str, &str)>> {
    text.split("\n\n").filter_map(|block| {
        let fields: Vec<(&str, &str)> = block
            .lines()
            .filter(|line| !line.starts_with(char::is_whitespace))
            .filter_map(|line| line.trim_end().split_once(": "))
            .collect();
        (!fields.is_empty()).then_some(fields)
    })
}

/// Parse `/var/lib/dpkg/status`. Records without a package name are skipped.
pub fn parse_status(text: &str) -> BTreeMap<String, InstalledPackage> {
    let text = text.replace("\r\n", "\n");
    let mut packages = BTreeMap::new();
    for record in records(&text) {
        let mut name = None;
        let mut version = "";
        let mut installed = false;
        for (field, value) in record {
            match field {
                "Package" => name = Some(value),
                "Version" => version = value,
                "Status" => installed = value == "install ok installed",
                _ => {}
            }
        }
        if let Some(name) = name.filter(|n| !n.is_empty()) {
            packages.insert(
                name.to_string(),
                InstalledPackage {
                    installed,
                    version: version.to_string(),
                },
            );
        }
    }
    packages
}

pub async fn read_status(path: &Path) -> Result<BTreeMap<String, InstalledPackage>> {
    let raw = tokio::fs::read(path).await?;
    Ok(parse_status(&String::from_utf8_lossy(&raw)))
}

struct Inner {
    files: FileWatcher,
    status_path: PathBuf,
    feed: Arc<Feed<Installed>>,
}

/// Watches the dpkg database and broadcasts a fresh snapshot whenever it
/// is rewritten. The scanner only runs while someone is subscribed.
#[derive(Clone)]
pub struct DpkgWatcher {
    inner: Arc<Inner>,
}

impl DpkgWatcher {
    pub fn new(files: FileWatcher, status_path: impl Into<PathBuf>) -> Self {
        Self {
            inner: Arc::new(Inner {
                files,
                status_path: status_path.into(),
                feed: Feed::new(),
            }),
        }
    }

    pub fn status_path(&self) -> &Path {
        &self.inner.status_path
    }

    pub fn subscribe(&self) -> (UnboundedReceiver<Installed>, Unsubscribe) {
        let files = self.inner.files.clone();
        let path = self.inner.status_path.clone();
        self.inner.feed.subscribe(move |hub, cancel| {
            tokio::spawn(scan_on_change(files, path, hub, cancel));
        })
    }

    /// Current snapshot, read from disk when nobody is subscribed.
    pub async fn snapshot(&self) -> Result<Installed> {
        if let Some(current) = self.inner.feed.current() {
            return Ok(current);
        }
        Ok(Arc::new(read_status(&self.inner.status_path).await?))
    }
}

async fn scan_on_change(
    files: FileWatcher,
    path: PathBuf,
    hub: Arc<FanOut<Installed>>,
    cancel: CancellationToken,
) {
    let (mut statuses, _unsubscribe) = files.subscribe(&path);
    loop {
        let status = tokio::select! {
            () = cancel.cancelled() => break,
            status = statuses.recv() => match status {
                Some(status) => status,
                None => break,
            },
        };

        match status {
            FileStatus::File => match read_status(&path).await {
                Ok(packages) => {
                    log::debug!("dpkg database lists {} packages", packages.len());
                    hub.publish(Arc::new(packages));
                }
                Err(err) => log::warn!("cannot read {}: {err}", path.display()),
            },
            FileStatus::NotFound => {
                log::warn!("dpkg database {} not found", path.display());
                hub.publish(Arc::new(BTreeMap::new()));
            }
            other => log::warn!("dpkg database {} is {other:?}", path.display()),
        }
    }
}

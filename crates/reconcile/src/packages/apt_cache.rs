//! Availability view built from `apt-cache dumpavail`.
//!
//! A rescan happens when apt recreates its partial lists directory (a
//! list update ran), when the installed set changes, after every
//! successful `apt-get` run through the executor, and on a periodic
//! refresh that first runs `apt-get update`. The refresh timer only exists
//! while someone is subscribed.

use super::dpkg::{DpkgWatcher, Installed, InstalledPackage, records};
use super::version;
use crate::exec::{Executor, Messages};
use crate::fanout::{FanOut, Feed, Unsubscribe};
use crate::files::{FileStatus, FileWatcher};
use crate::status::{Reporter, Status};
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// A package apt knows about, with its installed state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AvailablePackage {
    pub name: String,
    pub installed: bool,
    /// Installed version, empty when not installed
    pub version: String,
    /// Highest version offered by the configured sources
    pub available_version: String,
}

impl AvailablePackage {
    /// Installed and a strictly newer version is available
    pub fn upgradable(&self) -> bool {
        self.installed
            && version::compare(&self.available_version, &self.version) == Ordering::Greater
    }
}

/// Availability snapshot, sorted by package name.
pub type Available = Arc<Vec<AvailablePackage>>;

/// Highest available version of every package in a dumpavail listing.
pub fn parse_dumpavail(text: &str) -> BTreeMap<String, String> {
    let text = text.replace("\r\n", "\n");
    let mut best: BTreeMap<String, String> = BTreeMap::new();
    for record in records(&text) {
        let mut name = None;
        let mut candidate = None;
        for (field, value) in record {
            match field {
                "Package" => name = Some(value),
                "Version" => candidate = Some(value),
                _ => {}
            }
        }
        let (Some(name), Some(candidate)) = (name, candidate) else {
            continue;
        };
        match best.get_mut(name) {
            Some(current) => {
                if version::compare(candidate, current) == Ordering::Greater {
                    *current = candidate.to_string();
                }
            }
            None => {
                best.insert(name.to_string(), candidate.to_string());
            }
        }
    }
    best
}

/// Join available versions with the installed set.
pub fn merge(
    installed: &BTreeMap<String, InstalledPackage>,
    available: BTreeMap<String, String>,
) -> Vec<AvailablePackage> {
    available
        .into_iter()
        .map(|(name, available_version)| {
            let (installed, version) = match installed.get(&name) {
                Some(pkg) if pkg.installed => (true, pkg.version.clone()),
                _ => (false, String::new()),
            };
            AvailablePackage {
                name,
                installed,
                version,
                available_version,
            }
        })
        .collect()
}

struct Inner {
    files: FileWatcher,
    dpkg: DpkgWatcher,
    exec: Arc<Executor>,
    lists_marker: PathBuf,
    refresh: Duration,
    feed: Arc<Feed<Available>>,
}

/// Broadcasts the availability list to every subscriber.
#[derive(Clone)]
pub struct AptCacheWatcher {
    inner: Arc<Inner>,
}

impl AptCacheWatcher {
    pub fn new(
        files: FileWatcher,
        dpkg: DpkgWatcher,
        exec: Arc<Executor>,
        lists_marker: impl Into<PathBuf>,
        refresh: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                files,
                dpkg,
                exec,
                lists_marker: lists_marker.into(),
                refresh,
                feed: Feed::new(),
            }),
        }
    }

    pub fn subscribe(&self) -> (UnboundedReceiver<Available>, Unsubscribe) {
        let inner = self.inner.clone();
        self.inner.feed.subscribe(move |hub, cancel| {
            tokio::spawn(inner.scan_loop(hub, cancel));
        })
    }

    /// Latest list while subscribed
    pub fn current(&self) -> Option<Available> {
        self.inner.feed.current()
    }
}

impl Inner {
    async fn scan_loop(self: Arc<Self>, hub: Arc<FanOut<Available>>, cancel: CancellationToken) {
        let (mut lists, _lists) = self.files.subscribe(&self.lists_marker);
        let (mut installed_rx, _installed) = self.dpkg.subscribe();
        let mut changes = self.exec.changes();
        changes.borrow_and_update();

        let mut ticker = tokio::time::interval_at(Instant::now() + self.refresh, self.refresh);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut installed: Option<Installed> = None;

        loop {
            let rescan = tokio::select! {
                () = cancel.cancelled() => break,
                Some(status) = lists.recv() => {
                    if status == FileStatus::Directory {
                        ticker.reset();
                        true
                    } else {
                        false
                    }
                }
                Some(set) = installed_rx.recv() => {
                    installed = Some(set);
                    true
                }
                Ok(()) = changes.changed() => {
                    changes.borrow_and_update();
                    true
                }
                _ = ticker.tick() => {
                    let refreshed = self.refresh_lists().await;
                    changes.borrow_and_update();
                    refreshed
                }
            };

            if rescan && let Some(installed) = &installed {
                self.rescan(installed, &hub).await;
            }
        }
        log::debug!("apt cache watcher stopped");
    }

    async fn refresh_lists(&self) -> bool {
        log::info!("refreshing apt package lists");
        let messages = Messages::new(
            "Downloading packages list",
            "Downloaded packages list",
            "Could not download apt packages list",
        );
        let reporter = Reporter::new(|update| {
            if update.status == Status::Failed {
                log::warn!("{}", update.info);
            }
        });
        self.exec.apt_get(&messages, &reporter, "update", &[]).await
    }

    async fn rescan(&self, installed: &Installed, hub: &FanOut<Available>) {
        match self.exec.apt_cache_dumpavail().await {
            Ok(text) => {
                let list = merge(installed, parse_dumpavail(&text));
                log::debug!("apt cache lists {} packages", list.len());
                hub.publish(Arc::new(list));
            }
            Err(err) => log::error!("could not get information from apt cache: {err}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::Tools;
    use crate::files::WatchTiming;
    use std::os::unix::fs::PermissionsExt;
    use std::path::Path;

    const DUMPAVAIL: &str = "\
Package: foo
Version: 1.0-1
Description: first

Package: foo
Version: 1.0-10

Package: foo
Version: 1.0~rc1-1

Package: bar
Version: 2.0

Version: 9
Description: no package name

Package: baz
";

    fn script(dir: &Path, name: &str, body: &str) -> String {
        let path = dir.join(name);
        std::fs::write(&path, format!("#!/bin/sh\n{body}\n")).unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.display().to_string()
    }

    #[test]
    fn test_parse_dumpavail_keeps_highest_version() {
        let versions = parse_dumpavail(DUMPAVAIL);
        assert_eq!(versions.len(), 2);
        assert_eq!(versions["foo"], "1.0-10");
        assert_eq!(versions["bar"], "2.0");
    }

    #[test]
    fn test_merge_marks_installed_and_sorts() {
        let mut installed = BTreeMap::new();
        installed.insert(
            "foo".to_string(),
            InstalledPackage {
                installed: true,
                version: "1.0-1".into(),
            },
        );
        installed.insert(
            "bar".to_string(),
            InstalledPackage {
                installed: false,
                version: "1.0".into(),
            },
        );
        let list = merge(&installed, parse_dumpavail(DUMPAVAIL));
        let names: Vec<&str> = list.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, vec!["bar", "foo"]);

        assert!(!list[0].installed);
        assert!(list[0].version.is_empty());
        assert!(!list[0].upgradable());

        assert!(list[1].installed);
        assert_eq!(list[1].version, "1.0-1");
        assert!(list[1].upgradable());
    }

    #[tokio::test]
    async fn test_rescans_after_package_operation() {
        let dir = tempfile::tempdir().unwrap();
        let status = dir.path().join("status");
        std::fs::write(
            &status,
            "Package: foo\nStatus: install ok installed\nVersion: 1.0\n",
        )
        .unwrap();
        let avail = dir.path().join("avail");
        std::fs::write(&avail, "Package: foo\nVersion: 1.0\n").unwrap();

        let apt_cache = script(dir.path(), "apt-cache", &format!("cat {}", avail.display()));
        let apt_get = script(dir.path(), "apt-get", "exit 0");
        let exec = Arc::new(Executor::new(Tools { apt_get, apt_cache }));
        let files = FileWatcher::new(WatchTiming {
            debounce: Duration::from_millis(20),
            retry: Duration::from_millis(100),
        })
        .unwrap();
        let dpkg = DpkgWatcher::new(files.clone(), &status);
        let watcher = AptCacheWatcher::new(
            files,
            dpkg,
            exec.clone(),
            dir.path().join("partial"),
            Duration::from_secs(7200),
        );

        let (mut rx, _unsub) = watcher.subscribe();
        let first = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(first.len(), 1);
        assert!(!first[0].upgradable());

        std::fs::write(&avail, "Package: foo\nVersion: 1.1\n").unwrap();
        assert!(
            exec.apt_get(&Messages::new("", "", ""), &Reporter::discard(), "update", &[])
                .await
        );

        loop {
            let list = tokio::time::timeout(Duration::from_secs(5), rx.recv())
                .await
                .unwrap()
                .unwrap();
            if list[0].available_version == "1.1" {
                assert!(list[0].upgradable());
                break;
            }
        }
        assert_eq!(watcher.current().unwrap()[0].available_version, "1.1");
    }
}

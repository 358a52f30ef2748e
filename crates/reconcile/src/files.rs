//! Layered, debounced file-state watcher.
//!
//! Three layers cooperate for every watched path:
//!
//! - **back**: one OS watch per parent directory, reference counted by the
//!   paths inside it. Raw events are routed to the path they concern; when
//!   a watched directory disappears every path inside it is told so.
//! - **supervisor**: one task per path, a small state machine
//!   (attaching, watching, waiting for the parent, backing off). While
//!   watching it debounces raw events and classifies the path once the
//!   burst settles.
//! - **front**: a [`FanOut`] per path. New subscribers get the current
//!   status at once; the last unsubscribe cancels the supervisor and
//!   releases the directory watch.
//!
//! The notify callback only forwards events into a channel, so the back
//! layer is never entered from the notify thread while a subscriber holds
//! one of the locks.

use crate::error::Result;
use crate::fanout::{FanOut, Unsubscribe, lock};
use notify::event::{AccessKind, AccessMode, ModifyKind};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use serde::Serialize;
use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;

/// Classification of a path on disk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    /// The path could not be inspected
    Unknown,
    File,
    Directory,
    NotFound,
}

/// Stat `path` and classify it. Symlinks are followed.
pub fn classify(path: &Path) -> FileStatus {
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => FileStatus::Directory,
        Ok(_) => FileStatus::File,
        Err(err)
            if matches!(
                err.kind(),
                io::ErrorKind::NotFound | io::ErrorKind::NotADirectory
            ) =>
        {
            FileStatus::NotFound
        }
        Err(err) => {
            log::debug!("cannot stat {}: {err}", path.display());
            FileStatus::Unknown
        }
    }
}

/// Timing knobs of the watcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchTiming {
    /// Quiet period before a burst of events is classified
    pub debounce: Duration,
    /// Delay before retrying a directory watch that failed
    pub retry: Duration,
}

impl Default for WatchTiming {
    fn default() -> Self {
        Self {
            debounce: Duration::from_millis(200),
            retry: Duration::from_secs(10),
        }
    }
}

fn parent_dir(path: &Path) -> Option<PathBuf> {
    match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Some(PathBuf::from(".")),
        other => other.map(Path::to_path_buf),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Signal {
    Changed,
    ParentRemoved,
}

enum AttachError {
    Cancelled,
    ParentMissing,
    Failed(notify::Error),
}

struct Target {
    owner: u64,
    tx: UnboundedSender<Signal>,
}

struct Back {
    watcher: RecommendedWatcher,
    targets: HashMap<PathBuf, Target>,
    dirs: HashMap<PathBuf, usize>,
}

impl Back {
    fn attach(
        &mut self,
        path: &Path,
        owner: u64,
        cancel: &CancellationToken,
    ) -> std::result::Result<UnboundedReceiver<Signal>, AttachError> {
        if cancel.is_cancelled() {
            return Err(AttachError::Cancelled);
        }
        let dir = parent_dir(path).ok_or(AttachError::ParentMissing)?;

        if !self.dirs.contains_key(&dir) {
            if let Err(err) = self.watcher.watch(&dir, RecursiveMode::NonRecursive) {
                return Err(if dir.is_dir() {
                    AttachError::Failed(err)
                } else {
                    AttachError::ParentMissing
                });
            }
            log::debug!("watching directory {}", dir.display());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let replaced = self
            .targets
            .insert(path.to_path_buf(), Target { owner, tx })
            .is_some();
        if !replaced {
            *self.dirs.entry(dir).or_insert(0) += 1;
        }
        Ok(rx)
    }

    fn detach(&mut self, path: &Path, owner: u64) {
        match self.targets.get(path) {
            Some(target) if target.owner == owner => {}
            _ => return,
        }
        self.targets.remove(path);
        if let Some(dir) = parent_dir(path) {
            self.release_dir(&dir);
        }
    }

    fn release_dir(&mut self, dir: &Path) {
        let Some(count) = self.dirs.get_mut(dir) else {
            return;
        };
        *count = count.saturating_sub(1);
        if *count > 0 {
            return;
        }
        self.dirs.remove(dir);
        match self.watcher.unwatch(dir) {
            Ok(()) => log::debug!("released directory {}", dir.display()),
            Err(err) => log::debug!("unwatch {}: {err}", dir.display()),
        }
    }

    fn drop_dir(&mut self, dir: &Path) {
        log::debug!("watched directory {} went away", dir.display());
        self.dirs.remove(dir);
        let _ = self.watcher.unwatch(dir);

        let orphans: Vec<PathBuf> = self
            .targets
            .keys()
            .filter(|path| parent_dir(path).as_deref() == Some(dir))
            .cloned()
            .collect();
        for path in orphans {
            if let Some(target) = self.targets.remove(&path) {
                let _ = target.tx.send(Signal::ParentRemoved);
            }
        }
    }

    fn dispatch(&mut self, event: notify::Result<Event>) {
        let event = match event {
            Ok(event) => event,
            Err(err) => {
                log::warn!("file watch error: {err}");
                return;
            }
        };

        if event.need_rescan() {
            for target in self.targets.values() {
                let _ = target.tx.send(Signal::Changed);
            }
            return;
        }

        match event.kind {
            EventKind::Access(AccessKind::Close(AccessMode::Write)) => {}
            EventKind::Access(_) => return,
            _ => {}
        }
        let moved_or_removed = matches!(
            event.kind,
            EventKind::Remove(_) | EventKind::Modify(ModifyKind::Name(_))
        );

        for path in &event.paths {
            if let Some(target) = self.targets.get(path) {
                let _ = target.tx.send(Signal::Changed);
            }
            if self.dirs.contains_key(path) && (moved_or_removed || !path.is_dir()) {
                self.drop_dir(path);
            }
        }
    }
}

struct Entry {
    hub: Arc<FanOut<FileStatus>>,
    owner: u64,
    cancel: CancellationToken,
}

struct Shared {
    back: Mutex<Back>,
    entries: Mutex<HashMap<PathBuf, Entry>>,
    timing: WatchTiming,
    next_owner: AtomicU64,
}

impl Shared {
    fn release(&self, path: &Path, owner: u64, id: u64) {
        let mut entries = lock(&self.entries);
        let Some(entry) = entries.get(path) else {
            return;
        };
        if entry.owner != owner || entry.hub.unsubscribe(id) > 0 {
            return;
        }
        entry.cancel.cancel();
        entries.remove(path);
        lock(&self.back).detach(path, owner);
        log::trace!("last subscriber left {}", path.display());
    }
}

/// Shared handle on the file-state watcher. Clones are cheap.
#[derive(Clone)]
pub struct FileWatcher {
    shared: Arc<Shared>,
}

impl FileWatcher {
    /// Create the watcher. Must be called from within a tokio runtime.
    pub fn new(timing: WatchTiming) -> Result<Self> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let watcher = notify::recommended_watcher(move |event: notify::Result<Event>| {
            let _ = tx.send(event);
        })?;

        let shared = Arc::new(Shared {
            back: Mutex::new(Back {
                watcher,
                targets: HashMap::new(),
                dirs: HashMap::new(),
            }),
            entries: Mutex::new(HashMap::new()),
            timing,
            next_owner: AtomicU64::new(0),
        });

        let weak = Arc::downgrade(&shared);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                let Some(shared) = weak.upgrade() else {
                    break;
                };
                lock(&shared.back).dispatch(event);
            }
        });

        Ok(Self { shared })
    }

    /// Observe `path`.
    ///
    /// The receiver yields the current status immediately, then each
    /// debounced status that differs from the previous one, plus a repeat
    /// of `File` whenever a regular file was written to.
    pub fn subscribe(
        &self,
        path: impl AsRef<Path>,
    ) -> (UnboundedReceiver<FileStatus>, Unsubscribe) {
        let path = path.as_ref();
        let path = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());

        let mut entries = lock(&self.shared.entries);
        let entry = entries
            .entry(path.clone())
            .or_insert_with(|| self.start(&path));
        let (id, rx) = entry.hub.subscribe();
        let owner = entry.owner;
        drop(entries);

        let shared = Arc::downgrade(&self.shared);
        let unsubscribe = Unsubscribe::new(move || {
            if let Some(shared) = shared.upgrade() {
                shared.release(&path, owner, id);
            }
        });
        (rx, unsubscribe)
    }

    fn start(&self, path: &Path) -> Entry {
        let initial = classify(path);
        let hub = Arc::new(FanOut::with_current(initial));
        let owner = self.shared.next_owner.fetch_add(1, Ordering::Relaxed);
        let cancel = CancellationToken::new();

        let supervisor = PathSupervisor {
            watcher: self.clone(),
            path: path.to_path_buf(),
            owner,
            cancel: cancel.clone(),
            debouncer: Debouncer::new(
                path.to_path_buf(),
                hub.clone(),
                self.shared.timing.debounce,
                initial,
            ),
        };
        tokio::spawn(supervisor.run());

        Entry { hub, owner, cancel }
    }

    /// Directories currently holding an OS watch
    pub fn watched_dirs(&self) -> Vec<PathBuf> {
        let mut dirs: Vec<PathBuf> = lock(&self.shared.back).dirs.keys().cloned().collect();
        dirs.sort();
        dirs
    }

    /// Paths with at least one subscriber
    pub fn watched_paths(&self) -> Vec<PathBuf> {
        let mut paths: Vec<PathBuf> = lock(&self.shared.entries).keys().cloned().collect();
        paths.sort();
        paths
    }
}

enum Interrupt {
    Cancelled,
    ParentRemoved,
    Closed,
}

/// Coalesces raw signals for one path into classified statuses.
struct Debouncer {
    path: PathBuf,
    hub: Arc<FanOut<FileStatus>>,
    window: Duration,
    last: FileStatus,
}

impl Debouncer {
    fn new(
        path: PathBuf,
        hub: Arc<FanOut<FileStatus>>,
        window: Duration,
        last: FileStatus,
    ) -> Self {
        Self {
            path,
            hub,
            window,
            last,
        }
    }

    fn set(&mut self, status: FileStatus) {
        if status != self.last {
            self.last = status;
            self.hub.publish(status);
        }
    }

    fn refresh(&mut self) {
        let status = classify(&self.path);
        self.set(status);
    }

    fn settle(&mut self) {
        let status = classify(&self.path);
        if status != self.last || status == FileStatus::File {
            self.last = status;
            self.hub.publish(status);
        }
    }

    async fn run(
        &mut self,
        signals: &mut UnboundedReceiver<Signal>,
        cancel: &CancellationToken,
    ) -> Interrupt {
        let mut deadline: Option<Instant> = None;
        loop {
            tokio::select! {
                () = cancel.cancelled() => return Interrupt::Cancelled,
                signal = signals.recv() => match signal {
                    Some(Signal::Changed) => deadline = Some(Instant::now() + self.window),
                    Some(Signal::ParentRemoved) => return Interrupt::ParentRemoved,
                    None => return Interrupt::Closed,
                },
                () = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    deadline = None;
                    self.settle();
                }
            }
        }
    }
}

enum State {
    Attaching,
    Watching(UnboundedReceiver<Signal>),
    WaitingForParent,
    Backoff,
    Terminated,
}

struct PathSupervisor {
    watcher: FileWatcher,
    path: PathBuf,
    owner: u64,
    cancel: CancellationToken,
    debouncer: Debouncer,
}

impl PathSupervisor {
    async fn run(mut self) {
        let mut state = State::Attaching;
        loop {
            state = match state {
                State::Attaching => self.attach(),
                State::Watching(mut signals) => self.watch(&mut signals).await,
                State::WaitingForParent => self.wait_for_parent().await,
                State::Backoff => self.backoff().await,
                State::Terminated => break,
            };
        }
        log::trace!("supervisor for {} stopped", self.path.display());
    }

    fn attach(&mut self) -> State {
        let attached = lock(&self.watcher.shared.back).attach(&self.path, self.owner, &self.cancel);
        match attached {
            Ok(signals) => {
                self.debouncer.refresh();
                State::Watching(signals)
            }
            Err(AttachError::Cancelled) => State::Terminated,
            Err(AttachError::ParentMissing) => {
                self.debouncer.refresh();
                State::WaitingForParent
            }
            Err(AttachError::Failed(err)) => {
                log::warn!(
                    "cannot watch {}: {err}, retrying in {:?}",
                    self.path.display(),
                    self.watcher.shared.timing.retry
                );
                self.debouncer.set(FileStatus::Unknown);
                State::Backoff
            }
        }
    }

    async fn watch(&mut self, signals: &mut UnboundedReceiver<Signal>) -> State {
        match self.debouncer.run(signals, &self.cancel).await {
            Interrupt::Cancelled => State::Terminated,
            Interrupt::ParentRemoved => {
                self.debouncer.refresh();
                State::WaitingForParent
            }
            Interrupt::Closed => State::Attaching,
        }
    }

    async fn wait_for_parent(&mut self) -> State {
        let Some(parent) = parent_dir(&self.path) else {
            return State::Backoff;
        };
        log::debug!(
            "{} waits for directory {}",
            self.path.display(),
            parent.display()
        );

        let (mut statuses, _parent) = self.watcher.subscribe(&parent);
        loop {
            tokio::select! {
                () = self.cancel.cancelled() => return State::Terminated,
                status = statuses.recv() => match status {
                    Some(FileStatus::Directory) => return State::Attaching,
                    Some(_) => {}
                    None => return State::Backoff,
                },
            }
        }
    }

    async fn backoff(&mut self) -> State {
        tokio::select! {
            () = self.cancel.cancelled() => State::Terminated,
            () = tokio::time::sleep(self.watcher.shared.timing.retry) => State::Attaching,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fast() -> WatchTiming {
        WatchTiming {
            debounce: Duration::from_millis(20),
            retry: Duration::from_millis(100),
        }
    }

    async fn next(rx: &mut UnboundedReceiver<FileStatus>) -> FileStatus {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a file status")
            .expect("status stream closed")
    }

    async fn collect_until(
        rx: &mut UnboundedReceiver<FileStatus>,
        want: FileStatus,
    ) -> Vec<FileStatus> {
        let mut seen = Vec::new();
        loop {
            let status = next(rx).await;
            seen.push(status);
            if status == want {
                return seen;
            }
        }
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        for _ in 0..500 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached in time");
    }

    #[test]
    fn test_classify() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("file");
        std::fs::write(&file, "x").unwrap();

        assert_eq!(classify(dir.path()), FileStatus::Directory);
        assert_eq!(classify(&file), FileStatus::File);
        assert_eq!(classify(&dir.path().join("missing")), FileStatus::NotFound);
        assert_eq!(classify(&file.join("below")), FileStatus::NotFound);
    }

    #[test]
    fn test_parent_dir_of_relative_path() {
        assert_eq!(parent_dir(Path::new("file")), Some(PathBuf::from(".")));
        assert_eq!(parent_dir(Path::new("/a/b")), Some(PathBuf::from("/a")));
        assert_eq!(parent_dir(Path::new("/")), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_burst_within_window_yields_last_classification_once() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("target");
        let hub = Arc::new(FanOut::with_current(FileStatus::NotFound));
        let (_, mut deliveries) = hub.subscribe();
        assert_eq!(deliveries.try_recv().ok(), Some(FileStatus::NotFound));

        let (tx, mut signals) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let stop = cancel.clone();
        let mut debouncer = Debouncer::new(
            path.clone(),
            hub.clone(),
            Duration::from_millis(200),
            FileStatus::NotFound,
        );
        let task = tokio::spawn(async move { debouncer.run(&mut signals, &stop).await });

        std::fs::write(&path, "x").unwrap();
        tx.send(Signal::Changed).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::remove_file(&path).unwrap();
        tx.send(Signal::Changed).unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        std::fs::create_dir(&path).unwrap();
        tx.send(Signal::Changed).unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        cancel.cancel();
        assert!(matches!(task.await.unwrap(), Interrupt::Cancelled));
        assert_eq!(deliveries.try_recv().ok(), Some(FileStatus::Directory));
        assert!(deliveries.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_parent_removed_interrupts_pending_burst() {
        let dir = tempfile::tempdir().unwrap();
        let hub = Arc::new(FanOut::with_current(FileStatus::NotFound));
        let (tx, mut signals) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let mut debouncer = Debouncer::new(
            dir.path().join("f"),
            hub,
            Duration::from_millis(200),
            FileStatus::NotFound,
        );

        tx.send(Signal::Changed).unwrap();
        tx.send(Signal::ParentRemoved).unwrap();
        assert!(matches!(
            debouncer.run(&mut signals, &cancel).await,
            Interrupt::ParentRemoved
        ));

        drop(tx);
        assert!(matches!(
            debouncer.run(&mut signals, &cancel).await,
            Interrupt::Closed
        ));
    }

    #[tokio::test]
    async fn test_two_subscribers_see_identical_sequences() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("watched");
        let watcher = FileWatcher::new(fast()).unwrap();

        let (mut a, _ua) = watcher.subscribe(&path);
        let (mut b, _ub) = watcher.subscribe(&path);
        let expected_dir = dir.path().to_path_buf();
        wait_until(|| watcher.watched_dirs() == vec![expected_dir.clone()]).await;

        std::fs::write(&path, "hello").unwrap();
        let seen_a = collect_until(&mut a, FileStatus::File).await;
        let seen_b = collect_until(&mut b, FileStatus::File).await;
        assert_eq!(seen_a, vec![FileStatus::NotFound, FileStatus::File]);
        assert_eq!(seen_a, seen_b);

        std::fs::remove_file(&path).unwrap();
        assert_eq!(next(&mut a).await, FileStatus::NotFound);
        assert_eq!(next(&mut b).await, FileStatus::NotFound);
    }

    #[tokio::test]
    async fn test_last_unsubscribe_releases_directory_watch() {
        let dir = tempfile::tempdir().unwrap();
        let watcher = FileWatcher::new(fast()).unwrap();

        let (_a, mut unsub_a) = watcher.subscribe(dir.path().join("one"));
        let (_b, mut unsub_b) = watcher.subscribe(dir.path().join("two"));
        let expected_dir = dir.path().to_path_buf();
        wait_until(|| watcher.watched_dirs() == vec![expected_dir.clone()]).await;

        unsub_a.unsubscribe();
        assert_eq!(watcher.watched_dirs(), vec![dir.path().to_path_buf()]);
        assert_eq!(watcher.watched_paths(), vec![dir.path().join("two")]);

        unsub_b.unsubscribe();
        unsub_b.unsubscribe();
        assert!(watcher.watched_dirs().is_empty());
        assert!(watcher.watched_paths().is_empty());
    }

    #[tokio::test]
    async fn test_content_change_is_delivered_again() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config");
        std::fs::write(&path, "one").unwrap();
        let watcher = FileWatcher::new(fast()).unwrap();

        let (mut rx, _unsub) = watcher.subscribe(&path);
        assert_eq!(next(&mut rx).await, FileStatus::File);
        let expected_dir = dir.path().to_path_buf();
        wait_until(|| watcher.watched_dirs() == vec![expected_dir.clone()]).await;

        std::fs::write(&path, "two").unwrap();
        assert_eq!(next(&mut rx).await, FileStatus::File);
    }

    #[tokio::test]
    async fn test_waits_for_missing_parent() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("sub");
        let path = parent.join("file");
        let watcher = FileWatcher::new(fast()).unwrap();

        let (mut rx, _unsub) = watcher.subscribe(&path);
        assert_eq!(next(&mut rx).await, FileStatus::NotFound);
        let expected_dir = dir.path().to_path_buf();
        wait_until(|| watcher.watched_dirs() == vec![expected_dir.clone()]).await;

        std::fs::create_dir(&parent).unwrap();
        let expected_parent = parent.clone();
        wait_until(|| watcher.watched_dirs().contains(&expected_parent)).await;
        std::fs::write(&path, "x").unwrap();
        assert_eq!(collect_until(&mut rx, FileStatus::File).await.last(), Some(&FileStatus::File));
    }

    #[tokio::test]
    async fn test_recovers_after_parent_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let parent = dir.path().join("sub");
        let path = parent.join("file");
        std::fs::create_dir(&parent).unwrap();
        std::fs::write(&path, "x").unwrap();
        let watcher = FileWatcher::new(fast()).unwrap();

        let (mut rx, _unsub) = watcher.subscribe(&path);
        assert_eq!(next(&mut rx).await, FileStatus::File);
        let expected_parent = parent.clone();
        wait_until(|| watcher.watched_dirs().contains(&expected_parent)).await;

        std::fs::remove_dir_all(&parent).unwrap();
        collect_until(&mut rx, FileStatus::NotFound).await;
        let expected_dir = dir.path().to_path_buf();
        wait_until(|| watcher.watched_dirs() == vec![expected_dir.clone()]).await;

        std::fs::create_dir(&parent).unwrap();
        let expected_parent = parent.clone();
        wait_until(|| watcher.watched_dirs().contains(&expected_parent)).await;
        std::fs::write(&path, "y").unwrap();
        collect_until(&mut rx, FileStatus::File).await;
    }
}

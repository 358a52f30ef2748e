//! Command runtime.
//!
//! A [`Command`] observes one kind of host state and can converge it.
//! Observations are pushed through the [`Reporter`] handed over at
//! construction. Implementations never report synchronously from
//! [`Command::watch`], [`Command::stop`] or [`Command::update_variables`]:
//! those are called while the owning group recomputes, and reporting
//! re-enters it.

mod apt_packages;
mod apt_upgrade;
mod file_content;
mod file_make_dir;
mod file_merge_dirs;
mod file_remove;
pub mod params;
pub mod registry;
mod ubuntu_repos;
mod xdg_user_dir;

pub use params::{ParamDesc, ParamType, ParamValue, Params};
pub use registry::{Built, CommandKind, Description, Registry};

use crate::error::{Error, Result};
use crate::fanout::{Unsubscribe, lock};
use crate::files::FileStatus;
use crate::host::Host;
use crate::status::Reporter;
use crate::variables::Variables;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Command: Send + Sync {
    /// Start observing. Calling it again restarts the observation.
    fn watch(self: Arc<Self>);

    /// Stop observing and release every subscription. Idempotent.
    fn stop(&self);

    /// Converge the host, reporting progress. Returns success.
    async fn apply(&self) -> bool;

    /// Take a new variable snapshot, returning whether it differs from the
    /// previous one.
    fn update_variables(&self, _variables: &Variables) -> bool {
        false
    }

    /// Whether a variable change moves what this command observes, so
    /// that the owner must stop and watch again.
    fn rewatch_on_variables(&self) -> bool {
        false
    }
}

/// Everything a constructor gets.
#[derive(Clone)]
pub struct CommandContext {
    pub params: Params,
    pub variables: Variables,
    pub reporter: Reporter,
    pub host: Host,
}

/// Cancellation and subscriptions of the running observation.
#[derive(Default)]
pub(crate) struct WatchSlot {
    active: Mutex<Option<(CancellationToken, Vec<Unsubscribe>)>>,
}

impl WatchSlot {
    /// Replace the running observation, returning the token of the new one.
    pub(crate) fn start(&self, subscriptions: Vec<Unsubscribe>) -> CancellationToken {
        let token = CancellationToken::new();
        let previous = lock(&self.active).replace((token.clone(), subscriptions));
        if let Some((old, _)) = previous {
            old.cancel();
        }
        token
    }

    pub(crate) fn stop(&self) {
        let previous = lock(&self.active).take();
        if let Some((token, _subscriptions)) = previous {
            token.cancel();
        }
    }
}

/// Set while `apply` runs; observations are dropped meanwhile.
#[derive(Default)]
pub(crate) struct Applying(AtomicBool);

impl Applying {
    pub(crate) fn begin(&self) -> ApplyingGuard<'_> {
        self.0.store(true, Ordering::SeqCst);
        ApplyingGuard(&self.0)
    }

    pub(crate) fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub(crate) struct ApplyingGuard<'a>(&'a AtomicBool);

impl Drop for ApplyingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Variable snapshot a command resolves its templates against.
#[derive(Default)]
pub(crate) struct VariableCell(Mutex<Variables>);

impl VariableCell {
    pub(crate) fn new(variables: Variables) -> Self {
        Self(Mutex::new(variables))
    }

    pub(crate) fn snapshot(&self) -> Variables {
        lock(&self.0).clone()
    }

    pub(crate) fn update(&self, variables: &Variables) -> bool {
        lock(&self.0).update(variables)
    }
}

/// State check of a command bound to a single path.
#[async_trait]
pub(crate) trait FileCheck: Send + Sync + 'static {
    /// Path to observe under the given variables
    fn path(&self, variables: &Variables, host: &Host) -> PathBuf;

    /// Report the state matching `status`.
    async fn check(
        &self,
        status: FileStatus,
        variables: &Variables,
        host: &Host,
        reporter: &Reporter,
    );

    async fn apply(&self, variables: &Variables, host: &Host, reporter: &Reporter) -> bool;
}

/// Drives a [`FileCheck`] from the file-state watcher.
pub(crate) struct FileWatcherCommand<K> {
    check: K,
    variables: VariableCell,
    reporter: Reporter,
    host: Host,
    slot: WatchSlot,
    applying: Applying,
}

impl<K: FileCheck> FileWatcherCommand<K> {
    pub(crate) fn new(check: K, ctx: CommandContext) -> Self {
        Self {
            check,
            variables: VariableCell::new(ctx.variables),
            reporter: ctx.reporter,
            host: ctx.host,
            slot: WatchSlot::default(),
            applying: Applying::default(),
        }
    }

    pub(crate) fn boxed(check: K, ctx: CommandContext) -> Arc<dyn Command> {
        Arc::new(Self::new(check, ctx))
    }
}

#[async_trait]
impl<K: FileCheck> Command for FileWatcherCommand<K> {
    fn watch(self: Arc<Self>) {
        let path = self.check.path(&self.variables.snapshot(), &self.host);
        let (mut statuses, unsubscribe) = self.host.files.subscribe(&path);
        let cancel = self.slot.start(vec![unsubscribe]);

        tokio::spawn(async move {
            loop {
                let status = tokio::select! {
                    () = cancel.cancelled() => break,
                    status = statuses.recv() => match status {
                        Some(status) => status,
                        None => break,
                    },
                };
                if self.applying.is_set() {
                    continue;
                }
                let variables = self.variables.snapshot();
                tokio::select! {
                    () = cancel.cancelled() => break,
                    () = self.check.check(status, &variables, &self.host, &self.reporter) => {}
                }
            }
        });
    }

    fn stop(&self) {
        self.slot.stop();
    }

    async fn apply(&self) -> bool {
        let _applying = self.applying.begin();
        let variables = self.variables.snapshot();
        self.check.apply(&variables, &self.host, &self.reporter).await
    }

    fn update_variables(&self, variables: &Variables) -> bool {
        self.variables.update(variables)
    }

    fn rewatch_on_variables(&self) -> bool {
        true
    }
}

/// `path` with variables substituted
pub(crate) fn resolve_path(template: &str, variables: &Variables) -> PathBuf {
    PathBuf::from(variables.replace(template))
}

/// Refuse to modify anything but absolute paths.
pub(crate) fn checked_path(path: &Path) -> Result<()> {
    if path.is_absolute() {
        Ok(())
    } else {
        Err(Error::InvalidPath(path.to_path_buf()))
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_slot_cancels_previous_and_releases() {
        let slot = WatchSlot::default();
        let released = Arc::new(AtomicBool::new(false));
        let flag = released.clone();
        let first = slot.start(vec![Unsubscribe::new(move || flag.store(true, Ordering::SeqCst))]);
        let second = slot.start(Vec::new());
        assert!(first.is_cancelled());
        assert!(released.load(Ordering::SeqCst));
        assert!(!second.is_cancelled());
        slot.stop();
        slot.stop();
        assert!(second.is_cancelled());
    }

    #[test]
    fn test_applying_guard_resets() {
        let applying = Applying::default();
        {
            let _guard = applying.begin();
            assert!(applying.is_set());
        }
        assert!(!applying.is_set());
    }

    #[test]
    fn test_resolve_path() {
        let mut vars = Variables::new();
        vars.define("user", "ada");
        assert_eq!(resolve_path("/home/<user>/x", &vars), PathBuf::from("/home/ada/x"));
    }

    #[test]
    fn test_checked_path_rejects_relative() {
        assert!(checked_path(Path::new("/etc/x")).is_ok());
        assert!(matches!(checked_path(Path::new("")), Err(Error::InvalidPath(_))));
        assert!(matches!(checked_path(Path::new("etc/x")), Err(Error::InvalidPath(_))));
    }
}

//! Host handles shared by every command: watchers, the executor and the
//! user database, built once at startup in dependency order.

use crate::error::Result;
use crate::exec::{Executor, Tools};
use crate::files::{FileWatcher, WatchTiming};
use crate::packages::{AptCacheWatcher, DpkgWatcher};
use crate::users::Users;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Well-known host files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostPaths {
    pub dpkg_status: PathBuf,
    /// Recreated by apt whenever the package lists are updated
    pub apt_lists_partial: PathBuf,
    pub passwd: PathBuf,
    pub sources_list: PathBuf,
    pub apt_periodic: PathBuf,
}

impl Default for HostPaths {
    fn default() -> Self {
        Self {
            dpkg_status: PathBuf::from("/var/lib/dpkg/status"),
            apt_lists_partial: PathBuf::from("/var/lib/apt/lists/partial"),
            passwd: PathBuf::from("/etc/passwd"),
            sources_list: PathBuf::from("/etc/apt/sources.list"),
            apt_periodic: PathBuf::from("/etc/apt/apt.conf.d/10periodic"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    pub paths: HostPaths,
    pub tools: Tools,
    pub watch: WatchTiming,
    /// Period of the forced package lists refresh
    pub apt_refresh: Duration,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            paths: HostPaths::default(),
            tools: Tools::default(),
            watch: WatchTiming::default(),
            apt_refresh: Duration::from_secs(2 * 60 * 60),
        }
    }
}

#[derive(Clone)]
pub struct Host {
    pub files: FileWatcher,
    pub dpkg: DpkgWatcher,
    pub apt_cache: AptCacheWatcher,
    pub exec: Arc<Executor>,
    pub users: Users,
    pub paths: HostPaths,
}

impl Host {
    /// Build every host handle. Must be called from within a tokio runtime.
    pub fn new(config: HostConfig) -> Result<Self> {
        let files = FileWatcher::new(config.watch)?;
        let exec = Arc::new(Executor::new(config.tools));
        let dpkg = DpkgWatcher::new(files.clone(), config.paths.dpkg_status.clone());
        let apt_cache = AptCacheWatcher::new(
            files.clone(),
            dpkg.clone(),
            exec.clone(),
            config.paths.apt_lists_partial.clone(),
            config.apt_refresh,
        );
        let users = Users::new(config.paths.passwd.clone());
        Ok(Self {
            files,
            dpkg,
            apt_cache,
            exec,
            users,
            paths: config.paths,
        })
    }
}

//! Package-state watchers: the installed set from dpkg and the
//! availability list from the apt cache.

pub mod apt_cache;
pub mod dpkg;
pub mod version;

pub use apt_cache::{AptCacheWatcher, Available, AvailablePackage};
pub use dpkg::{DpkgWatcher, Installed, InstalledPackage};
pub use version::DebianVersion;

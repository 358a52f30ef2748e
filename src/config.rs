use anyhow::{Context, Result};
use reconcile::{HostConfig, HostPaths, Tools, WatchTiming};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "/etc/holdfast/config.toml";

// ============================================================================
// Config
// ============================================================================

/// Agent configuration. Every field has a default, so a missing file or
/// a partial file is fine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Stored configuration tree
    pub tree_path: PathBuf,
    /// Operator journal, one JSON entry per line
    pub journal_path: PathBuf,
    pub host: HostSection,
    pub tools: ToolsSection,
    pub timing: TimingSection,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            tree_path: PathBuf::from("/var/lib/holdfast/tree.json"),
            journal_path: PathBuf::from("/var/log/holdfast.log"),
            host: HostSection::default(),
            tools: ToolsSection::default(),
            timing: TimingSection::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HostSection {
    pub dpkg_status: PathBuf,
    pub apt_lists_partial: PathBuf,
    pub passwd: PathBuf,
    pub sources_list: PathBuf,
    pub apt_periodic: PathBuf,
}

impl Default for HostSection {
    fn default() -> Self {
        let paths = HostPaths::default();
        Self {
            dpkg_status: paths.dpkg_status,
            apt_lists_partial: paths.apt_lists_partial,
            passwd: paths.passwd,
            sources_list: paths.sources_list,
            apt_periodic: paths.apt_periodic,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub apt_get: String,
    pub apt_cache: String,
    pub lsb_release: String,
}

impl Default for ToolsSection {
    fn default() -> Self {
        let tools = Tools::default();
        Self {
            apt_get: tools.apt_get,
            apt_cache: tools.apt_cache,
            lsb_release: "lsb_release".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingSection {
    pub file_debounce_ms: u64,
    pub retry_secs: u64,
    pub apt_refresh_secs: u64,
    pub save_debounce_ms: u64,
}

impl Default for TimingSection {
    fn default() -> Self {
        Self {
            file_debounce_ms: 200,
            retry_secs: 10,
            apt_refresh_secs: 2 * 60 * 60,
            save_debounce_ms: 500,
        }
    }
}

impl Config {
    /// Load the config at `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Could not read {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Invalid config format in {}", path.display()))?;
        Ok(config.expanded())
    }

    /// Config with `~` and environment variables expanded in every path
    fn expanded(mut self) -> Self {
        for path in [
            &mut self.tree_path,
            &mut self.journal_path,
            &mut self.host.dpkg_status,
            &mut self.host.apt_lists_partial,
            &mut self.host.passwd,
            &mut self.host.sources_list,
            &mut self.host.apt_periodic,
        ] {
            *path = expand_path(path);
        }
        self
    }

    pub fn host_config(&self) -> HostConfig {
        HostConfig {
            paths: HostPaths {
                dpkg_status: self.host.dpkg_status.clone(),
                apt_lists_partial: self.host.apt_lists_partial.clone(),
                passwd: self.host.passwd.clone(),
                sources_list: self.host.sources_list.clone(),
                apt_periodic: self.host.apt_periodic.clone(),
            },
            tools: Tools {
                apt_get: self.tools.apt_get.clone(),
                apt_cache: self.tools.apt_cache.clone(),
            },
            watch: WatchTiming {
                debounce: Duration::from_millis(self.timing.file_debounce_ms),
                retry: Duration::from_secs(self.timing.retry_secs),
            },
            apt_refresh: Duration::from_secs(self.timing.apt_refresh_secs),
        }
    }

    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.timing.save_debounce_ms)
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Expand `~` and `$VAR` in a path, keeping it unchanged when expansion fails
pub fn expand_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy();
    match shellexpand::full(&raw) {
        Ok(expanded) => PathBuf::from(expanded.as_ref()),
        Err(err) => {
            log::warn!("Could not expand {raw}: {err}");
            path.to_path_buf()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join("nope.toml")).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.host_config(), HostConfig::default());
        assert_eq!(config.save_debounce(), Duration::from_millis(500));
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
tree_path = "/srv/tree.json"

[tools]
apt_get = "/usr/local/bin/apt-get"

[timing]
file_debounce_ms = 50
"#,
        )
        .unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.tree_path, PathBuf::from("/srv/tree.json"));
        assert_eq!(config.journal_path, PathBuf::from("/var/log/holdfast.log"));
        assert_eq!(config.tools.apt_cache, "apt-cache");
        assert_eq!(config.tools.lsb_release, "lsb_release");

        let host = config.host_config();
        assert_eq!(host.tools.apt_get, "/usr/local/bin/apt-get");
        assert_eq!(host.watch.debounce, Duration::from_millis(50));
        assert_eq!(host.watch.retry, Duration::from_secs(10));
        assert_eq!(host.apt_refresh, Duration::from_secs(7200));
    }

    #[test]
    fn test_invalid_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "tree_path = [").unwrap();
        let err = Config::load(&path).unwrap_err();
        assert!(err.to_string().starts_with("Invalid config format"));
    }

    #[test]
    fn test_paths_are_expanded() {
        let expanded = expand_path(Path::new("~/tree.json"));
        assert!(!expanded.to_string_lossy().starts_with('~'));
        assert_eq!(expand_path(Path::new("/plain")), PathBuf::from("/plain"));
    }
}

//! `xdg user dir`: the well-known user directories of one account.
//!
//! Directories left empty in the parameters are not managed: whatever
//! `user-dirs.dirs` holds for them is kept. Every current directory is
//! published as an `<xdg{name}>` variable, e.g. `<xdgdesktop>`.

use super::params::{ParamDesc, ParamType};
use super::{CommandKind, FileCheck, FileWatcherCommand, checked_path};
use crate::files::FileStatus;
use crate::host::Host;
use crate::status::{Cell, Detail, Reporter, Status, Table};
use crate::variables::Variables;
use async_trait::async_trait;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

const DIRS_FILE: &str = ".config/user-dirs.dirs";

/// Directory names in file order, with their parameter ids.
const DIRS: [(&str, &str); 8] = [
    ("DESKTOP", "desktop"),
    ("DOWNLOAD", "download"),
    ("TEMPLATES", "templates"),
    ("PUBLICSHARE", "publicshare"),
    ("DOCUMENTS", "documents"),
    ("MUSIC", "music"),
    ("PICTURES", "pictures"),
    ("VIDEOS", "videos"),
];

const PARAMS: &[ParamDesc] = &[
    ParamDesc::new("user", "User", ParamType::Username),
    ParamDesc::new("desktop", "Desktop", ParamType::FilePath),
    ParamDesc::new("download", "Download", ParamType::FilePath),
    ParamDesc::new("templates", "Templates", ParamType::FilePath),
    ParamDesc::new("publicshare", "Public share", ParamType::FilePath),
    ParamDesc::new("documents", "Documents", ParamType::FilePath),
    ParamDesc::new("music", "Music", ParamType::FilePath),
    ParamDesc::new("pictures", "Pictures", ParamType::FilePath),
    ParamDesc::new("videos", "Videos", ParamType::FilePath),
];

static LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r#"^XDG_(.*)_DIR="(.*)""#).unwrap());

pub(super) fn kinds() -> Vec<CommandKind> {
    vec![CommandKind::new(
        "xdg user dir",
        "folder",
        "Set XDG user directories",
        PARAMS,
        |ctx| {
            let check = XdgUserDir {
                user: ctx.params.string("user").to_string(),
                required: DIRS
                    .iter()
                    .map(|(_, id)| ctx.params.string(id).to_string())
                    .collect(),
            };
            FileWatcherCommand::boxed(check, ctx)
        },
    )]
}

/// Directories found in a `user-dirs.dirs` file, `$HOME` expanded.
pub(crate) fn parse_dirs(text: &str, home: &str) -> BTreeMap<String, String> {
    text.lines()
        .filter_map(|line| LINE.captures(line))
        .map(|caps| {
            let value = caps[2].trim_end_matches('/').replacen("$HOME", home, 1);
            (caps[1].to_string(), value)
        })
        .collect()
}

/// Value as written in the file: paths under `home` become `$HOME/...`.
fn file_value(path: &str, home: &str) -> String {
    match Path::new(path).strip_prefix(home) {
        Ok(rest) => format!("$HOME/{}", rest.display()),
        Err(_) => path.to_string(),
    }
}

/// Out-variables for the current directories
fn out_variables(current: &BTreeMap<String, String>) -> Variables {
    let mut vars = Variables::new();
    for (name, _) in DIRS {
        let value = current.get(name).cloned().unwrap_or_default();
        vars.define(&format!("xdg{}", name.to_lowercase()), value);
    }
    vars
}

struct XdgUserDir {
    user: String,
    required: Vec<String>,
}

impl XdgUserDir {
    fn home(&self, variables: &Variables, host: &Host) -> crate::error::Result<String> {
        let user = variables.replace(&self.user);
        host.users.lookup(&user).map(|u| u.home)
    }

    /// Required directories, resolved and without trailing slash
    fn required(&self, variables: &Variables) -> Vec<String> {
        self.required
            .iter()
            .map(|dir| variables.replace(dir).trim_end_matches('/').to_string())
            .collect()
    }

    fn evaluate(
        &self,
        current: &BTreeMap<String, String>,
        variables: &Variables,
    ) -> (Status, Table) {
        let mut table = Table::with_header(["Directory", "Current", "Required"]);
        let mut status = Status::Applied;
        for ((name, _), required) in DIRS.iter().zip(self.required(variables)) {
            let current = current.get(*name).map(String::as_str).unwrap_or_default();
            let row = if required.is_empty() {
                Status::None
            } else if current == required {
                Status::Applied
            } else {
                Status::Todo
            };
            if row == Status::Todo {
                status = Status::Todo;
            }
            table.push_row(vec![
                Cell::new(row, *name),
                Cell::new(row, current),
                Cell::plain(required),
            ]);
        }
        (status, table)
    }
}

#[async_trait]
impl FileCheck for XdgUserDir {
    fn path(&self, variables: &Variables, host: &Host) -> PathBuf {
        match self.home(variables, host) {
            Ok(home) => Path::new(&home).join(DIRS_FILE),
            Err(err) => {
                log::warn!("cannot locate home of {:?}: {err}", variables.replace(&self.user));
                Path::new("/home").join(variables.replace(&self.user)).join(DIRS_FILE)
            }
        }
    }

    async fn check(
        &self,
        status: FileStatus,
        variables: &Variables,
        host: &Host,
        reporter: &Reporter,
    ) {
        let user = variables.replace(&self.user);
        let home = match self.home(variables, host) {
            Ok(home) => home,
            Err(err) => {
                reporter.report(
                    Status::Failed,
                    format!("Could not get user information for {user:?}"),
                    Some(Detail::error(err)),
                );
                return;
            }
        };
        let path = self.path(variables, host);
        match status {
            FileStatus::File => {
                let text = match tokio::fs::read_to_string(&path).await {
                    Ok(text) => text,
                    Err(err) => {
                        reporter.report(
                            Status::Unknown,
                            format!("Could not read {path:?}"),
                            Some(Detail::error(err)),
                        );
                        return;
                    }
                };
                let current = parse_dirs(&text, &home);
                let (status, table) = self.evaluate(&current, variables);
                let info = if status == Status::Todo {
                    format!("Need to change XDG dirs for {user}")
                } else {
                    format!("XDG dirs for {user} are as expected")
                };
                reporter.report_with_variables(
                    status,
                    info,
                    Some(Detail::Table(table)),
                    out_variables(&current),
                );
            }
            FileStatus::NotFound => {
                reporter.report(Status::Todo, format!("Need to create {path:?}"), None);
            }
            FileStatus::Directory => {
                reporter.report(Status::Failed, format!("{path:?} is a directory"), None);
            }
            FileStatus::Unknown => {
                reporter.report(Status::Unknown, format!("{path:?} status unknown"), None);
            }
        }
    }

    async fn apply(&self, variables: &Variables, host: &Host, reporter: &Reporter) -> bool {
        let user = variables.replace(&self.user);
        let home = match self.home(variables, host) {
            Ok(home) => home,
            Err(err) => {
                reporter.report(
                    Status::Failed,
                    format!("Could not get user information for {user:?}"),
                    Some(Detail::error(err)),
                );
                return false;
            }
        };
        let path = self.path(variables, host);
        if let Err(err) = checked_path(&path) {
            reporter.report(
                Status::Failed,
                format!("Could not write to {path:?}"),
                Some(Detail::error(err)),
            );
            return false;
        }

        let current = match tokio::fs::read_to_string(&path).await {
            Ok(text) => parse_dirs(&text, &home),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(err) => {
                reporter.report(
                    Status::Failed,
                    format!("Could not read {path:?}"),
                    Some(Detail::error(err)),
                );
                return false;
            }
        };

        let mut wanted = BTreeMap::new();
        let mut content = String::new();
        for ((name, _), required) in DIRS.iter().zip(self.required(variables)) {
            let value = if required.is_empty() {
                current.get(*name).cloned().unwrap_or_default()
            } else {
                required
            };
            if value.is_empty() {
                continue;
            }
            content.push_str(&format!("XDG_{name}_DIR=\"{}\"\n", file_value(&value, &home)));
            wanted.insert((*name).to_string(), value);
        }

        if let Some(config) = path.parent() {
            let created = !config.exists();
            if let Err(err) = tokio::fs::create_dir_all(config).await {
                reporter.report(
                    Status::Failed,
                    format!("Could not create {config:?}"),
                    Some(Detail::error(err)),
                );
                return false;
            }
            if created && let Err(err) = host.users.chown(config, &user) {
                reporter.report(
                    Status::Failed,
                    format!("Could not change ownership of {config:?}"),
                    Some(Detail::error(err)),
                );
                return false;
            }
        }
        if let Err(err) = tokio::fs::write(&path, &content).await {
            reporter.report(
                Status::Failed,
                format!("Could not write to {path:?}"),
                Some(Detail::error(err)),
            );
            return false;
        }
        if let Err(err) = host.users.chown(&path, &user) {
            reporter.report(
                Status::Failed,
                format!("Could not change ownership of {path:?}"),
                Some(Detail::error(err)),
            );
            return false;
        }

        log::info!("wrote XDG user directories for {user}");
        reporter.report_with_variables(
            Status::Applied,
            format!("Applied XDG user paths for {user}"),
            Some(Detail::text(content)),
            out_variables(&wanted),
        );
        true
    }
}

//! `file content`: a file holding exactly the given text.

use super::params::{ParamDesc, ParamType};
use super::{CommandKind, FileCheck, FileWatcherCommand, checked_path, resolve_path};
use crate::files::FileStatus;
use crate::host::{Host, HostPaths};
use crate::status::{Detail, Reporter, Status};
use crate::variables::Variables;
use async_trait::async_trait;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const PARAMS: &[ParamDesc] = &[
    ParamDesc::new("path", "File path", ParamType::FilePath),
    ParamDesc::new("content", "File content", ParamType::Text),
    ParamDesc::new("owner", "File owner", ParamType::Username),
];

pub(super) fn kinds() -> Vec<CommandKind> {
    vec![CommandKind::new(
        "file content",
        "file",
        "Ensure a file has a content",
        PARAMS,
        |ctx| {
            let check = FileContent::new(
                Target::Template(ctx.params.string("path").to_string()),
                ctx.params.string("content"),
                ctx.params.string("owner"),
            );
            FileWatcherCommand::boxed(check, ctx)
        },
    )]
}

/// Where the managed file lives.
pub(crate) enum Target {
    /// Path parameter, resolved against the variables
    Template(String),
    /// One of the well-known host files
    Host(fn(&HostPaths) -> &Path),
}

pub(crate) struct FileContent {
    target: Target,
    content: String,
    owner: String,
}

impl FileContent {
    pub(crate) fn new(
        target: Target,
        content: impl Into<String>,
        owner: impl Into<String>,
    ) -> Self {
        Self {
            target,
            content: content.into(),
            owner: owner.into(),
        }
    }

    /// Owner that differs from the one of `meta`, if any
    fn owner_drift(&self, meta: &std::fs::Metadata, owner: &str, host: &Host) -> Option<String> {
        if owner.is_empty() {
            return None;
        }
        match host.users.lookup(owner) {
            Ok(user) if user.uid == meta.uid() && user.gid == meta.gid() => None,
            Ok(_) => Some(owner.to_string()),
            Err(err) => {
                log::warn!("cannot check owner {owner}: {err}");
                None
            }
        }
    }
}

#[async_trait]
impl FileCheck for FileContent {
    fn path(&self, variables: &Variables, host: &Host) -> PathBuf {
        match &self.target {
            Target::Template(template) => resolve_path(template, variables),
            Target::Host(pick) => pick(&host.paths).to_path_buf(),
        }
    }

    async fn check(
        &self,
        status: FileStatus,
        variables: &Variables,
        host: &Host,
        reporter: &Reporter,
    ) {
        let path = self.path(variables, host);
        let desired = variables.replace(&self.content);
        match status {
            FileStatus::Directory => {
                reporter.report(Status::Failed, format!("{path:?} is a directory"), None);
            }
            FileStatus::File => {
                let current = match tokio::fs::read_to_string(&path).await {
                    Ok(current) => current,
                    Err(err) => {
                        reporter.report(
                            Status::Unknown,
                            format!("Could not read {path:?}"),
                            Some(Detail::error(err)),
                        );
                        return;
                    }
                };
                if current != desired {
                    reporter.report(
                        Status::Todo,
                        format!("Need to change {path:?}"),
                        Some(Detail::diff(current, desired)),
                    );
                    return;
                }
                let owner = variables.replace(&self.owner);
                let drift = match tokio::fs::metadata(&path).await {
                    Ok(meta) => self.owner_drift(&meta, &owner, host),
                    Err(_) => None,
                };
                if let Some(owner) = drift {
                    reporter.report(
                        Status::Todo,
                        format!("Need to change {path:?} ownership to {owner:?}"),
                        Some(Detail::text(current)),
                    );
                    return;
                }
                reporter.report(
                    Status::Applied,
                    format!("{path:?} has the required content"),
                    Some(Detail::text(current)),
                );
            }
            FileStatus::Unknown => {
                reporter.report(Status::Unknown, format!("{path:?} status unknown"), None);
            }
            FileStatus::NotFound => {
                reporter.report(
                    Status::Todo,
                    format!("Need to create {path:?}"),
                    Some(Detail::text(desired)),
                );
            }
        }
    }

    async fn apply(&self, variables: &Variables, host: &Host, reporter: &Reporter) -> bool {
        let path = self.path(variables, host);
        if let Err(err) = checked_path(&path) {
            reporter.report(
                Status::Failed,
                format!("Cannot write to {path:?}"),
                Some(Detail::error(err)),
            );
            return false;
        }
        let content = variables.replace(&self.content);

        if let Err(err) = write(&path, &content).await {
            reporter.report(
                Status::Failed,
                format!("Could not write to {path:?}"),
                Some(Detail::error(err)),
            );
            return false;
        }

        let owner = variables.replace(&self.owner);
        if !owner.is_empty() {
            let user = match host.users.lookup(&owner) {
                Ok(user) => user,
                Err(err) => {
                    reporter.report(
                        Status::Failed,
                        format!("Could not get user information for {owner:?}"),
                        Some(Detail::error(err)),
                    );
                    return false;
                }
            };
            if let Err(err) = std::os::unix::fs::chown(&path, Some(user.uid), Some(user.gid)) {
                reporter.report(
                    Status::Failed,
                    format!("Could not change {path:?} ownership to {owner:?}"),
                    Some(Detail::error(err)),
                );
                return false;
            }
        }

        log::info!("wrote {}", path.display());
        reporter.report(
            Status::Applied,
            format!("Wrote content to {path:?}"),
            Some(Detail::text(content)),
        );
        true
    }
}

async fn write(path: &Path, content: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o644)
        .open(path)
        .await?;
    file.write_all(content.as_bytes()).await?;
    file.flush().await
}

#[cfg(test)]
mod tests {
    use super::super::testing::{Recorder, host};
    use super::super::Registry;
    use super::*;
    use serde_json::json;

    fn check(path: &Path, content: &str, owner: &str) -> FileContent {
        FileContent::new(Target::Template(path.display().to_string()), content, owner)
    }

    #[tokio::test]
    async fn test_missing_file_then_apply() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        let recorder = Recorder::new();
        let path = dir.path().join("motd");
        let vars: Variables = [("<hostname>", "box")].into_iter().collect();
        let cmd = check(&path, "welcome to <hostname>\n", "me");

        cmd.check(FileStatus::NotFound, &vars, &host, &recorder.reporter).await;
        let todo = recorder.last().unwrap();
        assert_eq!(todo.status, Status::Todo);
        assert_eq!(todo.info, format!("Need to create {path:?}"));
        assert_eq!(todo.detail, Some(Detail::text("welcome to box\n")));

        assert!(cmd.apply(&vars, &host, &recorder.reporter).await);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "welcome to box\n");
        assert_eq!(recorder.last().unwrap().status, Status::Applied);

        cmd.check(FileStatus::File, &vars, &host, &recorder.reporter).await;
        let applied = recorder.last().unwrap();
        assert_eq!(applied.status, Status::Applied);
        assert_eq!(applied.info, format!("{path:?} has the required content"));
    }

    #[tokio::test]
    async fn test_drift_is_reported_as_diff() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        let recorder = Recorder::new();
        let path = dir.path().join("conf");
        std::fs::write(&path, "old\n").unwrap();

        check(&path, "new\n", "")
            .check(FileStatus::File, &Variables::new(), &host, &recorder.reporter)
            .await;
        let todo = recorder.last().unwrap();
        assert_eq!(todo.status, Status::Todo);
        assert_eq!(todo.detail, Some(Detail::diff("old\n", "new\n")));
    }

    #[tokio::test]
    async fn test_directory_and_unknown() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        let recorder = Recorder::new();
        let cmd = check(dir.path(), "x", "");

        cmd.check(FileStatus::Directory, &Variables::new(), &host, &recorder.reporter).await;
        assert_eq!(recorder.last().unwrap().status, Status::Failed);
        cmd.check(FileStatus::Unknown, &Variables::new(), &host, &recorder.reporter).await;
        assert_eq!(recorder.last().unwrap().status, Status::Unknown);
    }

    #[tokio::test]
    async fn test_apply_with_unknown_owner_fails() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        let recorder = Recorder::new();
        let path = dir.path().join("f");

        let cmd = check(&path, "x", "ghost");
        assert!(!cmd.apply(&Variables::new(), &host, &recorder.reporter).await);
        let failed = recorder.last().unwrap();
        assert_eq!(failed.status, Status::Failed);
        assert_eq!(failed.info, "Could not get user information for \"ghost\"");
    }

    #[tokio::test]
    async fn test_apply_refuses_relative_path() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        let recorder = Recorder::new();
        let cmd = FileContent::new(Target::Template("relative/file".into()), "x", "");
        assert!(!cmd.apply(&Variables::new(), &host, &recorder.reporter).await);
        assert_eq!(recorder.last().unwrap().status, Status::Failed);
    }

    #[tokio::test]
    async fn test_watch_follows_external_edits() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        let recorder = Recorder::new();
        let path = dir.path().join("watched");
        let raw = json!({"path": path.display().to_string(), "content": "wanted\n"});
        let cmd = Registry::with_builtin()
            .init(
                "file content",
                raw.as_object().unwrap(),
                Variables::new(),
                recorder.reporter.clone(),
                host.clone(),
            )
            .unwrap()
            .command;
        cmd.clone().watch();

        recorder.wait_for(|u| u.info == format!("Need to create {path:?}")).await;
        std::fs::write(&path, "wanted\n").unwrap();
        recorder
            .wait_for(|u| {
                u.status == Status::Applied && u.info.ends_with("has the required content")
            })
            .await;
        cmd.stop();
    }
}

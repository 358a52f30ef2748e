use super::params::{ParamDesc, ParamType};
use super::{CommandKind, FileCheck, FileWatcherCommand, checked_path, resolve_path};
use crate::files::FileStatus;
use crate::host::Host;
use crate::status::{Detail, Reporter, Status};
use crate::variables::Variables;
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;

const PARAMS: &[ParamDesc] = &[ParamDesc::new("path", "File path", ParamType::FilePath)];

pub(super) fn kinds() -> Vec<CommandKind> {
    vec![CommandKind::new(
        "file remove",
        "folder",
        "Remove file or directory",
        PARAMS,
        |ctx| {
            let check = Remove {
                path: ctx.params.string("path").to_string(),
            };
            FileWatcherCommand::boxed(check, ctx)
        },
    )]
}

struct Remove {
    path: String,
}

#[async_trait]
impl FileCheck for Remove {
    fn path(&self, variables: &Variables, _host: &Host) -> PathBuf {
        resolve_path(&self.path, variables)
    }

    async fn check(
        &self,
        status: FileStatus,
        variables: &Variables,
        host: &Host,
        reporter: &Reporter,
    ) {
        let path = self.path(variables, host);
        match status {
            FileStatus::File | FileStatus::Directory => {
                reporter.report(Status::Todo, format!("Need to remove {path:?}"), None);
            }
            FileStatus::Unknown => {
                reporter.report(Status::Unknown, format!("{path:?} status unknown"), None);
            }
            FileStatus::NotFound => {
                reporter.report(Status::Applied, format!("{path:?} does not exist"), None);
            }
        }
    }

    async fn apply(&self, variables: &Variables, host: &Host, reporter: &Reporter) -> bool {
        let path = self.path(variables, host);
        if let Err(err) = checked_path(&path) {
            reporter.report(
                Status::Failed,
                format!("Failed removing {path:?}"),
                Some(Detail::error(err)),
            );
            return false;
        }
        if let Err(err) = remove_all(&path).await {
            reporter.report(
                Status::Failed,
                format!("Failed removing {path:?}"),
                Some(Detail::error(err)),
            );
            return false;
        }
        log::info!("removed {}", path.display());
        reporter.report(Status::Applied, format!("{path:?} removed"), None);
        true
    }
}

/// Remove a file or a directory tree. A missing path is not an error.
async fn remove_all(path: &std::path::Path) -> io::Result<()> {
    let removed = match tokio::fs::symlink_metadata(path).await {
        Ok(meta) if meta.is_dir() => tokio::fs::remove_dir_all(path).await,
        Ok(_) => tokio::fs::remove_file(path).await,
        Err(err) => Err(err),
    };
    match removed {
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{Recorder, host};
    use super::*;

    #[tokio::test]
    async fn test_removes_tree_and_missing_is_fine() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        let recorder = Recorder::new();
        let tree = dir.path().join("tree");
        std::fs::create_dir_all(tree.join("a/b")).unwrap();
        std::fs::write(tree.join("a/b/f"), "x").unwrap();
        let cmd = Remove {
            path: tree.display().to_string(),
        };

        cmd.check(FileStatus::Directory, &Variables::new(), &host, &recorder.reporter).await;
        assert_eq!(recorder.last().unwrap().info, format!("Need to remove {tree:?}"));

        assert!(cmd.apply(&Variables::new(), &host, &recorder.reporter).await);
        assert!(!tree.exists());
        assert!(cmd.apply(&Variables::new(), &host, &recorder.reporter).await);

        cmd.check(FileStatus::NotFound, &Variables::new(), &host, &recorder.reporter).await;
        let last = recorder.last().unwrap();
        assert_eq!((last.status, last.info), (Status::Applied, format!("{tree:?} does not exist")));
    }

    #[tokio::test]
    async fn test_removes_single_file() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        let recorder = Recorder::new();
        let file = dir.path().join("f");
        std::fs::write(&file, "x").unwrap();
        let cmd = Remove {
            path: file.display().to_string(),
        };
        assert!(cmd.apply(&Variables::new(), &host, &recorder.reporter).await);
        assert!(!file.exists());
        assert_eq!(recorder.last().unwrap().info, format!("{file:?} removed"));
    }
}

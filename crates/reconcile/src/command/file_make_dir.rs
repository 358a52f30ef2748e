use super::params::{ParamDesc, ParamType};
use super::{CommandKind, FileCheck, FileWatcherCommand, checked_path, resolve_path};
use crate::files::FileStatus;
use crate::host::Host;
use crate::status::{Detail, Reporter, Status};
use crate::variables::Variables;
use async_trait::async_trait;
use std::io;
use std::path::PathBuf;

const PARAMS: &[ParamDesc] = &[
    ParamDesc::new("path", "Directory path", ParamType::FilePath),
    ParamDesc::new("owner", "Directory owner", ParamType::Username),
];

pub(super) fn kinds() -> Vec<CommandKind> {
    vec![CommandKind::new(
        "file make dir",
        "folder",
        "Make directory",
        PARAMS,
        |ctx| {
            let check = MakeDir {
                path: ctx.params.string("path").to_string(),
                owner: ctx.params.string("owner").to_string(),
            };
            FileWatcherCommand::boxed(check, ctx)
        },
    )]
}

struct MakeDir {
    path: String,
    owner: String,
}

#[async_trait]
impl FileCheck for MakeDir {
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
            FileStatus::Directory => {
                reporter.report(Status::Applied, format!("{path:?} exists"), None);
            }
            FileStatus::File => {
                reporter.report(Status::Failed, format!("{path:?} is not a directory"), None);
            }
            FileStatus::Unknown => {
                reporter.report(Status::Unknown, format!("{path:?} status unknown"), None);
            }
            FileStatus::NotFound => {
                reporter.report(Status::Todo, format!("Need to create {path:?}"), None);
            }
        }
    }

    async fn apply(&self, variables: &Variables, host: &Host, reporter: &Reporter) -> bool {
        let path = self.path(variables, host);
        if let Err(err) = checked_path(&path) {
            reporter.report(
                Status::Failed,
                format!("Cannot create {path:?}"),
                Some(Detail::error(err)),
            );
            return false;
        }

        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_dir() => {
                reporter.report(Status::Applied, format!("{path:?} exists"), None);
                return true;
            }
            Ok(_) => {
                reporter.report(Status::Failed, format!("{path:?} is not a directory"), None);
                return false;
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => {
                reporter.report(
                    Status::Failed,
                    format!("Could not check status of {path:?}"),
                    Some(Detail::error(err)),
                );
                return false;
            }
        }

        let owner = variables.replace(&self.owner);
        if let Err(err) = tokio::fs::create_dir_all(&path).await {
            reporter.report(
                Status::Failed,
                format!("Could not create {path:?}"),
                Some(Detail::error(err)),
            );
            return false;
        }
        if let Err(err) = host.users.chown(&path, &owner) {
            reporter.report(
                Status::Failed,
                format!("Could not change ownership of {path:?}"),
                Some(Detail::error(err)),
            );
            return false;
        }

        log::info!("created directory {}", path.display());
        reporter.report(Status::Applied, format!("{path:?} directory created"), None);
        true
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{Recorder, host};
    use super::*;
    use std::os::unix::fs::MetadataExt;

    #[tokio::test]
    async fn test_creates_nested_directories() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        let recorder = Recorder::new();
        let vars: Variables = [("<user>", "ada")].into_iter().collect();
        let cmd = MakeDir {
            path: format!("{}/srv/<user>/data", dir.path().display()),
            owner: "me".into(),
        };
        let target = dir.path().join("srv/ada/data");

        cmd.check(FileStatus::NotFound, &vars, &host, &recorder.reporter).await;
        assert_eq!(recorder.last().unwrap().info, format!("Need to create {target:?}"));

        assert!(cmd.apply(&vars, &host, &recorder.reporter).await);
        assert!(target.is_dir());
        assert_eq!(
            std::fs::metadata(&target).unwrap().uid(),
            std::fs::metadata(dir.path()).unwrap().uid()
        );
        assert_eq!(recorder.last().unwrap().info, format!("{target:?} directory created"));

        assert!(cmd.apply(&vars, &host, &recorder.reporter).await);
        assert_eq!(recorder.last().unwrap().info, format!("{target:?} exists"));
    }

    #[tokio::test]
    async fn test_file_in_the_way() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        let recorder = Recorder::new();
        let path = dir.path().join("taken");
        std::fs::write(&path, "").unwrap();
        let cmd = MakeDir {
            path: path.display().to_string(),
            owner: String::new(),
        };

        cmd.check(FileStatus::File, &Variables::new(), &host, &recorder.reporter).await;
        assert_eq!(recorder.last().unwrap().status, Status::Failed);
        assert!(!cmd.apply(&Variables::new(), &host, &recorder.reporter).await);
        assert_eq!(recorder.last().unwrap().info, format!("{path:?} is not a directory"));
    }

    #[tokio::test]
    async fn test_unknown_owner_fails_after_creation() {
        let dir = tempfile::tempdir().unwrap();
        let host = host(dir.path());
        let recorder = Recorder::new();
        let cmd = MakeDir {
            path: dir.path().join("d").display().to_string(),
            owner: "ghost".into(),
        };
        assert!(!cmd.apply(&Variables::new(), &host, &recorder.reporter).await);
        let failed = recorder.last().unwrap();
        assert_eq!(failed.status, Status::Failed);
        assert!(failed.info.starts_with("Could not change ownership"));
    }
}

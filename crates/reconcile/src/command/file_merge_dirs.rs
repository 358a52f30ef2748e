//! `file merge dirs`: fold a source directory into a destination.
//!
//! Entries missing from the destination are moved over. Files present on
//! both sides must be identical (same SHA-256); the source copy is then
//! dropped. Any other conflict stops the merge and leaves the source in
//! place. Source directories emptied by the merge are removed.

use super::params::{ParamDesc, ParamType};
use super::{
    Applying, Command, CommandContext, CommandKind, VariableCell, WatchSlot, checked_path,
    resolve_path,
};
use crate::files::FileStatus;
use crate::host::Host;
use crate::status::{Cell, Detail, Reporter, Status, Table};
use crate::variables::Variables;
use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

const PARAMS: &[ParamDesc] = &[
    ParamDesc::new("source", "Source directory", ParamType::FilePath),
    ParamDesc::new("destination", "Destination directory", ParamType::FilePath),
    ParamDesc::new("owner", "Destination dir owner", ParamType::Username),
];

pub(super) fn kinds() -> Vec<CommandKind> {
    vec![CommandKind::new(
        "file merge dirs",
        "folder",
        "Merge directories",
        PARAMS,
        |ctx| Arc::new(MergeDirs::new(ctx)),
    )]
}

fn source_cell(status: FileStatus) -> Cell {
    match status {
        FileStatus::Directory => Cell::new(Status::Todo, "To merge"),
        FileStatus::File => Cell::new(Status::Failed, "Not a directory"),
        FileStatus::Unknown => Cell::new(Status::Unknown, "Unknown"),
        FileStatus::NotFound => Cell::new(Status::Applied, "Does not exist"),
    }
}

fn destination_cell(status: FileStatus) -> Cell {
    match status {
        FileStatus::Directory => Cell::new(Status::Applied, "Exists"),
        FileStatus::File => Cell::new(Status::Failed, "Not a directory"),
        FileStatus::Unknown => Cell::new(Status::Unknown, "Unknown"),
        FileStatus::NotFound => Cell::new(Status::Applied, "To create"),
    }
}

/// Overall state from the state of both directories.
pub(crate) fn evaluate(
    source: &Path,
    src: FileStatus,
    destination: &Path,
    dst: FileStatus,
) -> (Status, String, Table) {
    let mut table = Table::with_header(["Directory", "Status"]);
    for (path, cell) in [(source, source_cell(src)), (destination, destination_cell(dst))] {
        table.push_row(vec![Cell::new(cell.status, path.display().to_string()), cell]);
    }

    let (status, info) = match (src, dst) {
        (_, FileStatus::File) => (
            Status::Failed,
            format!("destination {destination:?} is not a directory"),
        ),
        (FileStatus::File, _) => (
            Status::Failed,
            format!("source {source:?} is not a directory"),
        ),
        (_, FileStatus::Unknown) => (
            Status::Unknown,
            format!("destination {destination:?} status unknown"),
        ),
        (FileStatus::Unknown, _) => (
            Status::Unknown,
            format!("source {source:?} status unknown"),
        ),
        (FileStatus::Directory, FileStatus::Directory) => (
            Status::Todo,
            format!("Need to merge source {source:?} into destination {destination:?}"),
        ),
        (FileStatus::Directory, FileStatus::NotFound) => (
            Status::Todo,
            format!("Need to move source {source:?} to destination {destination:?}"),
        ),
        (FileStatus::NotFound, FileStatus::NotFound) => {
            (Status::Todo, format!("Need to create {destination:?}"))
        }
        (FileStatus::NotFound, FileStatus::Directory) => {
            (Status::Applied, format!("destination {destination:?} exists"))
        }
    };
    (status, info, table)
}

/// Why a merge stopped
#[derive(Debug)]
struct Failure {
    info: String,
    detail: Option<Detail>,
}

impl Failure {
    fn new(info: String, err: impl std::fmt::Display) -> Self {
        Self {
            info,
            detail: Some(Detail::error(err)),
        }
    }

    fn conflict(info: String) -> Self {
        Self { info, detail: None }
    }
}

fn sha256(path: &Path) -> io::Result<[u8; 32]> {
    let data = fs::read(path)?;
    Ok(Sha256::digest(&data).into())
}

/// Move `src` to `dst`, copying when they live on different filesystems.
fn move_entry(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Err(err) if err.kind() == io::ErrorKind::CrossesDevices => copy_then_remove(src, dst),
        other => other,
    }
}

fn copy_then_remove(src: &Path, dst: &Path) -> io::Result<()> {
    if fs::symlink_metadata(src)?.is_dir() {
        fs::create_dir(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_then_remove(&entry.path(), &dst.join(entry.file_name()))?;
        }
        fs::remove_dir(src)
    } else {
        fs::copy(src, dst)?;
        fs::remove_file(src)
    }
}

/// Merge the content of `src` into the existing directory `dst`, then
/// remove `src`.
fn merge_dir(src: &Path, dst: &Path) -> Result<(), Failure> {
    let unreadable =
        |err: io::Error| Failure::new(format!("Could not read content of {src:?}"), err);
    let entries = fs::read_dir(src).map_err(unreadable)?;

    for entry in entries {
        let entry = entry.map_err(unreadable)?;
        let src_path = entry.path();
        let dst_path = dst.join(entry.file_name());

        let dst_meta = match fs::metadata(&dst_path) {
            Ok(meta) => meta,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                move_entry(&src_path, &dst_path).map_err(|err| {
                    Failure::new(format!("Could not move {src_path:?} to {dst:?}"), err)
                })?;
                continue;
            }
            Err(err) => {
                return Err(Failure::new(
                    format!("Could not check status of {dst_path:?}"),
                    err,
                ));
            }
        };
        let src_is_dir = entry
            .file_type()
            .map_err(|err| Failure::new(format!("Could not check status of {src_path:?}"), err))?
            .is_dir();

        match (src_is_dir, dst_meta.is_dir()) {
            (true, true) => merge_dir(&src_path, &dst_path)?,
            (true, false) => {
                return Err(Failure::conflict(format!(
                    "Could not move directory {src_path:?} to {dst_path:?}, \
                     which is not a directory"
                )));
            }
            (false, true) => {
                return Err(Failure::conflict(format!(
                    "Could not move file {src_path:?} to {dst_path:?}, which is a directory"
                )));
            }
            (false, false) => {
                let src_sum = sha256(&src_path).map_err(|err| {
                    Failure::new(format!("Could not read content of source {src_path:?}"), err)
                })?;
                let dst_sum = sha256(&dst_path).map_err(|err| {
                    Failure::new(
                        format!("Could not read content of destination {dst_path:?}"),
                        err,
                    )
                })?;
                if src_sum != dst_sum {
                    return Err(Failure::conflict(format!(
                        "Source {src_path:?} and destination {dst_path:?} are different"
                    )));
                }
                fs::remove_file(&src_path).map_err(|err| {
                    Failure::new(format!("Could not remove source {src_path:?}"), err)
                })?;
            }
        }
    }

    fs::remove_dir(src).map_err(|err| Failure::new(format!("Could not remove source {src:?}"), err))
}

struct MergeDirs {
    source: String,
    destination: String,
    owner: String,
    variables: VariableCell,
    reporter: Reporter,
    host: Host,
    slot: WatchSlot,
    applying: Applying,
}

impl MergeDirs {
    fn new(ctx: CommandContext) -> Self {
        Self {
            source: ctx.params.string("source").to_string(),
            destination: ctx.params.string("destination").to_string(),
            owner: ctx.params.string("owner").to_string(),
            variables: VariableCell::new(ctx.variables),
            reporter: ctx.reporter,
            host: ctx.host,
            slot: WatchSlot::default(),
            applying: Applying::default(),
        }
    }

    fn paths(&self, variables: &Variables) -> (PathBuf, PathBuf) {
        (
            resolve_path(&self.source, variables),
            resolve_path(&self.destination, variables),
        )
    }

    fn fail(&self, failure: Failure) -> bool {
        self.reporter.report(Status::Failed, failure.info, failure.detail);
        false
    }

    /// Create `destination` if needed and hand it to the owner.
    async fn ensure_destination(&self, destination: &Path, owner: &str) -> Result<bool, Failure> {
        match tokio::fs::metadata(destination).await {
            Ok(meta) if meta.is_dir() => Ok(false),
            Ok(_) => Err(Failure::conflict(format!(
                "Destination {destination:?} is not a directory"
            ))),
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                tokio::fs::create_dir_all(destination).await.map_err(|err| {
                    Failure::new(format!("Could not create destination {destination:?}"), err)
                })?;
                self.chown(destination, owner)?;
                Ok(true)
            }
            Err(err) => Err(Failure::new(
                format!("Could not check status of {destination:?}"),
                err,
            )),
        }
    }

    fn chown(&self, path: &Path, owner: &str) -> Result<(), Failure> {
        self.host.users.chown(path, owner).map_err(|err| {
            Failure::new(
                format!("Could not change ownership of destination {path:?}"),
                err,
            )
        })
    }
}

#[async_trait]
impl Command for MergeDirs {
    fn watch(self: Arc<Self>) {
        let (source, destination) = self.paths(&self.variables.snapshot());
        let (mut src_rx, src_unsub) = self.host.files.subscribe(&source);
        let (mut dst_rx, dst_unsub) = self.host.files.subscribe(&destination);
        let cancel = self.slot.start(vec![src_unsub, dst_unsub]);

        tokio::spawn(async move {
            let mut src = None;
            let mut dst = None;
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    status = src_rx.recv() => match status {
                        Some(status) => src = Some(status),
                        None => break,
                    },
                    status = dst_rx.recv() => match status {
                        Some(status) => dst = Some(status),
                        None => break,
                    },
                }
                if self.applying.is_set() {
                    continue;
                }
                if let (Some(src), Some(dst)) = (src, dst) {
                    let (status, info, table) = evaluate(&source, src, &destination, dst);
                    self.reporter.report(status, info, Some(Detail::Table(table)));
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
        let (source, destination) = self.paths(&variables);
        let owner = variables.replace(&self.owner);
        for path in [&source, &destination] {
            if let Err(err) = checked_path(path) {
                self.reporter.report(
                    Status::Failed,
                    format!("Cannot merge into {path:?}"),
                    Some(Detail::error(err)),
                );
                return false;
            }
        }

        match tokio::fs::metadata(&source).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => {
                return self.fail(Failure::conflict(format!(
                    "Source {source:?} is not a directory"
                )));
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                let info = match self.ensure_destination(&destination, &owner).await {
                    Ok(true) => format!(
                        "{destination:?} directory created, and {source:?} does not exist, \
                         nothing to merge"
                    ),
                    Ok(false) => {
                        format!("{source:?} does not exist, nothing to merge into {destination:?}")
                    }
                    Err(failure) => return self.fail(failure),
                };
                self.reporter.report(Status::Applied, info, None);
                return true;
            }
            Err(err) => {
                return self.fail(Failure::new(
                    format!("Could not check status of source {source:?}"),
                    err,
                ));
            }
        }

        if let Err(failure) = self.ensure_destination(&destination, &owner).await {
            return self.fail(failure);
        }

        let (src, dst) = (source.clone(), destination.clone());
        let merged = match tokio::task::spawn_blocking(move || merge_dir(&src, &dst)).await {
            Ok(merged) => merged,
            Err(err) => Err(Failure::new(format!("Could not merge {source:?}"), err)),
        };
        if let Err(failure) = merged {
            return self.fail(failure);
        }

        log::info!("merged {} into {}", source.display(), destination.display());
        self.reporter.report(
            Status::Applied,
            format!("{source:?} merged into destination {destination:?}"),
            None,
        );
        true
    }

    fn update_variables(&self, variables: &Variables) -> bool {
        self.variables.update(variables)
    }

    fn rewatch_on_variables(&self) -> bool {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::{Recorder, context, host};
    use super::*;
    use serde_json::json;

    #[test]
    fn test_evaluate_priorities() {
        let (src, dst) = (Path::new("/s"), Path::new("/d"));
        let cases = [
            (
                FileStatus::File,
                FileStatus::File,
                Status::Failed,
                "destination \"/d\" is not a directory",
            ),
            (
                FileStatus::File,
                FileStatus::Unknown,
                Status::Failed,
                "source \"/s\" is not a directory",
            ),
            (
                FileStatus::Unknown,
                FileStatus::Unknown,
                Status::Unknown,
                "destination \"/d\" status unknown",
            ),
            (
                FileStatus::Unknown,
                FileStatus::Directory,
                Status::Unknown,
                "source \"/s\" status unknown",
            ),
            (
                FileStatus::Directory,
                FileStatus::Directory,
                Status::Todo,
                "Need to merge source \"/s\" into destination \"/d\"",
            ),
            (
                FileStatus::Directory,
                FileStatus::NotFound,
                Status::Todo,
                "Need to move source \"/s\" to destination \"/d\"",
            ),
            (
                FileStatus::NotFound,
                FileStatus::NotFound,
                Status::Todo,
                "Need to create \"/d\"",
            ),
            (
                FileStatus::NotFound,
                FileStatus::Directory,
                Status::Applied,
                "destination \"/d\" exists",
            ),
        ];
        for (s, d, status, info) in cases {
            let (got, text, table) = evaluate(src, s, dst, d);
            assert_eq!((got, text.as_str()), (status, info), "{s:?}/{d:?}");
            assert_eq!(table.rows.len(), 2);
        }
    }

    fn tree(root: &Path, files: &[(&str, &str)]) {
        for (name, content) in files {
            let path = root.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
    }

    fn command(dir: &Path, recorder: &Recorder) -> MergeDirs {
        let host = host(dir);
        MergeDirs::new(context(
            &host,
            PARAMS,
            json!({
                "source": dir.join("src").display().to_string(),
                "destination": dir.join("dst").display().to_string(),
                "owner": "me",
            }),
            recorder.reporter.clone(),
        ))
    }

    #[tokio::test]
    async fn test_merge_moves_new_entries_and_drops_duplicates() {
        let dir = tempfile::tempdir().unwrap();
        tree(
            &dir.path().join("src"),
            &[("same", "x"), ("new", "n"), ("sub/deep/f", "d"), ("both/a", "a")],
        );
        tree(&dir.path().join("dst"), &[("same", "x"), ("both/b", "b")]);
        let recorder = Recorder::new();

        assert!(command(dir.path(), &recorder).apply().await);
        let dst = dir.path().join("dst");
        let expected = [
            ("same", "x"),
            ("new", "n"),
            ("sub/deep/f", "d"),
            ("both/a", "a"),
            ("both/b", "b"),
        ];
        for (name, content) in expected {
            assert_eq!(fs::read_to_string(dst.join(name)).unwrap(), content, "{name}");
        }
        assert!(!dir.path().join("src").exists());
        assert!(recorder.last().unwrap().info.contains("merged into destination"));
    }

    #[tokio::test]
    async fn test_conflicting_files_stop_the_merge() {
        let dir = tempfile::tempdir().unwrap();
        tree(&dir.path().join("src"), &[("f", "mine")]);
        tree(&dir.path().join("dst"), &[("f", "theirs")]);
        let recorder = Recorder::new();

        assert!(!command(dir.path(), &recorder).apply().await);
        let failed = recorder.last().unwrap();
        assert_eq!(failed.status, Status::Failed);
        assert!(failed.info.ends_with("are different"));
        assert_eq!(fs::read_to_string(dir.path().join("src/f")).unwrap(), "mine");
    }

    #[tokio::test]
    async fn test_missing_source_creates_destination() {
        let dir = tempfile::tempdir().unwrap();
        let recorder = Recorder::new();
        let cmd = command(dir.path(), &recorder);

        assert!(cmd.apply().await);
        assert!(dir.path().join("dst").is_dir());
        assert!(recorder.last().unwrap().info.contains("nothing to merge"));
        assert!(cmd.apply().await);
        assert!(recorder.last().unwrap().info.contains("does not exist, nothing to merge into"));
    }

    #[tokio::test]
    async fn test_watch_reports_both_sides() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("src")).unwrap();
        let recorder = Recorder::new();
        let cmd = Arc::new(command(dir.path(), &recorder));
        cmd.clone().watch();

        let todo = recorder.wait_for(|u| u.status == Status::Todo).await;
        assert!(todo.info.starts_with("Need to move source"));
        let Some(Detail::Table(table)) = todo.detail else {
            panic!("expected a table");
        };
        assert_eq!(table.rows[0][1], Cell::new(Status::Todo, "To merge"));
        assert_eq!(table.rows[1][1], Cell::new(Status::Applied, "To create"));
        cmd.stop();
    }
}

//! `apt install` and `apt remove`: keep a package list installed or absent.

use super::params::{ParamDesc, ParamType};
use super::{Applying, Command, CommandContext, CommandKind, VariableCell, WatchSlot};
use crate::exec::Messages;
use crate::host::Host;
use crate::packages::InstalledPackage;
use crate::status::{Cell, Detail, Reporter, Status, Table};
use crate::variables::Variables;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;

const INSTALL_PARAMS: &[ParamDesc] = &[ParamDesc::new(
    "packages",
    "Packages to install",
    ParamType::StringList,
)];

const REMOVE_PARAMS: &[ParamDesc] = &[
    ParamDesc::new("packages", "Packages to remove", ParamType::StringList),
    ParamDesc::new("purge", "Also remove configuration files", ParamType::Bool),
];

pub(super) fn kinds() -> Vec<CommandKind> {
    vec![
        CommandKind::new(
            "apt install",
            "packages",
            "Install packages using apt",
            INSTALL_PARAMS,
            |ctx| Arc::new(AptPackages::new(Mode::Install, ctx)),
        ),
        CommandKind::new(
            "apt remove",
            "packages",
            "Remove packages using apt",
            REMOVE_PARAMS,
            |ctx| {
                let purge = ctx.params.bool("purge");
                Arc::new(AptPackages::new(Mode::Remove { purge }, ctx))
            },
        ),
    ]
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Mode {
    Install,
    Remove { purge: bool },
}

impl Mode {
    fn apt_command(self) -> &'static str {
        match self {
            Self::Install => "install",
            Self::Remove { purge: true } => "purge",
            Self::Remove { purge: false } => "remove",
        }
    }

    fn messages(self, pending: &str) -> Messages {
        match self {
            Self::Install => Messages::new(
                format!("Installing {pending}"),
                format!("Successfully installed {pending}"),
                format!("Failed installing {pending}"),
            ),
            Self::Remove { .. } => Messages::new(
                format!("Removing {pending}"),
                format!("Successfully removed {pending}"),
                format!("Failed removing {pending}"),
            ),
        }
    }
}

/// Outcome of comparing the wanted list with dpkg.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct Evaluation {
    pub status: Status,
    pub info: String,
    pub table: Table,
    pub pending: Vec<String>,
}

pub(crate) fn evaluate(
    mode: Mode,
    packages: &[String],
    installed: &BTreeMap<String, InstalledPackage>,
) -> Evaluation {
    let packages: Vec<&String> = packages.iter().filter(|p| !p.is_empty()).collect();
    let mut table = Table::with_header(["Package", "Status", "Version"]);
    let mut pending = Vec::new();

    for &name in &packages {
        let known = installed.get(name);
        let is_installed = known.is_some_and(|p| p.installed);
        let version = known.map(|p| p.version.clone()).unwrap_or_default();
        let state = match (mode, is_installed) {
            (Mode::Install, true) => Cell::new(Status::Applied, "installed"),
            (Mode::Install, false) => {
                pending.push(name.clone());
                Cell::new(Status::Todo, "not installed")
            }
            (Mode::Remove { .. }, true) => {
                pending.push(name.clone());
                Cell::new(Status::Todo, "installed")
            }
            (Mode::Remove { .. }, false) => Cell::new(Status::Applied, "not installed"),
        };
        table.push_row(vec![Cell::plain(name.as_str()), state, Cell::plain(version)]);
    }

    let names = packages.iter().map(|p| p.as_str()).collect::<Vec<_>>().join(", ");
    let done = match mode {
        Mode::Install => "installed",
        Mode::Remove { .. } => "removed",
    };
    let verb = match mode {
        Mode::Install => "install",
        Mode::Remove { .. } => "remove",
    };
    let (status, info) = if !pending.is_empty() {
        (
            Status::Applied.if_higher_priority(Status::Todo),
            format!("Need to {verb} {}", pending.join(", ")),
        )
    } else if packages.is_empty() {
        (Status::Applied, format!("Nothing to {verb}"))
    } else if packages.len() == 1 {
        (Status::Applied, format!("Package {names} {done}"))
    } else {
        (Status::Applied, format!("Packages {names} {done}"))
    };

    Evaluation {
        status,
        info,
        table,
        pending,
    }
}

struct AptPackages {
    mode: Mode,
    packages: Vec<String>,
    variables: VariableCell,
    reporter: Reporter,
    host: Host,
    slot: WatchSlot,
    applying: Applying,
}

impl AptPackages {
    fn new(mode: Mode, ctx: CommandContext) -> Self {
        Self {
            mode,
            packages: ctx.params.list("packages").to_vec(),
            variables: VariableCell::new(ctx.variables),
            reporter: ctx.reporter,
            host: ctx.host,
            slot: WatchSlot::default(),
            applying: Applying::default(),
        }
    }

    fn evaluate(&self, installed: &BTreeMap<String, InstalledPackage>) -> Evaluation {
        let packages = self.variables.snapshot().replace_all(&self.packages);
        evaluate(self.mode, &packages, installed)
    }

    fn observe(&self, installed: &BTreeMap<String, InstalledPackage>) {
        let evaluation = self.evaluate(installed);
        if !self.applying.is_set() {
            self.reporter.report(
                evaluation.status,
                evaluation.info,
                Some(Detail::Table(evaluation.table)),
            );
        }
    }
}

#[async_trait]
impl Command for AptPackages {
    fn watch(self: Arc<Self>) {
        let (mut installed, unsubscribe) = self.host.dpkg.subscribe();
        let cancel = self.slot.start(vec![unsubscribe]);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    set = installed.recv() => match set {
                        Some(set) => self.observe(&set),
                        None => break,
                    },
                }
            }
        });
    }

    fn stop(&self) {
        self.slot.stop();
    }

    async fn apply(&self) -> bool {
        let applying = self.applying.begin();
        let evaluation = match self.host.dpkg.snapshot().await {
            Ok(installed) => self.evaluate(&installed),
            Err(err) => {
                self.reporter.report(
                    Status::Failed,
                    "Could not read the dpkg database",
                    Some(Detail::error(err)),
                );
                return false;
            }
        };

        if evaluation.pending.is_empty() {
            self.reporter.report(Status::Applied, evaluation.info, None);
            return true;
        }

        let pending = evaluation.pending;
        let messages = self.mode.messages(&pending.join(", "));
        let ok = self
            .host
            .exec
            .apt_get(&messages, &self.reporter, self.mode.apt_command(), &pending)
            .await;
        drop(applying);
        // The dpkg watcher reports the converged state after its rescan.
        ok
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
    use super::super::testing::{Recorder, context, host_with_tools, script};
    use super::*;
    use crate::exec::Tools;
    use serde_json::json;

    fn installed(entries: &[(&str, bool, &str)]) -> BTreeMap<String, InstalledPackage> {
        entries
            .iter()
            .map(|(name, installed, version)| {
                (
                    (*name).to_string(),
                    InstalledPackage {
                        installed: *installed,
                        version: (*version).to_string(),
                    },
                )
            })
            .collect()
    }

    fn names(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_install_needs_missing_packages() {
        let state = installed(&[("foo", true, "1.0"), ("baz", false, "0.1")]);
        let eval = evaluate(Mode::Install, &names(&["foo", "bar", "baz", ""]), &state);
        assert_eq!(eval.status, Status::Todo);
        assert_eq!(eval.info, "Need to install bar, baz");
        assert_eq!(eval.pending, names(&["bar", "baz"]));
        assert_eq!(eval.table.rows.len(), 3);
        assert_eq!(eval.table.rows[0][1], Cell::new(Status::Applied, "installed"));
        assert_eq!(eval.table.rows[0][2], Cell::plain("1.0"));
        assert_eq!(eval.table.rows[1][2], Cell::plain(""));
        assert_eq!(eval.table.rows[2][2], Cell::plain("0.1"));
    }

    #[test]
    fn test_install_satisfied() {
        let state = installed(&[("foo", true, "1.0"), ("bar", true, "2.0")]);
        let eval = evaluate(Mode::Install, &names(&["foo"]), &state);
        assert_eq!((eval.status, eval.info.as_str()), (Status::Applied, "Package foo installed"));
        let eval = evaluate(Mode::Install, &names(&["foo", "bar"]), &state);
        assert_eq!(eval.info, "Packages foo, bar installed");
    }

    #[test]
    fn test_remove_mirrors_install() {
        let state = installed(&[("foo", true, "1.0"), ("old", false, "0.9")]);
        let eval = evaluate(Mode::Remove { purge: false }, &names(&["foo", "old", "gone"]), &state);
        assert_eq!(eval.status, Status::Todo);
        assert_eq!(eval.info, "Need to remove foo");
        assert_eq!(eval.table.rows[1][1], Cell::new(Status::Applied, "not installed"));

        let eval = evaluate(Mode::Remove { purge: true }, &names(&["old"]), &state);
        assert_eq!(eval.info, "Package old removed");
        let eval = evaluate(Mode::Remove { purge: true }, &[], &state);
        assert_eq!((eval.status, eval.info.as_str()), (Status::Applied, "Nothing to remove"));
        assert_eq!(Mode::Remove { purge: true }.apt_command(), "purge");
    }

    #[tokio::test]
    async fn test_converges_after_install() {
        let dir = tempfile::tempdir().unwrap();
        let status = dir.path().join("dpkg-status");
        std::fs::write(
            &status,
            "Package: foo\nStatus: install ok installed\nVersion: 1\n",
        )
        .unwrap();
        let apt_get = script(
            dir.path(),
            "apt-get",
            &format!(
                "printf 'Package: foo\\nStatus: install ok installed\\nVersion: 1\\n\\n\
                 Package: bar\\nStatus: install ok installed\\nVersion: 2\\n' > {0}.new\n\
                 mv {0}.new {0}\necho installed",
                status.display()
            ),
        );
        let host = host_with_tools(
            dir.path(),
            Tools {
                apt_get,
                apt_cache: "apt-cache".into(),
            },
        );
        let recorder = Recorder::new();
        let ctx = context(
            &host,
            INSTALL_PARAMS,
            json!({"packages": ["foo", "bar"]}),
            recorder.reporter.clone(),
        );
        let command = AptPackages::new(Mode::Install, ctx);
        let command: Arc<dyn Command> = Arc::new(command);
        command.clone().watch();

        let todo = recorder.wait_for(|u| u.status == Status::Todo).await;
        assert_eq!(todo.info, "Need to install bar");

        assert!(command.apply().await);
        let applied = recorder
            .wait_for(|u| u.info == "Packages foo, bar installed")
            .await;
        assert_eq!(applied.status, Status::Applied);
        assert_no_todo_after(&recorder.all(), "Successfully installed bar");
        command.stop();
    }

    fn assert_no_todo_after(updates: &[crate::status::StatusUpdate], success: &str) {
        let at = updates
            .iter()
            .position(|u| u.info == success)
            .unwrap_or_else(|| panic!("no {success:?} in {updates:?}"));
        let stale: Vec<_> = updates[at..].iter().filter(|u| u.status == Status::Todo).collect();
        assert!(stale.is_empty(), "Todo reported after success: {stale:?}");
    }

    #[tokio::test]
    async fn test_remove_reports_no_stale_todo() {
        let dir = tempfile::tempdir().unwrap();
        let status = dir.path().join("dpkg-status");
        std::fs::write(
            &status,
            "Package: foo\nStatus: install ok installed\nVersion: 1\n\n\
             Package: old\nStatus: install ok installed\nVersion: 3\n",
        )
        .unwrap();
        let apt_get = script(
            dir.path(),
            "apt-get",
            &format!(
                "printf 'Package: foo\\nStatus: install ok installed\\nVersion: 1\\n' > {0}.new\n\
                 mv {0}.new {0}\necho removed",
                status.display()
            ),
        );
        let host = host_with_tools(
            dir.path(),
            Tools {
                apt_get,
                apt_cache: "apt-cache".into(),
            },
        );
        let recorder = Recorder::new();
        let ctx = context(
            &host,
            REMOVE_PARAMS,
            json!({"packages": ["old"]}),
            recorder.reporter.clone(),
        );
        let command: Arc<dyn Command> =
            Arc::new(AptPackages::new(Mode::Remove { purge: false }, ctx));
        command.clone().watch();

        let todo = recorder.wait_for(|u| u.status == Status::Todo).await;
        assert_eq!(todo.info, "Need to remove old");

        assert!(command.apply().await);
        recorder.wait_for(|u| u.info == "Package old removed").await;
        assert_no_todo_after(&recorder.all(), "Successfully removed old");
        command.stop();
    }

    #[tokio::test]
    async fn test_apply_with_nothing_pending_succeeds() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("dpkg-status"),
            "Package: foo\nStatus: install ok installed\nVersion: 1\n",
        )
        .unwrap();
        let host = host_with_tools(dir.path(), Tools::default());
        let recorder = Recorder::new();
        let ctx = context(
            &host,
            REMOVE_PARAMS,
            json!({"packages": ["bar"]}),
            recorder.reporter.clone(),
        );
        let command = AptPackages::new(Mode::Remove { purge: false }, ctx);
        assert!(command.apply().await);
        let last = recorder.last().unwrap();
        assert_eq!(last.status, Status::Applied);
        assert_eq!(last.info, "Package bar removed");
    }
}

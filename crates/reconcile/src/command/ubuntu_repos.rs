//! Ubuntu-specific apt configuration: base repositories and the periodic
//! apt jobs.

use super::file_content::{FileContent, Target};
use super::params::{ParamDesc, ParamType};
use super::{Command, CommandContext, CommandKind, FileWatcherCommand};
use crate::exec::Messages;
use crate::host::{Host, HostPaths};
use crate::status::Reporter;
use crate::variables::Variables;
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

const APT_NO_UPDATES: &str = "# Placed by holdfast
APT::Periodic::Update-Package-Lists \"0\";
APT::Periodic::Download-Upgradeable-Packages \"0\";
APT::Periodic::AutocleanInterval \"0\";
";

const SOURCES: &str = "# Sources from holdfast
deb <mirror> <oscodename> main restricted universe multiverse
deb <mirror> <oscodename>-updates main restricted universe multiverse
deb <mirror> <oscodename>-backports main restricted universe multiverse
deb http://security.ubuntu.com/ubuntu/ <oscodename>-security main restricted universe multiverse
";

const REPOS_PARAMS: &[ParamDesc] = &[ParamDesc::new(
    "mirror",
    "Ubuntu mirror URL",
    ParamType::String,
)];

fn apt_periodic(paths: &HostPaths) -> &Path {
    &paths.apt_periodic
}

fn sources_list(paths: &HostPaths) -> &Path {
    &paths.sources_list
}

pub(super) fn kinds() -> Vec<CommandKind> {
    vec![
        CommandKind::new(
            "apt no updates",
            "ubuntu",
            "Disable periodic apt update, upgrade, autoclean",
            &[],
            |ctx| {
                let check = FileContent::new(Target::Host(apt_periodic), APT_NO_UPDATES, "root");
                FileWatcherCommand::boxed(check, ctx)
            },
        ),
        CommandKind::new(
            "ubuntu repos",
            "ubuntu",
            "Enable base Ubuntu repositories",
            REPOS_PARAMS,
            |ctx| Arc::new(UbuntuRepos::new(ctx)),
        ),
    ]
}

/// sources.list content followed by a package lists refresh.
struct UbuntuRepos {
    mirror: String,
    reporter: Reporter,
    host: Host,
    sources: Arc<FileWatcherCommand<FileContent>>,
}

impl UbuntuRepos {
    fn new(ctx: CommandContext) -> Self {
        let mirror = ctx.params.string("mirror").to_string();
        let reporter = ctx.reporter.clone();
        let host = ctx.host.clone();
        let variables = with_mirror(&ctx.variables, &mirror);
        let check = FileContent::new(Target::Host(sources_list), SOURCES, "root");
        let sources = Arc::new(FileWatcherCommand::new(check, CommandContext { variables, ..ctx }));
        Self {
            mirror,
            reporter,
            host,
            sources,
        }
    }
}

/// `variables` plus `<mirror>`
fn with_mirror(variables: &Variables, mirror: &str) -> Variables {
    let mut variables = variables.clone();
    let resolved = variables.replace(mirror);
    variables.define("mirror", resolved);
    variables
}

#[async_trait]
impl Command for UbuntuRepos {
    fn watch(self: Arc<Self>) {
        self.sources.clone().watch();
    }

    fn stop(&self) {
        self.sources.stop();
    }

    async fn apply(&self) -> bool {
        if !self.sources.apply().await {
            return false;
        }
        let mirror = &self.mirror;
        let messages = Messages::new(
            format!("Downloading packages list from mirror {mirror}"),
            format!("Successfully applied sources for mirror {mirror}"),
            format!("Failed downloading packages list from mirror {mirror}"),
        );
        self.host.exec.apt_get(&messages, &self.reporter, "update", &[]).await
    }

    fn update_variables(&self, variables: &Variables) -> bool {
        self.sources.update_variables(&with_mirror(variables, &self.mirror))
    }

    fn rewatch_on_variables(&self) -> bool {
        self.sources.rewatch_on_variables()
    }
}

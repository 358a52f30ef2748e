//! `apt upgrade`: keep every installed package at its candidate version.

use super::{Applying, Command, CommandContext, CommandKind, WatchSlot};
use crate::exec::Messages;
use crate::host::Host;
use crate::packages::AvailablePackage;
use crate::status::{Cell, Detail, Reporter, Status, Table};
use async_trait::async_trait;
use std::sync::Arc;

pub(super) fn kinds() -> Vec<CommandKind> {
    vec![CommandKind::new(
        "apt upgrade",
        "packages",
        "Upgrade packages from APT repositories",
        &[],
        |ctx| Arc::new(AptUpgrade::new(ctx)),
    )]
}

/// Status, info and table for an availability list.
pub(crate) fn evaluate(available: &[AvailablePackage]) -> (Status, &'static str, Table) {
    let mut table = Table::with_header(["Package", "Installed version", "Available version"]);
    for package in available.iter().filter(|p| p.upgradable()) {
        table.push_row(vec![
            Cell::plain(package.name.as_str()),
            Cell::plain(package.version.as_str()),
            Cell::plain(package.available_version.as_str()),
        ]);
    }
    if table.rows.is_empty() {
        (Status::Applied, "All packages up-to-date", table)
    } else {
        (Status::Todo, "Need to upgrade packages", table)
    }
}

struct AptUpgrade {
    reporter: Reporter,
    host: Host,
    slot: WatchSlot,
    applying: Applying,
}

impl AptUpgrade {
    fn new(ctx: CommandContext) -> Self {
        Self {
            reporter: ctx.reporter,
            host: ctx.host,
            slot: WatchSlot::default(),
            applying: Applying::default(),
        }
    }
}

#[async_trait]
impl Command for AptUpgrade {
    fn watch(self: Arc<Self>) {
        let (mut lists, unsubscribe) = self.host.apt_cache.subscribe();
        let cancel = self.slot.start(vec![unsubscribe]);
        tokio::spawn(async move {
            loop {
                let available = tokio::select! {
                    () = cancel.cancelled() => break,
                    list = lists.recv() => match list {
                        Some(list) => list,
                        None => break,
                    },
                };
                if self.applying.is_set() {
                    continue;
                }
                let (status, info, table) = evaluate(&available);
                self.reporter.report(status, info, Some(Detail::Table(table)));
            }
        });
    }

    fn stop(&self) {
        self.slot.stop();
    }

    async fn apply(&self) -> bool {
        let _applying = self.applying.begin();
        let messages = Messages::new(
            "Upgrading packages",
            "Successfully upgraded packages",
            "Failed upgrading packages",
        );
        self.host
            .exec
            .apt_get(&messages, &self.reporter, "upgrade", &[])
            .await
    }
}

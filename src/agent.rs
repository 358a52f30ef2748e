//! Engine wiring shared by the subcommands that observe the host.

use anyhow::{Context as _, Result};
use reconcile::{GlobalVariable, Host, Registry, Service, TreeContext, globals_snapshot};
use std::sync::Arc;

use crate::config::Config;
use crate::facts;
use crate::journal::FileJournal;
use crate::store::JsonFileStore;
use crate::transport::LogTransport;

pub struct Agent {
    pub service: Service,
    pub globals: Vec<GlobalVariable>,
    store: Arc<JsonFileStore>,
}

impl Agent {
    /// Build the host handles, load the tree and start watching it.
    pub async fn start(config: &Config) -> Result<Self> {
        let host = Host::new(config.host_config()).context("Could not set up host watchers")?;
        let globals = facts::gather(&config.tools.lsb_release).await;
        let store = Arc::new(JsonFileStore::new(&config.tree_path, config.save_debounce()));
        let ctx = TreeContext {
            registry: Arc::new(Registry::with_builtin()),
            host,
            globals: globals_snapshot(&globals),
            transport: Arc::new(LogTransport),
            journal: Arc::new(FileJournal::new(&config.journal_path)),
        };
        let service = Service::load(ctx, store.clone())
            .with_context(|| format!("Could not load tree from {}", config.tree_path.display()))?;
        service.watch_all();
        Ok(Self {
            service,
            globals,
            store,
        })
    }

    /// Stop every group and write any pending save.
    pub fn shutdown(&self) {
        self.service.stop_all();
        self.store.flush();
    }
}

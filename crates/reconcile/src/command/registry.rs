//! Catalog of command kinds.

use super::params::{ParamDesc, Params};
use super::{Command, CommandContext};
use crate::error::{Error, Result};
use crate::host::Host;
use crate::status::Reporter;
use crate::variables::Variables;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

pub type Constructor = Arc<dyn Fn(CommandContext) -> Arc<dyn Command> + Send + Sync>;

/// A named kind of command with its parameter schema.
#[derive(Clone)]
pub struct CommandKind {
    pub name: &'static str,
    pub icon: &'static str,
    pub description: &'static str,
    pub params: &'static [ParamDesc],
    constructor: Constructor,
}

impl CommandKind {
    pub fn new<F>(
        name: &'static str,
        icon: &'static str,
        description: &'static str,
        params: &'static [ParamDesc],
        constructor: F,
    ) -> Self
    where
        F: Fn(CommandContext) -> Arc<dyn Command> + Send + Sync + 'static,
    {
        Self {
            name,
            icon,
            description,
            params,
            constructor: Arc::new(constructor),
        }
    }

    pub fn describe(&self) -> Description {
        Description {
            name: self.name,
            icon: self.icon,
            description: self.description,
            parameters: self.params.to_vec(),
        }
    }
}

impl fmt::Debug for CommandKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandKind")
            .field("name", &self.name)
            .field("icon", &self.icon)
            .finish_non_exhaustive()
    }
}

/// Catalog entry as shown to operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Description {
    pub name: &'static str,
    pub icon: &'static str,
    pub description: &'static str,
    pub parameters: Vec<ParamDesc>,
}

/// A freshly built command and the parameters it was built from.
pub struct Built {
    pub command: Arc<dyn Command>,
    pub params: Params,
}

#[derive(Debug, Clone, Default)]
pub struct Registry {
    kinds: BTreeMap<&'static str, CommandKind>,
}

impl Registry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in kind.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        for kind in super::apt_packages::kinds()
            .into_iter()
            .chain(super::apt_upgrade::kinds())
            .chain(super::ubuntu_repos::kinds())
            .chain(super::file_content::kinds())
            .chain(super::file_make_dir::kinds())
            .chain(super::file_remove::kinds())
            .chain(super::xdg_user_dir::kinds())
            .chain(super::file_merge_dirs::kinds())
        {
            registry.register(kind);
        }
        registry
    }

    /// Add a kind, replacing any kind registered under the same name.
    pub fn register(&mut self, kind: CommandKind) {
        self.kinds.insert(kind.name, kind);
    }

    pub fn get(&self, name: &str) -> Option<&CommandKind> {
        self.kinds.get(name)
    }

    /// Catalog sorted by name
    pub fn descriptions(&self) -> Vec<Description> {
        self.kinds.values().map(CommandKind::describe).collect()
    }

    /// Coerce `raw` against the schema of `name` and build the command.
    pub fn init(
        &self,
        name: &str,
        raw: &Map<String, Value>,
        variables: Variables,
        reporter: Reporter,
        host: Host,
    ) -> Result<Built> {
        let kind = self
            .get(name)
            .ok_or_else(|| Error::UnknownCommand(name.to_string()))?;
        let params = Params::coerce(kind.params, raw);
        let command = (kind.constructor)(CommandContext {
            params: params.clone(),
            variables,
            reporter,
            host,
        });
        Ok(Built { command, params })
    }
}

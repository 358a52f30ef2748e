//! # Reconcile
//!
//! A reactive reconciliation engine for a single host.
//!
//! The engine continuously observes files and installed packages, reports
//! drift against a desired configuration, and converges the host only when
//! asked to.
//!
//! ## Core Concepts
//!
//! - **Status**: observed state of an instruction or a group
//! - **Command**: a live binding of one kind of desired state to the host
//! - **Instruction**: a command with its parameters and last observation
//! - **Group**: ordered instructions with an aggregated status; later
//!   instructions see the variables earlier ones produce
//! - **Service**: the tree of groups, its persistence and its edits
//!
//! ## Host handles
//!
//! Commands never touch the host directly for observation. They subscribe
//! to shared watchers bundled in [`Host`]:
//!
//! - [`FileWatcher`]: debounced per-path file state
//! - [`DpkgWatcher`]: the installed package set
//! - [`AptCacheWatcher`]: installable and upgradable packages
//! - [`Executor`]: serialized package tool runs with live output
//!
//! ## Collaborators
//!
//! The engine pushes updates outward through traits so that the transport,
//! the operator journal and tree storage stay outside of it:
//!
//! - [`Transport`]: live status events
//! - [`Journal`]: structured operator log
//! - [`TreeStore`]: load and save the tree

pub mod collab;
pub mod command;
pub mod error;
pub mod exec;
pub mod fanout;
pub mod files;
pub mod host;
pub mod packages;
pub mod status;
pub mod tree;
pub mod users;
pub mod variables;

// Re-export main types at crate root
pub use collab::{Event, Journal, LogEntry, Transport, TreeStore};
pub use command::{Command, CommandKind, Description, ParamDesc, ParamType, Params, Registry};
pub use error::{Error, Result};
pub use exec::{Executor, Messages, Tools};
pub use files::{FileStatus, FileWatcher, WatchTiming};
pub use host::{Host, HostConfig, HostPaths};
pub use packages::{AptCacheWatcher, DpkgWatcher};
pub use status::{Cell, Detail, Reporter, Status, StatusUpdate, Table, Terminal};
pub use tree::{
    GroupDescriptor, GroupSnapshot, InstructionDescriptor, InstructionSnapshot, Service,
    TreeContext,
};
pub use users::{User, Users};
pub use variables::{GlobalVariable, Variables, globals_snapshot};

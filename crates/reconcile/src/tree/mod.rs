//! The configuration tree: named groups of ordered instructions.
//!
//! A [`Service`] owns every [`Group`] built from the stored descriptors.
//! Each group binds its instructions to live commands, aggregates their
//! statuses and threads the variables they produce to later siblings.

mod group;
mod instruction;
mod service;

pub use group::{Group, GroupSnapshot};
pub use instruction::InstructionSnapshot;
pub use service::Service;

use crate::collab::{Journal, Transport};
use crate::command::Registry;
use crate::host::Host;
use crate::variables::Variables;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

/// Stored form of an instruction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct InstructionDescriptor {
    pub id: String,
    pub command: String,
    pub parameters: Map<String, Value>,
}

/// Stored form of a group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupDescriptor {
    pub id: String,
    pub name: String,
    pub instructions: Vec<InstructionDescriptor>,
}

impl GroupDescriptor {
    /// Give a fresh id to the group and every instruction lacking one.
    /// Returns whether anything was assigned.
    pub fn assign_ids(&mut self) -> bool {
        let mut assigned = false;
        if self.id.is_empty() {
            self.id = new_id();
            assigned = true;
        }
        for instruction in &mut self.instructions {
            if instruction.id.is_empty() {
                instruction.id = new_id();
                assigned = true;
            }
        }
        assigned
    }

    /// Group id followed by every instruction id
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.id.as_str()).chain(self.instructions.iter().map(|i| i.id.as_str()))
    }
}

fn new_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Everything a group needs to build and run its instructions.
#[derive(Clone)]
pub struct TreeContext {
    pub registry: Arc<Registry>,
    pub host: Host,
    /// Host-level variables every group starts from
    pub globals: Variables,
    pub transport: Arc<dyn Transport>,
    pub journal: Arc<dyn Journal>,
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_defaults_and_ids() {
        let raw = r#"{"name": "base", "instructions": [{"command": "file remove"}]}"#;
        let mut group: GroupDescriptor = serde_json::from_str(raw).unwrap();
        assert!(group.instructions[0].parameters.is_empty());
        assert!(group.assign_ids());
        assert_eq!(group.ids().count(), 2);
        assert!(group.ids().all(|id| id.len() == 36));
        assert!(!group.assign_ids());
    }
}

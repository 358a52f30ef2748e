//! Seams towards the collaborators living outside the engine: the
//! transport pushing live updates, the operator journal and tree storage.

use crate::error::Result;
use crate::status::{Detail, Status};
use crate::tree::GroupDescriptor;
use serde::Serialize;

/// Live update pushed to the transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    InstructionStatus {
        instruction: String,
        status: Status,
        info: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        detail: Option<Detail>,
    },
    GroupStatus {
        group: String,
        status: Status,
    },
    Log(LogEntry),
}

pub trait Transport: Send + Sync {
    fn emit(&self, event: Event);
}

/// Structured journal entry.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    #[serde(rename = "msg")]
    pub message: String,
    #[serde(rename = "ico", skip_serializing_if = "String::is_empty")]
    pub icon: String,
    #[serde(rename = "st", skip_serializing_if = "Option::is_none")]
    pub status: Option<Status>,
    #[serde(rename = "gid", skip_serializing_if = "String::is_empty")]
    pub group_id: String,
    #[serde(rename = "iid", skip_serializing_if = "String::is_empty")]
    pub instruction_id: String,
    #[serde(rename = "grp", skip_serializing_if = "String::is_empty")]
    pub group_name: String,
    #[serde(rename = "dtl", skip_serializing_if = "Option::is_none")]
    pub detail: Option<Detail>,
}

impl LogEntry {
    pub fn new(message: impl Into<String>, icon: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            icon: icon.into(),
            status: None,
            group_id: String::new(),
            instruction_id: String::new(),
            group_name: String::new(),
            detail: None,
        }
    }
}

pub trait Journal: Send + Sync {
    fn record(&self, entry: LogEntry);
}

/// Tree persistence. `save` may defer and coalesce writes.
pub trait TreeStore: Send + Sync {
    fn load(&self) -> Result<Vec<GroupDescriptor>>;
    fn save(&self, groups: Vec<GroupDescriptor>);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_entry_omits_empty_fields() {
        let entry = LogEntry::new("Added group \"base\"", "group");
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            serde_json::json!({"msg": "Added group \"base\"", "ico": "group"})
        );

        let entry = LogEntry {
            status: Some(Status::Failed),
            group_id: "g".into(),
            instruction_id: "i".into(),
            group_name: "base".into(),
            detail: Some(Detail::error("boom")),
            ..LogEntry::new("file content: broken", "file")
        };
        assert_eq!(
            serde_json::to_value(&entry).unwrap(),
            serde_json::json!({
                "msg": "file content: broken",
                "ico": "file",
                "st": "failed",
                "gid": "g",
                "iid": "i",
                "grp": "base",
                "dtl": {"t": "error", "d": "boom"}
            })
        );
    }

    #[test]
    fn test_event_shape() {
        let event = Event::GroupStatus {
            group: "g".into(),
            status: Status::Todo,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            serde_json::json!({"event": "group_status", "group": "g", "status": "todo"})
        );
    }
}

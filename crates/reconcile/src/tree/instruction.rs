use super::InstructionDescriptor;
use crate::collab::{Event, LogEntry};
use crate::command::Command;
use crate::fanout::lock;
use crate::status::{Detail, Status, StatusUpdate};
use crate::variables::Variables;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex};

/// Last observation of an instruction.
#[derive(Debug, Clone, PartialEq, Default)]
pub(crate) struct Observed {
    pub status: Status,
    pub info: String,
    pub detail: Option<Detail>,
    pub out_variables: Variables,
}

/// What an accepted update produced
pub(crate) struct Accepted {
    pub event: Event,
    /// Journal entry, when the transition is worth logging
    pub entry: Option<LogEntry>,
}

/// One desired-state statement bound to its command.
pub(crate) struct Instruction {
    pub id: String,
    pub kind: String,
    pub icon: &'static str,
    pub parameters: Map<String, Value>,
    pub command: Option<Arc<dyn Command>>,
    state: Mutex<Observed>,
}

impl Instruction {
    pub(crate) fn new(
        descriptor: &InstructionDescriptor,
        icon: &'static str,
        parameters: Map<String, Value>,
        command: Option<Arc<dyn Command>>,
    ) -> Self {
        Self {
            id: descriptor.id.clone(),
            kind: descriptor.command.clone(),
            icon,
            parameters,
            command,
            state: Mutex::new(Observed::default()),
        }
    }

    pub(crate) fn observed(&self) -> Observed {
        lock(&self.state).clone()
    }

    pub(crate) fn status(&self) -> Status {
        lock(&self.state).status
    }

    pub(crate) fn out_variables(&self) -> Variables {
        lock(&self.state).out_variables.clone()
    }

    /// Overwrite the observation without any emission.
    pub(crate) fn set(&self, status: Status, info: impl Into<String>, detail: Option<Detail>) {
        *lock(&self.state) = Observed {
            status,
            info: info.into(),
            detail,
            out_variables: Variables::new(),
        };
    }

    /// Apply the update rules to an observation from the command.
    ///
    /// The first observation is always stored. A repeated status is stored
    /// only if something else changed, and logged only if the info did. A
    /// Todo never overwrites a Failed. Every other transition is stored and
    /// logged.
    pub(crate) fn update(
        &self,
        update: StatusUpdate,
        group_id: &str,
        group_name: &str,
    ) -> Option<Accepted> {
        let mut state = lock(&self.state);
        let log = if state.status == Status::Unknown {
            false
        } else if update.status == state.status {
            if update.info != state.info {
                true
            } else if update.detail != state.detail || update.variables != state.out_variables {
                false
            } else {
                return None;
            }
        } else if update.status == Status::Todo && state.status == Status::Failed {
            return None;
        } else {
            true
        };

        let entry = log.then(|| LogEntry {
            status: Some(update.status),
            group_id: group_id.to_string(),
            instruction_id: self.id.clone(),
            group_name: group_name.to_string(),
            detail: update.detail.clone(),
            ..LogEntry::new(format!("{}: {}", self.kind, update.info), self.icon)
        });
        let event = Event::InstructionStatus {
            instruction: self.id.clone(),
            status: update.status,
            info: update.info.clone(),
            detail: update.detail.clone(),
        };
        *state = Observed {
            status: update.status,
            info: update.info,
            detail: update.detail,
            out_variables: update.variables,
        };
        Some(Accepted { event, entry })
    }

    /// Forget the last observation before watching again. Returns false
    /// for an instruction without a command, which keeps its failure.
    pub(crate) fn reset(&self) -> bool {
        if self.command.is_none() {
            return false;
        }
        self.set(Status::Unknown, "Checking...", None);
        true
    }

    pub(crate) fn watch(&self) {
        if let Some(command) = &self.command {
            command.clone().watch();
        }
    }

    pub(crate) fn stop(&self) {
        if let Some(command) = &self.command {
            command.stop();
        }
    }

    /// Converge. An instruction already applied succeeds at once; one
    /// without a command always fails.
    pub(crate) async fn apply(&self) -> bool {
        if self.status() == Status::Applied {
            return true;
        }
        match &self.command {
            Some(command) => command.apply().await,
            None => false,
        }
    }

    pub(crate) fn descriptor(&self) -> InstructionDescriptor {
        InstructionDescriptor {
            id: self.id.clone(),
            command: self.kind.clone(),
            parameters: self.parameters.clone(),
        }
    }

    pub(crate) fn snapshot(&self) -> InstructionSnapshot {
        let state = self.observed();
        InstructionSnapshot {
            id: self.id.clone(),
            command: self.kind.clone(),
            parameters: self.parameters.clone(),
            status: state.status,
            info: state.info,
            detail: state.detail,
        }
    }
}

/// Instruction as shown to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstructionSnapshot {
    pub id: String,
    pub command: String,
    pub parameters: Map<String, Value>,
    pub status: Status,
    pub info: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<Detail>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn instruction() -> Instruction {
        let descriptor = InstructionDescriptor {
            id: "i1".into(),
            command: "file content".into(),
            parameters: Map::new(),
        };
        Instruction::new(&descriptor, "file", Map::new(), None)
    }

    fn update(status: Status, info: &str) -> StatusUpdate {
        StatusUpdate {
            status,
            info: info.into(),
            detail: None,
            variables: Variables::new(),
        }
    }

    #[test]
    fn test_first_observation_is_stored_without_log() {
        let ins = instruction();
        let accepted = ins.update(update(Status::Todo, "Need to create"), "g", "base").unwrap();
        assert!(accepted.entry.is_none());
        assert_eq!(ins.status(), Status::Todo);
    }

    #[test]
    fn test_same_status_only_emits_on_change() {
        let ins = instruction();
        ins.update(update(Status::Applied, "ok"), "g", "base");

        assert!(ins.update(update(Status::Applied, "ok"), "g", "base").is_none());

        let with_detail = StatusUpdate {
            detail: Some(Detail::text("content")),
            ..update(Status::Applied, "ok")
        };
        let accepted = ins.update(with_detail, "g", "base").unwrap();
        assert!(accepted.entry.is_none());

        let accepted = ins.update(update(Status::Applied, "still ok"), "g", "base").unwrap();
        let entry = accepted.entry.unwrap();
        assert_eq!(entry.message, "file content: still ok");
        assert_eq!(entry.icon, "file");
        assert_eq!(entry.group_name, "base");

        let mut vars = Variables::new();
        vars.define("xdgdesktop", "/home/ada/Desktop");
        let with_vars = StatusUpdate {
            variables: vars.clone(),
            ..update(Status::Applied, "still ok")
        };
        assert!(ins.update(with_vars, "g", "base").is_some());
        assert_eq!(ins.out_variables(), vars);
    }

    #[test]
    fn test_todo_does_not_erase_failure() {
        let ins = instruction();
        ins.update(update(Status::Todo, "drift"), "g", "base");
        assert!(ins.update(update(Status::Failed, "write failed"), "g", "base").is_some());
        assert!(ins.update(update(Status::Todo, "drift"), "g", "base").is_none());
        assert_eq!(ins.status(), Status::Failed);

        let accepted = ins.update(update(Status::Applied, "fixed"), "g", "base").unwrap();
        assert!(accepted.entry.is_some());
        assert_eq!(ins.status(), Status::Applied);
    }

    #[test]
    fn test_transitions_are_logged() {
        let ins = instruction();
        ins.update(update(Status::Todo, "drift"), "g", "base");
        for status in [Status::Running, Status::None, Status::Failed, Status::Applied] {
            let accepted = ins.update(update(status, "x"), "g", "base").unwrap();
            assert_eq!(accepted.entry.unwrap().status, Some(status));
        }
    }

    #[test]
    fn test_concurrent_updates_emit_their_own_values() {
        let ins = instruction();
        ins.update(update(Status::Todo, "drift"), "g", "base");
        std::thread::scope(|scope| {
            for worker in 0..8 {
                let ins = &ins;
                scope.spawn(move || {
                    for round in 0..200 {
                        let info = format!("{worker}-{round}");
                        let status = if round % 2 == 0 { Status::Running } else { Status::Applied };
                        let Some(accepted) = ins.update(update(status, &info), "g", "base") else {
                            continue;
                        };
                        let Event::InstructionStatus { status: sent, info: sent_info, .. } =
                            accepted.event
                        else {
                            panic!("unexpected event");
                        };
                        assert_eq!((sent, sent_info.as_str()), (status, info.as_str()));
                        if let Some(entry) = accepted.entry {
                            assert_eq!(entry.message, format!("file content: {info}"));
                        }
                    }
                });
            }
        });
    }

    #[tokio::test]
    async fn test_apply_without_command_fails() {
        let ins = instruction();
        assert!(!ins.apply().await);
        ins.set(Status::Applied, "ok", None);
        assert!(ins.apply().await);
    }
}

use super::instruction::{Instruction, InstructionSnapshot};
use super::{GroupDescriptor, InstructionDescriptor, TreeContext};
use crate::collab::{Event, LogEntry};
use crate::fanout::lock;
use crate::status::{Detail, Reporter, Status, StatusUpdate};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};

/// Ordered instructions sharing one aggregated status.
pub struct Group {
    id: String,
    name: String,
    instructions: Vec<Instruction>,
    status: Mutex<Status>,
    /// Serializes status aggregation and variable threading
    recompute: Mutex<()>,
    watching: AtomicBool,
    /// Set once the group left the tree; late reports are dropped
    retired: AtomicBool,
    ctx: TreeContext,
}

impl Group {
    /// Bind every instruction to a command built from the registry.
    ///
    /// Instructions naming an unknown kind are kept without a command and
    /// show as Failed.
    pub(crate) fn build(descriptor: &GroupDescriptor, ctx: &TreeContext) -> Arc<Self> {
        Arc::new_cyclic(|weak: &Weak<Self>| {
            let instructions = descriptor
                .instructions
                .iter()
                .enumerate()
                .map(|(idx, instruction)| {
                    let weak = weak.clone();
                    let reporter = Reporter::new(move |update| {
                        if let Some(group) = weak.upgrade() {
                            group.on_update(idx, update);
                        }
                    });
                    bind(instruction, reporter, descriptor, ctx)
                })
                .collect();
            Self {
                id: descriptor.id.clone(),
                name: descriptor.name.clone(),
                instructions,
                status: Mutex::new(Status::Unknown),
                recompute: Mutex::new(()),
                watching: AtomicBool::new(false),
                retired: AtomicBool::new(false),
                ctx: ctx.clone(),
            }
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn status(&self) -> Status {
        *lock(&self.status)
    }

    pub(crate) fn contains(&self, instruction_id: &str) -> bool {
        self.instructions.iter().any(|i| i.id == instruction_id)
    }

    /// Start observing every instruction.
    pub fn watch(&self) {
        self.watching.store(false, Ordering::SeqCst);
        for instruction in &self.instructions {
            instruction.stop();
            if instruction.reset() {
                self.emit_instruction(instruction);
            }
        }
        self.refresh();
        self.watching.store(true, Ordering::SeqCst);
        for instruction in &self.instructions {
            instruction.watch();
        }
    }

    pub fn stop(&self) {
        self.watching.store(false, Ordering::SeqCst);
        for instruction in &self.instructions {
            instruction.stop();
        }
    }

    /// Stop for good. Reports still in flight are ignored afterwards.
    pub(crate) fn retire(&self) {
        self.retired.store(true, Ordering::SeqCst);
        self.stop();
    }

    /// Apply instructions in order, skipping those already applied and
    /// stopping at the first failure.
    pub async fn apply(&self) -> bool {
        for instruction in &self.instructions {
            if instruction.status() == Status::Applied {
                continue;
            }
            if !instruction.apply().await {
                log::warn!("group {:?} stopped at instruction {}", self.name, instruction.id);
                return false;
            }
        }
        true
    }

    /// Apply one instruction, returning `None` if it is not part of this group.
    pub async fn apply_instruction(&self, instruction_id: &str) -> Option<bool> {
        let instruction = self.instructions.iter().find(|i| i.id == instruction_id)?;
        Some(instruction.apply().await)
    }

    fn on_update(&self, idx: usize, update: StatusUpdate) {
        if self.retired.load(Ordering::SeqCst) {
            return;
        }
        let Some(instruction) = self.instructions.get(idx) else {
            return;
        };
        let Some(accepted) = instruction.update(update, &self.id, &self.name) else {
            return;
        };
        self.ctx.transport.emit(accepted.event);
        if let Some(entry) = accepted.entry {
            log::info!("[{}] {}", self.name, entry.message);
            self.ctx.transport.emit(Event::Log(entry.clone()));
            self.ctx.journal.record(entry);
        }
        self.refresh();
    }

    /// Recompute the group status and pass the current variables down the
    /// instruction list, restarting observations whose inputs moved.
    fn refresh(&self) {
        let _recompute = lock(&self.recompute);

        let status = Status::fold(self.instructions.iter().map(Instruction::status));
        let previous = std::mem::replace(&mut *lock(&self.status), status);
        if previous != status {
            log::debug!("group {:?} is now {status}", self.name);
            self.ctx.transport.emit(Event::GroupStatus {
                group: self.id.clone(),
                status,
            });
        }

        let watching = self.watching.load(Ordering::SeqCst);
        let mut variables = self.ctx.globals.clone();
        for instruction in &self.instructions {
            if let Some(command) = &instruction.command
                && command.update_variables(&variables)
                && watching
                && command.rewatch_on_variables()
            {
                log::debug!("variables changed, watching {} again", instruction.id);
                command.stop();
                command.clone().watch();
            }
            variables.extend(&instruction.out_variables());
        }
    }

    fn emit_instruction(&self, instruction: &Instruction) {
        let observed = instruction.observed();
        self.ctx.transport.emit(Event::InstructionStatus {
            instruction: instruction.id.clone(),
            status: observed.status,
            info: observed.info,
            detail: observed.detail,
        });
    }

    pub fn descriptor(&self) -> GroupDescriptor {
        GroupDescriptor {
            id: self.id.clone(),
            name: self.name.clone(),
            instructions: self.instructions.iter().map(Instruction::descriptor).collect(),
        }
    }

    pub fn snapshot(&self) -> GroupSnapshot {
        GroupSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            status: self.status(),
            instructions: self.instructions.iter().map(Instruction::snapshot).collect(),
        }
    }
}

/// Group as shown to operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GroupSnapshot {
    pub id: String,
    pub name: String,
    pub status: Status,
    pub instructions: Vec<InstructionSnapshot>,
}

fn bind(
    instruction: &InstructionDescriptor,
    reporter: Reporter,
    group: &GroupDescriptor,
    ctx: &TreeContext,
) -> Instruction {
    let built = ctx.registry.init(
        &instruction.command,
        &instruction.parameters,
        ctx.globals.clone(),
        reporter,
        ctx.host.clone(),
    );
    match built {
        Ok(built) => {
            let icon = ctx.registry.get(&instruction.command).map_or("", |kind| kind.icon);
            Instruction::new(instruction, icon, built.params.to_map(), Some(built.command))
        }
        Err(err) => {
            let bound = Instruction::new(instruction, "", instruction.parameters.clone(), None);
            let info = format!("Unknown command {:?}", instruction.command);
            log::warn!("[{}] {info}", group.name);
            bound.set(Status::Failed, info.clone(), Some(Detail::error(&err)));
            ctx.journal.record(LogEntry {
                status: Some(Status::Failed),
                group_id: group.id.clone(),
                instruction_id: instruction.id.clone(),
                group_name: group.name.clone(),
                detail: Some(Detail::error(err)),
                ..LogEntry::new(info, "")
            });
            bound
        }
    }
}

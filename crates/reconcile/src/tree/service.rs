use super::{Group, GroupDescriptor, GroupSnapshot, TreeContext};
use crate::collab::{Event, LogEntry, TreeStore};
use crate::error::{Error, Result};
use crate::fanout::lock;
use crate::status::Status;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const GROUP_ICON: &str = "group";

/// Owner of the live tree: edits, persistence and apply entry points.
pub struct Service {
    ctx: TreeContext,
    store: Arc<dyn TreeStore>,
    groups: Mutex<Vec<Arc<Group>>>,
    watching: AtomicBool,
}

impl Service {
    /// Build every stored group. Nothing is observed until [`watch_all`](Self::watch_all).
    ///
    /// A stored tree repeating an id is rejected with [`Error::DuplicateId`].
    pub fn load(ctx: TreeContext, store: Arc<dyn TreeStore>) -> Result<Self> {
        let mut descriptors = store.load()?;
        let mut assigned = false;
        for descriptor in &mut descriptors {
            assigned |= descriptor.assign_ids();
        }
        let mut seen = HashSet::new();
        let duplicate = descriptors
            .iter()
            .flat_map(GroupDescriptor::ids)
            .find(|id| !seen.insert(*id));
        if let Some(id) = duplicate {
            return Err(Error::DuplicateId(id.to_string()));
        }
        let groups = descriptors.iter().map(|d| Group::build(d, &ctx)).collect::<Vec<_>>();
        log::info!("loaded {} groups", groups.len());
        if assigned {
            store.save(descriptors);
        }
        Ok(Self {
            ctx,
            store,
            groups: Mutex::new(groups),
            watching: AtomicBool::new(false),
        })
    }

    pub fn watch_all(&self) {
        self.watching.store(true, Ordering::SeqCst);
        for group in self.all() {
            group.watch();
        }
    }

    pub fn stop_all(&self) {
        self.watching.store(false, Ordering::SeqCst);
        for group in self.all() {
            group.stop();
        }
    }

    fn all(&self) -> Vec<Arc<Group>> {
        lock(&self.groups).clone()
    }

    pub fn groups(&self) -> Vec<GroupSnapshot> {
        self.all().iter().map(|g| g.snapshot()).collect()
    }

    pub fn group(&self, id: &str) -> Result<GroupSnapshot> {
        self.find(id).map(|g| g.snapshot())
    }

    fn find(&self, id: &str) -> Result<Arc<Group>> {
        self.all()
            .into_iter()
            .find(|g| g.id() == id)
            .ok_or_else(|| Error::GroupNotFound(id.to_string()))
    }

    pub fn descriptors(&self) -> Vec<GroupDescriptor> {
        self.all().iter().map(|g| g.descriptor()).collect()
    }

    /// Add a group at the end of the tree, returning its id.
    pub fn append_group(&self, mut descriptor: GroupDescriptor) -> Result<String> {
        descriptor.assign_ids();
        let group = {
            let mut groups = lock(&self.groups);
            check_unique(&descriptor, groups.iter().map(|g| g.descriptor()))?;
            let group = Group::build(&descriptor, &self.ctx);
            groups.push(group.clone());
            group
        };
        self.edited(format!("Added group {:?}", descriptor.name), &descriptor);
        if self.watching.load(Ordering::SeqCst) {
            group.watch();
        }
        Ok(descriptor.id)
    }

    /// Replace the group carrying the same id.
    pub fn modify_group(&self, descriptor: GroupDescriptor) -> Result<()> {
        let mut descriptor = descriptor;
        descriptor.assign_ids();
        let (old, group) = {
            let mut groups = lock(&self.groups);
            let idx = groups
                .iter()
                .position(|g| g.id() == descriptor.id)
                .ok_or_else(|| Error::GroupNotFound(descriptor.id.clone()))?;
            let others = groups
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != idx)
                .map(|(_, g)| g.descriptor());
            check_unique(&descriptor, others)?;
            let group = Group::build(&descriptor, &self.ctx);
            let old = std::mem::replace(&mut groups[idx], group.clone());
            (old, group)
        };
        old.retire();
        self.edited(format!("Modified group {:?}", descriptor.name), &descriptor);
        if self.watching.load(Ordering::SeqCst) {
            group.watch();
        }
        Ok(())
    }

    pub fn remove_group(&self, id: &str) -> Result<()> {
        let removed = {
            let mut groups = lock(&self.groups);
            let idx = groups
                .iter()
                .position(|g| g.id() == id)
                .ok_or_else(|| Error::GroupNotFound(id.to_string()))?;
            groups.remove(idx)
        };
        removed.retire();
        self.edited(format!("Removed group {:?}", removed.name()), &removed.descriptor());
        Ok(())
    }

    fn edited(&self, message: String, descriptor: &GroupDescriptor) {
        log::info!("{message}");
        let entry = LogEntry {
            group_id: descriptor.id.clone(),
            group_name: descriptor.name.clone(),
            ..LogEntry::new(message, GROUP_ICON)
        };
        self.ctx.transport.emit(Event::Log(entry.clone()));
        self.ctx.journal.record(entry);
        self.store.save(self.descriptors());
    }

    pub async fn apply_group(&self, id: &str) -> Result<bool> {
        let group = self.find(id)?;
        log::info!("applying group {:?}", group.name());
        Ok(group.apply().await)
    }

    pub async fn apply_instruction(&self, id: &str) -> Result<bool> {
        let group = self
            .all()
            .into_iter()
            .find(|g| g.contains(id))
            .ok_or_else(|| Error::InstructionNotFound(id.to_string()))?;
        group
            .apply_instruction(id)
            .await
            .ok_or_else(|| Error::InstructionNotFound(id.to_string()))
    }

    /// Wait until no instruction is Unknown, or until `timeout` elapsed.
    /// Returns whether every instruction was observed.
    pub async fn settle(&self, timeout: Duration) -> bool {
        let observed = || {
            self.groups()
                .iter()
                .flat_map(|g| &g.instructions)
                .all(|i| i.status != Status::Unknown)
        };
        let deadline = tokio::time::Instant::now() + timeout;
        while !observed() {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        true
    }
}

impl Drop for Service {
    fn drop(&mut self) {
        for group in lock(&self.groups).iter() {
            group.retire();
        }
    }
}

/// Reject ids already used by `others` or repeated inside `descriptor`.
fn check_unique<I>(descriptor: &GroupDescriptor, others: I) -> Result<()>
where
    I: IntoIterator<Item = GroupDescriptor>,
{
    let mut seen: HashSet<String> = HashSet::new();
    for other in others {
        seen.extend(other.ids().map(str::to_string));
    }
    for id in descriptor.ids() {
        if !seen.insert(id.to_string()) {
            return Err(Error::DuplicateId(id.to_string()));
        }
    }
    Ok(())
}

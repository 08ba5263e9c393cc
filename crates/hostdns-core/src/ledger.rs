//! Instance ledger
//!
//! The local view of what this instance has published. `hosts` mirrors the
//! TXT bookkeeping record in the zone; `containers` remembers the names and
//! addresses each container claimed so they can be retracted, so collisions
//! can be detected and so a changed container can be republished. The ledger is owned by the engine and only changes after a
//! successful update.

use crate::records::HostRecord;
use std::collections::{BTreeSet, HashMap};

#[derive(Debug, Clone, Default)]
pub struct InstanceLedger {
    hosts: BTreeSet<String>,
    containers: HashMap<String, HostRecord>,
}

impl InstanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names currently published by this instance
    pub fn hosts(&self) -> &BTreeSet<String> {
        &self.hosts
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hosts.contains(name)
    }

    /// Replace the published set, e.g. after reading it back from DNS
    pub fn replace_hosts(&mut self, hosts: BTreeSet<String>) {
        self.hosts = hosts;
    }

    pub fn mark_added<'a>(&mut self, names: impl IntoIterator<Item = &'a String>) {
        self.hosts.extend(names.into_iter().cloned());
    }

    pub fn mark_removed<'a>(&mut self, names: impl IntoIterator<Item = &'a String>) {
        for name in names {
            self.hosts.remove(name);
        }
    }

    /// Record the names and addresses claimed by a container
    pub fn assign(&mut self, container_id: impl Into<String>, record: HostRecord) {
        self.containers.insert(container_id.into(), record);
    }

    /// Forget a container, returning what it claimed
    pub fn release(&mut self, container_id: &str) -> Option<HostRecord> {
        self.containers.remove(container_id)
    }

    pub fn record_of(&self, container_id: &str) -> Option<&HostRecord> {
        self.containers.get(container_id)
    }

    pub fn names_of(&self, container_id: &str) -> Option<&BTreeSet<String>> {
        self.containers.get(container_id).map(|record| &record.names)
    }

    pub fn is_tracked(&self, container_id: &str) -> bool {
        self.containers.contains_key(container_id)
    }

    /// Every name claimed by containers other than `container_id`
    pub fn names_owned_by_others(&self, container_id: &str) -> Vec<String> {
        self.containers
            .iter()
            .filter(|(id, _)| id.as_str() != container_id)
            .flat_map(|(_, record)| record.names.iter().cloned())
            .collect()
    }

    /// Drop all container claims; published hosts are kept
    pub fn clear_containers(&mut self) {
        self.containers.clear();
    }

    pub fn tracked_containers(&self) -> usize {
        self.containers.len()
    }
}

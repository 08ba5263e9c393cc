//! Record set model
//!
//! Hosts this instance wants published, and the delta between that desired
//! state and the names already recorded in the instance ledger.

use crate::traits::ContainerSnapshot;
use std::collections::{BTreeMap, BTreeSet};
use std::net::{Ipv4Addr, Ipv6Addr};

/// Addresses advertised for a host
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Addresses {
    pub ipv4: Vec<Ipv4Addr>,
    pub ipv6: Vec<Ipv6Addr>,
}

impl Addresses {
    pub fn new(ipv4: Vec<Ipv4Addr>, ipv6: Vec<Ipv6Addr>) -> Self {
        Self { ipv4, ipv6 }
    }

    /// Addresses of a container on its tracked networks
    ///
    /// Networks are visited in name order; repeated addresses are kept once.
    pub fn of(snapshot: &ContainerSnapshot, tracked_networks: &[String]) -> Self {
        let mut addresses = Self::default();

        for (network, attachment) in &snapshot.networks {
            if !tracked_networks.iter().any(|t| t == network) {
                continue;
            }
            if let Some(ip) = attachment.ipv4
                && !addresses.ipv4.contains(&ip)
            {
                addresses.ipv4.push(ip);
            }
            if let Some(ip) = attachment.ipv6
                && !addresses.ipv6.contains(&ip)
            {
                addresses.ipv6.push(ip);
            }
        }

        addresses
    }

    pub fn is_empty(&self) -> bool {
        self.ipv4.is_empty() && self.ipv6.is_empty()
    }
}

/// One logical host: a set of aliases sharing one address set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostRecord {
    pub names: BTreeSet<String>,
    pub addresses: Addresses,
}

impl HostRecord {
    pub fn new(names: BTreeSet<String>, addresses: Addresses) -> Self {
        Self { names, addresses }
    }

    /// Whether this record can be published
    pub fn is_publishable(&self) -> bool {
        !self.names.is_empty() && !self.addresses.is_empty()
    }
}

/// Desired zone content keyed by name
pub type DesiredState = BTreeMap<String, Addresses>;

/// Flatten host records into the desired state
///
/// Records without names or without addresses contribute nothing.
pub fn desired_state<'a>(records: impl IntoIterator<Item = &'a HostRecord>) -> DesiredState {
    let mut desired = DesiredState::new();
    for record in records {
        if !record.is_publishable() {
            continue;
        }
        for name in &record.names {
            desired.insert(name.clone(), record.addresses.clone());
        }
    }
    desired
}

/// Names to publish and names to retract
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Delta {
    pub to_add: DesiredState,
    pub to_remove: BTreeSet<String>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.to_add.is_empty() && self.to_remove.is_empty()
    }

    /// Group names to add by identical address sets
    ///
    /// All names of one container share their addresses, so each container
    /// ends up in a single batch.
    pub fn add_batches(&self) -> Vec<(BTreeSet<String>, Addresses)> {
        let mut batches: BTreeMap<&Addresses, BTreeSet<String>> = BTreeMap::new();
        for (name, addresses) in &self.to_add {
            batches.entry(addresses).or_default().insert(name.clone());
        }
        batches
            .into_iter()
            .map(|(addresses, names)| (names, addresses.clone()))
            .collect()
    }
}

/// Compute the delta between the published names and the desired state
///
/// Names already published are left alone even when their addresses in
/// `desired` differ. Address-less entries are never added.
pub fn compute_delta(published: &BTreeSet<String>, desired: &DesiredState) -> Delta {
    let to_add = desired
        .iter()
        .filter(|(name, addresses)| !published.contains(*name) && !addresses.is_empty())
        .map(|(name, addresses)| (name.clone(), addresses.clone()))
        .collect();

    let to_remove = published
        .iter()
        .filter(|name| !desired.contains_key(*name))
        .cloned()
        .collect();

    Delta { to_add, to_remove }
}

//! Host name derivation
//!
//! Turns container identifiers into DNS-safe labels and resolves collisions
//! between containers that would publish the same name.

use crate::config::CollisionPolicy;
use crate::traits::ContainerSnapshot;
use std::collections::{BTreeSet, HashSet};
use tracing::warn;

/// Longest label a DNS name may carry, in octets
pub const MAX_LABEL_LEN: usize = 63;

/// Longest name in presentation form without the trailing dot
pub const MAX_NAME_LEN: usize = 253;

fn is_label_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '.'
}

/// Normalize a raw identifier into a DNS-safe label
///
/// Every run of characters outside `[A-Za-z0-9-.]` becomes a single `-`,
/// then leading and trailing `-` are trimmed. Total and idempotent.
pub fn normalize(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut in_run = false;

    for c in raw.chars() {
        if is_label_char(c) {
            out.push(c);
            in_run = false;
        } else if !in_run {
            out.push('-');
            in_run = true;
        }
    }

    out.trim_matches('-').to_string()
}

/// Whether `name` can be used as a zone-relative host name
///
/// Every dot-separated label must be non-empty and at most
/// [`MAX_LABEL_LEN`] octets long.
pub fn is_valid_host_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .split('.')
            .all(|label| !label.is_empty() && label.len() <= MAX_LABEL_LEN)
}

/// Whether the wildcard of `name` still fits into one DNS name under `zone`
pub fn fits_zone(name: &str, zone: &str) -> bool {
    let zone = zone.trim_end_matches('.');
    // "*." + name + "." + zone
    name.len() + zone.len() + 3 <= MAX_NAME_LEN
}

/// Drop names that cannot be published under `zone`
pub fn retain_publishable(container_id: &str, names: &mut BTreeSet<String>, zone: &str) {
    names.retain(|name| {
        let ok = is_valid_host_name(name) && fits_zone(name, zone);
        if !ok {
            warn!(
                "Host {:?} of container {} is not a valid name in zone {}, skipping it",
                name, container_id, zone
            );
        }
        ok
    });
}

/// Candidate names for a container
///
/// A hostname override label is the only candidate when present. Otherwise
/// the short id, the runtime name and the aliases of every tracked network
/// are used. Untracked networks contribute nothing. Candidates that are not
/// valid DNS names after normalization are dropped with a warning.
pub fn candidate_names(snapshot: &ContainerSnapshot, tracked_networks: &[String]) -> BTreeSet<String> {
    let raw: Vec<&str> = match snapshot.hostname_label.as_deref() {
        Some(label) => vec![label],
        None => {
            let mut raw = vec![snapshot.short_id(), snapshot.name.as_str()];
            for (network, attachment) in &snapshot.networks {
                if tracked_networks.iter().any(|t| t == network) {
                    raw.extend(attachment.aliases.iter().map(String::as_str));
                }
            }
            raw
        }
    };

    raw.into_iter()
        .map(normalize)
        .filter(|name| !name.is_empty())
        .filter(|name| {
            let valid = is_valid_host_name(name);
            if !valid {
                warn!(
                    "Container {} has a name {:?} that is not a valid DNS name, skipping it",
                    snapshot.id, name
                );
            }
            valid
        })
        .collect()
}

/// Remove or rename candidates already owned by other containers
///
/// `existing` holds the names of every other container (it may repeat).
/// Each collision is logged; with [`CollisionPolicy::Drop`] a container
/// whose candidates all collide ends up with an empty set.
pub fn deduplicate(
    container_id: &str,
    candidates: BTreeSet<String>,
    existing: &[String],
    policy: CollisionPolicy,
) -> BTreeSet<String> {
    let taken: HashSet<&str> = existing.iter().map(String::as_str).collect();
    let mut result = BTreeSet::new();

    for name in candidates {
        if !taken.contains(name.as_str()) {
            result.insert(name);
            continue;
        }

        match policy {
            CollisionPolicy::Drop => {
                warn!(
                    "Duplicated host {:?} for container {}, dropping it",
                    name, container_id
                );
            }
            CollisionPolicy::Suffix => {
                let renamed = (1..)
                    .map(|n| format!("{name}-{n}"))
                    .find(|c| !taken.contains(c.as_str()) && !result.contains(c))
                    .unwrap_or_else(|| name.clone());
                warn!(
                    "Duplicated host {:?} for container {}, renamed to {:?}",
                    name, container_id, renamed
                );
                result.insert(renamed);
            }
        }
    }

    result
}

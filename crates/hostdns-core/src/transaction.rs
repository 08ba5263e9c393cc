//! DNS update transaction builder
//!
//! Translates hosts to publish or retract into the logical operations of one
//! RFC 2136 update message. Every host gets its own records and a wildcard
//! alias (`*.<name>`), plus one TXT value under the instance bookkeeping
//! record so a later run can find what this instance owns.

use crate::names::normalize;
use crate::records::Addresses;
use std::collections::BTreeSet;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// TTL for every published record; containers churn too fast for caching
pub const RECORD_TTL: u32 = 1;

/// Prefix of the instance bookkeeping record label
pub const INSTANCE_RECORD_PREFIX: &str = "_container_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Aaaa,
    Txt,
}

impl fmt::Display for RecordType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::A => "A",
            Self::Aaaa => "AAAA",
            Self::Txt => "TXT",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RecordValue {
    A(Ipv4Addr),
    Aaaa(Ipv6Addr),
    Txt(String),
}

impl RecordValue {
    pub fn record_type(&self) -> RecordType {
        match self {
            Self::A(_) => RecordType::A,
            Self::Aaaa(_) => RecordType::Aaaa,
            Self::Txt(_) => RecordType::Txt,
        }
    }
}

/// One operation of an update message; names are relative to the zone
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpdateOp {
    /// Add a record to an RRset
    Add {
        name: String,
        ttl: u32,
        value: RecordValue,
    },
    /// Delete every record of a type at a name
    DeleteRrset { name: String, record_type: RecordType },
    /// Delete one record, matched by value
    DeleteValue { name: String, value: RecordValue },
}

impl UpdateOp {
    pub fn name(&self) -> &str {
        match self {
            Self::Add { name, .. } | Self::DeleteRrset { name, .. } | Self::DeleteValue { name, .. } => {
                name
            }
        }
    }
}

/// Operations sent together as one update message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateTransaction {
    /// Zone without trailing dot
    pub zone: String,
    pub ops: Vec<UpdateOp>,
}

impl UpdateTransaction {
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Absolute name of a zone-relative label
    pub fn fqdn(&self, name: &str) -> String {
        format!("{}.{}.", name, self.zone)
    }
}

/// Builds update transactions for one zone and instance
#[derive(Debug, Clone)]
pub struct TransactionBuilder {
    zone: String,
    instance_record: String,
}

impl TransactionBuilder {
    pub fn new(zone: &str, instance_name: &str) -> Self {
        Self {
            zone: zone.trim_end_matches('.').to_string(),
            instance_record: format!("{INSTANCE_RECORD_PREFIX}{}", normalize(instance_name)),
        }
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Zone-relative label of the instance bookkeeping record
    pub fn instance_record(&self) -> &str {
        &self.instance_record
    }

    /// Absolute name of the instance bookkeeping record
    pub fn instance_record_fqdn(&self) -> String {
        format!("{}.{}.", self.instance_record, self.zone)
    }

    /// Publish `names` at `addresses`
    ///
    /// Address records are emitted only when there is at least one address;
    /// the TXT bookkeeping entry is always emitted.
    pub fn build_add(&self, names: &BTreeSet<String>, addresses: &Addresses) -> UpdateTransaction {
        let mut ops = Vec::new();

        for name in names {
            if !addresses.is_empty() {
                let wildcard = format!("*.{name}");
                for owner in [name.as_str(), wildcard.as_str()] {
                    for ip in &addresses.ipv4 {
                        ops.push(UpdateOp::Add {
                            name: owner.to_string(),
                            ttl: RECORD_TTL,
                            value: RecordValue::A(*ip),
                        });
                    }
                    for ip in &addresses.ipv6 {
                        ops.push(UpdateOp::Add {
                            name: owner.to_string(),
                            ttl: RECORD_TTL,
                            value: RecordValue::Aaaa(*ip),
                        });
                    }
                }
            }

            ops.push(UpdateOp::Add {
                name: self.instance_record.clone(),
                ttl: RECORD_TTL,
                value: RecordValue::Txt(name.clone()),
            });
        }

        UpdateTransaction {
            zone: self.zone.clone(),
            ops,
        }
    }

    /// Retract `names`
    ///
    /// Address RRsets are deleted whole; the TXT entry is deleted by value so
    /// the other names of this instance survive.
    pub fn build_remove(&self, names: &BTreeSet<String>) -> UpdateTransaction {
        let mut ops = Vec::new();

        for name in names {
            let wildcard = format!("*.{name}");
            for record_type in [RecordType::A, RecordType::Aaaa] {
                for owner in [name.as_str(), wildcard.as_str()] {
                    ops.push(UpdateOp::DeleteRrset {
                        name: owner.to_string(),
                        record_type,
                    });
                }
            }

            ops.push(UpdateOp::DeleteValue {
                name: self.instance_record.clone(),
                value: RecordValue::Txt(name.clone()),
            });
        }

        UpdateTransaction {
            zone: self.zone.clone(),
            ops,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(names: &[&str]) -> BTreeSet<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn builder() -> TransactionBuilder {
        TransactionBuilder::new("example-zone.", "test")
    }

    #[test]
    fn instance_record_is_scoped_by_name() {
        let b = builder();
        assert_eq!(b.instance_record(), "_container_test");
        assert_eq!(b.instance_record_fqdn(), "_container_test.example-zone.");
    }

    #[test]
    fn add_publishes_host_wildcard_and_txt() {
        let addresses = Addresses::new(
            vec![Ipv4Addr::new(192, 168, 1, 1), Ipv4Addr::new(192, 168, 1, 2)],
            vec!["fe80::7e5c:f8ff:fe84:a792".parse().unwrap()],
        );
        let tx = builder().build_add(&set(&["example-host"]), &addresses);

        let expect = |name: &str, value: RecordValue| UpdateOp::Add {
            name: name.to_string(),
            ttl: RECORD_TTL,
            value,
        };
        for owner in ["example-host", "*.example-host"] {
            assert!(tx.ops.contains(&expect(owner, RecordValue::A(Ipv4Addr::new(192, 168, 1, 1)))));
            assert!(tx.ops.contains(&expect(owner, RecordValue::A(Ipv4Addr::new(192, 168, 1, 2)))));
            assert!(tx.ops.contains(&expect(owner, RecordValue::Aaaa(addresses.ipv6[0]))));
        }
        assert!(tx.ops.contains(&expect(
            "_container_test",
            RecordValue::Txt("example-host".to_string())
        )));
        assert_eq!(tx.ops.len(), 7);
    }

    #[test]
    fn add_without_addresses_only_writes_txt() {
        let tx = builder().build_add(&set(&["lonely"]), &Addresses::default());
        assert_eq!(
            tx.ops,
            vec![UpdateOp::Add {
                name: "_container_test".to_string(),
                ttl: RECORD_TTL,
                value: RecordValue::Txt("lonely".to_string()),
            }]
        );
    }

    #[test]
    fn remove_deletes_rrsets_and_txt_value() {
        let tx = builder().build_remove(&set(&["example-host"]));

        for record_type in [RecordType::A, RecordType::Aaaa] {
            for owner in ["example-host", "*.example-host"] {
                assert!(tx.ops.contains(&UpdateOp::DeleteRrset {
                    name: owner.to_string(),
                    record_type,
                }));
            }
        }
        assert!(tx.ops.contains(&UpdateOp::DeleteValue {
            name: "_container_test".to_string(),
            value: RecordValue::Txt("example-host".to_string()),
        }));
        assert_eq!(tx.ops.len(), 5);
    }

    #[test]
    fn fqdn_is_absolute() {
        let tx = builder().build_remove(&set(&["a"]));
        assert_eq!(tx.fqdn("*.a"), "*.a.example-zone.");
    }
}

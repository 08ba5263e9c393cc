//! Capability traits implemented outside the core
//!
//! - [`ContainerRuntime`]: where containers and their network events come from
//! - [`DnsTransport`]: how update transactions reach the nameserver

pub mod container_runtime;
pub mod dns_transport;

pub use container_runtime::{
    ContainerRuntime, ContainerSnapshot, NetworkAttachment, RuntimeEvent, RuntimeEventStream,
    SHORT_ID_LEN,
};
pub use dns_transport::{DnsTransport, ResponseCode, UpdateResponse};

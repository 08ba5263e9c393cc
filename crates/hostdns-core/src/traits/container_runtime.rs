// # Container Runtime Trait
//
// Defines the interface for discovering running containers and following
// their network attachments.
//
// ## Implementations
//
// - Docker Engine API: `hostdns-docker` crate
//
// ## Usage
//
// ```rust,ignore
// use hostdns_core::ContainerRuntime;
// use std::time::SystemTime;
// use tokio_stream::StreamExt;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let runtime = /* ContainerRuntime implementation */;
//
//     runtime.ping().await?;
//     for container in runtime.list_running().await? {
//         println!("{} {}", container.short_id(), container.name);
//     }
//
//     let mut events = runtime.events(SystemTime::now());
//     while let Some(event) = events.next().await {
//         println!("runtime event: {:?}", event?);
//     }
//
//     Ok(())
// }
// ```

use async_trait::async_trait;
use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::pin::Pin;
use std::time::SystemTime;
use tokio_stream::Stream;

/// Length of the abbreviated container id used as a host name
pub const SHORT_ID_LEN: usize = 12;

/// Attachment of a container to one runtime network
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkAttachment {
    /// IPv4 address on this network
    pub ipv4: Option<Ipv4Addr>,
    /// Global IPv6 address on this network
    pub ipv6: Option<Ipv6Addr>,
    /// Network-scoped aliases
    pub aliases: Vec<String>,
}

/// Everything the synchronizer needs to know about one container
///
/// Built once at the runtime boundary; nothing downstream sees the raw
/// runtime payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerSnapshot {
    /// Full container id
    pub id: String,
    /// Runtime-assigned name (may carry a leading `/`)
    pub name: String,
    /// Network attachments keyed by network name
    pub networks: BTreeMap<String, NetworkAttachment>,
    /// Value of the hostname override label, if set
    pub hostname_label: Option<String>,
}

impl ContainerSnapshot {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            ..Self::default()
        }
    }

    /// Attach the container to a network
    pub fn with_network(mut self, network: impl Into<String>, attachment: NetworkAttachment) -> Self {
        self.networks.insert(network.into(), attachment);
        self
    }

    /// Set the hostname override label
    pub fn with_hostname_label(mut self, label: impl Into<String>) -> Self {
        self.hostname_label = Some(label.into());
        self
    }

    /// Abbreviated id, as shown by the runtime's CLI
    pub fn short_id(&self) -> &str {
        match self.id.char_indices().nth(SHORT_ID_LEN) {
            Some((idx, _)) => &self.id[..idx],
            None => &self.id,
        }
    }
}

/// Runtime event relevant to the synchronizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeEvent {
    /// A container was attached to a network
    NetworkConnect {
        container_id: String,
        network: String,
    },
    /// A container was detached from a network
    NetworkDisconnect {
        container_id: String,
        network: String,
    },
    /// Any other runtime event; carried so it can be logged and skipped
    Ignored { kind: String, action: String },
}

/// Stream of runtime events; an `Err` item means the connection broke
pub type RuntimeEventStream =
    Pin<Box<dyn Stream<Item = Result<RuntimeEvent, crate::Error>> + Send + 'static>>;

/// Trait for container runtime implementations
///
/// # Trust Level: Semi-Trusted
///
/// ## Allowed Capabilities
/// - Perform I/O against the runtime's API endpoint
/// - Translate runtime payloads into [`ContainerSnapshot`] and [`RuntimeEvent`]
///
/// ## Forbidden Capabilities
/// - Performing DNS updates (use `DnsTransport`)
/// - Deriving or deduplicating host names (owned by `ReconciliationEngine`)
/// - Filtering by tracked network (owned by `ReconciliationEngine`)
/// - Restarting a broken event stream behind the engine's back
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Check that the runtime is reachable
    ///
    /// # Returns
    ///
    /// - `Ok(())`: The runtime answered
    /// - `Err(Error::Connection)`: The runtime is unreachable or refused
    async fn ping(&self) -> Result<(), crate::Error>;

    /// List all running containers
    async fn list_running(&self) -> Result<Vec<ContainerSnapshot>, crate::Error>;

    /// Fetch the current snapshot of one container
    async fn inspect(&self, container_id: &str) -> Result<ContainerSnapshot, crate::Error>;

    /// Subscribe to runtime events, starting at `since`
    ///
    /// Events recorded at or after `since` are replayed before live ones, so
    /// a caller that takes `since` before listing misses nothing in between.
    /// The stream is lazy, conceptually infinite and not restartable. It
    /// yields an `Err` or ends when the underlying connection breaks.
    fn events(&self, since: SystemTime) -> RuntimeEventStream;

    /// Get the runtime name (for logging/debugging)
    fn runtime_name(&self) -> &'static str;
}

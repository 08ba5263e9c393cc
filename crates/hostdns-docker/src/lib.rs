// # Docker Container Runtime
//
// This crate provides the Docker Engine implementation of `ContainerRuntime`.
//
// - Connects through the local socket, honoring `DOCKER_HOST`
// - Lists running containers and inspects them into `ContainerSnapshot`s
// - Follows `network` events and reports connects and disconnects
//
// ## Architectural Constraints
//
// ### Trust Level: Untrusted (Container Runtime)
//
// **Allowed Capabilities**:
// - ✅ Read container metadata and the event stream
//
// **Forbidden Capabilities** (enforced by code review):
// - ❌ Modify containers or networks
// - ❌ Decide which names get published (owned by ReconciliationEngine)
// - ❌ Reconnect on its own; a broken stream is reported, not hidden

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{InspectContainerOptions, ListContainersOptions};
use bollard::models::{ContainerInspectResponse, EndpointSettings, EventMessage, EventMessageTypeEnum};
use bollard::system::EventsOptions;
use hostdns_core::traits::{
    ContainerRuntime, ContainerSnapshot, NetworkAttachment, RuntimeEvent, RuntimeEventStream,
};
use hostdns_core::{Error, Result};
use std::collections::HashMap;
use std::net::{Ipv4Addr, Ipv6Addr};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio_stream::StreamExt;
use tracing::{debug, trace, warn};

/// Container label overriding every derived host name
pub const HOSTNAME_LABEL: &str = "pl.glorpen.hostname";

/// Docker Engine runtime
#[derive(Debug, Clone)]
pub struct DockerRuntime {
    docker: Docker,
}

impl DockerRuntime {
    /// Connect with the local defaults (`DOCKER_HOST` or the default socket)
    ///
    /// No request is made here; reachability is checked by `ping()`.
    pub fn connect() -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| Error::connection(format!("Failed to set up Docker client: {e}")))?;
        Ok(Self { docker })
    }

    pub fn from_client(docker: Docker) -> Self {
        Self { docker }
    }
}

#[async_trait]
impl ContainerRuntime for DockerRuntime {
    async fn ping(&self) -> Result<()> {
        self.docker
            .ping()
            .await
            .map_err(|e| Error::connection(format!("Docker daemon unreachable: {e}")))?;
        Ok(())
    }

    async fn list_running(&self) -> Result<Vec<ContainerSnapshot>> {
        let options = ListContainersOptions::<String> {
            filters: HashMap::from([("status".to_string(), vec!["running".to_string()])]),
            ..Default::default()
        };

        let summaries = self
            .docker
            .list_containers(Some(options))
            .await
            .map_err(|e| Error::runtime(format!("Failed to list containers: {e}")))?;

        let mut snapshots = Vec::with_capacity(summaries.len());
        for id in summaries.into_iter().filter_map(|summary| summary.id) {
            // A container may stop between listing and inspection
            match self.inspect(&id).await {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) => warn!("Skipping container {}: {}", id, e),
            }
        }

        Ok(snapshots)
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerSnapshot> {
        let response = self
            .docker
            .inspect_container(container_id, None::<InspectContainerOptions>)
            .await
            .map_err(|e| Error::runtime(format!("Failed to inspect container {container_id}: {e}")))?;

        snapshot_from_inspect(response)
    }

    fn events(&self, since: SystemTime) -> RuntimeEventStream {
        let stream = self
            .docker
            .events(Some(events_options(since)))
            .map(|item| match item {
                Ok(message) => Ok(translate_event(message)),
                Err(e) => Err(Error::runtime(format!("Docker event stream failed: {e}"))),
            });

        Box::pin(stream)
    }

    fn runtime_name(&self) -> &'static str {
        "docker"
    }
}

/// Network events from `since` on
///
/// Docker takes `since` in whole seconds; rounding down replays a little
/// more, never less.
pub fn events_options(since: SystemTime) -> EventsOptions<String> {
    let secs = since
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs())
        .unwrap_or(0);

    EventsOptions::<String> {
        since: Some(secs.to_string()),
        filters: HashMap::from([("type".to_string(), vec!["network".to_string()])]),
        ..Default::default()
    }
}

/// Build a snapshot from an inspect response
///
/// Empty address strings mean "not assigned" and become `None`.
pub fn snapshot_from_inspect(response: ContainerInspectResponse) -> Result<ContainerSnapshot> {
    let id = response
        .id
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::runtime("Inspect response without container id"))?;

    let mut snapshot = ContainerSnapshot::new(id, response.name.unwrap_or_default());

    if let Some(label) = response
        .config
        .and_then(|config| config.labels)
        .and_then(|mut labels| labels.remove(HOSTNAME_LABEL))
    {
        snapshot = snapshot.with_hostname_label(label);
    }

    let networks = response
        .network_settings
        .and_then(|settings| settings.networks)
        .unwrap_or_default();
    for (network, endpoint) in networks {
        let attachment = attachment(&snapshot.id, &network, endpoint);
        snapshot = snapshot.with_network(network, attachment);
    }

    trace!("Inspected container {}: {:?}", snapshot.short_id(), snapshot);
    Ok(snapshot)
}

fn attachment(container_id: &str, network: &str, endpoint: EndpointSettings) -> NetworkAttachment {
    NetworkAttachment {
        ipv4: parse_address::<Ipv4Addr>(container_id, network, endpoint.ip_address),
        ipv6: parse_address::<Ipv6Addr>(container_id, network, endpoint.global_ipv6_address),
        aliases: endpoint.aliases.unwrap_or_default(),
    }
}

fn parse_address<T: std::str::FromStr>(container_id: &str, network: &str, raw: Option<String>) -> Option<T> {
    let raw = raw.filter(|s| !s.is_empty())?;
    match raw.parse() {
        Ok(ip) => Some(ip),
        Err(_) => {
            warn!(
                "Ignoring unparseable address {:?} of container {} on network {}",
                raw, container_id, network
            );
            None
        }
    }
}

/// Translate a Docker event into a runtime event
///
/// Only network `connect` and `disconnect` carry meaning; everything else
/// becomes [`RuntimeEvent::Ignored`].
pub fn translate_event(message: EventMessage) -> RuntimeEvent {
    let kind = message
        .typ
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "unknown".to_string());
    let action = message.action.unwrap_or_default();

    if message.typ != Some(EventMessageTypeEnum::NETWORK) {
        return RuntimeEvent::Ignored { kind, action };
    }

    let actor = message.actor.unwrap_or_default();
    let mut attributes = actor.attributes.unwrap_or_default();
    let Some(container_id) = attributes.remove("container") else {
        debug!("Network {} event without container attribute", action);
        return RuntimeEvent::Ignored { kind, action };
    };
    let network = attributes
        .remove("name")
        .or(actor.id)
        .unwrap_or_default();

    match action.as_str() {
        "connect" => RuntimeEvent::NetworkConnect {
            container_id,
            network,
        },
        "disconnect" => RuntimeEvent::NetworkDisconnect {
            container_id,
            network,
        },
        _ => RuntimeEvent::Ignored { kind, action },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bollard::models::{ContainerConfig, EventActor, NetworkSettings};

    fn network_event(action: &str, container: Option<&str>) -> EventMessage {
        let mut attributes = HashMap::from([
            ("name".to_string(), "bridge".to_string()),
            ("type".to_string(), "bridge".to_string()),
        ]);
        if let Some(container) = container {
            attributes.insert("container".to_string(), container.to_string());
        }

        EventMessage {
            typ: Some(EventMessageTypeEnum::NETWORK),
            action: Some(action.to_string()),
            actor: Some(EventActor {
                id: Some("f3a9c1".to_string()),
                attributes: Some(attributes),
            }),
            ..Default::default()
        }
    }

    fn endpoint(ipv4: &str, ipv6: &str, aliases: &[&str]) -> EndpointSettings {
        EndpointSettings {
            ip_address: Some(ipv4.to_string()),
            global_ipv6_address: Some(ipv6.to_string()),
            aliases: Some(aliases.iter().map(|s| s.to_string()).collect()),
            ..Default::default()
        }
    }

    #[test]
    fn test_connect_and_disconnect_events() {
        assert_eq!(
            translate_event(network_event("connect", Some("abc123"))),
            RuntimeEvent::NetworkConnect {
                container_id: "abc123".to_string(),
                network: "bridge".to_string(),
            }
        );
        assert_eq!(
            translate_event(network_event("disconnect", Some("abc123"))),
            RuntimeEvent::NetworkDisconnect {
                container_id: "abc123".to_string(),
                network: "bridge".to_string(),
            }
        );
    }

    #[test]
    fn test_other_network_actions_are_ignored() {
        assert!(matches!(
            translate_event(network_event("destroy", Some("abc123"))),
            RuntimeEvent::Ignored { .. }
        ));
        assert!(matches!(
            translate_event(network_event("connect", None)),
            RuntimeEvent::Ignored { .. }
        ));
    }

    #[test]
    fn test_container_events_are_ignored() {
        let message = EventMessage {
            typ: Some(EventMessageTypeEnum::CONTAINER),
            action: Some("start".to_string()),
            ..Default::default()
        };
        match translate_event(message) {
            RuntimeEvent::Ignored { action, .. } => assert_eq!(action, "start"),
            other => panic!("expected ignored event, got {other:?}"),
        }
    }

    #[test]
    fn test_snapshot_from_inspect() {
        let response = ContainerInspectResponse {
            id: Some("0123456789abcdef".to_string()),
            name: Some("/web".to_string()),
            config: Some(ContainerConfig {
                labels: Some(HashMap::from([(
                    HOSTNAME_LABEL.to_string(),
                    "site".to_string(),
                )])),
                ..Default::default()
            }),
            network_settings: Some(NetworkSettings {
                networks: Some(HashMap::from([
                    ("bridge".to_string(), endpoint("172.17.0.2", "", &["www"])),
                    ("backend".to_string(), endpoint("", "fd00::2", &[])),
                ])),
                ..Default::default()
            }),
            ..Default::default()
        };

        let snapshot = snapshot_from_inspect(response).unwrap();
        assert_eq!(snapshot.short_id(), "0123456789ab");
        assert_eq!(snapshot.name, "/web");
        assert_eq!(snapshot.hostname_label.as_deref(), Some("site"));

        let bridge = &snapshot.networks["bridge"];
        assert_eq!(bridge.ipv4, Some(Ipv4Addr::new(172, 17, 0, 2)));
        assert_eq!(bridge.ipv6, None);
        assert_eq!(bridge.aliases, vec!["www".to_string()]);

        let backend = &snapshot.networks["backend"];
        assert_eq!(backend.ipv4, None);
        assert_eq!(backend.ipv6, Some("fd00::2".parse().unwrap()));
    }

    #[test]
    fn test_events_start_at_subscription_time() {
        let since = UNIX_EPOCH + std::time::Duration::from_millis(1_700_000_000_900);
        let options = events_options(since);

        assert_eq!(options.since.as_deref(), Some("1700000000"));
        assert_eq!(options.filters["type"], vec!["network".to_string()]);
    }

    #[test]
    fn test_snapshot_requires_id() {
        assert!(snapshot_from_inspect(ContainerInspectResponse::default()).is_err());
    }

    #[test]
    fn test_unparseable_address_is_dropped() {
        let attachment = attachment("c1", "bridge", endpoint("not-an-ip", "", &[]));
        assert_eq!(attachment.ipv4, None);
    }
}

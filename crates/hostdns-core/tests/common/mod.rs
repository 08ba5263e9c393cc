//! Test doubles and common utilities for contract tests
//!
//! - [`ScriptedRuntime`]: containers and events controlled by the test
//! - [`RecordingTransport`]: an in-memory zone that applies updates, so a
//!   later `load_records()` sees what earlier updates wrote

#![allow(dead_code)]

use hostdns_core::error::Result;
use hostdns_core::traits::{
    ContainerRuntime, ContainerSnapshot, DnsTransport, NetworkAttachment, ResponseCode,
    RuntimeEvent, RuntimeEventStream, UpdateResponse,
};
use hostdns_core::transaction::{RecordType, RecordValue, UpdateOp, UpdateTransaction};
use hostdns_core::{
    EngineEvent, Error, HostDnsConfig, InstanceLedger, ReconciliationEngine, StopReason,
};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::net::Ipv4Addr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub const ZONE: &str = "docker";
pub const INSTANCE: &str = "test";
pub const INSTANCE_RECORD: &str = "_container_test.docker.";

/// Shared, test-visible side of a [`ScriptedRuntime`]
#[derive(Clone, Default)]
pub struct RuntimeHandle {
    containers: Arc<Mutex<Vec<ContainerSnapshot>>>,
    events_tx: Arc<Mutex<Option<mpsc::UnboundedSender<Result<RuntimeEvent>>>>>,
    listed_at: Arc<Mutex<Option<SystemTime>>>,
    subscribed_since: Arc<Mutex<Option<SystemTime>>>,
}

impl RuntimeHandle {
    /// Make a container visible to `list_running()` and `inspect()`
    pub fn start(&self, snapshot: ContainerSnapshot) {
        let mut containers = self.containers.lock().unwrap();
        containers.retain(|c| c.id != snapshot.id);
        containers.push(snapshot);
    }

    /// Remove a container from the runtime
    pub fn stop(&self, container_id: &str) {
        self.containers.lock().unwrap().retain(|c| c.id != container_id);
    }

    pub fn send(&self, event: RuntimeEvent) {
        if let Some(tx) = self.events_tx.lock().unwrap().as_ref() {
            let _ = tx.send(Ok(event));
        }
    }

    pub fn connect(&self, container_id: &str, network: &str) {
        self.send(RuntimeEvent::NetworkConnect {
            container_id: container_id.to_string(),
            network: network.to_string(),
        });
    }

    pub fn disconnect(&self, container_id: &str, network: &str) {
        self.send(RuntimeEvent::NetworkDisconnect {
            container_id: container_id.to_string(),
            network: network.to_string(),
        });
    }

    /// When `list_running()` was last called
    pub fn listed_at(&self) -> Option<SystemTime> {
        *self.listed_at.lock().unwrap()
    }

    /// The `since` passed to `events()`
    pub fn subscribed_since(&self) -> Option<SystemTime> {
        *self.subscribed_since.lock().unwrap()
    }

    /// Break the event stream with an error item
    pub fn break_stream(&self) {
        if let Some(tx) = self.events_tx.lock().unwrap().as_ref() {
            let _ = tx.send(Err(Error::runtime("connection reset")));
        }
    }

    /// End the event stream
    pub fn close_stream(&self) {
        self.events_tx.lock().unwrap().take();
    }
}

/// A container runtime fully controlled by the test
pub struct ScriptedRuntime {
    handle: RuntimeHandle,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<Result<RuntimeEvent>>>>,
    reachable: bool,
}

impl ScriptedRuntime {
    pub fn new() -> (Self, RuntimeHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = RuntimeHandle {
            containers: Arc::default(),
            events_tx: Arc::new(Mutex::new(Some(tx))),
            listed_at: Arc::default(),
            subscribed_since: Arc::default(),
        };
        let runtime = Self {
            handle: handle.clone(),
            events_rx: Mutex::new(Some(rx)),
            reachable: true,
        };
        (runtime, handle)
    }

    /// A runtime whose ping always fails
    pub fn unreachable() -> Self {
        let (mut runtime, _) = Self::new();
        runtime.reachable = false;
        runtime
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for ScriptedRuntime {
    async fn ping(&self) -> Result<()> {
        if self.reachable {
            Ok(())
        } else {
            Err(Error::runtime("socket not found"))
        }
    }

    async fn list_running(&self) -> Result<Vec<ContainerSnapshot>> {
        *self.handle.listed_at.lock().unwrap() = Some(SystemTime::now());
        Ok(self.handle.containers.lock().unwrap().clone())
    }

    async fn inspect(&self, container_id: &str) -> Result<ContainerSnapshot> {
        self.handle
            .containers
            .lock()
            .unwrap()
            .iter()
            .find(|c| c.id == container_id)
            .cloned()
            .ok_or_else(|| Error::runtime(format!("no such container: {container_id}")))
    }

    fn events(&self, since: SystemTime) -> RuntimeEventStream {
        *self.handle.subscribed_since.lock().unwrap() = Some(since);
        let rx = self
            .events_rx
            .lock()
            .unwrap()
            .take()
            .expect("events() can only be called once");
        Box::pin(tokio_stream::wrappers::UnboundedReceiverStream::new(rx))
    }

    fn runtime_name(&self) -> &'static str {
        "scripted"
    }
}

#[derive(Default)]
struct Zone {
    records: HashMap<(String, RecordType), Vec<RecordValue>>,
    sent: Vec<UpdateTransaction>,
    failures: VecDeque<ResponseCode>,
    fail_always: Option<ResponseCode>,
    delay: Duration,
}

/// An in-memory nameserver that records and applies updates
#[derive(Clone, Default)]
pub struct RecordingTransport {
    zone: Arc<Mutex<Zone>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Answer the next update with `code` (queued, one per update)
    pub fn fail_next(&self, code: ResponseCode) {
        self.zone.lock().unwrap().failures.push_back(code);
    }

    /// Answer every update with `code` until cleared
    pub fn fail_always(&self, code: Option<ResponseCode>) {
        self.zone.lock().unwrap().fail_always = code;
    }

    /// Delay every update
    pub fn set_delay(&self, delay: Duration) {
        self.zone.lock().unwrap().delay = delay;
    }

    /// Every transaction received, accepted or not
    pub fn sent(&self) -> Vec<UpdateTransaction> {
        self.zone.lock().unwrap().sent.clone()
    }

    pub fn sent_count(&self) -> usize {
        self.zone.lock().unwrap().sent.len()
    }

    /// TXT strings at the instance bookkeeping record
    pub fn owned_names(&self) -> BTreeSet<String> {
        self.txt(INSTANCE_RECORD).into_iter().collect()
    }

    pub fn txt(&self, fqdn: &str) -> Vec<String> {
        self.values(fqdn, RecordType::Txt)
            .into_iter()
            .filter_map(|v| match v {
                RecordValue::Txt(s) => Some(s),
                _ => None,
            })
            .collect()
    }

    pub fn a(&self, fqdn: &str) -> Vec<Ipv4Addr> {
        self.values(fqdn, RecordType::A)
            .into_iter()
            .filter_map(|v| match v {
                RecordValue::A(ip) => Some(ip),
                _ => None,
            })
            .collect()
    }

    fn values(&self, fqdn: &str, record_type: RecordType) -> Vec<RecordValue> {
        self.zone
            .lock()
            .unwrap()
            .records
            .get(&(fqdn.to_string(), record_type))
            .cloned()
            .unwrap_or_default()
    }

    /// Seed a TXT value, as left behind by an earlier run
    pub fn seed_txt(&self, fqdn: &str, value: &str) {
        self.zone
            .lock()
            .unwrap()
            .records
            .entry((fqdn.to_string(), RecordType::Txt))
            .or_default()
            .push(RecordValue::Txt(value.to_string()));
    }
}

#[async_trait::async_trait]
impl DnsTransport for RecordingTransport {
    async fn send_update(&self, transaction: &UpdateTransaction) -> Result<UpdateResponse> {
        let delay = self.zone.lock().unwrap().delay;
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let mut zone = self.zone.lock().unwrap();
        zone.sent.push(transaction.clone());

        let code = zone.failures.pop_front().or(zone.fail_always);
        if let Some(code) = code {
            return Ok(UpdateResponse::new(code));
        }

        for op in &transaction.ops {
            match op {
                UpdateOp::Add { name, value, .. } => {
                    let rrset = zone
                        .records
                        .entry((transaction.fqdn(name), value.record_type()))
                        .or_default();
                    if !rrset.contains(value) {
                        rrset.push(value.clone());
                    }
                }
                UpdateOp::DeleteRrset { name, record_type } => {
                    zone.records.remove(&(transaction.fqdn(name), *record_type));
                }
                UpdateOp::DeleteValue { name, value } => {
                    if let Some(rrset) = zone
                        .records
                        .get_mut(&(transaction.fqdn(name), value.record_type()))
                    {
                        rrset.retain(|v| v != value);
                    }
                }
            }
        }

        Ok(UpdateResponse::new(ResponseCode::NoError))
    }

    async fn query_txt(&self, fqdn: &str) -> Result<Vec<String>> {
        Ok(self.txt(fqdn))
    }

    fn transport_name(&self) -> &'static str {
        "recording"
    }
}

/// Configuration used by most contract tests
pub fn test_config() -> HostDnsConfig {
    let mut config = HostDnsConfig::new(ZONE).with_instance_name(INSTANCE);
    config.engine.retry_delay_secs = 0;
    config.engine.update_timeout_ms = 500;
    config
}

/// A container on the default bridge network
pub fn container(id: &str, name: &str, ip: [u8; 4]) -> ContainerSnapshot {
    ContainerSnapshot::new(id, format!("/{name}")).with_network(
        "bridge",
        NetworkAttachment {
            ipv4: Some(Ipv4Addr::from(ip)),
            ipv6: None,
            aliases: vec![],
        },
    )
}

pub fn names(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| s.to_string()).collect()
}

/// Build an engine over the given doubles
pub fn engine(
    runtime: ScriptedRuntime,
    transport: &RecordingTransport,
    config: HostDnsConfig,
) -> (ReconciliationEngine, mpsc::Receiver<EngineEvent>) {
    ReconciliationEngine::new(
        Box::new(runtime),
        Box::new(transport.clone()),
        InstanceLedger::new(),
        config,
    )
    .expect("engine construction succeeds")
}

/// Run an engine in the background, handing it back when it stops
pub fn spawn(
    mut engine: ReconciliationEngine,
    cancel: CancellationToken,
) -> JoinHandle<(ReconciliationEngine, hostdns_core::Result<StopReason>)> {
    tokio::spawn(async move {
        let result = engine.run(cancel).await;
        (engine, result)
    })
}

/// Wait for the next event matching `pred`, failing after one second
pub async fn wait_for<F>(rx: &mut mpsc::Receiver<EngineEvent>, mut pred: F) -> EngineEvent
where
    F: FnMut(&EngineEvent) -> bool,
{
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            let event = rx.recv().await.expect("engine event channel open");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("expected engine event within 1s")
}

/// Let the engine drain pending runtime events
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(50)).await;
}

//! Reconciliation engine
//!
//! The ReconciliationEngine is responsible for:
//! - Loading the names this instance owns from the zone's TXT bookkeeping record
//! - Reconciling them against the running containers at startup
//! - Publishing and retracting hosts as network events arrive
//! - Optionally clearing everything it published when it stops
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────┐
//! │ ContainerRuntime │─── RuntimeEvent ───┐
//! └──────────────────┘                    │
//!                                         ▼
//!                             ┌──────────────────────┐
//!                             │ ReconciliationEngine │
//!                             └──────────────────────┘
//!                                         │
//!         ┌───────────────────────────────┼───────────────────────────┐
//!         │                               │                           │
//!         ▼                               ▼                           ▼
//! ┌────────────────┐           ┌────────────────────┐        ┌─────────────┐
//! │ InstanceLedger │           │ TransactionBuilder │        │   Events    │
//! │ (owned)        │           │ → UpdateExecutor   │        │  (notify)   │
//! └────────────────┘           └────────────────────┘        └─────────────┘
//! ```
//!
//! ## State Machine
//!
//! `Initializing → Synced → (Reconciling → Synced)* → Stopping → Stopped`
//!
//! Events are handled strictly one at a time: the next event is not pulled
//! before the previous one's update has completed or failed, so updates for
//! a name reach the server in the order their events were observed.

use crate::config::{CollisionPolicy, HostDnsConfig};
use crate::error::{Error, Result};
use crate::executor::UpdateExecutor;
use crate::ledger::InstanceLedger;
use crate::names::{candidate_names, deduplicate, retain_publishable};
use crate::records::{Addresses, Delta, DesiredState, HostRecord, compute_delta, desired_state};
use crate::traits::{ContainerRuntime, ContainerSnapshot, DnsTransport, RuntimeEvent};
use crate::transaction::TransactionBuilder;
use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

/// Lifecycle state of the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    Initializing,
    Synced,
    Reconciling,
    Stopping,
    Stopped,
}

/// Why the event loop ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The cancellation token was triggered
    Cancelled,
    /// The runtime event stream broke or ended
    Disconnected,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Cancelled => "stop requested",
            Self::Disconnected => "container runtime connection lost",
        })
    }
}

/// Kind of DNS update, for logs and monitoring
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateKind {
    Add,
    Remove,
}

impl fmt::Display for UpdateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Add => "add",
            Self::Remove => "remove",
        })
    }
}

/// Events emitted by the ReconciliationEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Startup reconciliation finished
    Started { hosts: usize, containers: usize },

    /// Names were published
    HostsAdded { names: BTreeSet<String> },

    /// Names were retracted
    HostsRemoved { names: BTreeSet<String> },

    /// An update transaction failed; the ledger was left unchanged
    UpdateFailed {
        names: BTreeSet<String>,
        kind: UpdateKind,
        error: String,
    },

    /// A disconnect arrived for a container that was never tracked
    EventIgnored { container_id: String },

    /// Engine stopped
    Stopped { reason: StopReason },
}

/// Outcome of waiting for the next runtime event
enum Step {
    Next(RuntimeEvent),
    Cancelled,
    Disconnected,
}

/// Host DNS reconciliation engine
///
/// Owns the [`InstanceLedger`] exclusively. The builder and executor are
/// handed the names to change and never see the ledger; it is mutated here,
/// and only after the nameserver accepted an update.
///
/// ## Lifecycle
///
/// 1. Create with [`ReconciliationEngine::new()`]
/// 2. Start with [`ReconciliationEngine::run()`]
/// 3. Engine runs until the token is cancelled or the runtime goes away
///
/// ## Failure Policy
///
/// The executor never retries. A failed per-event update is retried up to
/// `engine.max_retries` times, then logged, reported as
/// [`EngineEvent::UpdateFailed`] and skipped. The ledger still holds the
/// pre-failure truth, so the next [`ReconciliationEngine::resync()`] or
/// restart computes the missing delta again.
pub struct ReconciliationEngine {
    /// Source of containers and network events
    runtime: Box<dyn ContainerRuntime>,

    /// Sends built transactions to the nameserver
    executor: UpdateExecutor,

    /// Zone and instance scoped transaction builder
    builder: TransactionBuilder,

    /// Names published by this instance and per-container claims
    ledger: InstanceLedger,

    tracked_networks: Vec<String>,
    collision_policy: CollisionPolicy,
    clear_on_exit: bool,

    /// Maximum retry attempts for per-event updates
    max_retries: usize,

    /// Delay between retries (in seconds)
    retry_delay_secs: u64,

    state: EngineState,

    /// Interrupts retry delays once a stop is requested
    shutdown: CancellationToken,

    /// Event sender for external monitoring
    event_tx: mpsc::Sender<EngineEvent>,
}

impl ReconciliationEngine {
    /// Create a new reconciliation engine
    ///
    /// # Parameters
    ///
    /// - `runtime`: Container runtime implementation
    /// - `transport`: DNS transport implementation
    /// - `ledger`: Ledger owned by this engine from now on
    /// - `config`: Synchronizer configuration
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        runtime: Box<dyn ContainerRuntime>,
        transport: Box<dyn DnsTransport>,
        ledger: InstanceLedger,
        config: HostDnsConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.engine.event_channel_capacity);

        let engine = Self {
            runtime,
            executor: UpdateExecutor::new(transport, config.engine.update_timeout()),
            builder: TransactionBuilder::new(config.zone_name(), &config.instance_name),
            ledger,
            tracked_networks: config
                .tracked_networks
                .iter()
                .map(|n| n.trim().to_string())
                .filter(|n| !n.is_empty())
                .collect(),
            collision_policy: config.collision_policy,
            clear_on_exit: config.clear_on_exit,
            max_retries: config.engine.max_retries,
            retry_delay_secs: config.engine.retry_delay_secs,
            state: EngineState::Initializing,
            shutdown: CancellationToken::new(),
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    pub fn state(&self) -> EngineState {
        self.state
    }

    pub fn ledger(&self) -> &InstanceLedger {
        &self.ledger
    }

    /// Absolute name of this instance's TXT bookkeeping record
    pub fn instance_record(&self) -> String {
        self.builder.instance_record_fqdn()
    }

    /// Run the engine until `cancel` fires or the runtime disconnects
    ///
    /// # Returns
    ///
    /// - `Ok(StopReason)`: Orderly stop
    /// - `Err(Error::Connection)`: The runtime could not be reached at startup
    /// - `Err(Error)`: Startup reconciliation or clearing on exit failed
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<StopReason> {
        self.shutdown = cancel.clone();
        self.state = EngineState::Initializing;

        // Taken before listing so the event stream replays anything that
        // happens during startup reconciliation
        let subscribe_from = SystemTime::now();

        if let Err(e) = self.initialize().await {
            self.state = EngineState::Stopped;
            return Err(e);
        }

        self.emit_event(EngineEvent::Started {
            hosts: self.ledger.hosts().len(),
            containers: self.ledger.tracked_containers(),
        });

        let mut events = self.runtime.events(subscribe_from);
        self.state = EngineState::Synced;

        // Main event loop
        let reason = loop {
            let step = tokio::select! {
                biased;

                _ = cancel.cancelled() => Step::Cancelled,

                item = events.next() => match item {
                    Some(Ok(event)) => Step::Next(event),
                    Some(Err(e)) => {
                        debug!("Runtime event stream failed: {}", e);
                        Step::Disconnected
                    }
                    None => Step::Disconnected,
                },
            };

            match step {
                Step::Next(event) => {
                    self.state = EngineState::Reconciling;
                    if let Err(e) = self.handle_event(event).await {
                        error!("Failed to handle runtime event: {}", e);
                        // Continue running despite errors
                    }
                    self.state = EngineState::Synced;
                }
                Step::Cancelled => {
                    info!("Stopping as requested");
                    break StopReason::Cancelled;
                }
                Step::Disconnected => {
                    info!("Container runtime connection broken - stopping");
                    break StopReason::Disconnected;
                }
            }
        };

        drop(events);
        self.stop(reason).await
    }

    /// Connect to the runtime, load owned names and reconcile the zone
    async fn initialize(&mut self) -> Result<()> {
        self.runtime.ping().await.map_err(|e| match e {
            Error::Connection(_) => e,
            other => Error::connection(format!(
                "Error communicating with {}: {}",
                self.runtime.runtime_name(),
                other
            )),
        })?;
        info!("Connected to {}", self.runtime.runtime_name());

        self.load_records().await?;
        self.resync().await?;

        Ok(())
    }

    async fn stop(&mut self, reason: StopReason) -> Result<StopReason> {
        self.state = EngineState::Stopping;

        let mut result = Ok(reason);
        if self.clear_on_exit {
            info!("Clearing {} published host(s) before exit", self.ledger.hosts().len());
            if let Err(e) = self.set_hosts(&DesiredState::new()).await {
                error!("Failed to clear published hosts on exit: {}", e);
                result = Err(e);
            }
        }

        self.state = EngineState::Stopped;
        self.emit_event(EngineEvent::Stopped { reason });
        info!("Engine stopped: {}", reason);

        result
    }

    /// Replace the published set with the instance's TXT bookkeeping record
    ///
    /// An absent record is an empty set.
    pub async fn load_records(&mut self) -> Result<()> {
        let fqdn = self.builder.instance_record_fqdn();
        let hosts = self.executor.load_records(&fqdn).await?;
        info!("Loaded {} owned host(s) from {}", hosts.len(), fqdn);
        self.ledger.replace_hosts(hosts);
        Ok(())
    }

    /// Reconcile the zone with `desired`
    ///
    /// Names missing from the ledger are added (one transaction per distinct
    /// address set), names not in `desired` are removed in one transaction.
    /// Stops at the first failure; earlier successful batches stay recorded.
    pub async fn set_hosts(&mut self, desired: &DesiredState) -> Result<Delta> {
        let delta = compute_delta(self.ledger.hosts(), desired);
        if delta.is_empty() {
            debug!("Zone already matches desired state");
            return Ok(delta);
        }

        for (names, addresses) in delta.add_batches() {
            self.add_host(&names, &addresses).await?;
        }

        if !delta.to_remove.is_empty() {
            self.remove_host(&delta.to_remove).await?;
        }

        Ok(delta)
    }

    /// Full reconciliation against the currently running containers
    ///
    /// Container claims are rebuilt from scratch in listing order, so the
    /// first container to claim a name keeps it.
    pub async fn resync(&mut self) -> Result<Delta> {
        let containers = self.runtime.list_running().await?;
        debug!("Runtime reports {} running container(s)", containers.len());

        self.ledger.clear_containers();
        let mut records = Vec::with_capacity(containers.len());
        for snapshot in &containers {
            if let Some(record) = self.claim(snapshot) {
                records.push(record);
            }
        }

        let desired = desired_state(&records);
        self.set_hosts(&desired).await
    }

    /// Publish `names` at `addresses` in one transaction
    ///
    /// On failure the ledger is unchanged.
    pub async fn add_host(&mut self, names: &BTreeSet<String>, addresses: &Addresses) -> Result<()> {
        debug!("Adding hosts {:?}", names);
        let transaction = self.builder.build_add(names, addresses);

        match self.executor.apply(&transaction).await {
            Ok(()) => {
                self.ledger.mark_added(names);
                self.emit_event(EngineEvent::HostsAdded {
                    names: names.clone(),
                });
                Ok(())
            }
            Err(e) => {
                self.report_failure(names, UpdateKind::Add, &e);
                Err(e)
            }
        }
    }

    /// Retract `names` in one transaction
    ///
    /// On failure the ledger is unchanged.
    pub async fn remove_host(&mut self, names: &BTreeSet<String>) -> Result<()> {
        debug!("Removing hosts {:?}", names);
        let transaction = self.builder.build_remove(names);

        match self.executor.apply(&transaction).await {
            Ok(()) => {
                self.ledger.mark_removed(names);
                self.emit_event(EngineEvent::HostsRemoved {
                    names: names.clone(),
                });
                Ok(())
            }
            Err(e) => {
                self.report_failure(names, UpdateKind::Remove, &e);
                Err(e)
            }
        }
    }

    /// Handle one runtime event
    pub async fn handle_event(&mut self, event: RuntimeEvent) -> Result<()> {
        match event {
            RuntimeEvent::NetworkConnect {
                container_id,
                network,
            } => {
                if !self.is_tracked_network(&network) {
                    trace!("Ignoring connect of {} to untracked network {}", container_id, network);
                    return Ok(());
                }
                debug!("Handling connect event for container {}", container_id);
                self.on_connect(&container_id).await
            }
            RuntimeEvent::NetworkDisconnect {
                container_id,
                network,
            } => {
                if !self.is_tracked_network(&network) {
                    trace!(
                        "Ignoring disconnect of {} from untracked network {}",
                        container_id, network
                    );
                    return Ok(());
                }
                debug!("Handling disconnect event for container {}", container_id);
                self.on_disconnect(&container_id).await
            }
            RuntimeEvent::Ignored { kind, action } => {
                trace!("Ignoring {} event {}", kind, action);
                Ok(())
            }
        }
    }

    async fn on_connect(&mut self, container_id: &str) -> Result<()> {
        let snapshot = match self.runtime.inspect(container_id).await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!("Container {} could not be inspected, skipping: {}", container_id, e);
                return Ok(());
            }
        };

        let record = self.resolve(&snapshot);
        if let Some(previous) = self.ledger.record_of(container_id) {
            let unchanged = previous == &record
                && previous.names.iter().all(|name| self.ledger.contains(name));
            if unchanged {
                debug!("Container {} is already published, nothing to do", container_id);
                return Ok(());
            }
            // Names or addresses changed: disconnect followed by connect
            debug!(
                "Container {} changed from {:?} to {:?}, republishing",
                container_id, previous, record
            );
            self.on_disconnect(container_id).await?;
        }

        if !record.is_publishable() {
            debug!(
                "Container {} has no publishable names or addresses on tracked networks",
                container_id
            );
            return Ok(());
        }

        info!(
            "Adding new entries {:?}:[ipv4:{:?}, ipv6:{:?}] for container {}",
            record.names, record.addresses.ipv4, record.addresses.ipv6, container_id
        );
        self.ledger.assign(container_id, record.clone());
        self.apply_with_retry(&record.names, Some(&record.addresses))
            .await
    }

    async fn on_disconnect(&mut self, container_id: &str) -> Result<()> {
        let Some(names) = self.ledger.names_of(container_id).cloned() else {
            debug!("Ignoring disconnect of untracked container {}", container_id);
            self.emit_event(EngineEvent::EventIgnored {
                container_id: container_id.to_string(),
            });
            return Ok(());
        };

        if !names.is_empty() {
            info!(
                "Removing entries {:?} as container {} disconnected",
                names, container_id
            );
            self.apply_with_retry(&names, None).await?;
        }

        self.ledger.release(container_id);
        Ok(())
    }

    /// Add (with addresses) or remove (without) honoring the retry policy
    async fn apply_with_retry(
        &mut self,
        names: &BTreeSet<String>,
        addresses: Option<&Addresses>,
    ) -> Result<()> {
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            let result = match addresses {
                Some(addresses) => self.add_host(names, addresses).await,
                None => self.remove_host(names).await,
            };

            match result {
                Ok(()) => return Ok(()),
                Err(e) => {
                    last_error = Some(e);

                    // Wait before retry (unless this was the last attempt)
                    if attempt < self.max_retries {
                        warn!("Update attempt {} failed for {:?}, retrying", attempt, names);
                        let delay = Duration::from_secs(self.retry_delay_secs);
                        tokio::select! {
                            _ = self.shutdown.cancelled() => {
                                debug!("Stop requested, abandoning retries for {:?}", names);
                                break;
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| Error::Other("Unknown error".to_string())))
    }

    /// Resolve a container and record its claim if publishable
    fn claim(&mut self, snapshot: &ContainerSnapshot) -> Option<HostRecord> {
        let record = self.resolve(snapshot);
        if !record.is_publishable() {
            trace!("Container {} has nothing to publish", snapshot.id);
            return None;
        }
        self.ledger.assign(snapshot.id.clone(), record.clone());
        Some(record)
    }

    /// Names and addresses a container would publish, deduplicated
    fn resolve(&self, snapshot: &ContainerSnapshot) -> HostRecord {
        let addresses = Addresses::of(snapshot, &self.tracked_networks);
        let candidates = candidate_names(snapshot, &self.tracked_networks);
        let existing = self.ledger.names_owned_by_others(&snapshot.id);
        let mut names = deduplicate(&snapshot.id, candidates, &existing, self.collision_policy);
        retain_publishable(&snapshot.id, &mut names, self.builder.zone());
        HostRecord::new(names, addresses)
    }

    fn is_tracked_network(&self, network: &str) -> bool {
        self.tracked_networks.iter().any(|n| n == network)
    }

    fn report_failure(&self, names: &BTreeSet<String>, kind: UpdateKind, error: &Error) {
        error!(
            "DNS {} update failed for hosts {:?} in zone {}: {}",
            kind,
            names,
            self.builder.zone(),
            error
        );
        self.emit_event(EngineEvent::UpdateFailed {
            names: names.clone(),
            kind,
            error: error.to_string(),
        });
    }

    /// Emit an engine event
    fn emit_event(&self, event: EngineEvent) {
        // Drop rather than block when nobody drains the channel
        match self.event_tx.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(event)) => {
                warn!(
                    "Event channel full, dropping {:?}. Consider increasing event_channel_capacity.",
                    event
                );
            }
            Err(TrySendError::Closed(_)) => {
                trace!("Event receiver dropped, not emitting");
            }
        }
    }
}

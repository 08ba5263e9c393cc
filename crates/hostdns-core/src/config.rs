//! Configuration types for the host DNS synchronizer
//!
//! This module defines all configuration structures used throughout the crate.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Network attached to containers when none is requested explicitly
pub const DEFAULT_NETWORK: &str = "bridge";

/// Zone managed when none is configured
pub const DEFAULT_ZONE: &str = "docker";

/// Main synchronizer configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostDnsConfig {
    /// DNS zone under management (e.g. "docker")
    pub zone: String,

    /// Nameserver receiving queries and updates
    #[serde(default = "default_dns_server")]
    pub dns_server: SocketAddr,

    /// Discriminator for the instance bookkeeping record
    ///
    /// Several instances may share one zone as long as their names differ.
    #[serde(default = "default_instance_name")]
    pub instance_name: String,

    /// TSIG key used to sign updates; unsigned updates when absent
    #[serde(default)]
    pub tsig: Option<TsigKeyConfig>,

    /// Runtime networks whose addresses and aliases are published
    #[serde(default = "default_tracked_networks")]
    pub tracked_networks: Vec<String>,

    /// Remove every published name when the engine stops
    #[serde(default)]
    pub clear_on_exit: bool,

    /// What to do when a candidate name is already owned by another container
    #[serde(default)]
    pub collision_policy: CollisionPolicy,

    /// Optional engine settings
    #[serde(default)]
    pub engine: EngineConfig,
}

impl HostDnsConfig {
    /// Create a configuration for `zone` with defaults everywhere else
    pub fn new(zone: impl Into<String>) -> Self {
        Self {
            zone: zone.into(),
            dns_server: default_dns_server(),
            instance_name: default_instance_name(),
            tsig: None,
            tracked_networks: default_tracked_networks(),
            clear_on_exit: false,
            collision_policy: CollisionPolicy::default(),
            engine: EngineConfig::default(),
        }
    }

    /// Set the instance name
    pub fn with_instance_name(mut self, name: impl Into<String>) -> Self {
        self.instance_name = name.into();
        self
    }

    /// Set the tracked networks
    pub fn with_tracked_networks<I, S>(mut self, networks: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tracked_networks = networks.into_iter().map(Into::into).collect();
        self
    }

    /// Enable or disable clearing the zone on exit
    pub fn with_clear_on_exit(mut self, clear_on_exit: bool) -> Self {
        self.clear_on_exit = clear_on_exit;
        self
    }

    /// Set the collision policy
    pub fn with_collision_policy(mut self, policy: CollisionPolicy) -> Self {
        self.collision_policy = policy;
        self
    }

    /// Zone without trailing dot
    pub fn zone_name(&self) -> &str {
        self.zone.trim_end_matches('.')
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.zone_name().is_empty() {
            return Err(crate::Error::config("DNS zone cannot be empty"));
        }

        if crate::names::normalize(&self.instance_name).is_empty() {
            return Err(crate::Error::config(format!(
                "Instance name {:?} has no DNS-safe characters",
                self.instance_name
            )));
        }

        if self.tracked_networks.iter().all(|n| n.trim().is_empty()) {
            return Err(crate::Error::config("At least one tracked network is required"));
        }

        if let Some(tsig) = &self.tsig {
            tsig.validate()?;
        }

        self.engine.validate()?;

        Ok(())
    }
}

/// TSIG credential
#[derive(Clone, Serialize, Deserialize)]
pub struct TsigKeyConfig {
    /// Key name as known to the nameserver
    pub name: String,

    /// HMAC algorithm (e.g. "hmac-sha256")
    #[serde(default = "default_tsig_algorithm")]
    pub algorithm: String,

    /// Base64 encoded secret
    /// ⚠️ NEVER log this value
    #[serde(skip_serializing)]
    pub secret: String,
}

impl TsigKeyConfig {
    pub fn new(name: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            algorithm: default_tsig_algorithm(),
            secret: secret.into(),
        }
    }

    /// Set the HMAC algorithm
    pub fn with_algorithm(mut self, algorithm: impl Into<String>) -> Self {
        self.algorithm = algorithm.into();
        self
    }

    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.name.trim().is_empty() {
            return Err(crate::Error::config("TSIG key name cannot be empty"));
        }
        if self.secret.trim().is_empty() {
            return Err(crate::Error::config("TSIG key secret cannot be empty"));
        }
        if self.algorithm.trim().is_empty() {
            return Err(crate::Error::config("TSIG algorithm cannot be empty"));
        }
        Ok(())
    }
}

// Custom Debug implementation that hides the secret
impl fmt::Debug for TsigKeyConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TsigKeyConfig")
            .field("name", &self.name)
            .field("algorithm", &self.algorithm)
            .field("secret", &"<REDACTED>")
            .finish()
    }
}

/// Policy applied when a candidate name is already owned by another container
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CollisionPolicy {
    /// Drop the colliding name
    #[default]
    Drop,
    /// Rename to `name-N` with the smallest free N
    Suffix,
}

impl std::str::FromStr for CollisionPolicy {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "drop" => Ok(Self::Drop),
            "suffix" => Ok(Self::Suffix),
            other => Err(crate::Error::config(format!(
                "Unknown collision policy '{other}' (expected drop or suffix)"
            ))),
        }
    }
}

/// Engine configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Additional attempts for a failed per-event update
    ///
    /// The default of 0 surfaces the first failure; startup reconciliation
    /// and shutdown clearing are never retried.
    #[serde(default)]
    pub max_retries: usize,

    /// Delay between retry attempts (in seconds)
    #[serde(default = "default_retry_delay_secs")]
    pub retry_delay_secs: u64,

    /// Timeout for a single update or query (in milliseconds)
    #[serde(default = "default_update_timeout_ms")]
    pub update_timeout_ms: u64,

    /// Capacity of the monitoring event channel
    ///
    /// When full, engine events are dropped with a warning log.
    #[serde(default = "default_event_channel_capacity")]
    pub event_channel_capacity: usize,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), crate::Error> {
        if self.update_timeout_ms == 0 {
            return Err(crate::Error::config("Update timeout must be > 0"));
        }
        if self.event_channel_capacity == 0 {
            return Err(crate::Error::config("Event channel capacity must be > 0"));
        }
        Ok(())
    }

    pub fn update_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.update_timeout_ms)
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_delay_secs: default_retry_delay_secs(),
            update_timeout_ms: default_update_timeout_ms(),
            event_channel_capacity: default_event_channel_capacity(),
        }
    }
}

/// Local hostname, or "localhost" when it cannot be determined
pub fn default_instance_name() -> String {
    hostname::get().map_or_else(
        |_| "localhost".to_string(),
        |h| h.to_string_lossy().into_owned(),
    )
}

fn default_dns_server() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 53))
}

fn default_tracked_networks() -> Vec<String> {
    vec![DEFAULT_NETWORK.to_string()]
}

fn default_tsig_algorithm() -> String {
    "hmac-sha256".to_string()
}

fn default_retry_delay_secs() -> u64 {
    5
}

fn default_update_timeout_ms() -> u64 {
    2000
}

fn default_event_channel_capacity() -> usize {
    1000
}

// # DNS Transport Trait
//
// Defines the interface for delivering dynamic DNS updates (RFC 2136) and
// reading back the instance bookkeeping record.
//
// ## Implementations
//
// - hickory-based TCP/UDP transport with optional TSIG: `hostdns-nameserver` crate
//
// ## Usage
//
// ```rust,ignore
// use hostdns_core::DnsTransport;
//
// #[tokio::main]
// async fn main() -> anyhow::Result<()> {
//     let transport = /* DnsTransport implementation */;
//
//     let owned = transport.query_txt("_container_host1.docker.").await?;
//     println!("names owned by this instance: {:?}", owned);
//
//     Ok(())
// }
// ```

use crate::transaction::UpdateTransaction;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

/// DNS response code as returned in the header of an update response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResponseCode {
    NoError,
    FormErr,
    ServFail,
    NXDomain,
    NotImp,
    Refused,
    YXDomain,
    YXRRSet,
    NXRRSet,
    NotAuth,
    NotZone,
    BadSig,
    /// Any code without a dedicated variant
    Other(u16),
}

impl ResponseCode {
    /// Map a numeric rcode to its variant
    pub fn from_u16(code: u16) -> Self {
        match code {
            0 => Self::NoError,
            1 => Self::FormErr,
            2 => Self::ServFail,
            3 => Self::NXDomain,
            4 => Self::NotImp,
            5 => Self::Refused,
            6 => Self::YXDomain,
            7 => Self::YXRRSet,
            8 => Self::NXRRSet,
            9 => Self::NotAuth,
            10 => Self::NotZone,
            16 => Self::BadSig,
            other => Self::Other(other),
        }
    }

    pub fn is_success(self) -> bool {
        self == Self::NoError
    }
}

impl fmt::Display for ResponseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NoError => "NOERROR",
            Self::FormErr => "FORMERR",
            Self::ServFail => "SERVFAIL",
            Self::NXDomain => "NXDOMAIN",
            Self::NotImp => "NOTIMP",
            Self::Refused => "REFUSED",
            Self::YXDomain => "YXDOMAIN",
            Self::YXRRSet => "YXRRSET",
            Self::NXRRSet => "NXRRSET",
            Self::NotAuth => "NOTAUTH",
            Self::NotZone => "NOTZONE",
            Self::BadSig => "BADSIG",
            Self::Other(code) => return write!(f, "RCODE{code}"),
        };
        f.write_str(text)
    }
}

/// Outcome of a delivered update transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpdateResponse {
    /// Response code from the nameserver
    pub code: ResponseCode,
}

impl UpdateResponse {
    pub fn new(code: ResponseCode) -> Self {
        Self { code }
    }
}

/// Trait for DNS transport implementations
///
/// A transport turns a logical [`UpdateTransaction`] into one wire message,
/// signs it when a key is configured, sends it and returns the response code.
///
/// # Trust Level: Untrusted
///
/// ## Allowed Capabilities
/// - Perform network I/O against the configured nameserver only
/// - Sign messages with the configured TSIG key
///
/// ## Forbidden Capabilities
/// - Retrying or backing off (owned by `ReconciliationEngine`)
/// - Interpreting response codes as success or failure (owned by `UpdateExecutor`)
/// - Reading or mutating the instance ledger
/// - Splitting one transaction into several messages
#[async_trait]
pub trait DnsTransport: Send + Sync {
    /// Send one update transaction as a single message
    ///
    /// # Returns
    ///
    /// - `Ok(UpdateResponse)`: A response was received (any rcode)
    /// - `Err(Error)`: The message could not be built, sent or answered
    async fn send_update(
        &self,
        transaction: &UpdateTransaction,
    ) -> Result<UpdateResponse, crate::Error>;

    /// Query all TXT strings stored at `fqdn`
    ///
    /// An absent answer (empty answer section or NXDOMAIN) is an empty vector.
    async fn query_txt(&self, fqdn: &str) -> Result<Vec<String>, crate::Error>;

    /// Get the transport name (for logging/debugging)
    fn transport_name(&self) -> &'static str;
}

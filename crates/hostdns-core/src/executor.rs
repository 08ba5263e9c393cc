//! Update executor
//!
//! Sends built transactions through a [`DnsTransport`] with a bounded
//! timeout and turns anything but `NOERROR` into [`Error::DnsUpdate`].
//! There is no retry here; callers own that policy.

use crate::error::{Error, Result};
use crate::traits::DnsTransport;
use crate::transaction::UpdateTransaction;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, trace};

/// Default timeout per update or query attempt
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct UpdateExecutor {
    transport: Box<dyn DnsTransport>,
    timeout: Duration,
}

impl UpdateExecutor {
    pub fn new(transport: Box<dyn DnsTransport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.transport_name()
    }

    /// Apply one transaction
    ///
    /// Empty transactions are not sent.
    pub async fn apply(&self, transaction: &UpdateTransaction) -> Result<()> {
        if transaction.is_empty() {
            trace!("Skipping empty update for zone {}", transaction.zone);
            return Ok(());
        }

        debug!(
            "Sending update with {} operation(s) to zone {} via {}",
            transaction.ops.len(),
            transaction.zone,
            self.transport.transport_name()
        );

        let response = tokio::time::timeout(self.timeout, self.transport.send_update(transaction))
            .await
            .map_err(|_| Error::dns_update(format!("no response within {:?}", self.timeout)))?
            .map_err(|e| match e {
                Error::DnsUpdate { .. } => e,
                other => Error::dns_update(other.to_string()),
            })?;

        if !response.code.is_success() {
            return Err(Error::rejected(response.code));
        }

        Ok(())
    }

    /// Read the TXT strings stored at `fqdn`
    pub async fn load_records(&self, fqdn: &str) -> Result<BTreeSet<String>> {
        let strings = tokio::time::timeout(self.timeout, self.transport.query_txt(fqdn))
            .await
            .map_err(|_| Error::transport(format!("query for {fqdn} timed out after {:?}", self.timeout)))??;

        Ok(strings.into_iter().collect())
    }
}

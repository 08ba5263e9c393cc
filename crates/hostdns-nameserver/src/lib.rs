// # Nameserver Transport
//
// RFC 2136 transport for hostdns, built on hickory.
//
// - Updates are sent over TCP, one message per transaction
// - The bookkeeping record is read with a plain TXT query over UDP
// - Updates are TSIG signed when a key is configured
// - Dry-run mode logs every update instead of sending it
//
// ## Architectural Constraints
//
// ### Trust Level: Untrusted (DNS Transport)
//
// **Allowed Capabilities**:
// - ✅ Open connections to the configured nameserver only
// - ✅ Build, sign and parse DNS messages
//
// **Forbidden Capabilities** (enforced by code review):
// - ❌ Implement retry logic (owned by ReconciliationEngine)
// - ❌ Interpret response codes beyond reporting them
// - ❌ Touch the ledger or decide which names to publish
// - ❌ Cache anything beyond a single request
//
// ## Security Requirements
//
// - The TSIG secret NEVER appears in logs or Debug output
// - An invalid key fails construction, not the first update

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use hickory_client::client::{Client, ClientConnection, SyncClient};
use hickory_client::op::{Message, MessageType, OpCode, Query};
use hickory_client::rr::rdata::tsig::TsigAlgorithm;
use hickory_client::rr::rdata::{A, AAAA, TXT};
use hickory_client::rr::{DNSClass, Name, RData, Record, RecordType as WireType};
use hickory_client::tcp::TcpClientConnection;
use hickory_client::udp::UdpClientConnection;
use hickory_proto::rr::dnssec::tsig::TSigner;
use hickory_proto::xfer::{DnsRequest, DnsRequestOptions};
use hostdns_core::config::{HostDnsConfig, TsigKeyConfig};
use hostdns_core::traits::{DnsTransport, ResponseCode, UpdateResponse};
use hostdns_core::transaction::{RecordType, RecordValue, UpdateOp, UpdateTransaction};
use hostdns_core::{Error, Result};
use std::net::SocketAddr;
use std::time::Duration;
use tracing::{debug, info, trace, warn};

/// Allowed clock skew for TSIG signatures, in seconds
const TSIG_FUDGE_SECS: u16 = 300;

/// Transport talking to a single authoritative nameserver
///
/// # Dry-Run Mode
///
/// When `dry_run` is true the transport:
/// - Still queries the bookkeeping record
/// - Logs every operation of an update
/// - **Never** sends the update and reports `NOERROR`
pub struct NameserverTransport {
    server: SocketAddr,
    timeout: Duration,
    signer: Option<TSigner>,
    key_name: Option<String>,
    dry_run: bool,
}

// Custom Debug implementation that hides the signing key
impl std::fmt::Debug for NameserverTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameserverTransport")
            .field("server", &self.server)
            .field("timeout", &self.timeout)
            .field("key_name", &self.key_name)
            .field("signer", &self.signer.as_ref().map(|_| "<REDACTED>"))
            .field("dry_run", &self.dry_run)
            .finish()
    }
}

impl NameserverTransport {
    /// Create an unsigned transport
    pub fn new(server: SocketAddr, timeout: Duration, dry_run: bool) -> Self {
        Self {
            server,
            timeout,
            signer: None,
            key_name: None,
            dry_run,
        }
    }

    /// Sign updates with `key`
    pub fn with_tsig(mut self, key: &TsigKeyConfig) -> Result<Self> {
        self.signer = Some(create_tsig_signer(key)?);
        self.key_name = Some(key.name.clone());
        Ok(self)
    }

    /// Build the transport described by the synchronizer configuration
    pub fn from_config(config: &HostDnsConfig, dry_run: bool) -> Result<Self> {
        if dry_run {
            warn!("Nameserver transport running in DRY-RUN mode - no changes will be made");
        }

        let transport = Self::new(config.dns_server, config.engine.update_timeout(), dry_run);
        match &config.tsig {
            Some(key) => transport.with_tsig(key),
            None => {
                debug!("No TSIG key configured, updates will be unsigned");
                Ok(transport)
            }
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }
}

#[async_trait]
impl DnsTransport for NameserverTransport {
    async fn send_update(&self, transaction: &UpdateTransaction) -> Result<UpdateResponse> {
        let message = build_update_message(transaction)?;

        if self.dry_run {
            for op in &transaction.ops {
                info!("[DRY-RUN] Would send to {}: {}", self.server, describe(transaction, op));
            }
            return Ok(UpdateResponse::new(ResponseCode::NoError));
        }

        let server = self.server;
        let timeout = self.timeout;
        let signer = self.signer.clone();

        let code = tokio::task::spawn_blocking(move || -> Result<u16> {
            let conn = TcpClientConnection::with_timeout(server, timeout)
                .map_err(|e| Error::transport(format!("Failed to connect to {server}: {e}")))?;
            let client = client(conn, signer);

            let request = DnsRequest::new(message, DnsRequestOptions::default());
            let response = client
                .send(request)
                .into_iter()
                .next()
                .ok_or_else(|| Error::transport(format!("No response from {server}")))?
                .map_err(|e| Error::transport(format!("Update to {server} failed: {e}")))?;

            Ok(u16::from(response.response_code()))
        })
        .await
        .map_err(|e| Error::transport(format!("DNS update task failed: {e}")))??;

        let code = ResponseCode::from_u16(code);
        trace!("Nameserver {} answered {}", self.server, code);
        Ok(UpdateResponse::new(code))
    }

    async fn query_txt(&self, fqdn: &str) -> Result<Vec<String>> {
        let name = parse_name(fqdn)?;
        let server = self.server;
        let timeout = self.timeout;

        tokio::task::spawn_blocking(move || {
            let conn = UdpClientConnection::with_timeout(server, timeout)
                .map_err(|e| Error::transport(format!("Failed to open UDP socket for {server}: {e}")))?;
            let client = SyncClient::new(conn);

            let response = client
                .query(&name, DNSClass::IN, WireType::TXT)
                .map_err(|e| Error::transport(format!("TXT query for {name} failed: {e}")))?;

            let code = ResponseCode::from_u16(u16::from(response.response_code()));
            match code {
                ResponseCode::NoError => {}
                ResponseCode::NXDomain => return Ok(Vec::new()),
                other => {
                    return Err(Error::transport(format!(
                        "TXT query for {name} answered {other}"
                    )));
                }
            }

            let mut strings = Vec::new();
            for record in response.answers() {
                if let Some(RData::TXT(txt)) = record.data() {
                    strings.extend(
                        txt.txt_data()
                            .iter()
                            .map(|bytes| String::from_utf8_lossy(bytes).into_owned()),
                    );
                }
            }
            Ok(strings)
        })
        .await
        .map_err(|e| Error::transport(format!("DNS query task failed: {e}")))?
    }

    fn transport_name(&self) -> &'static str {
        "nameserver"
    }
}

fn client<CC: ClientConnection>(conn: CC, signer: Option<TSigner>) -> SyncClient<CC> {
    match signer {
        Some(signer) => SyncClient::with_tsigner(conn, signer),
        None => SyncClient::new(conn),
    }
}

/// Map a TSIG algorithm name to its hickory variant
///
/// Accepts the short names (`hmac-sha256`) as well as the legacy
/// `hmac-md5.sig-alg.reg.int` spelling, case-insensitively.
pub fn parse_algorithm(name: &str) -> Result<TsigAlgorithm> {
    let normalized = name.trim().trim_end_matches('.').to_ascii_lowercase();
    match normalized.as_str() {
        "hmac-md5" | "hmac-md5.sig-alg.reg.int" => Ok(TsigAlgorithm::HmacMd5),
        "hmac-sha1" => Ok(TsigAlgorithm::HmacSha1),
        "hmac-sha224" => Ok(TsigAlgorithm::HmacSha224),
        "hmac-sha256" => Ok(TsigAlgorithm::HmacSha256),
        "hmac-sha384" => Ok(TsigAlgorithm::HmacSha384),
        "hmac-sha512" => Ok(TsigAlgorithm::HmacSha512),
        _ => Err(Error::config(format!("Unsupported TSIG algorithm: {name}"))),
    }
}

/// Build a TSIG signer from the configured key
pub fn create_tsig_signer(key: &TsigKeyConfig) -> Result<TSigner> {
    key.validate()?;

    let algorithm = parse_algorithm(&key.algorithm)?;
    let key_bytes = BASE64
        .decode(key.secret.trim())
        .map_err(|_| Error::config(format!("TSIG secret for key {} is not valid base64", key.name)))?;
    let key_name = parse_name(&key.name)?;

    TSigner::new(key_bytes, algorithm, key_name, TSIG_FUDGE_SECS)
        .map_err(|e| Error::config(format!("Failed to create TSIG signer for {}: {e}", key.name)))
}

/// Encode a transaction as an RFC 2136 update message
///
/// The zone section names the zone's SOA; every operation becomes one
/// record in the update section.
pub fn build_update_message(transaction: &UpdateTransaction) -> Result<Message> {
    let zone = parse_name(&format!("{}.", transaction.zone))?;

    let mut zone_query = Query::query(zone, WireType::SOA);
    zone_query.set_query_class(DNSClass::IN);

    let mut message = Message::new();
    message
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Update)
        .set_recursion_desired(false);
    message.add_query(zone_query);

    for op in &transaction.ops {
        message.add_name_server(to_record(transaction, op)?);
    }

    Ok(message)
}

fn to_record(transaction: &UpdateTransaction, op: &UpdateOp) -> Result<Record> {
    let owner = parse_name(&transaction.fqdn(op.name()))?;

    let record = match op {
        UpdateOp::Add { ttl, value, .. } => {
            let mut record = Record::from_rdata(owner, *ttl, rdata(value));
            record.set_dns_class(DNSClass::IN);
            record
        }
        UpdateOp::DeleteRrset { record_type, .. } => {
            let mut record = Record::with(owner, wire_type(*record_type), 0);
            record.set_dns_class(DNSClass::ANY);
            record
        }
        UpdateOp::DeleteValue { value, .. } => {
            let mut record = Record::from_rdata(owner, 0, rdata(value));
            record.set_dns_class(DNSClass::NONE);
            record
        }
    };

    Ok(record)
}

fn rdata(value: &RecordValue) -> RData {
    match value {
        RecordValue::A(ip) => RData::A(A::from(*ip)),
        RecordValue::Aaaa(ip) => RData::AAAA(AAAA::from(*ip)),
        RecordValue::Txt(text) => RData::TXT(TXT::new(vec![text.clone()])),
    }
}

fn wire_type(record_type: RecordType) -> WireType {
    match record_type {
        RecordType::A => WireType::A,
        RecordType::Aaaa => WireType::AAAA,
        RecordType::Txt => WireType::TXT,
    }
}

fn parse_name(name: &str) -> Result<Name> {
    Name::from_ascii(name).map_err(|e| Error::invalid_input(format!("Invalid DNS name {name:?}: {e}")))
}

fn describe(transaction: &UpdateTransaction, op: &UpdateOp) -> String {
    match op {
        UpdateOp::Add { name, ttl, value } => {
            format!("add {} {} {} {}", transaction.fqdn(name), ttl, value.record_type(), show(value))
        }
        UpdateOp::DeleteRrset { name, record_type } => {
            format!("delete {} {}", transaction.fqdn(name), record_type)
        }
        UpdateOp::DeleteValue { name, value } => {
            format!("delete {} {} {}", transaction.fqdn(name), value.record_type(), show(value))
        }
    }
}

fn show(value: &RecordValue) -> String {
    match value {
        RecordValue::A(ip) => ip.to_string(),
        RecordValue::Aaaa(ip) => ip.to_string(),
        RecordValue::Txt(text) => format!("{text:?}"),
    }
}

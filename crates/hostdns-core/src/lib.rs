// # hostdns-core
//
// Core library keeping a dynamic DNS zone in sync with the containers
// running on one host.
//
// ## Architecture Overview
//
// - **ContainerRuntime**: Trait for listing containers and following network events
// - **DnsTransport**: Trait for sending RFC 2136 updates and reading TXT records
// - **names**: Container identifiers → DNS-safe labels, collision handling
// - **records**: Desired state and delta computation against the ledger
// - **InstanceLedger**: Names this instance has published
// - **TransactionBuilder**: Delta → update operations (host, wildcard, TXT bookkeeping)
// - **UpdateExecutor**: Timeout-bounded delivery and response code checking
// - **ReconciliationEngine**: Startup reconciliation and the per-event loop
//
// ## Design Principles
//
// 1. **Separation of Concerns**: Runtime and DNS I/O live behind traits in other crates
// 2. **Event-Driven**: Network connect/disconnect events drive incremental updates
// 3. **Single Mutator**: Only the engine touches the ledger, and only after success
// 4. **Scoped Ownership**: Each instance owns exactly the names listed in its TXT record
// 5. **Idempotency**: Reconciling twice against the same containers sends nothing

pub mod config;
pub mod engine;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod names;
pub mod records;
pub mod traits;
pub mod transaction;

// Re-export core types for convenience
pub use config::{CollisionPolicy, EngineConfig, HostDnsConfig, TsigKeyConfig};
pub use engine::{EngineEvent, EngineState, ReconciliationEngine, StopReason, UpdateKind};
pub use error::{Error, Result};
pub use executor::UpdateExecutor;
pub use ledger::InstanceLedger;
pub use records::{Addresses, Delta, DesiredState, HostRecord};
pub use traits::{ContainerRuntime, ContainerSnapshot, DnsTransport, RuntimeEvent};
pub use transaction::{TransactionBuilder, UpdateTransaction};

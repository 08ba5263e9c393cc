//! Architectural Contract Test: Idle Behavior
//!
//! This test verifies that the engine does NO work when there are no runtime events.
//!
//! Constraints verified:
//! - No DNS updates are sent without runtime events once the zone is in sync
//! - The runtime is listed once at startup, not polled
//! - An unreachable runtime fails startup with a connection error
//!
//! If this test fails, someone has added:
//! - Polling loops
//! - Background periodic tasks
//! - Unnecessary DNS updates

mod common;

use common::*;
use hostdns_core::traits::{
    ContainerRuntime, ContainerSnapshot, RuntimeEvent, RuntimeEventStream,
};
use hostdns_core::{EngineEvent, Error, EngineState, InstanceLedger, ReconciliationEngine};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn idle_no_dns_updates_without_events() {
    let (runtime, handle) = ScriptedRuntime::new();
    handle.start(container("c1", "web", [10, 0, 0, 5]));
    let transport = RecordingTransport::new();

    let (engine, mut events) = engine(runtime, &transport, test_config());
    let cancel = CancellationToken::new();
    let task = spawn(engine, cancel.clone());

    wait_for(&mut events, |e| matches!(e, EngineEvent::Started { .. })).await;
    let after_startup = transport.sent_count();

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.sent_count(), after_startup, "idle engine must not send updates");

    cancel.cancel();
    let (_, result) = task.await.expect("engine task completes");
    assert!(result.is_ok(), "engine shuts down cleanly");
}

#[tokio::test]
async fn idle_no_runtime_polling() {
    struct CountingRuntime {
        list_calls: Arc<AtomicUsize>,
        inspect_calls: Arc<AtomicUsize>,
    }

    #[async_trait::async_trait]
    impl ContainerRuntime for CountingRuntime {
        async fn ping(&self) -> hostdns_core::Result<()> {
            Ok(())
        }

        async fn list_running(&self) -> hostdns_core::Result<Vec<ContainerSnapshot>> {
            self.list_calls.fetch_add(1, Ordering::SeqCst);
            Ok(vec![])
        }

        async fn inspect(&self, container_id: &str) -> hostdns_core::Result<ContainerSnapshot> {
            self.inspect_calls.fetch_add(1, Ordering::SeqCst);
            Err(Error::runtime(format!("no such container: {container_id}")))
        }

        fn events(&self, _since: SystemTime) -> RuntimeEventStream {
            // Never yields
            Box::pin(tokio_stream::pending::<hostdns_core::Result<RuntimeEvent>>())
        }

        fn runtime_name(&self) -> &'static str {
            "counting"
        }
    }

    let list_calls = Arc::new(AtomicUsize::new(0));
    let inspect_calls = Arc::new(AtomicUsize::new(0));
    let runtime = CountingRuntime {
        list_calls: Arc::clone(&list_calls),
        inspect_calls: Arc::clone(&inspect_calls),
    };
    let transport = RecordingTransport::new();

    let (engine, mut events) = ReconciliationEngine::new(
        Box::new(runtime),
        Box::new(transport.clone()),
        InstanceLedger::new(),
        test_config(),
    )
    .expect("engine construction succeeds");

    let cancel = CancellationToken::new();
    let task = spawn(engine, cancel.clone());
    wait_for(&mut events, |e| matches!(e, EngineEvent::Started { .. })).await;

    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(list_calls.load(Ordering::SeqCst), 1, "listed once at startup");
    assert_eq!(inspect_calls.load(Ordering::SeqCst), 0, "nothing inspected while idle");
    assert_eq!(transport.sent_count(), 0);

    cancel.cancel();
    let _ = task.await.unwrap();
}

#[tokio::test]
async fn unreachable_runtime_fails_startup() {
    let transport = RecordingTransport::new();
    let (engine, _events) = engine(ScriptedRuntime::unreachable(), &transport, test_config());

    let (engine, result) = spawn(engine, CancellationToken::new()).await.unwrap();

    assert!(matches!(result, Err(Error::Connection(_))));
    assert!(result.unwrap_err().is_fatal());
    assert_eq!(engine.state(), EngineState::Stopped);
    assert_eq!(transport.sent_count(), 0);
}

//! Projection loop fed through the same broadcast channel the indexer publishes on.

mod common;

use alloy::primitives::U256;
use common::*;
use registry::{
    run_projection, Cursor, FaultPolicy, MemoryStore, PipelineError, ProjectionStats,
    ProjectorConfig, Projector,
};
use tokio::sync::broadcast;
use tokio_test::assert_ok;

#[tokio::test]
async fn applies_events_in_delivery_order() {
    init_tracing();
    let (tx, rx) = broadcast::channel(64);
    let mut chain = Chain::new();
    let a1 = addr(0xa1);
    let id = op_id(0xff);

    let events = vec![
        pubkey_registered(a1, (1, 2), (3, 4), chain.log()),
        socket_update(id, "1.2.3.4:9000", chain.log()),
        registered(a1, id, chain.next_block()),
        stake_update(id, 0, 500, chain.next_block()),
        stake_update(id, 1, 900, chain.log()),
        set_params(1, chain.log()),
    ];
    let last = events.last().map(|e| e.provenance).unwrap();
    for ev in &events {
        tx.send(ev.clone()).unwrap();
    }
    // Redelivery after a reconnect.
    tx.send(events[3].clone()).unwrap();
    drop(tx);

    let mut projector = Projector::new(MemoryStore::new());
    let stats = assert_ok!(run_projection(rx, &mut projector, &ProjectorConfig::default()).await);
    assert_eq!(
        stats,
        ProjectionStats {
            applied: 6,
            duplicates: 1,
            faults: 0
        }
    );

    let op = operator(projector.store(), a1).unwrap();
    assert!(op.registered);
    assert_eq!(op.socket.as_deref(), Some("1.2.3.4:9000"));
    assert_eq!(op.stake, Some(U256::from(500)));
    assert_eq!(Cursor::load(projector.store()).unwrap(), Some(Cursor::at(&last)));
}

#[tokio::test]
async fn skip_policy_continues_past_fault() {
    init_tracing();
    let (tx, rx) = broadcast::channel(16);
    let mut chain = Chain::new();
    let a1 = addr(0xa1);

    tx.send(stake_update(op_id(0x42), 0, 1, chain.log())).unwrap();
    tx.send(pubkey_registered(a1, (1, 2), (3, 4), chain.log())).unwrap();
    drop(tx);

    let mut projector = Projector::new(MemoryStore::new());
    let stats = run_projection(rx, &mut projector, &ProjectorConfig::default())
        .await
        .unwrap();
    assert_eq!(stats.faults, 1);
    assert_eq!(stats.applied, 1);
    assert!(operator(projector.store(), a1).is_some());
}

#[tokio::test]
async fn halt_policy_stops_at_fault() {
    init_tracing();
    let (tx, rx) = broadcast::channel(16);
    let mut chain = Chain::new();
    let a1 = addr(0xa1);

    tx.send(deregistered(a1, op_id(0x42), chain.log())).unwrap();
    tx.send(pubkey_registered(a1, (1, 2), (3, 4), chain.log())).unwrap();
    drop(tx);

    let config = ProjectorConfig {
        fault_policy: FaultPolicy::Halt,
    };
    let mut projector = Projector::new(MemoryStore::new());
    let err = run_projection(rx, &mut projector, &config).await.unwrap_err();
    assert!(matches!(err, PipelineError::Projection { .. }));
    assert!(operator(projector.store(), a1).is_none());
}

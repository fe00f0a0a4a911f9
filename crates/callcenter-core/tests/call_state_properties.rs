//! Call-state invariants: idempotent status callbacks, monotonic progress, crash recovery

mod common;

use std::sync::Arc;

use callcenter_core::prelude::*;
use common::*;

async fn placed_call(center: &TestCenter) -> CallSession {
    let registry = center.engine.registry();
    let session = registry
        .create(NewCall::outbound("+15550001111"))
        .await
        .unwrap();
    registry.place_call(&session.id, None).await.unwrap()
}

#[tokio::test]
async fn repeated_status_callback_is_idempotent() {
    let center = center().await;
    let registry = center.engine.registry();
    let session = placed_call(&center).await;

    let once = registry.apply_provider_status(&session.id, "in-progress").await.unwrap();
    let twice = registry.apply_provider_status(&session.id, "in-progress").await.unwrap();
    assert_eq!(once, twice);

    let ended = registry.apply_provider_status(&session.id, "completed").await.unwrap();
    let again = registry.apply_provider_status(&session.id, "completed").await.unwrap();
    assert_eq!(ended, again);
    assert_eq!(center.engine.get_stats().await.registry.ended_total, 1);
}

#[tokio::test]
async fn status_never_regresses() {
    let center = center().await;
    let registry = center.engine.registry();
    let session = placed_call(&center).await;

    let mut seen = Vec::new();
    for status in ["ringing", "in-progress", "ringing", "queued", "in-progress", "completed", "ringing", "busy"] {
        let current = registry.apply_provider_status(&session.id, status).await.unwrap();
        seen.push(current.status);
    }

    for pair in seen.windows(2) {
        assert!(pair[0].rank() <= pair[1].rank(), "{:?} regressed to {:?}", pair[0], pair[1]);
    }
    assert_eq!(*seen.last().unwrap(), CallStatus::Completed);
}

#[tokio::test]
async fn unknown_provider_status_fails_call() {
    let center = center().await;
    let registry = center.engine.registry();
    let session = placed_call(&center).await;

    let ended = registry
        .apply_provider_status(&session.id, "carrier-exploded")
        .await
        .unwrap();
    assert_eq!(ended.status, CallStatus::Failed);
    assert!(!registry.is_live(&session.id));
}

async fn engine_on(db: Arc<DatabaseManager>) -> Arc<CallCenterEngine> {
    CallCenterEngine::builder()
        .with_config(test_config())
        .with_provider(Arc::new(SimulatedProvider::new()))
        .with_database(db)
        .build()
        .await
        .unwrap()
}

#[tokio::test]
async fn restart_recovers_live_calls_and_sweeps_stale_ones() {
    let db = Arc::new(DatabaseManager::new_in_memory().await.unwrap());

    let first = engine_on(db.clone()).await;
    let live = first
        .registry()
        .create(NewCall::outbound("+15550001111"))
        .await
        .unwrap();
    let live = first.registry().place_call(&live.id, None).await.unwrap();
    let mut stale = first
        .registry()
        .create(NewCall::outbound("+15550002222"))
        .await
        .unwrap();
    stale.start_time = Utc::now() - chrono::Duration::hours(2);
    db.save_session(&stale).await.unwrap();
    drop(first);

    let second = engine_on(db.clone()).await;
    second.start().await.unwrap();

    let recovered = second.registry().get(&live.id).unwrap();
    assert_eq!(recovered.status, CallStatus::Initiated);
    assert!(second
        .registry()
        .find_by_provider_id(live.provider_call_id.as_ref().unwrap())
        .is_some());

    let swept = second.registry().get(&stale.id).unwrap();
    assert_eq!(swept.status, CallStatus::NoAnswer);
    assert_eq!(swept.end_reason, Some(EndReason::RingingTimeout));

    let db_ref = db.clone();
    assert!(
        eventually(|| {
            let db = db_ref.clone();
            async move { db.count_call_records().await.unwrap() == 1 }
        })
        .await
    );
    second.shutdown().await;
}


use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use uuid::Uuid;

use orc::config::EngineConfig;
use orc::engine::Engine;
use orc::error::EngineError;
use orc::registry::HandlerRegistry;
use orc::scheduler::{JobOptions, JobStatus};
use orc::store::{JobStore, MemoryStore};

use test_harness::{
    test_config, wait_for_status, wait_for_terminal, AlwaysFail, FailNTimes, IgnoresCancellation,
    SleepHandler, WaitsForCancel,
};

#[tokio::test]
async fn five_jobs_two_workers_all_succeed_with_bounded_concurrency() {
    let handler = SleepHandler::new(Duration::from_millis(50));
    let max_running = handler.max_running.clone();

    let mut registry = HandlerRegistry::new();
    registry.register("sleep", Arc::new(handler));
    let engine = Engine::start(test_config(), registry, Arc::new(MemoryStore::new()))
        .await
        .unwrap();

    let mut ids = Vec::new();
    for n in 0..5 {
        ids.push(
            engine
                .submit("sleep", json!({"n": n}), JobOptions::default())
                .await
                .unwrap(),
        );
    }

    for id in ids {
        let job = wait_for_terminal(&engine, id, Duration::from_secs(2)).await;
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.attempt, 1);
    }
    assert!(
        max_running.load(std::sync::atomic::Ordering::SeqCst) <= 2,
        "more jobs ran concurrently than there are worker slots"
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn slow_handler_times_out_at_its_deadline() {
    let mut registry = HandlerRegistry::new();
    registry.register(
        "slow",
        Arc::new(SleepHandler::new(Duration::from_millis(500))),
    );
    let engine = Engine::start(test_config(), registry, Arc::new(MemoryStore::new()))
        .await
        .unwrap();

    let id = engine
        .submit(
            "slow",
            json!(null),
            JobOptions {
                timeout: Some(Duration::from_millis(25)),
                max_attempts: Some(1),
            },
        )
        .await
        .unwrap();

    let job = wait_for_terminal(&engine, id, Duration::from_secs(2)).await;
    assert_eq!(job.status, JobStatus::TimedOut);
    assert_eq!(job.attempt, 1);

    // Observed duration tracks the deadline, not the handler's sleep.
    let elapsed = (job.finished_at.unwrap() - job.started_at.unwrap())
        .to_std()
        .unwrap();
    assert!(
        elapsed < Duration::from_millis(400),
        "timed-out job took {elapsed:?}, expected roughly its 25ms deadline"
    );

    engine.shutdown().await;
}

#[tokio::test]
async fn uncooperative_handler_is_reaped_and_the_slot_reused() {
    let mut registry = HandlerRegistry::new();
    registry.register(
        "stubborn",
        Arc::new(IgnoresCancellation {
            duration: Duration::from_secs(30),
        }),
    );
    registry.register("quick", Arc::new(SleepHandler::new(Duration::ZERO)));

    let config = EngineConfig {
        worker_count: 1,
        cancel_grace: Duration::from_millis(100),
        ..test_config()
    };
    let engine = Engine::start(config, registry, Arc::new(MemoryStore::new()))
        .await
        .unwrap();

    let stubborn = engine
        .submit(
            "stubborn",
            json!(null),
            JobOptions {
                timeout: Some(Duration::from_millis(50)),
                max_attempts: Some(1),
            },
        )
        .await
        .unwrap();
    let job = wait_for_terminal(&engine, stubborn, Duration::from_secs(2)).await;
    assert_eq!(job.status, JobStatus::TimedOut);

    // The single slot must be free again for the next job.
    let quick = engine
        .submit("quick", json!(null), JobOptions::default())
        .await
        .unwrap();
    let job = wait_for_terminal(&engine, quick, Duration::from_secs(2)).await;
    assert_eq!(job.status, JobStatus::Succeeded);

    engine.shutdown().await;
}

#[tokio::test]
async fn retries_then_succeeds_within_ceiling() {
    let mut registry = HandlerRegistry::new();
    registry.register("flaky", Arc::new(FailNTimes::new(2)));
    let engine = Engine::start(test_config(), registry, Arc::new(MemoryStore::new()))
        .await
        .unwrap();

    let id = engine
        .submit(
            "flaky",
            json!(null),
            JobOptions {
                max_attempts: Some(3),
                ..JobOptions::default()
            },
        )
        .await
        .unwrap();

    let job = wait_for_terminal(&engine, id, Duration::from_secs(2)).await;
    assert_eq!(job.status, JobStatus::Succeeded);
    assert_eq!(job.attempt, 3);
    assert_eq!(job.result, Some(json!({"succeeded_on_call": 3})));

    engine.shutdown().await;
}

#[tokio::test]
async fn exhausted_retries_end_failed_with_attempt_at_ceiling() {
    let mut registry = HandlerRegistry::new();
    registry.register("doomed", Arc::new(AlwaysFail));
    let engine = Engine::start(test_config(), registry, Arc::new(MemoryStore::new()))
        .await
        .unwrap();

    let id = engine
        .submit(
            "doomed",
            json!(null),
            JobOptions {
                max_attempts: Some(2),
                ..JobOptions::default()
            },
        )
        .await
        .unwrap();

    let job = wait_for_terminal(&engine, id, Duration::from_secs(2)).await;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.attempt, 2);
    assert_eq!(job.error_detail.as_deref(), Some("permanent failure"));

    engine.shutdown().await;
}

#[tokio::test]
async fn unknown_kind_is_rejected_before_persistence() {
    let store = Arc::new(MemoryStore::new());
    let mut registry = HandlerRegistry::new();
    registry.register("known", Arc::new(SleepHandler::new(Duration::ZERO)));
    let engine = Engine::start(test_config(), registry, store.clone())
        .await
        .unwrap();

    let err = engine
        .submit("unknown", json!(null), JobOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, EngineError::UnknownKind(_)));
    assert!(store.is_empty().await);

    engine.shutdown().await;
}

#[tokio::test]
async fn cancel_running_job_stops_it_without_retry() {
    let mut registry = HandlerRegistry::new();
    registry.register("waits", Arc::new(WaitsForCancel));
    let engine = Engine::start(test_config(), registry, Arc::new(MemoryStore::new()))
        .await
        .unwrap();

    let id = engine
        .submit("waits", json!(null), JobOptions::default())
        .await
        .unwrap();
    wait_for_status(&engine, id, JobStatus::Running, Duration::from_secs(2)).await;

    engine.cancel(id).await.unwrap();
    let job = wait_for_status(&engine, id, JobStatus::Cancelled, Duration::from_secs(2)).await;
    assert!(job.finished_at.is_some());
    assert_eq!(job.attempt, 1);

    engine.shutdown().await;
}

#[tokio::test]
async fn cancel_unknown_job_is_not_found() {
    let engine = Engine::start(
        test_config(),
        HandlerRegistry::new(),
        Arc::new(MemoryStore::new()),
    )
    .await
    .unwrap();

    assert!(matches!(
        engine.cancel(Uuid::new_v4()).await,
        Err(EngineError::NotFound(_))
    ));
    engine.shutdown().await;
}

#[tokio::test]
async fn shutdown_on_last_attempt_requeues_instead_of_failing() {
    // A cooperative handler errors out the moment its token fires on
    // shutdown; that interruption must not be charged against the retry
    // ceiling, even when no attempts remain.
    let store = Arc::new(MemoryStore::new());
    let mut registry = HandlerRegistry::new();
    registry.register("waits", Arc::new(WaitsForCancel));
    let engine = Engine::start(test_config(), registry, store.clone())
        .await
        .unwrap();

    let id = engine
        .submit(
            "waits",
            json!(null),
            JobOptions {
                max_attempts: Some(1),
                ..JobOptions::default()
            },
        )
        .await
        .unwrap();
    wait_for_status(&engine, id, JobStatus::Running, Duration::from_secs(2)).await;

    engine.shutdown().await;

    let job = store.get(id).await.unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.attempt, 1);
    assert!(job.finished_at.is_none());
}

#[tokio::test]
async fn shutdown_requeues_inflight_work_in_store() {
    let store = Arc::new(MemoryStore::new());
    let mut registry = HandlerRegistry::new();
    registry.register("waits", Arc::new(WaitsForCancel));
    let engine = Engine::start(test_config(), registry, store.clone())
        .await
        .unwrap();

    let running = engine
        .submit("waits", json!(null), JobOptions::default())
        .await
        .unwrap();
    wait_for_status(&engine, running, JobStatus::Running, Duration::from_secs(2)).await;

    engine.shutdown().await;

    // The interrupted attempt is back to Queued for the next startup.
    let job = store.get(running).await.unwrap();
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.attempt, 1);
}

//! End-to-end loader scenarios against mock collaborators.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use shapeload_loader::{
    join_background, CacheError, Deadline, DeadlineError, GateStatus, InitParams, LoadOutcome,
    LoaderConfig, LoaderError, LoaderKey, QuerySet, ReadState, ResultStore, RouteLoader,
    ShapeError, Stage, SyncClient, SyncPath,
};
use shapeload_test_utils::fixtures::{pending_loader, ready_loader, single_query, TestLoader};
use shapeload_test_utils::{
    EventLog, FixedTabIdentity, ManualLiveQueries, MockDriver, MockEngine, MockReadiness,
    MockShape, SyncTrigger,
};

#[tokio::test]
async fn test_ready_shapes_load_and_read_home() {
    let (loader, _client, _live) = ready_loader();
    let issues = MockShape::ready("issues");

    let outcome = loader
        .load(
            "home",
            |_| vec![issues.handle()],
            single_query("count", json!(5)),
        )
        .await
        .expect("load");

    let mut report = outcome.into_report().expect("loaded");
    assert_eq!(report.sync_path, SyncPath::NonBlocking);
    assert_eq!(report.key, LoaderKey::new("home"));

    let values = loader.read("home").expect("read");
    assert_eq!(values.len(), 1);
    assert_eq!(values["count"], json!(5));

    let background = report.take_background().expect("background sync");
    join_background(background).await.expect("background completes");
    assert!(issues.is_synced());
}

#[tokio::test]
async fn test_rejecting_predicate_blocks_until_sync() {
    let (loader, _client, _live) = ready_loader();
    let loader = Arc::new(loader);
    let log = EventLog::new();
    let trigger = SyncTrigger::new();
    let issues = Arc::new(
        MockShape::new("issues", MockReadiness::Fails)
            .with_trigger(trigger.clone())
            .with_log(log.clone()),
    );

    let pending = {
        let loader = Arc::clone(&loader);
        let issues = Arc::clone(&issues);
        let log = log.clone();
        tokio::spawn(async move {
            let queries = QuerySet::new().with_query("count", move || {
                let log = log.clone();
                async move {
                    log.push("query:count");
                    Ok(json!(3))
                }
            });
            loader.load("issues", move |_| vec![issues.handle()], queries).await
        })
    };

    for _ in 0..10 {
        tokio::task::yield_now().await;
    }
    assert!(!pending.is_finished());
    assert!(log.entries().is_empty());

    trigger.release();
    let outcome = pending.await.expect("join").expect("load");
    let report = outcome.into_report().expect("loaded");
    assert_eq!(report.sync_path, SyncPath::Blocking);
    assert_eq!(issues.ready_calls(), 1);

    assert_eq!(log.entries(), vec!["sync:issues", "query:count"]);
    assert_eq!(loader.read("issues").expect("read")["count"], json!(3));
}

#[tokio::test]
async fn test_rejected_blocking_sync_fails_load_without_caching() {
    let (loader, _client, _live) = ready_loader();
    let log = EventLog::new();
    let issues = Arc::new(
        MockShape::new("issues", MockReadiness::NotReady).with_sync_failure("shape stream closed"),
    );

    let queries = QuerySet::new().with_query("count", {
        let log = log.clone();
        move || {
            let log = log.clone();
            async move {
                log.push("query:count");
                Ok(json!(3))
            }
        }
    });
    let err = loader
        .load("issues", |_| vec![issues.handle()], queries)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LoaderError::Shape(ShapeError::SyncFailed { ref shape, .. }) if shape == "issues"
    ));
    assert!(!issues.is_synced());
    assert!(log.entries().is_empty());
    assert!(loader.store().is_empty());
    assert!(loader.read("issues").unwrap_err().is_not_found());
}

#[tokio::test]
async fn test_rejected_background_sync_surfaces_on_join() {
    let (loader, _client, _live) = ready_loader();
    let issues = Arc::new(
        MockShape::new("issues", MockReadiness::Ready).with_sync_failure("shape stream closed"),
    );

    let outcome = loader
        .load("home", |_| vec![issues.handle()], single_query("count", json!(5)))
        .await
        .expect("non-blocking load succeeds");
    let mut report = outcome.into_report().expect("loaded");
    assert_eq!(report.sync_path, SyncPath::NonBlocking);
    assert_eq!(loader.read("home").expect("read")["count"], json!(5));

    let background = report.take_background().expect("background sync");
    let err = join_background(background).await.unwrap_err();
    assert!(matches!(
        err,
        LoaderError::Shape(ShapeError::SyncFailed { ref shape, .. }) if shape == "issues"
    ));
    assert!(!issues.is_synced());
}

#[tokio::test]
async fn test_read_missing_key_has_distinct_conditions() {
    let (loader, _client, _live) = ready_loader();
    let key = LoaderKey::new("missing");

    let definitions_err = loader.read("missing").unwrap_err();
    assert_eq!(
        definitions_err,
        LoaderError::Cache(CacheError::DefinitionsNotFound { key: key.clone() })
    );
    assert!(definitions_err.is_not_found());

    let snapshot_err = loader.store().get_result(&key).unwrap_err();
    assert_eq!(
        snapshot_err,
        LoaderError::Cache(CacheError::SnapshotNotFound { key })
    );
    assert!(snapshot_err.is_not_found());
    assert_ne!(definitions_err.to_string(), snapshot_err.to_string());
    assert!(definitions_err.to_string().contains("Queries not found for missing"));
    assert!(snapshot_err
        .to_string()
        .contains("precached query results not found for missing"));
}

#[tokio::test]
async fn test_logged_out_before_initialize_skips_pending_load() {
    let (loader, _live) = pending_loader();
    let loader = Arc::new(loader);

    let pending = {
        let loader = Arc::clone(&loader);
        tokio::spawn(async move {
            loader
                .load("home", |_| Vec::new(), single_query("count", json!(5)))
                .await
        })
    };
    tokio::task::yield_now().await;
    assert!(!pending.is_finished());

    assert!(loader.signal_logged_out());
    let outcome = pending.await.expect("join").expect("skipped, not failed");
    assert!(matches!(outcome, LoadOutcome::Skipped));
    assert!(loader.store().is_empty());
    assert!(loader.read("home").unwrap_err().is_not_found());

    // A later initialize cannot un-reject the gate.
    let client = loader
        .initialize(
            InitParams::new("linearlite", "/wasm/driver", (), ()),
            &FixedTabIdentity("tab-1".to_string()),
            &MockDriver::new(),
            &MockEngine::new(),
        )
        .await
        .expect("initialize");
    assert_eq!(client.db().name, "linearlite-tab-1.db");
    assert_eq!(loader.gate_status(), GateStatus::LoggedOut);

    let later = loader
        .load("home", |_| Vec::new(), single_query("count", json!(5)))
        .await
        .expect("load");
    assert!(!later.is_loaded());
}

#[tokio::test]
async fn test_load_waits_for_initialize() {
    let (loader, _live) = pending_loader();
    let loader = Arc::new(loader);

    let pending = {
        let loader = Arc::clone(&loader);
        tokio::spawn(async move {
            loader
                .load(
                    "home",
                    |db| {
                        assert_eq!(db.name, "app-tab-9.db");
                        Vec::new()
                    },
                    single_query("count", json!(1)),
                )
                .await
        })
    };
    tokio::task::yield_now().await;
    assert!(!pending.is_finished());

    loader
        .initialize(
            InitParams::new("app", "/driver", (), ()),
            &FixedTabIdentity("tab-9".to_string()),
            &MockDriver::new(),
            &MockEngine::new(),
        )
        .await
        .expect("initialize");

    let outcome = pending.await.expect("join").expect("load");
    assert!(outcome.is_loaded());
    assert_eq!(loader.read("home").expect("read")["count"], json!(1));
}

#[tokio::test]
async fn test_failing_query_leaves_previous_entry() {
    let (loader, _client, _live) = ready_loader();
    loader
        .load("home", |_| Vec::new(), single_query("count", json!(1)))
        .await
        .expect("first load");

    let err = loader
        .load(
            "home",
            |_| Vec::new(),
            QuerySet::new()
                .with_query("count", || async { Ok(json!(2)) })
                .with_query("broken", || async {
                    Err(LoaderError::from(shapeload_loader::QueryError::Rejected(
                        "relation does not exist".to_string(),
                    )))
                }),
        )
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LoaderError::Query(shapeload_loader::QueryError::Failed { ref query, .. }) if query == "broken"
    ));

    let values = loader.read("home").expect("read");
    assert_eq!(values["count"], json!(1));
    assert!(!values.contains_key("broken"));
}

#[tokio::test(start_paused = true)]
async fn test_stuck_query_hits_load_deadline() {
    let live = ManualLiveQueries::new();
    let loader: TestLoader = RouteLoader::in_memory(
        LoaderConfig::default().with_load_timeout(Duration::from_secs(2)),
        live,
    );
    loader.signal_ready(Arc::new(shapeload_test_utils::MockClient::new("db")));

    let err = loader
        .load(
            "home",
            |_| Vec::new(),
            QuerySet::new().with_query("stuck", || std::future::pending()),
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LoaderError::Deadline(DeadlineError::Elapsed { stage: Stage::Query })
    );
    assert!(loader.store().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_explicit_deadline_bounds_blocking_sync() {
    let (loader, _client, _live) = ready_loader();
    let never_synced = Arc::new(
        MockShape::new("comments", MockReadiness::NotReady).with_trigger(SyncTrigger::new()),
    );

    let err = loader
        .load_with_deadline(
            "issue/42",
            |_| vec![never_synced.handle()],
            single_query("comments", json!([])),
            &Deadline::after(Duration::from_millis(250)),
        )
        .await
        .unwrap_err();
    assert_eq!(
        err,
        LoaderError::Deadline(DeadlineError::Elapsed { stage: Stage::Sync })
    );
}

#[tokio::test]
async fn test_live_values_replace_snapshot_after_full_delivery() {
    let (loader, _client, live) = ready_loader();
    loader
        .load(
            "home",
            |_| Vec::new(),
            QuerySet::new()
                .with_query("count", || async { Ok(json!(5)) })
                .with_query("open", || async { Ok(json!(2)) })
                .with_literal("title", "Inbox"),
        )
        .await
        .expect("load");

    assert_eq!(
        loader.read_reconciled("home").expect("read").state,
        ReadState::Snapshot
    );
    live.push("home", "count", json!(6));
    let partial = loader.read("home").expect("read");
    assert_eq!(partial["count"], json!(5));

    live.push("home", "open", json!(3));
    let read = loader.read_reconciled("home").expect("read");
    assert_eq!(read.state, ReadState::Live);
    assert_eq!(read.values["count"], json!(6));
    assert_eq!(read.values["open"], json!(3));
    assert_eq!(read.values["title"], json!("Inbox"));
    assert_eq!(live.subscriptions(), 2);

    assert!(loader.release("home").expect("release"));
    assert_eq!(loader.read("home").expect("read")["count"], json!(5));
    assert_eq!(live.subscriptions(), 4);
}

#[tokio::test]
async fn test_keys_load_independently() {
    let (loader, _client, _live) = ready_loader();
    let (home, about) = tokio::join!(
        loader.load("home", |_| Vec::new(), single_query("count", json!(5))),
        loader.load("about", |_| Vec::new(), single_query("version", json!("1.0"))),
    );
    home.expect("home");
    about.expect("about");

    assert_eq!(
        loader.store().keys().expect("keys"),
        vec![LoaderKey::new("about"), LoaderKey::new("home")]
    );
    assert_eq!(loader.store().stats().puts, 2);
}

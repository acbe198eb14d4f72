//! Loader reads backed by the change-feed live queries.

use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use shapeload_loader::{
    ChangeFeedLiveQueries, ChangeNotice, InMemoryResultStore, LoaderConfig, QuerySet, ReadState,
    ResultStore, RouteLoader,
};
use shapeload_test_utils::MockClient;
use tokio::sync::broadcast;

/// Counter query: every run returns the current row count.
fn count_query(rows: &Arc<AtomicI64>) -> QuerySet {
    let rows = Arc::clone(rows);
    QuerySet::new()
        .with_query("count", move || {
            let rows = Arc::clone(&rows);
            async move { Ok(json!(rows.load(Ordering::SeqCst))) }
        })
        .with_literal("title", "Issues")
}

async fn read_until_live(loader: &RouteLoader<MockClient>, count: i64) {
    for _ in 0..100 {
        let read = loader.read_reconciled("issues").expect("read");
        if read.state == ReadState::Live && read.values["count"] == json!(count) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("live value {count} never arrived");
}

#[tokio::test]
async fn test_change_feed_upgrades_and_tracks_writes() {
    let (feed, _) = broadcast::channel(16);
    let config = LoaderConfig::default().with_live_query_timeout(Duration::from_secs(5));
    let live = ChangeFeedLiveQueries::for_config(&config, feed.clone());
    let loader: RouteLoader<MockClient> =
        RouteLoader::new(config, Arc::new(InMemoryResultStore::new()), live);
    loader.signal_ready(Arc::new(MockClient::new("app-tab.db")));

    let rows = Arc::new(AtomicI64::new(5));
    loader
        .load("issues", |_| Vec::new(), count_query(&rows))
        .await
        .expect("load");

    let first = loader.read_reconciled("issues").expect("read");
    assert_eq!(first.values["count"], json!(5));
    assert_eq!(first.values["title"], json!("Issues"));

    read_until_live(&loader, 5).await;

    rows.store(6, Ordering::SeqCst);
    feed.send(ChangeNotice {
        tables: vec!["issue".to_string()],
    })
    .expect("publish");
    read_until_live(&loader, 6).await;

    let snapshot = loader
        .store()
        .get_result(&"issues".into())
        .expect("snapshot");
    assert_eq!(snapshot.results["count"], json!(5));
}

// tests/metrics.rs
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{self, Body};
use http::{Request, StatusCode};
use metrics_exporter_prometheus::PrometheusBuilder;
use reddit_harvester::ingest::{IngestManager, Targets};
use reddit_harvester::metrics::router_for;
use reddit_harvester::store::memory::MemoryStore;
use reddit_harvester::{Harvest, Post, RecordWriter, SourceClient, SourceError};
use tower::ServiceExt;

struct HalfDown;

#[async_trait]
impl SourceClient for HalfDown {
    async fn fetch(&self, source: &str, _limit: u32) -> Result<Harvest, SourceError> {
        if source == "down" {
            return Err(SourceError::Unavailable {
                feed: source.into(),
                attempts: 2,
                reason: "timeout".into(),
            });
        }
        Ok(Harvest {
            posts: vec![Post {
                id: "t3_x".into(),
                title: "x".into(),
                created: 5.0,
                source: source.into(),
            }],
            comments: vec![],
        })
    }

    fn name(&self) -> &'static str {
        "half-down"
    }
}

#[tokio::test]
async fn metrics_endpoint_exposes_harvest_series() {
    let recorder = PrometheusBuilder::new().build_recorder();
    let handle = recorder.handle();
    let _guard = metrics::set_default_local_recorder(&recorder);

    let store = Arc::new(MemoryStore::new());
    let manager = IngestManager::new(
        Arc::new(HalfDown),
        Arc::new(RecordWriter::new(store)),
        Targets::default(),
        10,
    );
    manager
        .run_cycle(&["rust".to_string(), "down".to_string(), "rust".to_string()])
        .await;

    let resp = router_for(handle)
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);

    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    for needle in [
        "harvest_cycles_total 1",
        "harvest_source_errors_total 1",
        "harvest_records_inserted_total 1",
        "harvest_duplicates_total 1",
        "harvest_cycle_ms",
        "harvest_last_cycle_ts",
    ] {
        assert!(text.contains(needle), "missing `{needle}` in:\n{text}");
    }
}

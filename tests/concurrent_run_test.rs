use httpmock::prelude::*;
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tube_etl::core::fetcher::RetryPolicy;
use tube_etl::{
    EtlError, HttpVideoApi, IncrementalLoader, MetricsPipeline, PipelineSettings, RunOutcome,
    RunRequest,
};

async fn pipeline_against(server: &MockServer, retry: RetryPolicy) -> Arc<MetricsPipeline> {
    let api = HttpVideoApi::new(server.base_url(), Duration::from_secs(5)).unwrap();
    let loader = IncrementalLoader::connect("sqlite::memory:").await.unwrap();
    Arc::new(MetricsPipeline::new(
        Arc::new(api),
        loader,
        PipelineSettings {
            api_keys: vec!["test-key".to_string()],
            retry,
            ..Default::default()
        },
    ))
}

fn request(id: &str) -> RunRequest {
    RunRequest {
        video_ids: vec![id.to_string()],
        observation_date: chrono::NaiveDate::from_ymd_opt(2024, 3, 7),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_overlapping_runs_are_rejected() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/videos").query_param("part", "snippet");
        then.status(200)
            .delay(Duration::from_millis(500))
            .json_body(json!({
                "items": [{"id": "slowVideo01", "snippet": {"title": "V", "channelId": "UCx"}}]
            }));
    });
    server.mock(|when, then| {
        when.method(GET).path("/videos").query_param("part", "statistics");
        then.status(200).json_body(json!({
            "items": [{"id": "slowVideo01", "statistics": {"viewCount": "1"}}]
        }));
    });

    let pipeline = pipeline_against(
        &server,
        RetryPolicy {
            max_attempts: 0,
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(100),
        },
    )
    .await;

    let background = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.run(request("slowVideo01")).await })
    };

    // Give the first run time to take the lock and stall on the slow mock.
    tokio::time::sleep(Duration::from_millis(100)).await;

    let err = pipeline.run(request("slowVideo01")).await.unwrap_err();
    assert!(matches!(err, EtlError::RunInProgress));

    let first = background.await.unwrap().unwrap();
    assert_eq!(first.outcome, RunOutcome::Success);

    // With the lock released, the next run proceeds.
    let again = pipeline.run(request("slowVideo01")).await.unwrap();
    assert!(again.succeeded());
}

#[tokio::test]
async fn test_cancellation_aborts_backoff_promptly() {
    let server = MockServer::start();
    server.mock(|when, then| {
        when.method(GET).path("/videos");
        then.status(500);
    });

    // Long backoff: without cancellation this run would sleep ~30s.
    let pipeline = pipeline_against(
        &server,
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_secs(30),
            max_delay: Duration::from_secs(60),
        },
    )
    .await;

    let started = Instant::now();
    let background = {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move { pipeline.run(request("doomedVideo")).await })
    };

    tokio::time::sleep(Duration::from_millis(200)).await;
    pipeline.cancel();

    let record = background.await.unwrap().unwrap();
    assert_eq!(record.outcome, RunOutcome::Failed);
    assert!(started.elapsed() < Duration::from_secs(5));
}

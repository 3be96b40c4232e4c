use crate::core::cache::ResponseCache;
use crate::core::extractor::BatchExtractor;
use crate::core::fetcher::{RetryPolicy, RetryingFetcher};
use crate::core::loader::IncrementalLoader;
use crate::core::rate_limiter::{QuotaLimiter, SlotUsage};
use crate::core::validator::Validator;
use crate::domain::model::{EntityKind, PipelineRunRecord, RunOutcome};
use crate::domain::ports::VideoApi;
use crate::utils::error::{EtlError, Result};
use crate::utils::monitor::{HealthStatus, PipelineMonitor};
use chrono::{NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Everything the engine needs beyond the API client and the datastore.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub api_keys: Vec<String>,
    pub quota_ceiling: u64,
    pub quota_window: Duration,
    pub batch_size: usize,
    pub worker_pool_size: usize,
    pub retry: RetryPolicy,
    pub cache_ttl: Duration,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            api_keys: Vec::new(),
            quota_ceiling: 10_000,
            quota_window: Duration::from_secs(24 * 3600),
            batch_size: 50,
            worker_pool_size: 4,
            retry: RetryPolicy::default(),
            cache_ttl: Duration::from_secs(3600),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    pub channel_ids: Vec<String>,
    pub video_ids: Vec<String>,
    /// Logical observation date; defaults to today.
    pub observation_date: Option<NaiveDate>,
    /// Bypass the response cache for this run. Quota state is untouched.
    pub full_refresh: bool,
}

/// Sequences Extract -> Validate/Enrich -> Load and aggregates the run
/// record. One owned limiter/cache instance per pipeline, passed explicitly
/// to the components that need them.
pub struct MetricsPipeline {
    extractor: Arc<BatchExtractor>,
    validator: Validator,
    loader: IncrementalLoader,
    limiter: Arc<QuotaLimiter>,
    monitor: Arc<PipelineMonitor>,
    cancel: CancellationToken,
    run_lock: tokio::sync::Mutex<()>,
}

impl MetricsPipeline {
    pub fn new(api: Arc<dyn VideoApi>, loader: IncrementalLoader, settings: PipelineSettings) -> Self {
        let cancel = CancellationToken::new();
        let limiter = Arc::new(QuotaLimiter::new(
            &settings.api_keys,
            settings.quota_ceiling,
            settings.quota_window,
        ));
        let cache = Arc::new(ResponseCache::new());
        let fetcher = Arc::new(RetryingFetcher::new(
            Arc::clone(&limiter),
            cache,
            settings.retry.clone(),
            cancel.clone(),
        ));
        let extractor = Arc::new(BatchExtractor::new(
            api,
            fetcher,
            settings.batch_size,
            settings.worker_pool_size,
            settings.cache_ttl,
            cancel.clone(),
        ));

        Self {
            extractor,
            validator: Validator::new(),
            loader,
            limiter,
            monitor: Arc::new(PipelineMonitor::new()),
            cancel,
            run_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Run the pipeline for the requested entity set. Only one run may be in
    /// flight; a second caller gets `RunInProgress` instead of interleaved
    /// loads. Partial failures degrade the outcome, they never raise.
    pub async fn run(&self, request: RunRequest) -> Result<PipelineRunRecord> {
        let _guard = self
            .run_lock
            .try_lock()
            .map_err(|_| EtlError::RunInProgress)?;

        let started_at = Utc::now();
        let observation_date = request
            .observation_date
            .unwrap_or_else(|| Utc::now().date_naive());

        tracing::info!(
            channels = request.channel_ids.len(),
            videos = request.video_ids.len(),
            %observation_date,
            full_refresh = request.full_refresh,
            "pipeline run starting"
        );

        let mut extract = self
            .extractor
            .extract(EntityKind::Channel, &request.channel_ids, request.full_refresh)
            .await;
        extract.merge(
            self.extractor
                .extract(EntityKind::Video, &request.video_ids, request.full_refresh)
                .await,
        );

        let extracted = extract.records.len();
        let degraded = extract.is_degraded();
        tracing::info!(
            extracted,
            batches = extract.batches_total,
            cache_hits = extract.cache_hits,
            api_retries = extract.retries,
            failed_batches = extract.failures.len(),
            "extraction finished"
        );

        if extract.is_total_failure() || extracted == 0 {
            let summary = if extract.failures.is_empty() {
                "nothing extracted".to_string()
            } else {
                format!(
                    "extraction failed for all {} batches: {}",
                    extract.batches_total,
                    extract
                        .failures
                        .first()
                        .map(|f| f.error.as_str())
                        .unwrap_or("unknown")
                )
            };
            return Ok(self
                .finalize(PipelineRunRecord {
                    started_at,
                    finished_at: Utc::now(),
                    observation_date,
                    outcome: RunOutcome::Failed,
                    extracted,
                    validated: 0,
                    rejected: 0,
                    loaded: 0,
                    load_failed: 0,
                    dimensions_inserted: 0,
                    dimensions_updated: 0,
                    facts_inserted: 0,
                    facts_updated: 0,
                    batch_failures: extract.failures,
                    error_summary: Some(summary),
                })
                .await);
        }

        let validation = self.validator.process_all(extract.records);
        let validated = validation.accepted.len();
        let rejected = validation.rejected.len();

        let (load_report, load_error) = match self
            .loader
            .load(&validation.accepted, observation_date)
            .await
        {
            Ok(report) => (report, None),
            Err(err) => (Default::default(), Some(err.to_string())),
        };

        let loaded = load_report.entities_loaded();
        let outcome = if loaded == 0 {
            RunOutcome::Failed
        } else if degraded || !load_report.failed.is_empty() {
            RunOutcome::SuccessWithWarnings
        } else {
            RunOutcome::Success
        };

        let error_summary = match (&outcome, load_error) {
            (_, Some(err)) => Some(err),
            (RunOutcome::Failed, None) => Some("zero entities loaded".to_string()),
            (RunOutcome::SuccessWithWarnings, None) => {
                let mut parts = Vec::new();
                if degraded {
                    parts.push(format!("{} batch(es) failed", extract.failures.len()));
                }
                if !load_report.failed.is_empty() {
                    parts.push(format!("{} entity load(s) failed", load_report.failed.len()));
                }
                Some(parts.join("; "))
            }
            _ => None,
        };

        let record = PipelineRunRecord {
            started_at,
            finished_at: Utc::now(),
            observation_date,
            outcome,
            extracted,
            validated,
            rejected,
            loaded,
            load_failed: load_report.failed.len(),
            dimensions_inserted: load_report.dimensions_inserted,
            dimensions_updated: load_report.dimensions_updated,
            facts_inserted: load_report.facts_inserted,
            facts_updated: load_report.facts_updated,
            batch_failures: extract.failures,
            error_summary,
        };

        Ok(self.finalize(record).await)
    }

    async fn finalize(&self, record: PipelineRunRecord) -> PipelineRunRecord {
        if let Err(err) = self.loader.record_run(&record).await {
            tracing::warn!(error = %err, "failed to persist run record");
        }
        self.monitor.record(&record);
        record
    }

    /// Abort in-flight batch workers and pending backoff sleeps.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn quota_usage(&self) -> Vec<SlotUsage> {
        self.limiter.usage().await
    }

    pub fn health_status(&self) -> HealthStatus {
        self.monitor.health_status()
    }

    pub fn recent_runs(&self, limit: usize) -> Vec<PipelineRunRecord> {
        self.monitor.recent(limit)
    }

    pub fn loader(&self) -> &IncrementalLoader {
        &self.loader
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::{ApiPart, ApiResponse};
    use crate::utils::error::{FetchError, FetchErrorKind};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FakeApi {
        fail_ids: Vec<String>,
        calls: AtomicUsize,
    }

    impl FakeApi {
        fn new(fail_ids: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                fail_ids: fail_ids.iter().map(|s| s.to_string()).collect(),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl VideoApi for FakeApi {
        async fn list(
            &self,
            kind: EntityKind,
            part: ApiPart,
            ids: &[String],
            _api_key: &str,
        ) -> std::result::Result<ApiResponse, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if ids.iter().any(|id| self.fail_ids.contains(id)) {
                return Err(FetchError::new(FetchErrorKind::NotFound, "scripted 404"));
            }
            let items: Vec<serde_json::Value> = ids
                .iter()
                .map(|id| match (kind, part) {
                    (EntityKind::Channel, ApiPart::Snippet) => json!({
                        "id": id,
                        "snippet": {"title": format!("Channel {}", id)}
                    }),
                    (EntityKind::Channel, ApiPart::Statistics) => json!({
                        "id": id,
                        "statistics": {
                            "viewCount": "1000",
                            "subscriberCount": "100",
                            "videoCount": "10"
                        }
                    }),
                    (EntityKind::Video, ApiPart::Snippet) => json!({
                        "id": id,
                        "snippet": {"title": format!("Video {}", id), "channelId": "UCx"}
                    }),
                    (EntityKind::Video, ApiPart::Statistics) => json!({
                        "id": id,
                        "statistics": {
                            "viewCount": "500",
                            "likeCount": "50",
                            "commentCount": "5"
                        }
                    }),
                })
                .collect();
            Ok(json!({"items": items}).into())
        }
    }

    async fn pipeline(api: Arc<FakeApi>, batch_size: usize) -> MetricsPipeline {
        let loader = IncrementalLoader::connect("sqlite::memory:").await.unwrap();
        MetricsPipeline::new(
            api,
            loader,
            PipelineSettings {
                api_keys: vec!["k".to_string()],
                batch_size,
                retry: RetryPolicy {
                    max_attempts: 0,
                    base_delay: Duration::from_millis(1),
                    max_delay: Duration::from_millis(10),
                },
                ..Default::default()
            },
        )
    }

    fn ids(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 7).unwrap()
    }

    #[tokio::test]
    async fn test_clean_run_is_success_with_granular_counts() {
        let pipeline = pipeline(FakeApi::new(&[]), 50).await;

        let record = pipeline
            .run(RunRequest {
                channel_ids: ids(&["UCa"]),
                video_ids: ids(&["v1", "v2"]),
                observation_date: Some(date()),
                full_refresh: false,
            })
            .await
            .unwrap();

        assert_eq!(record.outcome, RunOutcome::Success);
        assert!(record.succeeded());
        assert_eq!(record.extracted, 3);
        assert_eq!(record.validated, 3);
        assert_eq!(record.rejected, 0);
        assert_eq!(record.loaded, 3);
        assert_eq!(record.facts_inserted, 3);
        assert!(record.error_summary.is_none());
    }

    #[tokio::test]
    async fn test_partial_batch_failure_degrades_not_fails() {
        // Batches of 1: v2 fails, v1 and v3 survive.
        let pipeline = pipeline(FakeApi::new(&["v2"]), 1).await;

        let record = pipeline
            .run(RunRequest {
                video_ids: ids(&["v1", "v2", "v3"]),
                observation_date: Some(date()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(record.outcome, RunOutcome::SuccessWithWarnings);
        assert!(record.succeeded());
        assert_eq!(record.loaded, 2);
        assert_eq!(record.batch_failures.len(), 1);
        assert_eq!(record.batch_failures[0].batch_index, 1);
        assert_eq!(record.batch_failures[0].entity_ids, ids(&["v2"]));
    }

    #[tokio::test]
    async fn test_total_extraction_failure_fails_the_run() {
        let pipeline = pipeline(FakeApi::new(&["v1", "v2"]), 1).await;

        let record = pipeline
            .run(RunRequest {
                video_ids: ids(&["v1", "v2"]),
                observation_date: Some(date()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(record.outcome, RunOutcome::Failed);
        assert!(!record.succeeded());
        assert_eq!(record.loaded, 0);
        assert!(record.error_summary.is_some());
        // Still a full granular record, not a bare boolean.
        assert_eq!(record.batch_failures.len(), 2);
    }

    #[tokio::test]
    async fn test_second_identical_run_hits_cache() {
        let api = FakeApi::new(&[]);
        let pipeline = pipeline(api.clone(), 50).await;
        let request = RunRequest {
            video_ids: ids(&["v1"]),
            observation_date: Some(date()),
            ..Default::default()
        };

        pipeline.run(request.clone()).await.unwrap();
        let calls_after_first = api.calls.load(Ordering::SeqCst);

        pipeline.run(request).await.unwrap();
        assert_eq!(api.calls.load(Ordering::SeqCst), calls_after_first);
    }

    #[tokio::test]
    async fn test_full_refresh_bypasses_cache() {
        let api = FakeApi::new(&[]);
        let pipeline = pipeline(api.clone(), 50).await;

        pipeline
            .run(RunRequest {
                video_ids: ids(&["v1"]),
                observation_date: Some(date()),
                ..Default::default()
            })
            .await
            .unwrap();
        let calls_after_first = api.calls.load(Ordering::SeqCst);

        pipeline
            .run(RunRequest {
                channel_ids: vec![],
                video_ids: ids(&["v1"]),
                observation_date: Some(date()),
                full_refresh: true,
            })
            .await
            .unwrap();
        assert_eq!(api.calls.load(Ordering::SeqCst), calls_after_first * 2);
    }

    #[tokio::test]
    async fn test_full_refresh_leaves_quota_state_alone() {
        let api = FakeApi::new(&[]);
        let pipeline = pipeline(api, 50).await;

        pipeline
            .run(RunRequest {
                channel_ids: vec![],
                video_ids: ids(&["v1"]),
                observation_date: Some(date()),
                full_refresh: true,
            })
            .await
            .unwrap();

        let usage = pipeline.quota_usage().await;
        // Two operations spent; refresh mode did not reset the counter.
        assert_eq!(usage[0].ceiling - usage[0].remaining, 2);
    }

    #[tokio::test]
    async fn test_empty_request_is_a_failed_run() {
        let pipeline = pipeline(FakeApi::new(&[]), 50).await;
        let record = pipeline.run(RunRequest::default()).await.unwrap();
        assert_eq!(record.outcome, RunOutcome::Failed);
    }

    #[tokio::test]
    async fn test_runs_are_recorded_for_the_monitor() {
        let pipeline = pipeline(FakeApi::new(&[]), 50).await;
        pipeline
            .run(RunRequest {
                video_ids: ids(&["v1"]),
                observation_date: Some(date()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(pipeline.recent_runs(10).len(), 1);
        let outcomes = pipeline.loader().recent_run_outcomes(10).await.unwrap();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].1, "success");

        let health = pipeline.health_status();
        assert_eq!(health.total_runs, 1);
    }
}

use crate::core::cache::Fingerprint;
use crate::core::fetcher::RetryingFetcher;
use crate::domain::model::{BatchFailure, EntityKind, ExtractOutcome, RawEntityRecord};
use crate::domain::ports::{ApiPart, ApiResponse, VideoApi};
use crate::utils::error::{FetchError, FetchErrorKind};
use crate::utils::helpers::safe_get;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// reqwest-backed implementation of the platform API port.
pub struct HttpVideoApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpVideoApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> crate::utils::error::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

fn classify_transport(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::new(FetchErrorKind::Timeout, format!("request timed out: {}", err))
    } else {
        FetchError::new(FetchErrorKind::ServerError, format!("transport error: {}", err))
    }
}

fn classify_status(status: reqwest::StatusCode, retry_after: Option<Duration>) -> FetchError {
    use reqwest::StatusCode;
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => FetchError::new(
            FetchErrorKind::AuthError,
            format!("credential rejected ({})", status),
        ),
        StatusCode::BAD_REQUEST => {
            FetchError::new(FetchErrorKind::BadRequest, "malformed request (400)")
        }
        StatusCode::NOT_FOUND => FetchError::new(FetchErrorKind::NotFound, "resource not found (404)"),
        StatusCode::TOO_MANY_REQUESTS => {
            FetchError::rate_limited("rate limited by server (429)", retry_after)
        }
        s if s.is_server_error() => {
            FetchError::new(FetchErrorKind::ServerError, format!("server error ({})", s))
        }
        s => FetchError::new(FetchErrorKind::BadRequest, format!("unexpected status {}", s)),
    }
}

fn header_u64(headers: &reqwest::header::HeaderMap, name: &str) -> Option<u64> {
    headers.get(name)?.to_str().ok()?.parse().ok()
}

fn header_epoch(headers: &reqwest::header::HeaderMap, name: &str) -> Option<DateTime<Utc>> {
    let secs: i64 = headers.get(name)?.to_str().ok()?.parse().ok()?;
    Utc.timestamp_opt(secs, 0).single()
}

#[async_trait]
impl VideoApi for HttpVideoApi {
    async fn list(
        &self,
        kind: EntityKind,
        part: ApiPart,
        ids: &[String],
        api_key: &str,
    ) -> Result<ApiResponse, FetchError> {
        let endpoint = match kind {
            EntityKind::Channel => "channels",
            EntityKind::Video => "videos",
        };
        let url = format!("{}/{}", self.base_url, endpoint);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("part", part.as_str()),
                ("id", &ids.join(",")),
                ("key", api_key),
            ])
            .send()
            .await
            .map_err(classify_transport)?;

        let status = response.status();
        let headers = response.headers().clone();

        if !status.is_success() {
            let retry_after = header_u64(&headers, "retry-after").map(Duration::from_secs);
            return Err(classify_status(status, retry_after));
        }

        let payload: serde_json::Value = response.json().await.map_err(|e| {
            FetchError::new(
                FetchErrorKind::ServerError,
                format!("unparseable response body: {}", e),
            )
        })?;

        Ok(ApiResponse {
            payload,
            quota_remaining: header_u64(&headers, "x-ratelimit-remaining"),
            quota_reset: header_epoch(&headers, "x-ratelimit-reset"),
        })
    }
}

struct BatchResult {
    records: Vec<RawEntityRecord>,
    cache_hits: usize,
    retries: u32,
}

/// Decomposes an id list into bounded batches and drives the fetcher once
/// per operation per batch. Batches run concurrently up to the worker-pool
/// size and fail independently; a failed batch never aborts its siblings.
pub struct BatchExtractor {
    api: Arc<dyn VideoApi>,
    fetcher: Arc<RetryingFetcher>,
    batch_size: usize,
    workers: usize,
    cache_ttl: Duration,
    cancel: CancellationToken,
}

impl BatchExtractor {
    pub fn new(
        api: Arc<dyn VideoApi>,
        fetcher: Arc<RetryingFetcher>,
        batch_size: usize,
        workers: usize,
        cache_ttl: Duration,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            api,
            fetcher,
            batch_size: batch_size.max(1),
            workers: workers.max(1),
            cache_ttl,
            cancel,
        }
    }

    pub async fn extract(
        &self,
        kind: EntityKind,
        entity_ids: &[String],
        bypass_cache: bool,
    ) -> ExtractOutcome {
        let batches: Vec<Vec<String>> = entity_ids
            .chunks(self.batch_size)
            .map(|c| c.to_vec())
            .collect();
        let batches_total = batches.len();

        // Bounded worker pool over independent batches; all workers share
        // the one limiter and cache behind the fetcher.
        let mut results: Vec<(usize, Vec<String>, Result<BatchResult, FetchError>)> =
            stream::iter(batches.into_iter().enumerate())
                .map(|(index, batch)| async move {
                    let result = self.fetch_batch(kind, index, &batch, bypass_cache).await;
                    (index, batch, result)
                })
                .buffer_unordered(self.workers)
                .collect()
                .await;
        results.sort_by_key(|(index, _, _)| *index);

        let mut outcome = ExtractOutcome {
            batches_total,
            ..Default::default()
        };
        for (index, batch, result) in results {
            match result {
                Ok(result) => {
                    outcome.records.extend(result.records);
                    outcome.cache_hits += result.cache_hits;
                    outcome.retries += result.retries;
                }
                Err(err) => {
                    tracing::warn!(kind = kind.as_str(), batch = index, error = %err, "batch failed");
                    outcome.failures.push(BatchFailure {
                        kind,
                        batch_index: index,
                        entity_ids: batch,
                        error: err.to_string(),
                        permanent: !err.is_retryable()
                            && err.kind != FetchErrorKind::RetriesExhausted
                            && err.kind != FetchErrorKind::Cancelled,
                    });
                }
            }
        }
        outcome
    }

    /// One fetch per operation, merged per entity id. Either operation
    /// failing fails the whole batch.
    async fn fetch_batch(
        &self,
        kind: EntityKind,
        index: usize,
        batch: &[String],
        bypass_cache: bool,
    ) -> Result<BatchResult, FetchError> {
        if self.cancel.is_cancelled() {
            return Err(FetchError::new(
                FetchErrorKind::Cancelled,
                "run cancelled before batch start",
            ));
        }

        let mut order: Vec<String> = Vec::new();
        let mut merged: HashMap<String, RawEntityRecord> = HashMap::new();
        let mut cache_hits = 0usize;
        let mut retries = 0u32;

        for part in [ApiPart::Snippet, ApiPart::Statistics] {
            let operation = format!("{}s.{}", kind.as_str(), part.as_str());
            let fingerprint = Fingerprint::new(&operation, batch, None);
            let api = Arc::clone(&self.api);
            let ids = batch.to_vec();

            let fetched = self
                .fetcher
                .fetch(fingerprint, 1, self.cache_ttl, bypass_cache, move |key| {
                    let api = Arc::clone(&api);
                    let ids = ids.clone();
                    async move { api.list(kind, part, &ids, &key).await }
                })
                .await?;

            if fetched.from_cache {
                cache_hits += 1;
            }
            retries += fetched.retries;

            merge_items(kind, &fetched.payload, &mut order, &mut merged);
        }

        tracing::debug!(
            kind = kind.as_str(),
            batch = index,
            entities = order.len(),
            "batch extracted"
        );

        Ok(BatchResult {
            records: order
                .into_iter()
                .filter_map(|id| merged.remove(&id))
                .collect(),
            cache_hits,
            retries,
        })
    }
}

/// Flatten the interesting snippet/statistics/contentDetails fields of each
/// response item into the per-entity raw record, keyed by entity id.
fn merge_items(
    kind: EntityKind,
    payload: &serde_json::Value,
    order: &mut Vec<String>,
    merged: &mut HashMap<String, RawEntityRecord>,
) {
    let Some(items) = payload.get("items").and_then(|v| v.as_array()) else {
        return;
    };

    for item in items {
        let Some(id) = item.get("id").and_then(|v| v.as_str()) else {
            continue;
        };
        let record = merged.entry(id.to_string()).or_insert_with(|| {
            order.push(id.to_string());
            let mut record = RawEntityRecord::new(kind);
            record
                .fields
                .insert("id".to_string(), serde_json::Value::String(id.to_string()));
            record
        });

        const SNIPPET_FIELDS: &[(&str, &str)] = &[
            ("title", "title"),
            ("description", "description"),
            ("publishedAt", "published_at"),
            ("country", "country"),
            ("customUrl", "custom_url"),
            ("channelId", "channel_id"),
            ("tags", "tags"),
        ];
        for (api_name, field) in SNIPPET_FIELDS {
            if let Some(value) = safe_get(item, &["snippet", api_name]) {
                record
                    .fields
                    .entry(field.to_string())
                    .or_insert_with(|| value.clone());
            }
        }

        const STAT_FIELDS: &[(&str, &str)] = &[
            ("viewCount", "view_count"),
            ("subscriberCount", "subscriber_count"),
            ("videoCount", "video_count"),
            ("likeCount", "like_count"),
            ("commentCount", "comment_count"),
            ("favoriteCount", "favorite_count"),
        ];
        for (api_name, field) in STAT_FIELDS {
            if let Some(value) = safe_get(item, &["statistics", api_name]) {
                record
                    .fields
                    .entry(field.to_string())
                    .or_insert_with(|| value.clone());
            }
        }

        if let Some(duration) = safe_get(item, &["contentDetails", "duration"]) {
            record
                .fields
                .entry("duration".to_string())
                .or_insert_with(|| duration.clone());
        }
    }
}

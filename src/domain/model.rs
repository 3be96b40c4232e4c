use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Channel,
    Video,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Channel => "channel",
            EntityKind::Video => "video",
        }
    }
}

/// As-fetched representation of a channel or video. All fields stay untyped
/// until the validator converts them; nothing downstream reads this shape.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawEntityRecord {
    pub kind: EntityKind,
    pub fields: HashMap<String, serde_json::Value>,
}

impl RawEntityRecord {
    pub fn new(kind: EntityKind) -> Self {
        Self {
            kind,
            fields: HashMap::new(),
        }
    }

    pub fn entity_id(&self) -> Option<&str> {
        self.fields.get("id").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GrowthTier {
    Nano,
    Micro,
    MidTier,
    Macro,
    Mega,
}

impl GrowthTier {
    pub fn from_subscribers(subscriber_count: i64) -> Self {
        match subscriber_count {
            n if n >= 1_000_000 => GrowthTier::Mega,
            n if n >= 100_000 => GrowthTier::Macro,
            n if n >= 10_000 => GrowthTier::MidTier,
            n if n >= 1_000 => GrowthTier::Micro,
            _ => GrowthTier::Nano,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            GrowthTier::Nano => "Nano",
            GrowthTier::Micro => "Micro",
            GrowthTier::MidTier => "Mid-tier",
            GrowthTier::Macro => "Macro",
            GrowthTier::Mega => "Mega",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelRecord {
    pub channel_id: String,
    pub title: String,
    pub description: String,
    pub published_at: Option<DateTime<Utc>>,
    pub country: Option<String>,
    pub custom_url: Option<String>,
    pub view_count: i64,
    pub subscriber_count: i64,
    pub video_count: i64,
    pub avg_views_per_video: f64,
    pub engagement_ratio: f64,
    pub growth_tier: GrowthTier,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VideoRecord {
    pub video_id: String,
    pub channel_id: String,
    pub title: String,
    pub description: String,
    pub published_at: Option<DateTime<Utc>>,
    pub duration: Option<String>,
    pub duration_minutes: f64,
    pub tags: Vec<String>,
    pub view_count: i64,
    pub like_count: i64,
    pub comment_count: i64,
    pub favorite_count: i64,
    pub engagement_rate: f64,
    pub like_comment_ratio: f64,
    pub warnings: Vec<String>,
}

/// A raw record that survived validation and enrichment. The warnings list
/// carries non-fatal issues (defaulted counters, odd id shapes).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ValidatedEntityRecord {
    Channel(ChannelRecord),
    Video(VideoRecord),
}

impl ValidatedEntityRecord {
    pub fn kind(&self) -> EntityKind {
        match self {
            ValidatedEntityRecord::Channel(_) => EntityKind::Channel,
            ValidatedEntityRecord::Video(_) => EntityKind::Video,
        }
    }

    pub fn entity_id(&self) -> &str {
        match self {
            ValidatedEntityRecord::Channel(c) => &c.channel_id,
            ValidatedEntityRecord::Video(v) => &v.video_id,
        }
    }

    pub fn warnings(&self) -> &[String] {
        match self {
            ValidatedEntityRecord::Channel(c) => &c.warnings,
            ValidatedEntityRecord::Video(v) => &v.warnings,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rejection {
    pub kind: EntityKind,
    pub entity_id: Option<String>,
    pub reasons: Vec<String>,
}

#[derive(Debug, Default)]
pub struct ValidationOutcome {
    pub accepted: Vec<ValidatedEntityRecord>,
    pub rejected: Vec<Rejection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFailure {
    pub kind: EntityKind,
    pub batch_index: usize,
    pub entity_ids: Vec<String>,
    pub error: String,
    pub permanent: bool,
}

#[derive(Debug, Default)]
pub struct ExtractOutcome {
    pub records: Vec<RawEntityRecord>,
    pub failures: Vec<BatchFailure>,
    pub batches_total: usize,
    pub cache_hits: usize,
    pub retries: u32,
}

impl ExtractOutcome {
    /// Every batch failed. An outcome with no batches at all (nothing
    /// requested) is not a failure.
    pub fn is_total_failure(&self) -> bool {
        self.batches_total > 0 && self.failures.len() == self.batches_total
    }

    pub fn is_degraded(&self) -> bool {
        !self.failures.is_empty() && !self.is_total_failure()
    }

    pub fn merge(&mut self, other: ExtractOutcome) {
        self.records.extend(other.records);
        self.failures.extend(other.failures);
        self.batches_total += other.batches_total;
        self.cache_hits += other.cache_hits;
        self.retries += other.retries;
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityLoadFailure {
    pub entity_id: String,
    pub reason: String,
}

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct LoadReport {
    pub dimensions_inserted: usize,
    pub dimensions_updated: usize,
    pub facts_inserted: usize,
    pub facts_updated: usize,
    pub failed: Vec<EntityLoadFailure>,
}

impl LoadReport {
    pub fn entities_loaded(&self) -> usize {
        self.facts_inserted + self.facts_updated
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunOutcome {
    Success,
    SuccessWithWarnings,
    Failed,
}

impl RunOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunOutcome::Success => "success",
            RunOutcome::SuccessWithWarnings => "success-with-warnings",
            RunOutcome::Failed => "failed",
        }
    }
}

/// Outcome record for one pipeline run. Created by the coordinator at run
/// start, finalized at run end, read by the monitor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineRunRecord {
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub observation_date: NaiveDate,
    pub outcome: RunOutcome,
    pub extracted: usize,
    pub validated: usize,
    pub rejected: usize,
    pub loaded: usize,
    pub load_failed: usize,
    pub dimensions_inserted: usize,
    pub dimensions_updated: usize,
    pub facts_inserted: usize,
    pub facts_updated: usize,
    pub batch_failures: Vec<BatchFailure>,
    pub error_summary: Option<String>,
}

impl PipelineRunRecord {
    /// Boolean summary for simple checks; the granular counts stay the
    /// source of truth.
    pub fn succeeded(&self) -> bool {
        self.outcome != RunOutcome::Failed
    }

    pub fn duration_seconds(&self) -> i64 {
        (self.finished_at - self.started_at).num_seconds().max(0)
    }
}

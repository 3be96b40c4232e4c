use crate::domain::model::{
    ChannelRecord, EntityKind, GrowthTier, RawEntityRecord, Rejection, ValidatedEntityRecord,
    ValidationOutcome, VideoRecord,
};
use crate::utils::helpers::{parse_duration_minutes, strip_markup};
use chrono::{DateTime, Utc};
use regex::Regex;

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Engagement rate as a percentage of views. Zero views yields zero, never
/// a division fault.
pub fn engagement_rate(views: i64, likes: i64, comments: i64) -> f64 {
    if views <= 0 {
        return 0.0;
    }
    round2((likes + comments) as f64 / views.max(1) as f64 * 100.0)
}

/// Checks raw records for required fields and type conformance, normalizes
/// text, and computes derived metrics from already-validated fields.
/// Rejections carry reasons and are always reported, never dropped.
pub struct Validator {
    channel_id_re: Regex,
    video_id_re: Regex,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new()
    }
}

impl Validator {
    pub fn new() -> Self {
        Self {
            channel_id_re: Regex::new(r"^UC[\w-]{22}$").unwrap(),
            video_id_re: Regex::new(r"^[\w-]{11}$").unwrap(),
        }
    }

    pub fn process_all(&self, records: Vec<RawEntityRecord>) -> ValidationOutcome {
        let mut outcome = ValidationOutcome::default();
        for record in records {
            match self.process(record) {
                Ok(validated) => outcome.accepted.push(validated),
                Err(rejection) => {
                    tracing::warn!(
                        kind = rejection.kind.as_str(),
                        entity = rejection.entity_id.as_deref().unwrap_or("<missing>"),
                        reasons = ?rejection.reasons,
                        "record rejected"
                    );
                    outcome.rejected.push(rejection);
                }
            }
        }
        outcome
    }

    pub fn process(&self, raw: RawEntityRecord) -> Result<ValidatedEntityRecord, Rejection> {
        match raw.kind {
            EntityKind::Channel => self.process_channel(raw).map(ValidatedEntityRecord::Channel),
            EntityKind::Video => self.process_video(raw).map(ValidatedEntityRecord::Video),
        }
    }

    fn process_channel(&self, raw: RawEntityRecord) -> Result<ChannelRecord, Rejection> {
        let mut reasons = Vec::new();
        let mut warnings = Vec::new();

        let channel_id = required_text(&raw, "id", &mut reasons);
        let title = required_text(&raw, "title", &mut reasons);

        if let Some(id) = &channel_id {
            if !self.channel_id_re.is_match(id) {
                warnings.push(format!("unusual channel id shape: {}", id));
            }
        }

        let view_count = counter(&raw, "view_count", &mut warnings, &mut reasons);
        let subscriber_count = counter(&raw, "subscriber_count", &mut warnings, &mut reasons);
        let video_count = counter(&raw, "video_count", &mut warnings, &mut reasons);

        match (channel_id, title) {
            (Some(channel_id), Some(title)) if reasons.is_empty() => {
                let avg_views_per_video = if video_count > 0 {
                    round2(view_count as f64 / video_count as f64)
                } else {
                    0.0
                };
                let engagement_ratio = if subscriber_count > 0 {
                    round2(view_count as f64 / subscriber_count as f64)
                } else {
                    0.0
                };

                Ok(ChannelRecord {
                    channel_id,
                    title,
                    description: optional_text(&raw, "description").unwrap_or_default(),
                    published_at: timestamp(&raw, "published_at", &mut warnings),
                    country: optional_text(&raw, "country"),
                    custom_url: optional_text(&raw, "custom_url"),
                    view_count,
                    subscriber_count,
                    video_count,
                    avg_views_per_video,
                    engagement_ratio,
                    growth_tier: GrowthTier::from_subscribers(subscriber_count),
                    warnings,
                })
            }
            (channel_id, _) => Err(Rejection {
                kind: EntityKind::Channel,
                entity_id: channel_id,
                reasons,
            }),
        }
    }

    fn process_video(&self, raw: RawEntityRecord) -> Result<VideoRecord, Rejection> {
        let mut reasons = Vec::new();
        let mut warnings = Vec::new();

        let video_id = required_text(&raw, "id", &mut reasons);
        let channel_id = required_text(&raw, "channel_id", &mut reasons);
        let title = required_text(&raw, "title", &mut reasons);

        if let Some(id) = &video_id {
            if !self.video_id_re.is_match(id) {
                warnings.push(format!("unusual video id shape: {}", id));
            }
        }

        let view_count = counter(&raw, "view_count", &mut warnings, &mut reasons);
        let like_count = counter(&raw, "like_count", &mut warnings, &mut reasons);
        let comment_count = counter(&raw, "comment_count", &mut warnings, &mut reasons);
        let favorite_count = counter(&raw, "favorite_count", &mut warnings, &mut reasons);

        match (video_id, channel_id, title) {
            (Some(video_id), Some(channel_id), Some(title)) if reasons.is_empty() => {
                let duration = raw
                    .fields
                    .get("duration")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                let duration_minutes = duration
                    .as_deref()
                    .map(parse_duration_minutes)
                    .unwrap_or(0.0);

                let tags = raw
                    .fields
                    .get("tags")
                    .and_then(|v| v.as_array())
                    .map(|arr| {
                        arr.iter()
                            .filter_map(|v| v.as_str().map(|s| s.to_string()))
                            .collect()
                    })
                    .unwrap_or_default();

                let like_comment_ratio = if comment_count > 0 {
                    round2(like_count as f64 / comment_count as f64)
                } else {
                    0.0
                };

                Ok(VideoRecord {
                    video_id,
                    channel_id,
                    title,
                    description: optional_text(&raw, "description").unwrap_or_default(),
                    published_at: timestamp(&raw, "published_at", &mut warnings),
                    duration,
                    duration_minutes,
                    tags,
                    view_count,
                    like_count,
                    comment_count,
                    favorite_count,
                    engagement_rate: engagement_rate(view_count, like_count, comment_count),
                    like_comment_ratio,
                    warnings,
                })
            }
            (video_id, _, _) => Err(Rejection {
                kind: EntityKind::Video,
                entity_id: video_id,
                reasons,
            }),
        }
    }
}

/// Required text field: missing or empty after normalization rejects the
/// record.
fn required_text(raw: &RawEntityRecord, field: &str, reasons: &mut Vec<String>) -> Option<String> {
    match optional_text(raw, field) {
        Some(text) => Some(text),
        None => {
            reasons.push(format!("missing required field: {}", field));
            None
        }
    }
}

fn optional_text(raw: &RawEntityRecord, field: &str) -> Option<String> {
    let text = raw.fields.get(field)?.as_str()?;
    let normalized = strip_markup(text);
    if normalized.is_empty() {
        None
    } else {
        Some(normalized)
    }
}

/// Counter coercion: missing defaults to zero with a warning; a present
/// value that is not a non-negative integer (number or numeric string)
/// rejects the record.
fn counter(
    raw: &RawEntityRecord,
    field: &str,
    warnings: &mut Vec<String>,
    reasons: &mut Vec<String>,
) -> i64 {
    match raw.fields.get(field) {
        None | Some(serde_json::Value::Null) => {
            warnings.push(format!("missing {}, defaulted to 0", field));
            0
        }
        Some(value) => {
            let parsed = match value {
                serde_json::Value::Number(n) => n.as_i64(),
                serde_json::Value::String(s) => s.trim().parse::<i64>().ok(),
                _ => None,
            };
            match parsed {
                Some(n) if n >= 0 => n,
                _ => {
                    reasons.push(format!("invalid {}: {}", field, value));
                    0
                }
            }
        }
    }
}

fn timestamp(
    raw: &RawEntityRecord,
    field: &str,
    warnings: &mut Vec<String>,
) -> Option<DateTime<Utc>> {
    let value = raw.fields.get(field)?.as_str()?;
    match DateTime::parse_from_rfc3339(value) {
        Ok(dt) => Some(dt.with_timezone(&Utc)),
        Err(_) => {
            warnings.push(format!("invalid {}: {}", field, value));
            None
        }
    }
}

use crate::core::schema;
use crate::domain::model::{
    ChannelRecord, EntityLoadFailure, LoadReport, PipelineRunRecord, ValidatedEntityRecord,
    VideoRecord,
};
use crate::utils::error::{EtlError, Result};
use crate::utils::helpers::date_to_id;
use chrono::{Datelike, NaiveDate, Utc};
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Sqlite, SqlitePool, Transaction};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RowWrite {
    Inserted,
    Updated,
}

/// Maps validated entities onto the star schema with idempotent incremental
/// upserts. Each entity's dimension and fact writes commit as one
/// transaction; the dimension write always precedes the fact write.
pub struct IncrementalLoader {
    pool: SqlitePool,
}

impl IncrementalLoader {
    /// Connecting and ensuring the schema is the only pre-run fatal path:
    /// an unreachable datastore fails before any entity is attempted.
    pub async fn connect(database_url: &str) -> Result<Self> {
        // In-memory SQLite gives each pooled connection its own database;
        // pin the pool to one connection so the schema stays visible.
        let max_connections = if database_url.contains(":memory:") { 1 } else { 5 };
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;
        schema::ensure_schema(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn load(
        &self,
        records: &[ValidatedEntityRecord],
        observation_date: NaiveDate,
    ) -> Result<LoadReport> {
        let date_id = date_to_id(observation_date);
        self.ensure_date_row(observation_date, date_id).await?;

        let now = Utc::now().to_rfc3339();
        let mut report = LoadReport::default();

        for record in records {
            match self.load_entity(record, date_id, &now).await {
                Ok((dim, fact)) => {
                    match dim {
                        RowWrite::Inserted => report.dimensions_inserted += 1,
                        RowWrite::Updated => report.dimensions_updated += 1,
                    }
                    match fact {
                        RowWrite::Inserted => report.facts_inserted += 1,
                        RowWrite::Updated => report.facts_updated += 1,
                    }
                }
                Err(err) => {
                    tracing::warn!(entity = record.entity_id(), error = %err, "entity load failed");
                    report.failed.push(EntityLoadFailure {
                        entity_id: record.entity_id().to_string(),
                        reason: err.to_string(),
                    });
                }
            }
        }

        tracing::info!(
            dims_inserted = report.dimensions_inserted,
            dims_updated = report.dimensions_updated,
            facts_inserted = report.facts_inserted,
            facts_updated = report.facts_updated,
            failed = report.failed.len(),
            "load finished"
        );
        Ok(report)
    }

    /// Dimension then fact, one transaction. A failure rolls back both
    /// writes for this entity and leaves already-committed siblings alone.
    async fn load_entity(
        &self,
        record: &ValidatedEntityRecord,
        date_id: i64,
        now: &str,
    ) -> Result<(RowWrite, RowWrite)> {
        let mut tx = self.pool.begin().await?;
        let writes = match record {
            ValidatedEntityRecord::Channel(channel) => {
                let dim = upsert_channel_dimension(&mut tx, channel, now).await?;
                let fact = upsert_channel_fact(&mut tx, channel, date_id, now).await?;
                (dim, fact)
            }
            ValidatedEntityRecord::Video(video) => {
                let dim = upsert_video_dimension(&mut tx, video, now).await?;
                let fact = upsert_video_fact(&mut tx, video, date_id, now).await?;
                (dim, fact)
            }
        };
        tx.commit().await?;
        Ok(writes)
    }

    async fn ensure_date_row(&self, date: NaiveDate, date_id: i64) -> Result<()> {
        let quarter = (date.month0() / 3 + 1) as i64;
        sqlx::query(
            r#"
            INSERT INTO dim_dates (date_id, full_date, day_name, month_name, year, quarter, week_number, is_weekend)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (date_id) DO NOTHING
            "#,
        )
        .bind(date_id)
        .bind(date.to_string())
        .bind(date.format("%A").to_string())
        .bind(date.format("%B").to_string())
        .bind(date.year() as i64)
        .bind(quarter)
        .bind(date.iso_week().week() as i64)
        .bind(matches!(date.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun) as i64)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Append the finalized run record to the run log.
    pub async fn record_run(&self, run: &PipelineRunRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO pipeline_runs (
                started_at, finished_at, observation_date, outcome,
                extracted, validated, rejected, loaded, load_failed, error_summary
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(run.started_at.to_rfc3339())
        .bind(run.finished_at.to_rfc3339())
        .bind(run.observation_date.to_string())
        .bind(run.outcome.as_str())
        .bind(run.extracted as i64)
        .bind(run.validated as i64)
        .bind(run.rejected as i64)
        .bind(run.loaded as i64)
        .bind(run.load_failed as i64)
        .bind(run.error_summary.as_deref())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Most recent (started_at, outcome) pairs for the health surface.
    pub async fn recent_run_outcomes(&self, limit: u32) -> Result<Vec<(String, String)>> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT started_at, outcome FROM pipeline_runs ORDER BY run_id DESC LIMIT ?",
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

async fn upsert_channel_dimension(
    tx: &mut Transaction<'_, Sqlite>,
    channel: &ChannelRecord,
    now: &str,
) -> Result<RowWrite> {
    let existing: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM dim_channels WHERE channel_id = ?")
            .bind(&channel.channel_id)
            .fetch_one(&mut **tx)
            .await?;

    if existing > 0 {
        // Natural key and created_date stay untouched.
        sqlx::query(
            r#"
            UPDATE dim_channels SET
                channel_name = ?, description = ?, published_at = ?, country = ?,
                custom_url = ?, view_count = ?, subscriber_count = ?, video_count = ?,
                avg_views_per_video = ?, engagement_ratio = ?, growth_tier = ?,
                last_updated = ?
            WHERE channel_id = ?
            "#,
        )
        .bind(&channel.title)
        .bind(&channel.description)
        .bind(channel.published_at.map(|d| d.to_rfc3339()))
        .bind(channel.country.as_deref())
        .bind(channel.custom_url.as_deref())
        .bind(channel.view_count)
        .bind(channel.subscriber_count)
        .bind(channel.video_count)
        .bind(channel.avg_views_per_video)
        .bind(channel.engagement_ratio)
        .bind(channel.growth_tier.as_str())
        .bind(now)
        .bind(&channel.channel_id)
        .execute(&mut **tx)
        .await?;
        Ok(RowWrite::Updated)
    } else {
        sqlx::query(
            r#"
            INSERT INTO dim_channels (
                channel_id, channel_name, description, published_at, country, custom_url,
                view_count, subscriber_count, video_count, avg_views_per_video,
                engagement_ratio, growth_tier, created_date, last_updated
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&channel.channel_id)
        .bind(&channel.title)
        .bind(&channel.description)
        .bind(channel.published_at.map(|d| d.to_rfc3339()))
        .bind(channel.country.as_deref())
        .bind(channel.custom_url.as_deref())
        .bind(channel.view_count)
        .bind(channel.subscriber_count)
        .bind(channel.video_count)
        .bind(channel.avg_views_per_video)
        .bind(channel.engagement_ratio)
        .bind(channel.growth_tier.as_str())
        .bind(now)
        .bind(now)
        .execute(&mut **tx)
        .await?;
        Ok(RowWrite::Inserted)
    }
}

async fn upsert_channel_fact(
    tx: &mut Transaction<'_, Sqlite>,
    channel: &ChannelRecord,
    date_id: i64,
    now: &str,
) -> Result<RowWrite> {
    let existing: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM fact_channel_stats WHERE channel_id = ? AND date_id = ?",
    )
    .bind(&channel.channel_id)
    .bind(date_id)
    .fetch_one(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO fact_channel_stats (
            channel_id, date_id, view_count, subscriber_count, video_count, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT (channel_id, date_id) DO UPDATE SET
            view_count = excluded.view_count,
            subscriber_count = excluded.subscriber_count,
            video_count = excluded.video_count,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&channel.channel_id)
    .bind(date_id)
    .bind(channel.view_count)
    .bind(channel.subscriber_count)
    .bind(channel.video_count)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(if existing > 0 {
        RowWrite::Updated
    } else {
        RowWrite::Inserted
    })
}

async fn upsert_video_dimension(
    tx: &mut Transaction<'_, Sqlite>,
    video: &VideoRecord,
    now: &str,
) -> Result<RowWrite> {
    let existing: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM dim_videos WHERE video_id = ?")
        .bind(&video.video_id)
        .fetch_one(&mut **tx)
        .await?;

    let tags = serde_json::to_string(&video.tags).map_err(EtlError::from)?;

    if existing > 0 {
        sqlx::query(
            r#"
            UPDATE dim_videos SET
                channel_id = ?, title = ?, description = ?, published_at = ?, duration = ?,
                duration_minutes = ?, tags = ?, view_count = ?, like_count = ?,
                comment_count = ?, favorite_count = ?, engagement_rate = ?,
                like_comment_ratio = ?, last_updated = ?
            WHERE video_id = ?
            "#,
        )
        .bind(&video.channel_id)
        .bind(&video.title)
        .bind(&video.description)
        .bind(video.published_at.map(|d| d.to_rfc3339()))
        .bind(video.duration.as_deref())
        .bind(video.duration_minutes)
        .bind(&tags)
        .bind(video.view_count)
        .bind(video.like_count)
        .bind(video.comment_count)
        .bind(video.favorite_count)
        .bind(video.engagement_rate)
        .bind(video.like_comment_ratio)
        .bind(now)
        .bind(&video.video_id)
        .execute(&mut **tx)
        .await?;
        Ok(RowWrite::Updated)
    } else {
        sqlx::query(
            r#"
            INSERT INTO dim_videos (
                video_id, channel_id, title, description, published_at, duration,
                duration_minutes, tags, view_count, like_count, comment_count,
                favorite_count, engagement_rate, like_comment_ratio, created_date, last_updated
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&video.video_id)
        .bind(&video.channel_id)
        .bind(&video.title)
        .bind(&video.description)
        .bind(video.published_at.map(|d| d.to_rfc3339()))
        .bind(video.duration.as_deref())
        .bind(video.duration_minutes)
        .bind(&tags)
        .bind(video.view_count)
        .bind(video.like_count)
        .bind(video.comment_count)
        .bind(video.favorite_count)
        .bind(video.engagement_rate)
        .bind(video.like_comment_ratio)
        .bind(now)
        .bind(now)
        .execute(&mut **tx)
        .await?;
        Ok(RowWrite::Inserted)
    }
}

async fn upsert_video_fact(
    tx: &mut Transaction<'_, Sqlite>,
    video: &VideoRecord,
    date_id: i64,
    now: &str,
) -> Result<RowWrite> {
    let existing: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM fact_video_stats WHERE video_id = ? AND date_id = ?",
    )
    .bind(&video.video_id)
    .bind(date_id)
    .fetch_one(&mut **tx)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO fact_video_stats (
            video_id, date_id, view_count, like_count, comment_count,
            favorite_count, engagement_rate, updated_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT (video_id, date_id) DO UPDATE SET
            view_count = excluded.view_count,
            like_count = excluded.like_count,
            comment_count = excluded.comment_count,
            favorite_count = excluded.favorite_count,
            engagement_rate = excluded.engagement_rate,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(&video.video_id)
    .bind(date_id)
    .bind(video.view_count)
    .bind(video.like_count)
    .bind(video.comment_count)
    .bind(video.favorite_count)
    .bind(video.engagement_rate)
    .bind(now)
    .execute(&mut **tx)
    .await?;

    Ok(if existing > 0 {
        RowWrite::Updated
    } else {
        RowWrite::Inserted
    })
}

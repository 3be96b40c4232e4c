use crate::utils::error::Result;
use sqlx::SqlitePool;

/// Star schema: natural-keyed dimensions, (entity, date)-keyed facts, a
/// calendar dimension and the run log.
const TABLES: &[(&str, &str)] = &[
    (
        "dim_channels",
        r#"
        CREATE TABLE IF NOT EXISTS dim_channels (
            channel_id TEXT PRIMARY KEY,
            channel_name TEXT NOT NULL,
            description TEXT,
            published_at TEXT,
            country TEXT,
            custom_url TEXT,
            view_count INTEGER NOT NULL DEFAULT 0,
            subscriber_count INTEGER NOT NULL DEFAULT 0,
            video_count INTEGER NOT NULL DEFAULT 0,
            avg_views_per_video REAL NOT NULL DEFAULT 0,
            engagement_ratio REAL NOT NULL DEFAULT 0,
            growth_tier TEXT,
            created_date TEXT NOT NULL,
            last_updated TEXT NOT NULL
        )
        "#,
    ),
    (
        "dim_videos",
        r#"
        CREATE TABLE IF NOT EXISTS dim_videos (
            video_id TEXT PRIMARY KEY,
            channel_id TEXT REFERENCES dim_channels(channel_id),
            title TEXT NOT NULL,
            description TEXT,
            published_at TEXT,
            duration TEXT,
            duration_minutes REAL NOT NULL DEFAULT 0,
            tags TEXT,
            view_count INTEGER NOT NULL DEFAULT 0,
            like_count INTEGER NOT NULL DEFAULT 0,
            comment_count INTEGER NOT NULL DEFAULT 0,
            favorite_count INTEGER NOT NULL DEFAULT 0,
            engagement_rate REAL NOT NULL DEFAULT 0,
            like_comment_ratio REAL NOT NULL DEFAULT 0,
            created_date TEXT NOT NULL,
            last_updated TEXT NOT NULL
        )
        "#,
    ),
    (
        "dim_dates",
        r#"
        CREATE TABLE IF NOT EXISTS dim_dates (
            date_id INTEGER PRIMARY KEY,
            full_date TEXT NOT NULL UNIQUE,
            day_name TEXT NOT NULL,
            month_name TEXT NOT NULL,
            year INTEGER NOT NULL,
            quarter INTEGER NOT NULL,
            week_number INTEGER NOT NULL,
            is_weekend INTEGER NOT NULL
        )
        "#,
    ),
    (
        "fact_channel_stats",
        r#"
        CREATE TABLE IF NOT EXISTS fact_channel_stats (
            channel_id TEXT NOT NULL REFERENCES dim_channels(channel_id),
            date_id INTEGER NOT NULL REFERENCES dim_dates(date_id),
            view_count INTEGER NOT NULL DEFAULT 0,
            subscriber_count INTEGER NOT NULL DEFAULT 0,
            video_count INTEGER NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (channel_id, date_id)
        )
        "#,
    ),
    (
        "fact_video_stats",
        r#"
        CREATE TABLE IF NOT EXISTS fact_video_stats (
            video_id TEXT NOT NULL REFERENCES dim_videos(video_id),
            date_id INTEGER NOT NULL REFERENCES dim_dates(date_id),
            view_count INTEGER NOT NULL DEFAULT 0,
            like_count INTEGER NOT NULL DEFAULT 0,
            comment_count INTEGER NOT NULL DEFAULT 0,
            favorite_count INTEGER NOT NULL DEFAULT 0,
            engagement_rate REAL NOT NULL DEFAULT 0,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (video_id, date_id)
        )
        "#,
    ),
    (
        "pipeline_runs",
        r#"
        CREATE TABLE IF NOT EXISTS pipeline_runs (
            run_id INTEGER PRIMARY KEY AUTOINCREMENT,
            started_at TEXT NOT NULL,
            finished_at TEXT NOT NULL,
            observation_date TEXT NOT NULL,
            outcome TEXT NOT NULL,
            extracted INTEGER NOT NULL DEFAULT 0,
            validated INTEGER NOT NULL DEFAULT 0,
            rejected INTEGER NOT NULL DEFAULT 0,
            loaded INTEGER NOT NULL DEFAULT 0,
            load_failed INTEGER NOT NULL DEFAULT 0,
            error_summary TEXT
        )
        "#,
    ),
];

const INDEXES: &[&str] = &[
    "CREATE INDEX IF NOT EXISTS idx_videos_channel_id ON dim_videos(channel_id)",
    "CREATE INDEX IF NOT EXISTS idx_videos_published_at ON dim_videos(published_at)",
    "CREATE INDEX IF NOT EXISTS idx_video_stats_date_id ON fact_video_stats(date_id)",
    "CREATE INDEX IF NOT EXISTS idx_channel_stats_date_id ON fact_channel_stats(date_id)",
    "CREATE INDEX IF NOT EXISTS idx_runs_started_at ON pipeline_runs(started_at)",
];

pub async fn ensure_schema(pool: &SqlitePool) -> Result<()> {
    for (name, ddl) in TABLES {
        sqlx::query(ddl).execute(pool).await?;
        tracing::debug!(table = name, "table ensured");
    }
    for ddl in INDEXES {
        sqlx::query(ddl).execute(pool).await?;
    }
    Ok(())
}

use anyhow::Context;
use clap::Parser;
use std::sync::Arc;
use tube_etl::utils::monitor::SystemMonitor;
use tube_etl::utils::{logger, validation::Validate};
use tube_etl::{
    CliConfig, HttpVideoApi, IncrementalLoader, MetricsPipeline, RunRequest, TomlConfig,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    logger::init_cli_logger(cli.verbose);

    tracing::info!("Starting tube-etl");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
    }

    let config = TomlConfig::from_file(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config))?;

    if let Err(e) = config.validate() {
        tracing::error!("❌ Configuration validation failed: {}", e);
        tracing::error!("💡 Suggestion: {}", e.recovery_suggestion());
        eprintln!("❌ {}", e.user_friendly_message());
        std::process::exit(1);
    }

    let observation_date: Option<chrono::NaiveDate> = cli
        .observation_date
        .as_deref()
        .map(|d| d.parse().with_context(|| format!("invalid observation date: {}", d)))
        .transpose()?;

    // Unreachable datastore is the one fatal fault before any entity is
    // attempted.
    let loader = IncrementalLoader::connect(config.database_url())
        .await
        .with_context(|| format!("cannot reach datastore at {}", config.database_url()))?;
    let api = HttpVideoApi::new(config.api.base_url.clone(), config.request_timeout())?;
    let pipeline = MetricsPipeline::new(Arc::new(api), loader, config.pipeline_settings());

    let system_monitor = SystemMonitor::new(cli.monitor || config.system_stats_enabled());
    if system_monitor.is_enabled() {
        tracing::info!("🔍 System monitoring enabled");
    }

    // Ctrl-C aborts pending backoff sleeps and in-flight batch workers.
    {
        let token = pipeline.cancel_token();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling run");
                token.cancel();
            }
        });
    }

    let request = RunRequest {
        channel_ids: if cli.channel_ids.is_empty() {
            config.tracked_channel_ids()
        } else {
            cli.channel_ids.clone()
        },
        video_ids: if cli.video_ids.is_empty() {
            config.tracked_video_ids()
        } else {
            cli.video_ids.clone()
        },
        observation_date,
        full_refresh: cli.full_refresh,
    };

    system_monitor.log_stats("startup");

    match pipeline.run(request).await {
        Ok(record) => {
            system_monitor.log_stats("run finished");

            for slot in pipeline.quota_usage().await {
                tracing::info!(
                    slot = %slot.slot_id,
                    used_percent = slot.used_percent,
                    remaining = slot.remaining,
                    "quota usage"
                );
            }

            if record.succeeded() {
                tracing::info!("✅ Pipeline run completed: {}", record.outcome.as_str());
                println!(
                    "✅ {} in {}: {} extracted, {} validated, {} rejected, {} loaded, {} failed",
                    record.outcome.as_str(),
                    tube_etl::utils::helpers::format_duration(record.duration_seconds() as u64),
                    record.extracted,
                    record.validated,
                    record.rejected,
                    record.loaded,
                    record.load_failed
                );
            } else {
                tracing::error!(
                    "❌ Pipeline run failed: {}",
                    record.error_summary.as_deref().unwrap_or("unknown")
                );
                eprintln!(
                    "❌ failed: {}",
                    record.error_summary.as_deref().unwrap_or("unknown")
                );
                std::process::exit(1);
            }
        }
        Err(e) => {
            tracing::error!(
                "❌ Pipeline error: {} (Category: {:?}, Severity: {:?})",
                e,
                e.category(),
                e.severity()
            );
            tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
            eprintln!("❌ {}", e.user_friendly_message());

            let exit_code = match e.severity() {
                tube_etl::utils::error::ErrorSeverity::Low => 0,
                tube_etl::utils::error::ErrorSeverity::Medium => 2,
                tube_etl::utils::error::ErrorSeverity::High => 1,
                tube_etl::utils::error::ErrorSeverity::Critical => 3,
            };
            if exit_code > 0 {
                std::process::exit(exit_code);
            }
        }
    }

    Ok(())
}

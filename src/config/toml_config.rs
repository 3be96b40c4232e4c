use crate::core::fetcher::RetryPolicy;
use crate::core::pipeline::PipelineSettings;
use crate::utils::error::{EtlError, Result};
use crate::utils::validation::{self, Validate};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TomlConfig {
    pub pipeline: PipelineMeta,
    pub api: ApiConfig,
    pub extraction: ExtractionConfig,
    pub storage: StorageConfig,
    pub tracking: Option<TrackingConfig>,
    pub monitoring: Option<MonitoringConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineMeta {
    pub name: String,
    pub description: String,
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    pub base_url: String,
    pub api_keys: Vec<String>,
    pub timeout_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionConfig {
    pub batch_size: Option<usize>,
    pub worker_pool_size: Option<usize>,
    pub max_retry_attempts: Option<u32>,
    pub base_retry_delay_seconds: Option<u64>,
    pub max_retry_delay_seconds: Option<u64>,
    pub cache_ttl_seconds: Option<u64>,
    pub quota_ceiling: Option<u64>,
    pub quota_window_seconds: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub database_url: String,
}

/// The configured entity id sets a scheduled run tracks when the caller
/// does not pass ids explicitly.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TrackingConfig {
    pub channel_ids: Option<Vec<String>>,
    pub video_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoringConfig {
    pub enabled: bool,
    pub log_level: Option<String>,
    pub system_stats: Option<bool>,
}

impl TomlConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(EtlError::IoError)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let processed_content = Self::substitute_env_vars(content)?;

        toml::from_str(&processed_content).map_err(|e| EtlError::ConfigValidationError {
            field: "toml_parsing".to_string(),
            message: format!("TOML parsing error: {}", e),
        })
    }

    /// Replace `${VAR_NAME}` placeholders with environment values so API
    /// keys never live in the file itself.
    fn substitute_env_vars(content: &str) -> Result<String> {
        use regex::Regex;
        let re = Regex::new(r"\$\{([^}]+)\}").unwrap();

        let result = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            std::env::var(var_name).unwrap_or_else(|_| format!("${{{}}}", var_name))
        });

        Ok(result.to_string())
    }

    pub fn validate_config(&self) -> Result<()> {
        validation::validate_url("api.base_url", &self.api.base_url)?;
        validation::validate_non_empty_list("api.api_keys", &self.api.api_keys)?;
        for key in &self.api.api_keys {
            validation::validate_non_empty_string("api.api_keys", key)?;
            if key.starts_with("${") {
                return Err(EtlError::InvalidConfigValueError {
                    field: "api.api_keys".to_string(),
                    value: key.clone(),
                    reason: "environment variable is not set".to_string(),
                });
            }
        }

        validation::validate_non_empty_string("storage.database_url", &self.storage.database_url)?;

        // The upstream list endpoints accept at most 50 ids per call.
        validation::validate_range("extraction.batch_size", self.batch_size(), 1, 50)?;
        validation::validate_positive_number(
            "extraction.worker_pool_size",
            self.worker_pool_size(),
            1,
        )?;
        if self.quota_ceiling() == 0 {
            return Err(EtlError::InvalidConfigValueError {
                field: "extraction.quota_ceiling".to_string(),
                value: "0".to_string(),
                reason: "Quota ceiling must be positive".to_string(),
            });
        }
        Ok(())
    }

    pub fn batch_size(&self) -> usize {
        self.extraction.batch_size.unwrap_or(50)
    }

    pub fn worker_pool_size(&self) -> usize {
        self.extraction.worker_pool_size.unwrap_or(4)
    }

    pub fn quota_ceiling(&self) -> u64 {
        self.extraction.quota_ceiling.unwrap_or(10_000)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.api.timeout_seconds.unwrap_or(30))
    }

    pub fn database_url(&self) -> &str {
        &self.storage.database_url
    }

    pub fn tracked_channel_ids(&self) -> Vec<String> {
        self.tracking
            .as_ref()
            .and_then(|t| t.channel_ids.clone())
            .unwrap_or_default()
    }

    pub fn tracked_video_ids(&self) -> Vec<String> {
        self.tracking
            .as_ref()
            .and_then(|t| t.video_ids.clone())
            .unwrap_or_default()
    }

    pub fn monitoring_enabled(&self) -> bool {
        self.monitoring.as_ref().map(|m| m.enabled).unwrap_or(false)
    }

    pub fn system_stats_enabled(&self) -> bool {
        self.monitoring
            .as_ref()
            .and_then(|m| m.system_stats)
            .unwrap_or(false)
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            api_keys: self.api.api_keys.clone(),
            quota_ceiling: self.quota_ceiling(),
            quota_window: Duration::from_secs(
                self.extraction.quota_window_seconds.unwrap_or(24 * 3600),
            ),
            batch_size: self.batch_size(),
            worker_pool_size: self.worker_pool_size(),
            retry: RetryPolicy {
                max_attempts: self.extraction.max_retry_attempts.unwrap_or(3),
                base_delay: Duration::from_secs(
                    self.extraction.base_retry_delay_seconds.unwrap_or(1),
                ),
                max_delay: Duration::from_secs(
                    self.extraction.max_retry_delay_seconds.unwrap_or(60),
                ),
            },
            cache_ttl: Duration::from_secs(self.extraction.cache_ttl_seconds.unwrap_or(3600)),
        }
    }
}

impl Validate for TomlConfig {
    fn validate(&self) -> Result<()> {
        self.validate_config()
    }
}

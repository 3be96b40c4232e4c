pub mod config;
pub mod core;
pub mod domain;
pub mod utils;

#[cfg(feature = "cli")]
pub use config::CliConfig;
pub use config::TomlConfig;

pub use core::extractor::HttpVideoApi;
pub use core::loader::IncrementalLoader;
pub use core::pipeline::{MetricsPipeline, PipelineSettings, RunRequest};
pub use domain::model::{PipelineRunRecord, RunOutcome};
pub use utils::error::{EtlError, FetchError, FetchErrorKind, Result};

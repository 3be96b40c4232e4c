pub mod cache;
pub mod extractor;
pub mod fetcher;
pub mod loader;
pub mod pipeline;
pub mod rate_limiter;
pub mod schema;
pub mod validator;

pub use crate::domain::model::{
    ExtractOutcome, LoadReport, PipelineRunRecord, RawEntityRecord, RunOutcome,
    ValidatedEntityRecord,
};
pub use crate::domain::ports::VideoApi;
pub use crate::utils::error::Result;

use crate::domain::model::EntityKind;
use crate::utils::error::FetchError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// The API resource parts a batch lookup can request. Each part is one
/// logical operation against the upstream API and one cache fingerprint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiPart {
    Snippet,
    Statistics,
}

impl ApiPart {
    pub fn as_str(&self) -> &'static str {
        match self {
            ApiPart::Snippet => "snippet",
            ApiPart::Statistics => "statistics",
        }
    }
}

/// A successful API response body plus whatever the server disclosed about
/// the credential's remaining budget. The rate limiter adopts the hints.
#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub payload: serde_json::Value,
    pub quota_remaining: Option<u64>,
    pub quota_reset: Option<DateTime<Utc>>,
}

impl From<serde_json::Value> for ApiResponse {
    fn from(payload: serde_json::Value) -> Self {
        Self {
            payload,
            quota_remaining: None,
            quota_reset: None,
        }
    }
}

/// Port to the upstream video platform API. The production implementation
/// talks HTTP; tests swap in scripted fakes.
#[async_trait]
pub trait VideoApi: Send + Sync {
    /// One batched list call: `kind` selects the endpoint, `part` the
    /// resource section, `ids` the comma-joined id set. Classification into
    /// retryable/permanent failures happens here, where the HTTP status is
    /// known.
    async fn list(
        &self,
        kind: EntityKind,
        part: ApiPart,
        ids: &[String],
        api_key: &str,
    ) -> Result<ApiResponse, FetchError>;
}

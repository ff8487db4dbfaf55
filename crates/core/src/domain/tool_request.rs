use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Links a gated tool request to the decision that resolves it.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CorrelationId(pub String);

impl CorrelationId {
    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl fmt::Display for CorrelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PendingToolRequest {
    pub correlation_id: CorrelationId,
    pub tool_call_id: String,
    pub tool_name: String,
    pub tool_kwargs: Value,
    pub agent: String,
    pub requested_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDecision {
    pub correlation_id: CorrelationId,
    pub approved: bool,
    pub reason: Option<String>,
}

impl ToolDecision {
    pub fn approve(correlation_id: CorrelationId) -> Self {
        Self { correlation_id, approved: true, reason: None }
    }

    pub fn deny(correlation_id: CorrelationId, reason: impl Into<String>) -> Self {
        Self { correlation_id, approved: false, reason: Some(reason.into()) }
    }

    /// The reason shown to the agent, with a placeholder when a denial came without one.
    pub fn denial_reason(&self) -> &str {
        self.reason
            .as_deref()
            .map(str::trim)
            .filter(|reason| !reason.is_empty())
            .unwrap_or("no reason given")
    }
}

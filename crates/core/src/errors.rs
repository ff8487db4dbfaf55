use thiserror::Error;

use crate::domain::tool_request::CorrelationId;
use crate::domain::validation::CheckFailure;
use crate::flows::FlowTransitionError;

/// Failures talking to the language-model backend or a retrieval service.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum BackendError {
    #[error("backend unreachable at {endpoint}: {reason}")]
    Unreachable { endpoint: String, reason: String },
    #[error("backend timed out after {duration_secs}s")]
    Timeout { duration_secs: u64 },
    #[error("backend returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("backend response could not be decoded: {0}")]
    MalformedResponse(String),
    #[error("backend returned a non-numeric score: `{raw}`")]
    UnparseableScore { raw: String },
}

impl BackendError {
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::Unreachable { .. }
                | Self::Timeout { .. }
                | Self::Http { status: 429, .. }
                | Self::Http { status: 500..=599, .. }
        )
    }
}

/// Integration errors around the tool approval handshake.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ProtocolViolation {
    #[error("tool request `{outstanding}` is still pending; cannot request `{attempted_tool}`")]
    RequestOutstanding { outstanding: CorrelationId, attempted_tool: String },
    #[error("decision `{correlation_id}` does not match the pending request `{pending}`")]
    UnknownCorrelation { correlation_id: CorrelationId, pending: CorrelationId },
    #[error("decision `{correlation_id}` arrived but no tool request is pending")]
    NothingPending { correlation_id: CorrelationId },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ContextError {
    #[error("state key `{key}` holds schema v{stored}, expected v{expected}")]
    SchemaMismatch { key: String, stored: u32, expected: u32 },
    #[error("state key `{key}` could not be decoded: {reason}")]
    Decode { key: String, reason: String },
    #[error("state key `{key}` could not be encoded: {reason}")]
    Encode { key: String, reason: String },
}

/// A message blocked by a guardrail check running under the `raise` policy.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("message rejected by `{}`: {}", .failure.check, .failure.failure.reason)]
pub struct ValidationRejection {
    pub failure: CheckFailure,
    /// Failures from `noop` checks that ran before the rejecting check.
    pub advisories: Vec<CheckFailure>,
}

impl ValidationRejection {
    pub fn user_message(&self) -> String {
        format!("Your message was not accepted: {}", self.failure.failure.reason)
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OrchestrationError {
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("guardrail check `{check}` could not complete: {source}")]
    GuardrailBackend {
        check: String,
        #[source]
        source: BackendError,
    },
    #[error(transparent)]
    Protocol(#[from] ProtocolViolation),
    #[error(transparent)]
    Context(#[from] ContextError),
    #[error(transparent)]
    Flow(#[from] FlowTransitionError),
    #[error("agent `{agent}` exceeded {limit} reasoning steps in one turn")]
    StepLimitExceeded { agent: String, limit: u32 },
    #[error("workflow run timed out after {duration_secs}s")]
    TimedOut { duration_secs: u64 },
    #[error("workflow run ended unexpectedly: {0}")]
    Aborted(String),
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum InterfaceError {
    #[error("bad request: {message}")]
    BadRequest { message: String, correlation_id: String },
    #[error("service unavailable: {message}")]
    ServiceUnavailable { message: String, correlation_id: String },
    #[error("internal error: {message}")]
    Internal { message: String, correlation_id: String },
}

impl InterfaceError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::BadRequest { .. } => {
                "The request could not be processed. Check inputs and try again."
            }
            Self::ServiceUnavailable { .. } => {
                "The assistant is temporarily unavailable. Please retry shortly."
            }
            Self::Internal { .. } => "An unexpected internal error occurred.",
        }
    }
}

impl OrchestrationError {
    pub fn into_interface(self, correlation_id: impl Into<String>) -> InterfaceError {
        let correlation_id = correlation_id.into();
        let mut mapped = InterfaceError::from(self);
        match &mut mapped {
            InterfaceError::BadRequest { correlation_id: id, .. }
            | InterfaceError::ServiceUnavailable { correlation_id: id, .. }
            | InterfaceError::Internal { correlation_id: id, .. } => *id = correlation_id,
        }
        mapped
    }
}

impl From<OrchestrationError> for InterfaceError {
    fn from(value: OrchestrationError) -> Self {
        let unassigned = || "unassigned".to_owned();
        match value {
            OrchestrationError::Protocol(error) => {
                Self::BadRequest { message: error.to_string(), correlation_id: unassigned() }
            }
            error @ (OrchestrationError::Backend(_)
            | OrchestrationError::GuardrailBackend { .. }
            | OrchestrationError::TimedOut { .. }) => Self::ServiceUnavailable {
                message: error.to_string(),
                correlation_id: unassigned(),
            },
            error => Self::Internal { message: error.to_string(), correlation_id: unassigned() },
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::domain::tool_request::CorrelationId;
    use crate::domain::validation::{
        CheckFailure, FailureDetail, FailurePolicy, ValidationFailure,
    };
    use crate::errors::{
        BackendError, InterfaceError, OrchestrationError, ProtocolViolation, ValidationRejection,
    };

    #[test]
    fn protocol_violation_maps_to_bad_request() {
        let interface = OrchestrationError::from(ProtocolViolation::NothingPending {
            correlation_id: CorrelationId("c-9".to_owned()),
        })
        .into_interface("req-1");

        assert!(matches!(
            interface,
            InterfaceError::BadRequest {
                ref correlation_id,
                ..
            } if correlation_id == "req-1"
        ));
    }

    #[test]
    fn backend_failure_maps_to_service_unavailable() {
        let interface = OrchestrationError::from(BackendError::Timeout { duration_secs: 30 })
            .into_interface("req-2");

        assert!(matches!(interface, InterfaceError::ServiceUnavailable { .. }));
        assert_eq!(
            interface.user_message(),
            "The assistant is temporarily unavailable. Please retry shortly."
        );
    }

    #[test]
    fn step_limit_maps_to_internal() {
        let interface = OrchestrationError::StepLimitExceeded {
            agent: "Information Agent".to_owned(),
            limit: 4,
        }
        .into_interface("req-3");

        assert!(matches!(interface, InterfaceError::Internal { .. }));
        assert_eq!(interface.user_message(), "An unexpected internal error occurred.");
    }

    #[test]
    fn retriable_backend_errors_cover_transport_and_server_faults() {
        assert!(BackendError::Timeout { duration_secs: 5 }.is_retriable());
        assert!(BackendError::Http { status: 503, body: String::new() }.is_retriable());
        assert!(BackendError::Http { status: 429, body: String::new() }.is_retriable());
        assert!(!BackendError::Http { status: 401, body: String::new() }.is_retriable());
        assert!(!BackendError::UnparseableScore { raw: "seventy".to_owned() }.is_retriable());
    }

    #[test]
    fn rejection_user_message_carries_reason_without_internals() {
        let rejection = ValidationRejection {
            failure: CheckFailure {
                check: "topic_limit".to_owned(),
                policy: FailurePolicy::Raise,
                failure: ValidationFailure {
                    reason: "Score 10 is below threshold of 50.".to_owned(),
                    detail: FailureDetail::TopicScore { score: 10, threshold: 50 },
                    fix_value: None,
                },
            },
            advisories: Vec::new(),
        };

        assert_eq!(
            rejection.user_message(),
            "Your message was not accepted: Score 10 is below threshold of 50."
        );
        assert!(rejection.to_string().contains("topic_limit"));
    }
}

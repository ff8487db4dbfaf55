//! Domain types, configuration, audit plumbing and the tool-call state machine shared by the
//! vigil agent runtime and its command-line front end.

pub mod audit;
pub mod config;
pub mod domain;
pub mod errors;
pub mod flows;

pub use audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, InMemoryAuditSink,
    TracingAuditSink,
};
pub use domain::message::{ChatMessage, Role, ToolCall};
pub use domain::session::SessionId;
pub use domain::tool_request::{CorrelationId, PendingToolRequest, ToolDecision};
pub use domain::validation::{
    CheckFailure, FailureDetail, FailurePolicy, StructuredInputPolicy, ValidationFailure,
    ValidationResult,
};
pub use errors::{
    BackendError, ContextError, InterfaceError, OrchestrationError, ProtocolViolation,
    ValidationRejection,
};
pub use flows::{ToolCallAction, ToolCallEvent, ToolCallFlow, ToolCallState};

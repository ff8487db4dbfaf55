//! Inbound message validation.
//!
//! A [`GuardrailPipeline`] runs an ordered list of [`ValidationCheck`]s. Each check carries its
//! own [`FailurePolicy`]: `raise` stops the pipeline and rejects the message, `noop` records the
//! failure as an advisory and lets the message through, and `fix` swaps in the check's corrected
//! text (or rejects when the check offered none). A check that cannot reach its backend is a
//! hard error, never a pass or a fail.

pub mod entity;
pub mod topic;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{debug, info, warn};
use vigil_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink,
};
use vigil_core::config::GuardrailConfig;
use vigil_core::domain::validation::{CheckFailure, FailurePolicy, ValidationResult};
use vigil_core::errors::{BackendError, OrchestrationError, ValidationRejection};

use crate::llm::LlmClient;

pub use entity::{
    DenylistRecognizer, EntityMatch, EntityScreener, PersonNameRecognizer, Recognizer,
};
pub use topic::TopicClassifier;

#[async_trait]
pub trait ValidationCheck: Send + Sync {
    fn name(&self) -> &str;
    async fn check(&self, text: &str) -> Result<ValidationResult, BackendError>;
}

/// Outcome of a message that was allowed through.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationReport {
    /// The text handed to the agent; differs from the input only after a `fix`.
    pub text: String,
    pub advisories: Vec<CheckFailure>,
}

impl ValidationReport {
    pub fn is_clean(&self) -> bool {
        self.advisories.is_empty()
    }
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum GuardrailError {
    #[error(transparent)]
    Rejected(#[from] ValidationRejection),
    #[error("guardrail check `{check}` could not complete: {source}")]
    Backend {
        check: String,
        #[source]
        source: BackendError,
    },
}

/// A check whose configuration cannot be turned into a working matcher.
#[derive(Debug, Error)]
#[error("guardrail check `{check}` could not be configured: {source}")]
pub struct GuardrailSetupError {
    pub check: String,
    #[source]
    pub source: regex::Error,
}

impl GuardrailError {
    /// Splits a rejection (a normal outcome) from a failure that must abort the turn.
    pub fn into_rejection(self) -> Result<ValidationRejection, OrchestrationError> {
        match self {
            Self::Rejected(rejection) => Ok(rejection),
            Self::Backend { check, source } => {
                Err(OrchestrationError::GuardrailBackend { check, source })
            }
        }
    }
}

struct Stage {
    check: Arc<dyn ValidationCheck>,
    policy: FailurePolicy,
}

pub struct GuardrailPipeline {
    stages: Vec<Stage>,
    audit: Arc<dyn AuditSink>,
}

impl Default for GuardrailPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl GuardrailPipeline {
    pub fn new() -> Self {
        Self { stages: Vec::new(), audit: Arc::new(TracingAuditSink) }
    }

    /// Topic gate first, then entity screening, each switched and tuned by config.
    pub fn from_config(
        config: &GuardrailConfig,
        llm: Arc<dyn LlmClient>,
        model: &str,
    ) -> Result<Self, GuardrailSetupError> {
        let mut pipeline = Self::new();
        if config.topic_enabled {
            pipeline = pipeline
                .with_check(TopicClassifier::from_config(config, llm, model), config.topic_on_fail);
        }
        if config.pii_enabled {
            let screener = EntityScreener::from_config(config)?;
            pipeline = pipeline.with_check(screener, config.pii_on_fail);
        }
        Ok(pipeline)
    }

    pub fn with_check<C>(self, check: C, policy: FailurePolicy) -> Self
    where
        C: ValidationCheck + 'static,
    {
        self.with_shared_check(Arc::new(check), policy)
    }

    pub fn with_shared_check(
        mut self,
        check: Arc<dyn ValidationCheck>,
        policy: FailurePolicy,
    ) -> Self {
        self.stages.push(Stage { check, policy });
        self
    }

    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn checks(&self) -> Vec<(&str, FailurePolicy)> {
        self.stages.iter().map(|stage| (stage.check.name(), stage.policy)).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub async fn validate(
        &self,
        message: &str,
        audit: &AuditContext,
    ) -> Result<ValidationReport, GuardrailError> {
        let mut text = message.to_string();
        let mut advisories = Vec::new();

        for stage in &self.stages {
            let name = stage.check.name();
            let result = stage.check.check(&text).await.map_err(|source| {
                warn!(
                    event_name = "guardrail.check_errored",
                    correlation_id = %audit.correlation_id,
                    check = name,
                    error = %source,
                    "guardrail check could not complete"
                );
                GuardrailError::Backend { check: name.to_string(), source }
            })?;

            let ValidationResult::Fail(failure) = result else {
                debug!(
                    event_name = "guardrail.check_passed",
                    correlation_id = %audit.correlation_id,
                    check = name,
                    "guardrail check passed"
                );
                continue;
            };

            let failure = CheckFailure { check: name.to_string(), policy: stage.policy, failure };
            match stage.policy {
                FailurePolicy::Noop => {
                    warn!(
                        event_name = "guardrail.advisory_failure",
                        correlation_id = %audit.correlation_id,
                        check = name,
                        reason = %failure.failure.reason,
                        "guardrail check failed; message allowed"
                    );
                    self.record(audit, &failure, AuditOutcome::Success);
                    advisories.push(failure);
                }
                FailurePolicy::Fix if failure.failure.fix_value.is_some() => {
                    info!(
                        event_name = "guardrail.message_fixed",
                        correlation_id = %audit.correlation_id,
                        check = name,
                        "guardrail check substituted its fix value"
                    );
                    self.record(audit, &failure, AuditOutcome::Success);
                    text = failure.failure.fix_value.clone().unwrap_or_default();
                    advisories.push(failure);
                }
                FailurePolicy::Fix | FailurePolicy::Raise => {
                    info!(
                        event_name = "guardrail.message_rejected",
                        correlation_id = %audit.correlation_id,
                        check = name,
                        reason = %failure.failure.reason,
                        "guardrail check rejected message"
                    );
                    self.record(audit, &failure, AuditOutcome::Rejected);
                    let rejection = ValidationRejection { failure, advisories };
                    return Err(GuardrailError::Rejected(rejection));
                }
            }
        }

        Ok(ValidationReport { text, advisories })
    }

    fn record(&self, audit: &AuditContext, failure: &CheckFailure, outcome: AuditOutcome) {
        self.audit.emit(
            AuditEvent::from_context(
                audit,
                "guardrail.check_failed",
                AuditCategory::Guardrail,
                outcome,
            )
            .with_metadata("check", failure.check.clone())
            .with_metadata("policy", failure.policy.to_string())
            .with_metadata("reason", failure.failure.reason.clone()),
        );
    }
}

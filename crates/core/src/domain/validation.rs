use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// What the pipeline does when a check fails.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort the pipeline and reject the message.
    Raise,
    /// Record the failure and keep going; the message is still allowed.
    #[serde(alias = "no-op", alias = "no_op")]
    Noop,
    /// Substitute the check's fix value, or behave like `Raise` when it has none.
    Fix,
}

impl FromStr for FailurePolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "raise" | "exception" => Ok(Self::Raise),
            "noop" | "no-op" | "no_op" => Ok(Self::Noop),
            "fix" => Ok(Self::Fix),
            other => Err(format!("unsupported failure policy `{other}` (expected raise|noop|fix)")),
        }
    }
}

impl fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Raise => "raise",
            Self::Noop => "noop",
            Self::Fix => "fix",
        })
    }
}

/// How the topic classifier treats input that is structured data rather than prose.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructuredInputPolicy {
    /// JSON objects and arrays score 100 without a backend round trip.
    #[default]
    AutoPass,
    /// Structured input is sent to the backend like any other text.
    Classify,
}

impl FromStr for StructuredInputPolicy {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "auto_pass" | "auto-pass" => Ok(Self::AutoPass),
            "classify" => Ok(Self::Classify),
            other => Err(format!(
                "unsupported structured input policy `{other}` (expected auto_pass|classify)"
            )),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureDetail {
    TopicScore { score: u8, threshold: u8 },
    Entities { entity_types: Vec<String> },
    Other { detail: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationFailure {
    pub reason: String,
    pub detail: FailureDetail,
    pub fix_value: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ValidationResult {
    Pass,
    Fail(ValidationFailure),
}

impl ValidationResult {
    pub fn fail(reason: impl Into<String>, detail: FailureDetail) -> Self {
        Self::Fail(ValidationFailure { reason: reason.into(), detail, fix_value: None })
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, Self::Pass)
    }

    pub fn failure(&self) -> Option<&ValidationFailure> {
        match self {
            Self::Pass => None,
            Self::Fail(failure) => Some(failure),
        }
    }
}

/// A failed check together with the policy that was applied to it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckFailure {
    pub check: String,
    pub policy: FailurePolicy,
    pub failure: ValidationFailure,
}

#[cfg(test)]
mod tests {
    use super::{FailureDetail, FailurePolicy, StructuredInputPolicy, ValidationResult};

    #[test]
    fn failure_policy_accepts_hyphenated_noop() {
        assert_eq!("no-op".parse::<FailurePolicy>(), Ok(FailurePolicy::Noop));
        assert_eq!("RAISE".parse::<FailurePolicy>(), Ok(FailurePolicy::Raise));
        assert!("retry".parse::<FailurePolicy>().is_err());
    }

    #[test]
    fn structured_input_policy_defaults_to_auto_pass() {
        assert_eq!(StructuredInputPolicy::default(), StructuredInputPolicy::AutoPass);
        assert_eq!("classify".parse(), Ok(StructuredInputPolicy::Classify));
    }

    #[test]
    fn fail_result_exposes_its_failure() {
        let result = ValidationResult::fail(
            "User input contains PII: PERSON",
            FailureDetail::Entities { entity_types: vec!["PERSON".to_string()] },
        );
        assert!(!result.is_pass());
        assert_eq!(
            result.failure().map(|failure| failure.reason.as_str()),
            Some("User input contains PII: PERSON")
        );
        assert!(ValidationResult::Pass.failure().is_none());
    }
}

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;
use vigil_core::config::GuardrailConfig;
use vigil_core::domain::message::ChatMessage;
use vigil_core::domain::validation::{FailureDetail, StructuredInputPolicy, ValidationResult};
use vigil_core::errors::BackendError;

use crate::guardrails::ValidationCheck;
use crate::llm::{Completion, CompletionRequest, LlmClient};

/// Scores how related a message is to one topic and gates on a threshold.
pub struct TopicClassifier {
    llm: Arc<dyn LlmClient>,
    model: String,
    topic: String,
    threshold: u8,
    structured_input: StructuredInputPolicy,
}

impl TopicClassifier {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        model: impl Into<String>,
        topic: impl Into<String>,
        threshold: u8,
    ) -> Self {
        Self {
            llm,
            model: model.into(),
            topic: topic.into(),
            threshold,
            structured_input: StructuredInputPolicy::default(),
        }
    }

    pub fn from_config(config: &GuardrailConfig, llm: Arc<dyn LlmClient>, model: &str) -> Self {
        Self::new(llm, model, config.topic.clone(), config.topic_threshold)
            .with_structured_input(config.structured_input)
    }

    pub fn with_structured_input(mut self, policy: StructuredInputPolicy) -> Self {
        self.structured_input = policy;
        self
    }

    pub fn threshold(&self) -> u8 {
        self.threshold
    }

    pub fn instruction(&self) -> String {
        let topic = &self.topic;
        format!(
            "You are a helpful assistant.\n\
             Analyze the other messages provided and respond with a number between 0 and 100 \
             and nothing else.\n\
             Do not output prose.\n\
             0 means the messages is not related to {topic}.\n\
             100 means the messages is related to {topic}.\n\
             If the message is not a sentence like json, return 100.\n"
        )
    }

    /// Relatedness score in `0..=100`. Temperature is pinned to zero.
    pub async fn score(&self, text: &str) -> Result<u8, BackendError> {
        if self.structured_input == StructuredInputPolicy::AutoPass && is_structured(text) {
            debug!(event_name = "guardrail.topic_structured_input", "structured input scored 100");
            return Ok(100);
        }

        let messages = vec![ChatMessage::system(self.instruction()), ChatMessage::user(text)];
        let request = CompletionRequest::new(&self.model, messages, 0.0);
        let completion = self.llm.complete(request).await?;
        match completion {
            Completion::Text(raw) => parse_score(&raw),
            Completion::ToolCalls(_) => Err(BackendError::MalformedResponse(
                "topic classifier expected a score but received a tool call".to_string(),
            )),
        }
    }

    /// Passes only when the score is strictly above `threshold`.
    pub async fn classify(
        &self,
        text: &str,
        threshold: u8,
    ) -> Result<ValidationResult, BackendError> {
        let score = self.score(text).await?;
        if score > threshold {
            return Ok(ValidationResult::Pass);
        }
        Ok(ValidationResult::fail(
            format!("{text} failed validation. Score {score} is below threshold of {threshold}."),
            FailureDetail::TopicScore { score, threshold },
        ))
    }
}

#[async_trait]
impl ValidationCheck for TopicClassifier {
    fn name(&self) -> &str {
        "topic_limit"
    }

    async fn check(&self, text: &str) -> Result<ValidationResult, BackendError> {
        self.classify(text, self.threshold).await
    }
}

fn parse_score(raw: &str) -> Result<u8, BackendError> {
    let trimmed = raw.trim().trim_end_matches('.');
    match trimmed.parse::<u16>() {
        Ok(score) if score <= 100 => Ok(score as u8),
        _ => Err(BackendError::UnparseableScore { raw: raw.to_string() }),
    }
}

fn is_structured(text: &str) -> bool {
    let trimmed = text.trim();
    (trimmed.starts_with('{') || trimmed.starts_with('['))
        && matches!(serde_json::from_str::<Value>(trimmed), Ok(Value::Object(_) | Value::Array(_)))
}

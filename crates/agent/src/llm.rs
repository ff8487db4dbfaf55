use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client as HttpClient;
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Map, Value};
use tracing::{debug, warn};
use vigil_core::config::LlmConfig;
use vigil_core::domain::message::{ChatMessage, Role, ToolCall};
use vigil_core::errors::BackendError;

use crate::tools::{ToolChoice, ToolSchema};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const MAX_ERROR_BODY_CHARS: usize = 512;

#[derive(Clone, Debug, PartialEq)]
pub struct CompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub tools: Vec<ToolSchema>,
    pub tool_choice: Option<ToolChoice>,
}

impl CompletionRequest {
    pub fn new(model: impl Into<String>, messages: Vec<ChatMessage>, temperature: f32) -> Self {
        Self { model: model.into(), messages, temperature, tools: Vec::new(), tool_choice: None }
    }

    pub fn with_tools(mut self, tools: Vec<ToolSchema>, tool_choice: Option<ToolChoice>) -> Self {
        self.tools = tools;
        self.tool_choice = tool_choice;
        self
    }

    /// OpenAI `/chat/completions` request body.
    pub fn to_wire(&self) -> Value {
        let mut body = Map::new();
        body.insert("model".to_string(), json!(self.model));
        body.insert(
            "messages".to_string(),
            Value::Array(self.messages.iter().map(wire_message).collect()),
        );
        body.insert("temperature".to_string(), json!(self.temperature));
        if !self.tools.is_empty() {
            body.insert(
                "tools".to_string(),
                Value::Array(self.tools.iter().map(ToolSchema::to_wire).collect()),
            );
            if let Some(choice) = self.tool_choice {
                body.insert("tool_choice".to_string(), json!(choice.as_str()));
            }
        }
        Value::Object(body)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Completion {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, BackendError>;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_retries: 2, base_delay_ms: 250, max_delay_ms: 5_000 }
    }
}

impl RetryPolicy {
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(16);
        let multiplier = 1_u64 << exponent;
        let delay_ms = self.base_delay_ms.saturating_mul(multiplier).min(self.max_delay_ms);
        Duration::from_millis(delay_ms)
    }
}

/// Client for any endpoint speaking the OpenAI chat-completions protocol.
pub struct OpenAiCompatibleClient {
    http: HttpClient,
    base_url: String,
    api_key: Option<SecretString>,
    timeout_secs: u64,
    retry: RetryPolicy,
}

impl OpenAiCompatibleClient {
    pub fn from_config(config: &LlmConfig) -> Result<Self, BackendError> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let http = HttpClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|error| BackendError::Unreachable {
                endpoint: base_url.clone(),
                reason: format!("failed to build HTTP client: {error}"),
            })?;

        Ok(Self {
            http,
            base_url,
            api_key: config.api_key.clone(),
            timeout_secs: config.timeout_secs,
            retry: RetryPolicy { max_retries: config.max_retries, ..RetryPolicy::default() },
        })
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Lists models to confirm the endpoint is reachable and accepts the credentials.
    pub async fn count_models(&self) -> Result<usize, BackendError> {
        let endpoint = format!("{}/models", self.base_url);
        let mut request = self.http.get(&endpoint);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }
        let response = request.send().await.map_err(|error| self.transport_error(error))?;
        let body = read_success_body(response).await?;
        Ok(body.get("data").and_then(Value::as_array).map_or(0, Vec::len))
    }

    async fn send_once(&self, body: &Value) -> Result<Value, BackendError> {
        let endpoint = format!("{}/chat/completions", self.base_url);
        let mut request = self.http.post(&endpoint).json(body);
        if let Some(api_key) = &self.api_key {
            request = request.bearer_auth(api_key.expose_secret());
        }
        let response = request.send().await.map_err(|error| self.transport_error(error))?;
        read_success_body(response).await
    }

    fn transport_error(&self, error: reqwest::Error) -> BackendError {
        if error.is_timeout() {
            BackendError::Timeout { duration_secs: self.timeout_secs }
        } else {
            BackendError::Unreachable { endpoint: self.base_url.clone(), reason: error.to_string() }
        }
    }
}

#[async_trait]
impl LlmClient for OpenAiCompatibleClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, BackendError> {
        let body = request.to_wire();
        let mut attempt = 0;

        loop {
            match self.send_once(&body).await {
                Ok(response) => {
                    debug!(
                        event_name = "llm.completion_received",
                        model = %request.model,
                        attempt,
                        "backend completion received"
                    );
                    return parse_completion(&response);
                }
                Err(error) if error.is_retriable() && attempt < self.retry.max_retries => {
                    let delay = self.retry.backoff(attempt);
                    warn!(
                        event_name = "llm.request_retry",
                        model = %request.model,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "backend request failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

async fn read_success_body(response: reqwest::Response) -> Result<Value, BackendError> {
    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BackendError::Http {
            status: status.as_u16(),
            body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
        });
    }
    response
        .json::<Value>()
        .await
        .map_err(|error| BackendError::MalformedResponse(error.to_string()))
}

fn role_name(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn wire_message(message: &ChatMessage) -> Value {
    let mut wire = Map::new();
    wire.insert("role".to_string(), json!(role_name(message.role)));

    if message.tool_calls.is_empty() {
        wire.insert("content".to_string(), json!(message.content));
    } else {
        let content = if message.content.is_empty() { Value::Null } else { json!(message.content) };
        wire.insert("content".to_string(), content);
        let calls = message
            .tool_calls
            .iter()
            .map(|call| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": { "name": call.name, "arguments": call.arguments.to_string() },
                })
            })
            .collect();
        wire.insert("tool_calls".to_string(), Value::Array(calls));
    }

    if let Some(tool_call_id) = &message.tool_call_id {
        wire.insert("tool_call_id".to_string(), json!(tool_call_id));
    }
    Value::Object(wire)
}

/// Reads the first choice of a non-streaming chat-completions response.
pub fn parse_completion(body: &Value) -> Result<Completion, BackendError> {
    let message = body
        .get("choices")
        .and_then(Value::as_array)
        .and_then(|choices| choices.first())
        .and_then(|choice| choice.get("message"))
        .ok_or_else(|| BackendError::MalformedResponse("response has no choices".to_string()))?;

    let raw_calls = message.get("tool_calls").and_then(Value::as_array);
    if let Some(raw_calls) = raw_calls.filter(|calls| !calls.is_empty()) {
        let calls = raw_calls.iter().map(parse_tool_call).collect::<Result<Vec<_>, _>>()?;
        return Ok(Completion::ToolCalls(calls));
    }

    match message.get("content") {
        Some(Value::String(content)) => Ok(Completion::Text(content.clone())),
        _ => Err(BackendError::MalformedResponse(
            "message has neither content nor tool calls".to_string(),
        )),
    }
}

fn parse_tool_call(raw: &Value) -> Result<ToolCall, BackendError> {
    let function = raw
        .get("function")
        .ok_or_else(|| BackendError::MalformedResponse("tool call has no function".to_string()))?;
    let name = function
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| BackendError::MalformedResponse("tool call has no name".to_string()))?;
    let arguments = match function.get("arguments") {
        Some(Value::String(encoded)) if encoded.trim().is_empty() => json!({}),
        Some(Value::String(encoded)) => serde_json::from_str(encoded).map_err(|error| {
            BackendError::MalformedResponse(format!("arguments for `{name}` are not JSON: {error}"))
        })?,
        Some(other) => other.clone(),
        None => json!({}),
    };
    let id = raw
        .get("id")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));

    Ok(ToolCall { id, name: name.to_string(), arguments })
}

/// Deterministic [`LlmClient`] that replays queued responses and records every request.
#[derive(Clone, Default)]
pub struct ScriptedLlmClient {
    responses: Arc<Mutex<VecDeque<Result<Completion, BackendError>>>>,
    requests: Arc<Mutex<Vec<CompletionRequest>>>,
}

impl ScriptedLlmClient {
    pub fn new<I>(responses: I) -> Self
    where
        I: IntoIterator<Item = Completion>,
    {
        let client = Self::default();
        for response in responses {
            client.push(Ok(response));
        }
        client
    }

    pub fn push(&self, response: Result<Completion, BackendError>) {
        match self.responses.lock() {
            Ok(mut responses) => responses.push_back(response),
            Err(poisoned) => poisoned.into_inner().push_back(response),
        }
    }

    pub fn push_text(&self, text: impl Into<String>) {
        self.push(Ok(Completion::Text(text.into())));
    }

    pub fn push_tool_call(&self, name: impl Into<String>, arguments: Value) {
        self.push(Ok(Completion::ToolCalls(vec![ToolCall {
            id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            name: name.into(),
            arguments,
        }])));
    }

    pub fn requests(&self) -> Vec<CompletionRequest> {
        match self.requests.lock() {
            Ok(requests) => requests.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn remaining(&self) -> usize {
        match self.responses.lock() {
            Ok(responses) => responses.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, request: CompletionRequest) -> Result<Completion, BackendError> {
        match self.requests.lock() {
            Ok(mut requests) => requests.push(request),
            Err(poisoned) => poisoned.into_inner().push(request),
        }
        let next = match self.responses.lock() {
            Ok(mut responses) => responses.pop_front(),
            Err(poisoned) => poisoned.into_inner().pop_front(),
        };
        next.unwrap_or_else(|| {
            Err(BackendError::MalformedResponse("scripted client ran out of responses".to_string()))
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;
    use vigil_core::domain::message::{ChatMessage, ToolCall};
    use vigil_core::errors::BackendError;

    use super::{
        parse_completion, Completion, CompletionRequest, LlmClient, RetryPolicy, ScriptedLlmClient,
    };
    use crate::tools::{ToolChoice, ToolSchema};

    #[test]
    fn parses_tool_call_arguments_from_encoded_string() {
        let body = json!({
            "choices": [{
                "message": {
                    "role": "assistant",
                    "content": null,
                    "tool_calls": [{
                        "id": "call_abc",
                        "type": "function",
                        "function": {
                            "name": "sum_numbers",
                            "arguments": "{\"x\":\"3\",\"y\":\"2\"}"
                        }
                    }]
                }
            }]
        });

        let completion = parse_completion(&body);
        assert_eq!(
            completion,
            Ok(Completion::ToolCalls(vec![ToolCall {
                id: "call_abc".to_string(),
                name: "sum_numbers".to_string(),
                arguments: json!({ "x": "3", "y": "2" }),
            }]))
        );
    }

    #[test]
    fn parses_plain_text_completion() {
        let body = json!({ "choices": [{ "message": { "role": "assistant", "content": "72" } }] });
        assert_eq!(parse_completion(&body), Ok(Completion::Text("72".to_string())));
    }

    #[test]
    fn missing_choices_is_malformed() {
        let result = parse_completion(&json!({ "error": "nope" }));
        assert!(matches!(result, Err(BackendError::MalformedResponse(_))));
    }

    #[test]
    fn request_body_carries_tools_and_choice() {
        let messages = vec![ChatMessage::user("calculate 3+2")];
        let request = CompletionRequest::new("gpt-4o", messages, 0.0).with_tools(
            vec![ToolSchema::without_parameters("get_weather", "weather")],
            Some(ToolChoice::Required),
        );

        let body = request.to_wire();
        assert_eq!(body["tool_choice"], "required");
        assert_eq!(body["tools"][0]["function"]["name"], "get_weather");
        assert_eq!(body["messages"][0]["role"], "user");
    }

    #[test]
    fn tool_choice_is_omitted_without_tools() {
        let request = CompletionRequest::new("gpt-4o", vec![ChatMessage::user("hi")], 0.0)
            .with_tools(Vec::new(), Some(ToolChoice::Required));
        assert!(request.to_wire().get("tool_choice").is_none());
    }

    #[test]
    fn tool_history_is_encoded_for_the_wire() {
        let call = ToolCall {
            id: "call_1".to_string(),
            name: "sum_numbers".to_string(),
            arguments: json!({ "x": "3", "y": "2" }),
        };
        let request = CompletionRequest::new(
            "gpt-4o",
            vec![ChatMessage::assistant_tool_calls(vec![call]), ChatMessage::tool("call_1", "5")],
            0.0,
        );

        let body = request.to_wire();
        let encoded = &body["messages"][0]["tool_calls"][0]["function"]["arguments"];
        assert_eq!(encoded, "{\"x\":\"3\",\"y\":\"2\"}");
        assert_eq!(body["messages"][1]["tool_call_id"], "call_1");
    }

    #[test]
    fn backoff_is_exponential_and_capped() {
        let policy = RetryPolicy { max_retries: 5, base_delay_ms: 100, max_delay_ms: 1_000 };
        assert_eq!(policy.backoff(0), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(400));
        assert_eq!(policy.backoff(10), Duration::from_millis(1_000));
    }

    #[tokio::test]
    async fn scripted_client_replays_in_order_and_records_requests() {
        let client = ScriptedLlmClient::new([Completion::Text("first".to_string())]);
        client.push_text("second");

        let request = CompletionRequest::new("test-model", vec![ChatMessage::user("hi")], 0.0);
        let first = client.complete(request.clone()).await;
        let second = client.complete(request.clone()).await;
        assert_eq!(first, Ok(Completion::Text("first".to_string())));
        assert_eq!(second, Ok(Completion::Text("second".to_string())));
        assert!(client.complete(request).await.is_err());
        assert_eq!(client.requests().len(), 3);
        assert_eq!(client.remaining(), 0);
    }
}

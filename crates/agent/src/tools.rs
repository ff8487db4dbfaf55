use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use vigil_core::domain::session::SessionId;

use crate::context::TurnContext;
use crate::events::{EventSender, WorkflowEvent};

/// How strongly the backend is pushed towards calling one of the offered tools.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolChoice {
    #[default]
    Auto,
    Required,
    None,
}

impl ToolChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Required => "required",
            Self::None => "none",
        }
    }
}

/// Strict function schema: every property is listed and no others are accepted.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl ToolSchema {
    pub fn strict(
        name: impl Into<String>,
        description: impl Into<String>,
        properties: Map<String, Value>,
        required: &[&str],
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters: json!({
                "type": "object",
                "properties": properties,
                "required": required,
                "additionalProperties": false,
            }),
        }
    }

    pub fn without_parameters(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self::strict(name, description, Map::new(), &[])
    }

    /// OpenAI `tools[]` entry.
    pub fn to_wire(&self) -> Value {
        json!({
            "type": "function",
            "function": {
                "name": self.name,
                "description": self.description,
                "parameters": self.parameters,
                "strict": true,
            }
        })
    }
}

/// What a tool can see and touch while it runs.
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: SessionId,
    pub agent: String,
    pub state: TurnContext,
    pub events: EventSender,
}

impl ToolContext {
    pub fn progress(&self, message: impl Into<String>) {
        self.events.emit(WorkflowEvent::Progress {
            agent: self.agent.clone(),
            message: message.into(),
        });
    }
}

#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;
    fn schema(&self) -> ToolSchema;
    async fn execute(&self, context: &ToolContext, input: Value) -> Result<String>;
}

/// Ordered tool set owned by one agent.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn register<T>(&mut self, tool: T)
    where
        T: Tool + 'static,
    {
        self.register_shared(Arc::new(tool));
    }

    /// Registering a name twice replaces the earlier tool in place.
    pub fn register_shared(&mut self, tool: Arc<dyn Tool>) {
        match self.tools.iter().position(|existing| existing.name() == tool.name()) {
            Some(index) => self.tools[index] = tool,
            None => self.tools.push(tool),
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.iter().find(|tool| tool.name() == name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|tool| tool.name() == name)
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|tool| tool.schema()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

//! Demo health agents and their mocked lookup tools.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use vigil_agent::registry::RegistryError;
use vigil_agent::{AgentConfig, AgentRegistry, StateKey, Tool, ToolContext, ToolSchema};

pub const HEALTH_COACH: &str = "Health Coach Agent";
pub const INFORMATION: &str = "Information Agent";

const HEALTH_COACH_PROMPT: &str = "\
You are a helpful assistant that is coaching a user to have better health.
You must follow those steps:
1. call \"get_user_information\" to get the user_persona and user tasks.
2. call \"get_reference_from_rag\" to get the reference information from RAG.
3. Ask user the goal of health coaching.
4. Use the information from step 1 and 2 and the user's goal to generate 3 related tasks, \
MUST give the suggestion directly, DO NOT ask user question.
Note: the function call might be rejected by the user, if so, MUST highlight function call \
status in the beginning of your response.";

const INFORMATION_PROMPT: &str = "\
You are a helpful assistant that is answering the question from a user.
Your task is to answer the question related to health, if the question is not related to \
health, you still need to answer it but with a gentle reminder in the end of response.";

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPersona {
    pub age: u32,
    pub weight_kg: u32,
    pub height_cm: u32,
}

/// Profile gathered by the health-coach tools over a session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserState {
    pub user_persona: Option<UserPersona>,
    #[serde(default)]
    pub user_tasks: Vec<String>,
    #[serde(default)]
    pub user_reference: Vec<String>,
}

pub const USER_STATE: StateKey<UserState> = StateKey::new("user_state", 1);

/// Mocked profile lookup. Requires human confirmation before it runs.
pub struct GetUserInformation;

#[async_trait]
impl Tool for GetUserInformation {
    fn name(&self) -> &'static str {
        "get_user_information"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::without_parameters(
            self.name(),
            "Get the user information from API and Database.",
        )
    }

    async fn execute(&self, context: &ToolContext, _input: Value) -> anyhow::Result<String> {
        context.progress("Retrieving user information");
        let state = context
            .state
            .update(&USER_STATE, |state| {
                state.user_persona = Some(UserPersona { age: 25, weight_kg: 70, height_cm: 180 });
                state.user_tasks =
                    ["walk 1000 steps", "eat two apples"].map(str::to_string).to_vec();
            })
            .await?;

        let persona = serde_json::to_string(&state.user_persona)?;
        let tasks = serde_json::to_string(&state.user_tasks)?;
        Ok(format!("The user information is {persona} and the user tasks are {tasks}."))
    }
}

/// Mocked retrieval call.
pub struct GetReferenceFromRag;

#[async_trait]
impl Tool for GetReferenceFromRag {
    fn name(&self) -> &'static str {
        "get_reference_from_rag"
    }

    fn schema(&self) -> ToolSchema {
        ToolSchema::without_parameters(self.name(), "Get more reference from RAG.")
    }

    async fn execute(&self, context: &ToolContext, _input: Value) -> anyhow::Result<String> {
        context.progress("Retrieving reference from RAG");
        let state = context
            .state
            .update(&USER_STATE, |state| {
                state.user_reference = vec![
                    "Walking regularly helps you grow taller and helps you sleep".to_string(),
                    "Eating fruits can ensure normal intake of vitamins and contribute to health"
                        .to_string(),
                ];
            })
            .await?;

        let reference = serde_json::to_string(&state.user_reference)?;
        Ok(format!("The reference information from RAG is {reference}."))
    }
}

pub fn health_coach() -> AgentConfig {
    AgentConfig::new(HEALTH_COACH, "Coach the user to have a better health", HEALTH_COACH_PROMPT)
        .with_gated_tool(GetUserInformation)
        .with_tool(GetReferenceFromRag)
        .with_keywords(["plan", "goal", "exercise", "fitness", "tasks"])
}

pub fn information() -> AgentConfig {
    AgentConfig::new(INFORMATION, "Answer user's question related to health", INFORMATION_PROMPT)
}

/// Registration order is routing tie-break order; the information agent is the fallback.
pub fn health_agents() -> Result<AgentRegistry, RegistryError> {
    AgentRegistry::new(vec![health_coach(), information()])?.with_fallback(INFORMATION)
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use vigil_agent::{event_channel, Tool, ToolContext, TurnContext, WorkflowEvent};
    use vigil_core::SessionId;

    use super::{
        health_agents, GetReferenceFromRag, GetUserInformation, HEALTH_COACH, USER_STATE,
    };

    #[test]
    fn only_user_information_is_gated() -> Result<(), String> {
        let agents = health_agents().map_err(|error| error.to_string())?;
        let coach = agents.get(HEALTH_COACH).ok_or("coach missing")?;

        assert!(coach.requires_confirmation("get_user_information"));
        assert!(!coach.requires_confirmation("get_reference_from_rag"));
        assert_eq!(agents.fallback().name(), "Information Agent");
        assert!(agents.fallback().tools().is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn lookups_fill_the_shared_user_state() -> anyhow::Result<()> {
        let (events, mut stream) = event_channel();
        let context = ToolContext {
            session_id: SessionId("session-1".to_string()),
            agent: HEALTH_COACH.to_string(),
            state: TurnContext::default(),
            events,
        };

        let info = GetUserInformation.execute(&context, json!({})).await?;
        let reference = GetReferenceFromRag.execute(&context, json!({})).await?;

        assert!(info.contains("walk 1000 steps"));
        assert!(reference.starts_with("The reference information from RAG is"));
        let state = context.state.get(&USER_STATE).await?.unwrap_or_default();
        assert_eq!(state.user_persona.map(|persona| persona.age), Some(25));
        assert_eq!(state.user_tasks.len(), 2);
        assert_eq!(state.user_reference.len(), 2);

        let progress: Vec<WorkflowEvent> = stream.drain();
        assert_eq!(
            progress,
            vec![
                WorkflowEvent::Progress {
                    agent: HEALTH_COACH.to_string(),
                    message: "Retrieving user information".to_string(),
                },
                WorkflowEvent::Progress {
                    agent: HEALTH_COACH.to_string(),
                    message: "Retrieving reference from RAG".to_string(),
                },
            ]
        );
        Ok(())
    }
}

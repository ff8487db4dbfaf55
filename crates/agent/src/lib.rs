//! Agent Runtime - guarded, human-in-the-loop orchestration of specialist agents
//!
//! This crate provides the moving parts of a vigil session:
//! - Screens every inbound message through an ordered guardrail pipeline
//! - Routes the message to the best-matching specialist agent
//! - Runs the agent's reasoning loop against an OpenAI-compatible backend
//! - Suspends on tools that require human confirmation and resumes on a decision
//!
//! # Architecture
//!
//! One turn flows through:
//! 1. **Validation** (`guardrails`) - entity screening and topic gating, per-check policy
//! 2. **Routing** (`router`) - keyword overlap against agent descriptions, sticky while a
//!    tool decision is pending
//! 3. **Agent step** (`runtime`) - completion loop with inline ungated tools
//! 4. **Tool gate** (`gate`) - one pending request per session, resolved by correlation id
//!
//! Lifecycle events (progress, approval requests, results) are published on the
//! session's [`events::EventStream`] in emission order.
//!
//! # Key Types
//!
//! - `AgentRuntime` - turn orchestrator (see `runtime` module)
//! - `LlmClient` - pluggable backend trait; `OpenAiCompatibleClient` for HTTP,
//!   `ScriptedLlmClient` for deterministic tests
//! - `GuardrailPipeline` - ordered checks with `raise | noop | fix` policies
//! - `TurnContext` - typed, versioned session state shared by router and tools

pub mod context;
pub mod events;
pub mod gate;
pub mod guardrails;
pub mod llm;
pub mod memory;
pub mod registry;
pub mod router;
pub mod runtime;
pub mod tools;

pub use context::{StateKey, TurnContext};
pub use events::{event_channel, EventSender, EventStream, WorkflowEvent};
pub use guardrails::{GuardrailPipeline, ValidationCheck, ValidationReport};
pub use llm::{Completion, CompletionRequest, LlmClient, OpenAiCompatibleClient, ScriptedLlmClient};
pub use memory::ConversationMemory;
pub use registry::{AgentConfig, AgentRegistry};
pub use runtime::{
    AgentRuntime, DecisionSender, RuntimeSettings, Session, TurnOutcome, TurnResult,
    WorkflowHandle, WorkflowRun,
};
pub use tools::{Tool, ToolChoice, ToolContext, ToolRegistry, ToolSchema};

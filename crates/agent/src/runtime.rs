//! Session orchestration: validate, route, run the agent step, gate tool calls.
//!
//! An agent step is a loop of completions. Ungated tool calls run inline and their results go
//! back into the history; a gated call suspends the step until a [`ToolDecision`] with the same
//! correlation id arrives. Suspension is plain data ([`Session`] keeps the queued calls), so a
//! step can be resumed from [`AgentRuntime::resolve`] or driven end to end by
//! [`AgentRuntime::spawn_turn`].

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use vigil_core::audit::{
    AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink, TracingAuditSink,
};
use vigil_core::config::AppConfig;
use vigil_core::domain::message::{ChatMessage, ToolCall};
use vigil_core::domain::session::SessionId;
use vigil_core::domain::tool_request::{CorrelationId, PendingToolRequest, ToolDecision};
use vigil_core::domain::validation::CheckFailure;
use vigil_core::errors::{OrchestrationError, ProtocolViolation, ValidationRejection};

use crate::context::TurnContext;
use crate::events::{event_channel, EventSender, EventStream, WorkflowEvent};
use crate::gate::{ClearedCall, Resolution, Selection, ToolGate};
use crate::guardrails::{GuardrailPipeline, GuardrailSetupError};
use crate::llm::{Completion, CompletionRequest, LlmClient};
use crate::registry::{AgentConfig, AgentRegistry};
use crate::router::KeywordRouter;
use crate::tools::ToolContext;

const DECISION_BUFFER: usize = 8;

#[derive(Clone, Debug, PartialEq)]
pub struct RuntimeSettings {
    pub model: String,
    pub temperature: f32,
    pub max_agent_steps: u32,
    /// `None` keeps a workflow run open until a decision arrives.
    pub run_timeout: Option<Duration>,
}

impl RuntimeSettings {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            model: config.llm.model.clone(),
            temperature: config.llm.temperature,
            max_agent_steps: config.session.max_agent_steps,
            run_timeout: config.session.run_timeout(),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct TurnResult {
    pub agent: String,
    pub response: String,
    /// The full history after this turn, ready for [`crate::memory::ConversationMemory`].
    pub chat_history: Vec<ChatMessage>,
    pub advisories: Vec<CheckFailure>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TurnOutcome {
    Completed(TurnResult),
    AwaitingDecision(PendingToolRequest),
    Rejected(ValidationRejection),
}

struct StepState {
    steps: u32,
    first_completion: bool,
    queue: VecDeque<ToolCall>,
}

impl StepState {
    fn new() -> Self {
        Self { steps: 0, first_completion: true, queue: VecDeque::new() }
    }
}

struct SuspendedStep {
    agent: Arc<AgentConfig>,
    step: StepState,
}

/// Per-conversation state. Never shared across sessions.
pub struct Session {
    id: SessionId,
    state: TurnContext,
    events: EventSender,
    gate: ToolGate,
    active_agent: Option<String>,
    history: Vec<ChatMessage>,
    /// User messages received while a decision was outstanding.
    deferred: Vec<ChatMessage>,
    denials: Vec<String>,
    advisories: Vec<CheckFailure>,
    suspended: Option<SuspendedStep>,
}

impl Session {
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    pub fn state(&self) -> &TurnContext {
        &self.state
    }

    pub fn active_agent(&self) -> Option<&str> {
        self.active_agent.as_deref()
    }

    pub fn pending(&self) -> Option<&PendingToolRequest> {
        self.gate.pending()
    }

    pub fn history(&self) -> &[ChatMessage] {
        &self.history
    }

    /// Releases a pending request and the step waiting on it.
    pub fn cancel_pending(&mut self) -> Option<PendingToolRequest> {
        self.suspended = None;
        self.deferred.clear();
        self.gate.cancel()
    }
}

pub struct AgentRuntime {
    llm: Arc<dyn LlmClient>,
    guardrails: GuardrailPipeline,
    agents: AgentRegistry,
    router: KeywordRouter,
    audit: Arc<dyn AuditSink>,
    settings: RuntimeSettings,
}

impl AgentRuntime {
    pub fn new(
        llm: Arc<dyn LlmClient>,
        guardrails: GuardrailPipeline,
        agents: AgentRegistry,
        settings: RuntimeSettings,
    ) -> Self {
        Self {
            llm,
            guardrails,
            agents,
            router: KeywordRouter,
            audit: Arc::new(TracingAuditSink),
            settings,
        }
    }

    pub fn from_config(
        config: &AppConfig,
        llm: Arc<dyn LlmClient>,
        agents: AgentRegistry,
    ) -> Result<Self, GuardrailSetupError> {
        let model = config.llm.model.as_str();
        let guardrails =
            GuardrailPipeline::from_config(&config.guardrails, Arc::clone(&llm), model)?;
        Ok(Self::new(llm, guardrails, agents, RuntimeSettings::from_config(config)))
    }

    /// Applies to the guardrail pipeline and to sessions opened afterwards.
    pub fn with_audit_sink(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.guardrails = std::mem::take(&mut self.guardrails).with_audit_sink(Arc::clone(&audit));
        self.audit = audit;
        self
    }

    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    pub fn guardrails(&self) -> &GuardrailPipeline {
        &self.guardrails
    }

    pub fn settings(&self) -> &RuntimeSettings {
        &self.settings
    }

    pub fn open_session(&self) -> (Session, EventStream) {
        let (events, stream) = event_channel();
        let id = SessionId::generate();
        info!(event_name = "runtime.session_opened", session_id = %id, "session opened");
        let session = Session {
            gate: ToolGate::new(id.clone(), Arc::clone(&self.audit)),
            id,
            state: TurnContext::default(),
            events,
            active_agent: None,
            history: Vec::new(),
            deferred: Vec::new(),
            denials: Vec::new(),
            advisories: Vec::new(),
            suspended: None,
        };
        (session, stream)
    }

    /// One user turn. `chat_history` is everything before `user_msg`.
    pub async fn run_turn(
        &self,
        session: &mut Session,
        chat_history: &[ChatMessage],
        user_msg: &str,
    ) -> Result<TurnOutcome, OrchestrationError> {
        let audit = AuditContext::new(
            Some(session.id.to_string()),
            CorrelationId::generate().to_string(),
            "guardrail-pipeline",
        );
        let report = match self.guardrails.validate(user_msg, &audit).await {
            Ok(report) => report,
            Err(error) => {
                let rejection = error.into_rejection()?;
                session.events.emit(WorkflowEvent::Rejected {
                    check: rejection.failure.check.clone(),
                    reason: rejection.failure.failure.reason.clone(),
                });
                return Ok(TurnOutcome::Rejected(rejection));
            }
        };

        if let Some(request) = session.gate.pending().cloned() {
            info!(
                event_name = "runtime.message_deferred",
                session_id = %session.id,
                correlation_id = %request.correlation_id,
                "message received while a tool decision is outstanding"
            );
            session.advisories.extend(report.advisories);
            session.deferred.push(ChatMessage::user(report.text));
            session.events.emit(WorkflowEvent::ToolRequest { request: request.clone() });
            return Ok(TurnOutcome::AwaitingDecision(request));
        }

        session.advisories = report.advisories;
        session.denials.clear();
        session.history = chat_history.to_vec();
        session.history.push(ChatMessage::user(report.text.as_str()));

        let agent = self.route(session, &report.text);
        self.drive(session, agent, StepState::new()).await
    }

    /// Applies a human decision to the suspended step and continues it.
    pub async fn resolve(
        &self,
        session: &mut Session,
        decision: ToolDecision,
    ) -> Result<TurnOutcome, OrchestrationError> {
        let resolution = session.gate.resolve(&decision)?;
        let Some(SuspendedStep { agent, step }) = session.suspended.take() else {
            return Err(OrchestrationError::Aborted(
                "tool decision resolved but no agent step was suspended".to_string(),
            ));
        };

        match resolution {
            Resolution::Execute(cleared) => {
                let message = self.execute(session, &agent, cleared).await?;
                session.history.push(message);
            }
            Resolution::Denied { call, notice } => {
                session.history.push(ChatMessage::tool(call.id, notice.as_str()));
                session.denials.push(notice);
            }
        }

        self.drive(session, agent, step).await
    }

    /// Runs a turn on a background task, taking decisions over the returned handle.
    pub fn spawn_turn(
        self: &Arc<Self>,
        mut session: Session,
        chat_history: Vec<ChatMessage>,
        user_msg: impl Into<String>,
    ) -> WorkflowHandle {
        let (sender, receiver) = mpsc::channel(DECISION_BUFFER);
        let runtime = Arc::clone(self);
        let user_msg = user_msg.into();
        let join = tokio::spawn(async move {
            let result =
                runtime.run_bounded(&mut session, &chat_history, &user_msg, receiver).await;
            WorkflowRun { session, result }
        });
        WorkflowHandle { decisions: DecisionSender { sender }, join }
    }

    async fn run_bounded(
        &self,
        session: &mut Session,
        chat_history: &[ChatMessage],
        user_msg: &str,
        mut decisions: mpsc::Receiver<DecisionEnvelope>,
    ) -> Result<TurnOutcome, OrchestrationError> {
        let Some(limit) = self.settings.run_timeout else {
            return self.run_until_settled(session, chat_history, user_msg, &mut decisions).await;
        };

        let run = self.run_until_settled(session, chat_history, user_msg, &mut decisions);
        let bounded = tokio::time::timeout(limit, run).await;
        match bounded {
            Ok(result) => result,
            Err(_) => {
                let cancelled = session.cancel_pending();
                warn!(
                    event_name = "runtime.run_timed_out",
                    session_id = %session.id,
                    cancelled = ?cancelled.map(|request| request.correlation_id),
                    timeout_secs = limit.as_secs(),
                    "workflow run timed out"
                );
                Err(OrchestrationError::TimedOut { duration_secs: limit.as_secs() })
            }
        }
    }

    async fn run_until_settled(
        &self,
        session: &mut Session,
        chat_history: &[ChatMessage],
        user_msg: &str,
        decisions: &mut mpsc::Receiver<DecisionEnvelope>,
    ) -> Result<TurnOutcome, OrchestrationError> {
        let mut outcome = self.run_turn(session, chat_history, user_msg).await?;
        loop {
            if !matches!(outcome, TurnOutcome::AwaitingDecision(_)) {
                return Ok(outcome);
            }
            debug!(
                event_name = "runtime.waiting_for_decision",
                session_id = %session.id,
                correlation_id = ?session.pending().map(|request| &request.correlation_id),
                "waiting for tool decision"
            );

            let decision = loop {
                let Some(envelope) = decisions.recv().await else {
                    session.cancel_pending();
                    return Err(OrchestrationError::Aborted(
                        "decision channel closed while a tool request was pending".to_string(),
                    ));
                };
                match session.gate.check_decision(&envelope.decision) {
                    Ok(()) => {
                        let _ = envelope.ack.send(Ok(()));
                        break envelope.decision;
                    }
                    Err(violation) => {
                        warn!(
                            event_name = "runtime.decision_ignored",
                            session_id = %session.id,
                            error = %violation,
                            "decision does not match the pending request"
                        );
                        let _ = envelope.ack.send(Err(violation));
                    }
                }
            };

            outcome = self.resolve(session, decision).await?;
        }
    }

    fn route(&self, session: &mut Session, message: &str) -> Arc<AgentConfig> {
        let decision = self.router.route(
            &self.agents,
            session.active_agent.as_deref(),
            session.gate.pending().is_some(),
            message,
        );
        let name = decision.agent.name();
        if session.active_agent.as_deref() == Some(name) {
            return decision.agent;
        }

        info!(
            event_name = "runtime.agent_selected",
            session_id = %session.id,
            agent = name,
            reason = ?decision.reason,
            score = decision.score,
            previous = ?session.active_agent,
            "agent selected for turn"
        );
        let audit = AuditContext::new(
            Some(session.id.to_string()),
            CorrelationId::generate().to_string(),
            "router",
        );
        self.audit.emit(
            AuditEvent::from_context(
                &audit,
                "router.agent_selected",
                AuditCategory::Routing,
                AuditOutcome::Success,
            )
            .with_metadata("agent", name)
            .with_metadata("reason", format!("{:?}", decision.reason)),
        );
        session.events.emit(WorkflowEvent::Progress {
            agent: name.to_string(),
            message: format!("Handing off to {name}"),
        });
        session.active_agent = Some(name.to_string());
        decision.agent
    }

    async fn drive(
        &self,
        session: &mut Session,
        agent: Arc<AgentConfig>,
        mut step: StepState,
    ) -> Result<TurnOutcome, OrchestrationError> {
        loop {
            while let Some(call) = step.queue.pop_front() {
                match session.gate.select(&agent, &call)? {
                    Selection::Execute(cleared) => {
                        let message = self.execute(session, &agent, cleared).await?;
                        session.history.push(message);
                    }
                    Selection::AwaitDecision(request) => {
                        let event = WorkflowEvent::ToolRequest { request: request.clone() };
                        session.events.emit(event);
                        session.suspended = Some(SuspendedStep { agent, step });
                        return Ok(TurnOutcome::AwaitingDecision(request));
                    }
                }
            }
            session.history.append(&mut session.deferred);

            if step.steps >= self.settings.max_agent_steps {
                return Err(OrchestrationError::StepLimitExceeded {
                    agent: agent.name().to_string(),
                    limit: self.settings.max_agent_steps,
                });
            }
            step.steps += 1;

            let request = self.completion_request(&agent, &session.history, step.first_completion);
            step.first_completion = false;
            match self.llm.complete(request).await? {
                Completion::Text(text) => return Ok(self.finish(session, &agent, text)),
                Completion::ToolCalls(calls) => {
                    debug!(
                        event_name = "runtime.tools_selected",
                        session_id = %session.id,
                        agent = agent.name(),
                        tools = ?calls.iter().map(|call| call.name.as_str()).collect::<Vec<_>>(),
                        "agent selected tool calls"
                    );
                    session.history.push(ChatMessage::assistant_tool_calls(calls.clone()));
                    step.queue.extend(calls);
                }
            }
        }
    }

    fn completion_request(
        &self,
        agent: &AgentConfig,
        history: &[ChatMessage],
        first_completion: bool,
    ) -> CompletionRequest {
        let mut messages = Vec::with_capacity(history.len() + 1);
        messages.push(ChatMessage::system(agent.system_prompt()));
        messages.extend(history.iter().cloned());

        let request =
            CompletionRequest::new(&self.settings.model, messages, self.settings.temperature);
        if agent.tools().is_empty() {
            return request;
        }
        let tool_choice = first_completion.then(|| agent.tool_choice());
        request.with_tools(agent.tools().schemas(), tool_choice)
    }

    async fn execute(
        &self,
        session: &mut Session,
        agent: &AgentConfig,
        cleared: ClearedCall,
    ) -> Result<ChatMessage, OrchestrationError> {
        let context = ToolContext {
            session_id: session.id.clone(),
            agent: agent.name().to_string(),
            state: session.state.clone(),
            events: session.events.clone(),
        };
        let tool = agent.tools().get(&cleared.call.name);
        session.gate.execute(cleared, tool, &context).await
    }

    fn finish(&self, session: &mut Session, agent: &AgentConfig, text: String) -> TurnOutcome {
        let response = with_denials(&session.denials, text);
        session.denials.clear();
        session.history.push(ChatMessage::assistant(response.as_str()));
        session.events.emit(WorkflowEvent::Result {
            agent: agent.name().to_string(),
            response: response.clone(),
        });
        info!(
            event_name = "runtime.turn_completed",
            session_id = %session.id,
            agent = agent.name(),
            history_len = session.history.len(),
            "turn completed"
        );
        TurnOutcome::Completed(TurnResult {
            agent: agent.name().to_string(),
            response,
            chat_history: session.history.clone(),
            advisories: std::mem::take(&mut session.advisories),
        })
    }
}

/// Leads the response with every denial notice from this step, unless the agent already did.
fn with_denials(denials: &[String], text: String) -> String {
    if denials.is_empty() {
        return text;
    }
    let notice = denials.join("\n");
    if text.trim_start().starts_with(&notice) {
        return text;
    }
    format!("{notice}\n\n{text}")
}

struct DecisionEnvelope {
    decision: ToolDecision,
    ack: oneshot::Sender<Result<(), ProtocolViolation>>,
}

#[derive(Clone)]
pub struct DecisionSender {
    sender: mpsc::Sender<DecisionEnvelope>,
}

impl DecisionSender {
    /// Resolves once the run has accepted or rejected the decision.
    pub async fn decide(&self, decision: ToolDecision) -> Result<(), OrchestrationError> {
        let (ack, reply) = oneshot::channel();
        self.sender.send(DecisionEnvelope { decision, ack }).await.map_err(|_| {
            OrchestrationError::Aborted("workflow run is no longer accepting decisions".to_string())
        })?;
        let verdict = reply.await.map_err(|_| {
            OrchestrationError::Aborted("workflow run ended before acknowledging".to_string())
        })?;
        verdict.map_err(OrchestrationError::from)
    }
}

pub struct WorkflowRun {
    pub session: Session,
    pub result: Result<TurnOutcome, OrchestrationError>,
}

pub struct WorkflowHandle {
    decisions: DecisionSender,
    join: JoinHandle<WorkflowRun>,
}

impl WorkflowHandle {
    pub fn decisions(&self) -> DecisionSender {
        self.decisions.clone()
    }

    pub async fn decide(&self, decision: ToolDecision) -> Result<(), OrchestrationError> {
        self.decisions.decide(decision).await
    }

    pub async fn finish(self) -> Result<WorkflowRun, OrchestrationError> {
        let Self { decisions, join } = self;
        drop(decisions);
        join.await.map_err(|error| OrchestrationError::Aborted(error.to_string()))
    }
}

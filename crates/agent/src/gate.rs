use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use vigil_core::audit::{AuditContext, AuditSink};
use vigil_core::domain::message::{ChatMessage, ToolCall};
use vigil_core::domain::session::SessionId;
use vigil_core::domain::tool_request::{CorrelationId, PendingToolRequest, ToolDecision};
use vigil_core::errors::{OrchestrationError, ProtocolViolation};
use vigil_core::flows::{
    FlowTransitionError, ToolCallAction, ToolCallEvent, ToolCallFlow, ToolCallState,
    TransitionOutcome,
};

use crate::registry::AgentConfig;
use crate::tools::{Tool, ToolContext};

pub fn denial_notice(tool_name: &str, reason: &str) -> String {
    format!("Tool call `{tool_name}` was rejected: {reason}")
}

/// A tool call cleared to run, in the `Executing` state.
#[derive(Clone, Debug, PartialEq)]
pub struct ClearedCall {
    pub call: ToolCall,
    pub correlation_id: CorrelationId,
    pub agent: String,
}

#[derive(Clone, Debug, PartialEq)]
pub enum Selection {
    Execute(ClearedCall),
    AwaitDecision(PendingToolRequest),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Resolution {
    Execute(ClearedCall),
    Denied { call: ToolCall, notice: String },
}

/// The call currently owned by the gate and where it stands in the tool-call flow.
#[derive(Clone, Debug)]
struct TrackedCall {
    call: ToolCall,
    correlation_id: CorrelationId,
    agent: String,
    state: ToolCallState,
    /// Set while the call waits on a human decision.
    request: Option<PendingToolRequest>,
}

/// Per-session gate in front of every tool call. Owns one call at a time; a new call is only
/// accepted once the previous one reached a terminal state.
pub struct ToolGate {
    session_id: SessionId,
    flow: ToolCallFlow,
    current: Option<TrackedCall>,
    audit: Arc<dyn AuditSink>,
}

impl ToolGate {
    pub fn new(session_id: SessionId, audit: Arc<dyn AuditSink>) -> Self {
        Self { session_id, flow: ToolCallFlow, current: None, audit }
    }

    pub fn pending(&self) -> Option<&PendingToolRequest> {
        self.current
            .as_ref()
            .filter(|tracked| tracked.state == ToolCallState::AwaitingDecision)
            .and_then(|tracked| tracked.request.as_ref())
    }

    /// Flow state of the most recent call, terminal or not.
    pub fn state(&self) -> Option<ToolCallState> {
        self.current.as_ref().map(|tracked| tracked.state)
    }

    /// Runs the confirmation lookup for a call the agent just selected.
    pub fn select(
        &mut self,
        agent: &AgentConfig,
        call: &ToolCall,
    ) -> Result<Selection, OrchestrationError> {
        if let Some(outstanding) = self.pending() {
            return Err(ProtocolViolation::RequestOutstanding {
                outstanding: outstanding.correlation_id.clone(),
                attempted_tool: call.name.clone(),
            }
            .into());
        }
        if let Some(busy) = self.current.as_ref().filter(|tracked| !tracked.state.is_terminal()) {
            return Err(FlowTransitionError::InvalidTransition {
                state: busy.state,
                event: ToolCallEvent::ConfirmationRequired,
            }
            .into());
        }

        let mut tracked = TrackedCall {
            call: call.clone(),
            correlation_id: CorrelationId::generate(),
            agent: agent.name().to_string(),
            state: self.flow.initial_state(),
            request: None,
        };
        let event = if agent.requires_confirmation(&call.name) {
            ToolCallEvent::ConfirmationRequired
        } else {
            ToolCallEvent::ConfirmationNotRequired
        };
        let outcome = self.advance(&mut tracked, event)?;

        let selection = if outcome.actions.contains(&ToolCallAction::InvokeTool) {
            Selection::Execute(ClearedCall {
                call: tracked.call.clone(),
                correlation_id: tracked.correlation_id.clone(),
                agent: tracked.agent.clone(),
            })
        } else if outcome.actions.contains(&ToolCallAction::EmitApprovalRequest) {
            let request = PendingToolRequest {
                correlation_id: tracked.correlation_id.clone(),
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                tool_kwargs: call.arguments.clone(),
                agent: tracked.agent.clone(),
                requested_at: Utc::now(),
            };
            info!(
                event_name = "tool_gate.awaiting_decision",
                session_id = %self.session_id,
                correlation_id = %request.correlation_id,
                agent = %request.agent,
                tool = %request.tool_name,
                "tool call requires human confirmation"
            );
            tracked.request = Some(request.clone());
            Selection::AwaitDecision(request)
        } else {
            return Err(unexpected_actions(&outcome));
        };

        self.current = Some(tracked);
        Ok(selection)
    }

    /// Checks a decision against the pending request without consuming it.
    pub fn check_decision(&self, decision: &ToolDecision) -> Result<(), ProtocolViolation> {
        match self.pending() {
            None => Err(ProtocolViolation::NothingPending {
                correlation_id: decision.correlation_id.clone(),
            }),
            Some(request) if request.correlation_id != decision.correlation_id => {
                Err(ProtocolViolation::UnknownCorrelation {
                    correlation_id: decision.correlation_id.clone(),
                    pending: request.correlation_id.clone(),
                })
            }
            Some(_) => Ok(()),
        }
    }

    /// Matches by correlation id; a mismatched decision leaves the pending request untouched.
    pub fn resolve(&mut self, decision: &ToolDecision) -> Result<Resolution, OrchestrationError> {
        if let Err(violation) = self.check_decision(decision) {
            warn!(
                event_name = "tool_gate.protocol_violation",
                session_id = %self.session_id,
                correlation_id = %decision.correlation_id,
                error = %violation,
                "tool decision rejected"
            );
            return Err(violation.into());
        }
        let Some(mut tracked) = self.current.take() else {
            return Err(ProtocolViolation::NothingPending {
                correlation_id: decision.correlation_id.clone(),
            }
            .into());
        };

        let event = if decision.approved {
            ToolCallEvent::DecisionApproved
        } else {
            ToolCallEvent::DecisionDenied
        };
        let outcome = match self.advance(&mut tracked, event) {
            Ok(outcome) => outcome,
            Err(error) => {
                self.current = Some(tracked);
                return Err(error);
            }
        };
        if outcome.actions.contains(&ToolCallAction::ReleasePending) {
            tracked.request = None;
        }

        info!(
            event_name = "tool_gate.decision_applied",
            session_id = %self.session_id,
            correlation_id = %tracked.correlation_id,
            tool = %tracked.call.name,
            approved = decision.approved,
            "tool decision applied"
        );

        let resolution = if outcome.actions.contains(&ToolCallAction::InvokeTool) {
            Resolution::Execute(ClearedCall {
                call: tracked.call.clone(),
                correlation_id: tracked.correlation_id.clone(),
                agent: tracked.agent.clone(),
            })
        } else if outcome.actions.contains(&ToolCallAction::InjectDenial) {
            let notice = denial_notice(&tracked.call.name, decision.denial_reason());
            Resolution::Denied { call: tracked.call.clone(), notice }
        } else {
            return Err(unexpected_actions(&outcome));
        };

        self.current = Some(tracked);
        Ok(resolution)
    }

    /// Abandons the current call, e.g. when a run times out. Returns the request it released
    /// if the call was waiting on a decision.
    pub fn cancel(&mut self) -> Option<PendingToolRequest> {
        let mut tracked = self.current.take()?;
        if tracked.state.is_terminal() {
            self.current = Some(tracked);
            return None;
        }

        let released = match self.advance(&mut tracked, ToolCallEvent::Cancelled) {
            Ok(outcome) if outcome.actions.contains(&ToolCallAction::ReleasePending) => {
                tracked.request.take()
            }
            Ok(_) => None,
            Err(error) => {
                warn!(
                    event_name = "tool_gate.cancel_failed",
                    session_id = %self.session_id,
                    error = %error,
                    "cancel was not applied"
                );
                None
            }
        };
        info!(
            event_name = "tool_gate.call_cancelled",
            session_id = %self.session_id,
            correlation_id = %tracked.correlation_id,
            tool = %tracked.call.name,
            released_request = released.is_some(),
            "tool call cancelled"
        );
        self.current = Some(tracked);
        released
    }

    /// Runs a cleared call. Tool failures become a tool-result message, not an error.
    ///
    /// Only the call the gate moved to `Executing` may run; anything else is refused by the flow.
    pub async fn execute(
        &mut self,
        cleared: ClearedCall,
        tool: Option<Arc<dyn Tool>>,
        context: &ToolContext,
    ) -> Result<ChatMessage, OrchestrationError> {
        let Some(tracked) = self
            .current
            .as_ref()
            .filter(|tracked| tracked.correlation_id == cleared.correlation_id)
        else {
            return Err(ProtocolViolation::NothingPending {
                correlation_id: cleared.correlation_id,
            }
            .into());
        };
        if tracked.state != ToolCallState::Executing {
            return Err(FlowTransitionError::InvalidTransition {
                state: tracked.state,
                event: ToolCallEvent::ExecutionSucceeded,
            }
            .into());
        }

        // The call stays `Executing` in the gate while the tool runs, so an abandoned run can
        // still be cancelled.
        let call = tracked.call.clone();
        let agent = tracked.agent.clone();
        let result = match tool {
            Some(tool) => tool.execute(context, call.arguments.clone()).await,
            None => Err(anyhow::anyhow!("agent `{agent}` has no tool named `{}`", call.name)),
        };

        let event = if result.is_ok() {
            ToolCallEvent::ExecutionSucceeded
        } else {
            ToolCallEvent::ExecutionFailed
        };
        let Some(mut tracked) = self.current.take() else {
            return Err(ProtocolViolation::NothingPending {
                correlation_id: cleared.correlation_id,
            }
            .into());
        };
        let outcome = self.advance(&mut tracked, event);
        self.current = Some(tracked);
        let outcome = outcome?;

        match result {
            Ok(output) if outcome.actions.contains(&ToolCallAction::RecordToolResult) => {
                info!(
                    event_name = "tool_gate.tool_completed",
                    session_id = %self.session_id,
                    correlation_id = %cleared.correlation_id,
                    agent = %agent,
                    tool = %call.name,
                    "tool call completed"
                );
                Ok(ChatMessage::tool(call.id, output))
            }
            Err(error) if outcome.actions.contains(&ToolCallAction::RecordToolFailure) => {
                warn!(
                    event_name = "tool_gate.tool_failed",
                    session_id = %self.session_id,
                    correlation_id = %cleared.correlation_id,
                    agent = %agent,
                    tool = %call.name,
                    error = %error,
                    "tool call failed"
                );
                let content = format!("Tool call `{}` failed: {error:#}", call.name);
                Ok(ChatMessage::tool(call.id, content))
            }
            _ => Err(unexpected_actions(&outcome)),
        }
    }

    fn advance(
        &self,
        tracked: &mut TrackedCall,
        event: ToolCallEvent,
    ) -> Result<TransitionOutcome, OrchestrationError> {
        let audit = self.audit_context(&tracked.correlation_id, &tracked.agent);
        let outcome =
            self.flow.apply_with_audit(tracked.state, event, self.audit.as_ref(), &audit)?;
        tracked.state = outcome.to;
        Ok(outcome)
    }

    fn audit_context(&self, correlation_id: &CorrelationId, agent: &str) -> AuditContext {
        AuditContext::new(Some(self.session_id.to_string()), correlation_id.to_string(), agent)
    }
}

fn unexpected_actions(outcome: &TransitionOutcome) -> OrchestrationError {
    OrchestrationError::Aborted(format!(
        "tool-call transition {:?} -> {:?} produced no usable action: {:?}",
        outcome.from, outcome.to, outcome.actions
    ))
}

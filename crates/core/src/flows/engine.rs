use thiserror::Error;

use crate::audit::{AuditCategory, AuditContext, AuditEvent, AuditOutcome, AuditSink};
use crate::flows::states::{ToolCallAction, ToolCallEvent, ToolCallState, TransitionOutcome};

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum FlowTransitionError {
    #[error("invalid tool-call transition from {state:?} using event {event:?}")]
    InvalidTransition { state: ToolCallState, event: ToolCallEvent },
}

/// Pure transition table for the human-gated tool execution state machine.
#[derive(Clone, Debug, Default)]
pub struct ToolCallFlow;

impl ToolCallFlow {
    pub fn initial_state(&self) -> ToolCallState {
        ToolCallState::Selected
    }

    pub fn apply(
        &self,
        current: ToolCallState,
        event: ToolCallEvent,
    ) -> Result<TransitionOutcome, FlowTransitionError> {
        transition_tool_call(current, event)
    }

    pub fn apply_with_audit<S>(
        &self,
        current: ToolCallState,
        event: ToolCallEvent,
        sink: &S,
        audit: &AuditContext,
    ) -> Result<TransitionOutcome, FlowTransitionError>
    where
        S: AuditSink + ?Sized,
    {
        let result = self.apply(current, event);
        match &result {
            Ok(outcome) => {
                let audit_outcome = match outcome.to {
                    ToolCallState::Denied | ToolCallState::Cancelled => AuditOutcome::Rejected,
                    ToolCallState::Failed => AuditOutcome::Failed,
                    _ => AuditOutcome::Success,
                };
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "tool_gate.transition_applied",
                        AuditCategory::ToolGate,
                        audit_outcome,
                    )
                    .with_metadata("from", format!("{:?}", outcome.from))
                    .with_metadata("to", format!("{:?}", outcome.to))
                    .with_metadata("event", format!("{:?}", outcome.event)),
                );
            }
            Err(error) => {
                sink.emit(
                    AuditEvent::from_context(
                        audit,
                        "tool_gate.transition_rejected",
                        AuditCategory::ToolGate,
                        AuditOutcome::Rejected,
                    )
                    .with_metadata("error", error.to_string()),
                );
            }
        }
        result
    }
}

fn transition_tool_call(
    current: ToolCallState,
    event: ToolCallEvent,
) -> Result<TransitionOutcome, FlowTransitionError> {
    use ToolCallAction::{
        EmitApprovalRequest, InjectDenial, InvokeTool, RecordToolFailure, RecordToolResult,
        ReleasePending, SuspendStep,
    };
    use ToolCallEvent::{
        Cancelled as CancelRequested, ConfirmationNotRequired, ConfirmationRequired,
        DecisionApproved, DecisionDenied, ExecutionFailed, ExecutionSucceeded,
    };
    use ToolCallState::{
        AwaitingDecision, Cancelled, Completed, Denied, Executing, Failed, Selected,
    };

    let (to, actions) = match (current, event) {
        (Selected, ConfirmationNotRequired) => (Executing, vec![InvokeTool]),
        (Selected, ConfirmationRequired) => {
            (AwaitingDecision, vec![EmitApprovalRequest, SuspendStep])
        }
        (AwaitingDecision, DecisionApproved) => (Executing, vec![ReleasePending, InvokeTool]),
        (AwaitingDecision, DecisionDenied) => (Denied, vec![ReleasePending, InjectDenial]),
        (AwaitingDecision, CancelRequested) => (Cancelled, vec![ReleasePending]),
        (Executing, ExecutionSucceeded) => (Completed, vec![RecordToolResult]),
        (Executing, ExecutionFailed) => (Failed, vec![RecordToolFailure]),
        // The run was abandoned mid-execution; the tool result, if any, is discarded.
        (Executing, CancelRequested) => (Cancelled, Vec::new()),
        (Selected, CancelRequested) => (Cancelled, Vec::new()),
        _ => {
            return Err(FlowTransitionError::InvalidTransition { state: current, event });
        }
    };

    Ok(TransitionOutcome { from: current, to, event, actions })
}

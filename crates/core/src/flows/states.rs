use serde::{Deserialize, Serialize};

/// Lifecycle of a single tool invocation selected by an agent.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolCallState {
    Selected,
    AwaitingDecision,
    Executing,
    Completed,
    Denied,
    Failed,
    Cancelled,
}

impl ToolCallState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Denied | Self::Failed | Self::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolCallEvent {
    ConfirmationNotRequired,
    ConfirmationRequired,
    DecisionApproved,
    DecisionDenied,
    ExecutionSucceeded,
    ExecutionFailed,
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ToolCallAction {
    EmitApprovalRequest,
    SuspendStep,
    InvokeTool,
    InjectDenial,
    RecordToolResult,
    RecordToolFailure,
    ReleasePending,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitionOutcome {
    pub from: ToolCallState,
    pub to: ToolCallState,
    pub event: ToolCallEvent,
    pub actions: Vec<ToolCallAction>,
}

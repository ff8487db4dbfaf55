use serde::Serialize;
use tokio::sync::mpsc;
use vigil_core::domain::tool_request::PendingToolRequest;

/// Lifecycle events published while a session runs.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowEvent {
    Progress { agent: String, message: String },
    ToolRequest { request: PendingToolRequest },
    Rejected { check: String, reason: String },
    Result { agent: String, response: String },
}

pub fn event_channel() -> (EventSender, EventStream) {
    let (sender, receiver) = mpsc::unbounded_channel();
    (EventSender { sender }, EventStream { receiver })
}

#[derive(Clone, Debug)]
pub struct EventSender {
    sender: mpsc::UnboundedSender<WorkflowEvent>,
}

impl EventSender {
    /// Publishing never blocks the workflow; events for a dropped stream are discarded.
    pub fn emit(&self, event: WorkflowEvent) {
        if self.sender.send(event).is_err() {
            tracing::debug!(event_name = "events.stream_closed", "event stream receiver dropped");
        }
    }
}

/// Single-consumer, ordered view of a session's events.
#[derive(Debug)]
pub struct EventStream {
    receiver: mpsc::UnboundedReceiver<WorkflowEvent>,
}

impl EventStream {
    pub async fn next(&mut self) -> Option<WorkflowEvent> {
        self.receiver.recv().await
    }

    /// Everything already published, without waiting.
    pub fn drain(&mut self) -> Vec<WorkflowEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.receiver.try_recv() {
            events.push(event);
        }
        events
    }
}

use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};
use vigil_agent::{
    AgentRuntime, ConversationMemory, DecisionSender, EventStream, OpenAiCompatibleClient,
    Session, TurnOutcome, WorkflowEvent, WorkflowRun,
};
use vigil_core::config::{AppConfig, ConfigOverrides, LoadOptions};
use vigil_core::domain::tool_request::{PendingToolRequest, ToolDecision};

use super::CommandResult;
use crate::agents::health_agents;
use crate::logging::init_logging;

pub const OPENING_MESSAGE: &str = "Hello!";
const EXIT_WORDS: &[&str] = &["exit", "quit", "bye"];

pub fn run(config_path: Option<PathBuf>, overrides: ConfigOverrides) -> CommandResult {
    let options = LoadOptions { config_path, overrides, ..LoadOptions::default() };
    let config = match AppConfig::load(options) {
        Ok(config) => config,
        Err(error) => {
            return CommandResult::failure("chat", "config_validation", error.to_string(), 2);
        }
    };
    init_logging(&config);

    let runtime = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(error) => {
            return CommandResult::failure(
                "chat",
                "runtime_init",
                format!("failed to initialize async runtime: {error}"),
                3,
            );
        }
    };

    let result = runtime.block_on(async {
        let agent_runtime = Arc::new(build_runtime(&config)?);
        let stdin = io::stdin();
        let mut chat = ChatLoop::new(agent_runtime, stdin.lock(), io::stdout());
        chat.run().await
    });

    match result {
        Ok(()) => CommandResult { exit_code: 0, output: String::new() },
        Err(error) => CommandResult::failure("chat", "session", format!("{error:#}"), 4),
    }
}

pub fn build_runtime(config: &AppConfig) -> Result<AgentRuntime> {
    let llm = OpenAiCompatibleClient::from_config(&config.llm)?;
    let agents = health_agents()?;
    Ok(AgentRuntime::from_config(config, Arc::new(llm), agents)?)
}

/// Line-oriented chat over any reader/writer pair; stdin and stdout in the binary.
///
/// Each turn runs as a spawned workflow, so the runtime's run timeout applies, and tool approvals
/// travel back over the run's decision channel.
pub struct ChatLoop<R, W> {
    runtime: Arc<AgentRuntime>,
    session_id: String,
    session: Option<Session>,
    events: EventStream,
    memory: ConversationMemory,
    input: R,
    output: W,
}

impl<R, W> ChatLoop<R, W>
where
    R: BufRead,
    W: Write,
{
    pub fn new(runtime: Arc<AgentRuntime>, input: R, output: W) -> Self {
        let (session, events) = runtime.open_session();
        Self {
            runtime,
            session_id: session.id().to_string(),
            session: Some(session),
            events,
            memory: ConversationMemory::default(),
            input,
            output,
        }
    }

    pub fn memory(&self) -> &ConversationMemory {
        &self.memory
    }

    /// `None` only while a turn holds the session.
    pub fn session(&self) -> Option<&Session> {
        self.session.as_ref()
    }

    pub fn into_output(self) -> W {
        self.output
    }

    /// Greets with [`OPENING_MESSAGE`], then alternates user input and agent turns until an exit
    /// word or end of input.
    pub async fn run(&mut self) -> Result<()> {
        let mut message = OPENING_MESSAGE.to_string();
        loop {
            self.turn(&message).await?;

            let Some(next) = self.prompt("USER >> ")? else {
                break;
            };
            if EXIT_WORDS.contains(&next.trim().to_lowercase().as_str()) {
                break;
            }
            message = next;
        }

        info!(
            event_name = "cli.chat_ended",
            session_id = %self.session_id,
            history_len = self.memory.len(),
            "chat session ended"
        );
        Ok(())
    }

    async fn turn(&mut self, message: &str) -> Result<()> {
        let session = self.session.take().context("chat session was lost by an earlier turn")?;
        let history = self.memory.get().to_vec();
        let handle = self.runtime.spawn_turn(session, history, message);
        let decisions = handle.decisions();
        let finish = handle.finish();
        tokio::pin!(finish);

        let finished = loop {
            tokio::select! {
                biased;
                Some(event) = self.events.next() => self.handle_event(event, &decisions).await?,
                finished = &mut finish => break finished,
            }
        };
        drop(decisions);

        let WorkflowRun { session, result } = finished?;
        self.session = Some(session);
        self.render_progress()?;

        let outcome = match result {
            Ok(outcome) => outcome,
            Err(error) => {
                warn!(
                    event_name = "cli.turn_failed",
                    session_id = %self.session_id,
                    error = %error,
                    "turn failed"
                );
                let interface = error.into_interface(self.session_id.clone());
                writeln!(self.output, "SYSTEM >> {}", interface.user_message())?;
                return Ok(());
            }
        };

        match outcome {
            TurnOutcome::Completed(result) => {
                writeln!(self.output, "AGENT >> {}", result.response)?;
                self.memory.append_new(&result.chat_history);
            }
            TurnOutcome::Rejected(rejection) => {
                writeln!(self.output, "SYSTEM >> {}", rejection.user_message())?;
            }
            TurnOutcome::AwaitingDecision(request) => {
                warn!(
                    event_name = "cli.turn_unsettled",
                    session_id = %self.session_id,
                    correlation_id = %request.correlation_id,
                    "turn ended with a tool request still pending"
                );
            }
        }
        Ok(())
    }

    async fn handle_event(
        &mut self,
        event: WorkflowEvent,
        decisions: &DecisionSender,
    ) -> Result<()> {
        match event {
            WorkflowEvent::Progress { message, .. } => {
                writeln!(self.output, "SYSTEM >> {message}")?;
            }
            WorkflowEvent::ToolRequest { request } => {
                let decision = self.ask_decision(&request)?;
                if let Err(error) = decisions.decide(decision).await {
                    warn!(
                        event_name = "cli.decision_not_delivered",
                        session_id = %self.session_id,
                        correlation_id = %request.correlation_id,
                        error = %error,
                        "tool decision was not accepted"
                    );
                }
            }
            WorkflowEvent::Rejected { .. } | WorkflowEvent::Result { .. } => {}
        }
        Ok(())
    }

    fn render_progress(&mut self) -> io::Result<()> {
        for event in self.events.drain() {
            if let WorkflowEvent::Progress { message, .. } = event {
                writeln!(self.output, "SYSTEM >> {message}")?;
            }
        }
        Ok(())
    }

    fn ask_decision(&mut self, request: &PendingToolRequest) -> io::Result<ToolDecision> {
        writeln!(self.output, "SYSTEM >> I need approval for the following tool call:")?;
        writeln!(self.output, "{}", request.tool_name)?;
        writeln!(self.output, "{}", request.tool_kwargs)?;
        writeln!(self.output)?;

        let correlation_id = request.correlation_id.clone();
        let Some(answer) = self.prompt("Do you approve? (y/n): ")? else {
            return Ok(ToolDecision::deny(correlation_id, "no decision was given"));
        };
        if answer.to_lowercase().contains('y') {
            return Ok(ToolDecision::approve(correlation_id));
        }

        let reason = self.prompt("Why not? (reason): ")?.unwrap_or_default();
        Ok(ToolDecision::deny(correlation_id, reason))
    }

    /// `None` at end of input.
    fn prompt(&mut self, label: &str) -> io::Result<Option<String>> {
        write!(self.output, "{label}")?;
        self.output.flush()?;

        let mut line = String::new();
        if self.input.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
    }
}

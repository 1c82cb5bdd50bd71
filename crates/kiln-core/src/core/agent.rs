//! Agent orchestration.
//!
//! The agent drives the provider + tool loop and emits `AgentEvent`s over a
//! bounded channel so a UI task can render concurrently. Each user turn runs
//! up to `max_iterations` model requests; a request that produces tool calls
//! feeds their results back as tool messages and iterates, a plain-text
//! response ends the turn.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use futures_util::StreamExt;
use futures_util::future::BoxFuture;
use tokio::time::{Duration, timeout};

use crate::config::{Config, PermissionMode};
use crate::core::context::{ContextManager, ContextUsage};
use crate::core::events::{AgentEvent, AgentEventTx, ErrorKind, EventSender};
use crate::core::interrupt::{InterruptController, InterruptKind, InterruptedError};
use crate::core::permissions::PermissionGate;
use crate::core::plan::PlanGate;
use crate::providers::json_tool_parser::{dedup_invocations, extract_tool_calls};
use crate::providers::stream_classifier::{
    StreamClassifier, detect_runaway_repetition, is_truncated_tool_call,
};
use crate::providers::{Message, ModelClient, ProviderError, ProviderStream, ToolInvocation};
use crate::tools::ToolRegistry;

const STREAM_POLL_TIMEOUT: Duration = Duration::from_millis(250);

const TRUNCATED_CALL_RETRY_PROMPT: &str = "Your previous tool call was cut off before the JSON \
     completed. Repeat the full tool call as a single complete JSON object.";

/// Asynchronous yes/no confirmation for gated tool calls.
///
/// The agent asks before the first mutating operation in a directory; a
/// positive answer approves the directory for the rest of the session.
pub trait ConfirmationPrompt: Send + Sync {
    fn confirm(&self, tool_name: &str, dir: &Path) -> BoxFuture<'static, bool>;
}

/// Approves every confirmation request. The default for non-interactive use.
pub struct AutoApprove;

impl ConfirmationPrompt for AutoApprove {
    fn confirm(&self, _tool_name: &str, _dir: &Path) -> BoxFuture<'static, bool> {
        Box::pin(async { true })
    }
}

/// Declines every confirmation request.
pub struct DenyAll;

impl ConfirmationPrompt for DenyAll {
    fn confirm(&self, _tool_name: &str, _dir: &Path) -> BoxFuture<'static, bool> {
        Box::pin(async { false })
    }
}

/// What one streamed model response produced.
struct StreamOutcome {
    content: String,
    native_calls: Vec<ToolInvocation>,
}

/// The conversation-driving agent.
///
/// Owns the message history, the tool registry, and the per-session gates.
/// One `run_turn` call per user input; events stream out over the channel
/// passed to it while the returned future resolves to the final text.
pub struct Agent {
    config: Config,
    client: Arc<dyn ModelClient>,
    registry: ToolRegistry,
    permissions: PermissionGate,
    plan: PlanGate,
    interrupts: InterruptController,
    mode: PermissionMode,
    context: ContextManager,
    confirmer: Arc<dyn ConfirmationPrompt>,
    messages: Vec<Message>,
}

impl Agent {
    pub fn new(
        config: Config,
        client: Arc<dyn ModelClient>,
        registry: ToolRegistry,
        system_prompt: impl Into<String>,
    ) -> Self {
        let permissions = PermissionGate::new(config.confirm_writes, config.confirm_commands);
        let context = ContextManager::from_config(&config);
        Self {
            config,
            client,
            registry,
            permissions,
            plan: PlanGate::new(),
            interrupts: InterruptController::new(),
            mode: PermissionMode::default(),
            context,
            confirmer: Arc::new(AutoApprove),
            messages: vec![Message::system(system_prompt)],
        }
    }

    #[must_use]
    pub fn with_confirmer(mut self, confirmer: Arc<dyn ConfirmationPrompt>) -> Self {
        self.confirmer = confirmer;
        self
    }

    /// Handle for signaling interrupts from another task.
    pub fn interrupt_controller(&self) -> InterruptController {
        self.interrupts.clone()
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Replaces the history wholesale, e.g. when resuming a saved session.
    /// The system message must already be element 0.
    pub fn restore_messages(&mut self, messages: Vec<Message>) {
        self.messages = messages;
    }

    pub fn mode(&self) -> PermissionMode {
        self.mode
    }

    /// Advances to the next permission mode and returns it. Entering or
    /// leaving plan mode updates the plan gate accordingly.
    pub fn cycle_mode(&mut self) -> PermissionMode {
        self.mode = self.mode.cycle();
        if self.mode == PermissionMode::PlanMode {
            self.plan.enter_plan_mode();
        } else {
            self.plan.exit_plan_mode();
        }
        self.mode
    }

    pub fn plan_gate(&self) -> &PlanGate {
        &self.plan
    }

    pub fn plan_gate_mut(&mut self) -> &mut PlanGate {
        &mut self.plan
    }

    pub fn usage(&self) -> ContextUsage {
        self.context.usage(&self.messages)
    }

    /// Runs one user turn to completion.
    ///
    /// Returns the final assistant text; the iteration cap and interrupts
    /// end the turn early (the cap with an empty string, interrupts with an
    /// error). Events are delivered over `tx` throughout.
    ///
    /// # Errors
    /// Returns an error when the provider fails or the turn is interrupted.
    pub async fn run_turn(&mut self, user_input: &str, tx: AgentEventTx) -> Result<String> {
        let sender = EventSender::new(tx);
        self.interrupts.clear();
        self.messages.push(Message::user(user_input));
        sender.send_important(AgentEvent::TurnStarted).await;

        self.compact_if_needed(&sender).await;

        let known_tools = self.registry.tool_names();

        for iteration in 1..=self.config.max_iterations {
            tracing::debug!(iteration, "requesting model response");
            self.ensure_not_interrupted(&sender, None).await?;

            let stream = self.request_stream(&sender).await?;
            let outcome = self.consume_stream(stream, &known_tools, &sender).await?;

            let (residual, calls) = if outcome.native_calls.is_empty() {
                extract_tool_calls(&outcome.content, &known_tools)
            } else {
                // Natively-typed calls leave the text untouched.
                (
                    (!outcome.content.is_empty()).then(|| outcome.content.clone()),
                    outcome.native_calls,
                )
            };
            // Gating matches on exact names while the registry dispatches
            // case-insensitively; normalize once so policy and execution
            // see the same name.
            let calls: Vec<ToolInvocation> = calls
                .into_iter()
                .map(|mut call| {
                    call.name.make_ascii_lowercase();
                    call
                })
                .collect();
            let calls = dedup_invocations(calls);

            if !calls.is_empty() {
                let text = residual.unwrap_or_default();
                if !text.is_empty() {
                    sender
                        .send_important(AgentEvent::AssistantCompleted { text: text.clone() })
                        .await;
                }
                self.messages.push(Message::assistant_with_calls(text, calls.clone()));
                self.dispatch_tool_calls(&calls, &sender).await?;
                continue;
            }

            if is_truncated_tool_call(&outcome.content) {
                tracing::debug!("tool call truncated mid-stream; asking for a retry");
                self.messages.push(Message::assistant(&outcome.content));
                self.messages.push(Message::user(TRUNCATED_CALL_RETRY_PROMPT));
                continue;
            }

            let final_text = outcome.content;
            if !final_text.is_empty() {
                sender
                    .send_important(AgentEvent::AssistantCompleted {
                        text: final_text.clone(),
                    })
                    .await;
                self.messages.push(Message::assistant(&final_text));
            }
            sender
                .send_important(AgentEvent::TurnCompleted {
                    final_text: final_text.clone(),
                    messages: self.messages.clone(),
                })
                .await;
            return Ok(final_text);
        }

        let max = self.config.max_iterations;
        tracing::warn!(max, "iteration cap reached");
        sender
            .send_important(AgentEvent::Warning {
                message: format!("Reached maximum iterations ({max}). Stopping."),
            })
            .await;
        sender
            .send_important(AgentEvent::TurnCompleted {
                final_text: String::new(),
                messages: self.messages.clone(),
            })
            .await;
        Ok(String::new())
    }

    /// Compacts history when over threshold. Failures are non-fatal; the
    /// turn proceeds with the uncompacted history.
    async fn compact_if_needed(&mut self, sender: &EventSender) {
        if !self.context.should_compact(&self.messages) {
            return;
        }
        let before = self.messages.len();
        match self.context.compact(&self.messages, self.client.as_ref()).await {
            Ok(compacted) => {
                let after = compacted.len();
                self.messages = compacted;
                sender
                    .send_important(AgentEvent::Compacted {
                        messages_before: before,
                        messages_after: after,
                    })
                    .await;
            }
            Err(err) => {
                tracing::warn!(error = %err, "compaction failed; keeping full history");
                sender
                    .send_important(AgentEvent::Error {
                        kind: ErrorKind::Internal,
                        message: "Failed to compact history; continuing without compaction"
                            .to_string(),
                        details: Some(format!("{err:#}")),
                    })
                    .await;
            }
        }
    }

    async fn ensure_not_interrupted(
        &self,
        sender: &EventSender,
        partial_content: Option<String>,
    ) -> Result<()> {
        let kind = self.interrupts.current();
        if kind == InterruptKind::None {
            return Ok(());
        }
        sender
            .send_important(AgentEvent::Interrupted {
                kind,
                partial_content,
            })
            .await;
        Err(InterruptedError.into())
    }

    async fn request_stream(&self, sender: &EventSender) -> Result<ProviderStream> {
        let stream_result = tokio::select! {
            biased;
            () = self.interrupts.wait_for_interrupt() => {
                sender
                    .send_important(AgentEvent::Interrupted {
                        kind: self.interrupts.current(),
                        partial_content: None,
                    })
                    .await;
                return Err(InterruptedError.into());
            }
            result = self.client.chat_stream(&self.messages, self.registry.definitions()) => result,
        };
        match stream_result {
            Ok(stream) => Ok(stream),
            Err(err) => {
                emit_provider_error(&err, sender).await;
                Err(err.into())
            }
        }
    }

    /// Drains one response stream, withholding suspect structured text from
    /// the delta events while accumulating everything for resolution.
    async fn consume_stream(
        &self,
        mut stream: ProviderStream,
        known_tools: &[String],
        sender: &EventSender,
    ) -> Result<StreamOutcome> {
        let mut classifier = StreamClassifier::new(known_tools.to_vec());
        let mut content = String::new();
        let mut native_calls = Vec::new();

        loop {
            let partial = (!content.is_empty()).then(|| content.clone());
            self.ensure_not_interrupted(sender, partial).await?;

            let chunk = match timeout(STREAM_POLL_TIMEOUT, stream.next()).await {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(err))) => {
                    emit_provider_error(&err, sender).await;
                    return Err(err.into());
                }
                Ok(None) => break,
                Err(_) => continue,
            };

            if let Some(text) = &chunk.content {
                content.push_str(text);
                if let Some(visible) = classifier.push(text) {
                    sender.send_delta(AgentEvent::AssistantDelta { text: visible });
                }
                if detect_runaway_repetition(&content) {
                    tracing::warn!("repeated tool-call markers; aborting the stream early");
                    sender
                        .send_important(AgentEvent::Warning {
                            message: "Model repeated the same tool call; stopping the stream \
                                      early."
                                .to_string(),
                        })
                        .await;
                    break;
                }
            }
            native_calls.extend(chunk.tool_calls);
            if chunk.done {
                break;
            }
        }

        Ok(StreamOutcome {
            content,
            native_calls,
        })
    }

    /// Runs tool calls sequentially in request order, feeding each result
    /// back as a tool message.
    async fn dispatch_tool_calls(
        &mut self,
        calls: &[ToolInvocation],
        sender: &EventSender,
    ) -> Result<()> {
        for call in calls {
            self.ensure_not_interrupted(sender, None).await?;

            if !self.plan.is_tool_allowed(&call.name) {
                let reason = format!(
                    "Tool '{}' is not allowed in plan mode. Only read-only exploration tools \
                     may run until the plan is approved.",
                    call.name
                );
                self.messages.push(Message::tool(&reason));
                sender
                    .send_important(AgentEvent::ToolDenied {
                        name: call.name.clone(),
                        reason,
                    })
                    .await;
                continue;
            }

            if self
                .permissions
                .requires_confirmation(&call.name, &call.arguments, self.mode)
                && !self.confirm_and_approve(&call.name, &call.arguments).await
            {
                let reason = "User declined to execute this tool.".to_string();
                self.messages.push(Message::tool(&reason));
                sender
                    .send_important(AgentEvent::ToolDenied {
                        name: call.name.clone(),
                        reason,
                    })
                    .await;
                continue;
            }

            sender
                .send_important(AgentEvent::ToolStarted {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                })
                .await;

            let result = self
                .registry
                .execute(&call.name, &call.arguments, self.config.tool_timeout())
                .await;

            sender
                .send_important(AgentEvent::ToolCompleted {
                    name: call.name.clone(),
                    result: result.clone(),
                })
                .await;

            let feedback = if result.success {
                result.output
            } else {
                format!(
                    "Error: {}",
                    result.error.unwrap_or_else(|| "tool failed".to_string())
                )
            };
            self.messages.push(Message::tool(feedback));
        }
        Ok(())
    }

    async fn confirm_and_approve(
        &mut self,
        tool_name: &str,
        arguments: &serde_json::Map<String, serde_json::Value>,
    ) -> bool {
        let dir: PathBuf = self.permissions.resolve_target_dir(tool_name, arguments);
        if self.confirmer.confirm(tool_name, &dir).await {
            self.permissions.approve_directory(&dir);
            true
        } else {
            false
        }
    }
}

async fn emit_provider_error(err: &ProviderError, sender: &EventSender) {
    tracing::error!(kind = %err.kind, error = %err, "provider request failed");
    sender
        .send_important(AgentEvent::Error {
            kind: err.kind.clone().into(),
            message: err.message.clone(),
            details: err.details.clone(),
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{ProviderResult, Role};
    use crate::tools::ToolDefinition;

    struct NeverCalled;

    impl ModelClient for NeverCalled {
        fn chat_stream(
            &self,
            _messages: &[Message],
            _tools: &[ToolDefinition],
        ) -> BoxFuture<'static, ProviderResult<ProviderStream>> {
            unreachable!("client must not be called")
        }

        fn complete(&self, _messages: &[Message]) -> BoxFuture<'static, ProviderResult<String>> {
            unreachable!("client must not be called")
        }
    }

    fn agent() -> Agent {
        Agent::new(
            Config::default(),
            Arc::new(NeverCalled),
            ToolRegistry::new(),
            "You are a coding assistant.",
        )
    }

    #[test]
    fn test_new_seeds_system_message() {
        let agent = agent();
        assert_eq!(agent.messages().len(), 1);
        assert_eq!(agent.messages()[0].role, Role::System);
    }

    #[test]
    fn test_cycle_mode_drives_plan_gate() {
        let mut agent = agent();
        assert_eq!(agent.mode(), PermissionMode::Normal);
        assert!(agent.plan_gate().is_tool_allowed("write_file"));

        assert_eq!(agent.cycle_mode(), PermissionMode::AutoAccept);
        assert!(!agent.plan_gate().is_active());

        assert_eq!(agent.cycle_mode(), PermissionMode::PlanMode);
        assert!(agent.plan_gate().is_active());
        assert!(!agent.plan_gate().is_tool_allowed("write_file"));

        assert_eq!(agent.cycle_mode(), PermissionMode::Normal);
        assert!(!agent.plan_gate().is_active());
    }

    #[test]
    fn test_restore_messages_replaces_history() {
        let mut agent = agent();
        agent.restore_messages(vec![Message::system("s"), Message::user("u")]);
        assert_eq!(agent.messages().len(), 2);
    }
}

//! Context window management with auto-summarization.
//!
//! Tracks an approximate token budget over the conversation and, when the
//! budget crosses the configured threshold, replaces older history with a
//! model-generated summary while keeping the system message and the most
//! recent exchanges intact.

use anyhow::{Context, Result};

use crate::config::Config;
use crate::providers::{Message, ModelClient};

const SUMMARY_SYSTEM_PROMPT: &str = "You are a helpful assistant that creates concise conversation summaries. \
     Summarize the key points, decisions, and context from the conversation. \
     Focus on information needed to continue the conversation coherently. \
     Be concise but preserve important details.";

/// Per-message transcript cap when formatting history for summarization.
const SUMMARY_CONTENT_CAP: usize = 1000;

/// Pluggable token-cost function. Any deterministic estimator that is
/// monotonic in message count satisfies the contract.
pub type TokenCostFn = Box<dyn Fn(&str) -> usize + Send + Sync>;

/// Counts tokens for context window management.
///
/// The default cost function is a bytes/4 heuristic; callers may inject a
/// real tokenizer via [`TokenCounter::with_cost_fn`].
pub struct TokenCounter {
    cost: TokenCostFn,
}

impl TokenCounter {
    pub fn new() -> Self {
        Self {
            cost: Box::new(|text| text.len().div_ceil(4)),
        }
    }

    pub fn with_cost_fn(cost: TokenCostFn) -> Self {
        Self { cost }
    }

    pub fn count(&self, text: &str) -> usize {
        if text.is_empty() {
            return 0;
        }
        (self.cost)(text)
    }

    /// Counts one message, including structural overhead for the role and
    /// separators, plus any tool calls it carries.
    pub fn count_message(&self, message: &Message) -> usize {
        let mut tokens = 4;
        tokens += self.count(&message.content);
        for call in &message.tool_calls {
            tokens += self.count(&call.name);
            let args = serde_json::to_string(&call.arguments).unwrap_or_default();
            tokens += self.count(&args);
            tokens += 4;
        }
        tokens
    }

    pub fn count_messages(&self, messages: &[Message]) -> usize {
        let mut total = 3;
        for msg in messages {
            total += self.count_message(msg);
        }
        total
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

/// Token usage snapshot. Recomputed on demand, never cached.
#[derive(Debug, Clone, PartialEq)]
pub struct ContextUsage {
    pub used: usize,
    pub max_tokens: usize,
    pub available: usize,
    pub percent: f64,
}

impl ContextUsage {
    /// Usage is getting high (>75%).
    pub fn is_high(&self) -> bool {
        self.percent > 75.0
    }

    /// Usage is critical (>90%).
    pub fn is_critical(&self) -> bool {
        self.percent > 90.0
    }
}

/// Manages conversation size within token limits.
pub struct ContextManager {
    counter: TokenCounter,
    max_tokens: usize,
    reserve_tokens: usize,
    threshold: usize,
    keep_recent: usize,
}

impl ContextManager {
    pub fn new(
        max_tokens: usize,
        reserve_tokens: usize,
        compact_threshold: f64,
        keep_recent: usize,
    ) -> Self {
        Self {
            counter: TokenCounter::new(),
            max_tokens,
            reserve_tokens,
            threshold: (max_tokens as f64 * compact_threshold) as usize,
            keep_recent,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.max_context_tokens,
            config.reserve_tokens,
            config.compact_threshold,
            config.keep_recent,
        )
    }

    #[must_use]
    pub fn with_counter(mut self, counter: TokenCounter) -> Self {
        self.counter = counter;
        self
    }

    /// Returns current token usage statistics.
    pub fn usage(&self, messages: &[Message]) -> ContextUsage {
        let used = self.counter.count_messages(messages);
        let available = self
            .max_tokens
            .saturating_sub(used)
            .saturating_sub(self.reserve_tokens);
        let percent = (used as f64 / self.max_tokens as f64 * 1000.0).round() / 10.0;

        ContextUsage {
            used,
            max_tokens: self.max_tokens,
            available,
            percent,
        }
    }

    /// True iff usage strictly exceeds `threshold * max_tokens`.
    pub fn should_compact(&self, messages: &[Message]) -> bool {
        self.counter.count_messages(messages) > self.threshold
    }

    /// Replaces older history with a model-generated summary.
    ///
    /// Keeps the system message and the last `2 * keep_recent` messages
    /// byte-identical; no-op (returns the input verbatim) when the
    /// conversation is too short to compact. Always returns a new list,
    /// never mutating `messages` in place; callers atomically replace
    /// their working history with the result.
    ///
    /// # Errors
    /// Returns an error if the summarization request fails.
    pub async fn compact(
        &self,
        messages: &[Message],
        client: &dyn ModelClient,
    ) -> Result<Vec<Message>> {
        let min_messages = 1 + self.keep_recent * 2 + 2;
        if messages.len() <= min_messages {
            return Ok(messages.to_vec());
        }

        let recent_count = self.keep_recent * 2;
        let old_messages = &messages[1..messages.len() - recent_count];
        let recent_messages = &messages[messages.len() - recent_count..];
        if old_messages.len() < 2 {
            return Ok(messages.to_vec());
        }

        let transcript = format_messages_for_summary(old_messages);
        let summary_request = vec![
            Message::system(SUMMARY_SYSTEM_PROMPT),
            Message::user(format!(
                "Summarize this conversation:\n\n{transcript}\n\n\
                 Provide a brief summary capturing key points and context."
            )),
        ];

        tracing::debug!(
            old = old_messages.len(),
            kept = recent_messages.len(),
            "compacting conversation history"
        );
        let summary = client
            .complete(&summary_request)
            .await
            .context("Failed to summarize conversation history")?;

        let summary_msg = Message::system(format!(
            "[Previous conversation summary]\n{summary}\n[End of summary]"
        ));

        let mut compacted = Vec::with_capacity(2 + recent_count);
        compacted.push(messages[0].clone());
        compacted.push(summary_msg);
        compacted.extend(recent_messages.iter().cloned());
        Ok(compacted)
    }
}

/// Formats messages as a role-labeled transcript for summarization.
///
/// Long contents are capped with an explicit truncation marker; tool calls
/// are rendered as one-line annotations.
fn format_messages_for_summary(messages: &[Message]) -> String {
    let mut blocks = Vec::with_capacity(messages.len());
    for msg in messages {
        let mut content: String = msg.content.chars().take(SUMMARY_CONTENT_CAP).collect();
        if msg.content.chars().count() > SUMMARY_CONTENT_CAP {
            content.push_str("... [truncated]");
        }

        let mut lines = vec![format!("{}: {}", msg.role.to_string().to_uppercase(), content)];
        for call in &msg.tool_calls {
            lines.push(format!("  [Called tool: {}]", call.name));
        }
        blocks.push(lines.join("\n"));
    }
    blocks.join("\n\n")
}

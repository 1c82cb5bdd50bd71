//! Agent event types for streaming consumers.
//!
//! This module defines the contract for events emitted by the agent.
//! Events are serializable for future JSON output mode support.

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc;

use crate::core::interrupt::InterruptKind;
use crate::providers::{Message, ProviderErrorKind};
use crate::tools::ToolResult;

/// Events emitted by the agent during execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// Turn has started processing.
    TurnStarted,

    /// Incremental text chunk from the assistant.
    AssistantDelta { text: String },

    /// Complete response text from the assistant.
    AssistantCompleted { text: String },

    /// History was compacted before the first model request of this turn.
    Compacted {
        messages_before: usize,
        messages_after: usize,
    },

    /// A tool invocation has started execution.
    ToolStarted {
        name: String,
        arguments: Map<String, Value>,
    },

    /// A tool invocation has completed.
    ToolCompleted { name: String, result: ToolResult },

    /// A tool invocation was skipped by policy (plan mode or a declined
    /// confirmation); a tool message explaining the skip was appended.
    ToolDenied { name: String, reason: String },

    /// Non-fatal condition the user should see (e.g. iteration cap reached).
    Warning { message: String },

    /// An error occurred during execution.
    Error {
        /// Error category for structured handling
        kind: ErrorKind,
        /// One-line summary
        message: String,
        /// Optional additional details
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<String>,
    },

    /// Execution was interrupted by user signal.
    Interrupted {
        kind: InterruptKind,
        /// Partial assistant text received before interruption.
        #[serde(skip_serializing_if = "Option::is_none")]
        partial_content: Option<String>,
    },

    /// Turn completed with final result.
    TurnCompleted {
        /// Final accumulated text from the assistant.
        final_text: String,
        /// Updated message history (includes assistant responses and tool results).
        messages: Vec<Message>,
    },
}

/// Error categories for `AgentEvent::Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// HTTP status error (4xx, 5xx)
    HttpStatus,
    /// Connection/request timeout
    Timeout,
    /// Response parsing failed
    Parse,
    /// API-level error from provider
    ApiError,
    /// Internal/unknown error
    Internal,
}

impl From<ProviderErrorKind> for ErrorKind {
    fn from(kind: ProviderErrorKind) -> Self {
        match kind {
            ProviderErrorKind::HttpStatus => ErrorKind::HttpStatus,
            ProviderErrorKind::Timeout => ErrorKind::Timeout,
            ProviderErrorKind::Parse => ErrorKind::Parse,
            ProviderErrorKind::ApiError => ErrorKind::ApiError,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::HttpStatus => write!(f, "http_status"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::Parse => write!(f, "parse"),
            ErrorKind::ApiError => write!(f, "api_error"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

/// Channel-based event sender (async, bounded).
///
/// Events are wrapped in `Arc` for efficient cloning to multiple consumers.
pub type AgentEventTx = mpsc::Sender<Arc<AgentEvent>>;

/// Channel-based event receiver (async, bounded).
pub type AgentEventRx = mpsc::Receiver<Arc<AgentEvent>>;

/// Default channel capacity for event streams.
///
/// Set higher (128) to accommodate best-effort delta sends without blocking.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 128;

/// Creates a bounded event channel with the default capacity.
pub fn create_event_channel() -> (AgentEventTx, AgentEventRx) {
    mpsc::channel(DEFAULT_EVENT_CHANNEL_CAPACITY)
}

/// Event sender wrapper that provides best-effort and reliable send modes.
///
/// Use `send_delta()` for high-volume events (`AssistantDelta`) that can be
/// dropped if the consumer is slow. Use `send_important()` for events that
/// must be delivered (tool lifecycle, completion, errors, interruption).
#[derive(Clone)]
pub struct EventSender {
    tx: AgentEventTx,
}

impl EventSender {
    /// Creates a new `EventSender` wrapping the given channel sender.
    pub fn new(tx: AgentEventTx) -> Self {
        Self { tx }
    }

    /// Best-effort send: never awaits, drops if channel is full.
    pub fn send_delta(&self, ev: AgentEvent) {
        let _ = self.tx.try_send(Arc::new(ev));
    }

    /// Reliable send: awaits delivery.
    pub async fn send_important(&self, ev: AgentEvent) {
        let _ = self.tx.send(Arc::new(ev)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_serialization_tagged() {
        let ev = AgentEvent::Warning {
            message: "Reached maximum iterations (10). Stopping.".to_string(),
        };
        let json_str = serde_json::to_string(&ev).unwrap();
        assert!(json_str.contains(r#""type":"warning""#));

        let parsed: AgentEvent = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed, ev);
    }

    #[test]
    fn test_interrupted_event_roundtrip() {
        let ev = AgentEvent::Interrupted {
            kind: InterruptKind::Soft,
            partial_content: Some("partial".to_string()),
        };
        let json_str = serde_json::to_string(&ev).unwrap();
        assert!(json_str.contains(r#""kind":"soft""#));

        let parsed: AgentEvent = serde_json::from_str(&json_str).unwrap();
        assert_eq!(parsed, ev);
    }

    #[tokio::test]
    async fn test_send_delta_drops_when_full() {
        let (tx, _rx) = mpsc::channel(1);
        let sender = EventSender::new(tx);
        sender.send_delta(AgentEvent::TurnStarted);
        // Channel is full now; this drop must not block or panic.
        sender.send_delta(AgentEvent::AssistantDelta {
            text: "x".to_string(),
        });
    }
}

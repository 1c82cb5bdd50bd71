//! Cooperative interruption between the UI task and the agent task.
//!
//! The controller is an explicit per-session instance: a UI-input task
//! holds one clone and signals it, while the agent task polls it before
//! consuming each streamed fragment and before each queued tool call.
//! Cancellation is never preemptive.

use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// Kind of interrupt signaled by the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InterruptKind {
    /// No interrupt pending.
    #[default]
    None,
    /// Stop the current operation gracefully.
    Soft,
    /// Stop immediately; outer layers may treat this as exit intent.
    Hard,
}

#[derive(Debug)]
pub struct InterruptedError;

impl std::fmt::Display for InterruptedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Interrupted")
    }
}

impl std::error::Error for InterruptedError {}

#[derive(Default)]
struct Inner {
    kind: Mutex<InterruptKind>,
    notify: Notify,
}

/// Cloneable interrupt flag shared between tasks.
#[derive(Clone, Default)]
pub struct InterruptController {
    inner: Arc<Inner>,
}

impl InterruptController {
    pub fn new() -> Self {
        Self::default()
    }

    /// Signals an interrupt. A later `Hard` overrides a pending `Soft`;
    /// signaling `None` is a no-op.
    pub fn signal(&self, kind: InterruptKind) {
        if kind == InterruptKind::None {
            return;
        }
        let mut guard = self
            .inner
            .kind
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if *guard != InterruptKind::Hard {
            *guard = kind;
        }
        drop(guard);
        self.inner.notify.notify_waiters();
    }

    /// Returns the currently pending interrupt kind.
    pub fn current(&self) -> InterruptKind {
        *self
            .inner
            .kind
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Checks whether any interrupt is pending.
    pub fn is_interrupted(&self) -> bool {
        self.current() != InterruptKind::None
    }

    /// Clears a pending interrupt. Called once at the start of each user turn.
    pub fn clear(&self) {
        *self
            .inner
            .kind
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = InterruptKind::None;
    }

    /// Waits until an interrupt is signaled.
    pub async fn wait_for_interrupt(&self) {
        loop {
            if self.is_interrupted() {
                return;
            }
            self.inner.notify.notified().await;
        }
    }
}

impl std::fmt::Debug for InterruptController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InterruptController")
            .field("kind", &self.current())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_and_clear() {
        let ctl = InterruptController::new();
        assert!(!ctl.is_interrupted());

        ctl.signal(InterruptKind::Soft);
        assert_eq!(ctl.current(), InterruptKind::Soft);

        ctl.clear();
        assert_eq!(ctl.current(), InterruptKind::None);
    }

    #[test]
    fn test_hard_overrides_soft_but_not_reverse() {
        let ctl = InterruptController::new();
        ctl.signal(InterruptKind::Soft);
        ctl.signal(InterruptKind::Hard);
        assert_eq!(ctl.current(), InterruptKind::Hard);

        ctl.signal(InterruptKind::Soft);
        assert_eq!(ctl.current(), InterruptKind::Hard);
    }

    #[test]
    fn test_clones_share_state() {
        let ctl = InterruptController::new();
        let other = ctl.clone();
        other.signal(InterruptKind::Soft);
        assert!(ctl.is_interrupted());
    }

    #[tokio::test]
    async fn test_wait_for_interrupt_wakes() {
        let ctl = InterruptController::new();
        let waiter = ctl.clone();
        let handle = tokio::spawn(async move {
            waiter.wait_for_interrupt().await;
            waiter.current()
        });

        // Give the waiter a chance to park before signaling.
        tokio::task::yield_now().await;
        ctl.signal(InterruptKind::Soft);

        let kind = tokio::time::timeout(std::time::Duration::from_secs(1), handle)
            .await
            .expect("waiter timed out")
            .expect("waiter panicked");
        assert_eq!(kind, InterruptKind::Soft);
    }
}

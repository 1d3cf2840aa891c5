//! In-flight and queued command bookkeeping.

use std::fmt;

use astra_router_types::{OriginId, TabId, WireId};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::RouterError;

/// What a completed `submit` resolves with: the extension's `payload`
/// plus the tab it ultimately executed against (useful when the caller
/// omitted `tabId` and a tab was created on its behalf).
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    pub payload: serde_json::Value,
    pub tab_id: Option<TabId>,
}

pub type ResolveSender = oneshot::Sender<Result<CommandOutcome, RouterError>>;

/// A command dispatched to the extension, awaiting correlation by
/// `wireId`. Lives in exactly one session's `pending` map.
pub struct PendingCommand {
    pub wire_id: WireId,
    pub name: String,
    pub payload: serde_json::Value,
    pub origin_id: Option<OriginId>,
    pub submitted_at: Instant,
    pub deadline: Instant,
    pub target_tab: Option<TabId>,
    /// Fires exactly once: on response, timeout, or cancellation.
    pub resolve: Option<ResolveSender>,
    /// Spawned watcher that sends `RouterEvent::Timeout` back into the
    /// router's event loop when `deadline` elapses. Aborted as soon as
    /// the command settles by any other path.
    pub timeout_handle: JoinHandle<()>,
    /// `true` once a `cancel` frame has been sent downstream for this
    /// command, so a late extension response is dropped rather than
    /// surfaced (see cancellation semantics).
    pub cancelled: bool,
}

impl PendingCommand {
    /// Resolve exactly once, consuming the handle. A second call is a
    /// no-op (the handle is already `None`), matching the invariant that
    /// destruction always runs the resolve/reject handle exactly once.
    pub fn settle(&mut self, result: Result<CommandOutcome, RouterError>) {
        self.timeout_handle.abort();
        if let Some(tx) = self.resolve.take() {
            let _ = tx.send(result);
        }
    }
}

impl Drop for PendingCommand {
    fn drop(&mut self) {
        self.timeout_handle.abort();
    }
}

impl fmt::Debug for PendingCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCommand")
            .field("wire_id", &self.wire_id)
            .field("name", &self.name)
            .field("origin_id", &self.origin_id)
            .field("target_tab", &self.target_tab)
            .field("cancelled", &self.cancelled)
            .finish()
    }
}

/// A command that has not yet been dispatched because its session was
/// busy. Carries everything needed to dispatch it once its turn comes.
pub struct QueuedCommand {
    /// Reserved at submit time so a caller can cancel a still-queued
    /// command by the same handle it would use once dispatched.
    pub wire_id: WireId,
    pub name: String,
    pub payload: serde_json::Value,
    pub origin_id: Option<OriginId>,
    pub explicit_tab_id: Option<TabId>,
    pub deadline: Instant,
    pub resolve: ResolveSender,
}

impl fmt::Debug for QueuedCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueuedCommand")
            .field("name", &self.name)
            .field("explicit_tab_id", &self.explicit_tab_id)
            .finish()
    }
}

/// A command held back while a `createTab` prerequisite is in flight.
/// Its deadline is inherited from the original submit, per the open
/// question in the design notes resolved in favor of charging prerequisites
/// to the parent's budget.
pub struct DeferredDispatch {
    /// The original command's reserved wire id, not the internal
    /// `createTab` prerequisite's wire id it is waiting behind.
    pub wire_id: WireId,
    pub name: String,
    pub payload: serde_json::Value,
    pub origin_id: Option<OriginId>,
    pub deadline: Instant,
    pub resolve: ResolveSender,
}

impl fmt::Debug for DeferredDispatch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredDispatch")
            .field("name", &self.name)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn settle_runs_resolve_exactly_once() {
        let (tx, rx) = oneshot::channel();
        let handle = tokio::spawn(async {
            tokio::time::sleep(std::time::Duration::from_secs(999)).await;
        });
        let mut pending = PendingCommand {
            wire_id: WireId::new(),
            name: "noop".into(),
            payload: serde_json::json!({}),
            origin_id: None,
            submitted_at: Instant::now(),
            deadline: Instant::now() + std::time::Duration::from_secs(1),
            target_tab: None,
            resolve: Some(tx),
            timeout_handle: handle,
            cancelled: false,
        };
        pending.settle(Ok(CommandOutcome {
            payload: serde_json::json!({}),
            tab_id: None,
        }));
        // Second settle must not panic or double-send.
        pending.settle(Err(RouterError::Cancelled));
        assert!(rx.await.unwrap().is_ok());
    }
}

//! Per-session state: the pending-command table, FIFO queue,
//! owned-tab set, current-tab pointer, and busy flag.

use std::collections::{HashSet, VecDeque};

use astra_router_types::{Frame, SessionId, TabId, WireId};
use fnv::FnvHashMap;
use tokio::sync::broadcast;
use tokio::time::Instant;

use crate::pending::{DeferredDispatch, PendingCommand, QueuedCommand};

/// Capacity of a session's event broadcast channel. Slow or absent
/// subscribers simply miss old events (`broadcast::error::RecvError::Lagged`)
/// rather than applying backpressure to the router task.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TabAssignmentState {
    NoTab,
    HasTab,
}

pub struct SessionRecord {
    pub session_id: SessionId,
    pub owned_tabs: HashSet<TabId>,
    pub current_tab_id: Option<TabId>,
    pub pending: FnvHashMap<WireId, PendingCommand>,
    pub queue: VecDeque<QueuedCommand>,
    pub busy: bool,
    pub created_at: Instant,
    pub last_activity_at: Instant,
    /// Set when the link is lost while this session has outstanding
    /// work; cleared on successful reconnect re-send. Once `now` passes
    /// this, a tab owned by the session may be reclaimed by another one.
    pub grace_deadline: Option<Instant>,
    pub events: broadcast::Sender<Frame>,
    /// Set while a synthesized `createTab` prerequisite is in flight for
    /// this session; holds the wire id of that prerequisite and the
    /// original command waiting on it.
    pub awaiting_tab: Option<(WireId, DeferredDispatch)>,
}

impl SessionRecord {
    pub fn new(session_id: SessionId, now: Instant) -> Self {
        let (events, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            session_id,
            owned_tabs: HashSet::new(),
            current_tab_id: None,
            pending: FnvHashMap::default(),
            queue: VecDeque::new(),
            busy: false,
            created_at: now,
            last_activity_at: now,
            grace_deadline: None,
            events,
            awaiting_tab: None,
        }
    }

    pub fn tab_state(&self) -> TabAssignmentState {
        if self.current_tab_id.is_some() {
            TabAssignmentState::HasTab
        } else {
            TabAssignmentState::NoTab
        }
    }

    pub fn touch(&mut self, now: Instant) {
        self.last_activity_at = now;
    }

    /// True once no work remains: no in-flight command and nothing
    /// queued behind it. Used by the inactivity sweep and by graceful
    /// `endSession` to decide when teardown is safe.
    pub fn is_idle(&self) -> bool {
        self.pending.is_empty() && self.queue.is_empty()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<Frame> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn new_session_has_no_tab_and_is_idle() {
        let s = SessionRecord::new(SessionId::new(), Instant::now());
        assert_eq!(s.tab_state(), TabAssignmentState::NoTab);
        assert!(s.is_idle());
        assert!(!s.busy);
    }

    #[tokio::test(start_paused = true)]
    async fn has_tab_state_once_current_tab_set() {
        let mut s = SessionRecord::new(SessionId::new(), Instant::now());
        s.current_tab_id = Some(TabId(1));
        assert_eq!(s.tab_state(), TabAssignmentState::HasTab);
    }
}

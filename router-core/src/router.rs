//! The Session Router: per-session FIFO dispatch, tab ownership, link
//! loss recovery, and the single task that owns every mutable structure
//! in the process. External callers interact only through [`RouterHandle`]
//! — a cheap, cloneable mailbox into the task run by [`SessionRouter::run`].

use std::collections::HashSet;
use std::sync::Arc;

use astra_router_types::{ExtensionError, Frame, OriginId, SessionId, TabId, WireId};
use fnv::FnvHashMap;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::capability::CapabilityRegistry;
use crate::clock::Clock;
use crate::config::RouterConfig;
use crate::error::{RouterError, TransportError};
use crate::link::transport::LinkTransport;
use crate::link::{LinkCloseReason, LinkEvent, LinkSupervisor};
use crate::metrics::RouterMetrics;
use crate::pending::{CommandOutcome, DeferredDispatch, PendingCommand, QueuedCommand, ResolveSender};
use crate::session::SessionRecord;
use crate::tab::TabOwnership;

/// Whether `endSession` drains the queue first or rejects everything
/// immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndMode {
    Graceful,
    Immediate,
}

/// Everything a `submit` needs. `wire_id` is reserved by [`RouterHandle::submit`]
/// (still router-owned code, never the upstream caller) so it can serve
/// as a stable cancellation handle even while the command is only
/// queued or waiting behind an internally issued `createTab`.
pub struct SubmitRequest {
    pub wire_id: WireId,
    pub session_id: SessionId,
    pub name: String,
    pub payload: Value,
    pub tab_id: Option<TabId>,
    pub origin_id: Option<OriginId>,
    pub deadline: Instant,
}

enum Cmd {
    Submit {
        req: SubmitRequest,
        resolve: ResolveSender,
    },
    EndSession {
        session_id: SessionId,
        mode: EndMode,
        done: oneshot::Sender<()>,
    },
    Cancel {
        session_id: SessionId,
        wire_id: WireId,
    },
    BindLink(LinkSupervisor),
    SubscribeEvents {
        session_id: SessionId,
        resolve: oneshot::Sender<Option<broadcast::Receiver<Frame>>>,
    },
    Stats {
        resolve: oneshot::Sender<RouterStats>,
    },
    Shutdown,
}

/// A point-in-time snapshot of router-wide state, for the daemon's health
/// surface. Not protocol-observable — nothing here feeds back into
/// dispatch decisions.
#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct RouterStats {
    pub link_bound: bool,
    pub session_count: usize,
    pub pending_count: usize,
    pub queued_count: usize,
}

enum Internal {
    Timeout {
        session_id: SessionId,
        wire_id: WireId,
    },
    GraceExpired {
        session_id: SessionId,
    },
    InactivitySweep,
    SendOutcome {
        session_id: SessionId,
        wire_id: WireId,
        generation: u64,
        result: Result<(), TransportError>,
    },
}

/// A cheap, cloneable mailbox for the router task. This is what the
/// Tool Adapter Surface and the daemon's connection-accept loop hold.
#[derive(Clone)]
pub struct RouterHandle {
    cmd_tx: mpsc::Sender<Cmd>,
}

impl RouterHandle {
    /// Reserve a `WireId` for `req` and return it alongside the future
    /// that actually dispatches and awaits the result. The id is minted
    /// here, before the command has even reached the router task, so a
    /// caller can hold onto it as a cancellation handle for a command
    /// that may still be queued or waiting behind a `createTab`
    /// prerequisite when it decides to give up on it — see
    /// [`RouterHandle::cancel`].
    pub fn begin_submit(
        &self,
        mut req: SubmitRequestArgs,
    ) -> (WireId, impl std::future::Future<Output = Result<CommandOutcome, RouterError>>) {
        let wire_id = WireId::new();
        let cmd_tx = self.cmd_tx.clone();
        let fut = async move {
            let (resolve, rx) = oneshot::channel();
            let request = SubmitRequest {
                wire_id,
                session_id: req.session_id,
                name: std::mem::take(&mut req.name),
                payload: std::mem::take(&mut req.payload),
                tab_id: req.tab_id,
                origin_id: req.origin_id.take(),
                deadline: req.deadline,
            };
            if cmd_tx.send(Cmd::Submit { req: request, resolve }).await.is_err() {
                return Err(RouterError::SessionClosed);
            }
            // The router always settles a command it accepted — on
            // response, timeout, or cancellation. A dropped resolver
            // without a settle only happens if the router task itself
            // died mid-flight.
            rx.await.unwrap_or(Err(RouterError::SessionClosed))
        };
        (wire_id, fut)
    }

    /// Submit a command for `session_id` and await its result. Resolves
    /// with the extension's payload or rejects with a closed-taxonomy
    /// error (§7). Equivalent to `begin_submit` followed by awaiting the
    /// future, for callers that don't need a cancellation handle.
    pub async fn submit(&self, req: SubmitRequestArgs) -> Result<CommandOutcome, RouterError> {
        let (_wire_id, fut) = self.begin_submit(req);
        fut.await
    }

    /// Best-effort cancellation of a command previously submitted via
    /// `begin_submit`, identified by the session it belongs to and the
    /// `WireId` that call returned. A no-op if the command already
    /// settled.
    pub async fn cancel(&self, session_id: SessionId, wire_id: WireId) {
        let _ = self.cmd_tx.send(Cmd::Cancel { session_id, wire_id }).await;
    }

    pub async fn end_session(&self, session_id: SessionId, mode: EndMode) {
        let (done, rx) = oneshot::channel();
        if self.cmd_tx.send(Cmd::EndSession { session_id, mode, done }).await.is_ok() {
            let _ = rx.await;
        }
    }

    pub async fn subscribe_events(&self, session_id: SessionId) -> Option<broadcast::Receiver<Frame>> {
        let (resolve, rx) = oneshot::channel();
        if self
            .cmd_tx
            .send(Cmd::SubscribeEvents { session_id, resolve })
            .await
            .is_err()
        {
            return None;
        }
        rx.await.ok().flatten()
    }

    /// Bind a freshly accepted transport as the active Extension Link.
    /// If another link is active, it is superseded per §4.2.
    pub async fn bind_link<T: LinkTransport>(&self, transport: T, heartbeat_interval: std::time::Duration, generation: u64) {
        let link = LinkSupervisor::bind(transport, generation, heartbeat_interval);
        let _ = self.cmd_tx.send(Cmd::BindLink(link)).await;
    }

    pub async fn shutdown(&self) {
        let _ = self.cmd_tx.send(Cmd::Shutdown).await;
    }

    /// A point-in-time snapshot of session/queue counts and link state,
    /// for a health endpoint. Returns the zero-valued default if the
    /// router task has already stopped.
    pub async fn stats(&self) -> RouterStats {
        let (resolve, rx) = oneshot::channel();
        if self.cmd_tx.send(Cmd::Stats { resolve }).await.is_err() {
            return RouterStats::default();
        }
        rx.await.unwrap_or_default()
    }
}

/// The plain-data arguments to [`RouterHandle::submit`], kept separate
/// from [`SubmitRequest`] so callers don't need to know about the
/// router-internal `wire_id` reservation.
pub struct SubmitRequestArgs {
    pub session_id: SessionId,
    pub name: String,
    pub payload: Value,
    pub tab_id: Option<TabId>,
    pub origin_id: Option<OriginId>,
    pub deadline: Instant,
}

/// Spawn the router task and return a handle to it plus its join handle
/// (mostly useful for the daemon's shutdown sequencing).
pub fn spawn(config: RouterConfig, clock: Arc<dyn Clock>, metrics: Arc<RouterMetrics>) -> (RouterHandle, JoinHandle<()>) {
    let (cmd_tx, cmd_rx) = mpsc::channel(1024);
    let (internal_tx, internal_rx) = mpsc::unbounded_channel();

    if let Some(interval) = config.inactivity_sweep_interval() {
        let tx = internal_tx.clone();
        tokio::spawn(async move {
            loop {
                tokio::time::sleep(interval).await;
                if tx.send(Internal::InactivitySweep).is_err() {
                    return;
                }
            }
        });
    }

    let router = SessionRouter {
        sessions: FnvHashMap::default(),
        wire_index: FnvHashMap::default(),
        tabs: TabOwnership::default(),
        retired: HashSet::new(),
        pending_graceful_teardown: HashSet::new(),
        link: None,
        link_generation: 0,
        capabilities: crate::capability::default_registry(),
        config,
        clock,
        metrics,
        cmd_rx,
        internal_tx,
        internal_rx,
        global_pending_count: 0,
    };
    let handle = RouterHandle { cmd_tx };
    let join = tokio::spawn(router.run());
    (handle, join)
}

pub struct SessionRouter {
    sessions: FnvHashMap<SessionId, SessionRecord>,
    wire_index: FnvHashMap<WireId, SessionId>,
    tabs: TabOwnership,
    /// Sessions explicitly ended. A later `submit` against one of these
    /// ids is a stale reference, not an implicit new session — it
    /// rejects with `UNKNOWN_SESSION` rather than silently reopening.
    retired: HashSet<SessionId>,
    pending_graceful_teardown: HashSet<SessionId>,
    link: Option<LinkSupervisor>,
    link_generation: u64,
    #[allow(dead_code)]
    capabilities: CapabilityRegistry,
    config: RouterConfig,
    clock: Arc<dyn Clock>,
    metrics: Arc<RouterMetrics>,
    cmd_rx: mpsc::Receiver<Cmd>,
    internal_tx: mpsc::UnboundedSender<Internal>,
    internal_rx: mpsc::UnboundedReceiver<Internal>,
    global_pending_count: usize,
}

async fn next_link_event(link: &mut Option<LinkSupervisor>) -> Option<LinkEvent> {
    match link {
        Some(l) => l.next_event().await,
        None => std::future::pending().await,
    }
}

impl SessionRouter {
    pub async fn run(mut self) {
        info!("session router started");
        loop {
            tokio::select! {
                cmd = self.cmd_rx.recv() => {
                    match cmd {
                        Some(cmd) => {
                            if self.handle_cmd(cmd).await {
                                break;
                            }
                        }
                        None => break,
                    }
                }
                internal = self.internal_rx.recv() => {
                    match internal {
                        Some(event) => self.handle_internal(event),
                        None => {}
                    }
                }
                event = next_link_event(&mut self.link) => {
                    if let Some(event) = event {
                        self.handle_link_event(event);
                    }
                }
            }
        }
        info!("session router stopped");
    }

    async fn handle_cmd(&mut self, cmd: Cmd) -> bool {
        match cmd {
            Cmd::Submit { req, resolve } => {
                self.handle_submit(req, resolve);
                false
            }
            Cmd::EndSession { session_id, mode, done } => {
                self.handle_end_session(session_id, mode);
                let _ = done.send(());
                false
            }
            Cmd::Cancel { session_id, wire_id } => {
                self.handle_cancel(session_id, wire_id);
                false
            }
            Cmd::BindLink(link) => {
                self.handle_bind_link(link);
                false
            }
            Cmd::SubscribeEvents { session_id, resolve } => {
                let rx = self.sessions.get(&session_id).map(|s| s.subscribe_events());
                let _ = resolve.send(rx);
                false
            }
            Cmd::Stats { resolve } => {
                let stats = RouterStats {
                    link_bound: self.link.is_some(),
                    session_count: self.sessions.len(),
                    pending_count: self.sessions.values().map(|s| s.pending.len()).sum(),
                    queued_count: self.sessions.values().map(|s| s.queue.len()).sum(),
                };
                let _ = resolve.send(stats);
                false
            }
            Cmd::Shutdown => {
                self.handle_shutdown();
                true
            }
        }
    }

    fn handle_internal(&mut self, event: Internal) {
        match event {
            Internal::Timeout { session_id, wire_id } => self.handle_timeout(session_id, wire_id),
            Internal::GraceExpired { session_id } => self.handle_grace_expired(session_id),
            Internal::InactivitySweep => self.sweep_inactive_sessions(),
            Internal::SendOutcome {
                session_id,
                wire_id,
                generation,
                result,
            } => self.handle_send_outcome(session_id, wire_id, generation, result),
        }
    }

    fn handle_link_event(&mut self, event: LinkEvent) {
        match event {
            LinkEvent::Frame(frame) => self.handle_frame(frame),
            LinkEvent::Closed { reason } => self.begin_link_loss(reason),
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        match frame {
            Frame::Response { wire_id, session_id, payload, error } => {
                self.handle_response_frame(wire_id, session_id, payload, error);
            }
            Frame::Event { session_id, name, tab_id, payload } => {
                self.handle_event_frame(session_id, name, tab_id, payload);
            }
            Frame::Pong => {
                // Heartbeat acknowledgement; arrival alone is enough to
                // prove liveness, nothing else to do.
                debug!("pong received");
            }
            Frame::Command { .. } | Frame::Cancel { .. } | Frame::Ping => {
                // These are outbound-only from the router's perspective;
                // an inbound one is a protocol violation from the
                // extension and is dropped like any malformed frame.
                RouterMetrics::incr(&self.metrics.malformed_frames_dropped);
                warn!("dropped frame with outbound-only type from extension");
            }
        }
    }

    // ---- submit / dispatch -------------------------------------------------

    fn handle_submit(&mut self, req: SubmitRequest, resolve: ResolveSender) {
        let now = self.clock.now();
        if req.deadline <= now {
            let _ = resolve.send(Err(RouterError::Timeout));
            return;
        }
        if self.retired.contains(&req.session_id) {
            let _ = resolve.send(Err(RouterError::UnknownSession));
            return;
        }
        if self.global_pending_count >= self.config.global_pending_cap {
            let _ = resolve.send(Err(RouterError::RouterSaturated));
            return;
        }

        {
            let session = self
                .sessions
                .entry(req.session_id)
                .or_insert_with(|| SessionRecord::new(req.session_id, now));
            session.touch(now);
        }

        let busy = self.sessions.get(&req.session_id).map(|s| s.busy).unwrap_or(false);
        if !busy {
            self.begin_dispatch(
                req.session_id,
                req.wire_id,
                req.name,
                req.payload,
                req.origin_id,
                req.tab_id,
                req.deadline,
                resolve,
            );
        } else {
            let cap = self.config.session_queue_cap;
            let session = self.sessions.get_mut(&req.session_id).expect("just touched above");
            if session.queue.len() >= cap {
                let _ = resolve.send(Err(RouterError::QueueOverflow));
            } else {
                session.queue.push_back(QueuedCommand {
                    wire_id: req.wire_id,
                    name: req.name,
                    payload: req.payload,
                    origin_id: req.origin_id,
                    explicit_tab_id: req.tab_id,
                    deadline: req.deadline,
                    resolve,
                });
            }
        }
    }

    /// Tab assignment state machine (§4.3). Decides whether to dispatch
    /// immediately, reject on conflict, reclaim a lapsed owner's tab, or
    /// synthesize a `createTab` prerequisite first.
    fn begin_dispatch(
        &mut self,
        session_id: SessionId,
        wire_id: WireId,
        name: String,
        payload: Value,
        origin_id: Option<OriginId>,
        explicit_tab: Option<TabId>,
        deadline: Instant,
        resolve: ResolveSender,
    ) {
        match explicit_tab {
            Some(tab_id) => self.begin_dispatch_with_explicit_tab(
                session_id, wire_id, name, payload, origin_id, tab_id, deadline, resolve,
            ),
            None => {
                let current_tab = self.sessions.get(&session_id).and_then(|s| s.current_tab_id);
                match current_tab {
                    Some(tab_id) => {
                        self.dispatch_now(session_id, wire_id, name, payload, origin_id, Some(tab_id), deadline, resolve)
                    }
                    None => self.begin_tab_creation(session_id, wire_id, name, payload, origin_id, deadline, resolve),
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn begin_dispatch_with_explicit_tab(
        &mut self,
        session_id: SessionId,
        wire_id: WireId,
        name: String,
        payload: Value,
        origin_id: Option<OriginId>,
        tab_id: TabId,
        deadline: Instant,
        resolve: ResolveSender,
    ) {
        match self.tabs.owner_of(tab_id) {
            None => {
                self.assign_tab(session_id, tab_id);
                self.dispatch_now(session_id, wire_id, name, payload, origin_id, Some(tab_id), deadline, resolve);
            }
            Some(owner) if owner == session_id => {
                if let Some(session) = self.sessions.get_mut(&session_id) {
                    session.current_tab_id = Some(tab_id);
                }
                self.dispatch_now(session_id, wire_id, name, payload, origin_id, Some(tab_id), deadline, resolve);
            }
            Some(owner) => {
                let owner_past_grace = self
                    .sessions
                    .get(&owner)
                    .and_then(|s| s.grace_deadline)
                    .map(|gd| self.clock.now() >= gd)
                    .unwrap_or(false);
                if owner_past_grace {
                    self.tabs.remove(tab_id);
                    if let Some(owner_session) = self.sessions.get_mut(&owner) {
                        owner_session.owned_tabs.remove(&tab_id);
                        if owner_session.current_tab_id == Some(tab_id) {
                            owner_session.current_tab_id = None;
                        }
                    }
                    self.assign_tab(session_id, tab_id);
                    self.dispatch_now(session_id, wire_id, name, payload, origin_id, Some(tab_id), deadline, resolve);
                } else {
                    let _ = resolve.send(Err(RouterError::TabOwnershipConflict { tab_id }));
                }
            }
        }
    }

    fn assign_tab(&mut self, session_id: SessionId, tab_id: TabId) {
        self.tabs.insert(tab_id, session_id);
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.owned_tabs.insert(tab_id);
            session.current_tab_id = Some(tab_id);
        }
    }

    #[allow(clippy::too_many_arguments)]
    fn begin_tab_creation(
        &mut self,
        session_id: SessionId,
        wire_id: WireId,
        name: String,
        payload: Value,
        origin_id: Option<OriginId>,
        deadline: Instant,
        resolve: ResolveSender,
    ) {
        let create_wire_id = WireId::new();
        let now = self.clock.now();
        let timeout_handle = self.spawn_timeout_watch(session_id, create_wire_id, deadline);
        let pending = PendingCommand {
            wire_id: create_wire_id,
            name: "createTab".to_string(),
            payload: serde_json::json!({}),
            origin_id: None,
            submitted_at: now,
            deadline,
            target_tab: None,
            resolve: None,
            timeout_handle,
            cancelled: false,
        };
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.pending.insert(create_wire_id, pending);
            session.busy = true;
            session.awaiting_tab = Some((
                create_wire_id,
                DeferredDispatch {
                    wire_id,
                    name,
                    payload,
                    origin_id,
                    deadline,
                    resolve,
                },
            ));
        }
        self.wire_index.insert(create_wire_id, session_id);
        self.global_pending_count += 1;
        let frame = Frame::Command {
            wire_id: create_wire_id,
            session_id,
            origin_id: None,
            name: "createTab".to_string(),
            payload: serde_json::json!({}),
            tab_id: None,
        };
        self.spawn_send_task(frame, deadline, session_id, create_wire_id);
    }

    #[allow(clippy::too_many_arguments)]
    fn dispatch_now(
        &mut self,
        session_id: SessionId,
        wire_id: WireId,
        name: String,
        payload: Value,
        origin_id: Option<OriginId>,
        target_tab: Option<TabId>,
        deadline: Instant,
        resolve: ResolveSender,
    ) {
        let now = self.clock.now();
        let timeout_handle = self.spawn_timeout_watch(session_id, wire_id, deadline);
        let pending = PendingCommand {
            wire_id,
            name: name.clone(),
            payload: payload.clone(),
            origin_id: origin_id.clone(),
            submitted_at: now,
            deadline,
            target_tab,
            resolve: Some(resolve),
            timeout_handle,
            cancelled: false,
        };
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.pending.insert(wire_id, pending);
            session.busy = true;
        }
        self.wire_index.insert(wire_id, session_id);
        self.global_pending_count += 1;
        let frame = Frame::Command {
            wire_id,
            session_id,
            origin_id,
            name,
            payload,
            tab_id: target_tab,
        };
        self.spawn_send_task(frame, deadline, session_id, wire_id);
    }

    fn process_queue(&mut self, session_id: SessionId) {
        let next = self.sessions.get_mut(&session_id).and_then(|s| s.queue.pop_front());
        match next {
            Some(cmd) => self.begin_dispatch(
                session_id,
                cmd.wire_id,
                cmd.name,
                cmd.payload,
                cmd.origin_id,
                cmd.explicit_tab_id,
                cmd.deadline,
                cmd.resolve,
            ),
            None => {
                let idle = self.sessions.get(&session_id).map(|s| s.is_idle()).unwrap_or(false);
                if idle && self.pending_graceful_teardown.remove(&session_id) {
                    self.finish_teardown(session_id);
                }
            }
        }
    }

    // ---- response / event routing ------------------------------------------

    fn handle_response_frame(&mut self, wire_id: WireId, claimed_session: SessionId, payload: Option<Value>, error: Option<ExtensionError>) {
        let owner = match self.wire_index.get(&wire_id).copied() {
            Some(owner) => owner,
            None => {
                // Already settled (timeout/cancel) or never ours; drop.
                return;
            }
        };
        if owner != claimed_session {
            warn!(?wire_id, "response sessionId did not match the session owning this wireId, dropping");
            RouterMetrics::incr(&self.metrics.malformed_frames_dropped);
            return;
        }
        RouterMetrics::incr(&self.metrics.responses_matched);

        let is_tab_creation = self
            .sessions
            .get(&owner)
            .and_then(|s| s.awaiting_tab.as_ref())
            .map(|(w, _)| *w == wire_id)
            .unwrap_or(false);

        if is_tab_creation {
            self.complete_tab_creation(owner, wire_id, payload, error);
        } else {
            let target_tab = self
                .sessions
                .get(&owner)
                .and_then(|s| s.pending.get(&wire_id))
                .and_then(|p| p.target_tab);
            let result = match error {
                Some(e) => Err(RouterError::Downstream(e)),
                None => Ok(CommandOutcome {
                    payload: payload.unwrap_or(Value::Null),
                    tab_id: target_tab,
                }),
            };
            self.settle_pending(owner, wire_id, result);
        }
    }

    fn complete_tab_creation(&mut self, session_id: SessionId, wire_id: WireId, payload: Option<Value>, error: Option<ExtensionError>) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.pending.remove(&wire_id);
        }
        self.wire_index.remove(&wire_id);
        self.global_pending_count = self.global_pending_count.saturating_sub(1);

        let deferred = self.sessions.get_mut(&session_id).and_then(|s| s.awaiting_tab.take());
        let deferred = match deferred {
            Some((_, d)) => d,
            None => {
                // The original was cancelled while createTab was in
                // flight; just release the busy slot.
                if let Some(session) = self.sessions.get_mut(&session_id) {
                    session.busy = false;
                }
                self.process_queue(session_id);
                return;
            }
        };

        match error {
            Some(e) => {
                if let Some(session) = self.sessions.get_mut(&session_id) {
                    session.busy = false;
                }
                let _ = deferred.resolve.send(Err(RouterError::Downstream(e)));
                self.process_queue(session_id);
            }
            None => {
                let tab_id = payload
                    .as_ref()
                    .and_then(|p| p.get("tabId"))
                    .and_then(Value::as_u64)
                    .map(TabId);
                match tab_id {
                    Some(tab_id) => {
                        self.assign_tab(session_id, tab_id);
                        self.dispatch_now(
                            session_id,
                            deferred.wire_id,
                            deferred.name,
                            deferred.payload,
                            deferred.origin_id,
                            Some(tab_id),
                            deferred.deadline,
                            deferred.resolve,
                        );
                    }
                    None => {
                        if let Some(session) = self.sessions.get_mut(&session_id) {
                            session.busy = false;
                        }
                        let _ = deferred.resolve.send(Err(RouterError::MalformedResponse));
                        self.process_queue(session_id);
                    }
                }
            }
        }
    }

    fn settle_pending(&mut self, session_id: SessionId, wire_id: WireId, result: Result<CommandOutcome, RouterError>) {
        let removed = self.sessions.get_mut(&session_id).and_then(|s| s.pending.remove(&wire_id));
        self.wire_index.remove(&wire_id);
        let mut pending = match removed {
            Some(p) => p,
            None => return,
        };
        self.global_pending_count = self.global_pending_count.saturating_sub(1);
        pending.settle(result);
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.busy = false;
        }
        self.process_queue(session_id);
    }

    fn handle_event_frame(&mut self, session_id: SessionId, name: String, tab_id: Option<TabId>, payload: Value) {
        let session = match self.sessions.get_mut(&session_id) {
            Some(s) => s,
            None => {
                warn!(?session_id, "event for unknown session dropped");
                return;
            }
        };
        if let Some(tab_id) = tab_id {
            if self.tabs.owner_of(tab_id) != Some(session_id) {
                warn!(?session_id, ?tab_id, "event's tabId not owned by claimed session, dropped");
                RouterMetrics::incr(&self.metrics.events_dropped);
                return;
            }
        }
        session.touch(self.clock.now());
        if name == "tabClosed" {
            if let Some(tab_id) = tab_id {
                self.tabs.remove(tab_id);
                if let Some(session) = self.sessions.get_mut(&session_id) {
                    session.owned_tabs.remove(&tab_id);
                    if session.current_tab_id == Some(tab_id) {
                        session.current_tab_id = None;
                    }
                }
            }
        }
        let frame = Frame::Event {
            session_id,
            name,
            tab_id,
            payload,
        };
        if let Some(session) = self.sessions.get(&session_id) {
            // No subscribers is not an error: broadcast simply drops it.
            let _ = session.events.send(frame);
        }
    }

    // ---- cancellation / timeout ---------------------------------------------

    fn handle_cancel(&mut self, session_id: SessionId, wire_id: WireId) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            if let Some(pos) = session.queue.iter().position(|q| q.wire_id == wire_id) {
                let cmd = session.queue.remove(pos).expect("position just found");
                let _ = cmd.resolve.send(Err(RouterError::Cancelled));
                RouterMetrics::incr(&self.metrics.cancellations);
                return;
            }
        }

        let awaiting_create_wire = self
            .sessions
            .get(&session_id)
            .and_then(|s| s.awaiting_tab.as_ref())
            .filter(|(_, d)| d.wire_id == wire_id)
            .map(|(w, _)| *w);

        if let Some(create_wire_id) = awaiting_create_wire {
            self.send_best_effort_cancel(session_id, create_wire_id);
            if let Some((_, deferred)) = self.sessions.get_mut(&session_id).and_then(|s| s.awaiting_tab.take()) {
                let _ = deferred.resolve.send(Err(RouterError::Cancelled));
            }
            RouterMetrics::incr(&self.metrics.cancellations);
            return;
        }

        self.send_best_effort_cancel(session_id, wire_id);
        RouterMetrics::incr(&self.metrics.cancellations);
        self.settle_pending(session_id, wire_id, Err(RouterError::Cancelled));
    }

    fn handle_timeout(&mut self, session_id: SessionId, wire_id: WireId) {
        RouterMetrics::incr(&self.metrics.timeouts_fired);
        let is_tab_creation = self
            .sessions
            .get(&session_id)
            .and_then(|s| s.awaiting_tab.as_ref())
            .map(|(w, _)| *w == wire_id)
            .unwrap_or(false);

        self.send_best_effort_cancel(session_id, wire_id);

        if is_tab_creation {
            if let Some(session) = self.sessions.get_mut(&session_id) {
                session.pending.remove(&wire_id);
            }
            self.wire_index.remove(&wire_id);
            self.global_pending_count = self.global_pending_count.saturating_sub(1);
            let deferred = self.sessions.get_mut(&session_id).and_then(|s| s.awaiting_tab.take());
            if let Some((_, deferred)) = deferred {
                let _ = deferred.resolve.send(Err(RouterError::Timeout));
            }
            if let Some(session) = self.sessions.get_mut(&session_id) {
                session.busy = false;
            }
            self.process_queue(session_id);
        } else {
            self.settle_pending(session_id, wire_id, Err(RouterError::Timeout));
        }
    }

    fn send_best_effort_cancel(&self, session_id: SessionId, wire_id: WireId) {
        if let Some(link) = &self.link {
            link.try_send(Frame::Cancel { wire_id, session_id });
        }
    }

    fn spawn_timeout_watch(&self, session_id: SessionId, wire_id: WireId, deadline: Instant) -> JoinHandle<()> {
        let tx = self.internal_tx.clone();
        let clock = self.clock.clone();
        tokio::spawn(async move {
            clock.sleep_until(deadline).await;
            let _ = tx.send(Internal::Timeout { session_id, wire_id });
        })
    }

    fn spawn_send_task(&self, frame: Frame, deadline: Instant, session_id: SessionId, wire_id: WireId) {
        let Some(link) = &self.link else {
            // No link yet; the command sits in `pending` until a link
            // binds and the reconnect resend sweep picks it up.
            return;
        };
        let outbound = link.outbound_handle();
        let tx = self.internal_tx.clone();
        tokio::spawn(async move {
            let generation = outbound.generation;
            let result = outbound.send(frame, deadline).await;
            let _ = tx.send(Internal::SendOutcome {
                session_id,
                wire_id,
                generation,
                result,
            });
        });
    }

    fn handle_send_outcome(&mut self, session_id: SessionId, wire_id: WireId, generation: u64, result: Result<(), TransportError>) {
        if self.link.as_ref().map(|l| l.generation) != Some(generation) {
            return;
        }
        match result {
            Ok(()) => RouterMetrics::incr(&self.metrics.frames_dispatched),
            Err(TransportError::Backpressure) => {
                self.settle_pending(session_id, wire_id, Err(RouterError::LinkBackpressureTimeout));
            }
            Err(_) => self.begin_link_loss(LinkCloseReason::Transport),
        }
    }

    // ---- link lifecycle ------------------------------------------------------

    fn handle_bind_link(&mut self, link: LinkSupervisor) {
        if let Some(old) = self.link.take() {
            old.shutdown();
        }
        self.link_generation = self.link_generation.max(link.generation);
        RouterMetrics::incr(&self.metrics.reconnect_count);
        self.link = Some(link);
        self.resend_in_flight_commands();
        for session in self.sessions.values_mut() {
            session.grace_deadline = None;
        }
    }

    /// Re-send every in-flight `PendingCommand` across every session on
    /// the newly bound link, using the same `wireId` each already has.
    fn resend_in_flight_commands(&mut self) {
        let Some(link) = &self.link else { return };
        let outbound = link.outbound_handle();
        for (session_id, session) in self.sessions.iter() {
            for (wire_id, pending) in session.pending.iter() {
                let frame = reconstruct_resend_frame(*session_id, *wire_id, pending);
                let tx = self.internal_tx.clone();
                let outbound = outbound.clone();
                let deadline = pending.deadline;
                let session_id = *session_id;
                let wire_id = *wire_id;
                tokio::spawn(async move {
                    let generation = outbound.generation;
                    let result = outbound.send(frame, deadline).await;
                    let _ = tx.send(Internal::SendOutcome {
                        session_id,
                        wire_id,
                        generation,
                        result,
                    });
                });
            }
        }
    }

    fn begin_link_loss(&mut self, reason: LinkCloseReason) {
        if let Some(link) = self.link.take() {
            let generation = link.generation;
            link.shutdown();
            info!(?reason, generation, "extension link lost");
        }
        let grace_deadline = self.clock.now() + self.config.grace_window();
        let tx = self.internal_tx.clone();
        for (session_id, session) in self.sessions.iter_mut() {
            if !session.is_idle() {
                session.grace_deadline = Some(grace_deadline);
                let tx = tx.clone();
                let clock = self.clock.clone();
                let session_id = *session_id;
                tokio::spawn(async move {
                    clock.sleep_until(grace_deadline).await;
                    let _ = tx.send(Internal::GraceExpired { session_id });
                });
            }
        }
    }

    fn handle_grace_expired(&mut self, session_id: SessionId) {
        // A reconnect may have already cleared the grace deadline; a
        // stale timer firing afterward is a no-op.
        let still_in_grace = self
            .sessions
            .get(&session_id)
            .and_then(|s| s.grace_deadline)
            .map(|gd| self.clock.now() >= gd)
            .unwrap_or(false);
        if !still_in_grace {
            return;
        }
        self.reject_all_with(session_id, RouterError::LinkLost);
        self.release_session_tabs(session_id);
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.grace_deadline = None;
        }
    }

    fn reject_all_with(&mut self, session_id: SessionId, error: RouterError) {
        if let Some(session) = self.sessions.get_mut(&session_id) {
            for (_, mut pending) in session.pending.drain() {
                pending.settle(Err(error.clone()));
            }
            for cmd in session.queue.drain(..) {
                let _ = cmd.resolve.send(Err(error.clone()));
            }
            if let Some((_, deferred)) = session.awaiting_tab.take() {
                let _ = deferred.resolve.send(Err(error.clone()));
            }
            session.busy = false;
        }
        for wire_id in self
            .wire_index
            .iter()
            .filter(|(_, s)| **s == session_id)
            .map(|(w, _)| *w)
            .collect::<Vec<_>>()
        {
            self.wire_index.remove(&wire_id);
            self.global_pending_count = self.global_pending_count.saturating_sub(1);
        }
    }

    fn release_session_tabs(&mut self, session_id: SessionId) {
        let tabs = self.tabs.tabs_owned_by(session_id);
        for tab in tabs {
            self.tabs.remove(tab);
        }
        if let Some(session) = self.sessions.get_mut(&session_id) {
            session.owned_tabs.clear();
            session.current_tab_id = None;
        }
    }

    // ---- session lifecycle -----------------------------------------------

    fn handle_end_session(&mut self, session_id: SessionId, mode: EndMode) {
        self.retired.insert(session_id);
        match mode {
            EndMode::Immediate => {
                self.reject_all_with(session_id, RouterError::SessionClosed);
                self.release_session_tabs(session_id);
                self.finish_teardown(session_id);
            }
            EndMode::Graceful => {
                let idle = self.sessions.get(&session_id).map(|s| s.is_idle()).unwrap_or(true);
                if idle {
                    self.release_session_tabs(session_id);
                    self.finish_teardown(session_id);
                } else {
                    self.pending_graceful_teardown.insert(session_id);
                }
            }
        }
    }

    fn finish_teardown(&mut self, session_id: SessionId) {
        self.release_session_tabs(session_id);
        self.sessions.remove(&session_id);
        self.pending_graceful_teardown.remove(&session_id);
    }

    fn sweep_inactive_sessions(&mut self) {
        let now = self.clock.now();
        let cutoff = self.config.idle_threshold();
        let idle_ids: Vec<SessionId> = self
            .sessions
            .iter()
            .filter(|(_, s)| s.is_idle() && now.saturating_duration_since(s.last_activity_at) > cutoff)
            .map(|(id, _)| *id)
            .collect();
        for id in idle_ids {
            debug!(?id, "sweeping inactive session");
            self.handle_end_session(id, EndMode::Immediate);
        }
    }

    fn handle_shutdown(&mut self) {
        if let Some(link) = self.link.take() {
            link.shutdown();
        }
        let session_ids: Vec<SessionId> = self.sessions.keys().copied().collect();
        for id in session_ids {
            self.reject_all_with(id, RouterError::SessionClosed);
        }
        info!("session router shutting down");
    }
}

fn reconstruct_resend_frame(session_id: SessionId, wire_id: WireId, pending: &PendingCommand) -> Frame {
    Frame::Command {
        wire_id,
        session_id,
        origin_id: pending.origin_id.clone(),
        name: pending.name.clone(),
        payload: pending.payload.clone(),
        tab_id: pending.target_tab,
    }
}

//! The Extension Link: the single duplex channel to the browser
//! extension. Owns the active transport, heartbeats it, demultiplexes
//! inbound frames, and serializes outbound frames fairly.
//!
//! Realized as two pump tasks (reader, writer) plus a heartbeat task,
//! all feeding a single event channel the router task drains in its
//! `tokio::select!` loop. The pumps do no routing logic themselves —
//! they exist only so socket I/O can suspend without blocking the
//! router's other work, per the single-task event-loop model.

pub mod heartbeat;
pub mod transport;

use std::time::Duration;

use astra_router_types::Frame;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use self::heartbeat::jittered_first_delay;
use self::transport::{LinkReader, LinkTransport, LinkWriter};
use crate::error::TransportError;

/// Default heartbeat interval and the default window within which some
/// inbound traffic must arrive before the link is declared dead.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(90);

/// Soft cap on the outbound queue depth before `send` starts applying
/// backpressure to callers.
pub const DEFAULT_OUTBOUND_SOFT_LIMIT: usize = 512;

/// Something the router task observes happening on the link.
#[derive(Debug)]
pub enum LinkEvent {
    /// A frame arrived from the extension, in receipt order.
    Frame(Frame),
    /// The link died (clean close or I/O error). The router starts the
    /// grace window on receipt of this.
    Closed { reason: LinkCloseReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkCloseReason {
    /// The peer closed the socket or it errored.
    Transport,
    /// No inbound traffic within the heartbeat timeout window.
    HeartbeatTimeout,
    /// A newer link bound and replaced this one.
    Superseded,
    /// The router is shutting down.
    Shutdown,
}

/// A cheaply cloneable handle to a bound link's outbound side. Moved
/// into per-command send tasks so a single slow send (backpressure)
/// never blocks the router's main loop from servicing other sessions —
/// only the spawned task suspends; the loop learns the outcome later as
/// an ordinary event.
#[derive(Clone)]
pub struct LinkOutboundHandle {
    tx: mpsc::Sender<Frame>,
    pub generation: u64,
}

impl LinkOutboundHandle {
    pub async fn send(&self, frame: Frame, deadline: tokio::time::Instant) -> Result<(), TransportError> {
        match tokio::time::timeout_at(deadline, self.tx.send(frame)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(_)) => Err(TransportError::RouterGone),
            Err(_) => Err(TransportError::Backpressure),
        }
    }

    pub fn try_send(&self, frame: Frame) {
        let _ = self.tx.try_send(frame);
    }
}

/// A bound, live link: the handle the router holds to talk to the
/// extension, plus the task handles it owns and must abort on replace
/// or shutdown.
pub struct LinkSupervisor {
    /// Monotonically increasing id for this bind. The router compares
    /// this against the generation it dispatched under so a straggling
    /// event from a just-superseded link is ignored instead of
    /// corrupting the new link's state.
    pub generation: u64,
    outbound_tx: mpsc::Sender<Frame>,
    events_rx: mpsc::Receiver<LinkEvent>,
    reader_task: JoinHandle<()>,
    writer_task: JoinHandle<()>,
    heartbeat_task: JoinHandle<()>,
}

impl LinkSupervisor {
    /// Bind a freshly connected transport, spawning its reader, writer,
    /// and heartbeat pumps. `generation` should be strictly greater than
    /// any previously bound link's.
    pub fn bind<T: LinkTransport>(transport: T, generation: u64, heartbeat_interval: Duration) -> Self {
        let (mut reader, mut writer) = transport.split();
        let (events_tx, events_rx) = mpsc::channel(DEFAULT_OUTBOUND_SOFT_LIMIT);
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(DEFAULT_OUTBOUND_SOFT_LIMIT);

        let reader_events_tx = events_tx.clone();
        let reader_task = tokio::spawn(async move {
            loop {
                match reader.recv().await {
                    Ok(Some(frame)) => {
                        if reader_events_tx.send(LinkEvent::Frame(frame)).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        let _ = reader_events_tx
                            .send(LinkEvent::Closed {
                                reason: LinkCloseReason::Transport,
                            })
                            .await;
                        return;
                    }
                    Err(err) => {
                        warn!(error = %err, "extension link read failed");
                        let _ = reader_events_tx
                            .send(LinkEvent::Closed {
                                reason: LinkCloseReason::Transport,
                            })
                            .await;
                        return;
                    }
                }
            }
        });

        let writer_events_tx = events_tx.clone();
        let writer_task = tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(err) = writer.send(&frame).await {
                    warn!(error = %err, "extension link write failed");
                    let _ = writer_events_tx
                        .send(LinkEvent::Closed {
                            reason: LinkCloseReason::Transport,
                        })
                        .await;
                    return;
                }
            }
        });

        let heartbeat_outbound = outbound_tx.clone();
        let heartbeat_task = tokio::spawn(async move {
            tokio::time::sleep(jittered_first_delay(heartbeat_interval)).await;
            loop {
                if heartbeat_outbound.send(Frame::Ping).await.is_err() {
                    return;
                }
                tokio::time::sleep(heartbeat_interval).await;
            }
        });

        debug!(generation, "extension link bound");

        Self {
            generation,
            outbound_tx,
            events_rx,
            reader_task,
            writer_task,
            heartbeat_task,
        }
    }

    /// Queue a frame for the writer pump, applying backpressure: this
    /// suspends until there's room or `deadline` elapses.
    pub async fn send(&self, frame: Frame, deadline: tokio::time::Instant) -> Result<(), TransportError> {
        self.outbound_handle().send(frame, deadline).await
    }

    /// Best-effort send with no deadline, used for `Cancel` frames the
    /// spec only asks to attempt, never to guarantee.
    pub fn try_send(&self, frame: Frame) {
        let _ = self.outbound_tx.try_send(frame);
    }

    /// A cloneable handle callers can move into a spawned task instead
    /// of holding a borrow of the whole supervisor.
    pub fn outbound_handle(&self) -> LinkOutboundHandle {
        LinkOutboundHandle {
            tx: self.outbound_tx.clone(),
            generation: self.generation,
        }
    }

    pub async fn next_event(&mut self) -> Option<LinkEvent> {
        self.events_rx.recv().await
    }

    /// Abort every pump task. Called when this link is superseded or
    /// the router is shutting down; straggling events already queued in
    /// `events_rx` are drained and ignored by generation mismatch.
    pub fn shutdown(self) {
        self.reader_task.abort();
        self.writer_task.abort();
        self.heartbeat_task.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use self::transport::ChannelTransport;
    use astra_router_types::{SessionId, WireId};

    #[tokio::test(start_paused = true)]
    async fn bound_link_forwards_inbound_frames_as_events() {
        let (router_side, extension_side) = ChannelTransport::pair();
        let mut link = LinkSupervisor::bind(router_side, 1, Duration::from_secs(30));
        let (_extension_reader, mut extension_writer) = extension_side.split();

        let frame = Frame::Event {
            session_id: SessionId::new(),
            name: "tabClosed".into(),
            tab_id: None,
            payload: serde_json::json!({}),
        };
        extension_writer.send(&frame).await.unwrap();

        let event = link.next_event().await.unwrap();
        match event {
            LinkEvent::Frame(Frame::Event { name, .. }) => assert_eq!(name, "tabClosed"),
            other => panic!("unexpected event: {other:?}"),
        }
        link.shutdown();
    }

    #[tokio::test(start_paused = true)]
    async fn send_delivers_to_the_peer() {
        let (router_side, extension_side) = ChannelTransport::pair();
        let link = LinkSupervisor::bind(router_side, 1, Duration::from_secs(30));
        let (mut extension_reader, _extension_writer) = extension_side.split();

        let frame = Frame::Command {
            wire_id: WireId::new(),
            session_id: SessionId::new(),
            origin_id: None,
            name: "navigate".into(),
            payload: serde_json::json!({}),
            tab_id: None,
        };
        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        link.send(frame.clone(), deadline).await.unwrap();

        let received = extension_reader.recv().await.unwrap().unwrap();
        assert_eq!(received.wire_id(), frame.wire_id());
        link.shutdown();
    }
}

//! End-to-end scenarios against a real `SessionRouter` task, driven
//! through an in-memory `ChannelTransport` standing in for the
//! extension. Time is paused and advanced explicitly so deadline and
//! grace-window behavior is deterministic.

use std::sync::Arc;
use std::time::Duration;

use astra_router_core::{ChannelTransport, RouterConfig, RouterError, RouterMetrics, SubmitRequestArgs, TokioClock};
use astra_router_types::{Frame, SessionId, TabId};

fn short_config() -> RouterConfig {
    RouterConfig {
        heartbeat_interval_secs: 30,
        heartbeat_timeout_secs: 90,
        grace_window_secs: 5,
        session_queue_cap: 256,
        global_pending_cap: 8192,
        inactivity_sweep_secs: None,
        idle_threshold_secs: 360,
    }
}

async fn spawn_router_with_link(
    config: RouterConfig,
) -> (astra_router_core::RouterHandle, ChannelTransport, tokio::task::JoinHandle<()>) {
    let clock: Arc<dyn astra_router_core::Clock> = Arc::new(TokioClock);
    let metrics = Arc::new(RouterMetrics::default());
    let (router, join) = astra_router_core::router::spawn(config, clock, metrics);
    let (router_side, extension_side) = ChannelTransport::pair();
    router.bind_link(router_side, Duration::from_secs(30), 1).await;
    (router, extension_side, join)
}

fn submit_args(session_id: SessionId, name: &str, tab_id: Option<TabId>, deadline_secs: u64) -> SubmitRequestArgs {
    SubmitRequestArgs {
        session_id,
        name: name.to_string(),
        payload: serde_json::json!({}),
        tab_id,
        origin_id: None,
        deadline: tokio::time::Instant::now() + Duration::from_secs(deadline_secs),
    }
}

/// Reads the next `Command` frame off the extension side, asserting its
/// `name`, and answers it with `payload` under the same `wireId`.
async fn answer_next_command(ext: &mut ChannelTransport, expected_name: &str, payload: serde_json::Value) -> Frame {
    let frame = ext.recv().await.unwrap().expect("extension side closed");
    match &frame {
        Frame::Command { wire_id, session_id, name, .. } => {
            assert_eq!(name, expected_name);
            ext.send(&Frame::Response {
                wire_id: *wire_id,
                session_id: *session_id,
                payload: Some(payload),
                error: None,
            })
            .await
            .unwrap();
        }
        other => panic!("expected a Command frame, got {other:?}"),
    }
    frame
}

// S1: two sessions, two tabs, no cross-session interference.
#[tokio::test(start_paused = true)]
async fn s1_two_sessions_two_tabs_no_interference() {
    let (router, mut ext, _join) = spawn_router_with_link(short_config()).await;

    let session_a = SessionId::new();
    let session_b = SessionId::new();
    let tab_a = TabId(1);
    let tab_b = TabId(2);

    let a = router.submit(submit_args(session_a, "navigate", Some(tab_a), 10));
    let b = router.submit(submit_args(session_b, "navigate", Some(tab_b), 10));
    tokio::pin!(a);
    tokio::pin!(b);

    // Both commands dispatch independently; answer them in arrival order.
    answer_next_command(&mut ext, "navigate", serde_json::json!({"ok": "a"})).await;
    answer_next_command(&mut ext, "navigate", serde_json::json!({"ok": "b"})).await;

    let (result_a, result_b) = tokio::join!(a, b);
    assert!(result_a.is_ok());
    assert!(result_b.is_ok());

    router.shutdown().await;
}

// S2: explicit tab ownership conflict is rejected without reaching the link.
#[tokio::test(start_paused = true)]
async fn s2_tab_ownership_conflict() {
    let (router, mut ext, _join) = spawn_router_with_link(short_config()).await;

    let session_a = SessionId::new();
    let session_b = SessionId::new();
    let tab = TabId(7);

    let a = router.submit(submit_args(session_a, "click", Some(tab), 10));
    tokio::pin!(a);

    // session_a claims the tab; session_b's conflicting submit rejects
    // immediately, without ever producing a second outbound frame.
    let conflict = router.submit(submit_args(session_b, "click", Some(tab), 10)).await;
    assert_eq!(conflict, Err(RouterError::TabOwnershipConflict { tab_id: tab }));

    answer_next_command(&mut ext, "click", serde_json::json!({})).await;
    assert!(a.await.is_ok());

    router.shutdown().await;
}

// S3: FIFO ordering within one session under a single in-flight slot.
#[tokio::test(start_paused = true)]
async fn s3_fifo_within_a_session() {
    let (router, mut ext, _join) = spawn_router_with_link(short_config()).await;

    let session = SessionId::new();
    let tab = TabId(1);

    let first = router.submit(submit_args(session, "click", Some(tab), 10));
    let second = router.submit(submit_args(session, "type", Some(tab), 10));
    let third = router.submit(submit_args(session, "snapshot", Some(tab), 10));
    tokio::pin!(first);
    tokio::pin!(second);
    tokio::pin!(third);

    // Only one command is in flight at a time, and it must be the first
    // one submitted even though all three futures are already polled.
    let f1 = answer_next_command(&mut ext, "click", serde_json::json!({})).await;
    assert!(matches!(f1, Frame::Command { .. }));
    assert!(first.await.is_ok());

    answer_next_command(&mut ext, "type", serde_json::json!({})).await;
    assert!(second.await.is_ok());

    answer_next_command(&mut ext, "snapshot", serde_json::json!({})).await;
    assert!(third.await.is_ok());

    router.shutdown().await;
}

// S4: a command that outlives its deadline rejects with TIMEOUT, and a
// response that arrives after the deadline is dropped rather than
// reviving it.
#[tokio::test(start_paused = true)]
async fn s4_timeout_and_late_response_is_dropped() {
    let (router, mut ext, _join) = spawn_router_with_link(short_config()).await;

    let session = SessionId::new();
    let tab = TabId(3);

    let result_fut = router.submit(submit_args(session, "navigate", Some(tab), 2));
    tokio::pin!(result_fut);

    let frame = ext.recv().await.unwrap().expect("extension side closed");
    let (wire_id, session_id) = match &frame {
        Frame::Command { wire_id, session_id, .. } => (*wire_id, *session_id),
        other => panic!("expected Command, got {other:?}"),
    };

    tokio::time::advance(Duration::from_secs(3)).await;
    let result = result_fut.await;
    assert_eq!(result, Err(RouterError::Timeout));

    // Late response for the already-timed-out wire id is silently
    // ignored; it must not panic or resurface through any channel.
    ext.send(&Frame::Response {
        wire_id,
        session_id,
        payload: Some(serde_json::json!({"too": "late"})),
        error: None,
    })
    .await
    .unwrap();

    router.shutdown().await;
}

// S5: link loss with a reconnect inside the grace window re-delivers the
// in-flight command under the same wireId.
#[tokio::test(start_paused = true)]
async fn s5_link_loss_with_reconnect_resends_pending_command() {
    let (router, ext, _join) = spawn_router_with_link(short_config()).await;

    let session = SessionId::new();
    let tab = TabId(9);

    let result_fut = router.submit(submit_args(session, "navigate", Some(tab), 30));
    tokio::pin!(result_fut);

    let mut ext = ext;
    let frame = ext.recv().await.unwrap().expect("extension side closed");
    let original_wire_id = frame.wire_id().expect("command carries a wire id");
    drop(ext); // simulate the extension disconnecting mid-flight

    // Still within the grace window: bind a fresh link before it expires.
    tokio::time::advance(Duration::from_secs(1)).await;
    let (router_side, mut new_ext) = ChannelTransport::pair();
    router.bind_link(router_side, Duration::from_secs(30), 2).await;

    let resent = new_ext.recv().await.unwrap().expect("resend on reconnect");
    let resent_wire_id = resent.wire_id().expect("resend carries a wire id");
    assert_eq!(resent_wire_id, original_wire_id);

    match &resent {
        Frame::Command { wire_id, session_id, .. } => {
            new_ext
                .send(&Frame::Response {
                    wire_id: *wire_id,
                    session_id: *session_id,
                    payload: Some(serde_json::json!({"resumed": true})),
                    error: None,
                })
                .await
                .unwrap();
        }
        other => panic!("expected resent Command, got {other:?}"),
    }

    assert!(result_fut.await.is_ok());
    router.shutdown().await;
}

// S6: link loss with no reconnect before the grace window expires fails
// every pending and queued command with LINK_LOST.
#[tokio::test(start_paused = true)]
async fn s6_link_loss_without_reconnect_fails_with_link_lost() {
    let (router, ext, _join) = spawn_router_with_link(short_config()).await;

    let session = SessionId::new();
    let tab = TabId(4);

    let in_flight = router.submit(submit_args(session, "navigate", Some(tab), 30));
    tokio::pin!(in_flight);

    let mut ext = ext;
    let _ = ext.recv().await.unwrap().expect("extension side closed");
    drop(ext);

    // A second command queues up behind the in-flight one while the link
    // is down.
    let queued = router.submit(submit_args(session, "click", Some(tab), 30));
    tokio::pin!(queued);

    // Outlast the grace window with no reconnect.
    tokio::time::advance(Duration::from_secs(6)).await;

    assert_eq!(in_flight.await, Err(RouterError::LinkLost));
    assert_eq!(queued.await, Err(RouterError::LinkLost));

    router.shutdown().await;
}

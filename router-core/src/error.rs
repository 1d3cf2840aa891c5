//! The closed error taxonomy every `submit` either resolves or rejects
//! against. Infrastructure failures (link down, backpressure) are never
//! conflated with downstream semantic failures (the extension said
//! "element not found") — the latter is always [`RouterError::Downstream`]
//! carrying an opaque payload.

use astra_router_types::{ExtensionError, SessionId, TabId};
use thiserror::Error;

/// A stable string code for each taxonomy member, for callers that want
/// to match on the kind without parsing the `Display` message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    UnknownSession,
    TabOwnershipConflict,
    QueueOverflow,
    RouterSaturated,
    Timeout,
    Cancelled,
    LinkLost,
    LinkBackpressureTimeout,
    SessionClosed,
    MalformedResponse,
    DownstreamError,
    InvalidArgument,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorCode::UnknownSession => "UNKNOWN_SESSION",
            ErrorCode::TabOwnershipConflict => "TAB_OWNERSHIP_CONFLICT",
            ErrorCode::QueueOverflow => "QUEUE_OVERFLOW",
            ErrorCode::RouterSaturated => "ROUTER_SATURATED",
            ErrorCode::Timeout => "TIMEOUT",
            ErrorCode::Cancelled => "CANCELLED",
            ErrorCode::LinkLost => "LINK_LOST",
            ErrorCode::LinkBackpressureTimeout => "LINK_BACKPRESSURE_TIMEOUT",
            ErrorCode::SessionClosed => "SESSION_CLOSED",
            ErrorCode::MalformedResponse => "MALFORMED_RESPONSE",
            ErrorCode::DownstreamError => "DOWNSTREAM_ERROR",
            ErrorCode::InvalidArgument => "INVALID_ARGUMENT",
        }
    }
}

/// Why a `submit` rejected, or a command in flight was abandoned.
///
/// Every variant carries only the ids a caller needs to act on it. In
/// particular `TabOwnershipConflict` never surfaces the raw `SessionId`
/// of the conflicting session — callers only learn that some other live
/// session holds the tab, not which one.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum RouterError {
    #[error("unknown session")]
    UnknownSession,

    #[error("tab {tab_id} is owned by another session")]
    TabOwnershipConflict { tab_id: TabId },

    #[error("session queue is full (cap reached)")]
    QueueOverflow,

    #[error("router-wide pending command table is saturated")]
    RouterSaturated,

    #[error("command deadline elapsed before a response arrived")]
    Timeout,

    #[error("command was cancelled")]
    Cancelled,

    #[error("extension link lost and grace window elapsed with no reconnect")]
    LinkLost,

    #[error("could not send before deadline due to outbound backpressure")]
    LinkBackpressureTimeout,

    #[error("session was closed while the command was in flight or queued")]
    SessionClosed,

    #[error("response frame failed envelope validation")]
    MalformedResponse,

    #[error("extension reported an error: {0}")]
    Downstream(#[from] ExtensionError),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl RouterError {
    pub fn code(&self) -> ErrorCode {
        match self {
            RouterError::UnknownSession => ErrorCode::UnknownSession,
            RouterError::TabOwnershipConflict { .. } => ErrorCode::TabOwnershipConflict,
            RouterError::QueueOverflow => ErrorCode::QueueOverflow,
            RouterError::RouterSaturated => ErrorCode::RouterSaturated,
            RouterError::Timeout => ErrorCode::Timeout,
            RouterError::Cancelled => ErrorCode::Cancelled,
            RouterError::LinkLost => ErrorCode::LinkLost,
            RouterError::LinkBackpressureTimeout => ErrorCode::LinkBackpressureTimeout,
            RouterError::SessionClosed => ErrorCode::SessionClosed,
            RouterError::MalformedResponse => ErrorCode::MalformedResponse,
            RouterError::Downstream(_) => ErrorCode::DownstreamError,
            RouterError::InvalidArgument(_) => ErrorCode::InvalidArgument,
        }
    }
}

/// Internal errors from the submission channel itself (the router task
/// died, or a caller dropped its receiver). These never reach the closed
/// taxonomy above — they indicate the daemon is shutting down or has
/// already crashed, at which point §6's exit code `3` applies.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("router task is no longer running")]
    RouterGone,
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("malformed frame: {0}")]
    Codec(#[from] serde_json::Error),
    #[error("outbound link buffer did not drain before the deadline")]
    Backpressure,
}

/// Carries `(code, conflicting session marker)` — used only to report a
/// tab ownership conflict opaquely, i.e. without exposing the raw id of
/// the other session.
pub fn opaque_conflict_marker(_conflicting: SessionId) -> &'static str {
    "another-session"
}

//! Session-multiplexed command router and tab-ownership coordinator for
//! the Astra browser extension link.
//!
//! A single [`router::SessionRouter`] task owns every session's
//! in-flight and queued commands, the process-wide tab ownership map,
//! and the currently bound [`link::LinkSupervisor`]. External callers —
//! normally through [`adapter::ToolAdapter`] — talk to it only via the
//! cloneable [`router::RouterHandle`] mailbox.

pub mod adapter;
pub mod capability;
pub mod clock;
pub mod config;
pub mod error;
pub mod link;
pub mod metrics;
pub mod pending;
pub mod router;
pub mod session;
pub mod tab;

pub use adapter::{AdapterError, SessionToken, ToolAdapter};
pub use capability::{Capability, CapabilityRegistry};
pub use clock::{Clock, TokioClock};
pub use config::RouterConfig;
pub use error::{ErrorCode, RouterError, TransportError};
pub use link::transport::{ChannelTransport, LinkTransport, NdjsonTcpTransport};
pub use metrics::{MetricsSnapshot, RouterMetrics};
pub use pending::CommandOutcome;
pub use router::{EndMode, RouterHandle, RouterStats, SubmitRequestArgs};

pub use astra_router_types::{ExtensionError, Frame, OriginId, SessionId, TabId, WireId};

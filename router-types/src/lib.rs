//! Wire envelope and identifier types shared between the session router,
//! the extension link, and the tool adapter surface.
//!
//! This crate deliberately knows nothing about sessions, tabs, or
//! dispatch — it is the one place all three id namespaces (session,
//! wire, origin) and the frame shape they travel in are defined, so the
//! rest of the router never has to reconcile three different
//! conventions.

mod frame;
mod ids;

pub use frame::{ExtensionError, Frame};
pub use ids::{OriginId, SessionId, TabId, WireId};

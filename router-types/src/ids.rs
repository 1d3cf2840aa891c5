//! Identifier newtypes for the three id namespaces the router must never
//! let collide: session id, wire id, origin id. A fourth, `TabId`, is
//! assigned by the browser itself and is treated as an opaque key.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one logical AI-assistant session for the lifetime of the
/// router process. Minted once by the Tool Adapter Surface on first
/// contact from a given upstream caller; never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    /// Mint a fresh, process-unique session id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Router-assigned correlation token for exactly one command/response pair.
/// Generated at dispatch time, never by the caller, and never reused even
/// across sessions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WireId(pub Uuid);

impl WireId {
    /// Mint a fresh, globally-unique wire id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for WireId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WireId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "wire-{}", self.0)
    }
}

/// Caller-supplied opaque echo token. May repeat, may be absent, is never
/// used for routing — it exists purely so the upstream caller can
/// correlate a response against whatever bookkeeping it keeps locally.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OriginId(pub String);

impl fmt::Display for OriginId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for OriginId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for OriginId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Browser-assigned tab identifier. Unique within the browser, treated as
/// an opaque key by the router — it never interprets or generates these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TabId(pub u64);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "tab-{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_ids_are_unique() {
        let a = SessionId::new();
        let b = SessionId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn wire_ids_are_unique() {
        let a = WireId::new();
        let b = WireId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn tab_id_round_trips_through_json() {
        let id = TabId(101);
        let s = serde_json::to_string(&id).unwrap();
        assert_eq!(s, "101");
        let back: TabId = serde_json::from_str(&s).unwrap();
        assert_eq!(back, id);
    }
}

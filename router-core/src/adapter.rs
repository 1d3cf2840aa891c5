//! The Tool Adapter Surface: the boundary the host process (an MCP
//! server, an agent harness) calls through to reach the router. Owns
//! the session-token → [`SessionId`] mapping, derives default deadlines
//! and validates arguments via the capability registry, and translates
//! [`RouterError`] into the adapter's own error shape so callers never
//! see router-internal types.

use std::sync::Arc;
use std::time::Duration;

use astra_router_types::{OriginId, SessionId, TabId};
use fnv::FnvHashMap;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};

use crate::capability::CapabilityRegistry;
use crate::clock::Clock;
use crate::error::RouterError;
use crate::pending::CommandOutcome;
use crate::router::{EndMode, RouterHandle, SubmitRequestArgs};

/// A caller-facing token identifying one logical session. Distinct from
/// [`SessionId`] so the router's internal id never leaks to the host
/// process's own bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(pub String);

impl From<String> for SessionToken {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SessionToken {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Errors the adapter surface can report, distinct from [`RouterError`]
/// so a caller never needs to know about wire ids or tab ownership
/// conflicts unless they ask — most just want "it failed" plus a reason.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum AdapterError {
    #[error("arguments for '{name}' failed validation: {source}")]
    InvalidArguments { name: String, source: RouterError },

    #[error(transparent)]
    Router(#[from] RouterError),
}

/// Maps opaque caller-supplied session tokens to router [`SessionId`]s,
/// minting one on first use. One token always maps to the same session
/// id for the lifetime of the process.
#[derive(Default)]
struct TokenTable {
    tokens: FnvHashMap<SessionToken, SessionId>,
}

impl TokenTable {
    fn resolve(&mut self, token: &SessionToken) -> SessionId {
        *self
            .tokens
            .entry(token.clone())
            .or_insert_with(SessionId::new)
    }

    fn remove(&mut self, token: &SessionToken) -> Option<SessionId> {
        self.tokens.remove(token)
    }
}

/// The Tool Adapter Surface itself. Cheaply cloneable (an `Arc` around
/// its mutable state), so the host process can hand one copy to each
/// inbound tool-call handler.
#[derive(Clone)]
pub struct ToolAdapter {
    router: RouterHandle,
    capabilities: Arc<CapabilityRegistry>,
    tokens: Arc<Mutex<TokenTable>>,
    clock: Arc<dyn Clock>,
    default_deadline: Duration,
}

impl ToolAdapter {
    pub fn new(router: RouterHandle, capabilities: CapabilityRegistry, clock: Arc<dyn Clock>, default_deadline: Duration) -> Self {
        Self {
            router,
            capabilities: Arc::new(capabilities),
            tokens: Arc::new(Mutex::new(TokenTable::default())),
            clock,
            default_deadline,
        }
    }

    /// Resolve `token` to a stable [`SessionId`], minting a new session
    /// on first contact (§3's lifecycle note).
    pub async fn session_id_for(&self, token: &SessionToken) -> SessionId {
        self.tokens.lock().await.resolve(token)
    }

    /// Handle one tool call: validate its arguments against the
    /// capability registry, derive a deadline if the caller didn't
    /// supply one, and submit it to the router.
    pub async fn handle_tool_call(
        &self,
        token: &SessionToken,
        name: &str,
        payload: Value,
        tab_id: Option<TabId>,
        origin_id: Option<OriginId>,
        deadline_override: Option<Duration>,
    ) -> Result<CommandOutcome, AdapterError> {
        self.capabilities
            .validate(name, &payload)
            .map_err(|source| AdapterError::InvalidArguments {
                name: name.to_string(),
                source,
            })?;

        let session_id = self.session_id_for(token).await;
        let timeout = deadline_override
            .unwrap_or_else(|| self.capabilities.default_deadline_for(name, self.default_deadline));
        let deadline = self.clock.now() + timeout;

        let outcome = self
            .router
            .submit(SubmitRequestArgs {
                session_id,
                name: name.to_string(),
                payload,
                tab_id,
                origin_id,
                deadline,
            })
            .await?;
        Ok(outcome)
    }

    /// End the session backing `token`, releasing its tab(s) and
    /// forgetting the token-to-session mapping.
    pub async fn end_session(&self, token: &SessionToken, mode: EndMode) {
        let session_id = self.tokens.lock().await.remove(token);
        if let Some(session_id) = session_id {
            self.router.end_session(session_id, mode).await;
        }
    }

    /// Subscribe to unsolicited events for the session backing `token`,
    /// if that session currently exists.
    pub async fn subscribe_events(&self, token: &SessionToken) -> Option<broadcast::Receiver<astra_router_types::Frame>> {
        let session_id = self.session_id_for(token).await;
        self.router.subscribe_events(session_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::TokioClock;
    use crate::config::RouterConfig;
    use crate::metrics::RouterMetrics;

    fn adapter() -> ToolAdapter {
        let clock: Arc<dyn Clock> = Arc::new(TokioClock);
        let (router, _join) = crate::router::spawn(RouterConfig::default(), clock.clone(), Arc::new(RouterMetrics::default()));
        ToolAdapter::new(router, crate::capability::default_registry(), clock, Duration::from_secs(20))
    }

    #[tokio::test(start_paused = true)]
    async fn same_token_always_resolves_to_the_same_session() {
        let adapter = adapter();
        let token = SessionToken::from("agent-1");
        let a = adapter.session_id_for(&token).await;
        let b = adapter.session_id_for(&token).await;
        assert_eq!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn distinct_tokens_get_distinct_sessions() {
        let adapter = adapter();
        let a = adapter.session_id_for(&SessionToken::from("agent-1")).await;
        let b = adapter.session_id_for(&SessionToken::from("agent-2")).await;
        assert_ne!(a, b);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_arguments_rejected_before_reaching_the_router() {
        let adapter = adapter();
        let token = SessionToken::from("agent-1");
        let result = adapter
            .handle_tool_call(&token, "navigate", serde_json::json!({}), None, None, None)
            .await;
        assert!(matches!(result, Err(AdapterError::InvalidArguments { .. })));
    }
}

//! Permission ask mediation — the bridge between the tool loop and the user.
//!
//! An ASK decision becomes a prompt in the agent's channel with Allow/Deny
//! choices restricted to the requesting user. Everything resolves fail-closed:
//! timeout is a deny, a broken UI is a deny. Resolved decisions are written to
//! the audit log.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use chorus_core::store::Store;

use crate::port::{AskRequest, ChatPort};

/// How long the user has to answer before the prompt denies itself.
pub const ASK_TIMEOUT_SECS: u64 = 120;

/// Resolves ASK permission decisions. The tool loop only sees a bool.
#[async_trait]
pub trait AskMediator: Send + Sync {
    /// Prompt the user about `request` and return whether they approved.
    async fn resolve(
        &self,
        agent_name: &str,
        channel_id: u64,
        user_id: u64,
        request: &AskRequest,
    ) -> bool;
}

/// Mediator backed by the chat port and the audit log.
pub struct ChannelAskMediator {
    port: Arc<dyn ChatPort>,
    store: Store,
    timeout: Duration,
}

impl ChannelAskMediator {
    pub fn new(port: Arc<dyn ChatPort>, store: Store) -> Self {
        Self::with_timeout(port, store, Duration::from_secs(ASK_TIMEOUT_SECS))
    }

    pub fn with_timeout(port: Arc<dyn ChatPort>, store: Store, timeout: Duration) -> Self {
        Self {
            port,
            store,
            timeout,
        }
    }
}

#[async_trait]
impl AskMediator for ChannelAskMediator {
    async fn resolve(
        &self,
        agent_name: &str,
        channel_id: u64,
        user_id: u64,
        request: &AskRequest,
    ) -> bool {
        let asked = self.port.ask(channel_id, user_id, request);

        let approved = match tokio::time::timeout(self.timeout, asked).await {
            Ok(Ok(choice)) => choice,
            Ok(Err(e)) => {
                warn!(action = %request.action_string, error = %e, "ask UI failed, denying");
                false
            }
            Err(_) => {
                info!(action = %request.action_string, "ask timed out, denying");
                false
            }
        };

        let decision = if approved { "ask_approved" } else { "ask_denied" };
        if let Err(e) = self
            .store
            .append_audit(
                agent_name,
                &request.action_string,
                decision,
                Some(user_id),
                None,
            )
            .await
        {
            warn!(error = %e, "failed to audit ask decision");
        }

        approved
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

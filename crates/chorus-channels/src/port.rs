//! The chat-platform port — the narrow interface the core depends on.
//!
//! A real implementation wraps Discord (or an equivalent platform); tests and
//! the CLI use in-process fakes.

use async_trait::async_trait;
use thiserror::Error;

/// Failure delivering to or prompting through the chat platform.
#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("chat transport failed: {0}")]
    Transport(String),

    #[error("channel {0} is not reachable")]
    Unavailable(u64),
}

/// A permission prompt shown to the requesting user.
#[derive(Clone, Debug)]
pub struct AskRequest {
    /// The action string under review (e.g. `tool:bash:ls`).
    pub action_string: String,
    pub tool_name: String,
    /// Raw JSON arguments, displayed verbatim.
    pub arguments: String,
}

/// What the core needs from the chat platform.
#[async_trait]
pub trait ChatPort: Send + Sync {
    /// Deliver `content` to a channel. Returns the platform message id so
    /// threads can be located by reply later.
    async fn send(&self, channel_id: u64, content: &str) -> Result<u64, ChannelError>;

    /// Show an Allow/Deny widget restricted to `user_id` and wait for the
    /// choice. The caller bounds the wait; implementations may impose their
    /// own shorter UI expiry.
    async fn ask(
        &self,
        channel_id: u64,
        user_id: u64,
        request: &AskRequest,
    ) -> Result<bool, ChannelError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_error_messages() {
        let err = ChannelError::Unavailable(42);
        assert!(err.to_string().contains("42"));
        let err = ChannelError::Transport("socket closed".into());
        assert!(err.to_string().contains("socket closed"));
    }
}

//! Chat-platform boundary for Chorus.
//!
//! The platform itself (channels, widgets, delivery) is an external
//! collaborator behind [`port::ChatPort`]. This crate adds the two pieces of
//! egress machinery the core owns: the sliding-window [`sender::RateLimitedSender`]
//! and the fail-closed [`ask::ChannelAskMediator`] for permission prompts.

pub mod ask;
pub mod port;
pub mod sender;

pub use ask::{AskMediator, ChannelAskMediator, ASK_TIMEOUT_SECS};
pub use port::{AskRequest, ChannelError, ChatPort};
pub use sender::RateLimitedSender;

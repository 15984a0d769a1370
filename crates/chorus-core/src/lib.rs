//! Core building blocks for Chorus: shared chat/LLM types, the typed error
//! enum, agent-name validation, the permission engine, the persistent store,
//! env configuration, and small utilities.

pub mod config;
pub mod error;
pub mod names;
pub mod permissions;
pub mod store;
pub mod types;
pub mod utils;

pub use error::ChorusError;

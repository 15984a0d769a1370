//! Agent name validation.
//!
//! Names become directory names, store keys, and channel labels, so the rules
//! are strict: 2-32 chars, lowercase alphanumeric plus interior hyphens.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::{ChorusError, Result};

fn name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-z0-9][a-z0-9-]{0,30}[a-z0-9]$").expect("name pattern is valid")
    })
}

/// Validate an agent name, returning `InvalidAgentName` on any violation.
pub fn validate_agent_name(name: &str) -> Result<()> {
    if name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(ChorusError::InvalidAgentName(name.to_string()))
    }
}

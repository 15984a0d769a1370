//! Regex-based permission engine — pure logic, no I/O, no side effects.
//!
//! Every tool invocation is an action string `tool:<tool_name>:<detail>`.
//! The engine matches it against a [`PermissionProfile`] and returns
//! [`PermissionResult::Allow`], [`Ask`](PermissionResult::Ask), or
//! [`Deny`](PermissionResult::Deny).
//!
//! Profiles compile with `fancy-regex` because the built-in `standard` preset
//! relies on negative lookahead (`tool:git:(?!push).*`).

use fancy_regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ChorusError, Result};

// ─────────────────────────────────────────────
// Result enum
// ─────────────────────────────────────────────

/// Outcome of a permission check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PermissionResult {
    Allow,
    Ask,
    Deny,
}

impl PermissionResult {
    /// Lowercase label used in audit rows.
    pub fn as_str(&self) -> &'static str {
        match self {
            PermissionResult::Allow => "allow",
            PermissionResult::Ask => "ask",
            PermissionResult::Deny => "deny",
        }
    }
}

// ─────────────────────────────────────────────
// PermissionProfile
// ─────────────────────────────────────────────

/// Ordered allow/ask pattern lists; everything unmatched is denied.
///
/// Patterns compile once at construction. An invalid pattern is a fatal
/// configuration error, surfaced as `InvalidPermissionPattern`.
#[derive(Debug)]
pub struct PermissionProfile {
    allow: Vec<String>,
    ask: Vec<String>,
    compiled_allow: Vec<Regex>,
    compiled_ask: Vec<Regex>,
}

/// The serialized shape stored in `agent.json`.
#[derive(Debug, Serialize, Deserialize)]
pub struct ProfileSpec {
    pub allow: Vec<String>,
    pub ask: Vec<String>,
}

impl PermissionProfile {
    /// Build a profile, compiling every pattern eagerly.
    pub fn new(
        allow: impl IntoIterator<Item = String>,
        ask: impl IntoIterator<Item = String>,
    ) -> Result<Self> {
        let allow: Vec<String> = allow.into_iter().collect();
        let ask: Vec<String> = ask.into_iter().collect();
        let compiled_allow = compile_all(&allow)?;
        let compiled_ask = compile_all(&ask)?;
        Ok(Self {
            allow,
            ask,
            compiled_allow,
            compiled_ask,
        })
    }

    /// Deserialize from the `agent.json` representation.
    pub fn from_spec(spec: ProfileSpec) -> Result<Self> {
        Self::new(spec.allow, spec.ask)
    }

    /// Serialize to the `agent.json` representation.
    pub fn to_spec(&self) -> ProfileSpec {
        ProfileSpec {
            allow: self.allow.clone(),
            ask: self.ask.clone(),
        }
    }
}

/// Compile patterns with full-match anchoring.
fn compile_all(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(&format!("^(?:{p})$")).map_err(|e| ChorusError::InvalidPermissionPattern {
                pattern: p.clone(),
                reason: e.to_string(),
            })
        })
        .collect()
}

// ─────────────────────────────────────────────
// Engine — stateless check function
// ─────────────────────────────────────────────

/// Check `action` against `profile`.
///
/// Matching order: each allow pattern in declaration order, then each ask
/// pattern, then deny. The whole action string must match.
pub fn check(action: &str, profile: &PermissionProfile) -> PermissionResult {
    // fancy-regex can error on pathological backtracking; treat that as no match
    for pattern in &profile.compiled_allow {
        if pattern.is_match(action).unwrap_or(false) {
            return PermissionResult::Allow;
        }
    }
    for pattern in &profile.compiled_ask {
        if pattern.is_match(action).unwrap_or(false) {
            return PermissionResult::Ask;
        }
    }
    PermissionResult::Deny
}

/// Build a correctly formatted action string.
///
/// The only constructor for action strings, so detail formatting stays
/// consistent across tools.
pub fn format_action(tool_name: &str, detail: &str) -> String {
    format!("tool:{tool_name}:{detail}")
}

// ─────────────────────────────────────────────
// Built-in presets
// ─────────────────────────────────────────────

/// Return a built-in preset by name: `open`, `standard`, or `locked`.
pub fn get_preset(name: &str) -> Result<PermissionProfile> {
    let profile = match name {
        "open" => PermissionProfile::new([".*".to_string()], Vec::<String>::new())?,
        "standard" => PermissionProfile::new(
            [r"tool:file:.*".to_string(), r"tool:git:(?!push).*".to_string()],
            [r"tool:bash:.*".to_string(), r"tool:git:push.*".to_string()],
        )?,
        "locked" => PermissionProfile::new([r"tool:file:view.*".to_string()], Vec::<String>::new())?,
        other => return Err(ChorusError::UnknownPreset(other.to_string())),
    };
    Ok(profile)
}

//! Status inference from free-text control API messages.
//!
//! The control API does not return a structured state. It returns a sentence
//! such as `"Instance i-0123abc is now running"`, and this module recovers a
//! [`VpnState`] and an instance identifier from it.
//!
//! # Keyword priority
//!
//! Matching is a case-sensitive substring search, first match wins:
//!
//! | Priority | Keyword | State |
//! |----------|---------|-------|
//! | 1 | `running` | [`VpnState::Running`] |
//! | 2 | `stopped` | [`VpnState::Stopped`] |
//! | 3 | `starting` | [`VpnState::Starting`] |
//! | 4 | `stopping` | [`VpnState::Stopping`] |
//!
//! A message such as `"starting... instance will be running shortly"` thus
//! resolves to `running`. A message with no keyword carries no state.
//!
//! # Identifier heuristic
//!
//! The identifier is the text between the last `"Instance "` token and the
//! next `" is"` after it. This is a best-effort scan over prose, not a
//! structured field: an identifier that itself contains `" is"` is truncated,
//! and a message phrased without both delimiters yields nothing.

use crate::state::VpnState;

const KEYWORDS: [(&str, VpnState); 4] = [
    ("running", VpnState::Running),
    ("stopped", VpnState::Stopped),
    ("starting", VpnState::Starting),
    ("stopping", VpnState::Stopping),
];

const INSTANCE_PREFIX: &str = "Instance ";
const INSTANCE_SUFFIX: &str = " is";

/// What a single server message tells us.
///
/// `None` fields mean "no information": callers keep their prior value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ParsedStatus<'a> {
    /// State inferred from keywords.
    pub state: Option<VpnState>,
    /// Identifier extracted from the `Instance <id> is` phrase.
    pub instance_id: Option<&'a str>,
}

impl ParsedStatus<'_> {
    /// Merge into prior values, leaving anything not recognised untouched.
    pub fn apply_to(&self, state: &mut VpnState, instance_id: &mut Option<String>) {
        if let Some(parsed) = self.state {
            *state = parsed;
        }
        if let Some(id) = self.instance_id {
            *instance_id = Some(id.to_owned());
        }
    }
}

/// Parse a status message into its state and identifier parts.
#[must_use]
pub fn parse_message(message: &str) -> ParsedStatus<'_> {
    ParsedStatus {
        state: infer_state(message),
        instance_id: extract_instance_id(message),
    }
}

/// Infer the state from keywords in priority order.
#[must_use]
pub fn infer_state(message: &str) -> Option<VpnState> {
    KEYWORDS
        .iter()
        .find(|(keyword, _)| message.contains(keyword))
        .map(|(_, state)| *state)
}

/// Extract the identifier from an `Instance <id> is ...` phrase.
///
/// Returns `None` when either delimiter is missing or the identifier is empty.
#[must_use]
pub fn extract_instance_id(message: &str) -> Option<&str> {
    let start = message.rfind(INSTANCE_PREFIX)? + INSTANCE_PREFIX.len();
    let rest = &message[start..];
    let end = rest.find(INSTANCE_SUFFIX)?;
    let id = &rest[..end];
    (!id.is_empty()).then_some(id)
}

//! Deliverable extraction and validation — the trust boundary.
//!
//! The reasoning engine is instructed to emit the user-facing output between
//! explicit delimiters, separate from any internal narrative. Extraction is a
//! best-effort parse that can fail; failures route to `needs_review`, never
//! to a guessed send.

use opspilot_core::error::{OpsPilotError, Result};

/// Opening delimiter the engine must emit before the user-facing output.
pub const DELIVERABLE_OPEN: &str = "<<<DELIVERABLE>>>";
/// Closing delimiter.
pub const DELIVERABLE_CLOSE: &str = "<<<END_DELIVERABLE>>>";
/// Sentinel for a deliberate no-op: the engine decided nothing should be sent.
pub const NO_DELIVERABLE: &str = "NO_DELIVERABLE";

/// Markers that must never appear inside a validated deliverable.
const INTERNAL_MARKERS: &[&str] = &[
    DELIVERABLE_OPEN,
    DELIVERABLE_CLOSE,
    "[internal]",
    "[work log]",
    "[prior occurrences]",
];

/// A validated deliverable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Deliverable {
    /// Content to deliver verbatim.
    Content(String),
    /// Explicit no-op — the task completes with zero sends.
    None,
}

/// Extract the delimited substring from a raw engine response. Returns None
/// when the framing is missing or malformed.
pub fn extract(response: &str) -> Option<String> {
    let start = response.find(DELIVERABLE_OPEN)? + DELIVERABLE_OPEN.len();
    let rest = &response[start..];
    let end = rest.find(DELIVERABLE_CLOSE)?;
    Some(rest[..end].trim().to_string())
}

/// Validate an extracted deliverable: non-empty or the explicit sentinel,
/// and free of internal-process markers.
pub fn validate(extracted: &str) -> Result<Deliverable> {
    let trimmed = extracted.trim();
    if trimmed == NO_DELIVERABLE {
        return Ok(Deliverable::None);
    }
    if trimmed.is_empty() {
        return Err(OpsPilotError::Validation("deliverable is empty".into()));
    }
    let lower = trimmed.to_lowercase();
    for marker in INTERNAL_MARKERS {
        if lower.contains(&marker.to_lowercase()) {
            return Err(OpsPilotError::Validation(format!(
                "deliverable contains internal marker '{marker}'"
            )));
        }
    }
    Ok(Deliverable::Content(trimmed.to_string()))
}

/// Extract and validate in one step.
pub fn extract_and_validate(response: &str) -> Result<Deliverable> {
    let extracted = extract(response).ok_or_else(|| {
        OpsPilotError::Validation("no parseable deliverable delimiter in response".into())
    })?;
    validate(&extracted)
}

//! Extraction output parsing
//!
//! The extraction model is asked for a bare JSON array, but real replies come
//! back wrapped in code fences or surrounded by prose. The parser salvages
//! the array before handing it to serde.

use crate::error::CompanionError;
use crate::models::FactCandidate;
use crate::Result;

/// Parse the model's reply into fact candidates.
///
/// Accepts a bare JSON array, a ``` or ```json fenced block, or an array
/// embedded in surrounding prose (first `[` to last `]`).
pub fn parse_candidates(raw: &str) -> Result<Vec<FactCandidate>> {
    let json_str = extract_json_array(raw).ok_or_else(|| {
        CompanionError::MalformedExtraction(format!(
            "no JSON array in model output: {}",
            preview(raw)
        ))
    })?;

    serde_json::from_str(json_str).map_err(|e| {
        CompanionError::MalformedExtraction(format!("{} in: {}", e, preview(json_str)))
    })
}

fn extract_json_array(raw: &str) -> Option<&str> {
    let body = if let Some(after_fence) = raw.split("```json").nth(1) {
        after_fence.split("```").next().unwrap_or(after_fence)
    } else if let Some(after_fence) = raw.split("```").nth(1) {
        after_fence
    } else {
        raw
    };

    let start = body.find('[')?;
    let end = body.rfind(']')?;
    if end < start {
        return None;
    }
    Some(&body[start..=end])
}

fn preview(s: &str) -> &str {
    let end = s
        .char_indices()
        .take(120)
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    &s[..end]
}

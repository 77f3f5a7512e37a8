//! Line-level parsing for fitlog files
//!
//! Every line is classified into an explicit [`ParsedLine`] so that callers
//! decide whether a corrupt line is skipped or fatal.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::merge::Snapshot;

/// Prefix of step-tagged event lines (`Step:<n>\t{json}`).
pub const STEP_MARKER: &str = "Step:";

/// Classification of one non-stepped log line.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedLine {
    /// Empty or whitespace-only
    Blank,
    /// Step-tagged event line, reserved for the step watcher
    Step,
    /// JSON object carrying a partial update
    Update(Snapshot),
    /// Anything else; the message says why
    Malformed(String),
}

/// Classify a line from `meta.log`, `hyper.log`, `metric.log` or `other.log`.
#[must_use]
pub fn parse_update_line(line: &str) -> ParsedLine {
    if line.starts_with(STEP_MARKER) {
        return ParsedLine::Step;
    }
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return ParsedLine::Blank;
    }
    match parse_object(trimmed) {
        Ok(map) => ParsedLine::Update(map),
        Err(reason) => ParsedLine::Malformed(reason),
    }
}

/// One step-indexed measurement from `loss.log` or `metric.log`.
///
/// The `fields` mapping is the full payload, `step` included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepEntry {
    step: i64,
    fields: Snapshot,
}

impl StepEntry {
    /// Build an entry from a decoded payload.
    ///
    /// # Errors
    ///
    /// Returns the reason when `fields` has no integer `step`.
    pub fn from_fields(fields: Snapshot) -> std::result::Result<Self, String> {
        let step = fields
            .get("step")
            .and_then(Value::as_i64)
            .ok_or_else(|| "step payload has no integer `step` field".to_string())?;
        Ok(Self { step, fields })
    }

    /// Step index.
    #[must_use]
    pub const fn step(&self) -> i64 {
        self.step
    }

    /// Full payload.
    #[must_use]
    pub const fn fields(&self) -> &Snapshot {
        &self.fields
    }

    /// Look up one payload field.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    /// Consume the entry, returning the payload.
    #[must_use]
    pub fn into_fields(self) -> Snapshot {
        self.fields
    }
}

/// Parse a step-tagged line.
///
/// Returns `None` for lines without the step marker. The payload is whatever
/// follows the first tab.
#[must_use]
pub fn parse_step_line(line: &str) -> Option<std::result::Result<StepEntry, String>> {
    if !line.starts_with(STEP_MARKER) {
        return None;
    }
    let parsed = line
        .split_once('\t')
        .ok_or_else(|| "step line has no tab-separated payload".to_string())
        .and_then(|(_, payload)| parse_object(payload.trim()))
        .and_then(StepEntry::from_fields);
    Some(parsed)
}

fn parse_object(text: &str) -> std::result::Result<Snapshot, String> {
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(format!("expected a JSON object, found `{other}`")),
        Err(e) => Err(e.to_string()),
    }
}

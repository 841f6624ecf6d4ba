//! Review verdict extraction
//!
//! A reviewer may hand back an already-parsed verdict or free text with a
//! JSON object somewhere inside it. [`extract`] reduces both to an
//! [`Assessment`], and never fails: anything unreadable is a rejection.

use serde_json::Value;

use crate::agents::AgentOutput;

pub const PARSE_FAILED_FEEDBACK: &str = "Review parsing failed";
pub const DEFAULT_REJECTION: &str = "Research did not meet quality standards";

/// What the evaluation stage produced
#[derive(Debug, Clone, PartialEq)]
pub enum Verdict {
    Structured {
        valid: bool,
        feedback: Option<String>,
    },
    Unparsed(String),
}

impl Verdict {
    /// Classify an agent output. A payload counts as structured only when it
    /// carries a boolean `valid`.
    pub fn from_output(output: AgentOutput) -> Self {
        if let Some(Value::Object(map)) = &output.structured {
            if let Some(valid) = map.get("valid").and_then(Value::as_bool) {
                let feedback = map
                    .get("feedback")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                return Self::Structured { valid, feedback };
            }
        }
        Self::Unparsed(output.raw)
    }
}

/// Canonical verdict
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Assessment {
    pub valid: bool,
    pub feedback: Option<String>,
}

impl Assessment {
    fn rejected(feedback: impl Into<String>) -> Self {
        Self {
            valid: false,
            feedback: Some(feedback.into()),
        }
    }
}

pub fn extract(verdict: &Verdict) -> Assessment {
    match verdict {
        Verdict::Structured { valid, feedback } => Assessment {
            valid: *valid,
            feedback: if *valid { None } else { feedback.clone() },
        },
        Verdict::Unparsed(raw) => {
            extract_from_text(raw).unwrap_or_else(|| Assessment::rejected(PARSE_FAILED_FEEDBACK))
        }
    }
}

fn extract_from_text(raw: &str) -> Option<Assessment> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }

    let data: Value = serde_json::from_str(&raw[start..=end]).ok()?;
    let map = data.as_object()?;

    let valid = map
        .get("approved")
        .or_else(|| map.get("valid"))
        .and_then(Value::as_bool)
        .unwrap_or(false);

    if valid {
        return Some(Assessment {
            valid,
            feedback: None,
        });
    }

    let reasons: Vec<String> = map
        .get("rejection_reasons")
        .and_then(Value::as_array)
        .map(|items| items.iter().map(reason_text).collect())
        .unwrap_or_default();

    let feedback = if !reasons.is_empty() {
        reasons
            .iter()
            .map(|r| format!("- {}", r))
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        map.get("feedback")
            .or_else(|| map.get("summary"))
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_REJECTION)
            .to_string()
    };

    Some(Assessment::rejected(feedback))
}

fn reason_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

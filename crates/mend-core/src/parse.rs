//! Multi-strategy decoding of model output into a typed analysis.
//!
//! Strict JSON parse first, then a lenient pass (code fences stripped,
//! trailing commas removed, first balanced object extracted), then
//! field-by-field regex extraction. `error_type` is never guessed: a missing
//! or out-of-enum value fails the parse.

use crate::error::ClassifyError;
use crate::types::{Effort, ErrorType};
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

#[derive(Debug, Clone, PartialEq)]
pub struct ParsedAnalysis {
    pub error_type: ErrorType,
    pub category: String,
    pub risk_score: u8,
    pub confidence: u8,
    pub effort: Effort,
    pub proposed_fix: String,
    pub reasoning: String,
    pub affected_components: Vec<String>,
    pub files_to_modify: Vec<String>,
    pub fix_commands: Vec<String>,
}

pub fn parse_analysis(response: &str) -> Result<ParsedAnalysis, ClassifyError> {
    if let Ok(value) = serde_json::from_str::<Value>(response.trim()) {
        if value.is_object() {
            return finalize(&value);
        }
    }

    if let Some(value) = lenient_parse(response) {
        return finalize(&value);
    }

    if let Some(value) = field_extract(response) {
        return finalize(&value);
    }

    Err(ClassifyError::ParseMalformed {
        message: format!(
            "no parse strategy produced an object (head: {})",
            head(response, 120)
        ),
    })
}

/// Strip markdown fences and trailing commas, then parse the first balanced
/// `{...}` block.
fn lenient_parse(response: &str) -> Option<Value> {
    let defenced = strip_code_fences(response);
    let block = balanced_object(&defenced)?;
    let cleaned = strip_trailing_commas(block);
    serde_json::from_str::<Value>(&cleaned)
        .ok()
        .filter(Value::is_object)
}

pub(crate) fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the language tag line, then the closing fence.
    let body = match rest.split_once('\n') {
        Some((_, body)) => body,
        None => rest,
    };
    body.trim_end()
        .strip_suffix("```")
        .unwrap_or(body)
        .trim()
        .to_string()
}

fn balanced_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

fn strip_trailing_commas(text: &str) -> String {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r",\s*([}\]])").expect("static pattern"));
    re.replace_all(text, "$1").into_owned()
}

/// Last resort: pull individual fields out of free text.
fn field_extract(response: &str) -> Option<Value> {
    let string_field = |name: &str| -> Option<String> {
        let re = Regex::new(&format!(r#""{name}"\s*:\s*"((?:[^"\\]|\\.)*)""#)).ok()?;
        re.captures(response)
            .map(|c| c[1].replace("\\\"", "\"").replace("\\n", "\n"))
    };
    let number_field = |name: &str| -> Option<i64> {
        let re = Regex::new(&format!(r#""{name}"\s*:\s*(\d+)"#)).ok()?;
        re.captures(response).and_then(|c| c[1].parse().ok())
    };
    let array_field = |name: &str| -> Vec<String> {
        let Ok(re) = Regex::new(&format!(r#""{name}"\s*:\s*\[([^\]]*)\]"#)) else {
            return Vec::new();
        };
        let Some(captures) = re.captures(response) else {
            return Vec::new();
        };
        captures[1]
            .split(',')
            .map(|item| item.trim().trim_matches('"').to_string())
            .filter(|item| !item.is_empty())
            .collect()
    };

    let error_type = string_field("error_type")?;
    let mut object = serde_json::Map::new();
    object.insert("error_type".to_string(), Value::String(error_type));
    for name in ["category", "proposed_fix", "effort_estimate", "reasoning"] {
        if let Some(value) = string_field(name) {
            object.insert(name.to_string(), Value::String(value));
        }
    }
    for name in ["risk_score", "confidence"] {
        if let Some(value) = number_field(name) {
            object.insert(name.to_string(), Value::Number(value.into()));
        }
    }
    for name in ["affected_components", "files_to_modify", "fix_commands"] {
        let items = array_field(name);
        object.insert(
            name.to_string(),
            Value::Array(items.into_iter().map(Value::String).collect()),
        );
    }
    Some(Value::Object(object))
}

fn finalize(value: &Value) -> Result<ParsedAnalysis, ClassifyError> {
    let error_type = match value.get("error_type").and_then(Value::as_str) {
        Some(raw) => match raw.to_lowercase().as_str() {
            "devops" => ErrorType::Devops,
            "developer" => ErrorType::Developer,
            other => {
                return Err(ClassifyError::ParseMalformed {
                    message: format!("error_type outside enum: {other}"),
                })
            }
        },
        None => {
            return Err(ClassifyError::ParseMalformed {
                message: "error_type missing".to_string(),
            })
        }
    };

    let effort = match value
        .get("effort_estimate")
        .and_then(Value::as_str)
        .map(str::to_lowercase)
        .as_deref()
    {
        Some("low") => Effort::Low,
        Some("high") => Effort::High,
        _ => Effort::Medium,
    };

    let category = value
        .get("category")
        .and_then(Value::as_str)
        .unwrap_or("infrastructure")
        .to_lowercase();

    Ok(ParsedAnalysis {
        error_type,
        category,
        risk_score: clamped_int(value.get("risk_score"), 5, 10),
        confidence: clamped_int(value.get("confidence"), 50, 100),
        effort,
        proposed_fix: string_or_empty(value.get("proposed_fix")),
        reasoning: string_or_empty(value.get("reasoning")),
        affected_components: string_list(value.get("affected_components")),
        files_to_modify: string_list(value.get("files_to_modify")),
        fix_commands: string_list(value.get("fix_commands")),
    })
}

fn clamped_int(value: Option<&Value>, default: u8, max: u8) -> u8 {
    let raw = match value {
        Some(Value::Number(n)) => n.as_i64().unwrap_or(default as i64),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(default as i64),
        _ => default as i64,
    };
    raw.clamp(0, max as i64) as u8
}

fn string_or_empty(value: Option<&Value>) -> String {
    value.and_then(Value::as_str).unwrap_or("").to_string()
}

fn string_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    }
}

fn head(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

//! Extracts fenced tool-call blocks from free-form model text.
//!
//! Wire format:
//!
//! ````text
//! ```tool_call
//! {"name": "create_boat", "arguments": {"name": "Saltwhistle"}}
//! ```
//! ````
//!
//! `tool-call` and `toolcall` tags are accepted too, as are `json` fences
//! whose payload has the call shape. A fence left open at the end of the
//! text runs to the end. Blocks that do not decode are dropped and counted;
//! parsing never fails.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::normalize::decode_nested;
use super::types::ToolCall;

static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)```[ \t]*(tool[_-]?call|json)[ \t]*\r?\n?(.*?)(?:```|\z)").unwrap()
});

static CALL_LIKE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?is)```[ \t]*tool[_-]?call|</?tool[_-]?call>|"name"\s*:\s*"[a-z_]+"\s*,\s*"(?:arguments|args|parameters)""#,
    )
    .unwrap()
});

static BLANK_RUN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Result of scanning one model response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedResponse {
    /// Prose with every recognized block removed.
    pub content: String,
    pub tool_calls: Vec<ToolCall>,
    /// Tool-call fences whose payload could not be decoded.
    pub dropped_blocks: usize,
}

impl ParsedResponse {
    pub fn has_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

/// Split model text into prose and tool calls.
pub fn parse_tool_calls(text: &str) -> ParsedResponse {
    let mut parsed = ParsedResponse::default();
    let mut prose = String::with_capacity(text.len());
    let mut last_end = 0;

    for cap in FENCE_RE.captures_iter(text) {
        let (Some(whole), Some(tag), Some(body)) = (cap.get(0), cap.get(1), cap.get(2)) else {
            continue;
        };
        let is_json_fence = tag.as_str().eq_ignore_ascii_case("json");

        match decode_block(body.as_str()) {
            Some(calls) => {
                prose.push_str(&text[last_end..whole.start()]);
                parsed.tool_calls.extend(calls);
            }
            // A plain json fence that is not a call stays in the prose.
            None if is_json_fence => {
                prose.push_str(&text[last_end..whole.end()]);
            }
            None => {
                tracing::warn!(
                    body_len = body.as_str().len(),
                    "Dropped undecodable tool_call block"
                );
                prose.push_str(&text[last_end..whole.start()]);
                parsed.dropped_blocks += 1;
            }
        }
        last_end = whole.end();
    }
    prose.push_str(&text[last_end..]);

    parsed.content = BLANK_RUN_RE
        .replace_all(prose.trim(), "\n\n")
        .into_owned();
    parsed
}

/// Whether the text contains something that looks like an attempted call.
pub fn looks_like_tool_call(text: &str) -> bool {
    CALL_LIKE_RE.is_match(text)
}

/// Decode a fence body into one or more calls. `None` when nothing in it
/// has the call shape.
fn decode_block(body: &str) -> Option<Vec<ToolCall>> {
    let value = parse_json_lenient(body)?;
    let calls: Vec<ToolCall> = match value {
        Value::Array(items) => items.iter().filter_map(call_from_value).collect(),
        other => call_from_value(&other).into_iter().collect(),
    };
    (!calls.is_empty()).then_some(calls)
}

/// Parse the body as JSON, falling back to the outermost `{...}` span when
/// the model wrapped it in stray text.
fn parse_json_lenient(body: &str) -> Option<Value> {
    let trimmed = body.trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Some(decode_nested(&value));
    }
    let start = trimmed.find('{')?;
    let end = trimmed.rfind('}')?;
    if end <= start {
        return None;
    }
    serde_json::from_str::<Value>(&trimmed[start..=end])
        .ok()
        .map(|v| decode_nested(&v))
}

fn call_from_value(value: &Value) -> Option<ToolCall> {
    let obj = value.as_object()?;
    // OpenAI-style {"function": {"name", "arguments"}} wrapper.
    if let Some(function) = obj.get("function").filter(|f| f.is_object()) {
        return call_from_value(function);
    }
    let name = obj
        .get("name")
        .or_else(|| obj.get("tool"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|n| !n.is_empty())?;
    let arguments = ["arguments", "args", "parameters", "input"]
        .iter()
        .find_map(|k| obj.get(*k))
        .map(decode_nested)
        .unwrap_or_else(|| Value::Object(serde_json::Map::new()));
    if !arguments.is_object() {
        return None;
    }
    Some(ToolCall::new(name, arguments))
}

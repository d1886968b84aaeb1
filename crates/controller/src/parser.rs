//! Parsing of reasoning-service responses.
//!
//! Model output is often almost-JSON: wrapped in markdown fences, preceded by
//! prose, carrying trailing commas or Python literals. [`repair_json`] fixes
//! what it can before the strict parse.

use serde_json::{Map, Value};

use cowork_core::{
    types::{AgentAction, Decision},
    Error, Result,
};

/// Parse a response as JSON, repairing it first if the direct parse fails.
pub fn parse_lenient(raw: &str) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(raw.trim()) {
        return Some(value);
    }
    let repaired = repair_json(raw)?;
    serde_json::from_str(&repaired).ok()
}

/// Best-effort repair of almost-JSON text.
///
/// Returns `None` when no object can be found.
pub fn repair_json(raw: &str) -> Option<String> {
    let body = strip_fences(raw);
    let object = first_object(body)?;
    Some(normalize(&object))
}

/// Content of the first fenced block, or the whole text.
fn strip_fences(raw: &str) -> &str {
    let Some(start) = raw.find("```") else {
        return raw;
    };
    let after = &raw[start + 3..];
    // Skip a language tag such as ```json
    let after = match after.find('\n') {
        Some(nl) if after[..nl].trim().chars().all(|c| c.is_ascii_alphanumeric()) => &after[nl + 1..],
        _ => after,
    };
    match after.find("```") {
        Some(end) => &after[..end],
        None => after,
    }
}

/// The first balanced `{...}`, closing any braces left open.
fn first_object(text: &str) -> Option<String> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for (i, c) in text[start..].char_indices() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '"' | '\'' => quote = Some(c),
            '{' | '[' => depth += 1,
            '}' | ']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(text[start..start + i + 1].to_string());
                }
            }
            _ => {}
        }
    }

    // Truncated response
    let mut out = text[start..].trim_end().to_string();
    out.extend(std::iter::repeat('}').take(depth));
    Some(out)
}

/// Escape control characters inside strings, convert single quotes,
/// drop trailing commas and map Python literals.
fn normalize(text: &str) -> String {
    let chars: Vec<char> = text.chars().collect();
    let mut out = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if let Some(q) = quote {
            match c {
                '\\' if i + 1 < chars.len() => {
                    let next = chars[i + 1];
                    if q == '\'' && next == '\'' {
                        out.push('\'');
                    } else {
                        out.push('\\');
                        out.push(next);
                    }
                    i += 2;
                    continue;
                }
                '\n' => out.push_str("\\n"),
                '\r' => out.push_str("\\r"),
                '\t' => out.push_str("\\t"),
                '"' if q == '\'' => out.push_str("\\\""),
                c if c == q => {
                    out.push('"');
                    quote = None;
                }
                c => out.push(c),
            }
            i += 1;
            continue;
        }

        match c {
            '"' | '\'' => {
                quote = Some(c);
                out.push('"');
            }
            ',' => {
                let next = chars[i + 1..].iter().find(|c| !c.is_whitespace());
                if !matches!(next, Some('}') | Some(']')) {
                    out.push(',');
                }
            }
            c if c.is_ascii_alphabetic() => {
                let end = chars[i..]
                    .iter()
                    .position(|c| !c.is_ascii_alphanumeric() && *c != '_')
                    .map_or(chars.len(), |p| i + p);
                let word: String = chars[i..end].iter().collect();
                out.push_str(match word.as_str() {
                    "True" => "true",
                    "False" => "false",
                    "None" => "null",
                    other => other,
                });
                i = end;
                continue;
            }
            c => out.push(c),
        }
        i += 1;
    }
    out
}

/// Parser for next-step decisions.
///
/// Accepted shape:
/// `{"thought": .., "is_complete": bool, "response": .., "action": {"tool": .., "args": {..}, "description": ..}}`.
/// `done` is accepted in place of `is_complete`.
#[derive(Debug, Default, Clone, Copy)]
pub struct DecisionParser;

impl DecisionParser {
    pub fn new() -> Self {
        Self
    }

    /// Parse a raw response into a decision.
    pub fn parse(&self, raw: &str) -> Result<Decision> {
        let value = parse_lenient(raw)
            .ok_or_else(|| Error::decision(format!("not valid JSON: {}", preview(raw))))?;
        let Value::Object(obj) = value else {
            return Err(Error::decision("expected a JSON object"));
        };

        let thought = obj
            .get("thought")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let complete = obj
            .get("is_complete")
            .or_else(|| obj.get("done"))
            .map(truthy)
            .unwrap_or(false);

        if complete {
            let answer = obj
                .get("response")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| thought.clone());
            return Ok(Decision::Complete { thought, answer });
        }

        let action = match obj.get("action") {
            Some(Value::Object(action)) => parse_action(action)?,
            Some(Value::Null) | None => {
                return Err(Error::decision("no action and not complete"));
            }
            Some(_) => return Err(Error::decision("'action' must be an object")),
        };
        Ok(Decision::Invoke { thought, action })
    }
}

fn parse_action(obj: &Map<String, Value>) -> Result<AgentAction> {
    let tool = obj
        .get("tool")
        .or_else(|| obj.get("name"))
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or_else(|| Error::decision("action has no tool"))?;

    let args = match obj.get("args") {
        Some(Value::Object(args)) => args.clone(),
        Some(Value::Null) | None => Map::new(),
        Some(_) => return Err(Error::decision("action args must be an object")),
    };

    Ok(AgentAction {
        tool: tool.to_string(),
        args,
        description: obj
            .get("description")
            .and_then(Value::as_str)
            .map(str::to_string),
    })
}

fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.eq_ignore_ascii_case("true"),
        _ => false,
    }
}

fn preview(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.char_indices().nth(120) {
        Some((idx, _)) => format!("{}...", &trimmed[..idx]),
        None => trimmed.to_string(),
    }
}

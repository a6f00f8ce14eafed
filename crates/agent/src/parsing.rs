//! Decoding oracle output into exactly one action.
//!
//! Two shapes are understood: native function calls, and ReAct-formatted
//! text:
//!
//! ```text
//! Thought: I should look up the issuer first
//! Action: search_issuer
//! Action Input: {"name": "Apple"}
//! ```
//!
//! or `Final Answer: ...`. Prose with no markers at all is taken as the
//! answer. Anything else is unparseable and handed back to the loop.

use refdesk_core::OracleOutput;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

/// Action name that some oracles use instead of a `Final Answer:` line.
const FINAL_ANSWER_ACTION: &str = "final_answer";

/// What one oracle output asks the loop to do.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedAction {
    ToolCall {
        thought: String,
        tool_name: String,
        arguments: Value,
    },
    FinalAnswer {
        thought: String,
        text: String,
    },
    Unparseable {
        thought: String,
        raw: String,
        reason: String,
    },
}

impl ParsedAction {
    pub fn thought(&self) -> &str {
        match self {
            Self::ToolCall { thought, .. }
            | Self::FinalAnswer { thought, .. }
            | Self::Unparseable { thought, .. } => thought,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Thought,
    Action,
    ActionInput,
    Observation,
    FinalAnswer,
}

static MARKER_RE: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"(?i)^\s*(thought|action\s*input|action|observation|final\s*answer)\s*:\s*(.*)$").ok()
});

pub fn parse_output(output: &OracleOutput) -> ParsedAction {
    let content = output.content.trim();

    match output.tool_calls.as_slice() {
        [] => parse_text(content),
        [call] => {
            let arguments = if call.arguments.trim().is_empty() {
                Ok(Value::Object(Default::default()))
            } else {
                serde_json::from_str::<Value>(&call.arguments)
            };
            match arguments {
                Ok(arguments) if arguments.is_object() => ParsedAction::ToolCall {
                    thought: content.to_string(),
                    tool_name: call.name.clone(),
                    arguments,
                },
                Ok(_) => unparseable(
                    content,
                    &call.arguments,
                    format!("arguments for {} must be a JSON object", call.name),
                ),
                Err(e) => unparseable(
                    content,
                    &call.arguments,
                    format!("arguments for {} are not valid JSON: {e}", call.name),
                ),
            }
        }
        calls => unparseable(
            content,
            &calls
                .iter()
                .map(|c| format!("{}({})", c.name, c.arguments))
                .collect::<Vec<_>>()
                .join(", "),
            format!("expected exactly one tool call, got {}", calls.len()),
        ),
    }
}

fn unparseable(thought: &str, raw: &str, reason: String) -> ParsedAction {
    ParsedAction::Unparseable {
        thought: thought.to_string(),
        raw: raw.to_string(),
        reason,
    }
}

/// Split ReAct text into marked sections. Stops at the first `Observation:`,
/// which the oracle must never write itself.
fn sections(text: &str) -> Vec<(Marker, String)> {
    let Some(re) = MARKER_RE.as_ref() else {
        return Vec::new();
    };

    let mut out: Vec<(Marker, String)> = Vec::new();
    for line in text.lines() {
        if let Some(caps) = re.captures(line) {
            let label = caps
                .get(1)
                .map(|m| m.as_str().to_lowercase())
                .unwrap_or_default();
            let marker = if label.starts_with("thought") {
                Marker::Thought
            } else if label.contains("input") {
                Marker::ActionInput
            } else if label.starts_with("action") {
                Marker::Action
            } else if label.starts_with("observation") {
                Marker::Observation
            } else {
                Marker::FinalAnswer
            };
            if marker == Marker::Observation {
                break;
            }
            let rest = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
            out.push((marker, rest.to_string()));
        } else if let Some((_, body)) = out.last_mut() {
            body.push('\n');
            body.push_str(line);
        }
    }

    for (_, body) in &mut out {
        *body = body.trim().to_string();
    }
    out
}

fn parse_text(content: &str) -> ParsedAction {
    if content.is_empty() {
        return unparseable("", "", "empty output".into());
    }

    let sections = sections(content);
    if sections.is_empty() {
        return ParsedAction::FinalAnswer {
            thought: String::new(),
            text: content.to_string(),
        };
    }

    let find = |marker: Marker| {
        sections
            .iter()
            .find(|(m, _)| *m == marker)
            .map(|(_, body)| body.as_str())
    };
    let thought = sections
        .iter()
        .filter(|(m, _)| *m == Marker::Thought)
        .map(|(_, body)| body.as_str())
        .collect::<Vec<_>>()
        .join("\n");

    if let Some(answer) = find(Marker::FinalAnswer) {
        if answer.is_empty() {
            return unparseable(&thought, content, "empty final answer".into());
        }
        return ParsedAction::FinalAnswer {
            thought,
            text: answer.to_string(),
        };
    }

    let Some(action) = find(Marker::Action) else {
        return unparseable(&thought, content, "no Action or Final Answer after Thought".into());
    };
    let tool_name = action.trim_matches(|c: char| c == '`' || c == '"' || c == '\'' || c.is_whitespace());
    let input = find(Marker::ActionInput).map(strip_code_fence);

    if tool_name.eq_ignore_ascii_case(FINAL_ANSWER_ACTION) {
        return match input {
            Some(text) if !text.is_empty() => ParsedAction::FinalAnswer {
                thought,
                text: text.to_string(),
            },
            _ => unparseable(&thought, content, "final_answer action without text".into()),
        };
    }

    if tool_name.is_empty() {
        return unparseable(&thought, content, "Action names no tool".into());
    }

    let Some(input) = input else {
        return unparseable(&thought, content, format!("Action {tool_name} has no Action Input"));
    };
    match serde_json::from_str::<Value>(input) {
        Ok(arguments) if arguments.is_object() => ParsedAction::ToolCall {
            thought,
            tool_name: tool_name.to_string(),
            arguments,
        },
        _ => unparseable(
            &thought,
            content,
            format!("Action Input for {tool_name} is not a JSON object"),
        ),
    }
}

fn strip_code_fence(body: &str) -> &str {
    let trimmed = body.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}

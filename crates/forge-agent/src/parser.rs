//! Turns one raw model reply into a [`ParsedReply`].
//!
//! Resolution order: garble check, sanitize, ACTION marker, the legacy
//! channel token, an `action`/`tool` field inside the JSON, and finally an
//! implicit finish carrying the reply text. A reply that never resolves to
//! a runnable action becomes [`Action::ChainError`] with the reason in
//! [`ParsedReply::error`].

use crate::extract::{Extracted, candidate_span, extract_params};
use crate::garble::is_garbled;
use crate::mode::Mode;
use crate::sanitize::sanitize;
use forge_core::ToolName;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

pub const ORPHAN_CODE_BLOCK_ERROR: &str = "You output a markdown code block but DID NOT use a tool (write_file/replace_in_file). STRICTLY use tools to modify the filesystem. Never just output code in text.";
pub const GARBLED_ERROR: &str =
    "Your reply fused the ACTION and PARAMETERS markers together and could not be read.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Tool(ToolName),
    Finish,
    ChainError,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedReply {
    /// `None` only for an empty reply.
    pub action: Option<Action>,
    pub parameters: Map<String, Value>,
    pub response: Option<String>,
    pub thought: Option<String>,
    pub error: Option<String>,
    pub is_garbled: bool,
    /// Parameters were salvaged field by field.
    pub partial: bool,
}

impl ParsedReply {
    fn chain_error(message: impl Into<String>) -> Self {
        Self {
            action: Some(Action::ChainError),
            error: Some(message.into()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Marker {
    Thought,
    Action,
    Parameters,
}

struct Segment<'a> {
    marker: Marker,
    /// Byte offset of the marker in the sanitized text.
    start: usize,
    /// Marker plus body length.
    len: usize,
    body: &'a str,
}

fn marker_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(THOUGHT|ACTION|PARAMETERS):[ \t]*").expect("valid marker regex"))
}

fn action_name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[`'\x22*]*([A-Za-z_][A-Za-z0-9_]*)").expect("valid action regex"))
}

fn channel_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)<\|channel\|>\s*(\w+)(?:\s+to=([\w:]+))?").expect("valid channel regex")
    })
}

/// Splits sanitized text at line-initial markers. Every segment body runs up
/// to the next marker.
fn segments(text: &str) -> Vec<Segment<'_>> {
    let found = marker_re()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let marker = match caps.get(1)?.as_str() {
                "THOUGHT" => Marker::Thought,
                "ACTION" => Marker::Action,
                _ => Marker::Parameters,
            };
            Some((marker, whole.start(), whole.end()))
        })
        .collect::<Vec<_>>();
    found
        .iter()
        .enumerate()
        .map(|(i, &(marker, start, body_start))| {
            let end = found.get(i + 1).map_or(text.len(), |next| next.1);
            Segment {
                marker,
                start,
                len: end - start,
                body: &text[body_start..end],
            }
        })
        .collect()
}

/// The text handed to the JSON extractor: from the first PARAMETERS marker
/// whose body opens an object (optionally inside a ```json fence), or the
/// whole reply.
fn parameter_scope<'a>(text: &'a str, segs: &[Segment<'a>]) -> &'a str {
    segs.iter()
        .filter(|seg| seg.marker == Marker::Parameters)
        .find(|seg| {
            let body = seg.body.trim_start();
            let body = body
                .strip_prefix("```json")
                .or_else(|| body.strip_prefix("```"))
                .unwrap_or(body);
            body.trim_start().starts_with('{')
        })
        .map_or(text, |seg| &text[seg.start..])
}

fn resolve_name(name: &str, mode: &Mode) -> Result<Action, String> {
    let lower = name.trim().to_ascii_lowercase();
    if lower == "finish" || lower == "final" {
        return Ok(Action::Finish);
    }
    match ToolName::from_api_name(&lower) {
        Some(tool) if mode.accepts(tool) => Ok(Action::Tool(tool)),
        _ => Err(lower),
    }
}

fn unknown_action_error(name: &str, mode: &Mode) -> String {
    let mut allowed = mode
        .tools()
        .iter()
        .map(|tool| tool.as_api_name())
        .collect::<Vec<_>>();
    allowed.push("finish");
    let closest = allowed
        .iter()
        .map(|candidate| (strsim::jaro_winkler(name, candidate), *candidate))
        .filter(|(score, _)| *score > 0.8)
        .max_by(|a, b| a.0.total_cmp(&b.0));
    let hint = closest
        .map(|(_, candidate)| format!(" Did you mean \"{candidate}\"?"))
        .unwrap_or_default();
    format!(
        "Unknown or unavailable action \"{name}\".{hint} Available actions: {}.",
        allowed.join(", ")
    )
}

fn json_text(params: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    keys.iter()
        .find_map(|key| params.get(*key).and_then(Value::as_str))
        .map(str::to_string)
}

/// Reply text with the ACTION / PARAMETERS / THOUGHT spans removed.
fn strip_markers(text: &str, segs: &[Segment<'_>]) -> String {
    let mut out = String::with_capacity(text.len());
    let mut cursor = 0;
    for seg in segs {
        out.push_str(&text[cursor..seg.start]);
        cursor = seg.start + seg.len;
        match seg.marker {
            Marker::Thought => {}
            // Whatever follows the action name on later lines is prose.
            Marker::Action => {
                out.push_str(seg.body.split_once('\n').map_or("", |(_, rest)| rest));
            }
            Marker::Parameters => {
                let rest = match candidate_span(seg.body) {
                    Some(span) => {
                        let offset = seg.body.find(span).unwrap_or(0);
                        &seg.body[offset + span.len()..]
                    }
                    None => seg.body,
                };
                out.push_str(rest.trim_start_matches('`'));
            }
        }
    }
    collapse_newlines(out.trim())
}

fn collapse_newlines(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut newlines = 0;
    for c in text.chars() {
        if c == '\n' {
            newlines += 1;
            if newlines > 2 {
                continue;
            }
        } else {
            newlines = 0;
        }
        out.push(c);
    }
    out
}

pub fn parse_reply(raw: &str, mode: &Mode) -> ParsedReply {
    if is_garbled(raw) {
        return ParsedReply {
            is_garbled: true,
            ..ParsedReply::chain_error(GARBLED_ERROR)
        };
    }

    let text = sanitize(raw);
    if text.trim().is_empty() {
        return ParsedReply::default();
    }
    let segs = segments(&text);

    let marker_thought = segs
        .iter()
        .find(|seg| seg.marker == Marker::Thought)
        .map(|seg| seg.body.trim().to_string())
        .filter(|t| !t.is_empty());
    let has_action_marker = segs.iter().any(|seg| seg.marker == Marker::Action);
    let marker_name = segs
        .iter()
        .filter(|seg| seg.marker == Marker::Action)
        .find_map(|seg| action_name_re().captures(seg.body.trim_start()))
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string());

    let extracted = extract_params(parameter_scope(&text, &segs));
    let (params, partial) = match extracted {
        Some(Extracted { params, partial }) => (Some(params), partial),
        None => (None, false),
    };

    let mut rejected: Option<String> = None;
    let mut action = None;
    let mut params_from_json_action = None;

    if let Some(name) = &marker_name {
        match resolve_name(name, mode) {
            Ok(found) => action = Some(found),
            Err(bad) => rejected = Some(bad),
        }
    }

    if action.is_none()
        && let Some(caps) = channel_re().captures(&text)
    {
        let token = caps.get(1).map_or("", |m| m.as_str());
        let target = caps
            .get(2)
            .map(|m| m.as_str().trim_start_matches("tool:").to_string());
        let by_target = target.as_deref().and_then(|t| resolve_name(t, mode).ok());
        action = if token.eq_ignore_ascii_case("final") {
            Some(Action::Finish)
        } else {
            by_target.or_else(|| resolve_name(token, mode).ok())
        };
    }

    if action.is_none()
        && let Some(map) = &params
    {
        if let Some(name) = json_text(map, &["action", "tool"]) {
            match resolve_name(&name, mode) {
                Ok(found) => {
                    action = Some(found);
                    params_from_json_action = ["parameters", "params"]
                        .iter()
                        .find_map(|key| map.get(*key).and_then(Value::as_object).cloned());
                }
                Err(bad) => {
                    rejected.get_or_insert(bad);
                }
            }
        }
    }

    let thought = if mode.fast {
        None
    } else {
        marker_thought.or_else(|| params.as_ref().and_then(|m| json_text(m, &["thought"])))
    };

    let Some(action) = action else {
        if let Some(bad) = rejected {
            return ParsedReply {
                thought,
                ..ParsedReply::chain_error(unknown_action_error(&bad, mode))
            };
        }
        if text.contains("```") && !has_action_marker && !mode.is_review() {
            return ParsedReply {
                thought,
                ..ParsedReply::chain_error(ORPHAN_CODE_BLOCK_ERROR)
            };
        }
        let response = params
            .as_ref()
            .and_then(|m| json_text(m, &["response", "message"]))
            .unwrap_or_else(|| text.trim().to_string());
        return ParsedReply {
            action: Some(Action::Finish),
            parameters: params.unwrap_or_default(),
            response: Some(response),
            thought,
            partial,
            ..ParsedReply::default()
        };
    };

    match action {
        Action::Finish => {
            let response = params
                .as_ref()
                .and_then(|m| json_text(m, &["response", "message"]))
                .unwrap_or_else(|| {
                    let stripped = strip_markers(&text, &segs);
                    if stripped.is_empty() {
                        text.trim().to_string()
                    } else {
                        stripped
                    }
                });
            ParsedReply {
                action: Some(Action::Finish),
                parameters: params.unwrap_or_default(),
                response: Some(response),
                thought,
                partial,
                ..ParsedReply::default()
            }
        }
        Action::Tool(tool) => {
            let parameters = params_from_json_action.or(params);
            match parameters {
                Some(parameters) => ParsedReply {
                    action: Some(Action::Tool(tool)),
                    parameters,
                    thought,
                    partial,
                    ..ParsedReply::default()
                },
                None if tool.params_optional() => ParsedReply {
                    action: Some(Action::Tool(tool)),
                    thought,
                    ..ParsedReply::default()
                },
                None => ParsedReply {
                    thought,
                    ..ParsedReply::chain_error(format!(
                        "ACTION: {tool} was given but the PARAMETERS JSON could not be parsed. Provide a single valid JSON object after PARAMETERS:."
                    ))
                },
            }
        }
        Action::ChainError => ParsedReply::chain_error("Unreadable reply."),
    }
}

//! Pulls a JSON parameters object out of free text.
//!
//! Recovery productions are tried in order: strict JSON, the relaxed reader,
//! strict JSON with trailing commas removed, and finally salvaging known
//! fields one by one. Only the last one marks the result as partial.

use crate::relaxed;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::OnceLock;

/// Fields the salvage pass knows how to pull out of broken JSON.
const SALVAGE_FIELDS: &[&str] = &[
    "path", "content", "search", "replace", "name", "type", "files", "response", "action",
    "thought",
];

#[derive(Debug, Clone, PartialEq)]
pub struct Extracted {
    pub params: Map<String, Value>,
    /// The object was reassembled from individual fields.
    pub partial: bool,
}

/// The first `{` and everything up to its matching `}`, or to the end of the
/// text when the object is unterminated. Braces inside `"`, `'` and `` ` ``
/// strings do not count.
pub fn candidate_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (offset, c) in text[start..].char_indices() {
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
            '"' | '\'' | '`' => quote = Some(c),
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    Some(&text[start..])
}

pub fn extract_params(text: &str) -> Option<Extracted> {
    let candidate = candidate_span(text)?;
    let productions: [fn(&str) -> Option<Map<String, Value>>; 3] =
        [strict, relaxed::parse_object, without_trailing_commas];
    if let Some(params) = productions.iter().find_map(|production| production(candidate)) {
        return Some(Extracted {
            params,
            partial: false,
        });
    }
    salvage_fields(candidate).map(|params| Extracted {
        params,
        partial: true,
    })
}

fn strict(candidate: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(candidate).ok()? {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

fn without_trailing_commas(candidate: &str) -> Option<Map<String, Value>> {
    let mut out = String::with_capacity(candidate.len());
    let mut in_string = false;
    let mut escaped = false;
    let chars = candidate.chars().collect::<Vec<_>>();
    for (i, &c) in chars.iter().enumerate() {
        if in_string {
            out.push(c);
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        if c == '"' {
            in_string = true;
        }
        if c == ',' {
            let next = chars[i + 1..].iter().find(|n| !n.is_whitespace());
            if matches!(next, Some('}') | Some(']')) {
                continue;
            }
        }
        out.push(c);
    }
    strict(&out)
}

fn key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        let fields = SALVAGE_FIELDS.join("|");
        Regex::new(&format!(r#"(?:^|[{{,\s])["'`]?({fields})["'`]?\s*:\s*"#))
            .expect("valid salvage regex")
    })
}

/// Field-by-field recovery for objects that no parser accepts. Keys are
/// scanned in order; a key inside an already recovered value is skipped.
fn salvage_fields(candidate: &str) -> Option<Map<String, Value>> {
    let mut map = Map::new();
    let mut consumed_until = 0usize;
    for caps in key_re().captures_iter(candidate) {
        let (Some(whole), Some(key)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if whole.start() < consumed_until || map.contains_key(key.as_str()) {
            continue;
        }
        let rest = &candidate[whole.end()..];
        let Some((value, used)) = salvage_value(key.as_str(), rest) else {
            continue;
        };
        consumed_until = whole.end() + used;
        map.insert(key.as_str().to_string(), value);
    }
    (!map.is_empty()).then_some(map)
}

fn salvage_value(key: &str, rest: &str) -> Option<(Value, usize)> {
    if let Some(body) = rest.strip_prefix("```") {
        let after_lang = body.find('\n').map(|i| i + 1).unwrap_or(0);
        let inner = &body[after_lang..];
        let end = inner.find("```").unwrap_or(inner.len());
        let used = 3 + after_lang + (end + 3).min(inner.len());
        return Some((Value::String(inner[..end].trim_end().to_string()), used));
    }
    let first = rest.chars().next()?;
    if key == "files" && first == '[' {
        let span = bracket_span(rest)?;
        let value = serde_json::from_str::<Value>(span).ok().or_else(|| {
            relaxed::parse_object(&format!("{{\"files\": {span}}}"))
                .and_then(|mut map| map.remove("files"))
        })?;
        return Some((value, span.len()));
    }
    if !matches!(first, '"' | '\'' | '`') {
        return None;
    }
    let (text, used) = quoted_value(rest, first);
    Some((Value::String(text), used))
}

/// Reads an escape-aware quoted value. A closing quote only counts when it is
/// followed by the end of the object or the next key, so unescaped quotes in
/// code survive. Unterminated values run to the end of the text.
fn quoted_value(rest: &str, quote: char) -> (String, usize) {
    let mut out = String::new();
    let mut chars = rest.char_indices().skip(1);
    while let Some((i, c)) = chars.next() {
        if c == '\\' {
            if let Some((_, escaped)) = chars.next() {
                match escaped {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    other => out.push(other),
                }
            }
            continue;
        }
        if c == quote && is_value_terminator(&rest[i + c.len_utf8()..]) {
            return (out, i + c.len_utf8());
        }
        out.push(c);
    }
    let trimmed = out.trim_end();
    let trimmed = trimmed.strip_suffix('}').unwrap_or(trimmed).trim_end();
    let trimmed = trimmed.strip_suffix(quote).unwrap_or(trimmed);
    (trimmed.to_string(), rest.len())
}

fn next_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"^,\s*["'`]?[A-Za-z_][\w-]*["'`]?\s*:"#).expect("valid next-key regex")
    })
}

fn is_value_terminator(after: &str) -> bool {
    let after = after.trim_start();
    after.is_empty() || after.starts_with('}') || next_key_re().is_match(after)
}

fn bracket_span(text: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (i, c) in text.char_indices() {
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
            '"' | '\'' | '`' => quote = Some(c),
            '[' | '{' => depth += 1,
            ']' | '}' => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&text[..i + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

//! Display filter for streamed model text.
//!
//! The full reply so far is re-cleaned on every chunk and only the new clean
//! suffix is emitted, so markers split across chunks never leak. Thoughts
//! stay visible; ACTION names and PARAMETERS blocks do not.

use forge_core::AgentEvent;
use regex::Regex;
use std::sync::OnceLock;

const HIDDEN_MARKERS: &[&str] = &["ACTION:", "PARAMETERS:"];

fn action_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)ACTION:\s*\w*").expect("valid action marker regex"))
}

fn parameters_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)PARAMETERS:\s*").expect("valid parameters marker regex"))
}

/// Byte length of the JSON object at the start of `text`, or all of it when
/// the object is still open.
fn object_len(text: &str) -> usize {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (idx, ch) in text.char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return idx + 1;
                }
            }
            _ => {}
        }
    }
    text.len()
}

fn strip_parameters(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(marker) = parameters_re().find(rest) {
        out.push_str(&rest[..marker.start()]);
        let after = &rest[marker.end()..];
        let skip = if after.starts_with('{') {
            object_len(after)
        } else {
            0
        };
        rest = &after[skip..];
    }
    out.push_str(rest);
    out
}

fn common_prefix_len(a: &str, b: &str) -> usize {
    a.char_indices()
        .zip(b.chars())
        .find(|((_, x), y)| x != y)
        .map_or(a.len().min(b.len()), |((idx, _), _)| idx)
}

#[derive(Debug, Default)]
pub struct StreamFilter {
    full: String,
    shown: String,
    last_status: Option<String>,
}

impl StreamFilter {
    pub fn new() -> Self {
        Self::default()
    }

    fn clean(&self) -> String {
        strip_parameters(&action_re().replace_all(&self.full, ""))
    }

    /// Length of a trailing partial hidden marker, held back until the next
    /// chunk decides it.
    fn held_back(clean: &str) -> usize {
        let upper = clean.to_ascii_uppercase();
        HIDDEN_MARKERS
            .iter()
            .flat_map(|marker| (1..marker.len()).map(move |n| &marker[..n]))
            .filter(|prefix| upper.ends_with(prefix))
            .map(str::len)
            .max()
            .unwrap_or(0)
    }

    /// New visible text since the last emission. Text already shown is never
    /// repeated.
    fn advance(&mut self, visible: &str) -> Option<AgentEvent> {
        let common = common_prefix_len(&self.shown, visible);
        let fresh = visible.get(common..).unwrap_or_default().to_string();
        self.shown = visible.to_string();
        (!fresh.is_empty()).then_some(AgentEvent::Chunk { content: fresh })
    }

    pub fn push(&mut self, chunk: &str) -> Vec<AgentEvent> {
        self.full.push_str(chunk);
        let clean = self.clean();
        let visible = &clean[..clean.len() - Self::held_back(&clean)];
        if let Some(event) = self.advance(visible) {
            return vec![event];
        }
        let mut events = Vec::new();
        let lower = self.full.to_ascii_lowercase();
        let status = if lower.contains("action:") {
            Some("Agent is acting...")
        } else if lower.contains("parameters:") || lower.contains("thought:") {
            Some("Agent is thinking...")
        } else {
            None
        };
        if let Some(status) = status
            && self.last_status.as_deref() != Some(status)
        {
            self.last_status = Some(status.to_string());
            events.push(AgentEvent::Status {
                text: status.to_string(),
            });
        }
        events
    }

    /// Releases text held back at the end of the stream.
    pub fn finish(&mut self) -> Vec<AgentEvent> {
        let clean = self.clean();
        self.advance(&clean).into_iter().collect()
    }
}

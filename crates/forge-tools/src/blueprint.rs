//! Markdown blueprints: a path line (usually a `## path` heading) followed by
//! a fenced code block, repeated once per file.

use crate::params::FileEntry;
use regex::Regex;
use std::sync::OnceLock;

const BACK_SCAN_LINES: usize = 5;
const COMMENT_SCAN_LINES: usize = 3;
const IGNORE_WORDS: &[&str] = &["e.g", "i.e", "etc", "vs", "ie", "eg"];

fn file_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"([a-zA-Z0-9_\-][a-zA-Z0-9._\-/]*/[a-zA-Z0-9._\-]+\.[a-zA-Z0-9]{1,8})|([a-zA-Z0-9._\-]+\.[a-zA-Z]{2,8})(?:\s*[`*\s]|$)",
        )
        .expect("valid file path regex")
    })
}

fn comment_path_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)(?://|#|/\*|<!--)\s*([a-zA-Z0-9_\-./]+\.[a-z]{1,8})")
            .expect("valid comment path regex")
    })
}

fn decoration_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[#*_`\s>|]+").expect("valid decoration regex"))
}

/// Find something that looks like a file path on a prose line.
fn scan_for_path(line: &str) -> Option<String> {
    let stripped = decoration_re().replace(line, "");
    let stripped = stripped.trim();
    let caps = file_path_re().captures(stripped)?;
    let candidate = caps.get(1).or_else(|| caps.get(2))?.as_str();
    if IGNORE_WORDS.contains(&candidate.to_ascii_lowercase().as_str()) {
        return None;
    }
    let ext = candidate.rsplit('.').next().unwrap_or_default();
    let plausible = (1..=8).contains(&ext.len()) && ext.chars().all(|c| c.is_ascii_alphabetic());
    plausible.then(|| candidate.to_string())
}

/// Split blueprint markdown into files. A block without a preceding path
/// line may name itself in a comment within its first three lines, or in
/// one of the last lines before its closing fence.
pub fn parse_blueprint(content: &str) -> Vec<FileEntry> {
    let lines = content.split('\n').collect::<Vec<_>>();
    let mut files = Vec::new();
    let mut current_path: Option<String> = None;
    let mut in_block = false;
    let mut block_lines: Vec<&str> = Vec::new();

    for (i, raw) in lines.iter().enumerate() {
        let trimmed = raw.trim();
        if trimmed.starts_with("```") {
            if !in_block {
                in_block = true;
                block_lines.clear();
                continue;
            }
            in_block = false;
            let body = block_lines.join("\n");
            if body.trim().is_empty() {
                continue;
            }
            if current_path.is_none() {
                current_path = block_lines
                    .iter()
                    .take(COMMENT_SCAN_LINES)
                    .find_map(|line| comment_path_re().captures(line))
                    .and_then(|caps| caps.get(1))
                    .map(|m| m.as_str().to_string());
            }
            let path = current_path.take().or_else(|| {
                (i.saturating_sub(BACK_SCAN_LINES)..i)
                    .rev()
                    .find_map(|back| scan_for_path(lines[back]))
            });
            if let Some(path) = path {
                files.push(FileEntry {
                    path: Some(path),
                    content: Some(body),
                });
            }
            continue;
        }
        if in_block {
            block_lines.push(raw);
        } else if let Some(found) = scan_for_path(trimmed) {
            current_path = Some(found);
        }
    }
    files
}

use crate::mode::ModeKind;
use forge_core::{CancelToken, ChatMessage};
use regex::Regex;
use serde_json::{Map, Value};
use std::path::PathBuf;
use std::sync::OnceLock;

/// Parameter keys that hold one workspace path.
const PATH_KEYS: &[&str] = &["path", "file", "filepath", "filename"];

/// One agent run as the host hands it over.
#[derive(Debug, Clone)]
pub struct RunRequest {
    pub messages: Vec<ChatMessage>,
    pub workspace: PathBuf,
    /// Overrides the configured model for this run.
    pub model: Option<String>,
    pub fast: bool,
    /// Forces review mode regardless of tags.
    pub review: bool,
    /// Sub-folder to pin when the task carries no `[TARGET FOLDER: ...]` tag.
    pub target_folder: Option<String>,
    pub cancel: CancelToken,
}

impl RunRequest {
    pub fn new(messages: Vec<ChatMessage>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            messages,
            workspace: workspace.into(),
            model: None,
            fast: false,
            review: false,
            target_folder: None,
            cancel: CancelToken::new(),
        }
    }

    /// Content of the latest user turn.
    pub fn task(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.is_user())
            .map_or("", ChatMessage::content)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestTags {
    pub target_folder: Option<String>,
    pub mode: Option<ModeKind>,
}

fn target_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\[TARGET FOLDER:\s*([^\]]+)\]").expect("valid target regex"))
}

fn mode_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\[MODE:\s*(REVIEW|GENERATE)\s*\]").expect("valid mode regex"))
}

/// Reads the routing tags of a task. A target of `.` pins nothing.
pub fn parse_tags(task: &str) -> RequestTags {
    let target_folder = target_re()
        .captures(task)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().trim_start_matches(['/', '\\']).to_string())
        .filter(|target| !target.is_empty() && target != ".");
    let mode = mode_re()
        .captures(task)
        .and_then(|caps| caps.get(1))
        .map(|m| {
            if m.as_str().eq_ignore_ascii_case("review") {
                ModeKind::Review
            } else {
                ModeKind::Generate
            }
        });
    RequestTags {
        target_folder,
        mode,
    }
}

fn strip_prefix(path: &str, folder: &str) -> Option<String> {
    let normalized = path.replace('\\', "/");
    let normalized = normalized.trim_start_matches("./");
    let folder = folder.replace('\\', "/");
    let folder = folder.trim_matches('/');
    normalized
        .strip_prefix(folder)
        .and_then(|rest| rest.strip_prefix('/'))
        .map(str::to_string)
}

fn strip_in_place(value: &mut Value, folder: &str) {
    if let Value::String(path) = value
        && let Some(stripped) = strip_prefix(path, folder)
    {
        *path = stripped;
    }
}

/// With a pinned folder the model often repeats the folder in its paths
/// (`apps/web/src/x.js` instead of `src/x.js`); drop that prefix.
pub fn strip_pinned_prefix(params: &mut Map<String, Value>, folder: &str) {
    for key in PATH_KEYS {
        if let Some(value) = params.get_mut(*key) {
            strip_in_place(value, folder);
        }
    }
    for key in ["paths", "files"] {
        let Some(Value::Array(items)) = params.get_mut(key) else {
            continue;
        };
        for item in items {
            match item {
                Value::Object(entry) => {
                    for path_key in PATH_KEYS {
                        if let Some(value) = entry.get_mut(*path_key) {
                            strip_in_place(value, folder);
                        }
                    }
                }
                other => strip_in_place(other, folder),
            }
        }
    }
}

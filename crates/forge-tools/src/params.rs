//! Alias-tolerant decoding of tool parameters.
//!
//! Local models rarely agree on key names, so every tool accepts a small set
//! of aliases and a few alternative shapes. Decoding happens once, here; the
//! tool bodies only ever see the typed structs.

use anyhow::{Result, bail};
use serde_json::{Map, Value};

const PATH_KEYS: &[&str] = &["path", "file", "filepath", "filename"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub path: Option<String>,
    pub content: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathParams {
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteParams {
    pub path: String,
    pub content: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplaceParams {
    pub path: String,
    pub search: String,
    pub replace: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScaffoldParams {
    pub kind: String,
    pub name: String,
    pub flat: bool,
}

impl PathParams {
    pub fn from_value(params: &Value) -> Self {
        Self {
            path: first_string(params, PATH_KEYS).unwrap_or_default(),
        }
    }

    /// `list_files` defaults to the call's base directory.
    pub fn listing(params: &Value) -> Self {
        let path = first_string(params, &["path", "dir", "directory", "folder"])
            .filter(|p| !p.trim().is_empty())
            .unwrap_or_else(|| ".".to_string());
        Self { path }
    }
}

impl WriteParams {
    pub fn from_value(params: &Value) -> Self {
        let path = first_string(params, PATH_KEYS).unwrap_or_default();
        let content = match params.get("content") {
            Some(value) if !value.is_null() => stringify(value),
            _ => first_string(params, &["text", "data"]).unwrap_or_default(),
        };
        Self { path, content }
    }
}

impl ReplaceParams {
    pub fn from_value(params: &Value) -> Result<Self> {
        let path = first_string(params, &["path", "file"]);
        let search = params.get("search").and_then(Value::as_str);
        let replace = params.get("replace").and_then(Value::as_str);
        match (path, search, replace) {
            (Some(path), Some(search), Some(replace)) if !path.trim().is_empty() => Ok(Self {
                path,
                search: search.to_string(),
                replace: replace.to_string(),
            }),
            _ => bail!("\"path\", \"search\", and \"replace\" parameters are required."),
        }
    }
}

impl ScaffoldParams {
    pub fn from_value(params: &Value) -> Self {
        let flat = match params.get("flat") {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => s.eq_ignore_ascii_case("true"),
            _ => false,
        };
        Self {
            kind: first_string(params, &["type", "template", "kind"]).unwrap_or_default(),
            name: first_string(params, &["name", "project", "project_name"]).unwrap_or_default(),
            flat,
        }
    }
}

/// `bulk_write` accepts a top-level array, `{files: [...]}`, a single
/// `{path, content}` object, or a `{path: content}` map.
pub fn file_entries(params: &Value) -> Vec<FileEntry> {
    if let Some(items) = params.as_array() {
        return items.iter().map(file_entry).collect();
    }
    let Some(obj) = params.as_object() else {
        return Vec::new();
    };
    if let Some(items) = obj.get("files").and_then(Value::as_array) {
        return items.iter().map(file_entry).collect();
    }
    if obj.get("path").and_then(Value::as_str).is_some() && obj.contains_key("content") {
        return vec![file_entry(params)];
    }
    let mut entries = obj
        .iter()
        .filter(|(key, _)| key.as_str() != "files")
        .peekable();
    if entries.peek().is_some_and(|(_, value)| value.is_string()) {
        return entries
            .filter_map(|(path, content)| {
                content.as_str().map(|c| FileEntry {
                    path: Some(path.clone()),
                    content: Some(c.to_string()),
                })
            })
            .collect();
    }
    Vec::new()
}

fn file_entry(value: &Value) -> FileEntry {
    FileEntry {
        path: first_string(value, PATH_KEYS),
        content: match value.get("content") {
            Some(v) if !v.is_null() => Some(stringify(v)),
            _ => first_string(value, &["text", "data"]),
        },
    }
}

/// `bulk_read` accepts a top-level array or `paths`/`files`; entries may be
/// strings or `{path}` objects.
pub fn read_paths(params: &Value) -> Vec<String> {
    let items = params.as_array().or_else(|| {
        params
            .get("paths")
            .or_else(|| params.get("files"))
            .and_then(Value::as_array)
    });
    items
        .map(|items| {
            items
                .iter()
                .filter_map(|item| {
                    item.as_str()
                        .map(ToString::to_string)
                        .or_else(|| first_string(item, PATH_KEYS))
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Blueprint markdown: a bare string, one of the usual keys, any string value
/// carrying a `## ` heading, or a `files` array converted on the fly.
pub fn blueprint_content(params: &Value) -> String {
    if let Some(text) = params.as_str() {
        return text.to_string();
    }
    let Some(obj) = params.as_object() else {
        return String::new();
    };
    if let Some(content) = first_string(params, &["content", "text", "blueprint", "markdown"])
        .filter(|c| !c.trim().is_empty())
    {
        return content;
    }
    if let Some(content) = obj
        .values()
        .filter_map(Value::as_str)
        .find(|s| s.contains("## "))
    {
        return content.to_string();
    }
    if let Some(files) = obj.get("files").and_then(Value::as_array) {
        return files
            .iter()
            .map(file_entry)
            .map(|f| {
                format!(
                    "## {}\n```\n{}\n```",
                    f.path.unwrap_or_default(),
                    f.content.unwrap_or_default()
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n");
    }
    String::new()
}

pub fn instructions(params: &Value) -> Option<String> {
    first_string(params, &["instructions", "text", "message"])
        .or_else(|| params.as_str().map(ToString::to_string))
        .filter(|s| !s.trim().is_empty())
}

pub fn review_summary(params: &Value) -> Option<String> {
    first_string(params, &["summary", "message", "text"]).filter(|s| !s.trim().is_empty())
}

fn first_string(params: &Value, keys: &[&str]) -> Option<String> {
    let obj: &Map<String, Value> = params.as_object()?;
    keys.iter()
        .find_map(|key| obj.get(*key).and_then(Value::as_str))
        .map(ToString::to_string)
}

/// Non-string content (a model sending `package.json` as an object) is
/// written as pretty JSON.
fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => serde_json::to_string_pretty(other).unwrap_or_else(|_| other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn write_params_accept_aliases() {
        let p = WriteParams::from_value(&json!({"filename": "a.js", "text": "console.log(1);"}));
        assert_eq!(p.path, "a.js");
        assert_eq!(p.content, "console.log(1);");

        let p = WriteParams::from_value(&json!({"path": "package.json", "content": {"name": "x"}}));
        assert!(p.content.contains("\"name\": \"x\""));
    }

    #[test]
    fn bulk_write_shapes() {
        let by_array = file_entries(&json!([{"path": "a", "content": "1"}]));
        let by_files = file_entries(&json!({"files": [{"file": "a", "content": "1"}]}));
        let single = file_entries(&json!({"path": "a", "content": "1"}));
        let mapped = file_entries(&json!({"a": "1"}));
        for entries in [by_array, by_files, single, mapped] {
            assert_eq!(
                entries,
                vec![FileEntry {
                    path: Some("a".to_string()),
                    content: Some("1".to_string())
                }]
            );
        }
        assert!(file_entries(&json!({"count": 3})).is_empty());
    }

    #[test]
    fn read_paths_accept_objects_and_strings() {
        assert_eq!(
            read_paths(&json!({"files": ["a.js", {"path": "b.js"}]})),
            vec!["a.js", "b.js"]
        );
        assert_eq!(read_paths(&json!(["c.js"])), vec!["c.js"]);
        assert!(read_paths(&json!({})).is_empty());
    }

    #[test]
    fn blueprint_content_falls_back_to_files_array() {
        assert_eq!(blueprint_content(&json!({"markdown": "## a.js"})), "## a.js");
        assert_eq!(blueprint_content(&json!({"notes": "## b.js\n```\nx\n```"})), "## b.js\n```\nx\n```");
        let converted = blueprint_content(&json!({"files": [{"path": "c.js", "content": "let c = 1;"}]}));
        assert!(converted.starts_with("## c.js\n```\nlet c = 1;"));
    }

    #[test]
    fn replace_params_require_all_fields() {
        assert!(ReplaceParams::from_value(&json!({"path": "a", "search": "x"})).is_err());
        let p = ReplaceParams::from_value(&json!({"file": "a", "search": "x", "replace": ""}))
            .expect("params");
        assert_eq!(p.replace, "");
    }

    #[test]
    fn scaffold_flat_accepts_string_flag() {
        let p = ScaffoldParams::from_value(&json!({"type": "vue-app", "name": "web", "flat": "true"}));
        assert!(p.flat);
        assert_eq!(p.kind, "vue-app");
    }
}

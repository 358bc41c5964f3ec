use crate::params::{FileEntry, ReplaceParams, WriteParams};
use anyhow::{Result, bail};
use forge_core::ToolsConfig;
use forge_policy::PathPolicy;
use ignore::WalkBuilder;
use serde_json::{Value, json};
use sha2::Digest;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const NOT_FOUND_HEAD_CHARS: usize = 500;

/// Writes shorter than this are checked for placeholder content.
const PLACEHOLDER_MAX_CHARS: usize = 10;

/// Blank or elided content (`...`, `/*`) that a model emits instead of the
/// real file body.
pub fn is_placeholder_content(content: &str) -> bool {
    content.chars().count() < PLACEHOLDER_MAX_CHARS
        && (content.contains("...") || content.contains("/*") || content.trim().is_empty())
}

pub fn read_file(policy: &PathPolicy, base: &Path, path: &str) -> Result<Value> {
    let abs = policy.resolve_in(base, path)?;
    if !abs.exists() {
        bail!("File not found: {path}");
    }
    if abs.is_dir() {
        bail!("\"{path}\" is a directory; use list_files.");
    }
    let bytes = fs::read(&abs)?;
    let sha = format!("{:x}", sha2::Sha256::digest(&bytes));
    Ok(json!({
        "path": path,
        "resolved": policy.relative_display(&abs),
        "content": String::from_utf8_lossy(&bytes),
        "bytes": bytes.len(),
        "sha256": sha,
    }))
}

pub fn write_file(policy: &PathPolicy, base: &Path, params: &WriteParams) -> Result<Value> {
    if params.path.trim().is_empty() {
        bail!("\"path\" parameter is required.");
    }
    if is_placeholder_content(&params.content) {
        bail!(
            "Rejecting write to \"{}\": Content is suspiciously empty or contains placeholders. Please provide the FULL file content.",
            params.path
        );
    }
    let abs = policy.resolve_writable_in(base, &params.path)?;
    write_with_parents(&abs, &params.content)?;
    Ok(json!({
        "success": true,
        "path": params.path,
        "resolved": policy.relative_display(&abs),
        "bytes": params.content.len(),
    }))
}

pub fn bulk_write(policy: &PathPolicy, base: &Path, files: &[FileEntry]) -> Result<Value> {
    if files.is_empty() {
        bail!("\"files\" parameter must be an array of {{path, content}} objects.");
    }
    let results = files
        .iter()
        .map(|file| write_entry(policy, base, file))
        .collect::<Vec<_>>();
    Ok(json!({"success": true, "results": results}))
}

fn write_entry(policy: &PathPolicy, base: &Path, file: &FileEntry) -> Value {
    let (Some(path), Some(content)) = (&file.path, &file.content) else {
        return json!({
            "path": file.path.as_deref().unwrap_or("unknown"),
            "error": "Path and content are required.",
        });
    };
    if is_placeholder_content(content) {
        return json!({
            "path": path,
            "error": "Suspiciously empty content or placeholders detected. Write aborted for this file.",
        });
    }
    let written = policy
        .resolve_writable_in(base, path)
        .map_err(anyhow::Error::from)
        .and_then(|abs| write_with_parents(&abs, content));
    match written {
        Ok(()) => json!({"path": path, "success": true, "bytes": content.len()}),
        Err(err) => json!({"path": path, "error": err.to_string()}),
    }
}

fn write_with_parents(abs: &Path, content: &str) -> Result<()> {
    if let Some(parent) = abs.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(abs, content)?;
    Ok(())
}

pub fn bulk_read(
    policy: &PathPolicy,
    base: &Path,
    paths: &[String],
    cfg: &ToolsConfig,
) -> Result<Value> {
    if paths.is_empty() {
        bail!("\"paths\" array is required.");
    }
    let capped = paths.len() > cfg.bulk_read_limit;
    let results = paths
        .iter()
        .take(cfg.bulk_read_limit)
        .map(|p| match policy.resolve_in(base, p) {
            Ok(abs) if !abs.exists() => json!({"path": p, "error": "File not found"}),
            Ok(abs) if abs.is_dir() => json!({"path": p, "error": "Is a directory"}),
            Ok(abs) => match fs::read(&abs) {
                Ok(bytes) => json!({
                    "path": p,
                    "content": String::from_utf8_lossy(&bytes),
                    "success": true,
                }),
                Err(err) => json!({"path": p, "error": err.to_string()}),
            },
            Err(err) => json!({"path": p, "error": err.to_string()}),
        })
        .collect::<Vec<_>>();
    let mut out = json!({"success": true, "results": results});
    if capped {
        out["capped_from"] = json!(paths.len());
    }
    Ok(out)
}

#[derive(Debug)]
struct Listed {
    rel: String,
    name: String,
    is_dir: bool,
    size: u64,
}

/// Nested `items` tree plus a flat `files_list`, both relative to `base`.
pub fn list_files(
    policy: &PathPolicy,
    base: &Path,
    path: &str,
    cfg: &ToolsConfig,
) -> Result<Value> {
    let abs = policy.resolve_in(base, path)?;
    if !abs.exists() {
        bail!("Directory not found: {path}");
    }
    if !abs.is_dir() {
        bail!("\"{path}\" is a file; use read_file.");
    }

    let mut by_parent: BTreeMap<PathBuf, Vec<Listed>> = BTreeMap::new();
    for entry in walk_entries(&abs, cfg) {
        let Some(parent) = entry.parent() else {
            continue;
        };
        let is_dir = entry.is_dir();
        let size = if is_dir {
            0
        } else {
            fs::metadata(&entry).map(|m| m.len()).unwrap_or(0)
        };
        let rel = entry
            .strip_prefix(base)
            .unwrap_or(&entry)
            .to_string_lossy()
            .replace('\\', "/");
        let name = entry
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        by_parent.entry(parent.to_path_buf()).or_default().push(Listed {
            rel,
            name,
            is_dir,
            size,
        });
    }

    let mut files_list = Vec::new();
    let items = build_items(&abs, &by_parent, &mut files_list);
    Ok(json!({
        "path": path,
        "items": items,
        "files_list": files_list,
    }))
}

fn build_items(
    dir: &Path,
    by_parent: &BTreeMap<PathBuf, Vec<Listed>>,
    files_list: &mut Vec<String>,
) -> Vec<Value> {
    let Some(children) = by_parent.get(dir) else {
        return Vec::new();
    };
    children
        .iter()
        .map(|child| {
            if child.is_dir {
                let nested = build_items(&dir.join(&child.name), by_parent, files_list);
                json!({"type": "directory", "name": child.name, "path": child.rel, "children": nested})
            } else {
                files_list.push(child.rel.clone());
                json!({"type": "file", "name": child.name, "path": child.rel, "size": child.size})
            }
        })
        .collect()
}

fn walk_entries(root: &Path, cfg: &ToolsConfig) -> Vec<PathBuf> {
    let skip = cfg.list_skip_dirs.clone();
    let mut builder = WalkBuilder::new(root);
    builder.standard_filters(false);
    builder.follow_links(false);
    builder.max_depth(Some(cfg.list_max_depth + 1));
    builder.sort_by_file_name(|a, b| a.cmp(b));
    builder.filter_entry(move |entry| {
        let name = entry.file_name().to_string_lossy();
        !skip.iter().any(|s| s.as_str() == name)
    });

    let mut paths = Vec::new();
    for entry in builder.build() {
        let Ok(entry) = entry else {
            continue;
        };
        if entry.depth() == 0 {
            continue;
        }
        paths.push(entry.into_path());
    }
    paths
}

pub fn replace_in_file(policy: &PathPolicy, base: &Path, params: &ReplaceParams) -> Result<Value> {
    let abs = policy.resolve_writable_in(base, &params.path)?;
    if !abs.exists() {
        bail!("File not found: {}", params.path);
    }
    let content = fs::read_to_string(&abs)?;
    let updated = apply_replacement(&content, &params.search, &params.replace, &params.path)?;
    if updated.trim().is_empty() && !content.trim().is_empty() {
        bail!("Update rejected: result would be an empty file.");
    }
    fs::write(&abs, &updated)?;
    Ok(json!({
        "success": true,
        "path": params.path,
        "bytes": updated.len(),
    }))
}

/// Search is matched on CRLF-stripped, right-trimmed lines and must be
/// unique. An exact raw match is replaced in place; otherwise the matching
/// line range is spliced.
fn apply_replacement(content: &str, search: &str, replace: &str, display: &str) -> Result<String> {
    let norm_content = normalize_lines(content);
    let norm_search = normalize_lines(search);
    if norm_search.trim().is_empty() {
        bail!(
            "The search block is empty. Please provide a substantive portion of the code to replace."
        );
    }
    let Some(first) = norm_content.find(&norm_search) else {
        let head = content.chars().take(NOT_FOUND_HEAD_CHARS).collect::<String>();
        let ellipsis = if content.chars().count() > NOT_FOUND_HEAD_CHARS {
            "..."
        } else {
            ""
        };
        bail!(
            "The search block was not found in \"{display}\". Ensure exact matching. File starts with:\n{head}{ellipsis}"
        );
    };
    if norm_content.rfind(&norm_search) != Some(first) {
        bail!(
            "The search block corresponds to multiple locations in \"{display}\". Please provide a more unique search block."
        );
    }

    if let Some(idx) = content.find(search) {
        return Ok(format!(
            "{}{}{}",
            &content[..idx],
            replace,
            &content[idx + search.len()..]
        ));
    }

    let stripped = content.replace('\r', "");
    let mut lines = stripped.split('\n').map(ToString::to_string).collect::<Vec<_>>();
    let search_stripped = search.replace('\r', "");
    let search_lines = search_stripped.split('\n').collect::<Vec<_>>();
    let replace_stripped = replace.replace('\r', "");
    let replace_lines = replace_stripped.split('\n').map(ToString::to_string);

    let start = (0..=lines.len().saturating_sub(search_lines.len())).find(|&i| {
        search_lines
            .iter()
            .enumerate()
            .all(|(j, s)| lines.get(i + j).is_some_and(|l| l.trim_end() == s.trim_end()))
    });
    let Some(start) = start else {
        bail!(
            "Surgical edit failed: Search block found with normalization but exact line match failed. Check indentation."
        );
    };
    lines.splice(start..start + search_lines.len(), replace_lines);
    Ok(lines.join("\n"))
}

fn normalize_lines(text: &str) -> String {
    text.replace('\r', "")
        .split('\n')
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_policy() -> (tempfile::TempDir, PathPolicy) {
        let dir = tempfile::tempdir().expect("tempdir");
        let policy = PathPolicy::new(dir.path());
        (dir, policy)
    }

    #[test]
    fn placeholder_content_is_detected() {
        assert!(is_placeholder_content(""));
        assert!(is_placeholder_content("   \n"));
        assert!(is_placeholder_content("// ..."));
        assert!(is_placeholder_content("/* x */"));
        assert!(!is_placeholder_content("ok"));
        assert!(!is_placeholder_content("const a = 1; // ... long enough"));
    }

    #[test]
    fn write_then_read_reports_size_and_digest() {
        let (_dir, policy) = temp_policy();
        let root = policy.root().to_path_buf();
        let params = WriteParams {
            path: "src/app.js".to_string(),
            content: "console.log('hi');\n".to_string(),
        };
        let out = write_file(&policy, &root, &params).expect("write");
        assert_eq!(out["bytes"], 19);
        let read = read_file(&policy, &root, "src/app.js").expect("read");
        assert_eq!(read["content"], "console.log('hi');\n");
        assert_eq!(read["sha256"].as_str().map(str::len), Some(64));
        assert_eq!(read["resolved"], "src/app.js");
    }

    #[test]
    fn writes_under_a_target_report_the_workspace_path() {
        let (_dir, policy) = temp_policy();
        let base = policy.root().join("web");
        let params = WriteParams {
            path: "index.html".to_string(),
            content: "<h1>hello there</h1>\n".to_string(),
        };
        let out = write_file(&policy, &base, &params).expect("write");
        assert_eq!(out["path"], "index.html");
        assert_eq!(out["resolved"], "web/index.html");
    }

    #[test]
    fn read_file_refuses_directories() {
        let (_dir, policy) = temp_policy();
        let root = policy.root().to_path_buf();
        fs::create_dir_all(root.join("src")).expect("mkdir");
        let err = read_file(&policy, &root, "src").expect_err("dir");
        assert!(err.to_string().contains("is a directory"));
        let err = read_file(&policy, &root, "missing.js").expect_err("missing");
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn bulk_write_reports_per_file_errors() {
        let (_dir, policy) = temp_policy();
        let root = policy.root().to_path_buf();
        let files = vec![
            FileEntry {
                path: Some("a.js".to_string()),
                content: Some("module.exports = 1;".to_string()),
            },
            FileEntry {
                path: Some("b.js".to_string()),
                content: Some("...".to_string()),
            },
            FileEntry {
                path: None,
                content: Some("x".to_string()),
            },
            FileEntry {
                path: Some("../escape.js".to_string()),
                content: Some("module.exports = 2;".to_string()),
            },
        ];
        let out = bulk_write(&policy, &root, &files).expect("bulk");
        let results = out["results"].as_array().expect("results");
        assert_eq!(results[0]["success"], true);
        assert!(results[1]["error"].as_str().is_some_and(|e| e.contains("placeholders")));
        assert_eq!(results[2]["path"], "unknown");
        assert!(results[3]["error"].as_str().is_some_and(|e| e.contains("outside workspace")));
        assert!(root.join("a.js").exists());
        assert!(!root.join("b.js").exists());
    }

    #[test]
    fn list_files_skips_heavy_dirs_and_nests() {
        let (_dir, policy) = temp_policy();
        let root = policy.root().to_path_buf();
        for rel in ["src/app.js", "src/lib/util.js", "node_modules/x/index.js", "README.md"] {
            let path = root.join(rel);
            fs::create_dir_all(path.parent().expect("parent")).expect("mkdir");
            fs::write(path, "content").expect("write");
        }
        let out = list_files(&policy, &root, ".", &ToolsConfig::default()).expect("list");
        let files = out["files_list"].as_array().expect("files");
        let names = files.iter().filter_map(Value::as_str).collect::<Vec<_>>();
        assert_eq!(names, vec!["README.md", "src/app.js", "src/lib/util.js"]);
        let src = out["items"]
            .as_array()
            .and_then(|items| items.iter().find(|i| i["name"] == "src"))
            .expect("src dir");
        assert_eq!(src["type"], "directory");
        assert_eq!(src["children"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn list_files_respects_depth_limit() {
        let (_dir, policy) = temp_policy();
        let root = policy.root().to_path_buf();
        let deep = root.join("a/b/c/d/e/f");
        fs::create_dir_all(&deep).expect("mkdir");
        fs::write(deep.join("deep.txt"), "x").expect("write");
        fs::write(root.join("a/b/c/d/e/shallow.txt"), "x").expect("write");
        let out = list_files(&policy, &root, ".", &ToolsConfig::default()).expect("list");
        let names = out["files_list"]
            .as_array()
            .expect("files")
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>();
        assert_eq!(names, vec!["a/b/c/d/e/shallow.txt"]);
    }

    #[test]
    fn bulk_read_caps_paths() {
        let (_dir, policy) = temp_policy();
        let root = policy.root().to_path_buf();
        fs::write(root.join("a.txt"), "alpha").expect("write");
        let mut paths = vec!["a.txt".to_string(), "missing.txt".to_string()];
        paths.extend((0..25).map(|i| format!("f{i}.txt")));
        let out = bulk_read(&policy, &root, &paths, &ToolsConfig::default()).expect("read");
        let results = out["results"].as_array().expect("results");
        assert_eq!(results.len(), 20);
        assert_eq!(results[0]["content"], "alpha");
        assert_eq!(results[1]["error"], "File not found");
        assert_eq!(out["capped_from"], 27);
    }

    #[test]
    fn replacement_tolerates_whitespace_jitter() {
        let content = "function a() {\r\n  return 1;   \r\n}\r\n";
        let out = apply_replacement(content, "  return 1;\n}", "  return 2;\n}", "a.js")
            .expect("replace");
        assert_eq!(out, "function a() {\n  return 2;\n}\n");

        let exact = apply_replacement("let x = 1;\nlet y = 2;\n", "let y = 2;", "let y = 3;", "b.js")
            .expect("exact");
        assert_eq!(exact, "let x = 1;\nlet y = 3;\n");
    }

    #[test]
    fn replacement_errors_are_descriptive() {
        let err = apply_replacement("a\na\n", "a", "b", "x.js").expect_err("multi");
        assert!(err.to_string().contains("multiple locations"));
        let err = apply_replacement("abc", "zzz", "b", "x.js").expect_err("missing");
        assert!(err.to_string().contains("File starts with:\nabc"));
        let err = apply_replacement("abc", "  \n ", "b", "x.js").expect_err("empty");
        assert!(err.to_string().contains("search block is empty"));
    }

    #[test]
    fn replace_rejects_emptying_a_file() {
        let (_dir, policy) = temp_policy();
        let root = policy.root().to_path_buf();
        fs::write(root.join("only.js"), "const only = true;").expect("write");
        let params = ReplaceParams {
            path: "only.js".to_string(),
            search: "const only = true;".to_string(),
            replace: String::new(),
        };
        let err = replace_in_file(&policy, &root, &params).expect_err("empty result");
        assert!(err.to_string().contains("empty file"));
        assert_eq!(
            fs::read_to_string(root.join("only.js")).expect("read"),
            "const only = true;"
        );
    }
}

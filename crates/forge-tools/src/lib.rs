pub mod blueprint;
pub mod files;
pub mod handoff;
pub mod params;
pub mod scaffold;

use anyhow::{Result, bail};
use forge_core::{ToolCall, ToolHost, ToolName, ToolResult, ToolsConfig, runtime_dir};
use forge_policy::PathPolicy;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};

pub use files::is_placeholder_content;
pub use handoff::{INSTRUCTIONS_MARKER, REVIEW_REQUESTED_MARKER};

/// File-system tool host jailed to one workspace root.
pub struct LocalToolHost {
    policy: PathPolicy,
    cfg: ToolsConfig,
}

impl LocalToolHost {
    pub fn new(workspace: &Path, cfg: ToolsConfig) -> Self {
        Self {
            policy: PathPolicy::new(workspace),
            cfg,
        }
    }

    pub fn policy(&self) -> &PathPolicy {
        &self.policy
    }

    pub fn handoff_log_path(&self) -> PathBuf {
        runtime_dir(self.policy.root()).join(&self.cfg.handoff_log)
    }

    fn run_tool(&self, call: &ToolCall) -> Result<Value> {
        let base = call.workspace.as_path();
        let params = &call.params;
        match call.name {
            ToolName::ReadFile => {
                let p = params::PathParams::from_value(params);
                files::read_file(&self.policy, base, &p.path)
            }
            ToolName::WriteFile => {
                files::write_file(&self.policy, base, &params::WriteParams::from_value(params))
            }
            ToolName::ReplaceInFile => files::replace_in_file(
                &self.policy,
                base,
                &params::ReplaceParams::from_value(params)?,
            ),
            ToolName::BulkWrite => {
                files::bulk_write(&self.policy, base, &params::file_entries(params))
            }
            ToolName::ApplyBlueprint => {
                let content = params::blueprint_content(params);
                if content.trim().is_empty() {
                    bail!("\"content\" parameter is required and cannot be empty.");
                }
                let parsed = blueprint::parse_blueprint(&content);
                if parsed.is_empty() {
                    bail!(
                        "No files found in content. Format each file as:\n## project/src/file.js\n```js\n// code\n```"
                    );
                }
                files::bulk_write(&self.policy, base, &parsed)
            }
            ToolName::ListFiles => {
                let p = params::PathParams::listing(params);
                files::list_files(&self.policy, base, &p.path, &self.cfg)
            }
            ToolName::BulkRead => {
                files::bulk_read(&self.policy, base, &params::read_paths(params), &self.cfg)
            }
            ToolName::ScaffoldProject => scaffold::scaffold_project(
                &self.policy,
                base,
                &params::ScaffoldParams::from_value(params),
            ),
            ToolName::LogInstructions => handoff::log_instructions(
                &self.handoff_log_path(),
                params::instructions(params).as_deref(),
            ),
            ToolName::RequestReview => handoff::request_review(
                &self.handoff_log_path(),
                params::review_summary(params).as_deref(),
            ),
        }
    }
}

impl ToolHost for LocalToolHost {
    fn execute(&self, call: &ToolCall) -> ToolResult {
        let output = match self.run_tool(call) {
            Ok(output) => output,
            Err(err) => json!({"error": err.to_string()}),
        };
        ToolResult::from_output(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn temp_host() -> (tempfile::TempDir, LocalToolHost) {
        let dir = tempfile::tempdir().expect("tempdir");
        let host = LocalToolHost::new(dir.path(), ToolsConfig::default());
        (dir, host)
    }

    fn call(host: &LocalToolHost, name: ToolName, params: Value) -> ToolResult {
        host.execute(&ToolCall {
            name,
            params,
            workspace: host.policy().root().to_path_buf(),
        })
    }

    #[test]
    fn errors_are_wrapped_not_propagated() {
        let (_dir, host) = temp_host();
        let result = call(&host, ToolName::ReadFile, json!({"path": "../../etc/passwd"}));
        assert!(!result.success);
        assert!(result.error_message().is_some_and(|e| e.contains("Access denied")));

        let result = call(&host, ToolName::ReplaceInFile, json!({"path": "a.js"}));
        assert!(!result.success);
    }

    #[test]
    fn blueprint_writes_every_file() {
        let (dir, host) = temp_host();
        let md = "## src/a.js\n```js\nexport const a = 1;\n```\n## src/b.js\n```js\nexport const b = 2;\n```";
        let result = call(&host, ToolName::ApplyBlueprint, json!({"blueprint": md}));
        assert!(result.success, "{:?}", result.output);
        assert_eq!(result.output["results"].as_array().map(Vec::len), Some(2));
        assert_eq!(
            fs::read_to_string(dir.path().join("src/b.js")).expect("b"),
            "export const b = 2;"
        );

        let result = call(&host, ToolName::ApplyBlueprint, json!({"content": "no files"}));
        assert!(result.error_message().is_some_and(|e| e.contains("No files found")));
    }

    #[test]
    fn runtime_dir_is_refused_for_writes() {
        let (_dir, host) = temp_host();
        let result = call(
            &host,
            ToolName::WriteFile,
            json!({"path": ".forge/settings.json", "content": "{\"llm\": {}} overwrite"}),
        );
        assert!(!result.success);
    }

    #[test]
    fn calls_resolve_against_their_base() {
        let (dir, host) = temp_host();
        let base = dir.path().join("apps/web");
        fs::create_dir_all(&base).expect("mkdir");
        let result = host.execute(&ToolCall {
            name: ToolName::WriteFile,
            params: json!({"path": "index.html", "content": "<html></html>"}),
            workspace: base,
        });
        assert!(result.success);
        assert!(dir.path().join("apps/web/index.html").exists());
    }

    #[test]
    fn review_request_lands_in_handoff_log() {
        let (_dir, host) = temp_host();
        let result = call(&host, ToolName::RequestReview, json!({}));
        assert!(result.success);
        let log = fs::read_to_string(host.handoff_log_path()).expect("log");
        assert!(log.contains(REVIEW_REQUESTED_MARKER));
    }
}
